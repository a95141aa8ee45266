//! Socket-level Gopher: connect, send a selector, stream the response back.
//!
//! Every function here owns the stream it works on, so a failure at any step
//! drops (and thereby closes) the socket before the error reaches the caller.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rustls::{ClientConfig, ServerName};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::{timeout, timeout_at, Instant};
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::tls;
use crate::url::DEFAULT_PORT;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CHUNK_SIZE: usize = 4096;
/// Upper bound for responses buffered in memory. Saving to a sink is not capped.
pub const MAX_RESPONSE_SIZE: u64 = 16 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum GopherError {
    /// DNS, TCP connect or TLS handshake failed.
    #[error("Connection failed: {0}")]
    Connection(String),
    /// Some phase ran past its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),
    /// I/O failed after the connection was up.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl GopherError {
    /// Only timeouts are worth retrying without the caller changing anything.
    pub fn is_retriable(&self) -> bool {
        matches!(self, GopherError::Timeout(_))
    }
}

#[derive(Error, Debug)]
pub enum SaveError {
    #[error("Transfer failed after {written} bytes: {source}")]
    Transport {
        written: u64,
        #[source]
        source: GopherError,
    },
    #[error("Failed to write to output after {written} bytes: {source}")]
    Sink {
        written: u64,
        #[source]
        source: io::Error,
    },
}

impl SaveError {
    /// Bytes that reached the sink before the failure.
    pub fn written(&self) -> u64 {
        match self {
            SaveError::Transport { written, .. } | SaveError::Sink { written, .. } => *written,
        }
    }
}

pub trait GopherIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> GopherIo for T {}

/// A connected plain or TLS stream.
pub type GopherStream = Box<dyn GopherIo>;

#[derive(Clone)]
pub struct RequestOptions {
    pub port: u16,
    pub use_ssl: bool,
    pub timeout: Duration,
    /// `None` tries every resolved address; `Some(true)` only IPv6,
    /// `Some(false)` only IPv4.
    pub use_ipv6: Option<bool>,
    pub chunk_size: usize,
    pub max_response_size: u64,
    /// Falls back to the webpki root set when unset.
    pub tls_config: Option<Arc<ClientConfig>>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        RequestOptions {
            port: DEFAULT_PORT,
            use_ssl: false,
            timeout: DEFAULT_TIMEOUT,
            use_ipv6: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_response_size: MAX_RESPONSE_SIZE,
            tls_config: None,
        }
    }
}

fn map_io_error(err: io::Error, context: &str) -> GopherError {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            GopherError::Timeout(format!("{}: {}", context, err))
        }
        _ => GopherError::Protocol(format!("{}: {}", context, err)),
    }
}

async fn resolve(
    host: &str,
    port: u16,
    use_ipv6: Option<bool>,
    deadline: Instant,
) -> Result<Vec<SocketAddr>, GopherError> {
    let family = match use_ipv6 {
        None => "",
        Some(true) => " with IPv6",
        Some(false) => " with IPv4",
    };

    let resolved = timeout_at(deadline, lookup_host((host, port)))
        .await
        .map_err(|_| GopherError::Timeout(format!("Resolving {} timed out", host)))?
        .map_err(|e| {
            GopherError::Connection(format!("Failed to resolve host '{}'{}: {}", host, family, e))
        })?;

    let addrs: Vec<SocketAddr> = resolved
        .filter(|addr| match use_ipv6 {
            None => true,
            Some(true) => addr.is_ipv6(),
            Some(false) => addr.is_ipv4(),
        })
        .collect();

    if addrs.is_empty() {
        return Err(GopherError::Connection(format!(
            "Could not resolve host {}{}",
            host, family
        )));
    }
    Ok(addrs)
}

async fn connect_tcp(
    host: &str,
    port: u16,
    addrs: &[SocketAddr],
    deadline: Instant,
) -> Result<TcpStream, GopherError> {
    let mut last_err = None;

    for addr in addrs {
        debug!(%addr, "Connecting");
        match timeout_at(deadline, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(e)) => {
                debug!(%addr, error = %e, "Connect attempt failed");
                last_err = Some(e);
            }
            Err(_) => {
                return Err(GopherError::Timeout(format!(
                    "Connection to {}:{} timed out",
                    host, port
                )))
            }
        }
    }

    let context = format!("Failed to connect to {}:{}", host, port);
    Err(match last_err {
        Some(e) if e.kind() == io::ErrorKind::TimedOut => {
            GopherError::Timeout(format!("{}: {}", context, e))
        }
        Some(e) => GopherError::Connection(format!("{}: {}", context, e)),
        None => GopherError::Connection(context),
    })
}

/// Resolve, connect and (optionally) complete a TLS handshake, all within
/// `options.timeout`.
pub async fn create_connection(
    host: &str,
    options: &RequestOptions,
) -> Result<GopherStream, GopherError> {
    let deadline = Instant::now() + options.timeout;
    let port = options.port;

    let addrs = resolve(host, port, options.use_ipv6, deadline).await?;
    let tcp = connect_tcp(host, port, &addrs, deadline).await?;

    if !options.use_ssl {
        return Ok(Box::new(tcp));
    }

    let server_name = ServerName::try_from(host).map_err(|e| {
        GopherError::Connection(format!("Invalid TLS server name '{}': {}", host, e))
    })?;
    let config = options
        .tls_config
        .clone()
        .unwrap_or_else(tls::default_client_config);
    let connector = TlsConnector::from(config);

    match timeout_at(deadline, connector.connect(server_name, tcp)).await {
        Ok(Ok(stream)) => Ok(Box::new(stream)),
        Ok(Err(e)) => Err(GopherError::Connection(format!(
            "TLS handshake with {}:{} failed: {}",
            host, port, e
        ))),
        Err(_) => Err(GopherError::Timeout(format!(
            "TLS handshake with {}:{} timed out",
            host, port
        ))),
    }
}

/// Write `selector` followed by CRLF.
pub async fn send_request<S>(
    stream: &mut S,
    selector: &str,
    io_timeout: Duration,
) -> Result<(), GopherError>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    let request = format!("{}\r\n", selector);
    let write = async {
        stream.write_all(request.as_bytes()).await?;
        stream.flush().await
    };

    match timeout(io_timeout, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(map_io_error(e, "Failed to send request")),
        Err(_) => Err(GopherError::Timeout("Request timed out".to_string())),
    }
}

/// The body of a response, pulled one chunk at a time until the server
/// closes the connection.
///
/// The stream is closed once: on EOF, on the first error, on [`close`], or
/// when this value is dropped. After that `next_chunk` keeps returning
/// `Ok(None)`.
///
/// [`close`]: ResponseStream::close
pub struct ResponseStream {
    stream: Option<GopherStream>,
    chunk_size: usize,
    io_timeout: Duration,
    received: u64,
}

impl ResponseStream {
    pub fn new(stream: GopherStream, chunk_size: usize, io_timeout: Duration) -> Self {
        ResponseStream {
            stream: Some(stream),
            chunk_size: chunk_size.max(1),
            io_timeout,
            received: 0,
        }
    }

    /// Next non-empty chunk of at most `chunk_size` bytes, or `None` at EOF.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, GopherError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };

        let mut buf = vec![0u8; self.chunk_size];
        let read = timeout(self.io_timeout, stream.read(&mut buf)).await;
        match read {
            Ok(Ok(0)) => {
                debug!(bytes = self.received, "Response complete");
                self.close().await;
                Ok(None)
            }
            Ok(Ok(n)) => {
                buf.truncate(n);
                self.received += n as u64;
                Ok(Some(buf))
            }
            Ok(Err(e)) => {
                self.stream = None;
                Err(map_io_error(e, "Error receiving data"))
            }
            Err(_) => {
                self.stream = None;
                Err(GopherError::Timeout("Response timed out".to_string()))
            }
        }
    }

    /// Close the connection now. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            // Best effort: the peer may already be gone.
            let _ = timeout(self.io_timeout, stream.shutdown()).await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    pub fn bytes_received(&self) -> u64 {
        self.received
    }

    /// Drain the remaining chunks into one buffer of at most `limit` bytes.
    pub async fn read_to_end(mut self, limit: u64) -> Result<Vec<u8>, GopherError> {
        let mut data = Vec::new();
        while let Some(chunk) = self.next_chunk().await? {
            if (data.len() + chunk.len()) as u64 > limit {
                self.close().await;
                return Err(GopherError::Protocol(format!(
                    "Response larger than {} bytes",
                    limit
                )));
            }
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }
}

pub fn receive_response(
    stream: GopherStream,
    chunk_size: usize,
    io_timeout: Duration,
) -> ResponseStream {
    ResponseStream::new(stream, chunk_size, io_timeout)
}

/// Connect, send `selector`, and hand back the response stream.
pub async fn request_gopher_resource(
    host: &str,
    selector: &str,
    options: &RequestOptions,
) -> Result<ResponseStream, GopherError> {
    debug!(host, port = options.port, selector, ssl = options.use_ssl, "Requesting resource");

    let mut stream = create_connection(host, options).await?;
    send_request(&mut stream, selector, options.timeout).await?;

    Ok(receive_response(stream, options.chunk_size, options.timeout))
}

/// Stream a resource into `sink`, returning the number of bytes written.
///
/// On failure the error carries the exact number of bytes the sink accepted.
pub async fn save_gopher_resource<W>(
    host: &str,
    selector: &str,
    sink: &mut W,
    options: &RequestOptions,
) -> Result<u64, SaveError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut written = 0u64;
    let mut response = request_gopher_resource(host, selector, options)
        .await
        .map_err(|source| SaveError::Transport { written, source })?;

    loop {
        let chunk = match response.next_chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(source) => return Err(SaveError::Transport { written, source }),
        };

        let mut offset = 0;
        while offset < chunk.len() {
            match sink.write(&chunk[offset..]).await {
                Ok(0) => {
                    response.close().await;
                    return Err(SaveError::Sink {
                        written,
                        source: io::Error::new(io::ErrorKind::WriteZero, "sink accepted no bytes"),
                    });
                }
                Ok(n) => {
                    offset += n;
                    written += n as u64;
                }
                Err(source) => {
                    response.close().await;
                    return Err(SaveError::Sink { written, source });
                }
            }
        }
    }

    sink.flush()
        .await
        .map_err(|source| SaveError::Sink { written, source })?;

    debug!(host, selector, bytes = written, "Saved resource");
    Ok(written)
}
