use thiserror::Error;
use tokio::io::AsyncWrite;
use tracing::{debug, warn};

use crate::cache::ResponseCache;
use crate::config::{ConfigError, GopherConfig};
use crate::menu::{document_text, parse_menu_under};
use crate::protocol::{
    request_gopher_resource, save_gopher_resource, GopherError, RequestOptions, SaveError,
    DEFAULT_CHUNK_SIZE,
};
use crate::tls;
use crate::types::{GopherItem, ItemType};
use crate::url::{GopherUrl, UrlError};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Url(#[from] UrlError),
    #[error(transparent)]
    Gopher(#[from] GopherError),
    #[error(transparent)]
    Save(#[from] SaveError),
    /// The item opens a session or needs a query; nothing was sent.
    #[error("{} items need user input and are not fetched directly", .0.name())]
    NeedsInput(ItemType),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Menu(Vec<GopherItem>),
    Document(Vec<u8>),
}

impl Resource {
    pub fn menu(&self) -> Option<&[GopherItem]> {
        match self {
            Resource::Menu(items) => Some(items),
            Resource::Document(_) => None,
        }
    }

    pub fn document(&self) -> Option<&[u8]> {
        match self {
            Resource::Document(data) => Some(data),
            Resource::Menu(_) => None,
        }
    }
}

/// Fetches resources through the cache (when there is one), the transport
/// and the menu parser.
pub struct GopherClient {
    options: RequestOptions,
    cache: Option<ResponseCache>,
}

impl GopherClient {
    pub fn new(options: RequestOptions, cache: Option<ResponseCache>) -> Self {
        GopherClient { options, cache }
    }

    /// Build a client from validated settings. A cache directory that can't
    /// be opened leaves the client running uncached.
    pub fn from_config(config: &GopherConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let tls_config = match config.gopher.tls_ca_path() {
            Some(path) => Some(tls::make_client_config(Some(path.as_path())).map_err(|e| {
                ConfigError::Invalid {
                    field: "gopher.tls_ca_file",
                    reason: e.to_string(),
                }
            })?),
            None => None,
        };

        let options = RequestOptions {
            use_ssl: config.gopher.use_ssl,
            timeout: config.gopher.timeout(),
            use_ipv6: config.gopher.use_ipv6,
            chunk_size: DEFAULT_CHUNK_SIZE,
            tls_config,
            ..Default::default()
        };

        let cache = if config.cache.enabled {
            let dir = config.cache.directory();
            match ResponseCache::open(
                &dir,
                config.cache.max_size_bytes(),
                config.cache.expiration(),
            ) {
                Ok(cache) => Some(cache),
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Cache unavailable, continuing without it");
                    None
                }
            }
        } else {
            None
        };

        Ok(GopherClient::new(options, cache))
    }

    pub fn cache(&self) -> Option<&ResponseCache> {
        self.cache.as_ref()
    }

    pub async fn get_url(&self, url: &str) -> Result<Resource, ClientError> {
        let url = GopherUrl::parse(url)?;
        self.get_resource(&url).await
    }

    /// Directories (and URLs with no type) come back as parsed menus, a search
    /// server with a query as its result menu, everything else as raw bytes.
    pub async fn get_resource(&self, url: &GopherUrl) -> Result<Resource, ClientError> {
        self.get_resource_with(url, true).await
    }

    /// Like [`get_resource`](Self::get_resource); with `use_cache` false the
    /// cache is neither read nor written for this call.
    pub async fn get_resource_with(
        &self,
        url: &GopherUrl,
        use_cache: bool,
    ) -> Result<Resource, ClientError> {
        check_passive(url)?;
        let url = &self.effective_url(url);
        let cache = self.cache.as_ref().filter(|_| use_cache);

        let as_menu = matches!(
            url.item_type(),
            None | Some(ItemType::Directory) | Some(ItemType::SearchServer)
        );

        if let Some(entry) = cache.and_then(|c| c.get(url)) {
            debug!(url = %url, "Cache hit");
            return Ok(shape(url, as_menu, entry.payload));
        }

        let payload = self.fetch(url).await?;
        let menu = as_menu.then(|| parse_menu_under(&payload, url.selector()));

        // The raw response is what gets cached; menus are re-parsed on a hit.
        if let Some(cache) = cache {
            commit(cache, url, &payload);
        }

        Ok(match menu {
            Some(items) => Resource::Menu(items),
            None => Resource::Document(payload),
        })
    }

    /// Run a query against a search server and return its result menu.
    pub async fn search(&self, url: &GopherUrl, query: &str) -> Result<Vec<GopherItem>, ClientError> {
        let url = GopherUrl::new(
            url.host(),
            url.port(),
            Some(ItemType::SearchServer),
            url.selector(),
            url.use_ssl(),
            query,
        );
        match self.get_resource(&url).await? {
            Resource::Menu(items) => Ok(items),
            Resource::Document(_) => Ok(Vec::new()),
        }
    }

    /// Document text, decoded, without the trailing `.` line.
    pub async fn get_text(&self, url: &GopherUrl) -> Result<String, ClientError> {
        check_passive(url)?;
        let url = &self.effective_url(url);
        if let Some(entry) = self.cache.as_ref().and_then(|c| c.get(url)) {
            return Ok(document_text(&entry.payload));
        }
        let payload = self.fetch(url).await?;
        let text = document_text(&payload);
        if let Some(cache) = &self.cache {
            commit(cache, url, &payload);
        }
        Ok(text)
    }

    /// Stream a resource into `sink` without touching the cache.
    pub async fn save_resource<W>(&self, url: &GopherUrl, sink: &mut W) -> Result<u64, ClientError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        check_passive(url)?;
        let url = &self.effective_url(url);
        let options = self.options_for(url);
        let written =
            save_gopher_resource(url.host(), &url.request_selector(), sink, &options).await?;
        Ok(written)
    }

    /// `url` as it will actually be fetched: forced TLS turns `gopher://`
    /// into `gophers://`, so the cache key names the scheme in use.
    fn effective_url(&self, url: &GopherUrl) -> GopherUrl {
        if self.options.use_ssl && !url.use_ssl() {
            GopherUrl::new(
                url.host(),
                url.port(),
                url.item_type(),
                url.selector(),
                true,
                url.query(),
            )
        } else {
            url.clone()
        }
    }

    fn options_for(&self, url: &GopherUrl) -> RequestOptions {
        RequestOptions {
            port: url.port(),
            use_ssl: url.use_ssl() || self.options.use_ssl,
            ..self.options.clone()
        }
    }

    async fn fetch(&self, url: &GopherUrl) -> Result<Vec<u8>, GopherError> {
        let options = self.options_for(url);
        let response = request_gopher_resource(url.host(), &url.request_selector(), &options).await?;
        response.read_to_end(options.max_response_size).await
    }
}

/// Cache writes run on the calling task; a failure only costs the next hit.
fn commit(cache: &ResponseCache, url: &GopherUrl, payload: &[u8]) {
    if let Err(e) = cache.put(url, payload) {
        warn!(url = %url, error = %e, "Failed to cache response");
    }
}

fn shape(url: &GopherUrl, as_menu: bool, payload: Vec<u8>) -> Resource {
    if as_menu {
        Resource::Menu(parse_menu_under(&payload, url.selector()))
    } else {
        Resource::Document(payload)
    }
}

fn check_passive(url: &GopherUrl) -> Result<(), ClientError> {
    match url.item_type() {
        Some(ItemType::SearchServer) if !url.query().is_empty() => Ok(()),
        Some(itype) if itype.is_interactive() => Err(ClientError::NeedsInput(itype)),
        _ => Ok(()),
    }
}
