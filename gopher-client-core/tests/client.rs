use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gopher_client_core::{
    ClientError, GopherClient, GopherError, GopherUrl, ItemType, RequestOptions, Resource,
    ResponseCache,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

const MENU: &[u8] = b"iWelcome\tfake\t(NULL)\t0\r\n\
0About\t/dir/about.txt\t127.0.0.1\t70\r\n\
1Sub\t/dir/sub\t127.0.0.1\t70\r\n\
.\r\n";

/// A tiny Gopher server answering from a selector table. Unknown selectors
/// get an error item, like most real servers send.
struct TestServer {
    port: u16,
    connections: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
    async fn start(routes: &[(&str, &'static [u8])]) -> TestServer {
        let routes: HashMap<String, &'static [u8]> =
            routes.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        let routes = Arc::new(routes);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connections = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let conn_count = connections.clone();
        let seen = requests.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                conn_count.fetch_add(1, Ordering::SeqCst);
                let routes = routes.clone();
                let seen = seen.clone();
                tokio::spawn(async move {
                    let (read, mut write) = socket.into_split();
                    let mut line = String::new();
                    if BufReader::new(read).read_line(&mut line).await.is_err() {
                        return;
                    }
                    let selector = line.trim_end_matches(['\r', '\n']).to_string();
                    seen.lock().unwrap().push(selector.clone());
                    let body: &[u8] = routes
                        .get(&selector)
                        .copied()
                        .unwrap_or(b"3Not found\t\terror.host\t1\r\n.\r\n");
                    let _ = write.write_all(body).await;
                    let _ = write.shutdown().await;
                });
            }
        });

        TestServer {
            port,
            connections,
            requests,
        }
    }

    fn url(&self, path: &str) -> GopherUrl {
        GopherUrl::parse(&format!("gopher://127.0.0.1:{}{}", self.port, path)).unwrap()
    }

    fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

fn options() -> RequestOptions {
    RequestOptions {
        timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

fn cached_client(dir: &std::path::Path) -> GopherClient {
    let cache = ResponseCache::open(dir, 1024 * 1024, Duration::from_secs(3600)).unwrap();
    GopherClient::new(options(), Some(cache))
}

#[tokio::test]
async fn directory_comes_back_as_menu() {
    let server = TestServer::start(&[("/dir", MENU)]).await;
    let client = GopherClient::new(options(), None);

    let resource = client.get_resource(&server.url("/1/dir")).await.unwrap();
    let items = resource.menu().unwrap();

    assert_eq!(items.len(), 3);
    assert!(items[0].is_info());
    assert_eq!(items[1].item_type, ItemType::TextFile);
    assert_eq!(items[1].selector, "/dir/about.txt");
    assert_eq!(items[2].item_type, ItemType::Directory);
    assert!(items.iter().all(|i| i.parent == "/dir"));
    assert_eq!(server.requests(), vec!["/dir"]);
}

#[tokio::test]
async fn untyped_root_is_a_menu() {
    let server = TestServer::start(&[("", MENU)]).await;
    let client = GopherClient::new(options(), None);

    let resource = client
        .get_url(&format!("gopher://127.0.0.1:{}", server.port))
        .await
        .unwrap();
    assert_eq!(resource.menu().map(|m| m.len()), Some(3));
}

#[tokio::test]
async fn text_comes_back_as_raw_bytes() {
    let server = TestServer::start(&[("/notes.txt", b"hello\r\nworld\r\n.\r\n")]).await;
    let client = GopherClient::new(options(), None);

    let resource = client.get_resource(&server.url("/0/notes.txt")).await.unwrap();
    assert_eq!(resource, Resource::Document(b"hello\r\nworld\r\n.\r\n".to_vec()));

    let text = client.get_text(&server.url("/0/notes.txt")).await.unwrap();
    assert_eq!(text, "hello\r\nworld\r\n");
}

#[tokio::test]
async fn second_fetch_is_served_from_cache() {
    let server = TestServer::start(&[("/dir", MENU)]).await;
    let dir = tempfile::tempdir().unwrap();
    let client = cached_client(dir.path());
    let url = server.url("/1/dir");

    let first = client.get_resource(&url).await.unwrap();
    let second = client.get_resource(&url).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(server.connections(), 1);
    assert_eq!(client.cache().unwrap().len(), 1);
}

#[tokio::test]
async fn without_cache_every_fetch_connects() {
    let server = TestServer::start(&[("/dir", MENU)]).await;
    let client = GopherClient::new(options(), None);
    let url = server.url("/1/dir");

    client.get_resource(&url).await.unwrap();
    client.get_resource(&url).await.unwrap();

    assert_eq!(server.connections(), 2);
}

#[tokio::test]
async fn interactive_items_never_connect() {
    let server = TestServer::start(&[]).await;
    let client = GopherClient::new(options(), None);

    let err = client.get_resource(&server.url("/8/session")).await.unwrap_err();
    assert!(matches!(err, ClientError::NeedsInput(ItemType::Telnet)));

    let err = client.get_resource(&server.url("/7/search")).await.unwrap_err();
    assert!(matches!(err, ClientError::NeedsInput(ItemType::SearchServer)));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.connections(), 0);
}

#[tokio::test]
async fn search_sends_query_after_tab() {
    let results: &[u8] = b"0Hit\t/hits/1\t127.0.0.1\t70\r\n.\r\n";
    let server = TestServer::start(&[("/find\trust gopher", results)]).await;
    let client = GopherClient::new(options(), None);

    let items = client
        .search(&server.url("/7/find"), "rust gopher")
        .await
        .unwrap();

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].display, "Hit");
    assert_eq!(server.requests(), vec!["/find\trust gopher"]);

    // A query in the URL itself works the same way.
    let via_url = client
        .get_resource(&server.url("/7/find?rust gopher"))
        .await
        .unwrap();
    assert_eq!(via_url.menu().map(|m| m.len()), Some(1));
}

#[tokio::test]
async fn search_without_query_needs_input() {
    let server = TestServer::start(&[]).await;
    let client = GopherClient::new(options(), None);

    let err = client.search(&server.url("/7/find"), "").await.unwrap_err();
    assert!(matches!(err, ClientError::NeedsInput(ItemType::SearchServer)));
}

#[tokio::test]
async fn refused_connection_is_a_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let client = GopherClient::new(options(), None);
    let err = client
        .get_url(&format!("gopher://127.0.0.1:{}/1/", port))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Gopher(GopherError::Connection(_))));
}

#[tokio::test]
async fn broken_cache_does_not_fail_the_fetch() {
    let server = TestServer::start(&[("/dir", MENU)]).await;
    let dir = tempfile::tempdir().unwrap();
    let cache_dir = dir.path().join("cache");
    let client = cached_client(&cache_dir);
    std::fs::remove_dir_all(&cache_dir).unwrap();

    let resource = client.get_resource(&server.url("/1/dir")).await.unwrap();
    assert_eq!(resource.menu().map(|m| m.len()), Some(3));
    assert!(client.cache().unwrap().is_empty());
}

#[tokio::test]
async fn save_streams_into_sink_and_skips_cache() {
    let body: &[u8] = b"\x00\x01binary\xffpayload";
    let server = TestServer::start(&[("/blob.bin", body)]).await;
    let dir = tempfile::tempdir().unwrap();
    let client = cached_client(dir.path());

    let mut sink = Vec::new();
    let written = client
        .save_resource(&server.url("/9/blob.bin"), &mut sink)
        .await
        .unwrap();

    assert_eq!(written, body.len() as u64);
    assert_eq!(sink, body);
    assert!(client.cache().unwrap().is_empty());
}

#[tokio::test]
async fn save_to_file() {
    let body: &[u8] = b"GIF89a not really";
    let server = TestServer::start(&[("/pic.gif", body)]).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pic.gif");
    let client = GopherClient::new(options(), None);

    let mut file = tokio::fs::File::create(&path).await.unwrap();
    client
        .save_resource(&server.url("/g/pic.gif"), &mut file)
        .await
        .unwrap();
    drop(file);

    assert_eq!(std::fs::read(&path).unwrap(), body);
}

#[tokio::test]
async fn cached_menu_survives_reopen() {
    let server = TestServer::start(&[("/dir", MENU)]).await;
    let dir = tempfile::tempdir().unwrap();
    let url = server.url("/1/dir");

    {
        let client = cached_client(dir.path());
        client.get_resource(&url).await.unwrap();
    }

    let client = cached_client(dir.path());
    let resource = client.get_resource(&url).await.unwrap();
    assert_eq!(resource.menu().map(|m| m.len()), Some(3));
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn per_call_bypass_skips_cache_both_ways() {
    let server = TestServer::start(&[("/dir", MENU)]).await;
    let dir = tempfile::tempdir().unwrap();
    let client = cached_client(dir.path());
    let url = server.url("/1/dir");

    client.get_resource_with(&url, false).await.unwrap();
    assert!(client.cache().unwrap().is_empty());

    client.get_resource(&url).await.unwrap();
    client.get_resource_with(&url, false).await.unwrap();
    assert_eq!(server.connections(), 3);

    client.get_resource(&url).await.unwrap();
    assert_eq!(server.connections(), 3);
}
