pub mod cache;
pub mod client;
pub mod config;
pub mod menu;
pub mod protocol;
pub mod tls;
pub mod types;
pub mod url;

pub use cache::{CacheEntry, CacheError, ResponseCache};
pub use client::{ClientError, GopherClient, Resource};
pub use config::{ConfigError, GopherConfig};
pub use menu::{document_text, parse_menu, parse_menu_under};
pub use protocol::{
    create_connection, receive_response, request_gopher_resource, save_gopher_resource,
    send_request, GopherError, RequestOptions, ResponseStream, SaveError,
};
pub use types::{GopherItem, ItemType};
pub use url::{build_gopher_url, is_gopher_url, parse_gopher_url, GopherUrl, UrlError};
