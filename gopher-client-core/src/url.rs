//! `gopher://` and `gophers://` URLs using the type-in-path convention:
//!
//! ```text
//! gopher://host[:port]/[typecode][selector][?query]
//! ```
//!
//! Selectors are kept with a leading slash so that building a URL and parsing
//! it again yields the same value.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ItemType;

pub const DEFAULT_PORT: u16 = 70;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UrlError {
    #[error("Not a gopher URL: {0}")]
    UnsupportedScheme(String),
    #[error("Missing host in URL: {0}")]
    MissingHost(String),
    #[error("Invalid port in URL: {0}")]
    InvalidPort(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GopherUrl {
    host: String,
    port: u16,
    item_type: Option<ItemType>,
    selector: String,
    use_ssl: bool,
    query: String,
}

impl GopherUrl {
    pub fn new(
        host: &str,
        port: u16,
        item_type: Option<ItemType>,
        selector: &str,
        use_ssl: bool,
        query: &str,
    ) -> Self {
        GopherUrl {
            host: host.to_string(),
            port,
            item_type,
            selector: normalize_selector(selector),
            use_ssl,
            query: query.to_string(),
        }
    }

    pub fn parse(input: &str) -> Result<Self, UrlError> {
        let (scheme, rest) = input
            .split_once("://")
            .ok_or_else(|| UrlError::UnsupportedScheme(input.to_string()))?;
        let use_ssl = if scheme.eq_ignore_ascii_case("gophers") {
            true
        } else if scheme.eq_ignore_ascii_case("gopher") {
            false
        } else {
            return Err(UrlError::UnsupportedScheme(input.to_string()));
        };

        let authority_end = rest.find(['/', '?']).unwrap_or(rest.len());
        let (authority, remainder) = rest.split_at(authority_end);
        let (host, port) = parse_authority(authority, input)?;

        // The query is taken verbatim; selectors are opaque to us.
        let (path, query) = remainder.split_once('?').unwrap_or((remainder, ""));
        let (item_type, selector) = split_type_segment(path);

        Ok(GopherUrl {
            host,
            port,
            item_type,
            selector: normalize_selector(selector),
            use_ssl,
            query: query.to_string(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn item_type(&self) -> Option<ItemType> {
        self.item_type
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    pub fn use_ssl(&self) -> bool {
        self.use_ssl
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn with_query(&self, query: &str) -> GopherUrl {
        GopherUrl {
            query: query.to_string(),
            ..self.clone()
        }
    }

    /// Resolve a link relative to this URL.
    ///
    /// Absolute targets (`/...`) replace the selector; relative ones are
    /// appended to the directory part of this selector. A complete gopher URL
    /// is returned as parsed. The item type and query are reset either way.
    pub fn join(&self, target: &str) -> GopherUrl {
        if let Ok(url) = GopherUrl::parse(target) {
            return url;
        }

        let selector = if target.starts_with('/') {
            target.to_string()
        } else {
            let dir = match self.selector.rfind('/') {
                Some(idx) => &self.selector[..idx],
                None => "",
            };
            format!("{}/{}", dir, target)
        };

        GopherUrl {
            host: self.host.clone(),
            port: self.port,
            item_type: None,
            selector: normalize_selector(&selector),
            use_ssl: self.use_ssl,
            query: String::new(),
        }
    }

    /// What goes on the wire before CRLF: the selector, plus TAB and the
    /// query for a search server.
    pub fn request_selector(&self) -> String {
        if self.item_type == Some(ItemType::SearchServer) && !self.query.is_empty() {
            format!("{}\t{}", self.selector, self.query)
        } else {
            self.selector.clone()
        }
    }

    /// Canonical cache key: scheme, host, explicit port, selector and query.
    /// The item type does not take part, the server only sees the selector.
    pub fn cache_key(&self) -> String {
        let mut key = format!(
            "{}://{}:{}{}",
            scheme(self.use_ssl),
            bracket_host(&self.host),
            self.port,
            self.selector
        );
        if !self.query.is_empty() {
            key.push('?');
            key.push_str(&self.query);
        }
        key
    }
}

impl fmt::Display for GopherUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&build_gopher_url(
            &self.host,
            self.port,
            self.item_type,
            &self.selector,
            self.use_ssl,
            &self.query,
        ))
    }
}

impl FromStr for GopherUrl {
    type Err = UrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GopherUrl::parse(s)
    }
}

pub fn parse_gopher_url(input: &str) -> Result<GopherUrl, UrlError> {
    GopherUrl::parse(input)
}

pub fn build_gopher_url(
    host: &str,
    port: u16,
    item_type: Option<ItemType>,
    selector: &str,
    use_ssl: bool,
    query: &str,
) -> String {
    let mut url = format!("{}://{}", scheme(use_ssl), bracket_host(host));
    if port != DEFAULT_PORT {
        url.push_str(&format!(":{}", port));
    }

    let selector = normalize_selector(selector);
    if let Some(itype) = item_type {
        url.push('/');
        url.push(itype.to_char());
    }
    url.push_str(&selector);

    if !query.is_empty() {
        url.push('?');
        url.push_str(query);
    }
    url
}

/// Never fails; anything that does not parse is simply not a gopher URL.
pub fn is_gopher_url(input: &str) -> bool {
    GopherUrl::parse(input).is_ok()
}

fn scheme(use_ssl: bool) -> &'static str {
    if use_ssl {
        "gophers"
    } else {
        "gopher"
    }
}

fn bracket_host(host: &str) -> String {
    if host.contains(':') {
        format!("[{}]", host)
    } else {
        host.to_string()
    }
}

fn parse_authority(authority: &str, input: &str) -> Result<(String, u16), UrlError> {
    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, after) = bracketed
            .split_once(']')
            .ok_or_else(|| UrlError::MissingHost(input.to_string()))?;
        match after.strip_prefix(':') {
            Some(port) => (host, Some(port)),
            None if after.is_empty() => (host, None),
            None => return Err(UrlError::InvalidPort(input.to_string())),
        }
    } else {
        match authority.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        }
    };

    if host.is_empty() {
        return Err(UrlError::MissingHost(input.to_string()));
    }

    let port = match port {
        None | Some("") => DEFAULT_PORT,
        Some(p) => p
            .parse::<u16>()
            .map_err(|_| UrlError::InvalidPort(input.to_string()))?,
    };

    Ok((host.to_string(), port))
}

/// Strip a leading one-character path segment when it is a known type code.
/// Anything else, including unknown single characters, stays in the selector.
fn split_type_segment(path: &str) -> (Option<ItemType>, &str) {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let segment = trimmed.split('/').next().unwrap_or("");

    let mut chars = segment.chars();
    if let (Some(code), None) = (chars.next(), chars.next()) {
        if let Some(itype) = ItemType::from_code(code) {
            return (Some(itype), &trimmed[code.len_utf8()..]);
        }
    }
    (None, path)
}

fn normalize_selector(selector: &str) -> String {
    if selector.is_empty() || selector == "/" {
        String::new()
    } else if selector.starts_with('/') {
        selector.to_string()
    } else {
        format!("/{}", selector)
    }
}
