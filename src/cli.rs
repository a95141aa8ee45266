use std::io::{self, IsTerminal, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};

use gopher_client_core::menu::document_text;
use gopher_client_core::{is_gopher_url, GopherClient, GopherItem, GopherUrl, ItemType, Resource};

/// Determine whether output should be JSON.
/// JSON is used when: --json flag is set, OR stdout is not a terminal (piped).
pub fn use_json(flag: bool) -> bool {
    flag || !io::stdout().is_terminal()
}

fn type_indicator(item_type: ItemType) -> &'static str {
    match item_type {
        ItemType::Directory => "[+]",
        ItemType::TextFile => "[T]",
        ItemType::SearchServer => "[?]",
        ItemType::Html => "[H]",
        ItemType::Error => "[!]",
        ItemType::Telnet | ItemType::Tn3270Session => "[>]",
        ItemType::GifImage | ItemType::ImageFile => "[I]",
        ItemType::Information => "   ",
        _ => "[.]",
    }
}

fn item_json(item: &GopherItem, use_ssl: bool) -> Value {
    json!({
        "type": item.item_type.to_char().to_string(),
        "kind": item.item_type.name(),
        "display": item.display,
        "selector": item.selector,
        "host": item.host,
        "port": item.port,
        "url": item.to_url(use_ssl).map(|u| u.to_string()),
    })
}

fn print_items(items: &[GopherItem], use_ssl: bool, json: bool) -> Result<()> {
    if json {
        let items: Vec<Value> = items.iter().map(|i| item_json(i, use_ssl)).collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        for item in items {
            if item.is_info() {
                println!("      {}", item.display);
            } else {
                let target = item
                    .to_url(use_ssl)
                    .map(|u| u.to_string())
                    .unwrap_or_default();
                println!(
                    "{} {:<40} {}",
                    type_indicator(item.item_type),
                    item.display,
                    target
                );
            }
        }
    }
    Ok(())
}

/// Print a structured error and exit with code 1.
pub fn handle_error(err: anyhow::Error, json: bool) -> ! {
    if json {
        let msg = format!("{:#}", err);
        eprintln!("{}", json!({ "error": msg }));
    } else {
        eprintln!("error: {:#}", err);
    }
    std::process::exit(1);
}

fn parse_url(url: &str) -> Result<GopherUrl> {
    GopherUrl::parse(url).with_context(|| format!("Invalid gopher URL: {}", url))
}

pub async fn fetch(client: &GopherClient, url: &str, json: bool) -> Result<()> {
    let url = parse_url(url)?;
    match client.get_resource(&url).await? {
        Resource::Menu(items) => print_items(&items, url.use_ssl(), json),
        Resource::Document(data) => print_document(&url, &data, json),
    }
}

fn print_document(url: &GopherUrl, data: &[u8], json: bool) -> Result<()> {
    let textual = url.item_type().map_or(true, |t| t.is_text() || !t.is_known());

    if json {
        let mut out = json!({ "url": url.to_string(), "size": data.len() });
        if textual {
            out["content"] = Value::String(document_text(data));
        }
        println!("{}", out);
        return Ok(());
    }

    if textual {
        let text = document_text(data);
        print!("{}", text);
        // Ensure trailing newline for clean shell output
        if !text.ends_with('\n') {
            println!();
        }
    } else {
        let mut stdout = io::stdout().lock();
        stdout.write_all(data)?;
        stdout.flush()?;
    }
    Ok(())
}

pub async fn search(client: &GopherClient, url: &str, query: &str, json: bool) -> Result<()> {
    let url = parse_url(url)?;
    if query.is_empty() {
        bail!("A search query is required");
    }
    let items = client.search(&url, query).await?;
    print_items(&items, url.use_ssl(), json)
}

pub async fn save(client: &GopherClient, url: &str, path: &Path, json: bool) -> Result<()> {
    let url = parse_url(url)?;
    let mut file = tokio::fs::File::create(path)
        .await
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let written = client.save_resource(&url, &mut file).await?;

    if json {
        println!(
            "{}",
            json!({ "ok": true, "url": url.to_string(), "path": path.display().to_string(), "bytes": written })
        );
    } else {
        println!("Saved {} bytes to {}", written, path.display());
    }
    Ok(())
}

/// Report whether `url` is a gopher URL. Returns false so the caller can exit
/// non-zero.
pub fn check(url: &str, json: bool) -> bool {
    let valid = is_gopher_url(url);
    if json {
        let mut out = json!({ "url": url, "valid": valid });
        if let Ok(parsed) = GopherUrl::parse(url) {
            out["host"] = json!(parsed.host());
            out["port"] = json!(parsed.port());
            out["selector"] = json!(parsed.selector());
            out["type"] = json!(parsed.item_type().map(|t| t.name()));
            out["ssl"] = json!(parsed.use_ssl());
        }
        println!("{}", out);
    } else if valid {
        println!("{} is a gopher URL", url);
    } else {
        println!("{} is not a gopher URL", url);
    }
    valid
}

pub fn cache_clear(client: &GopherClient, json: bool) -> Result<()> {
    let Some(cache) = client.cache() else {
        bail!("Cache is disabled");
    };
    let entries = cache.len();
    cache.clear()?;
    if json {
        println!("{}", json!({ "ok": true, "cleared": entries }));
    } else {
        println!("Cleared {} cached entries", entries);
    }
    Ok(())
}

pub fn cache_stats(client: &GopherClient, json: bool) -> Result<()> {
    let Some(cache) = client.cache() else {
        bail!("Cache is disabled");
    };
    let purged = cache.purge_expired();
    if json {
        println!(
            "{}",
            json!({
                "directory": cache.dir().display().to_string(),
                "entries": cache.len(),
                "bytes": cache.total_size(),
                "max_bytes": cache.max_size(),
                "expiration_secs": cache.expiration().as_secs(),
                "purged": purged,
            })
        );
    } else {
        println!("Directory:  {}", cache.dir().display());
        println!("Entries:    {}", cache.len());
        println!("Size:       {} / {} bytes", cache.total_size(), cache.max_size());
        println!("Expiration: {}h", cache.expiration().as_secs() / 3600);
        if purged > 0 {
            println!("Purged {} expired entries", purged);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indicators() {
        assert_eq!(type_indicator(ItemType::Directory), "[+]");
        assert_eq!(type_indicator(ItemType::Information), "   ");
        assert_eq!(type_indicator(ItemType::Unknown('X')), "[.]");
    }

    #[test]
    fn item_json_carries_link() {
        let item = GopherItem {
            item_type: ItemType::TextFile,
            display: "About".to_string(),
            selector: "/about.txt".to_string(),
            host: "example.com".to_string(),
            port: 70,
            parent: String::new(),
        };
        let value = item_json(&item, false);
        assert_eq!(value["type"], "0");
        assert_eq!(value["url"], "gopher://example.com/0/about.txt");

        let info = GopherItem {
            item_type: ItemType::Information,
            ..item
        };
        assert!(item_json(&info, false)["url"].is_null());
    }
}
