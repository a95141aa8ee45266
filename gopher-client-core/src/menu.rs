use std::borrow::Cow;

use tracing::trace;

use crate::types::{GopherItem, ItemType};

/// UTF-8 when the bytes are valid UTF-8, Latin-1 otherwise. Never fails.
pub fn decode_text(data: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(data) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => Cow::Owned(data.iter().map(|&b| b as char).collect()),
    }
}

/// Decoded document text with a trailing lone `.` terminator line removed.
pub fn document_text(data: &[u8]) -> String {
    let text = decode_text(data);
    let trimmed = text.trim_end_matches(['\r', '\n']);
    if trimmed == "." {
        return String::new();
    }
    match trimmed.strip_suffix('.') {
        Some(body) if body.ends_with('\n') => body.to_string(),
        _ => text.into_owned(),
    }
}

pub fn parse_menu(data: &[u8]) -> Vec<GopherItem> {
    parse_menu_under(data, "")
}

/// Parse a directory listing whose items were found under `parent`.
///
/// Stops at a line that is exactly `.`. Lines that don't look like menu
/// entries are dropped, never reported: real servers mix in separators and
/// bare text.
pub fn parse_menu_under(data: &[u8], parent: &str) -> Vec<GopherItem> {
    let text = decode_text(data);
    let mut items = Vec::new();

    for line in text.lines() {
        if line == "." {
            break;
        }
        if let Some(item) = parse_line(line, parent) {
            items.push(item);
        }
    }

    items
}

fn parse_line(line: &str, parent: &str) -> Option<GopherItem> {
    if line.is_empty() || !line.contains('\t') {
        return None;
    }

    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 4 {
        trace!(line, "Skipping menu line with too few fields");
        return None;
    }

    let mut head = fields[0].chars();
    let code = head.next()?;
    let port = match fields[3].trim().parse::<u16>() {
        Ok(port) => port,
        Err(_) => {
            trace!(line, "Skipping menu line with bad port");
            return None;
        }
    };

    Some(GopherItem {
        item_type: ItemType::from(code),
        display: head.as_str().to_string(),
        selector: fields[1].to_string(),
        host: fields[2].to_string(),
        port,
        parent: parent.to_string(),
    })
}
