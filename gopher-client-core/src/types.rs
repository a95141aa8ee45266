use serde::{Deserialize, Serialize};

use crate::url::GopherUrl;

/// Item type codes as used on the wire (RFC 1436 plus the common extensions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemType {
    TextFile,
    Directory,
    CsoPhoneBook,
    Error,
    BinHex,
    DosBinary,
    Uuencoded,
    SearchServer,
    Telnet,
    BinaryFile,
    RedundantServer,
    Tn3270Session,
    GifImage,
    ImageFile,
    SoundFile,
    Html,
    Information,
    Document,
    Pdf,
    Calendar,
    /// A code this client has no entry for. Servers in the wild use plenty.
    Unknown(char),
}

const KNOWN_CODES: &[(char, ItemType)] = &[
    ('0', ItemType::TextFile),
    ('1', ItemType::Directory),
    ('2', ItemType::CsoPhoneBook),
    ('3', ItemType::Error),
    ('4', ItemType::BinHex),
    ('5', ItemType::DosBinary),
    ('6', ItemType::Uuencoded),
    ('7', ItemType::SearchServer),
    ('8', ItemType::Telnet),
    ('9', ItemType::BinaryFile),
    ('+', ItemType::RedundantServer),
    ('T', ItemType::Tn3270Session),
    ('g', ItemType::GifImage),
    ('I', ItemType::ImageFile),
    ('s', ItemType::SoundFile),
    ('h', ItemType::Html),
    ('i', ItemType::Information),
    ('d', ItemType::Document),
    ('P', ItemType::Pdf),
    ('c', ItemType::Calendar),
];

impl From<char> for ItemType {
    fn from(c: char) -> Self {
        ItemType::from_code(c).unwrap_or(ItemType::Unknown(c))
    }
}

impl ItemType {
    /// Look up a code in the registry; `None` for codes with no entry.
    pub fn from_code(c: char) -> Option<ItemType> {
        KNOWN_CODES
            .iter()
            .find(|(code, _)| *code == c)
            .map(|(_, itype)| *itype)
    }

    pub fn to_char(&self) -> char {
        match self {
            ItemType::Unknown(c) => *c,
            known => KNOWN_CODES
                .iter()
                .find(|(_, itype)| itype == known)
                .map(|(code, _)| *code)
                .unwrap_or('?'),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, ItemType::Unknown(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ItemType::TextFile => "Text File",
            ItemType::Directory => "Directory",
            ItemType::CsoPhoneBook => "CSO Phone Book",
            ItemType::Error => "Error",
            ItemType::BinHex => "BinHex File",
            ItemType::DosBinary => "DOS Binary",
            ItemType::Uuencoded => "UUEncoded File",
            ItemType::SearchServer => "Search Server",
            ItemType::Telnet => "Telnet Session",
            ItemType::BinaryFile => "Binary File",
            ItemType::RedundantServer => "Redundant Server",
            ItemType::Tn3270Session => "TN3270 Session",
            ItemType::GifImage => "GIF Image",
            ItemType::ImageFile => "Image File",
            ItemType::SoundFile => "Sound File",
            ItemType::Html => "HTML File",
            ItemType::Information => "Information",
            ItemType::Document => "Document",
            ItemType::Pdf => "PDF Document",
            ItemType::Calendar => "Calendar",
            ItemType::Unknown(_) => "Unknown",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            ItemType::TextFile
            | ItemType::Directory
            | ItemType::Error
            | ItemType::Information
            | ItemType::Document => "text/plain",
            ItemType::Html => "text/html",
            ItemType::BinHex => "application/mac-binhex40",
            ItemType::Uuencoded => "text/x-uuencode",
            ItemType::GifImage => "image/gif",
            ItemType::ImageFile => "image/unknown",
            ItemType::SoundFile => "audio/unknown",
            ItemType::Pdf => "application/pdf",
            ItemType::Calendar => "text/calendar",
            _ => "application/octet-stream",
        }
    }

    /// Default file extension (with dot) for saving an item of this type.
    pub fn extension(&self) -> &'static str {
        match self {
            ItemType::TextFile | ItemType::Directory | ItemType::Error | ItemType::Information => {
                ".txt"
            }
            ItemType::Html => ".html",
            ItemType::BinHex => ".hqx",
            ItemType::Uuencoded => ".uue",
            ItemType::GifImage => ".gif",
            ItemType::ImageFile => ".img",
            ItemType::SoundFile => ".snd",
            ItemType::Pdf => ".pdf",
            ItemType::Document => ".doc",
            ItemType::Calendar => ".ics",
            _ => ".bin",
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(
            self,
            ItemType::TextFile | ItemType::Directory | ItemType::Error | ItemType::Information
        )
    }

    pub fn is_binary(&self) -> bool {
        matches!(
            self,
            ItemType::BinHex
                | ItemType::DosBinary
                | ItemType::Uuencoded
                | ItemType::BinaryFile
                | ItemType::GifImage
                | ItemType::ImageFile
                | ItemType::SoundFile
                | ItemType::Pdf
        )
    }

    /// Types that open a session or need user input. These are never fetched
    /// as passive content.
    pub fn is_interactive(&self) -> bool {
        matches!(
            self,
            ItemType::CsoPhoneBook
                | ItemType::SearchServer
                | ItemType::Telnet
                | ItemType::Tn3270Session
        )
    }
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GopherItem {
    pub item_type: ItemType,
    pub display: String,
    pub selector: String,
    pub host: String,
    pub port: u16,
    /// Selector of the listing this item was read from.
    pub parent: String,
}

impl GopherItem {
    pub fn is_info(&self) -> bool {
        self.item_type == ItemType::Information
    }

    pub fn to_menu_line(&self) -> String {
        format!(
            "{}{}\t{}\t{}\t{}",
            self.item_type.to_char(),
            self.display,
            self.selector,
            self.host,
            self.port
        )
    }

    /// The URL this item links to. Information lines link nowhere.
    pub fn to_url(&self, use_ssl: bool) -> Option<GopherUrl> {
        if self.is_info() || self.host.is_empty() {
            return None;
        }
        Some(GopherUrl::new(
            &self.host,
            self.port,
            Some(self.item_type),
            &self.selector,
            use_ssl,
            "",
        ))
    }
}
