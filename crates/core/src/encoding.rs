//! File encodings.
//!
//! Items carry a code-page number the way the server records them. Text
//! conversion goes through `encoding_rs`, except UTF-16 output which
//! `encoding_rs` does not produce.

use std::fmt;
use std::str::FromStr;

use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8, WINDOWS_1252};
use serde::{Deserialize, Serialize};

use crate::errors::EncodingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileEncoding(i32);

impl FileEncoding {
    pub const BINARY: Self = Self(-1);
    pub const UTF8: Self = Self(65001);
    pub const UTF16LE: Self = Self(1200);
    pub const UTF16BE: Self = Self(1201);
    pub const WINDOWS_1252: Self = Self(1252);
    pub const ISO_8859_1: Self = Self(28591);
    pub const ASCII: Self = Self(20127);

    const KNOWN: &'static [(FileEncoding, &'static str)] = &[
        (Self::BINARY, "binary"),
        (Self::UTF8, "utf-8"),
        (Self::UTF16LE, "utf-16le"),
        (Self::UTF16BE, "utf-16be"),
        (Self::WINDOWS_1252, "windows-1252"),
        (Self::ISO_8859_1, "iso-8859-1"),
        (Self::ASCII, "us-ascii"),
    ];

    pub const fn from_code_page(code_page: i32) -> Self {
        Self(code_page)
    }

    pub const fn code_page(self) -> i32 {
        self.0
    }

    pub fn is_binary(self) -> bool {
        self == Self::BINARY
    }

    pub fn name(self) -> String {
        Self::KNOWN
            .iter()
            .find(|(e, _)| *e == self)
            .map(|(_, n)| n.to_string())
            .unwrap_or_else(|| format!("cp{}", self.0))
    }

    /// Guess an encoding from content: a byte-order mark wins, NUL bytes
    /// mean binary, valid UTF-8 means UTF-8, anything else is Windows-1252.
    pub fn detect(bytes: &[u8]) -> Self {
        if let Some((encoding, _)) = Encoding::for_bom(bytes) {
            return match encoding.name() {
                "UTF-16LE" => Self::UTF16LE,
                "UTF-16BE" => Self::UTF16BE,
                _ => Self::UTF8,
            };
        }
        if bytes.contains(&0) {
            return Self::BINARY;
        }
        if std::str::from_utf8(bytes).is_ok() {
            Self::UTF8
        } else {
            Self::WINDOWS_1252
        }
    }

    fn text_encoding(self) -> Result<&'static Encoding, EncodingError> {
        match self {
            Self::BINARY => Err(EncodingError::Binary),
            Self::UTF8 | Self::ASCII => Ok(UTF_8),
            Self::UTF16LE => Ok(UTF_16LE),
            Self::UTF16BE => Ok(UTF_16BE),
            // encoding_rs folds Latin-1 into its Windows-1252 superset.
            Self::WINDOWS_1252 | Self::ISO_8859_1 => Ok(WINDOWS_1252),
            other => Err(EncodingError::Unknown(other.name())),
        }
    }

    /// Decode content to text. A leading byte-order mark is stripped.
    pub fn decode(self, bytes: &[u8]) -> Result<String, EncodingError> {
        let encoding = self.text_encoding()?;
        let (text, had_errors) = encoding.decode_with_bom_removal(bytes);
        if had_errors {
            return Err(EncodingError::Malformed(self.name()));
        }
        if self == Self::ASCII && !text.is_ascii() {
            return Err(EncodingError::Malformed(self.name()));
        }
        Ok(text.into_owned())
    }

    /// Encode text in this encoding.
    pub fn encode(self, text: &str) -> Result<Vec<u8>, EncodingError> {
        match self {
            Self::UTF16LE => Ok(text.encode_utf16().flat_map(u16::to_le_bytes).collect()),
            Self::UTF16BE => Ok(text.encode_utf16().flat_map(u16::to_be_bytes).collect()),
            Self::ASCII if !text.is_ascii() => Err(EncodingError::Unmappable(self.name())),
            _ => {
                let encoding = self.text_encoding()?;
                let (bytes, _, had_errors) = encoding.encode(text);
                if had_errors {
                    return Err(EncodingError::Unmappable(self.name()));
                }
                Ok(bytes.into_owned())
            }
        }
    }
}

impl Default for FileEncoding {
    fn default() -> Self {
        Self::UTF8
    }
}

impl fmt::Display for FileEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for FileEncoding {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(code_page) = s.parse::<i32>() {
            return Ok(Self(code_page));
        }
        let lower = s.to_ascii_lowercase();
        let found = match lower.as_str() {
            "utf8" | "utf-8" => Some(Self::UTF8),
            "unicode" | "utf16" | "utf-16" | "utf-16le" => Some(Self::UTF16LE),
            "bigendianunicode" | "utf-16be" => Some(Self::UTF16BE),
            "ascii" | "us-ascii" => Some(Self::ASCII),
            "latin1" | "latin-1" => Some(Self::ISO_8859_1),
            _ => Self::KNOWN
                .iter()
                .find(|(_, name)| *name == lower)
                .map(|(e, _)| *e),
        };
        found.ok_or_else(|| EncodingError::Unknown(s.to_string()))
    }
}
