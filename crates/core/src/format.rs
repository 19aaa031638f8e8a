//! Artifact formats.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Output format of a generated artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Free-form text paragraphs.
    Txt,
    /// Comma-separated records with a header row.
    Csv,
    /// JSON array of records.
    Json,
    /// XML document of records.
    Xml,
    /// PNG image of random noise.
    Png,
    /// GIF image of random noise.
    Gif,
    /// Gzip-compressed text archive.
    Gz,
}

impl Format {
    /// All formats, in CLI listing order.
    pub const ALL: [Format; 7] = [
        Format::Txt,
        Format::Csv,
        Format::Json,
        Format::Xml,
        Format::Png,
        Format::Gif,
        Format::Gz,
    ];

    /// File extension used for artifacts of this format.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Txt => "txt",
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Xml => "xml",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Gz => "txt.gz",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Txt => "txt",
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Xml => "xml",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Gz => "gz",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Format::ALL
            .into_iter()
            .find(|format| format.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnknownFormat(s.to_string()))
    }
}
