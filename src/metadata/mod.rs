//! Descriptive metadata embedding for sanitized JPEGs.
//!
//! [`JpegMetadataWriter`] writes the title and keyword list into three
//! containers so that every common tool finds them:
//!
//! | Container | Title | Description | Keywords |
//! |-----------|-------|-------------|----------|
//! | EXIF (IFD0) | XPTitle | ImageDescription | XPKeywords |
//! | XMP (APP1) | dc:title, photoshop:Headline | dc:description | dc:subject |
//! | IPTC-IIM (APP13) | Object Name 2:5 | Caption/Abstract 2:120 | Keywords 2:25 |
//!
//! [`read_embedded`] reads the same fields back.

mod iptc;
mod reader;
mod writer;
mod xmp;

pub use reader::{EmbeddedMetadata, read_embedded};
pub use writer::{JpegMetadataWriter, staging_path};

use serde::Serialize;
use std::path::Path;

/// Result of an embed call. The writer never raises; a failed write is
/// reported as `success == false` with the reason in `detail`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedOutcome {
    pub success: bool,
    pub detail: String,
}

impl EmbedOutcome {
    pub fn ok(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: detail.into(),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: detail.into(),
        }
    }
}

/// Writes a title and keywords into an image file in place.
#[async_trait::async_trait]
pub trait MetadataWriter: Send + Sync {
    /// `keywords` is the comma-separated list as returned by the model.
    async fn embed(&self, path: &Path, title: &str, keywords: &str) -> EmbedOutcome;
}

/// Split a comma-separated keyword string, trimming each entry and dropping
/// empty ones.
///
/// ```rust
/// use stock_tagger::metadata::parse_keywords;
///
/// assert_eq!(parse_keywords("a, b, ,c"), vec!["a", "b", "c"]);
/// ```
pub fn parse_keywords(keywords: &str) -> Vec<String> {
    keywords
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(String::from)
        .collect()
}
