use anyhow::{Context, Result};
use img_parts::Bytes;
use img_parts::jpeg::Jpeg;
use nom_exif::{EntryValue, Exif, ExifIter, ExifTag, MediaParser, MediaSource};
use serde::Serialize;
use std::path::Path;

use super::iptc::{self, PHOTOSHOP_HEADER};
use super::xmp::{self, XMP_HEADER};

/// Descriptive metadata found in a JPEG, per container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EmbeddedMetadata {
    /// EXIF ImageDescription.
    pub exif_description: Option<String>,
    pub xmp_title: Option<String>,
    pub xmp_description: Option<String>,
    pub xmp_keywords: Vec<String>,
    /// IPTC Object Name (2:5).
    pub iptc_title: Option<String>,
    /// IPTC Caption/Abstract (2:120).
    pub iptc_caption: Option<String>,
    pub iptc_keywords: Vec<String>,
}

impl EmbeddedMetadata {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Read the descriptive fields back out of a JPEG.
///
/// Missing containers simply leave their fields empty; only an unreadable
/// file or a non-JPEG is an error.
pub fn read_embedded(path: &Path) -> Result<EmbeddedMetadata> {
    let bytes = std::fs::read(path).context("Failed to read image file")?;
    let jpeg = Jpeg::from_bytes(Bytes::from(bytes))
        .map_err(|e| anyhow::anyhow!("Failed to parse JPEG: {e}"))?;

    let mut data = EmbeddedMetadata {
        exif_description: read_exif_description(path),
        ..Default::default()
    };

    for segment in jpeg.segments() {
        let contents = segment.contents();
        if contents.starts_with(XMP_HEADER) {
            let packet = String::from_utf8_lossy(&contents[XMP_HEADER.len()..]);
            let fields = xmp::parse_packet(&packet);
            data.xmp_title = fields.title;
            data.xmp_description = fields.description;
            data.xmp_keywords = fields.keywords;
        } else if contents.starts_with(PHOTOSHOP_HEADER) {
            let fields = iptc::parse_segment(contents);
            data.iptc_title = fields.object_name;
            data.iptc_caption = fields.caption;
            data.iptc_keywords = fields.keywords;
        }
    }

    Ok(data)
}

fn read_exif_description(path: &Path) -> Option<String> {
    let mut parser = MediaParser::new();
    let ms = MediaSource::file_path(path).ok()?;
    let iter: ExifIter = match parser.parse(ms) {
        Ok(iter) => iter,
        Err(_) => {
            log::debug!("No EXIF data found in {}", path.display());
            return None;
        }
    };
    let exif: Exif = iter.into();
    exif.get(ExifTag::ImageDescription).and_then(entry_to_string)
}

fn entry_to_string(val: &EntryValue) -> Option<String> {
    let s = val.to_string();
    let s = s.trim().trim_matches('"');
    if s.is_empty() { None } else { Some(s.to_string()) }
}
