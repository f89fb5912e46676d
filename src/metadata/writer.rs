use anyhow::{Context, Result};
use img_parts::jpeg::{Jpeg, JpegSegment};
use img_parts::{Bytes, ImageEXIF};
use little_exif::endian::Endian;
use little_exif::exif_tag::{ExifTag, ExifTagGroup};
use little_exif::exif_tag_format::ExifTagFormat;
use little_exif::filetype::FileExtension;
use little_exif::metadata::Metadata;
use std::panic::UnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::iptc::{self, IptcFields, PHOTOSHOP_HEADER};
use super::xmp::{self, XMP_HEADER};
use super::{EmbedOutcome, MetadataWriter, parse_keywords};

// EXIF tag IDs little_exif has no variant for
const TAG_XP_TITLE: u16 = 0x9C9B;
const TAG_XP_KEYWORDS: u16 = 0x9C9E;

const MARKER_APP0: u8 = 0xE0;
const MARKER_APP1: u8 = 0xE1;
const MARKER_APP13: u8 = 0xED;
const EXIF_PREFIX: &[u8] = b"Exif\0\0";

// little_exif as_u8_vec(JPEG) returns: [APP1 marker 2B][length 2B][Exif\0\0 6B][TIFF data]
// img-parts set_exif() expects just the TIFF data
const JPEG_EXIF_OVERHEAD: usize = 10;

/// [`MetadataWriter`] for JPEG files: EXIF, XMP and IPTC in one pass.
///
/// The new file is written to [`staging_path`] and renamed over the original,
/// so a failed write never leaves a half-written image behind. The staging
/// file is removed whatever the outcome.
#[derive(Debug, Default, Clone, Copy)]
pub struct JpegMetadataWriter;

#[async_trait::async_trait]
impl MetadataWriter for JpegMetadataWriter {
    async fn embed(&self, path: &Path, title: &str, keywords: &str) -> EmbedOutcome {
        let path = path.to_path_buf();
        let title = title.to_string();
        let keywords = parse_keywords(keywords);

        let task = tokio::task::spawn_blocking(move || embed_file(&path, &title, &keywords));
        match task.await {
            Ok(Ok(count)) => EmbedOutcome::ok(format!("title and {count} keyword(s) embedded")),
            Ok(Err(e)) => EmbedOutcome::failed(format!("{e:#}")),
            Err(e) => EmbedOutcome::failed(format!("metadata task aborted: {e}")),
        }
    }
}

/// Transient file the writer stages output in: `<file name>~` next to `path`.
pub fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push("~");
    path.with_file_name(name)
}

fn embed_file(path: &Path, title: &str, keywords: &[String]) -> Result<usize> {
    let staging = staging_path(path);
    let result = write_staged(path, &staging, title, keywords);

    if staging.exists() {
        if let Err(e) = std::fs::remove_file(&staging) {
            log::debug!("Could not remove {}: {e}", staging.display());
        }
    }

    result.map(|_| keywords.len())
}

fn write_staged(path: &Path, staging: &Path, title: &str, keywords: &[String]) -> Result<()> {
    let file_bytes = std::fs::read(path).context("Failed to read image file")?;
    let mut jpeg = Jpeg::from_bytes(Bytes::from(file_bytes))
        .map_err(|e| anyhow::anyhow!("Failed to parse JPEG: {e}"))?;

    let tiff = build_exif(path, title, keywords)?;
    jpeg.set_exif(Some(Bytes::from(tiff)));
    move_exif_first(&mut jpeg);
    set_xmp(&mut jpeg, title, keywords);
    set_iptc(&mut jpeg, title, keywords);

    let output = jpeg.encoder().bytes();
    std::fs::write(staging, &output).context("Failed to write staged image")?;
    std::fs::rename(staging, path).context("Failed to replace image with staged copy")?;
    Ok(())
}

/// Encode a string as null-terminated UTF-16LE (XP* tags).
fn encode_utf16le(s: &str) -> Vec<u8> {
    let mut bytes: Vec<u8> = s.encode_utf16().flat_map(|c| c.to_le_bytes()).collect();
    bytes.extend_from_slice(&[0, 0]);
    bytes
}

fn make_xp_tag(tag_id: u16, value: &str) -> Result<ExifTag> {
    ExifTag::from_u16_with_data(
        tag_id,
        &ExifTagFormat::INT8U,
        &encode_utf16le(value),
        &Endian::Little,
        &ExifTagGroup::IFD0,
    )
    .map_err(|e| anyhow::anyhow!("Failed to build EXIF tag {tag_id:#06x}: {e:?}"))
}

/// Held while the silent panic hook is installed. The hook is process-wide and
/// embeds run on several blocking threads, so every swap and restore must
/// happen as one unit.
static PANIC_HOOK_LOCK: Mutex<()> = Mutex::new(());

/// `catch_unwind` without the default hook printing the panic to stderr.
fn catch_unwind_quietly<T>(f: impl FnOnce() -> T + UnwindSafe) -> std::thread::Result<T> {
    let _guard = PANIC_HOOK_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(|_| {}));
    let result = std::panic::catch_unwind(f);
    std::panic::set_hook(prev_hook);
    result
}

/// Existing EXIF of `path` as parsed by little_exif, or `None` when there is
/// none or it cannot be parsed.
fn load_existing_exif(path: &Path) -> Option<Metadata> {
    let path_owned = path.to_path_buf();
    // little_exif can panic on malformed input
    let result = catch_unwind_quietly(move || Metadata::new_from_path(&path_owned));

    match result {
        Ok(Ok(m)) if !m.data().is_empty() => {
            log::debug!("Merging into {} existing EXIF tags", m.data().len());
            Some(m)
        }
        Ok(Ok(_)) => None,
        Ok(Err(e)) => {
            log::debug!("No usable EXIF in {}: {e}", path.display());
            None
        }
        Err(_) => {
            log::debug!("EXIF parser panicked on {}", path.display());
            None
        }
    }
}

/// TIFF payload for the EXIF APP1 segment with our descriptive tags set.
fn build_exif(path: &Path, title: &str, keywords: &[String]) -> Result<Vec<u8>> {
    let mut metadata = load_existing_exif(path).unwrap_or_else(Metadata::new);

    metadata.set_tag(ExifTag::ImageDescription(title.to_string()));
    metadata.set_tag(make_xp_tag(TAG_XP_TITLE, title)?);
    metadata.set_tag(make_xp_tag(TAG_XP_KEYWORDS, &keywords.join("; "))?);

    let exif_bytes = metadata.as_u8_vec(FileExtension::JPEG);
    if exif_bytes.len() <= JPEG_EXIF_OVERHEAD {
        anyhow::bail!("EXIF encoder produced no data");
    }
    Ok(exif_bytes[JPEG_EXIF_OVERHEAD..].to_vec())
}

fn app1_position(jpeg: &Jpeg, header: &[u8]) -> Option<usize> {
    jpeg.segments()
        .iter()
        .position(|s| s.marker() == MARKER_APP1 && s.contents().starts_with(header))
}

/// img-parts inserts EXIF at a fixed index; EXIF belongs directly after SOI
/// (or after a JFIF APP0).
fn move_exif_first(jpeg: &mut Jpeg) {
    let Some(pos) = app1_position(jpeg, EXIF_PREFIX) else {
        return;
    };
    let segments = jpeg.segments_mut();
    let target = match segments.first() {
        Some(first) if first.marker() == MARKER_APP0 => 1,
        _ => 0,
    };
    if pos > target {
        let segment = segments.remove(pos);
        segments.insert(target, segment);
    }
}

fn set_xmp(jpeg: &mut Jpeg, title: &str, keywords: &[String]) {
    let xmp_pos = app1_position(jpeg, XMP_HEADER);
    let existing = xmp_pos.map(|pos| {
        let contents = jpeg.segments()[pos].contents();
        String::from_utf8_lossy(&contents[XMP_HEADER.len()..]).into_owned()
    });

    let packet = xmp::update_packet(existing.as_deref(), title, keywords);
    let mut contents = Vec::with_capacity(XMP_HEADER.len() + packet.len());
    contents.extend_from_slice(XMP_HEADER);
    contents.extend_from_slice(packet.as_bytes());
    let segment = JpegSegment::new_with_contents(MARKER_APP1, Bytes::from(contents));

    match xmp_pos {
        Some(pos) => jpeg.segments_mut()[pos] = segment,
        None => {
            // Right after the EXIF APP1, which many readers expect to come first.
            let at = app1_position(jpeg, EXIF_PREFIX).map(|p| p + 1).unwrap_or(1);
            let segments = jpeg.segments_mut();
            let at = at.min(segments.len());
            segments.insert(at, segment);
        }
    }
}

fn set_iptc(jpeg: &mut Jpeg, title: &str, keywords: &[String]) {
    let iptc_pos = jpeg
        .segments()
        .iter()
        .position(|s| s.marker() == MARKER_APP13 && s.contents().starts_with(PHOTOSHOP_HEADER));
    let existing = iptc_pos.map(|pos| jpeg.segments()[pos].contents().to_vec());

    let fields = IptcFields {
        object_name: Some(title.to_string()),
        caption: Some(title.to_string()),
        keywords: keywords.to_vec(),
    };
    let contents = iptc::build_segment(existing.as_deref(), &fields);
    let segment = JpegSegment::new_with_contents(MARKER_APP13, Bytes::from(contents));

    match iptc_pos {
        Some(pos) => jpeg.segments_mut()[pos] = segment,
        None => {
            let at = app1_position(jpeg, XMP_HEADER)
                .or_else(|| app1_position(jpeg, EXIF_PREFIX))
                .map(|p| p + 1)
                .unwrap_or(1);
            let segments = jpeg.segments_mut();
            let at = at.min(segments.len());
            segments.insert(at, segment);
        }
    }
}
