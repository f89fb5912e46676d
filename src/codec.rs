//! Image decoding, normalization and payload downsizing.
//!
//! The orchestrator only talks to [`ImageCodec`]; [`RasterCodec`] is the
//! implementation backed by the `image` crate. Decoding and encoding are CPU
//! bound, so `RasterCodec` runs them on the blocking thread pool.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use std::io::{BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};

/// Default JPEG quality for the sanitized working copy.
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

/// JPEG quality for the throwaway copy sent to the inference service.
const PAYLOAD_JPEG_QUALITY: u8 = 85;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("cannot decode {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    #[error("cannot encode image: {0}")]
    Encode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Image operations the pipeline needs.
#[async_trait::async_trait]
pub trait ImageCodec: Send + Sync {
    /// Decode `source`, convert to 8-bit RGB and write a high quality JPEG to
    /// `working`. `source` is never modified.
    async fn normalize(&self, source: &Path, working: &Path) -> Result<(), CodecError>;

    /// Return JPEG bytes of `working` scaled so its longest edge is at most
    /// `max_edge`. Smaller images are re-encoded at their own size.
    async fn downsize(&self, working: &Path, max_edge: u32) -> Result<Vec<u8>, CodecError>;
}

/// [`ImageCodec`] backed by the `image` crate.
#[derive(Debug, Clone)]
pub struct RasterCodec {
    quality: u8,
}

impl RasterCodec {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

impl Default for RasterCodec {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

#[async_trait::async_trait]
impl ImageCodec for RasterCodec {
    async fn normalize(&self, source: &Path, working: &Path) -> Result<(), CodecError> {
        let source = source.to_path_buf();
        let working = working.to_path_buf();
        let quality = self.quality;
        tokio::task::spawn_blocking(move || normalize_file(&source, &working, quality))
            .await
            .map_err(|e| CodecError::Encode(format!("codec task aborted: {e}")))?
    }

    async fn downsize(&self, working: &Path, max_edge: u32) -> Result<Vec<u8>, CodecError> {
        let working = working.to_path_buf();
        tokio::task::spawn_blocking(move || downsize_file(&working, max_edge))
            .await
            .map_err(|e| CodecError::Encode(format!("codec task aborted: {e}")))?
    }
}

fn decode(path: &Path) -> Result<DynamicImage, CodecError> {
    let decode_err = |reason: String| CodecError::Decode {
        path: path.to_path_buf(),
        reason,
    };
    ImageReader::open(path)
        .map_err(|e| decode_err(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| decode_err(e.to_string()))?
        .decode()
        .map_err(|e| decode_err(e.to_string()))
}

fn normalize_file(source: &Path, working: &Path, quality: u8) -> Result<(), CodecError> {
    let img = decode(source)?;
    // Drops alpha, palette and 16-bit depth in one go.
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());

    let file = std::fs::File::create(working)?;
    let mut writer = BufWriter::new(file);
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut writer, quality))
        .map_err(|e| CodecError::Encode(e.to_string()))?;
    writer.flush()?;

    log::debug!(
        "Sanitized {} -> {} ({}x{})",
        source.display(),
        working.display(),
        rgb.width(),
        rgb.height()
    );
    Ok(())
}

fn downsize_file(working: &Path, max_edge: u32) -> Result<Vec<u8>, CodecError> {
    let img = decode(working)?;
    let max_edge = max_edge.max(1);
    let img = if img.width().max(img.height()) > max_edge {
        img.resize(max_edge, max_edge, FilterType::Triangle)
    } else {
        img
    };
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());

    let mut bytes = Cursor::new(Vec::new());
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, PAYLOAD_JPEG_QUALITY))
        .map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(bytes.into_inner())
}
