//! Per-job pipeline: the job state machine, the four stages and the path
//! rules they share.
//!
//! A job runs `Sanitize → Infer → Embed → Relocate`. Each stage is a free
//! async function that maps its failures onto [`JobError`](crate::error::JobError);
//! sequencing, admission and cancellation between stages belong to the
//! [`BatchOrchestrator`](crate::orchestrator::BatchOrchestrator).

mod job;
mod stages;

pub use job::{Job, JobInput, JobSnapshot, JobStatus, StatusColor};
pub use stages::{InferContext, embed, infer, relocate, sanitize};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use walkdir::WalkDir;

/// Extensions accepted as pipeline input.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// Default prefix of relocated files.
pub const DEFAULT_FILE_PREFIX: &str = "READY_";

/// Scratch directory for working copies, created inside the output directory
/// so that relocation is a same-filesystem rename.
pub const SCRATCH_DIR_NAME: &str = ".stock-tagger-work";

/// How the Infer stage retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per job, shared by every failure kind.
    pub max_attempts: u32,
    /// Pause after a rate-limited attempt, once the credential has rotated.
    pub rate_limit_backoff: Duration,
    /// Treat a safety block as a retryable failure instead of a final one.
    pub retry_safety_blocks: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            rate_limit_backoff: Duration::from_secs(2),
            retry_safety_blocks: true,
        }
    }
}

/// Cooperative stop request shared by every job of a run.
///
/// Setting it never interrupts stage work already in flight; jobs observe it
/// at their next check point.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Where a finished job lands: `output_dir/<prefix><name>`.
///
/// A JPEG source keeps its file name. Any other source keeps its whole file
/// name, extension included, and gets `.jpg` appended, so `a.jpg` and `a.png`
/// never share a destination.
///
/// ```rust
/// use stock_tagger::pipeline::destination_path;
/// use std::path::Path;
///
/// let out = Path::new("/out");
/// assert_eq!(
///     destination_path(out, "READY_", Path::new("/in/beach.png")),
///     Path::new("/out/READY_beach.png.jpg"),
/// );
/// assert_eq!(
///     destination_path(out, "READY_", Path::new("/in/Beach.JPEG")),
///     Path::new("/out/READY_Beach.JPEG"),
/// );
/// ```
pub fn destination_path(output_dir: &Path, prefix: &str, source: &Path) -> PathBuf {
    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let name = if is_jpeg(source) {
        file_name
    } else {
        format!("{file_name}.jpg")
    };
    output_dir.join(format!("{prefix}{name}"))
}

/// `path` with `-<n>` inserted before its extension, used when two sources
/// of one batch would land on the same destination.
///
/// ```rust
/// use stock_tagger::pipeline::numbered_path;
/// use std::path::Path;
///
/// assert_eq!(
///     numbered_path(Path::new("/out/READY_a.jpg"), 2),
///     Path::new("/out/READY_a-2.jpg"),
/// );
/// ```
pub fn numbered_path(path: &Path, n: usize) -> PathBuf {
    let stem = file_stem(path);
    let name = match path.extension() {
        Some(ext) => format!("{stem}-{n}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{n}"),
    };
    path.with_file_name(name)
}

/// Working copy path of job `id` inside the scratch directory. Unique per job
/// even when two sources share a file name.
pub fn working_path(scratch_dir: &Path, id: usize, source: &Path) -> PathBuf {
    scratch_dir.join(format!("job-{id:04}-{}.jpg", file_stem(source)))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string())
}

fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_lowercase().as_str(), "jpg" | "jpeg"))
        .unwrap_or(false)
}

/// Collect image files from paths (files and directories, recursively).
///
/// Files with unsupported extensions are skipped with a warning, and so are
/// paths that do not exist.
///
/// ```rust,no_run
/// use stock_tagger::pipeline::collect_images;
/// use std::path::PathBuf;
///
/// let images = collect_images(&[
///     PathBuf::from("photo.jpg"),
///     PathBuf::from("./shoot/"),
/// ]);
/// println!("Found {} images", images.len());
/// ```
pub fn collect_images(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut images = Vec::new();

    for path in paths {
        if path.is_file() {
            if is_supported_image(path) {
                images.push(path.clone());
            } else {
                log::warn!("Skipping unsupported file: {}", path.display());
            }
        } else if path.is_dir() {
            for entry in WalkDir::new(path)
                .follow_links(true)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let p = entry.path();
                if p.is_file() && is_supported_image(p) && !in_scratch_dir(p) {
                    images.push(p.to_path_buf());
                }
            }
        } else {
            log::warn!("Path does not exist: {}", path.display());
        }
    }

    images
}

/// Check if a file has a supported image extension.
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn in_scratch_dir(path: &Path) -> bool {
    path.components()
        .any(|c| c.as_os_str() == SCRATCH_DIR_NAME)
}
