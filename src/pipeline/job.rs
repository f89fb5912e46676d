use serde::Serialize;
use std::path::{Path, PathBuf};

/// Where a job is in the pipeline.
///
/// ```text
/// Pending ──► Sanitizing ──► Inferring ──► Embedding ──► Relocating ──► Done
///    │             │             │             │             │
///    ├─► Skipped   └─────────────┴──► Failed ◄─┴─────────────┘
///    └─► Cancelled ◄── (any stage boundary before Relocating)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Sanitizing,
    Inferring,
    Embedding,
    Relocating,
    Done,
    Skipped,
    Failed,
    Cancelled,
}

/// Display color hint for front ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusColor {
    Grey,
    Orange,
    Blue,
    Green,
    Red,
    Amber,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Done | Self::Skipped | Self::Failed | Self::Cancelled
        )
    }

    /// Occupies a worker slot.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Sanitizing | Self::Inferring | Self::Embedding | Self::Relocating
        )
    }

    /// Whether `next` is an edge of the job state machine.
    pub fn can_advance_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Sanitizing | Skipped | Cancelled)
                | (Sanitizing, Inferring | Failed | Cancelled)
                | (Inferring, Embedding | Failed | Cancelled)
                | (Embedding, Relocating | Failed | Cancelled)
                | (Relocating, Done | Failed)
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "Waiting",
            Self::Sanitizing => "Sanitizing...",
            Self::Inferring => "AI Generating...",
            Self::Embedding => "Embedding...",
            Self::Relocating => "Moving...",
            Self::Done => "Done",
            Self::Skipped => "Skipped (already done)",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        }
    }

    pub fn color(self) -> StatusColor {
        match self {
            Self::Pending | Self::Skipped => StatusColor::Grey,
            Self::Sanitizing | Self::Inferring => StatusColor::Orange,
            Self::Embedding | Self::Relocating => StatusColor::Blue,
            Self::Done => StatusColor::Green,
            Self::Failed => StatusColor::Red,
            Self::Cancelled => StatusColor::Amber,
        }
    }
}

/// A file handed to a batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInput {
    pub path: PathBuf,
    pub display_name: String,
}

impl JobInput {
    /// Input whose display name is the file name.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { path, display_name }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }
}

/// One image moving through the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    /// 1-based position in the batch.
    pub id: usize,
    pub source: PathBuf,
    pub display_name: String,
    pub destination: PathBuf,
    status: JobStatus,
    pub last_error: Option<String>,
    /// Inference attempts made.
    pub attempts: u32,
}

impl Job {
    pub fn new(id: usize, input: &JobInput, destination: PathBuf) -> Self {
        Self {
            id,
            source: input.path.clone(),
            display_name: input.display_name.clone(),
            destination,
            status: JobStatus::Pending,
            last_error: None,
            attempts: 0,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            display_name: self.display_name.clone(),
            status: self.status,
            label: self.status.label(),
            color: self.status.color(),
            detail: self.last_error.clone(),
            attempts: self.attempts,
        }
    }

    /// Move to `next` if the state machine allows it. Returns `false` and
    /// leaves the job untouched otherwise.
    #[must_use]
    pub fn advance(&mut self, next: JobStatus) -> bool {
        if self.status.can_advance_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }
}

/// What a front end needs to render one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSnapshot {
    pub id: usize,
    pub display_name: String,
    pub status: JobStatus,
    pub label: &'static str,
    pub color: StatusColor,
    pub detail: Option<String>,
    pub attempts: u32,
}
