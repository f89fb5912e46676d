use std::path::PathBuf;

/// Per-job failure. Every variant is caught at the job boundary and turned
/// into a terminal [`JobStatus`](crate::pipeline::JobStatus); none of them
/// escape the orchestrator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobError {
    #[error("Corrupt input image: {0}")]
    CorruptInput(String),

    #[error("Working copy I/O failed: {0}")]
    WorkingCopy(String),

    #[error("Credential rejected by the inference service: {0}")]
    InvalidCredential(String),

    #[error("Rate limited: {0}")]
    RateLimit(String),

    #[error("Blocked by content safety filter")]
    SafetyBlock,

    #[error("Malformed inference response: {0}")]
    MalformedResponse(String),

    #[error("Inference failed after {attempts} attempt(s): {last}")]
    InferenceExhausted { attempts: u32, last: String },

    #[error("Failed to write metadata: {0}")]
    MetadataWrite(String),

    #[error("Failed to move file to {}: {reason}", dest.display())]
    Relocate { dest: PathBuf, reason: String },

    #[error("Cancelled")]
    Cancelled,
}

impl JobError {
    /// Whether this error ends the job as `Cancelled` rather than `Failed`.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Batch-level precondition failure, reported once before any job starts.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("No input files selected")]
    NoFiles,

    #[error("No API credentials configured")]
    NoCredentials,

    #[error("Worker count must be at least 1")]
    InvalidWorkerCount,

    #[error("Batch run was already started")]
    AlreadyStarted,

    #[error("Output directory {} is not writable: {source}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
