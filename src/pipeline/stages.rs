use std::path::Path;

use super::{CancelHandle, RetryPolicy};
use crate::ai::{
    InferenceClient, InferenceError, InferenceRequest, PAYLOAD_MIME_TYPE, Tagging, parse_tagging,
};
use crate::codec::{CodecError, ImageCodec};
use crate::credentials::CredentialRotator;
use crate::error::JobError;
use crate::metadata::MetadataWriter;

/// Decode `source` and write a clean RGB JPEG to `working`.
pub async fn sanitize(
    codec: &dyn ImageCodec,
    source: &Path,
    working: &Path,
) -> Result<(), JobError> {
    codec.normalize(source, working).await.map_err(|e| match e {
        CodecError::Decode { reason, .. } => JobError::CorruptInput(reason),
        other => JobError::WorkingCopy(other.to_string()),
    })
}

/// Everything the Infer stage borrows from the run.
pub struct InferContext<'a> {
    pub codec: &'a dyn ImageCodec,
    pub client: &'a dyn InferenceClient,
    pub credentials: &'a CredentialRotator,
    pub prompt: &'a str,
    pub policy: &'a RetryPolicy,
    /// Longest edge of the payload sent to the model.
    pub max_edge: u32,
    pub cancel: &'a CancelHandle,
}

/// Ask the model for a title and keywords for the working copy.
///
/// The payload is a downsized in-memory re-encode; nothing is written to
/// disk. `attempts` is updated before every call so the caller sees the
/// count even when this returns an error.
pub async fn infer(
    ctx: &InferContext<'_>,
    working: &Path,
    attempts: &mut u32,
) -> Result<Tagging, JobError> {
    let payload = ctx
        .codec
        .downsize(working, ctx.max_edge)
        .await
        .map_err(|e| JobError::WorkingCopy(e.to_string()))?;

    let max_attempts = ctx.policy.max_attempts.max(1);
    let mut last = String::from("no attempt made");

    for attempt in 1..=max_attempts {
        if ctx.cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        *attempts = attempt;

        let Some(credential) = ctx.credentials.current() else {
            return Err(JobError::InvalidCredential(
                "credential pool is empty".to_string(),
            ));
        };
        let request = InferenceRequest {
            prompt: ctx.prompt,
            image: &payload,
            mime_type: PAYLOAD_MIME_TYPE,
        };

        match ctx.client.describe(credential, &request).await {
            Ok(text) => {
                log::debug!("{} raw response: {text}", ctx.client.name());
                match parse_tagging(&text) {
                    Ok(tagging) => return Ok(tagging),
                    Err(e) => {
                        last = JobError::MalformedResponse(e.to_string()).to_string();
                    }
                }
            }
            Err(InferenceError::RateLimited(msg)) => {
                last = JobError::RateLimit(msg).to_string();
                ctx.credentials.rotate();
                if attempt < max_attempts && !ctx.policy.rate_limit_backoff.is_zero() {
                    tokio::time::sleep(ctx.policy.rate_limit_backoff).await;
                }
            }
            Err(InferenceError::InvalidCredential(msg)) => {
                return Err(JobError::InvalidCredential(msg));
            }
            Err(InferenceError::SafetyBlocked(msg)) => {
                if !ctx.policy.retry_safety_blocks {
                    log::warn!("{}: {msg}", JobError::SafetyBlock);
                    return Err(JobError::SafetyBlock);
                }
                last = format!("{}: {msg}", JobError::SafetyBlock);
            }
            Err(e @ InferenceError::Transport(_)) => {
                last = e.to_string();
            }
        }

        log::warn!(
            "Attempt {attempt}/{max_attempts} for {} failed: {last}",
            working.display()
        );
    }

    Err(JobError::InferenceExhausted {
        attempts: max_attempts,
        last,
    })
}

/// Write `tagging` into the working copy.
pub async fn embed(
    writer: &dyn MetadataWriter,
    working: &Path,
    tagging: &Tagging,
) -> Result<(), JobError> {
    let outcome = writer
        .embed(working, &tagging.title, &tagging.keywords)
        .await;
    if outcome.success {
        log::debug!("{}: {}", working.display(), outcome.detail);
        Ok(())
    } else {
        Err(JobError::MetadataWrite(outcome.detail))
    }
}

/// Move the finished working copy to `destination`.
///
/// Rename first; across filesystems fall back to copy and remove. A failed
/// copy leaves nothing at `destination`.
pub async fn relocate(working: &Path, destination: &Path) -> Result<(), JobError> {
    let fail = |reason: String| JobError::Relocate {
        dest: destination.to_path_buf(),
        reason,
    };

    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| fail(e.to_string()))?;
    }

    match tokio::fs::rename(working, destination).await {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            log::debug!(
                "Rename {} -> {} failed ({rename_err}), copying instead",
                working.display(),
                destination.display()
            );
            if let Err(e) = tokio::fs::copy(working, destination).await {
                let _ = tokio::fs::remove_file(destination).await;
                return Err(fail(e.to_string()));
            }
            if let Err(e) = tokio::fs::remove_file(working).await {
                log::debug!("Could not remove {}: {e}", working.display());
            }
            Ok(())
        }
    }
}
