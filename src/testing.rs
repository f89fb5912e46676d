//! In-memory collaborators for pipeline and orchestrator tests.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::ai::{InferenceClient, InferenceError, InferenceRequest};
use crate::codec::{CodecError, ImageCodec};
use crate::metadata::{EmbedOutcome, MetadataWriter};
use crate::orchestrator::JobStateReporter;
use crate::pipeline::JobSnapshot;

pub(crate) fn tagging_json(title: &str) -> String {
    format!(r#"{{"title": "{title}", "keywords": "alpha, beta, gamma"}}"#)
}

/// Copies bytes instead of decoding. Sources starting with `corrupt` fail
/// to decode. The payload is the working file's bytes.
#[derive(Default)]
pub(crate) struct FakeCodec {
    normalized: AtomicUsize,
}

impl FakeCodec {
    pub fn normalized(&self) -> usize {
        self.normalized.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ImageCodec for FakeCodec {
    async fn normalize(&self, source: &Path, working: &Path) -> Result<(), CodecError> {
        self.normalized.fetch_add(1, Ordering::SeqCst);
        let bytes = tokio::fs::read(source).await?;
        if bytes.starts_with(b"corrupt") {
            return Err(CodecError::Decode {
                path: source.to_path_buf(),
                reason: "not an image".into(),
            });
        }
        tokio::fs::write(working, bytes).await?;
        Ok(())
    }

    async fn downsize(&self, working: &Path, _max_edge: u32) -> Result<Vec<u8>, CodecError> {
        Ok(tokio::fs::read(working).await?)
    }
}

type Script = dyn Fn(&str, &[u8]) -> Result<String, InferenceError> + Send + Sync;

/// Answers from a closure of `(credential, payload)`.
pub(crate) struct ScriptedClient {
    script: Box<Script>,
    delay: Duration,
    calls: Mutex<Vec<(String, Vec<u8>)>>,
}

impl ScriptedClient {
    pub fn new(
        script: impl Fn(&str, &[u8]) -> Result<String, InferenceError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Sleep before answering so that jobs interleave.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn credentials_seen(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.calls.lock().unwrap().iter().map(|(_, p)| p.clone()).collect()
    }
}

#[async_trait::async_trait]
impl InferenceClient for ScriptedClient {
    fn name(&self) -> &str {
        "Scripted"
    }

    async fn describe(
        &self,
        credential: &str,
        request: &InferenceRequest<'_>,
    ) -> Result<String, InferenceError> {
        self.calls
            .lock()
            .unwrap()
            .push((credential.to_string(), request.image.to_vec()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.script)(credential, request.image)
    }
}

/// Accepts every embed without touching the file, unless built failing.
#[derive(Default)]
pub(crate) struct FakeWriter {
    failure: Option<String>,
    calls: AtomicUsize,
}

impl FakeWriter {
    pub fn failing(detail: &str) -> Self {
        Self {
            failure: Some(detail.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl MetadataWriter for FakeWriter {
    async fn embed(&self, _path: &Path, _title: &str, _keywords: &str) -> EmbedOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(detail) => EmbedOutcome::failed(detail.clone()),
            None => EmbedOutcome::ok("embedded"),
        }
    }
}

/// Records every transition and the peak number of active jobs.
#[derive(Default)]
pub(crate) struct RecordingReporter {
    events: Mutex<Vec<JobSnapshot>>,
    progress: Mutex<Vec<(usize, usize)>>,
    active: Mutex<HashSet<usize>>,
    max_active: AtomicUsize,
}

impl RecordingReporter {
    pub fn events(&self) -> Vec<JobSnapshot> {
        self.events.lock().unwrap().clone()
    }

    /// Statuses job `id` passed through, in order.
    pub fn history(&self, id: usize) -> Vec<crate::pipeline::JobStatus> {
        self.events()
            .into_iter()
            .filter(|s| s.id == id)
            .map(|s| s.status)
            .collect()
    }

    pub fn progress(&self) -> Vec<(usize, usize)> {
        self.progress.lock().unwrap().clone()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

impl JobStateReporter for RecordingReporter {
    fn on_transition(&self, job: &JobSnapshot) {
        {
            let mut active = self.active.lock().unwrap();
            if job.status.is_active() {
                active.insert(job.id);
            } else {
                active.remove(&job.id);
            }
            self.max_active.fetch_max(active.len(), Ordering::SeqCst);
        }
        self.events.lock().unwrap().push(job.clone());
    }

    fn on_progress(&self, completed: usize, total: usize) {
        self.progress.lock().unwrap().push((completed, total));
    }
}
