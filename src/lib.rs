//! # stock-tagger
//!
//! Batch stock-photo tagger. Every image goes through the same four stages:
//!
//! 1. **Sanitize**: decode and re-encode as a clean 8-bit RGB JPEG working copy.
//! 2. **Infer**: send a downsized copy to Google Gemini for an SEO title and
//!    keyword list, rotating API keys on rate limits and retrying bad answers.
//! 3. **Embed**: write title and keywords into EXIF, XMP and IPTC.
//! 4. **Relocate**: move the finished file into the output directory under a
//!    deterministic name.
//!
//! Images whose output already exists are skipped, so an interrupted batch
//! can simply be started again.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use stock_tagger::ai::GeminiClient;
//! use stock_tagger::codec::RasterCodec;
//! use stock_tagger::config::Config;
//! use stock_tagger::metadata::JpegMetadataWriter;
//! use stock_tagger::orchestrator::{BatchOrchestrator, BatchRun, LogReporter};
//! use stock_tagger::pipeline::{JobInput, collect_images};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(Some("config.json".as_ref()))?;
//!
//!     let inputs = collect_images(&[PathBuf::from("./shoot")])
//!         .into_iter()
//!         .map(JobInput::new)
//!         .collect();
//!     let run = BatchRun::new(
//!         inputs,
//!         config.batch.workers,
//!         &config.batch.output_dir,
//!         &config.batch.file_prefix,
//!     )?;
//!
//!     let orchestrator = BatchOrchestrator::new(
//!         Arc::new(RasterCodec::new(config.sanitize.jpeg_quality)),
//!         Arc::new(GeminiClient::new(config.gemini.model.clone(), false)),
//!         Arc::new(JpegMetadataWriter),
//!         Arc::new(LogReporter),
//!         config.pipeline_settings(),
//!     );
//!     let summary = orchestrator.run(&run, &config.credentials()).await?;
//!     println!("{} done, {} skipped, {} failed", summary.done, summary.skipped, summary.failed);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`ai`]: inference client trait, Gemini client, prompt and response parsing
//! - [`codec`]: decode, normalize and downsize images
//! - [`config`]: configuration types and loading/saving
//! - [`credentials`]: API key pool with cyclic rotation
//! - [`error`]: per-job and batch-level errors
//! - [`metadata`]: EXIF/XMP/IPTC writing and reading
//! - [`orchestrator`]: batch runs, worker limit, cancellation and progress
//! - [`pipeline`]: job state machine, stages and input collection

pub mod ai;
pub mod codec;
pub mod config;
pub mod credentials;
pub mod error;
pub mod metadata;
pub mod orchestrator;
pub mod pipeline;

#[cfg(test)]
mod testing;
