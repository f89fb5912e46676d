use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use stock_tagger::ai::GeminiClient;
use stock_tagger::codec::RasterCodec;
use stock_tagger::config;
use stock_tagger::metadata::{self, JpegMetadataWriter};
use stock_tagger::orchestrator::{BatchOrchestrator, BatchRun, JobStateReporter};
use stock_tagger::pipeline::{self, JobInput, JobSnapshot, StatusColor};

#[derive(Parser, Debug)]
#[command(
    name = "stock-tagger",
    version,
    about = "Batch-tag stock photos with AI titles and keywords, embedded as EXIF, XMP and IPTC"
)]
struct Cli {
    /// Image files or directories to process
    #[arg(value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Path to config file (default: config.json next to binary)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Initialize a default config.json and exit
    #[arg(long)]
    init: bool,

    /// Number of images processed at once
    #[arg(short, long, value_name = "N")]
    workers: Option<usize>,

    /// Directory finished images are moved to
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Comma-separated Gemini API keys (overrides config)
    #[arg(long, value_name = "KEYS")]
    api_keys: Option<String>,

    /// Output the run summary as JSON
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Display embedded title, description and keywords and exit
    #[arg(long = "show-metadata")]
    show_metadata: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Handle --init
    if cli.init {
        let config = config::Config::default();
        let path = cli.config.as_deref();
        config.save(path)?;
        let save_path = match path {
            Some(p) => p.to_path_buf(),
            None => config::Config::config_path()?,
        };
        println!("Default config written to {}", save_path.display());
        return Ok(());
    }

    if cli.paths.is_empty() {
        anyhow::bail!("No input files or directories specified. Use --help for usage.");
    }

    let images = pipeline::collect_images(&cli.paths);
    if images.is_empty() {
        anyhow::bail!("No supported image files found in the specified paths.");
    }

    // Handle --show-metadata
    if cli.show_metadata {
        for image_path in &images {
            print_metadata(image_path)?;
        }
        return Ok(());
    }

    // Load config and apply CLI overrides
    let mut config = config::Config::load(cli.config.as_deref())?;
    if let Some(workers) = cli.workers {
        config.batch.workers = workers;
    }
    if let Some(output) = cli.output {
        config.batch.output_dir = output;
    }
    if let Some(keys) = cli.api_keys {
        config.gemini.api_keys = keys;
    }

    let credentials = config.credentials();
    if credentials.is_empty() {
        anyhow::bail!(
            "No Gemini API keys configured. Run `stock-tagger --init` to create a config file, then add your keys (or pass --api-keys)."
        );
    }

    log::info!("Found {} image(s) to process", images.len());

    let inputs: Vec<JobInput> = images.into_iter().map(JobInput::new).collect();
    let run = BatchRun::new(
        inputs,
        config.batch.workers,
        &config.batch.output_dir,
        &config.batch.file_prefix,
    )
    .context("Cannot start batch")?;

    // Ctrl-C lets in-flight stages finish and stops everything else.
    let cancel = run.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Stop requested, finishing in-flight work...");
            cancel.cancel();
        }
    });

    let client = GeminiClient::new(
        config.gemini.model.clone(),
        config.gemini.disable_safety_filters,
    );
    let orchestrator = BatchOrchestrator::new(
        Arc::new(RasterCodec::new(config.sanitize.jpeg_quality)),
        Arc::new(client),
        Arc::new(JpegMetadataWriter),
        Arc::new(ConsoleReporter {
            total: run.total(),
            quiet: cli.json,
        }),
        config.pipeline_settings(),
    );

    let summary = orchestrator.run(&run, &credentials).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!();
        println!(
            "{BOLD}Summary:{RESET} {GREEN}{} done{RESET}, {DIM}{} skipped{RESET}, {RED}{} failed{RESET}, {YELLOW}{} cancelled{RESET}",
            summary.done, summary.skipped, summary.failed, summary.cancelled
        );
        println!("Output: {}", run.output_dir().display());
    }

    Ok(())
}

// ANSI color codes
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const BLUE: &str = "\x1b[34m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";

fn ansi(color: StatusColor) -> &'static str {
    match color {
        StatusColor::Grey => DIM,
        StatusColor::Orange | StatusColor::Amber => YELLOW,
        StatusColor::Blue => BLUE,
        StatusColor::Green => GREEN,
        StatusColor::Red => RED,
    }
}

/// Prints one colored line per job transition. With `quiet` only terminal
/// states are shown, on stderr, so stdout stays valid JSON.
struct ConsoleReporter {
    total: usize,
    quiet: bool,
}

impl JobStateReporter for ConsoleReporter {
    fn on_transition(&self, job: &JobSnapshot) {
        if self.quiet && !job.status.is_terminal() {
            return;
        }
        let color = ansi(job.color);
        let width = self.total.to_string().len();
        let mut line = format!(
            "[{:>width$}/{}] {:<32} {color}{}{RESET}",
            job.id, self.total, job.display_name, job.label
        );
        if let Some(detail) = &job.detail {
            line.push_str(&format!(" {DIM}{detail}{RESET}"));
        }
        if self.quiet {
            eprintln!("{line}");
        } else {
            println!("{line}");
        }
    }

    fn on_progress(&self, completed: usize, total: usize) {
        log::debug!("{completed}/{total} settled");
    }
}

/// Max width for the value column before wrapping.
const VAL_WIDTH: usize = 46;
/// Indent for continuation lines (tag column width + " : " = 25 chars + 2 leading spaces).
const INDENT: &str = "                           ";

/// Print the descriptive metadata of a file, per container.
fn print_metadata(path: &std::path::Path) -> Result<()> {
    println!();
    println!("{BOLD}File:{RESET} {}", path.display());
    println!("{DIM}{}{RESET}", "═".repeat(72));

    let data = match metadata::read_embedded(path) {
        Ok(data) => data,
        Err(e) => {
            println!("  {DIM}(cannot read metadata: {e}){RESET}");
            println!();
            return Ok(());
        }
    };

    if data.is_empty() {
        println!("  {DIM}(no descriptive metadata found){RESET}");
        println!();
        return Ok(());
    }

    let sections: [(&str, Vec<(&str, Option<String>)>); 3] = [
        (
            "EXIF",
            vec![("ImageDescription", data.exif_description.clone())],
        ),
        (
            "XMP",
            vec![
                ("dc:title", data.xmp_title.clone()),
                ("dc:description", data.xmp_description.clone()),
                ("dc:subject", join_keywords(&data.xmp_keywords)),
            ],
        ),
        (
            "IPTC",
            vec![
                ("ObjectName", data.iptc_title.clone()),
                ("Caption-Abstract", data.iptc_caption.clone()),
                ("Keywords", join_keywords(&data.iptc_keywords)),
            ],
        ),
    ];

    for (name, fields) in &sections {
        if fields.iter().all(|(_, v)| v.is_none()) {
            continue;
        }
        println!("  {BOLD}{name}{RESET}");
        println!("  {DIM}{}{RESET}", "─".repeat(70));
        for (tag, val) in fields {
            if let Some(v) = val {
                print_row(tag, v);
            }
        }
        println!();
    }

    Ok(())
}

fn join_keywords(keywords: &[String]) -> Option<String> {
    if keywords.is_empty() {
        None
    } else {
        Some(keywords.join(", "))
    }
}

/// Print a single row in the metadata table.
fn print_row(tag: &str, val: &str) {
    let tag_col = format!("{:<22}", tag);
    let lines = wrap_text(val, VAL_WIDTH);
    for (i, line) in lines.iter().enumerate() {
        if i == 0 {
            println!("  {tag_col} : {line}");
        } else {
            println!("  {INDENT}{line}");
        }
    }
}

/// Wrap text at word boundaries to fit within max_width.
fn wrap_text(s: &str, max_width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current_line = String::new();

    for word in s.split_whitespace() {
        if current_line.is_empty() {
            current_line = word.to_string();
        } else if current_line.len() + 1 + word.len() <= max_width {
            current_line.push(' ');
            current_line.push_str(word);
        } else {
            lines.push(current_line);
            current_line = word.to_string();
        }
    }

    if !current_line.is_empty() {
        lines.push(current_line);
    }

    if lines.is_empty() {
        lines.push(s.to_string());
    }

    lines
}
