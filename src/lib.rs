//! k-mer Feature Staging Pipeline
//!
//! Prepares per-record inputs for an external k-mer feature extraction
//! toolchain and drives that toolchain under a strict stage barrier.
//!
//! # Architecture
//!
//! The pipeline consists of:
//!
//! - **Workspace**: resolves the directory layout and stages clean input/output trees
//! - **I/O**: parallel record splitting and manifest publication
//! - **Pipeline**: external counting → collection orchestration with metrics
//! - **Bench**: runs a sequential and a parallel pipeline as separate processes
//!   and compares their artifacts and timings
//!
//! # Usage
//!
//! ```no_run
//! use kmer_stage::{run_pipeline, Config, RunRequest};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file("kmer-stage.yaml".as_ref())?;
//!     let request = RunRequest {
//!         filename: Some("demo.fasta".to_string()),
//!         ..RunRequest::default()
//!     };
//!     let summary = run_pipeline(&config, &request)?;
//!     println!("{}", summary);
//!     Ok(())
//! }
//! ```

pub mod bench;
pub mod config;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod workspace;

pub use config::{CommandSpec, Config, RunMode};
pub use error::{PipelineError, Stage};
pub use io::{build_manifest, Manifest, SequenceSplitter, SplitOptions};
pub use pipeline::{CollectionStage, CountingStage, Metrics, MetricsSnapshot, Orchestrator};
pub use workspace::Workspace;

use std::path::PathBuf;
use std::time::Instant;

/// One pipeline invocation.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Source sequence file, relative to the data directory
    pub filename: Option<String>,

    /// Name of the final feature artifact in the data directory
    pub output: String,

    /// Feature directory name under the workspace root
    pub featuredir: String,

    /// Maximum parallel jobs
    pub jobs: usize,

    /// Pipeline variant
    pub mode: RunMode,
}

impl Default for RunRequest {
    fn default() -> Self {
        Self {
            filename: None,
            output: "feature_file.csv".to_string(),
            featuredir: "features".to_string(),
            jobs: config::default_jobs(),
            mode: RunMode::Parallel,
        }
    }
}

/// Outcome of a successful pipeline run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Variant that ran
    pub mode: RunMode,

    /// Records split (equals manifest entries)
    pub records: usize,

    /// Split writer threads used
    pub workers: usize,

    /// Published feature artifact
    pub artifact: PathBuf,

    /// Final metrics
    pub metrics: MetricsSnapshot,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} processing completed successfully!", capitalize(&self.mode.to_string()))?;
        writeln!(f, "Processed {} sequences", self.records)?;
        writeln!(f, "Total processing time: {:.2} seconds", self.metrics.elapsed.as_secs_f64())?;
        writeln!(f, "Average time per sequence: {:.3} seconds", self.metrics.secs_per_record)?;
        write!(f, "Output file: {}", self.artifact.display())
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Run the full pipeline: stage, split, publish the manifest, count, collect.
///
/// Configuration and environment problems are reported before any stage
/// touches the filesystem. Any stage failure aborts the run; later stages
/// never start.
pub fn run_pipeline(config: &Config, request: &RunRequest) -> error::Result<RunSummary> {
    config.validate()?;

    let filename = request
        .filename
        .as_deref()
        .filter(|f| !f.trim().is_empty())
        .ok_or_else(|| PipelineError::Configuration("a source filename is required (--filename)".to_string()))?;
    config::require_file_name("output", &request.output)?;
    config::require_file_name("featuredir", &request.featuredir)?;
    if request.jobs == 0 {
        return Err(PipelineError::Configuration("jobs must be > 0".to_string()));
    }

    let ws = Workspace::resolve(&config.workspace, &request.featuredir)?;
    let source = ws.data_dir.join(filename);
    if !source.is_file() {
        return Err(PipelineError::Environment {
            path: source,
            reason: "source sequence file does not exist".to_string(),
        });
    }

    let workers = match request.mode {
        RunMode::Sequential => 1,
        RunMode::Parallel => io::writer_count(request.jobs, config.processing.io_worker_ceiling),
    };

    tracing::info!("Starting k-mer feature staging pipeline ({} mode)", request.mode);
    tracing::info!("Available CPU cores: {}", num_cpus::get());
    tracing::info!("Using parallel jobs: {} ({} split writers)", request.jobs, workers);
    tracing::info!("Processing: {}", source.display());
    tracing::info!("Output: {}", request.output);

    let metrics = Metrics::new();

    // Staging must finish before any split task starts
    let start = Instant::now();
    ws.prepare_feature_dir()?;
    if !ws.code_dir.is_dir() {
        return Err(PipelineError::Environment {
            path: ws.code_dir.clone(),
            reason: "counter code directory does not exist".to_string(),
        });
    }
    ws.stage()?;
    metrics.add_stage_time(Stage::Prepare, start.elapsed());

    let splitter = SequenceSplitter::new(
        SplitOptions {
            marker: config.workspace.record_marker,
            extension: config.workspace.extension.clone(),
            workers,
        },
        metrics.clone(),
    );
    let split = splitter.split_file(&source, &ws.input_dir)?;

    let start = Instant::now();
    let manifest = build_manifest(
        &ws.input_dir,
        &config.workspace.extension,
        &config.workspace.manifest_name,
        &[ws.feature_dir.as_path(), ws.code_dir.as_path()],
        split.files_written,
    )?;
    metrics.add_stage_time(Stage::Manifest, start.elapsed());
    tracing::info!("Successfully prepared {} sequence files", manifest.len());

    let collector = config.collector.commands(request.mode);
    let orchestrator = Orchestrator::new(
        CountingStage {
            command: config.counter.command(request.mode).clone(),
            workdir: ws.code_dir.clone(),
        },
        CollectionStage {
            build: collector.build.clone(),
            command: collector.run.clone(),
            workdir: ws.feature_dir.clone(),
            artifact_name: config.collector.artifact_name.clone(),
        },
        metrics.clone(),
    );
    let artifact = orchestrator.run(&request.output, &ws.data_dir)?;

    let snapshot = metrics.snapshot();
    tracing::info!("Pipeline complete: {}", snapshot);

    Ok(RunSummary {
        mode: request.mode,
        records: manifest.len(),
        workers,
        artifact,
        metrics: snapshot,
    })
}
