//! Configuration for the k-mer staging pipeline.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result as PipelineResult};

/// Main configuration for the staging pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Workspace layout
    #[serde(default)]
    pub workspace: WorkspaceConfig,

    /// External k-mer counting stage
    #[serde(default)]
    pub counter: CounterConfig,

    /// External feature collection stage
    #[serde(default)]
    pub collector: CollectorConfig,

    /// Processing configuration
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Benchmark harness settings
    #[serde(default)]
    pub benchmark: BenchmarkConfig,
}

/// Which pipeline variant to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Pooled splitting and the parallel external tools
    #[default]
    Parallel,
    /// Single-worker splitting and the sequential external tools
    Sequential,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Parallel => f.write_str("parallel"),
            RunMode::Sequential => f.write_str("sequential"),
        }
    }
}

/// An external command: program plus arguments.
///
/// A program containing a path separator is resolved against the working
/// directory of the stage that runs it; a bare name is looked up on `PATH`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Program to execute
    pub program: String,

    /// Arguments passed to the program
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Create a command from a program and its arguments.
    pub fn new<S: Into<String>>(program: impl Into<String>, args: impl IntoIterator<Item = S>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// The command line as a single display string.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Workspace layout configuration.
///
/// ```text
/// <root>/<data_dir>/                                  sources and final artifacts
/// <root>/<feature dir>/                               collector working directory
/// <root>/<feature dir>/<analyzer_dir>/<code_dir>/     counter working directory
/// <root>/<feature dir>/<analyzer_dir>/<input_dir>/    split records + manifest
/// <root>/<feature dir>/<analyzer_dir>/<output_dir>/<k>mer/
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Base directory everything else is resolved against
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Directory holding source files and receiving artifacts
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Pristine feature directory copied when a custom feature dir is requested
    #[serde(default = "default_template_dir")]
    pub template_dir: String,

    /// Analyzer directory inside the feature dir
    #[serde(default = "default_analyzer_dir")]
    pub analyzer_dir: String,

    /// Counter code directory inside the analyzer dir
    #[serde(default = "default_code_dir")]
    pub code_dir: String,

    /// Split-record directory inside the analyzer dir
    #[serde(default = "default_input_dir")]
    pub input_dir: String,

    /// Counter output directory inside the analyzer dir
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// k-mer lengths; one `<k>mer` output subdirectory each
    #[serde(default = "default_kmer_sizes")]
    pub kmer_sizes: Vec<usize>,

    /// Character introducing each record in the source file
    #[serde(default = "default_record_marker")]
    pub record_marker: char,

    /// Extension of split record files (without the dot)
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Manifest file name
    #[serde(default = "default_manifest_name")]
    pub manifest_name: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            data_dir: default_data_dir(),
            template_dir: default_template_dir(),
            analyzer_dir: default_analyzer_dir(),
            code_dir: default_code_dir(),
            input_dir: default_input_dir(),
            output_dir: default_output_dir(),
            kmer_sizes: default_kmer_sizes(),
            record_marker: default_record_marker(),
            extension: default_extension(),
            manifest_name: default_manifest_name(),
        }
    }
}

/// External counting stage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterConfig {
    /// Counter used by the parallel variant
    #[serde(default = "default_parallel_counter")]
    pub parallel: CommandSpec,

    /// Counter used by the sequential variant
    #[serde(default = "default_sequential_counter")]
    pub sequential: CommandSpec,
}

impl CounterConfig {
    /// The counter command for a run mode.
    pub fn command(&self, mode: RunMode) -> &CommandSpec {
        match mode {
            RunMode::Parallel => &self.parallel,
            RunMode::Sequential => &self.sequential,
        }
    }
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            parallel: default_parallel_counter(),
            sequential: default_sequential_counter(),
        }
    }
}

/// Build and run commands for one collector variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorCommands {
    /// Commands run in order before the collector (e.g. compilation)
    #[serde(default)]
    pub build: Vec<CommandSpec>,

    /// The collector itself
    pub run: CommandSpec,
}

/// External collection stage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Collector used by the parallel variant
    #[serde(default = "default_parallel_collector")]
    pub parallel: CollectorCommands,

    /// Collector used by the sequential variant
    #[serde(default = "default_sequential_collector")]
    pub sequential: CollectorCommands,

    /// Fixed name of the artifact the collector writes in its working directory
    #[serde(default = "default_artifact_name")]
    pub artifact_name: String,
}

impl CollectorConfig {
    /// The collector commands for a run mode.
    pub fn commands(&self, mode: RunMode) -> &CollectorCommands {
        match mode {
            RunMode::Parallel => &self.parallel,
            RunMode::Sequential => &self.sequential,
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            parallel: default_parallel_collector(),
            sequential: default_sequential_collector(),
            artifact_name: default_artifact_name(),
        }
    }
}

/// Processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Maximum parallel jobs (null = 80% of available processors)
    #[serde(default)]
    pub jobs: Option<usize>,

    /// Upper bound on split writer threads regardless of `jobs`
    #[serde(default = "default_io_worker_ceiling")]
    pub io_worker_ceiling: usize,

    /// Print the metrics summary after a run
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Optional path to save metrics JSON after run completes
    #[serde(default)]
    pub metrics_output_path: Option<String>,
}

impl ProcessingConfig {
    /// Configured job count, falling back to the processor-derived default.
    pub fn effective_jobs(&self) -> usize {
        self.jobs.unwrap_or_else(default_jobs)
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            jobs: None,
            io_worker_ceiling: default_io_worker_ceiling(),
            enable_metrics: true,
            metrics_output_path: None,
        }
    }
}

/// Benchmark harness configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    /// Source file (under the data dir) both variants process
    #[serde(default = "default_bench_filename")]
    pub filename: String,

    /// Artifact name of the sequential run
    #[serde(default = "default_sequential_output")]
    pub sequential_output: String,

    /// Artifact name of the parallel run
    #[serde(default = "default_parallel_output")]
    pub parallel_output: String,

    /// Feature dir of the sequential run
    #[serde(default = "default_sequential_featuredir")]
    pub sequential_featuredir: String,

    /// Feature dir of the parallel run
    #[serde(default = "default_parallel_featuredir")]
    pub parallel_featuredir: String,

    /// Cap on the parallel run's job count
    #[serde(default = "default_bench_max_jobs")]
    pub max_jobs: usize,

    /// Characters of each run's stdout echoed in the report
    #[serde(default = "default_output_tail_chars")]
    pub output_tail_chars: usize,

    /// Optional path to save the report as JSON
    #[serde(default)]
    pub report_path: Option<String>,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            filename: default_bench_filename(),
            sequential_output: default_sequential_output(),
            parallel_output: default_parallel_output(),
            sequential_featuredir: default_sequential_featuredir(),
            parallel_featuredir: default_parallel_featuredir(),
            max_jobs: default_bench_max_jobs(),
            output_tail_chars: default_output_tail_chars(),
            report_path: None,
        }
    }
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => {
                // Try YAML first (it's a superset of JSON)
                serde_yaml::from_str(&contents)?
            }
        };
        Ok(config)
    }

    /// Load configuration from `path`, or use defaults when it does not exist.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            tracing::info!("Loading configuration from {}", path.display());
            Self::from_file(path)
        } else {
            tracing::debug!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> PipelineResult<()> {
        let ws = &self.workspace;

        for (field, value) in [
            ("workspace.data_dir", &ws.data_dir),
            ("workspace.template_dir", &ws.template_dir),
            ("workspace.analyzer_dir", &ws.analyzer_dir),
            ("workspace.code_dir", &ws.code_dir),
            ("workspace.input_dir", &ws.input_dir),
            ("workspace.output_dir", &ws.output_dir),
            ("workspace.manifest_name", &ws.manifest_name),
            ("collector.artifact_name", &self.collector.artifact_name),
        ] {
            require_file_name(field, value)?;
        }

        if ws.input_dir == ws.output_dir || ws.input_dir == ws.code_dir || ws.output_dir == ws.code_dir {
            return Err(invalid("code, input and output directories must be distinct"));
        }
        if ws.kmer_sizes.is_empty() {
            return Err(invalid("at least one k-mer size is required"));
        }
        if ws.kmer_sizes.contains(&0) {
            return Err(invalid("k-mer sizes must be > 0"));
        }
        let mut sizes = ws.kmer_sizes.clone();
        sizes.sort_unstable();
        sizes.dedup();
        if sizes.len() != ws.kmer_sizes.len() {
            return Err(invalid("k-mer sizes must be unique"));
        }
        if ws.record_marker.is_whitespace() {
            return Err(invalid("record marker must not be whitespace"));
        }
        if ws.extension.is_empty() || ws.extension.contains('.') || ws.extension.contains('/') {
            return Err(invalid("extension must be non-empty and contain no '.' or '/'"));
        }
        if self.processing.io_worker_ceiling == 0 {
            return Err(invalid("io_worker_ceiling must be > 0"));
        }
        if self.processing.jobs == Some(0) {
            return Err(invalid("jobs must be > 0"));
        }

        for (variant, command) in [("parallel", &self.counter.parallel), ("sequential", &self.counter.sequential)] {
            if command.program.is_empty() {
                return Err(invalid(format!("counter.{variant}.program is empty")));
            }
        }
        for (variant, commands) in [("parallel", &self.collector.parallel), ("sequential", &self.collector.sequential)] {
            if commands.run.program.is_empty() || commands.build.iter().any(|b| b.program.is_empty()) {
                return Err(invalid(format!("collector.{variant} has an empty program")));
            }
        }
        if self.benchmark.max_jobs == 0 {
            return Err(invalid("benchmark.max_jobs must be > 0"));
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> PipelineError {
    PipelineError::Configuration(reason.into())
}

/// Check that a value is a single path component (no separators, not empty).
pub(crate) fn require_file_name(field: &str, value: &str) -> PipelineResult<()> {
    if value.is_empty() || value == "." || value == ".." || value.contains('/') || value.contains('\\') {
        return Err(invalid(format!("{field} must be a plain file name, got '{value}'")));
    }
    Ok(())
}

/// Default job count: 80% of available processors, at least one.
pub fn default_jobs() -> usize {
    (num_cpus::get() * 4 / 5).max(1)
}

// Default value functions for serde
fn default_root() -> PathBuf { PathBuf::from(".") }
fn default_data_dir() -> String { "data".to_string() }
fn default_template_dir() -> String { "features".to_string() }
fn default_analyzer_dir() -> String { "kanalyze-2.0.0".to_string() }
fn default_code_dir() -> String { "code".to_string() }
fn default_input_dir() -> String { "input_data".to_string() }
fn default_output_dir() -> String { "output_data".to_string() }
fn default_kmer_sizes() -> Vec<usize> { vec![2, 3, 4] }
fn default_record_marker() -> char { '>' }
fn default_extension() -> String { "fasta".to_string() }
fn default_manifest_name() -> String { "list.txt".to_string() }
fn default_artifact_name() -> String { "feature_file.csv".to_string() }
fn default_io_worker_ceiling() -> usize { 32 }
fn default_true() -> bool { true }
fn default_bench_filename() -> String { "demo.fasta".to_string() }
fn default_sequential_output() -> String { "demo_original.csv".to_string() }
fn default_parallel_output() -> String { "demo_parallel.csv".to_string() }
fn default_sequential_featuredir() -> String { "demo_features_original".to_string() }
fn default_parallel_featuredir() -> String { "demo_features_parallel".to_string() }
fn default_bench_max_jobs() -> usize { 50 }
fn default_output_tail_chars() -> usize { 500 }

fn default_parallel_counter() -> CommandSpec {
    CommandSpec::new("./runKanalyzer_parallel", Vec::<String>::new())
}

fn default_sequential_counter() -> CommandSpec {
    CommandSpec::new("./runKanalyzer", Vec::<String>::new())
}

fn default_parallel_collector() -> CollectorCommands {
    CollectorCommands {
        build: vec![
            CommandSpec::new("javac", ["ParallelKmersFeaturesCollector.java"]),
            CommandSpec::new("javac", ["BufferReaderAndWriter.java"]),
        ],
        run: CommandSpec::new("java", ["ParallelKmersFeaturesCollector"]),
    }
}

fn default_sequential_collector() -> CollectorCommands {
    CollectorCommands {
        build: vec![
            CommandSpec::new("javac", ["KmersFeaturesCollector.java"]),
            CommandSpec::new("javac", ["BufferReaderAndWriter.java"]),
        ],
        run: CommandSpec::new("java", ["KmersFeaturesCollector"]),
    }
}
