//! Timed, independent execution of the two pipeline variants.
//!
//! Each variant runs as its own process, one after the other, so neither
//! competes with the other for processors. A failing run is recorded and
//! the harness moves on; the report is always produced.

use serde::{Serialize, Serializer};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use super::compare::{compare_artifacts, ArtifactComparison};

/// One pipeline invocation to time.
#[derive(Debug, Clone)]
pub struct BenchmarkRun {
    /// Human-readable name used in logs and the report
    pub label: String,

    /// Program to execute
    pub program: PathBuf,

    /// Program arguments
    pub args: Vec<String>,

    /// Working directory of the child
    pub cwd: PathBuf,

    /// Artifact the run is expected to produce
    pub artifact: PathBuf,
}

impl BenchmarkRun {
    /// The invocation as a single display string.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Outcome of one timed invocation.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub label: String,
    pub command: String,
    #[serde(serialize_with = "serialize_system_time")]
    pub started_at: SystemTime,
    #[serde(serialize_with = "serialize_system_time")]
    pub finished_at: SystemTime,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub success: bool,
    /// None when the process could not be started or was killed by a signal
    pub exit_code: Option<i32>,
    pub artifact: PathBuf,
    /// Size of the artifact, if it exists after the run
    pub artifact_bytes: Option<u64>,
    pub stdout_tail: String,
    pub stderr: String,
}

/// Run `run` to completion and time it. Never fails: spawn errors and
/// non-zero exits are recorded in the returned outcome.
pub fn run_timed(run: &BenchmarkRun, tail_chars: usize) -> PipelineRun {
    let command = run.command_line();
    tracing::info!("Running: {}", run.label);
    tracing::info!("Command: {}", command);

    let started_at = SystemTime::now();
    let start = Instant::now();
    let result = Command::new(&run.program)
        .args(&run.args)
        .current_dir(&run.cwd)
        .output();
    let elapsed = start.elapsed();
    let finished_at = SystemTime::now();

    let (success, exit_code, stdout, stderr) = match result {
        Ok(output) => (
            output.status.success(),
            output.status.code(),
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ),
        Err(e) => (false, None, String::new(), format!("could not be started: {e}")),
    };

    if success {
        tracing::info!("{} completed successfully in {:.2} seconds", run.label, elapsed.as_secs_f64());
    } else {
        tracing::error!("{} failed after {:.2} seconds", run.label, elapsed.as_secs_f64());
        if !stderr.trim().is_empty() {
            tracing::error!("Stderr: {}", stderr.trim_end());
        }
    }

    let artifact_bytes = fs::metadata(&run.artifact)
        .ok()
        .filter(|m| m.is_file())
        .map(|m| m.len());
    match artifact_bytes {
        Some(bytes) => tracing::info!("{} output: {} ({} bytes)", run.label, run.artifact.display(), bytes),
        None => tracing::warn!("{} output: {} (not found)", run.label, run.artifact.display()),
    }

    PipelineRun {
        label: run.label.clone(),
        command,
        started_at,
        finished_at,
        elapsed,
        success,
        exit_code,
        artifact: run.artifact.clone(),
        artifact_bytes,
        stdout_tail: tail(&stdout, tail_chars),
        stderr,
    }
}

/// Last `n` characters of `s`.
fn tail(s: &str, n: usize) -> String {
    let skip = s.chars().count().saturating_sub(n);
    s.chars().skip(skip).collect()
}

/// `sequential / parallel` wall time.
pub fn speedup(sequential_secs: f64, parallel_secs: f64) -> f64 {
    sequential_secs / parallel_secs
}

/// Fraction of the ideal speedup on `processors` processors.
pub fn efficiency(speedup: f64, processors: usize) -> f64 {
    speedup / processors.max(1) as f64
}

/// Count record markers in a source file.
pub fn count_records(path: &Path, marker: char) -> io::Result<usize> {
    Ok(fs::read_to_string(path)?.matches(marker).count())
}

/// Timing comparison of two successful runs.
#[derive(Debug, Clone, Serialize)]
pub struct Performance {
    pub sequential_secs: f64,
    pub parallel_secs: f64,
    pub speedup: f64,
    pub time_saved_secs: f64,
    pub efficiency_percent: f64,
    pub processors: usize,
}

impl Performance {
    /// Compare two runs; `None` unless both succeeded.
    pub fn from_runs(sequential: &PipelineRun, parallel: &PipelineRun, processors: usize) -> Option<Self> {
        if !(sequential.success && parallel.success) {
            return None;
        }
        let sequential_secs = sequential.elapsed.as_secs_f64();
        let parallel_secs = parallel.elapsed.as_secs_f64();
        let speedup = speedup(sequential_secs, parallel_secs);

        Some(Self {
            sequential_secs,
            parallel_secs,
            speedup,
            time_saved_secs: sequential_secs - parallel_secs,
            efficiency_percent: efficiency(speedup, processors) * 100.0,
            processors,
        })
    }

    /// Whether the parallel run beat the sequential one.
    pub fn parallel_is_faster(&self) -> bool {
        self.speedup > 1.0
    }
}

/// Everything the harness measured.
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    pub source: PathBuf,
    pub records: usize,
    pub processors: usize,
    pub sequential: PipelineRun,
    pub parallel: PipelineRun,
    /// Present when both artifacts exist
    pub comparison: Option<ArtifactComparison>,
    pub comparison_error: Option<String>,
    /// Present when both runs succeeded
    pub performance: Option<Performance>,
}

impl BenchmarkReport {
    /// Save the report to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Benchmark report saved to {}", path);
        Ok(())
    }
}

impl std::fmt::Display for BenchmarkReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rule = "=".repeat(60);
        writeln!(f, "{rule}")?;
        writeln!(f, "BENCHMARK: {}", self.source.display())?;
        writeln!(f, "{rule}")?;
        writeln!(f, "Available CPU cores: {}", self.processors)?;
        writeln!(f, "Number of sequences: {}", self.records)?;

        for run in [&self.sequential, &self.parallel] {
            writeln!(f)?;
            writeln!(f, "--- {} ---", run.label)?;
            writeln!(f, "Command: {}", run.command)?;
            let status = if run.success { "ok" } else { "FAILED" };
            writeln!(f, "Status: {} after {:.2} seconds", status, run.elapsed.as_secs_f64())?;
            if let Some(code) = run.exit_code.filter(|_| !run.success) {
                writeln!(f, "Exit code: {code}")?;
            }
            match run.artifact_bytes {
                Some(bytes) => writeln!(f, "Output: {} ({} bytes)", run.artifact.display(), bytes)?,
                None => writeln!(f, "Output: {} (not found)", run.artifact.display())?,
            }
            if !run.stdout_tail.trim().is_empty() {
                writeln!(f, "Output tail: {}", run.stdout_tail.trim_end())?;
            }
            if !run.success && !run.stderr.trim().is_empty() {
                writeln!(f, "Stderr: {}", run.stderr.trim_end())?;
            }
        }

        if let Some(comparison) = &self.comparison {
            writeln!(f)?;
            writeln!(f, "{rule}")?;
            writeln!(f, "OUTPUT COMPARISON")?;
            writeln!(f, "{rule}")?;
            writeln!(f, "Sequential file size: {} bytes", comparison.sequential.bytes)?;
            writeln!(f, "Parallel file size: {} bytes", comparison.parallel.bytes)?;
            writeln!(f, "Size difference: {} bytes", comparison.size_difference())?;
            writeln!(f, "Sequential lines: {}", comparison.sequential.lines)?;
            writeln!(f, "Parallel lines: {}", comparison.parallel.lines)?;
            writeln!(f, "First {} lines comparison:", comparison.head_matches.len())?;
            for (i, matched) in comparison.head_matches.iter().enumerate() {
                writeln!(f, "Line {}: {}", i + 1, if *matched { "match" } else { "differs" })?;
            }
            for mismatch in &comparison.mismatches {
                writeln!(f, "Note: {mismatch}")?;
            }
        } else if let Some(error) = &self.comparison_error {
            writeln!(f)?;
            writeln!(f, "Output comparison failed: {error}")?;
        }

        writeln!(f)?;
        writeln!(f, "{rule}")?;
        writeln!(f, "PERFORMANCE SUMMARY")?;
        writeln!(f, "{rule}")?;
        match &self.performance {
            Some(p) => {
                writeln!(f, "Sequential time:   {:.2} seconds", p.sequential_secs)?;
                writeln!(f, "Parallel time:     {:.2} seconds", p.parallel_secs)?;
                writeln!(f, "Speedup:           {:.2}x", p.speedup)?;
                writeln!(f, "Time saved:        {:.2} seconds", p.time_saved_secs)?;
                writeln!(f, "Efficiency:        {:.1}% of theoretical maximum", p.efficiency_percent)?;
                if p.parallel_is_faster() {
                    write!(f, "Parallel implementation is faster")
                } else {
                    write!(f, "Parallel implementation is slower (possibly due to overhead)")
                }
            }
            None => {
                write!(f, "Cannot compare performance due to failed executions")?;
                for run in [&self.sequential, &self.parallel] {
                    if !run.success {
                        write!(f, "\n  {} failed: {:.2} seconds", run.label, run.elapsed.as_secs_f64())?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// The two runs plus what the report needs to know about the source.
#[derive(Debug, Clone)]
pub struct Harness {
    pub source: PathBuf,
    pub records: usize,
    pub processors: usize,
    pub tail_chars: usize,
    pub sequential: BenchmarkRun,
    pub parallel: BenchmarkRun,
}

impl Harness {
    /// Remove artifacts left by an earlier benchmark.
    pub fn clean_artifacts(&self) {
        for artifact in [&self.sequential.artifact, &self.parallel.artifact] {
            match fs::remove_file(artifact) {
                Ok(()) => tracing::debug!("Removed stale artifact {}", artifact.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Failed to remove stale artifact {}: {}", artifact.display(), e),
            }
        }
    }

    /// Run both variants, sequential first, and build the report.
    pub fn run(&self) -> BenchmarkReport {
        self.clean_artifacts();

        let sequential = run_timed(&self.sequential, self.tail_chars);
        let parallel = run_timed(&self.parallel, self.tail_chars);

        let (comparison, comparison_error) = match (sequential.artifact_bytes, parallel.artifact_bytes) {
            (Some(_), Some(_)) => match compare_artifacts(&sequential.artifact, &parallel.artifact) {
                Ok(comparison) => (Some(comparison), None),
                Err(e) => {
                    tracing::warn!("Could not compare artifacts: {}", e);
                    (None, Some(e.to_string()))
                }
            },
            _ => (None, None),
        };

        let performance = Performance::from_runs(&sequential, &parallel, self.processors);

        BenchmarkReport {
            source: self.source.clone(),
            records: self.records,
            processors: self.processors,
            sequential,
            parallel,
            comparison,
            comparison_error,
            performance,
        }
    }
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

fn serialize_system_time<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let secs = time.duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0);
    serializer.serialize_f64(secs)
}
