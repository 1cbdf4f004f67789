//! Sequential vs. parallel benchmark of the full pipeline.

mod compare;
mod harness;

pub use compare::{compare_artifacts, ArtifactComparison, ArtifactStats, Mismatch, HEAD_LINES};
pub use harness::{
    count_records, efficiency, run_timed, speedup, BenchmarkReport, BenchmarkRun, Harness, Performance, PipelineRun,
};

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::config::{Config, RunMode};

/// Plan a benchmark that invokes `exe` (this binary) once per variant.
///
/// Relative workspace paths are resolved against `cwd`, which is also the
/// working directory of both child processes.
pub fn plan(config: &Config, exe: &Path, config_path: &Path, cwd: &Path, processors: usize) -> Result<Harness> {
    let bench = &config.benchmark;
    let data_dir = cwd.join(&config.workspace.root).join(&config.workspace.data_dir);
    let source = data_dir.join(&bench.filename);
    if !source.is_file() {
        bail!(
            "Benchmark source {} not found; place {} in {}",
            source.display(),
            bench.filename,
            data_dir.display()
        );
    }

    let records = count_records(&source, config.workspace.record_marker)
        .with_context(|| format!("reading {}", source.display()))?;

    let parallel_jobs = config.processing.effective_jobs().min(bench.max_jobs);
    let invocation = |mode: RunMode, output: &str, featuredir: &str, jobs: usize| -> Vec<String> {
        vec![
            "--config".to_string(),
            config_path.display().to_string(),
            "run".to_string(),
            "--mode".to_string(),
            mode.to_string(),
            "--filename".to_string(),
            bench.filename.clone(),
            "--output".to_string(),
            output.to_string(),
            "--featuredir".to_string(),
            featuredir.to_string(),
            "--jobs".to_string(),
            jobs.to_string(),
        ]
    };

    Ok(Harness {
        source,
        records,
        processors,
        tail_chars: bench.output_tail_chars,
        sequential: BenchmarkRun {
            label: "Sequential".to_string(),
            program: exe.to_path_buf(),
            args: invocation(RunMode::Sequential, &bench.sequential_output, &bench.sequential_featuredir, 1),
            cwd: cwd.to_path_buf(),
            artifact: data_dir.join(&bench.sequential_output),
        },
        parallel: BenchmarkRun {
            label: "Parallel".to_string(),
            program: exe.to_path_buf(),
            args: invocation(RunMode::Parallel, &bench.parallel_output, &bench.parallel_featuredir, parallel_jobs),
            cwd: cwd.to_path_buf(),
            artifact: data_dir.join(&bench.parallel_output),
        },
    })
}
