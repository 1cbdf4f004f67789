//! Splitting a multi-record sequence file into one file per record.
//!
//! Records are numbered in source order before any write is dispatched, so
//! file names never depend on which worker finishes first. Each write task
//! owns exactly one target file and reports its own outcome; the stage
//! aggregates those outcomes into a single success or failure.

use rayon::prelude::*;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::error::{PipelineError, Result, Stage};
use crate::pipeline::Metrics;

/// One record of the source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceRecord {
    /// 1-based position among the non-empty records of the source
    pub ordinal: usize,

    /// Record text following the marker (header line and body)
    pub payload: String,
}

impl SequenceRecord {
    /// Deterministic file name for this record: `seq<ordinal>.<ext>`.
    pub fn file_name(&self, extension: &str) -> String {
        format!("seq{}.{}", self.ordinal, extension)
    }
}

/// Parse `content` into records separated by `marker`.
///
/// Anything before the first marker is discarded, as are fragments that are
/// empty or whitespace-only. Survivors are numbered 1..=R in source order.
pub fn parse_records(content: &str, marker: char) -> Vec<SequenceRecord> {
    content
        .split(marker)
        .skip(1)
        .filter(|fragment| !fragment.trim().is_empty())
        .enumerate()
        .map(|(i, fragment)| SequenceRecord {
            ordinal: i + 1,
            payload: fragment.to_string(),
        })
        .collect()
}

/// Number of writer threads for a job limit: `min(jobs, ceiling)`, at least 1.
pub fn writer_count(jobs: usize, ceiling: usize) -> usize {
    jobs.min(ceiling).max(1)
}

/// Settings for one split invocation.
#[derive(Debug, Clone)]
pub struct SplitOptions {
    /// Record marker character
    pub marker: char,

    /// Extension of the written files
    pub extension: String,

    /// Writer threads in the pool
    pub workers: usize,
}

/// Outcome of a successful split.
#[derive(Debug, Clone)]
pub struct SplitSummary {
    /// Files written, one per surviving record
    pub files_written: usize,

    /// Total bytes written
    pub bytes_written: u64,

    /// Writer threads used
    pub workers: usize,
}

/// A file written by one split task.
#[derive(Debug)]
struct WrittenFile {
    path: PathBuf,
    bytes: u64,
}

/// Parallel sequence splitter.
pub struct SequenceSplitter {
    options: SplitOptions,
    metrics: Arc<Metrics>,
}

impl SequenceSplitter {
    /// Create a new splitter.
    pub fn new(options: SplitOptions, metrics: Arc<Metrics>) -> Self {
        Self { options, metrics }
    }

    /// Read `source` and write one file per record into `dest_dir`.
    ///
    /// `dest_dir` must exist and must not already contain any of the target
    /// names; the directory stager guarantees both.
    pub fn split_file(&self, source: &Path, dest_dir: &Path) -> Result<SplitSummary> {
        tracing::info!("Reading and splitting sequence file: {}", source.display());

        let content = fs::read_to_string(source)
            .map_err(|e| PipelineError::io(Stage::Split, format!("reading {}", source.display()), e))?;

        let records = parse_records(&content, self.options.marker);
        tracing::info!("Found {} records to write", records.len());

        self.write_records(&records, dest_dir)
    }

    /// Write `records` into `dest_dir` on a bounded worker pool.
    ///
    /// If any write fails, every file this call managed to write is removed
    /// again before the first failure (by ordinal) is returned.
    pub fn write_records(&self, records: &[SequenceRecord], dest_dir: &Path) -> Result<SplitSummary> {
        let start = Instant::now();
        let workers = self.options.workers.max(1);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("split-writer-{i}"))
            .build()
            .map_err(|e| PipelineError::StageInvariant {
                stage: Stage::Split,
                reason: format!("failed to build writer pool: {e}"),
            })?;

        let outcomes: Vec<Result<WrittenFile>> = pool.install(|| {
            records
                .par_iter()
                .map(|record| self.write_record(record, dest_dir))
                .collect()
        });

        let (written, failures): (Vec<_>, Vec<_>) = outcomes.into_iter().partition(|o| o.is_ok());
        let written: Vec<WrittenFile> = written.into_iter().filter_map(|o| o.ok()).collect();

        if let Some(first) = failures.into_iter().find_map(|o| o.err()) {
            let failed = records.len() - written.len();
            tracing::error!(
                "{} of {} record writes failed; removing {} files already written",
                failed,
                records.len(),
                written.len()
            );
            remove_written(&written);
            return Err(first);
        }

        // Counted only once the whole stage has succeeded
        for file in &written {
            self.metrics.add_record_written(file.bytes);
        }
        let bytes_written = written.iter().map(|w| w.bytes).sum();
        self.metrics.add_stage_time(Stage::Split, start.elapsed());

        tracing::info!(
            "Wrote {} record files ({} bytes) with {} writers in {:.2}s",
            written.len(),
            bytes_written,
            workers,
            start.elapsed().as_secs_f64()
        );

        Ok(SplitSummary {
            files_written: written.len(),
            bytes_written,
            workers,
        })
    }

    /// Write a single record. Runs on a pool thread.
    fn write_record(&self, record: &SequenceRecord, dest_dir: &Path) -> Result<WrittenFile> {
        let path = dest_dir.join(record.file_name(&self.options.extension));
        let context = || format!("writing {}", path.display());

        // create_new: a name collision means the workspace was not staged
        let file: File = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                self.metrics.add_write_failure();
                PipelineError::io(Stage::Split, context(), e)
            })?;

        let mut writer = BufWriter::new(file);
        let mut buf = [0u8; 4];
        let marker = self.options.marker.encode_utf8(&mut buf);

        let result = writer
            .write_all(marker.as_bytes())
            .and_then(|()| writer.write_all(record.payload.as_bytes()))
            .and_then(|()| writer.flush());

        if let Err(e) = result {
            self.metrics.add_write_failure();
            drop(writer);
            let _ = fs::remove_file(&path);
            return Err(PipelineError::io(Stage::Split, context(), e));
        }

        let bytes = (marker.len() + record.payload.len()) as u64;
        tracing::debug!("Wrote {} ({} bytes)", path.display(), bytes);

        Ok(WrittenFile { path, bytes })
    }
}

fn remove_written(written: &[WrittenFile]) {
    for file in written {
        if let Err(e) = fs::remove_file(&file.path) {
            tracing::warn!("Failed to remove {}: {}", file.path.display(), e);
        }
    }
}
