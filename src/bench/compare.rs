//! Artifact comparison between the two benchmark runs.
//!
//! Differences are informational: they are annotated in the report and never
//! fail the benchmark.

use serde::Serialize;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Lines compared at the head of each artifact.
pub const HEAD_LINES: usize = 3;

/// Size, line count and leading lines of one artifact.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactStats {
    pub path: PathBuf,
    pub bytes: u64,
    pub lines: usize,
    /// First lines, surrounding whitespace trimmed
    pub head: Vec<String>,
}

impl ArtifactStats {
    /// Read stats for `path`, keeping up to `head_lines` leading lines.
    pub fn read(path: &Path, head_lines: usize) -> io::Result<Self> {
        let file = File::open(path)?;
        let bytes = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut buf = Vec::new();
        let mut lines = 0;
        let mut head = Vec::with_capacity(head_lines);
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            lines += 1;
            if head.len() < head_lines {
                head.push(String::from_utf8_lossy(&buf).trim().to_string());
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            bytes,
            lines,
            head,
        })
    }
}

/// One informational difference between the artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mismatch {
    Size { sequential: u64, parallel: u64 },
    LineCount { sequential: usize, parallel: usize },
    HeadLine { line: usize },
}

impl std::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mismatch::Size { sequential, parallel } => {
                write!(f, "sizes differ: {sequential} vs {parallel} bytes")
            }
            Mismatch::LineCount { sequential, parallel } => {
                write!(f, "line counts differ: {sequential} vs {parallel}")
            }
            Mismatch::HeadLine { line } => write!(f, "line {line} differs"),
        }
    }
}

/// Result of comparing the sequential and parallel artifacts.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactComparison {
    pub sequential: ArtifactStats,
    pub parallel: ArtifactStats,
    /// Per-line equality of the leading lines, over the shorter head
    pub head_matches: Vec<bool>,
    pub mismatches: Vec<Mismatch>,
}

impl ArtifactComparison {
    /// Whether no difference was found.
    pub fn is_match(&self) -> bool {
        self.mismatches.is_empty()
    }

    /// Absolute size difference in bytes.
    pub fn size_difference(&self) -> u64 {
        self.sequential.bytes.abs_diff(self.parallel.bytes)
    }
}

/// Compare two artifacts by size, line count and their first [`HEAD_LINES`] lines.
pub fn compare_artifacts(sequential: &Path, parallel: &Path) -> io::Result<ArtifactComparison> {
    let sequential = ArtifactStats::read(sequential, HEAD_LINES)?;
    let parallel = ArtifactStats::read(parallel, HEAD_LINES)?;

    let head_matches: Vec<bool> = sequential
        .head
        .iter()
        .zip(&parallel.head)
        .map(|(a, b)| a == b)
        .collect();

    let mut mismatches = Vec::new();
    if sequential.bytes != parallel.bytes {
        mismatches.push(Mismatch::Size {
            sequential: sequential.bytes,
            parallel: parallel.bytes,
        });
    }
    if sequential.lines != parallel.lines {
        mismatches.push(Mismatch::LineCount {
            sequential: sequential.lines,
            parallel: parallel.lines,
        });
    }
    mismatches.extend(
        head_matches
            .iter()
            .enumerate()
            .filter(|(_, matched)| !**matched)
            .map(|(i, _)| Mismatch::HeadLine { line: i + 1 }),
    );

    Ok(ArtifactComparison {
        sequential,
        parallel,
        head_matches,
        mismatches,
    })
}
