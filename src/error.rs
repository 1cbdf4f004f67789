//! Error types for the staging pipeline.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// One atomic phase of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Workspace preparation (template copy and directory staging)
    Prepare,
    /// Splitting the source file into one file per record
    Split,
    /// Building and publishing the manifest
    Manifest,
    /// External k-mer counting
    Count,
    /// External feature collection and artifact relocation
    Collect,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Prepare => "staging",
            Stage::Split => "split",
            Stage::Manifest => "manifest",
            Stage::Count => "counting",
            Stage::Collect => "collection",
        };
        f.write_str(name)
    }
}

/// Error type for pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A required setting is missing or invalid
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A referenced input or executable is missing or unusable
    #[error("Environment error: {reason} ({})", .path.display())]
    Environment {
        /// The offending path or program
        path: PathBuf,
        /// Explanation of the problem
        reason: String,
    },

    /// Filesystem failure inside a stage
    #[error("{stage} stage failed: {context}")]
    StageIo {
        /// The stage that failed
        stage: Stage,
        /// What the stage was doing
        context: String,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// An external command could not be spawned or exited unsuccessfully
    #[error(
        "{stage} stage failed: `{command}` in {} {status}\n--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}",
        .cwd.display()
    )]
    StageCommand {
        /// The stage that failed
        stage: Stage,
        /// The command line as invoked
        command: String,
        /// Working directory the command ran in
        cwd: PathBuf,
        /// Exit status or spawn failure description
        status: String,
        /// Captured standard output
        stdout: String,
        /// Captured standard error
        stderr: String,
    },

    /// A stage finished but its outputs violate the boundary contract
    #[error("{stage} stage failed: {reason}")]
    StageInvariant {
        /// The stage that failed
        stage: Stage,
        /// Explanation of the violated contract
        reason: String,
    },
}

impl PipelineError {
    /// Build a [`PipelineError::StageIo`] with the given context.
    pub fn io(stage: Stage, context: impl Into<String>, source: std::io::Error) -> Self {
        PipelineError::StageIo { stage, context: context.into(), source }
    }

    /// The stage this error belongs to, if it is a stage failure.
    #[must_use]
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::StageIo { stage, .. }
            | PipelineError::StageCommand { stage, .. }
            | PipelineError::StageInvariant { stage, .. } => Some(*stage),
            PipelineError::Configuration(_) | PipelineError::Environment { .. } => None,
        }
    }

    /// True for errors raised while a stage was running.
    #[must_use]
    pub fn is_stage_failure(&self) -> bool {
        self.stage().is_some()
    }
}
