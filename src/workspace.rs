//! Workspace layout resolution and directory staging.
//!
//! All paths are resolved to absolute paths once, up front. Every later stage
//! receives the directories it works in explicitly; nothing changes the
//! process working directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::WorkspaceConfig;
use crate::error::{PipelineError, Result, Stage};

/// Resolved, absolute workspace paths for one run.
#[derive(Debug, Clone)]
pub struct Workspace {
    /// Base directory
    pub root: PathBuf,

    /// Source files and final artifacts
    pub data_dir: PathBuf,

    /// Pristine feature directory
    pub template_dir: PathBuf,

    /// Feature directory for this run; the collector's working directory
    pub feature_dir: PathBuf,

    /// The counter's working directory
    pub code_dir: PathBuf,

    /// Split record files and the primary manifest
    pub input_dir: PathBuf,

    /// Counter output root
    pub output_dir: PathBuf,

    /// One output subdirectory per k-mer size, in configured order
    pub kmer_dirs: Vec<PathBuf>,
}

impl Workspace {
    /// Resolve the layout for the feature directory named `feature_dir`.
    ///
    /// # Errors
    /// Returns an environment error if the workspace root does not exist,
    /// and a configuration error if the feature dir would overlap the data
    /// dir (staging deletes the feature dir's contents).
    pub fn resolve(config: &WorkspaceConfig, feature_dir: &str) -> Result<Self> {
        let root = fs::canonicalize(&config.root).map_err(|e| PipelineError::Environment {
            path: config.root.clone(),
            reason: format!("workspace root is not accessible: {e}"),
        })?;

        let data_dir = root.join(&config.data_dir);
        let feature_dir = root.join(feature_dir);
        if data_dir.starts_with(&feature_dir) || feature_dir.starts_with(&data_dir) {
            return Err(PipelineError::Configuration(format!(
                "feature dir {} overlaps the data dir {}",
                feature_dir.display(),
                data_dir.display()
            )));
        }
        let analyzer_dir = feature_dir.join(&config.analyzer_dir);
        let output_dir = analyzer_dir.join(&config.output_dir);
        let kmer_dirs = config
            .kmer_sizes
            .iter()
            .map(|&k| output_dir.join(kmer_dir_name(k)))
            .collect();

        Ok(Self {
            data_dir,
            template_dir: root.join(&config.template_dir),
            code_dir: analyzer_dir.join(&config.code_dir),
            input_dir: analyzer_dir.join(&config.input_dir),
            output_dir,
            kmer_dirs,
            feature_dir,
            root,
        })
    }

    /// Whether this run uses a feature directory other than the template.
    pub fn uses_custom_feature_dir(&self) -> bool {
        self.feature_dir != self.template_dir
    }

    /// Replace the feature directory with a fresh copy of the template.
    ///
    /// No-op when the run uses the template directory itself.
    pub fn prepare_feature_dir(&self) -> Result<()> {
        if !self.uses_custom_feature_dir() {
            return Ok(());
        }
        if !self.template_dir.is_dir() {
            return Err(PipelineError::Environment {
                path: self.template_dir.clone(),
                reason: "feature template directory does not exist".to_string(),
            });
        }

        if self.feature_dir.exists() {
            fs::remove_dir_all(&self.feature_dir).map_err(|e| {
                PipelineError::io(Stage::Prepare, format!("removing {}", self.feature_dir.display()), e)
            })?;
        }

        let copied = copy_dir_recursive(&self.template_dir, &self.feature_dir).map_err(|e| {
            PipelineError::io(
                Stage::Prepare,
                format!("copying {} to {}", self.template_dir.display(), self.feature_dir.display()),
                e,
            )
        })?;

        tracing::info!(
            "Copied feature template {} -> {} ({} files)",
            self.template_dir.display(),
            self.feature_dir.display(),
            copied
        );
        Ok(())
    }

    /// Destroy and recreate the input, output and per-size output directories.
    ///
    /// Must finish before any split task starts. Idempotent: each call leaves
    /// the same empty layout behind.
    pub fn stage(&self) -> Result<()> {
        recreate_dir(&self.input_dir)?;
        recreate_dir(&self.output_dir)?;

        for dir in &self.kmer_dirs {
            fs::create_dir_all(dir)
                .map_err(|e| PipelineError::io(Stage::Prepare, format!("creating {}", dir.display()), e))?;
        }

        tracing::info!(
            "Staged workspace: input {}, output {} ({} k-mer dirs)",
            self.input_dir.display(),
            self.output_dir.display(),
            self.kmer_dirs.len()
        );
        Ok(())
    }
}

/// Name of the output subdirectory for k-mers of length `k`.
pub fn kmer_dir_name(k: usize) -> String {
    format!("{k}mer")
}

fn recreate_dir(path: &Path) -> Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
            .map_err(|e| PipelineError::io(Stage::Prepare, format!("removing {}", path.display()), e))?;
    }
    fs::create_dir_all(path)
        .map_err(|e| PipelineError::io(Stage::Prepare, format!("creating {}", path.display()), e))
}

/// Copy a directory tree, returning the number of files copied.
///
/// File permissions are carried over by `fs::copy`, so executables in the
/// template stay executable.
fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<usize> {
    fs::create_dir_all(dst)?;
    let mut copied = 0;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            copied += copy_dir_recursive(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}
