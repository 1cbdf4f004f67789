//! Manifest construction and publication.
//!
//! The manifest is the authoritative work list for both external stages:
//! one split file name per line, sorted ascending by byte value. Each
//! external tool reads it from its own working directory, so the manifest is
//! written once and then copied verbatim to every consumer.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result, Stage};

/// Sorted list of split file names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<String>,
}

impl Manifest {
    /// Build a manifest from the files in `dir` carrying `extension`.
    pub fn from_dir(dir: &Path, extension: &str) -> Result<Self> {
        let read_err = |e: std::io::Error| PipelineError::io(Stage::Manifest, format!("listing {}", dir.display()), e);

        let mut entries = Vec::new();
        for entry in fs::read_dir(dir).map_err(read_err)? {
            let entry = entry.map_err(read_err)?;
            if !entry.file_type().map_err(read_err)?.is_file() {
                continue;
            }

            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(extension) {
                continue;
            }

            let name = entry.file_name().into_string().map_err(|raw| PipelineError::StageInvariant {
                stage: Stage::Manifest,
                reason: format!("split file name is not valid UTF-8: {:?}", raw),
            })?;
            entries.push(name);
        }

        Ok(Self::from_entries(entries))
    }

    /// Build a manifest from arbitrary names; they are sorted and deduplicated.
    pub fn from_entries(mut entries: Vec<String>) -> Self {
        entries.sort();
        entries.dedup();
        Self { entries }
    }

    /// The sorted entries.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the manifest is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Manifest file contents: one name per line, newline-terminated.
    pub fn to_text(&self) -> String {
        let mut text = String::with_capacity(self.entries.iter().map(|e| e.len() + 1).sum());
        for entry in &self.entries {
            text.push_str(entry);
            text.push('\n');
        }
        text
    }

    /// Check the manifest against the number of files the splitter reported.
    pub fn verify_count(&self, expected: usize) -> Result<()> {
        if self.entries.len() != expected {
            return Err(PipelineError::StageInvariant {
                stage: Stage::Manifest,
                reason: format!(
                    "manifest lists {} files but the splitter wrote {}",
                    self.entries.len(),
                    expected
                ),
            });
        }
        Ok(())
    }

    /// Write the manifest as `name` into `primary_dir`, then copy that file
    /// into each of `copy_dirs`. Returns every published path, primary first.
    pub fn publish(&self, name: &str, primary_dir: &Path, copy_dirs: &[&Path]) -> Result<Vec<PathBuf>> {
        let primary = primary_dir.join(name);
        fs::write(&primary, self.to_text())
            .map_err(|e| PipelineError::io(Stage::Manifest, format!("writing {}", primary.display()), e))?;

        let mut published = vec![primary.clone()];
        for dir in copy_dirs {
            let target = dir.join(name);
            fs::copy(&primary, &target).map_err(|e| {
                PipelineError::io(
                    Stage::Manifest,
                    format!("copying {} to {}", primary.display(), target.display()),
                    e,
                )
            })?;
            published.push(target);
        }

        tracing::info!("Published manifest of {} files to {} locations", self.len(), published.len());
        Ok(published)
    }
}

/// List, verify and publish the manifest for a split input directory.
pub fn build_manifest(
    input_dir: &Path,
    extension: &str,
    name: &str,
    copy_dirs: &[&Path],
    expected: usize,
) -> Result<Manifest> {
    let manifest = Manifest::from_dir(input_dir, extension)?;
    manifest.verify_count(expected)?;
    manifest.publish(name, input_dir, copy_dirs)?;
    Ok(manifest)
}
