//! Staged output files
//!
//! Backends never write the requested output path directly. They write into a
//! private directory next to it, and the file is renamed into place only once
//! the tool reports success. Dropping an uncommitted stage deletes it.

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

use crate::error::{MetadataError, Result};

pub struct StagedOutput {
    dir: TempDir,
    staged: PathBuf,
    target: PathBuf,
}

impl StagedOutput {
    /// Prepare a stage for `target`; its parent directory must exist
    pub fn new(target: &Path) -> Result<Self> {
        let file_name = target.file_name().ok_or_else(|| {
            MetadataError::InvalidInput(format!("Output path has no file name: {}", target.display()))
        })?;
        let parent = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let dir = tempfile::Builder::new()
            .prefix(".video-meta-")
            .tempdir_in(&parent)?;
        // Same file name keeps the extension tools use to pick a muxer
        let staged = dir.path().join(file_name);

        Ok(Self {
            dir,
            staged,
            target: target.to_path_buf(),
        })
    }

    /// Where the backend should write
    pub fn path(&self) -> &Path {
        &self.staged
    }

    /// Move the staged file over the target
    pub fn commit(self) -> Result<PathBuf> {
        let written = std::fs::metadata(&self.staged).map(|m| m.len()).unwrap_or(0);
        if written == 0 {
            return Err(MetadataError::ExternalToolFailure(format!(
                "No output was produced for {}",
                self.target.display()
            )));
        }

        if cfg!(windows) && self.target.exists() {
            std::fs::remove_file(&self.target)?;
        }
        std::fs::rename(&self.staged, &self.target)?;
        debug!("Committed {} bytes to {}", written, self.target.display());

        // Directory is empty now; TempDir removes it on drop
        drop(self.dir);
        Ok(self.target)
    }
}
