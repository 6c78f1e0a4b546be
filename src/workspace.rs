//! Per-connection working directory.
//!
//! A [`WorkingArea`] is the only place a session writes to disk. Each
//! connection acquires its own `<root>/<uuid>` directory, resets it to empty
//! before every iteration, and removes it when the area is dropped.

use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::{PipelineError, Result};

#[derive(Debug)]
pub struct WorkingArea {
    path: PathBuf,
}

impl WorkingArea {
    /// Create a fresh, uniquely named directory under `root`.
    pub fn acquire(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root).map_err(|e| PipelineError::filesystem(root, e))?;
        let path = root.join(Uuid::new_v4().to_string());
        create_fresh(&path)?;
        tracing::debug!(path = %path.display(), "working area acquired");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where a repository named `name` is materialized.
    pub fn repo_dir(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Tear down everything from the previous iteration and start empty.
    pub fn reset(&mut self) -> Result<()> {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                // Something other than our directory now holds the name.
                if std::fs::symlink_metadata(&self.path).is_ok_and(|m| !m.is_dir()) {
                    return Err(PipelineError::WorkspaceCollision(self.path.clone()));
                }
                return Err(PipelineError::filesystem(&self.path, e));
            }
        }
        create_fresh(&self.path)
    }
}

fn create_fresh(path: &Path) -> Result<()> {
    match std::fs::create_dir(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(PipelineError::WorkspaceCollision(path.to_path_buf()))
        }
        Err(e) => Err(PipelineError::filesystem(path, e)),
    }
}

impl Drop for WorkingArea {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove working area");
            }
        }
    }
}
