//! Repository materialization.
//!
//! The [`Cloner`] trait is the seam between the session and version
//! control: given a source identifier and a destination directory, it leaves
//! the repository's tree in `<dest>/<repository_name(source)>`. [`GitCloner`]
//! shells out to `git clone`.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::config::CloneConfig;
use crate::error::{PipelineError, Result};

#[async_trait]
pub trait Cloner: Send + Sync {
    /// Materialize `source` inside `dest`. Returns the clone log on success.
    async fn materialize(&self, source: &str, dest: &Path) -> Result<String>;
}

/// Clones with the `git` binary.
pub struct GitCloner {
    shallow: bool,
    timeout: Duration,
}

impl GitCloner {
    pub fn new(config: &CloneConfig) -> Self {
        Self {
            shallow: config.shallow,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait]
impl Cloner for GitCloner {
    async fn materialize(&self, source: &str, dest: &Path) -> Result<String> {
        if source.starts_with('-') {
            return Err(PipelineError::Fetch(format!(
                "refusing to clone '{}': not a repository location",
                source
            )));
        }

        let mut cmd = Command::new("git");
        cmd.arg("clone");
        if self.shallow {
            cmd.args(["--depth", "1"]);
        }
        cmd.arg("--").arg(source);
        cmd.current_dir(dest)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                PipelineError::Fetch(format!(
                    "git clone timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| {
                PipelineError::Fetch(format!(
                    "failed to execute 'git clone' (is git installed?): {}",
                    e
                ))
            })?;

        let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
        log.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(PipelineError::Fetch(format!(
                "git clone failed: {}",
                log.trim()
            )));
        }

        Ok(log)
    }
}

/// Directory name a clone of `source` lands in.
///
/// `https://github.com/org/docengine.git` → `docengine`,
/// `git@github.com:org/docengine` → `docengine`,
/// `/srv/repos/docengine/.git` → `docengine`.
pub fn repository_name(source: &str) -> Result<String> {
    let mut trimmed = source.trim().trim_end_matches('/');
    // git names the clone after the directory holding a bare `.git` path.
    if let Some(parent) = trimmed.strip_suffix("/.git") {
        trimmed = parent.trim_end_matches('/');
    }
    let last = trimmed
        .rsplit(['/', ':'])
        .next()
        .unwrap_or("");
    let name = last.strip_suffix(".git").unwrap_or(last);

    if name.is_empty() || name == "." || name == ".." || name.contains('\\') {
        return Err(PipelineError::Fetch(format!(
            "cannot derive a repository name from '{}'",
            source
        )));
    }

    Ok(name.to_string())
}
