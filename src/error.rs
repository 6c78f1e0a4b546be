//! Error taxonomy for the ingestion session.
//!
//! Uses `thiserror` for the domain errors that cross collaborator
//! boundaries. Application edges (config loading, CLI, server startup) keep
//! using `anyhow`.
//!
//! | Variant | Scope | Effect |
//! |---------|-------|--------|
//! | `Connection` | progress channel read fails | session ends |
//! | `Fetch` | clone fails or repository name is unusable | iteration aborted |
//! | `Filesystem` | unreadable root or file | file skipped / iteration aborted for root |
//! | `Backend` | generation or storage returns a failure | iteration aborted |
//! | `Configuration` | missing credential or bad setting | iteration aborted before the request |
//! | `WorkspaceCollision` | working directory cannot be re-created | session ends |
//!
//! Running out of prompt budget is not an error: `PromptDocument::try_append`
//! simply returns `false`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{service} request failed: {message}")]
    Backend {
        service: &'static str,
        message: String,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("working directory collision at {}", .0.display())]
    WorkspaceCollision(PathBuf),
}

impl PipelineError {
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Filesystem {
            path: path.into(),
            source,
        }
    }

    pub fn backend(service: &'static str, message: impl Into<String>) -> Self {
        PipelineError::Backend {
            service,
            message: message.into(),
        }
    }

    /// Whether this error ends the whole session rather than one iteration.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::Connection(_) | PipelineError::WorkspaceCollision(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(PipelineError::Connection("reset".into()).is_fatal());
        assert!(PipelineError::WorkspaceCollision(PathBuf::from("/tmp/x")).is_fatal());
        assert!(!PipelineError::Fetch("no such repo".into()).is_fatal());
        assert!(!PipelineError::backend("generation", "HTTP 500").is_fatal());
        assert!(!PipelineError::Configuration("missing key".into()).is_fatal());
    }

    #[test]
    fn display_includes_context() {
        let err = PipelineError::filesystem(
            "/repo/a.go",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/repo/a.go"));
        assert!(msg.contains("denied"));

        let err = PipelineError::backend("storage", "HTTP 403");
        assert_eq!(err.to_string(), "storage request failed: HTTP 403");
    }
}
