//! The per-connection session loop.
//!
//! A [`Session`] owns one [`WorkingArea`] and one [`PromptDocument`] and
//! processes repository requests strictly one at a time:
//!
//! ```text
//! Idle ──request──▶ Cloning ──▶ Ingesting ──▶ Submitting ──▶ Reporting ──▶ Idle
//!   │                  │             │              │              │
//!   └── "Stop" ────────┴─────────────┴──── fatal ───┴──────────────┴──▶ Aborted
//! ```
//!
//! Every iteration ends with exactly one [`ProgressEvent::Done`], whether it
//! succeeded or failed part-way. A failed step emits
//! [`ProgressEvent::Failed`] first and the session goes back to `Idle`,
//! except for working-directory collisions and connection read failures,
//! which end the session.
//!
//! The transport is abstracted behind [`Channel`] (inbound frames) and
//! [`ProgressReporter`] (outbound events) so the loop can run against a
//! WebSocket, a test script, or anything else that yields text frames.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::fetch::{repository_name, Cloner};
use crate::filter::{ExtensionFilter, TreeFilter};
use crate::generate::{overview_prompt, GenerationResult, Generator};
use crate::progress::{ProgressEvent, ProgressReporter, Stage};
use crate::prompt::PromptDocument;
use crate::storage::{document_key, overview_key, uri_encode, Storer, MARKDOWN, PLAIN_TEXT};
use crate::walker::{ingest_tree, IngestSummary, WalkOptions};
use crate::workspace::WorkingArea;

/// Inbound frame that ends the session.
pub const STOP_TOKEN: &str = "Stop";

/// Per-connection settings, built fresh for every connection.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub ceiling: usize,
    pub filter: TreeFilter,
    pub walk: WalkOptions,
    /// Base URL for the location reported on completion.
    pub public_url: String,
    /// Also request and store an overview diagram.
    pub overview: bool,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let extensions = ExtensionFilter::new(
            config.prompt.extensions.iter().cloned(),
            config.prompt.build_files.iter().cloned(),
        );
        Ok(Self {
            ceiling: config.prompt.budget_ceiling,
            filter: TreeFilter::new(extensions, &config.prompt.exclude_globs)?,
            walk: WalkOptions {
                follow_symlinks: config.prompt.follow_symlinks,
                max_file_bytes: config.prompt.max_file_bytes,
            },
            public_url: config.server.public_url.clone(),
            overview: config.generation.overview,
        })
    }

    /// Where the document for `repo` can be viewed.
    pub fn location_for(&self, repo: &str) -> String {
        format!(
            "{}/docs?repo={}",
            self.public_url.trim_end_matches('/'),
            uri_encode(&format!("{}.md", repo))
        )
    }
}

/// External services a session depends on. Shared across connections.
#[derive(Clone)]
pub struct Collaborators {
    pub cloner: Arc<dyn Cloner>,
    pub generator: Arc<dyn Generator>,
    pub storer: Arc<dyn Storer>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    Idle,
    Cloning,
    Ingesting,
    Submitting,
    Reporting,
    Aborted,
}

/// Source of inbound text frames.
#[async_trait]
pub trait Channel: Send {
    /// Next frame. `Ok(None)` when the peer closed the connection.
    async fn recv(&mut self) -> Result<Option<String>>;
}

/// Result of one iteration.
#[derive(Debug)]
pub enum IterationOutcome {
    Completed {
        repository: String,
        location: String,
        summary: IngestSummary,
        result: GenerationResult,
    },
    Failed {
        stage: Stage,
        error: PipelineError,
    },
}

impl IterationOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, IterationOutcome::Completed { .. })
    }
}

/// Why [`Session::run`] returned.
#[derive(Debug)]
pub enum SessionEnd {
    /// The peer closed the connection.
    Closed,
    /// The peer sent the stop token.
    Stopped,
    /// A fatal error ended the session.
    Aborted(PipelineError),
}

struct Completion {
    repository: String,
    location: String,
    summary: IngestSummary,
    result: GenerationResult,
}

type StepResult<T> = std::result::Result<T, (Stage, PipelineError)>;

fn at(stage: Stage) -> impl FnOnce(PipelineError) -> (Stage, PipelineError) {
    move |e| (stage, e)
}

pub struct Session {
    settings: SessionSettings,
    collaborators: Collaborators,
    reporter: Arc<dyn ProgressReporter>,
    area: WorkingArea,
    prompt: PromptDocument,
    state: SessionState,
}

impl Session {
    pub fn new(
        settings: SessionSettings,
        collaborators: Collaborators,
        reporter: Arc<dyn ProgressReporter>,
        area: WorkingArea,
    ) -> Self {
        let prompt = PromptDocument::new(settings.ceiling);
        Self {
            settings,
            collaborators,
            reporter,
            area,
            prompt,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The prompt assembled by the most recent iteration.
    pub fn prompt(&self) -> &PromptDocument {
        &self.prompt
    }

    fn emit(&self, event: ProgressEvent) {
        self.reporter.report(event);
    }

    /// Serve frames from `channel` until it closes, the stop token arrives,
    /// or a fatal error occurs.
    pub async fn run<C: Channel + ?Sized>(&mut self, channel: &mut C) -> SessionEnd {
        loop {
            let frame = match channel.recv().await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::debug!("peer closed the connection");
                    return SessionEnd::Closed;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "connection read failed, ending session");
                    self.state = SessionState::Aborted;
                    return SessionEnd::Aborted(e);
                }
            };

            let request = frame.trim();
            if request.is_empty() {
                tracing::debug!("ignoring empty frame");
                continue;
            }
            if request == STOP_TOKEN {
                tracing::info!("stop requested, ending session");
                self.state = SessionState::Aborted;
                return SessionEnd::Stopped;
            }

            if let IterationOutcome::Failed { error, .. } = self.run_iteration(request).await {
                if error.is_fatal() {
                    return SessionEnd::Aborted(error);
                }
            }
        }
    }

    /// Run one clone → ingest → submit → report cycle for `source`.
    ///
    /// Always emits exactly one `Done` event before returning.
    pub async fn run_iteration(&mut self, source: &str) -> IterationOutcome {
        tracing::info!(source, "starting iteration");
        self.emit(ProgressEvent::SessionStarted {
            source: source.to_string(),
        });

        let outcome = match self.execute(source).await {
            Ok(done) => {
                tracing::info!(
                    repository = %done.repository,
                    files = done.summary.files_included,
                    words = done.summary.words_included,
                    "iteration complete"
                );
                self.state = SessionState::Idle;
                IterationOutcome::Completed {
                    repository: done.repository,
                    location: done.location,
                    summary: done.summary,
                    result: done.result,
                }
            }
            Err((stage, error)) => {
                tracing::error!(stage = ?stage, error = %error, "iteration failed");
                self.state = SessionState::Reporting;
                self.emit(ProgressEvent::Failed {
                    stage,
                    reason: self.client_reason(&error),
                });
                self.state = if error.is_fatal() {
                    SessionState::Aborted
                } else {
                    SessionState::Idle
                };
                IterationOutcome::Failed { stage, error }
            }
        };

        self.emit(ProgressEvent::Done);
        outcome
    }

    async fn execute(&mut self, source: &str) -> StepResult<Completion> {
        self.state = SessionState::Cloning;

        // Refuse before touching anything when the backend cannot be called.
        self.collaborators
            .generator
            .ready()
            .map_err(at(Stage::Configuration))?;

        self.area.reset().map_err(at(Stage::Workspace))?;
        self.prompt.reset(self.settings.ceiling);

        self.emit(ProgressEvent::CloneStarted);
        let log = self
            .collaborators
            .cloner
            .materialize(source, self.area.path())
            .await
            .map_err(at(Stage::Clone))?;
        self.emit(ProgressEvent::CloneCompleted { log });

        let repository = repository_name(source).map_err(at(Stage::Clone))?;
        self.emit(ProgressEvent::RepositoryIdentified {
            name: repository.clone(),
        });

        self.state = SessionState::Ingesting;
        let root = self.area.repo_dir(&repository);
        let summary = self.ingest(root).await.map_err(at(Stage::Ingest))?;

        self.state = SessionState::Submitting;
        self.emit(ProgressEvent::PreparingSubmission);
        let document = self
            .collaborators
            .generator
            .generate(self.prompt.as_str())
            .await
            .map_err(at(Stage::Generate))?;
        self.emit(ProgressEvent::SubmissionCompleted);

        self.state = SessionState::Reporting;
        let key = document_key(&repository);
        self.collaborators
            .storer
            .put(&key, &document, MARKDOWN)
            .await
            .map_err(at(Stage::Store))?;
        self.emit(ProgressEvent::Stored { key });

        let overview = if self.settings.overview {
            self.overview(&repository, &document).await
        } else {
            None
        };

        let location = self.settings.location_for(&repository);
        self.emit(ProgressEvent::Completed {
            location: location.clone(),
        });

        Ok(Completion {
            repository,
            location,
            summary,
            result: GenerationResult { document, overview },
        })
    }

    /// Failure text for the client, with server paths cut down to the
    /// part below the working area.
    fn client_reason(&self, error: &PipelineError) -> String {
        let shown = |path: &Path| -> String {
            match path.strip_prefix(self.area.path()) {
                Ok(rel) if !rel.as_os_str().is_empty() => rel.display().to_string(),
                Ok(_) => "working directory".to_string(),
                Err(_) => path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            }
        };
        match error {
            PipelineError::Filesystem { path, source } => {
                format!("filesystem error at {}: {}", shown(path.as_path()), source)
            }
            PipelineError::WorkspaceCollision(_) => "working directory collision".to_string(),
            other => other.to_string(),
        }
    }

    /// Walk the materialized tree on the blocking pool.
    async fn ingest(&mut self, root: PathBuf) -> Result<IngestSummary> {
        let mut doc = std::mem::replace(&mut self.prompt, PromptDocument::new(self.settings.ceiling));
        let filter = self.settings.filter.clone();
        let options = self.settings.walk.clone();
        let reporter = Arc::clone(&self.reporter);
        let walk_root = root.clone();

        let joined = tokio::task::spawn_blocking(move || {
            let result = ingest_tree(&walk_root, &filter, &options, &mut doc, reporter.as_ref());
            (doc, result)
        })
        .await;

        match joined {
            Ok((doc, result)) => {
                self.prompt = doc;
                result
            }
            Err(e) => Err(PipelineError::filesystem(
                root,
                std::io::Error::other(format!("walk task failed: {}", e)),
            )),
        }
    }

    /// Generate and store the overview diagram. Failures are reported but
    /// do not fail the iteration.
    async fn overview(&self, repository: &str, document: &str) -> Option<String> {
        self.emit(ProgressEvent::OverviewStarted);

        let diagram = match self
            .collaborators
            .generator
            .generate(&overview_prompt(document))
            .await
        {
            Ok(diagram) => diagram,
            Err(e) => {
                tracing::warn!(error = %e, "overview generation failed");
                self.emit(ProgressEvent::OverviewFailed {
                    reason: e.to_string(),
                });
                return None;
            }
        };

        let key = overview_key(repository);
        match self
            .collaborators
            .storer
            .put(&key, &diagram, PLAIN_TEXT)
            .await
        {
            Ok(()) => {
                self.emit(ProgressEvent::Stored { key });
                Some(diagram)
            }
            Err(e) => {
                tracing::warn!(error = %e, "overview upload failed");
                self.emit(ProgressEvent::OverviewFailed {
                    reason: e.to_string(),
                });
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_joins_public_url() {
        let mut config = Config::default();
        config.server.public_url = "https://docs.example.com/".to_string();
        let settings = SessionSettings::from_config(&config).unwrap();
        assert_eq!(
            settings.location_for("docengine"),
            "https://docs.example.com/docs?repo=docengine.md"
        );
        assert_eq!(
            settings.location_for("my repo#1&x"),
            "https://docs.example.com/docs?repo=my%20repo%231%26x.md"
        );
    }

    #[test]
    fn settings_follow_config() {
        let mut config = Config::default();
        config.prompt.budget_ceiling = 42;
        config.prompt.exclude_globs = vec!["vendor/**".to_string()];
        config.generation.overview = false;
        let settings = SessionSettings::from_config(&config).unwrap();
        assert_eq!(settings.ceiling, 42);
        assert!(!settings.overview);
        assert!(!settings.filter.accepts("vendor/lib.go"));
        assert!(settings.filter.accepts("cmd/main.go"));
    }
}
