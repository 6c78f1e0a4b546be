//! Session progress reporting.
//!
//! Each pipeline step is described by a [`ProgressEvent`]. Events are handed
//! to a [`ProgressReporter`], which delivers them best-effort and in order:
//! a failed delivery is logged and never stops the pipeline.
//!
//! Events only become text at the edge. [`ProgressEvent::to_frame`] renders
//! the plain UTF-8 frame sent to WebSocket clients; the final frame of every
//! iteration is exactly `"Done"`.

use std::io::Write;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Pipeline stage named in failure events.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    Configuration,
    Workspace,
    Clone,
    Ingest,
    Generate,
    Store,
}

impl Stage {
    fn describe(self) -> &'static str {
        match self {
            Stage::Configuration => "checking the configuration",
            Stage::Workspace => "preparing the working directory",
            Stage::Clone => "cloning the repo",
            Stage::Ingest => "reading the repo",
            Stage::Generate => "generating the documentation",
            Stage::Store => "uploading the content",
        }
    }
}

/// A single step of one session iteration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProgressEvent {
    SessionStarted { source: String },
    CloneStarted,
    CloneCompleted { log: String },
    RepositoryIdentified { name: String },
    ProcessingFile { path: String },
    PreparingSubmission,
    SubmissionCompleted,
    Stored { key: String },
    OverviewStarted,
    OverviewFailed { reason: String },
    Completed { location: String },
    Failed { stage: Stage, reason: String },
    Done,
}

impl ProgressEvent {
    /// Stable tag for the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::SessionStarted { .. } => "session_started",
            ProgressEvent::CloneStarted => "clone_started",
            ProgressEvent::CloneCompleted { .. } => "clone_completed",
            ProgressEvent::RepositoryIdentified { .. } => "repository_identified",
            ProgressEvent::ProcessingFile { .. } => "processing_file",
            ProgressEvent::PreparingSubmission => "preparing_submission",
            ProgressEvent::SubmissionCompleted => "submission_completed",
            ProgressEvent::Stored { .. } => "stored",
            ProgressEvent::OverviewStarted => "overview_started",
            ProgressEvent::OverviewFailed { .. } => "overview_failed",
            ProgressEvent::Completed { .. } => "completed",
            ProgressEvent::Failed { .. } => "failed",
            ProgressEvent::Done => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Done)
    }

    /// Plain-text wire frame.
    pub fn to_frame(&self) -> String {
        match self {
            ProgressEvent::SessionStarted { source } => format!("Processing the repo {}", source),
            ProgressEvent::CloneStarted => "Cloning the repo".to_string(),
            ProgressEvent::CloneCompleted { log } => {
                let log = log.trim();
                if log.is_empty() {
                    "Clone complete".to_string()
                } else {
                    log.to_string()
                }
            }
            ProgressEvent::RepositoryIdentified { name } => format!("Repo Name {}", name),
            ProgressEvent::ProcessingFile { path } => format!("Processing File {}", path),
            ProgressEvent::PreparingSubmission => "Preparing the documentation".to_string(),
            ProgressEvent::SubmissionCompleted => "Artifacts generated".to_string(),
            ProgressEvent::Stored { key } => format!("File saved successfully ({})", key),
            ProgressEvent::OverviewStarted => "Generating System Overview".to_string(),
            ProgressEvent::OverviewFailed { reason } => {
                format!("Error Generating System Overview: {}", reason)
            }
            ProgressEvent::Completed { location } => format!("Go to Url : {}", location),
            ProgressEvent::Failed { stage, reason } => {
                format!("Error {}: {}", stage.describe(), reason)
            }
            ProgressEvent::Done => "Done".to_string(),
        }
    }
}

/// Delivers progress events. Implementations must not block on the
/// receiving side and must not fail.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Queues events on an unbounded channel drained by the transport's writer.
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelReporter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressReporter for ChannelReporter {
    fn report(&self, event: ProgressEvent) {
        let kind = event.kind();
        if self.tx.send(event).is_err() {
            tracing::warn!(kind, "progress channel closed, event dropped");
        }
    }
}

/// Human-readable progress on stderr, one frame per line.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = format!("{}\n", event.to_frame());
        let mut stderr = std::io::stderr().lock();
        // Progress is best-effort; a closed stderr must not stop the walk.
        if let Err(e) = stderr.write_all(line.as_bytes()).and_then(|()| stderr.flush()) {
            tracing::debug!(error = %e, "progress line not written");
        }
    }
}

/// Keeps every event in memory, in emission order.
#[derive(Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn frames(&self) -> Vec<String> {
        self.events().iter().map(ProgressEvent::to_frame).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl ProgressReporter for RecordingReporter {
    fn report(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_frame_is_exact() {
        assert_eq!(ProgressEvent::Done.to_frame(), "Done");
        assert!(ProgressEvent::Done.is_terminal());
        assert!(!ProgressEvent::CloneStarted.is_terminal());
    }

    #[test]
    fn frames_carry_details() {
        let frame = ProgressEvent::ProcessingFile {
            path: "cmd/main.go".into(),
        }
        .to_frame();
        assert_eq!(frame, "Processing File cmd/main.go");

        let frame = ProgressEvent::Failed {
            stage: Stage::Clone,
            reason: "repository not found".into(),
        }
        .to_frame();
        assert_eq!(frame, "Error cloning the repo: repository not found");

        let frame = ProgressEvent::CloneCompleted { log: "  \n".into() }.to_frame();
        assert_eq!(frame, "Clone complete");
    }

    #[test]
    fn channel_reporter_preserves_order() {
        let (reporter, mut rx) = ChannelReporter::new();
        reporter.report(ProgressEvent::CloneStarted);
        reporter.report(ProgressEvent::PreparingSubmission);
        reporter.report(ProgressEvent::Done);

        assert_eq!(rx.try_recv().unwrap(), ProgressEvent::CloneStarted);
        assert_eq!(rx.try_recv().unwrap(), ProgressEvent::PreparingSubmission);
        assert_eq!(rx.try_recv().unwrap(), ProgressEvent::Done);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn channel_reporter_survives_closed_receiver() {
        let (reporter, rx) = ChannelReporter::new();
        drop(rx);
        reporter.report(ProgressEvent::Done);
    }

    #[test]
    fn recording_reporter_collects_frames() {
        let reporter = RecordingReporter::new();
        reporter.report(ProgressEvent::RepositoryIdentified {
            name: "docengine".into(),
        });
        reporter.report(ProgressEvent::Done);
        assert_eq!(reporter.frames(), vec!["Repo Name docengine", "Done"]);
        reporter.clear();
        assert!(reporter.events().is_empty());
    }
}
