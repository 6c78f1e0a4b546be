//! Repository tree walking and prompt assembly.
//!
//! [`walk`] visits the files under a root in deterministic depth-first,
//! lexicographic order. `.git` directories are pruned before descent and
//! never reach the filter. [`ingest_tree`] drives the walk through the
//! estimator and the [`PromptDocument`], reporting one
//! [`ProgressEvent::ProcessingFile`] per relevant file.

use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::error::{PipelineError, Result};
use crate::estimate;
use crate::filter::{extension_of, TreeFilter};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::prompt::PromptDocument;

/// Name of the version-control metadata directory that is never descended into.
pub const VCS_DIR: &str = ".git";

/// A relevant file found by the walker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCandidate {
    /// Path relative to the walk root, `/`-separated.
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub extension: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WalkOptions {
    pub follow_symlinks: bool,
    /// Files larger than this are skipped without being read.
    pub max_file_bytes: u64,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            follow_symlinks: false,
            max_file_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Counters for one ingestion pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub files_seen: usize,
    pub files_included: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub words_included: usize,
}

fn is_vcs_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir() && entry.file_name() == VCS_DIR
}

/// Visit every relevant file under `root`, in order.
///
/// Fails only when the root itself cannot be read. Errors on entries below
/// the root are logged and the walk moves on.
pub fn walk<F>(root: &Path, filter: &TreeFilter, follow_symlinks: bool, mut on_file: F) -> Result<()>
where
    F: FnMut(FileCandidate),
{
    let meta = std::fs::metadata(root).map_err(|e| PipelineError::filesystem(root, e))?;
    if !meta.is_dir() {
        return Err(PipelineError::filesystem(
            root,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "walk root is not a directory"),
        ));
    }

    let walker = WalkDir::new(root)
        .follow_links(follow_symlinks)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_vcs_dir(e));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("walk root unreadable"));
                return Err(PipelineError::filesystem(root, source));
            }
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if !filter.accepts(&rel_str) {
            continue;
        }

        let extension = entry
            .file_name()
            .to_str()
            .and_then(extension_of)
            .map(str::to_string);

        on_file(FileCandidate {
            relative_path: rel_str,
            absolute_path: path.to_path_buf(),
            extension,
        });
    }

    Ok(())
}

/// Walk `root` and pack relevant files into `doc` until the budget runs out.
///
/// Every relevant file gets a `ProcessingFile` event, whether or not it
/// ends up in the document. Files that cannot be read are logged and
/// skipped.
pub fn ingest_tree(
    root: &Path,
    filter: &TreeFilter,
    options: &WalkOptions,
    doc: &mut PromptDocument,
    reporter: &dyn ProgressReporter,
) -> Result<IngestSummary> {
    let mut summary = IngestSummary::default();

    walk(root, filter, options.follow_symlinks, |candidate| {
        summary.files_seen += 1;
        tracing::debug!(path = %candidate.relative_path, "processing");
        reporter.report(ProgressEvent::ProcessingFile {
            path: candidate.relative_path.clone(),
        });

        let too_large = std::fs::metadata(&candidate.absolute_path)
            .map(|m| m.len() > options.max_file_bytes)
            .unwrap_or(false);
        if too_large {
            tracing::info!(path = %candidate.relative_path, "skipping file over size limit");
            summary.files_skipped += 1;
            return;
        }

        let measured = match estimate::measure(&candidate.absolute_path) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable file");
                summary.files_failed += 1;
                return;
            }
        };

        if doc.try_append(&candidate.relative_path, &measured.content, measured.words) {
            summary.files_included += 1;
            summary.words_included += measured.words;
        } else {
            tracing::debug!(
                path = %candidate.relative_path,
                words = measured.words,
                remaining = doc.remaining(),
                "over budget, skipped"
            );
            summary.files_skipped += 1;
        }
    })?;

    Ok(summary)
}
