//! Relevance filtering for repository files.
//!
//! [`ExtensionFilter`] decides whether a file holds source text worth sending
//! to the generation backend: a case-sensitive allow-list of extension
//! suffixes, plus a short list of extension-less build files (matched
//! case-insensitively on the whole file name).
//!
//! [`TreeFilter`] adds optional glob exclusions on top, matched against the
//! `/`-separated path relative to the repository root.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;

/// Extensions accepted when no configuration overrides them.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    ".go", ".py", ".html", ".js", ".jsx", ".ts", ".tsx", ".css", ".java", ".cpp", ".c", ".rb",
    ".sh",
];

/// Extension-less file names accepted when no configuration overrides them.
pub const DEFAULT_BUILD_FILES: &[&str] = &["Dockerfile"];

#[derive(Debug, Clone)]
pub struct ExtensionFilter {
    extensions: Vec<String>,
    build_files: Vec<String>,
}

impl Default for ExtensionFilter {
    fn default() -> Self {
        Self::new(
            DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()),
            DEFAULT_BUILD_FILES.iter().map(|s| s.to_string()),
        )
    }
}

impl ExtensionFilter {
    pub fn new(
        extensions: impl IntoIterator<Item = String>,
        build_files: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            extensions: extensions.into_iter().collect(),
            build_files: build_files.into_iter().collect(),
        }
    }

    /// Returns `true` if the file at `path` should be ingested.
    ///
    /// Never fails: names that are not valid UTF-8, have no extension, or are
    /// bare dotfiles (`.go`) are rejected unless they are a build file.
    pub fn is_relevant(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };

        if self
            .build_files
            .iter()
            .any(|build| build.eq_ignore_ascii_case(name))
        {
            return true;
        }

        match extension_of(name) {
            Some(ext) => self.extensions.iter().any(|allowed| allowed == ext),
            None => false,
        }
    }
}

/// Final `.suffix` of a file name, including the dot. A leading dot alone
/// does not start an extension.
pub fn extension_of(name: &str) -> Option<&str> {
    let idx = name.rfind('.')?;
    if idx == 0 {
        return None;
    }
    Some(&name[idx..])
}

/// Extension filter plus optional path exclusions.
#[derive(Debug, Clone)]
pub struct TreeFilter {
    extensions: ExtensionFilter,
    excludes: Option<GlobSet>,
}

impl TreeFilter {
    pub fn new(extensions: ExtensionFilter, exclude_globs: &[String]) -> Result<Self> {
        let excludes = if exclude_globs.is_empty() {
            None
        } else {
            Some(build_globset(exclude_globs)?)
        };
        Ok(Self {
            extensions,
            excludes,
        })
    }

    pub fn extensions(&self) -> &ExtensionFilter {
        &self.extensions
    }

    /// Relevance of a file given its path relative to the walk root.
    pub fn accepts(&self, relative: &str) -> bool {
        if let Some(ref excludes) = self.excludes {
            if excludes.is_match(relative) {
                return false;
            }
        }
        self.extensions.is_relevant(Path::new(relative))
    }
}

impl Default for TreeFilter {
    fn default() -> Self {
        Self {
            extensions: ExtensionFilter::default(),
            excludes: None,
        }
    }
}

pub fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relevant(name: &str) -> bool {
        ExtensionFilter::default().is_relevant(Path::new(name))
    }

    #[test]
    fn accepts_allowed_extensions() {
        assert!(relevant("main.go"));
        assert!(relevant("src/app.tsx"));
        assert!(relevant("scripts/deploy.sh"));
        assert!(relevant("lib/util.c"));
    }

    #[test]
    fn extensions_are_case_sensitive() {
        assert!(!relevant("MAIN.GO"));
        assert!(!relevant("App.Py"));
    }

    #[test]
    fn rejects_unknown_and_missing_extensions() {
        assert!(!relevant("README.md"));
        assert!(!relevant("Makefile"));
        assert!(!relevant("archive.tar.gz"));
        assert!(!relevant("noext"));
    }

    #[test]
    fn only_final_suffix_counts() {
        assert!(relevant("bundle.min.js"));
        assert!(!relevant("main.go.bak"));
    }

    #[test]
    fn bare_dotfile_is_not_an_extension() {
        assert!(!relevant(".go"));
        assert!(!relevant("dir/.sh"));
    }

    #[test]
    fn build_file_is_case_insensitive() {
        assert!(relevant("Dockerfile"));
        assert!(relevant("DOCKERFILE"));
        assert!(relevant("deploy/dockerfile"));
        assert!(!relevant("Dockerfile.dev"));
    }

    #[test]
    fn custom_lists() {
        let filter = ExtensionFilter::new(vec![".rs".to_string()], vec!["Justfile".to_string()]);
        assert!(filter.is_relevant(Path::new("src/lib.rs")));
        assert!(filter.is_relevant(Path::new("justfile")));
        assert!(!filter.is_relevant(Path::new("main.go")));
        assert!(!filter.is_relevant(Path::new("Dockerfile")));
    }

    #[test]
    fn extension_of_edges() {
        assert_eq!(extension_of("a.go"), Some(".go"));
        assert_eq!(extension_of("a."), Some("."));
        assert_eq!(extension_of(".bashrc"), None);
        assert_eq!(extension_of("plain"), None);
    }

    #[test]
    fn tree_filter_excludes_globs() {
        let filter = TreeFilter::new(
            ExtensionFilter::default(),
            &["vendor/**".to_string(), "**/*_test.go".to_string()],
        )
        .unwrap();
        assert!(filter.accepts("cmd/main.go"));
        assert!(!filter.accepts("vendor/lib/x.go"));
        assert!(!filter.accepts("pkg/x_test.go"));
        assert!(!filter.accepts("docs/README.md"));
    }

    #[test]
    fn tree_filter_rejects_bad_glob() {
        assert!(TreeFilter::new(ExtensionFilter::default(), &["a[".to_string()]).is_err());
    }
}
