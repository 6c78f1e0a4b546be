//! Size estimation for prompt budgeting.
//!
//! The unit is **whitespace-delimited words** over the file's bytes decoded
//! as lossy UTF-8. It approximates, but does not reproduce, the generation
//! backend's own token accounting; the prompt ceiling is expressed in the
//! same unit.

use std::path::Path;

use crate::error::{PipelineError, Result};

/// A file read once for both measurement and inclusion.
#[derive(Debug, Clone)]
pub struct Measured {
    pub content: String,
    pub words: usize,
}

/// Count whitespace-delimited words.
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Read `path` and measure its content.
pub fn measure(path: &Path) -> Result<Measured> {
    let bytes = std::fs::read(path).map_err(|e| PipelineError::filesystem(path, e))?;
    let content = String::from_utf8_lossy(&bytes).into_owned();
    let words = count_words(&content);
    Ok(Measured { content, words })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn counts_words_across_whitespace_kinds() {
        assert_eq!(count_words(""), 0);
        assert_eq!(count_words("   \n\t "), 0);
        assert_eq!(count_words("package main"), 2);
        assert_eq!(count_words("func main() {\n\tfmt.Println(\"hi\")\n}\n"), 5);
        assert_eq!(count_words("a\r\nb\u{00a0}c"), 3);
    }

    #[test]
    fn measure_reads_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.go");
        std::fs::write(&path, "one two\nthree").unwrap();

        let measured = measure(&path).unwrap();
        assert_eq!(measured.words, 3);
        assert_eq!(measured.content, "one two\nthree");
    }

    #[test]
    fn measure_tolerates_invalid_utf8() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bin.c");
        std::fs::write(&path, [b'a', b' ', 0xff, 0xfe, b' ', b'b']).unwrap();

        let measured = measure(&path).unwrap();
        assert_eq!(measured.words, 3);
    }

    #[test]
    fn measure_missing_file_is_filesystem_error() {
        let tmp = TempDir::new().unwrap();
        let err = measure(&tmp.path().join("missing.go")).unwrap_err();
        assert!(matches!(err, PipelineError::Filesystem { .. }));
    }
}
