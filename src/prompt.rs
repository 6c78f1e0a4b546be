//! The size-bounded prompt document.
//!
//! [`PromptDocument`] owns the aggregate text sent to the generation
//! backend. It starts with a fixed instruction preamble, then accumulates one
//! record per accepted file:
//!
//! ```text
//! cmd/server/main.go
//! package main
//! ...
//!
//! ```
//!
//! A record is only appended when it fits: `consumed + size < ceiling`.
//! Rejected records leave the document untouched, and accepted records are
//! never removed or reordered. The preamble is not charged against the
//! ceiling.

/// Directive written at the top of every documentation prompt.
pub const DOCUMENTATION_PREAMBLE: &str = "\
Generate comprehensive documentation in markdown format for the following project. The documentation should include:
A Table of Contents that links to the different modules of the project.
An overview of each module with a brief description. Skip this for configuration files, and name modules by what they do rather than always by file name.
A broad overview of the key functions, including their purpose and examples of usage.
The steps users can follow to build, run, or deploy this project.
Any security vulnerabilities and possible bugs you can spot in the code.
";

#[derive(Debug, Clone)]
pub struct PromptDocument {
    preamble: &'static str,
    text: String,
    consumed: usize,
    ceiling: usize,
    entries: Vec<String>,
}

impl PromptDocument {
    pub fn new(ceiling: usize) -> Self {
        Self::with_preamble(DOCUMENTATION_PREAMBLE, ceiling)
    }

    pub fn with_preamble(preamble: &'static str, ceiling: usize) -> Self {
        Self {
            preamble,
            text: preamble.to_string(),
            consumed: 0,
            ceiling,
            entries: Vec::new(),
        }
    }

    /// Drop all records and start over from the preamble.
    pub fn reset(&mut self, ceiling: usize) {
        self.text.clear();
        self.text.push_str(self.preamble);
        self.consumed = 0;
        self.ceiling = ceiling;
        self.entries.clear();
    }

    /// Append `header` and `content` if `size` fits in the remaining budget.
    ///
    /// Returns `false` (and changes nothing) when it does not fit. Callers
    /// treat that as "skip this file", never as a failure.
    #[must_use]
    pub fn try_append(&mut self, header: &str, content: &str, size: usize) -> bool {
        match self.consumed.checked_add(size) {
            Some(total) if total < self.ceiling => {}
            _ => return false,
        }

        self.text.push_str(header);
        self.text.push('\n');
        for line in content.lines() {
            self.text.push_str(line);
            self.text.push('\n');
        }
        self.text.push('\n');

        self.consumed += size;
        self.entries.push(header.to_string());
        true
    }

    pub fn consumed(&self) -> usize {
        self.consumed
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn remaining(&self) -> usize {
        self.ceiling.saturating_sub(self.consumed)
    }

    /// Headers of accepted records, in append order.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }
}
