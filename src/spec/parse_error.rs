// Copyright 2025 Cowboy AI, LLC.

//! Shared parse error type for both sub-grammars.

use thiserror::Error;

/// A parse failure, carrying enough to report one precise location.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{file}:{line}:{col}: {message}\n  {snippet}")]
pub struct ParseError {
    pub file: String,
    pub line: usize,
    pub col: usize,
    pub message: String,
    pub snippet: String,
}

impl ParseError {
    pub fn new(file: &str, line: usize, col: usize, message: impl Into<String>, snippet: impl Into<String>) -> Self {
        Self {
            file: file.to_string(),
            line,
            col,
            message: message.into(),
            snippet: snippet.into(),
        }
    }
}

/// A non-fatal diagnostic: empty sections emit a warning, not an error.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseWarning {
    pub file: String,
    pub line: usize,
    pub message: String,
}
