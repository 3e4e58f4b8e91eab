//! Compiler diagnostics.
//!
//! One error type for every pipeline stage, matching the `file:line:column:
//! message` format the driver prints on stderr. Every stage returns
//! `Result<T, CompileError>`; there is no recovery and no partial output.

use std::fmt;
use std::path::{Path, PathBuf};

/// Which pipeline stage raised the error. Used only for `Debug` output and
/// by tests that want to assert on *what kind* of failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Lex,
    Parse,
    Name,
    Type,
    Initializer,
    Io,
}

/// A 1-based source position. Columns and lines are 1-based for display,
/// matching the `file:line:column:` convention; internally the scanner
/// tracks them 0-based and adds 1 when building a `SourceLocation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: PathBuf,
    pub line: usize,
    pub column: usize,
}

impl SourceLocation {
    pub fn new(file: impl Into<PathBuf>, line: usize, column: usize) -> Self {
        SourceLocation {
            file: file.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file.display(), self.line, self.column)
    }
}

/// A fatal compilation error. The compiler never tries to recover from one
/// of these: the first error wins and the process exits non-zero.
#[derive(Debug)]
pub struct CompileError {
    pub stage: Stage,
    pub location: Option<SourceLocation>,
    pub message: String,
}

impl CompileError {
    pub fn new(stage: Stage, location: Option<SourceLocation>, message: impl Into<String>) -> Self {
        CompileError {
            stage,
            location,
            message: message.into(),
        }
    }

    pub fn lex(location: SourceLocation, message: impl Into<String>) -> Self {
        Self::new(Stage::Lex, Some(location), message)
    }

    pub fn parse(location: SourceLocation, message: impl Into<String>) -> Self {
        Self::new(Stage::Parse, Some(location), message)
    }

    pub fn name(location: SourceLocation, message: impl Into<String>) -> Self {
        Self::new(Stage::Name, Some(location), message)
    }

    pub fn ty(location: SourceLocation, message: impl Into<String>) -> Self {
        Self::new(Stage::Type, Some(location), message)
    }

    pub fn initializer(location: SourceLocation, message: impl Into<String>) -> Self {
        Self::new(Stage::Initializer, Some(location), message)
    }

    pub fn io(path: &Path, message: impl Into<String>) -> Self {
        CompileError {
            stage: Stage::Io,
            location: None,
            message: format!("{}: {}", path.display(), message.into()),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{}: {}", loc, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for CompileError {}

pub type Result<T> = std::result::Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_location() {
        let err = CompileError::parse(
            SourceLocation::new("foo.c", 3, 5),
            "expected ';'",
        );
        assert_eq!(err.to_string(), "foo.c:3:5: expected ';'");
    }

    #[test]
    fn io_error_has_no_location_prefix() {
        let err = CompileError::io(Path::new("missing.c"), "No such file or directory");
        assert_eq!(err.to_string(), "missing.c: No such file or directory");
    }
}
