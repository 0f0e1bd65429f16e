//! Error types for the LaTeX to Futhark compiler

use serde::Serialize;
use thiserror::Error;

/// Result type for compilation operations
pub type CompileResult<T> = Result<T, CompileError>;

/// Fatal compilation errors
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Grammar error: {message}")]
    Grammar { message: String },

    #[error("Matrix shape error: row {row} has {found} columns, expected {expected}")]
    MatrixShape {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("Unhandled construct ({construct}): {latex}")]
    UnhandledConstruct { construct: String, latex: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Compiler thread error: {message}")]
    Thread { message: String },
}

impl CompileError {
    pub fn grammar(msg: impl Into<String>) -> Self {
        CompileError::Grammar { message: msg.into() }
    }

    pub fn matrix_shape(row: usize, expected: usize, found: usize) -> Self {
        CompileError::MatrixShape { row, expected, found }
    }

    pub fn unhandled(construct: impl Into<String>, latex: impl Into<String>) -> Self {
        CompileError::UnhandledConstruct {
            construct: construct.into(),
            latex: latex.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        CompileError::Config { message: msg.into() }
    }

    pub fn thread(msg: impl Into<String>) -> Self {
        CompileError::Thread { message: msg.into() }
    }
}

/// Kind of a non-fatal finding recorded during code generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiagnosticKind {
    /// No lowering rule exists; an inert placeholder was emitted
    UnhandledConstruct,
    /// Scalar/array typing was ambiguous and defaulted to scalar
    TypeInferenceFallback,
}

/// A non-fatal finding attached to the generated program
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// Short name of the construct, e.g. "indefinite integral"
    pub construct: String,
    /// Canonical LaTeX of the offending sub-expression
    pub latex: String,
}

impl Diagnostic {
    pub fn unhandled(construct: impl Into<String>, latex: impl Into<String>) -> Self {
        Self {
            kind: DiagnosticKind::UnhandledConstruct,
            construct: construct.into(),
            latex: latex.into(),
        }
    }

    pub fn fallback(construct: impl Into<String>, latex: impl Into<String>) -> Self {
        Self {
            kind: DiagnosticKind::TypeInferenceFallback,
            construct: construct.into(),
            latex: latex.into(),
        }
    }

    pub fn is_unhandled(&self) -> bool {
        self.kind == DiagnosticKind::UnhandledConstruct
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            DiagnosticKind::UnhandledConstruct => {
                write!(f, "unhandled {}: {}", self.construct, self.latex)
            }
            DiagnosticKind::TypeInferenceFallback => {
                write!(f, "type fallback ({}): {}", self.construct, self.latex)
            }
        }
    }
}

