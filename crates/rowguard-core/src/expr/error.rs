//! Expression parse and evaluation errors.

use std::fmt;

use thiserror::Error;

/// A byte range in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// Start byte offset.
    pub start: usize,
    /// End byte offset (exclusive).
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

impl From<std::ops::Range<usize>> for Span {
    fn from(range: std::ops::Range<usize>) -> Self {
        Span::new(range.start, range.end)
    }
}

/// Error during lexing/parsing.
#[derive(Debug, Clone, PartialEq, Error)]
pub struct ParseError {
    /// The error message.
    pub message: String,
    /// Source span where the error occurred.
    pub span: Span,
}

impl ParseError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}", self.message, self.span.start)
    }
}

/// Errors raised while evaluating a predicate.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    /// Column reference was never bound to a table.
    #[error("column {0} is not bound")]
    UnboundColumn(String),

    /// Bound column position is outside the row.
    #[error("column {name} at position {position} is outside the row")]
    ColumnOutOfRange { name: String, position: usize },

    /// `VALUE` used outside a domain predicate.
    #[error("VALUE is only available in domain constraints")]
    NoDomainValue,

    /// Operands cannot be combined.
    #[error("type mismatch: cannot apply {op} to {left} and {right}")]
    TypeMismatch {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    /// Predicate produced a non-boolean value.
    #[error("predicate produced {0}, expected a boolean")]
    NotBoolean(&'static str),

    /// Division by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// Integer overflow.
    #[error("numeric overflow")]
    Overflow,
}
