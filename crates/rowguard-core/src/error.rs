//! Core error types.

use std::fmt;

use thiserror::Error;

use crate::catalog::DataType;
use crate::expr::{EvaluationError, ParseError};

/// Errors raised by the enforcement subsystem.
#[derive(Debug, Error)]
pub enum Error {
    /// A row mutation or constraint creation violated a constraint.
    #[error("constraint violation: {0}")]
    ConstraintViolation(#[from] ConstraintError),

    /// A constraint binding no longer resolves against the schema.
    #[error("schema resolution failed for constraint {constraint}: {reason}")]
    SchemaResolution { constraint: String, reason: String },

    /// Invalid constraint or schema definition.
    #[error("invalid definition: {0}")]
    Definition(String),

    /// A named schema object does not exist.
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    /// A named schema object already exists.
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    /// A unique constraint cannot be dropped while foreign keys reference it.
    #[error("constraint {constraint} is referenced by {referenced_by}")]
    ConstraintInUse {
        constraint: String,
        referenced_by: String,
    },

    /// A value does not fit the declared column type.
    #[error("type mismatch for column {column}: expected {expected}, found {found}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        found: String,
    },

    /// Predicate evaluation failed.
    #[error("evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    /// Expression or constraint DDL could not be parsed.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// The session was canceled or ran past its deadline.
    #[error("session {session} interrupted: {reason}")]
    Interrupted { session: u64, reason: &'static str },

    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<sled::transaction::TransactionError<Error>> for Error {
    fn from(err: sled::transaction::TransactionError<Error>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(e) => e,
            sled::transaction::TransactionError::Storage(e) => Error::Storage(e),
        }
    }
}

impl Error {
    /// Whether this is a validation failure that aborts only the current mutation.
    pub fn is_violation(&self) -> bool {
        matches!(self, Error::ConstraintViolation(_))
    }

    /// The violation carried by this error, if any.
    pub fn violation(&self) -> Option<&ConstraintError> {
        match self {
            Error::ConstraintViolation(e) => Some(e),
            _ => None,
        }
    }

    pub(crate) fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub(crate) fn already_exists(kind: &'static str, name: impl Into<String>) -> Self {
        Error::AlreadyExists {
            kind,
            name: name.into(),
        }
    }
}

/// Validation failures reported by constraint checks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstraintError {
    /// A NOT NULL column or primary key column received NULL.
    #[error("NULL not allowed for column {column} of table {table}")]
    NotNullViolation {
        constraint: Option<String>,
        table: String,
        column: String,
    },

    /// A duplicate key for a unique or primary key constraint.
    #[error("unique constraint {constraint} violated on table {table}: duplicate key ({value})")]
    UniqueViolation {
        constraint: String,
        table: String,
        value: String,
    },

    /// A foreign key rule was broken.
    #[error("referential constraint {constraint} violated on table {table}: {kind} ({value})")]
    ReferentialViolation {
        constraint: String,
        table: String,
        kind: ReferentialViolationKind,
        value: String,
    },

    /// A check or domain predicate evaluated to false.
    #[error("check constraint {constraint} violated on table {table}: {expression} ({value})")]
    CheckViolation {
        constraint: String,
        table: String,
        expression: String,
        value: String,
    },
}

impl ConstraintError {
    /// Name of the violated constraint, when the violation came from one.
    pub fn constraint(&self) -> Option<&str> {
        match self {
            ConstraintError::NotNullViolation { constraint, .. } => constraint.as_deref(),
            ConstraintError::UniqueViolation { constraint, .. }
            | ConstraintError::ReferentialViolation { constraint, .. }
            | ConstraintError::CheckViolation { constraint, .. } => Some(constraint),
        }
    }

    /// Table the offending row belongs to.
    pub fn table(&self) -> &str {
        match self {
            ConstraintError::NotNullViolation { table, .. }
            | ConstraintError::UniqueViolation { table, .. }
            | ConstraintError::ReferentialViolation { table, .. }
            | ConstraintError::CheckViolation { table, .. } => table,
        }
    }
}

/// The three ways a foreign key can be violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferentialViolationKind {
    /// The referencing row has no matching parent row.
    NoParent,
    /// The parent row is still referenced by a child row.
    RowReferenced,
    /// MATCH FULL key with a mix of null and non-null columns.
    PartialNull,
}

impl fmt::Display for ReferentialViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ReferentialViolationKind::NoParent => "no matching parent row",
            ReferentialViolationKind::RowReferenced => "row is referenced",
            ReferentialViolationKind::PartialNull => "partially null key under MATCH FULL",
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_classification() {
        let err: Error = ConstraintError::UniqueViolation {
            constraint: "UQ_EMAIL".into(),
            table: "PUBLIC.USERS".into(),
            value: "'a@b.c'".into(),
        }
        .into();
        assert!(err.is_violation());
        assert_eq!(err.violation().and_then(|v| v.constraint()), Some("UQ_EMAIL"));

        let err = Error::SchemaResolution {
            constraint: "FK".into(),
            reason: "column 3 missing".into(),
        };
        assert!(!err.is_violation());
    }

    #[test]
    fn test_referential_message() {
        let err = ConstraintError::ReferentialViolation {
            constraint: "FK_ORDERS".into(),
            table: "PUBLIC.ORDERS".into(),
            kind: ReferentialViolationKind::NoParent,
            value: "99".into(),
        };
        assert_eq!(
            err.to_string(),
            "referential constraint FK_ORDERS violated on table PUBLIC.ORDERS: no matching parent row (99)"
        );
    }
}
