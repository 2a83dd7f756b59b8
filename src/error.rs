//! Error taxonomy shared by every operation.
//!
//! Four caller-facing kinds (validation, conflict, invalid state, not found)
//! plus an opaque storage kind for everything the caller cannot fix.

use std::io;

use serde::Serialize;

/// Errors surfaced by the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or out-of-range input.
    #[error("invalid input: {0}")]
    Validation(String),

    /// A uniqueness or at-most-one invariant would be violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The operation is not permitted in the entity's current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored value could not be interpreted.
    #[error("corrupt data: {0}")]
    Corrupt(String),
}

pub type Result<T> = core::result::Result<T, Error>;

/// Stable, caller-visible classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Validation,
    Conflict,
    InvalidState,
    NotFound,
    Storage,
}

impl ErrorKind {
    /// The HTTP-style status the boundary reports for this kind.
    ///
    /// `InvalidState` shares 409 with `Conflict`. That includes a completion
    /// recorded against a closed assignment, which some clients expect as a
    /// 400; the distinct `invalidState` kind is what tells it apart.
    pub fn status(self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::NotFound => 404,
            Self::Conflict | Self::InvalidState => 409,
            Self::Storage => 500,
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Sqlite(_) | Self::Io(_) | Self::Json(_) | Self::Corrupt(_) => ErrorKind::Storage,
        }
    }

    /// A message safe to show across the boundary.
    ///
    /// Storage failures are collapsed to a generic message; their detail is
    /// only ever logged.
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(m) | Self::Conflict(m) | Self::InvalidState(m) | Self::NotFound(m) => {
                m.clone()
            }
            _ => "storage failure; the request may be retried".to_string(),
        }
    }

    /// True when a SQLite error is a constraint violation (unique index, check).
    pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
        matches!(
            err,
            rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}
