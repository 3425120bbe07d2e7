//! Error types for the tidemark engine.

use crate::{EventId, FsPath};
use thiserror::Error;

/// All possible errors from the tidemark engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Input errors, raised before any storage access
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // Lookup errors
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    // Dependency resolution errors
    #[error("missing parent for {path}{}", event_suffix(.event))]
    MissingParent {
        path: FsPath,
        event: Option<EventId>,
    },

    #[error("missing previous item {path}{}", event_suffix(.event))]
    MissingPrevious {
        path: FsPath,
        event: Option<EventId>,
    },

    // State errors
    #[error("storage invariant violated: {0}")]
    StorageInvariantViolated(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    // Backend errors
    #[error("storage error: {0}")]
    Storage(String),
}

fn event_suffix(event: &Option<EventId>) -> String {
    match event {
        Some(id) => format!(" (event {id})"),
        None => String::new(),
    }
}

impl Error {
    /// Shorthand for a violated storage invariant.
    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        Error::StorageInvariantViolated(message.into())
    }

    /// Whether this error was caused by caller input rather than stored state.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidArgument(_)
                | Error::NotFound(_)
                | Error::AlreadyExists(_)
                | Error::MissingParent { .. }
                | Error::MissingPrevious { .. }
        )
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::NotFound("event 7".into());
        assert_eq!(err.to_string(), "not found: event 7");

        let err = Error::MissingParent {
            path: FsPath::parse("root/a/b").unwrap(),
            event: Some(3),
        };
        assert_eq!(err.to_string(), "missing parent for root/a/b (event 3)");

        let err = Error::MissingPrevious {
            path: FsPath::parse("root/old").unwrap(),
            event: None,
        };
        assert_eq!(err.to_string(), "missing previous item root/old");
    }

    #[test]
    fn caller_errors() {
        assert!(Error::InvalidArgument("x".into()).is_caller_error());
        assert!(!Error::invariant("two rows").is_caller_error());
        assert!(!Error::InvalidState("committed".into()).is_caller_error());
    }
}
