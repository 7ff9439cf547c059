//! Error types for the `events` crate.
//!
//! Follows a root `Error` struct holding an `error_kind` tree plus an optional
//! source, so that callers in higher layers can translate kinds without
//! depending on how the log store reports failures.

use std::error::Error as StdError;
use std::fmt;

#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors raised by this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Id(IdErrorKind),
    Log(LogErrorKind),
}

/// Errors from decoding or comparing stream identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdErrorKind {
    /// Category is empty, too long, or not lowercase alphanumeric.
    InvalidCategory,
    /// The unique part is not a canonical hyphenated UUID.
    InvalidUuid,
    /// The index part is not a base-10 `u64`.
    InvalidIndex,
    /// The token lacks a required separator.
    Malformed,
    /// Two event ids from different streams were compared for ordering.
    StreamMismatch,
}

/// Errors reported by an `EventLog` implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogErrorKind {
    NotFound,
    /// The log exists with different creation options.
    Conflict,
    /// The log reached its configured capacity; nothing was appended.
    Full,
    /// A subscription asked to start after the current head.
    OffsetOutOfRange,
    InvalidEventType,
    /// The log service could not confirm the operation. Safe to retry.
    Unavailable,
}

impl Error {
    pub fn id(kind: IdErrorKind) -> Self {
        Self {
            source: None,
            error_kind: ErrorKind::Id(kind),
        }
    }

    pub fn log(kind: LogErrorKind) -> Self {
        Self {
            source: None,
            error_kind: ErrorKind::Log(kind),
        }
    }

    pub fn with_source(mut self, source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Returns the log error kind, if this is a log error.
    pub fn log_kind(&self) -> Option<&LogErrorKind> {
        match &self.error_kind {
            ErrorKind::Log(kind) => Some(kind),
            ErrorKind::Id(_) => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.log_kind() == Some(&LogErrorKind::NotFound)
    }

    /// Only an unconfirmed operation is worth repeating.
    pub fn is_retryable(&self) -> bool {
        self.log_kind() == Some(&LogErrorKind::Unavailable)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Id(kind) => write!(f, "Stream identity error: {kind:?}"),
            ErrorKind::Log(kind) => write!(f, "Event log error: {kind:?}"),
        }?;
        if let Some(source) = &self.source {
            write!(f, " ({source})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<uuid::Error> for Error {
    fn from(err: uuid::Error) -> Self {
        Error::id(IdErrorKind::InvalidUuid).with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailable_is_retryable() {
        assert!(Error::log(LogErrorKind::Unavailable).is_retryable());
        assert!(!Error::log(LogErrorKind::Full).is_retryable());
        assert!(!Error::id(IdErrorKind::Malformed).is_retryable());
    }

    #[test]
    fn test_display_includes_source() {
        let err = Error::log(LogErrorKind::Unavailable).with_source("lock poisoned");
        assert_eq!(
            err.to_string(),
            "Event log error: Unavailable (lock poisoned)"
        );
    }
}
