//! Error types for the `sse` crate.
//!
//! Same shape as `events::error`: a root `Error` with an `error_kind` tree.
//! Errors from the log layer are translated here so that the `web` layer only
//! ever depends on this crate's kinds.

use events::error::{Error as EventsError, ErrorKind as EventsErrorKind};
pub use events::error::LogErrorKind;
use std::error::Error as StdError;
use std::fmt;

#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Codec(CodecErrorKind),
    /// The resumption token or stream id supplied by a client is malformed.
    Token,
    Log(LogErrorKind),
    Internal(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecErrorKind {
    /// A frame exceeded the configured bound and the policy chose to stop.
    FrameTooLarge { limit: usize },
    /// The parser was fed again after it had stopped.
    Stopped,
    /// A field value would break framing (line break in `id` or `event`,
    /// NUL in `id`).
    InvalidField(&'static str),
}

impl Error {
    pub fn codec(kind: CodecErrorKind) -> Self {
        Self {
            source: None,
            error_kind: ErrorKind::Codec(kind),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            source: None,
            error_kind: ErrorKind::Internal(message.into()),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.error_kind == ErrorKind::Log(LogErrorKind::Unavailable)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Codec(kind) => write!(f, "SSE codec error: {kind:?}"),
            ErrorKind::Token => write!(f, "Invalid resumption token"),
            ErrorKind::Log(kind) => write!(f, "Event log error: {kind:?}"),
            ErrorKind::Internal(message) => write!(f, "Internal SSE error: {message}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

// This is where errors from the `events` layer are translated to the `sse` layer.
impl From<EventsError> for Error {
    fn from(err: EventsError) -> Self {
        let error_kind = match &err.error_kind {
            EventsErrorKind::Id(_) => ErrorKind::Token,
            EventsErrorKind::Log(kind) => ErrorKind::Log(kind.clone()),
        };
        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use events::error::IdErrorKind;

    #[test]
    fn test_identity_errors_become_token_errors() {
        let err: Error = EventsError::id(IdErrorKind::InvalidIndex).into();
        assert_eq!(err.error_kind, ErrorKind::Token);
        assert!(err.source().is_some());
    }

    #[test]
    fn test_log_errors_keep_their_kind() {
        let err: Error = EventsError::log(LogErrorKind::Unavailable).into();
        assert_eq!(err.error_kind, ErrorKind::Log(LogErrorKind::Unavailable));
        assert!(err.is_retryable());
    }
}
