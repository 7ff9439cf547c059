use std::error::Error as StdError;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use sse::error::{CodecErrorKind, Error as SseError, ErrorKind, LogErrorKind};

extern crate log;
use log::*;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error(SseError);

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.0)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> core::result::Result<(), std::fmt::Error> {
        write!(fmt, "{}", self.0)
    }
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match &self.0.error_kind {
            ErrorKind::Token => StatusCode::BAD_REQUEST,
            ErrorKind::Codec(codec_error_kind) => match codec_error_kind {
                CodecErrorKind::FrameTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                CodecErrorKind::InvalidField(_) => StatusCode::UNPROCESSABLE_ENTITY,
                CodecErrorKind::Stopped => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ErrorKind::Log(log_error_kind) => match log_error_kind {
                LogErrorKind::OffsetOutOfRange => StatusCode::BAD_REQUEST,
                LogErrorKind::NotFound => StatusCode::NOT_FOUND,
                LogErrorKind::Conflict => StatusCode::CONFLICT,
                LogErrorKind::InvalidEventType => StatusCode::UNPROCESSABLE_ENTITY,
                LogErrorKind::Full => StatusCode::INSUFFICIENT_STORAGE,
                LogErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            },
            ErrorKind::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// List of possible StatusCode variants https://docs.rs/http/latest/http/status/struct.StatusCode.html#associatedconstant.UNPROCESSABLE_ENTITY
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {self}");
        } else {
            debug!("Request rejected with {status}: {self}");
        }
        let reason = status.canonical_reason().unwrap_or("ERROR").to_uppercase();
        (status, reason).into_response()
    }
}

impl<E> From<E> for Error
where
    E: Into<SseError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
