pub(crate) mod last_event_id;

use axum::http::StatusCode;

type RejectionType = (StatusCode, String);
