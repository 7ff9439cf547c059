use axum::{
    async_trait,
    extract::{FromRequestParts, Query},
    http::{request::Parts, StatusCode},
};
use log::*;

use crate::extractors::RejectionType;
use crate::params::subscribe::SubscribeParams;

pub(crate) const LAST_EVENT_ID_HEADER: &str = "last-event-id";

/// The resumption token a client presents when (re)connecting.
///
/// Browsers' `EventSource` sends it as the `Last-Event-ID` header on automatic
/// reconnects; clients that cannot set headers pass `?last_event_id=`. The
/// header wins when both are present. The token is not decoded here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LastEventId(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for LastEventId
where
    S: Send + Sync,
{
    type Rejection = RejectionType;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(value) = parts.headers.get(LAST_EVENT_ID_HEADER) {
            return match value.to_str() {
                Ok(token) => Ok(LastEventId(Some(token.to_string()))),
                Err(e) => {
                    debug!("Rejecting non-ASCII Last-Event-ID header: {e}");
                    Err((
                        StatusCode::BAD_REQUEST,
                        "Invalid Last-Event-ID header".to_string(),
                    ))
                }
            };
        }

        let Query(params) = Query::<SubscribeParams>::from_request_parts(parts, state)
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, e.body_text()))?;
        Ok(LastEventId(params.last_event_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(request: Request<()>) -> Result<LastEventId, RejectionType> {
        let (mut parts, _) = request.into_parts();
        LastEventId::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_header_takes_precedence_over_query() {
        let request = Request::builder()
            .uri("/events?last_event_id=from-query")
            .header("Last-Event-ID", "from-header")
            .body(())
            .unwrap();

        let LastEventId(token) = extract(request).await.unwrap();
        assert_eq!(token.as_deref(), Some("from-header"));
    }

    #[tokio::test]
    async fn test_query_is_used_without_header() {
        let request = Request::builder()
            .uri("/events?last_event_id=from-query")
            .body(())
            .unwrap();

        let LastEventId(token) = extract(request).await.unwrap();
        assert_eq!(token.as_deref(), Some("from-query"));
    }

    #[tokio::test]
    async fn test_missing_token() {
        let request = Request::builder().uri("/events").body(()).unwrap();
        assert_eq!(extract(request).await.unwrap(), LastEventId(None));
    }
}
