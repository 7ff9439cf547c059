//! Mapping from log entries and connection housekeeping to SSE frames.

use crate::codec::Fields;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use events::{Event, Payload, StreamId};
use std::time::Duration;

/// One frame per log entry: `id` is the canonical event id (the client's
/// resumption token), `event` the entry type and `data` the payload.
pub fn event_frame(event: &Event) -> Fields {
    Fields::data(payload_data(event.payload()))
        .with_id(event.id().to_string())
        .with_event(event.event_type())
}

/// Text is sent as-is, JSON compact on one logical value, binary as base64.
pub fn payload_data(payload: &Payload) -> String {
    match payload {
        Payload::Text(text) => text.clone(),
        Payload::Json(value) => value.to_string(),
        Payload::Binary(bytes) => BASE64.encode(bytes),
    }
}

/// First frame of every connection. Comment-only, so an EventSource ignores it
/// apart from the reconnection delay.
pub fn open_frame(stream_id: &StreamId, retry: Option<Duration>) -> Fields {
    let frame = Fields::comment(format!("stream {stream_id}"));
    match retry {
        Some(retry) => frame.with_retry(retry),
        None => frame,
    }
}

pub fn keep_alive_frame() -> Fields {
    Fields::comment("keep-alive")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::serialize;
    use events::EventId;
    use serde_json::json;

    fn event(index: u64, event_type: &str, payload: Payload) -> Event {
        let stream_id = StreamId::new("orders").unwrap();
        Event::new(EventId::new(stream_id, index), event_type, payload)
    }

    #[test]
    fn test_event_frame_carries_canonical_id_and_type() {
        let event = event(3, "created", Payload::from("hello"));
        let frame = event_frame(&event);

        assert_eq!(frame.id, Some(event.id().to_string()));
        assert_eq!(frame.event.as_deref(), Some("created"));
        assert_eq!(frame.data, "hello");
    }

    #[test]
    fn test_json_payload_is_compact() {
        let payload = Payload::Json(json!({"items": [1, 2, {"sku": "a b"}]}));
        assert_eq!(payload_data(&payload), r#"{"items":[1,2,{"sku":"a b"}]}"#);
    }

    #[test]
    fn test_binary_payload_is_base64() {
        assert_eq!(payload_data(&Payload::Binary(vec![0, 1, 2, 255])), "AAEC/w==");
    }

    #[test]
    fn test_multiline_text_becomes_multiple_data_lines() {
        let wire = serialize(&event_frame(&event(1, "message", Payload::from("a\nb")))).unwrap();
        assert!(wire.ends_with("event: message\ndata: a\ndata: b\n\n"));
    }

    #[test]
    fn test_open_frame() {
        let stream_id = StreamId::new("orders").unwrap();
        let wire = serialize(&open_frame(&stream_id, Some(Duration::from_millis(3000)))).unwrap();
        assert_eq!(wire, format!(": stream {stream_id}\nretry: 3000\n\n"));

        let wire = serialize(&open_frame(&stream_id, None)).unwrap();
        assert_eq!(wire, format!(": stream {stream_id}\n\n"));
    }

    #[test]
    fn test_keep_alive_is_comment_only() {
        assert_eq!(serialize(&keep_alive_frame()).unwrap(), ": keep-alive\n\n");
    }
}
