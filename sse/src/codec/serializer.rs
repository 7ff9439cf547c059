use super::fields::Fields;
use super::split_lines;
use crate::error::{CodecErrorKind, Error};
use bytes::Bytes;
use std::fmt::Write;

/// Renders `fields` as one frame, blank-line terminator included.
///
/// Line breaks inside `data` and `comment` are written as separate lines.
/// `id` and `event` cannot be split that way, so a line break in either (or a
/// NUL in `id`) is rejected rather than silently changing the frame.
pub fn serialize(fields: &Fields) -> Result<String, Error> {
    if let Some(id) = &fields.id {
        if id.contains(['\r', '\n', '\0']) {
            return Err(Error::codec(CodecErrorKind::InvalidField("id")));
        }
    }
    if let Some(event) = &fields.event {
        if event.contains(['\r', '\n']) {
            return Err(Error::codec(CodecErrorKind::InvalidField("event")));
        }
    }

    let mut out = String::with_capacity(fields.data.len() + 32);

    if let Some(comment) = &fields.comment {
        for line in split_lines(comment) {
            push_line(&mut out, "", line);
        }
    }
    if let Some(retry) = fields.retry {
        let _ = writeln!(out, "retry: {}", retry.as_millis());
    }
    if let Some(id) = &fields.id {
        push_line(&mut out, "id", id);
    }
    if let Some(event) = &fields.event {
        push_line(&mut out, "event", event);
    }
    if !(fields.comment.is_some() && fields.is_comment_only()) {
        for line in split_lines(&fields.data) {
            push_line(&mut out, "data", line);
        }
    }

    out.push('\n');
    Ok(out)
}

/// Same as [`serialize`], ready to hand to a response body.
pub fn encode(fields: &Fields) -> Result<Bytes, Error> {
    serialize(fields).map(Bytes::from)
}

fn push_line(out: &mut String, name: &str, value: &str) {
    out.push_str(name);
    out.push(':');
    if !value.is_empty() {
        out.push(' ');
        out.push_str(value);
    }
    out.push('\n');
}
