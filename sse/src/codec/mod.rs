//! Server-Sent Events wire codec.
//!
//! Pure, no-I/O implementation of the WHATWG `text/event-stream` format:
//!
//! ```text
//! : optional comment
//! retry: 3000
//! id: orders.0b6a1f4e-3f3c-4d52-9a1e-5b3f1c2d4e6f_7
//! event: created
//! data: {"order":7}
//!
//! ```
//!
//! Frames end with a blank line. LF, CRLF and bare CR are all accepted as
//! line terminators when parsing; the serializer always writes LF.

mod fields;
mod parser;
mod serializer;

pub use fields::Fields;
pub use parser::{
    parse, parse_frame, Decision, OversizeHandler, OversizePolicy, OversizedFrame, Parser,
};
pub use serializer::{encode, serialize};

/// Splits on `\r\n`, `\r` or `\n`. Unlike `str::lines`, a trailing terminator
/// yields a final empty line, so `"a\n"` is `["a", ""]`.
pub(crate) fn split_lines(text: &str) -> Lines<'_> {
    Lines { rest: Some(text) }
}

pub(crate) struct Lines<'a> {
    rest: Option<&'a str>,
}

impl<'a> Iterator for Lines<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let rest = self.rest?;
        match rest.find(['\r', '\n']) {
            Some(pos) => {
                let (line, tail) = rest.split_at(pos);
                let skip = if tail.starts_with("\r\n") { 2 } else { 1 };
                self.rest = Some(&tail[skip..]);
                Some(line)
            }
            None => {
                self.rest = None;
                Some(rest)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_split_lines_accepts_every_terminator() {
        let lines: Vec<_> = split_lines("a\r\nb\rc\nd").collect();
        assert_eq!(lines, ["a", "b", "c", "d"]);
    }

    #[test]
    fn test_split_lines_keeps_trailing_empty_line() {
        assert_eq!(split_lines("a\n").collect::<Vec<_>>(), ["a", ""]);
        assert_eq!(split_lines("").collect::<Vec<_>>(), [""]);
    }

    #[test]
    fn test_round_trip_preserves_fields() {
        let cases = [
            Fields::data("hello"),
            Fields::data("line1\nline2\n\nline4"),
            Fields::data("  indented\n\ttabbed"),
            Fields::data(""),
            Fields::data("trailing newline\n"),
            Fields::data("x").with_id("orders.0b6a1f4e-3f3c-4d52-9a1e-5b3f1c2d4e6f_3"),
            Fields::data("").with_id(""),
            Fields::data("{\"a\":1}")
                .with_event("created")
                .with_retry(Duration::from_millis(2500))
                .with_id("7"),
            Fields::comment("note"),
            Fields::comment(" spaced\nsecond"),
            Fields::data("body").with_comment(""),
        ];

        for fields in cases {
            let wire = serialize(&fields).unwrap();
            let parsed = parse(&wire);
            assert_eq!(parsed, vec![fields.clone()], "wire: {wire:?}");
        }
    }

    #[test]
    fn test_round_trip_normalizes_line_breaks() {
        let wire = serialize(&Fields::data("a\r\nb\rc").with_comment("x\r\ny")).unwrap();
        assert_eq!(
            parse(&wire),
            vec![Fields::data("a\nb\nc").with_comment("x\ny")]
        );
    }
}
