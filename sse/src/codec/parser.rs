use super::fields::Fields;
use super::split_lines;
use crate::error::{CodecErrorKind, Error};
use log::*;
use std::fmt;
use std::mem;
use std::str::FromStr;
use std::time::Duration;

const BOM: &[u8] = b"\xEF\xBB\xBF";
const BOM_CHAR: char = '\u{feff}';

/// What to do with a frame that exceeded the size bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Drop the frame and resume at the next one.
    Continue,
    /// Abort the stream.
    Stop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OversizedFrame {
    pub limit: usize,
    /// Characters seen when the bound was crossed. The frame may be longer.
    pub observed: usize,
}

/// Caller-supplied reaction to an oversized frame.
pub trait OversizeHandler {
    fn on_oversize(&mut self, frame: &OversizedFrame) -> Decision;
}

impl<F> OversizeHandler for F
where
    F: FnMut(&OversizedFrame) -> Decision,
{
    fn on_oversize(&mut self, frame: &OversizedFrame) -> Decision {
        self(frame)
    }
}

/// The two fixed policies, selectable from configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OversizePolicy {
    #[default]
    Continue,
    Stop,
}

impl OversizeHandler for OversizePolicy {
    fn on_oversize(&mut self, _frame: &OversizedFrame) -> Decision {
        match self {
            OversizePolicy::Continue => Decision::Continue,
            OversizePolicy::Stop => Decision::Stop,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct OversizePolicyParseError;

impl FromStr for OversizePolicy {
    type Err = OversizePolicyParseError;

    fn from_str(policy: &str) -> Result<Self, Self::Err> {
        match policy.to_lowercase().as_str() {
            "continue" => Ok(OversizePolicy::Continue),
            "stop" => Ok(OversizePolicy::Stop),
            _ => Err(OversizePolicyParseError),
        }
    }
}

impl fmt::Display for OversizePolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OversizePolicy::Continue => write!(f, "continue"),
            OversizePolicy::Stop => write!(f, "stop"),
        }
    }
}

/// Parses every complete frame in `input`. A trailing frame without its
/// blank-line terminator is discarded.
pub fn parse(input: &str) -> Vec<Fields> {
    let mut frames = Vec::new();
    let mut parser = Parser::new(usize::MAX, OversizePolicy::Stop);
    // Nothing is larger than usize::MAX characters, so this cannot fail.
    let _ = parser.feed(input.as_bytes(), |fields| frames.push(fields));
    frames
}

/// Interprets the lines of one frame (its text without the terminating blank
/// line). Blank lines inside `raw` are skipped.
pub fn parse_frame(raw: &str) -> Fields {
    let raw = raw.strip_prefix(BOM_CHAR).unwrap_or(raw);
    let mut builder = FrameBuilder::default();
    for line in split_lines(raw).filter(|line| !line.is_empty()) {
        builder.line(line);
    }
    builder.finish()
}

/// Accumulates interpreted fields line by line.
#[derive(Default)]
struct FrameBuilder {
    id: Option<String>,
    event: Option<String>,
    retry: Option<Duration>,
    data: String,
    comment: Option<String>,
    lines: usize,
}

impl FrameBuilder {
    fn line(&mut self, line: &str) {
        self.lines += 1;

        if let Some(comment) = line.strip_prefix(':') {
            let buffer = self.comment.get_or_insert_with(String::new);
            buffer.push_str(strip_leading_space(comment));
            buffer.push('\n');
            return;
        }

        let (name, value) = match line.split_once(':') {
            Some((name, value)) => (name, strip_leading_space(value)),
            None => (line, ""),
        };

        match name {
            "data" => {
                self.data.push_str(value);
                self.data.push('\n');
            }
            "event" => self.event = Some(value.to_owned()),
            "id" => {
                if !value.contains('\0') {
                    self.id = Some(value.to_owned());
                }
            }
            "retry" => {
                if let Some(retry) = parse_retry(value) {
                    self.retry = Some(retry);
                }
            }
            _ => {}
        }
    }

    fn is_empty(&self) -> bool {
        self.lines == 0
    }

    fn finish(&mut self) -> Fields {
        let mut data = mem::take(&mut self.data);
        if data.ends_with('\n') {
            data.pop();
        }
        let mut comment = self.comment.take();
        if let Some(comment) = comment.as_mut() {
            if comment.ends_with('\n') {
                comment.pop();
            }
        }
        self.lines = 0;

        Fields {
            id: self.id.take(),
            event: self.event.take(),
            retry: self.retry.take(),
            data,
            comment,
        }
    }
}

fn strip_leading_space(value: &str) -> &str {
    value.strip_prefix(' ').unwrap_or(value)
}

fn parse_retry(value: &str) -> Option<Duration> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse::<u64>().ok().map(Duration::from_millis)
}

enum Bom {
    /// Still collecting the first bytes of the stream.
    Pending(Vec<u8>),
    Done,
}

/// Incremental event-stream parser with a per-frame size bound.
///
/// Feed it arbitrary chunks; complete frames are handed to the `emit`
/// callback in order. The frame being accumulated is bounded by
/// `max_frame_chars` (line text plus the line breaks between lines), so memory
/// stays bounded whatever the peer sends.
pub struct Parser<H = OversizePolicy> {
    max_frame_chars: usize,
    handler: H,
    bom: Bom,
    line: Vec<u8>,
    line_chars: usize,
    line_started: bool,
    pending_cr: bool,
    frame: FrameBuilder,
    frame_chars: usize,
    skipping: bool,
    stopped: bool,
}

impl<H: OversizeHandler> Parser<H> {
    pub fn new(max_frame_chars: usize, handler: H) -> Self {
        Self {
            max_frame_chars,
            handler,
            bom: Bom::Pending(Vec::with_capacity(BOM.len())),
            line: Vec::new(),
            line_chars: 0,
            line_started: false,
            pending_cr: false,
            frame: FrameBuilder::default(),
            frame_chars: 0,
            skipping: false,
            stopped: false,
        }
    }

    /// Consumes `chunk`, calling `emit` for each frame it completes.
    ///
    /// Returns a `FrameTooLarge` error when the handler chose
    /// [`Decision::Stop`]; frames completed earlier in the same chunk have
    /// already been emitted. Once stopped, every later call fails with
    /// `Stopped`.
    pub fn feed<F>(&mut self, chunk: &[u8], mut emit: F) -> Result<(), Error>
    where
        F: FnMut(Fields),
    {
        if self.stopped {
            return Err(Error::codec(CodecErrorKind::Stopped));
        }

        match mem::replace(&mut self.bom, Bom::Done) {
            Bom::Done => self.scan(chunk, &mut emit),
            Bom::Pending(mut head) => {
                head.extend_from_slice(chunk);
                if head.len() < BOM.len() && BOM.starts_with(&head) {
                    self.bom = Bom::Pending(head);
                    return Ok(());
                }
                let body = head.strip_prefix(BOM).unwrap_or(&head);
                self.scan(body, &mut emit)
            }
        }
    }

    /// Ends the stream. Returns true if an incomplete frame was discarded.
    pub fn finish(self) -> bool {
        let discarded = !self.frame.is_empty()
            || self.line_started
            || matches!(&self.bom, Bom::Pending(head) if !head.is_empty());
        if discarded {
            trace!("Discarding incomplete SSE frame at end of stream");
        }
        discarded
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn scan<F>(&mut self, bytes: &[u8], emit: &mut F) -> Result<(), Error>
    where
        F: FnMut(Fields),
    {
        for &byte in bytes {
            if mem::take(&mut self.pending_cr) && byte == b'\n' {
                continue;
            }
            match byte {
                b'\n' => self.end_line(emit),
                b'\r' => {
                    self.end_line(emit);
                    self.pending_cr = true;
                }
                _ => self.push_byte(byte)?,
            }
        }
        Ok(())
    }

    fn push_byte(&mut self, byte: u8) -> Result<(), Error> {
        self.line_started = true;
        if self.skipping {
            return Ok(());
        }

        self.line.push(byte);
        // UTF-8 continuation bytes do not start a new character.
        if byte & 0xC0 != 0x80 {
            self.line_chars += 1;
        }

        let separator = usize::from(!self.frame.is_empty());
        let observed = self
            .frame_chars
            .saturating_add(separator)
            .saturating_add(self.line_chars);
        if observed > self.max_frame_chars {
            return self.oversize(observed);
        }
        Ok(())
    }

    fn end_line<F>(&mut self, emit: &mut F)
    where
        F: FnMut(Fields),
    {
        if !self.line_started {
            // Blank line: dispatch the frame, or end a skipped one.
            if self.skipping {
                self.skipping = false;
            } else if !self.frame.is_empty() {
                emit(self.frame.finish());
            }
            self.frame_chars = 0;
            return;
        }

        self.line_started = false;
        if self.skipping {
            return;
        }

        let line = String::from_utf8_lossy(&self.line);
        let separator = usize::from(!self.frame.is_empty());
        self.frame.line(&line);
        self.frame_chars += separator + self.line_chars;
        self.line.clear();
        self.line_chars = 0;
    }

    fn oversize(&mut self, observed: usize) -> Result<(), Error> {
        let frame = OversizedFrame {
            limit: self.max_frame_chars,
            observed,
        };

        self.frame = FrameBuilder::default();
        self.frame_chars = 0;
        self.line.clear();
        self.line_chars = 0;

        match self.handler.on_oversize(&frame) {
            Decision::Continue => {
                warn!(
                    "Dropping SSE frame larger than {} characters",
                    frame.limit
                );
                self.skipping = true;
                Ok(())
            }
            Decision::Stop => {
                warn!(
                    "Aborting SSE stream on frame larger than {} characters",
                    frame.limit
                );
                self.stopped = true;
                Err(Error::codec(CodecErrorKind::FrameTooLarge {
                    limit: frame.limit,
                }))
            }
        }
    }
}
