//! Line framer: byte stream to discrete AT response lines.
//!
//! Modems frame every response line in CR/LF pairs and may deliver a line
//! split across several reads, or several lines in one read. The framer
//! accumulates raw bytes and drains complete [`FramerEvent`]s:
//!
//! - [`FramerEvent::Line`] for each complete, non-empty line with
//!   terminators stripped;
//! - [`FramerEvent::Prompt`] when the modem emits the `>` data prompt
//!   (SMS PDU submission), which arrives *without* a line terminator.
//!
//! Partial data is kept in the buffer for the next `feed` call. Blank
//! lines (the empty gap inside a `\r\n\r\n` bracket) are skipped. If the
//! buffer grows past the configured maximum without a terminator, it is
//! discarded and framing resynchronizes on the next byte.

use bytes::BytesMut;

/// Default maximum bytes buffered while waiting for a line terminator.
///
/// AT response lines are short; SMS PDU payload lines top out around
/// 360 characters. 8192 is generous headroom.
pub const DEFAULT_MAX_BUFFER: usize = 8192;

/// One framing event drained from the byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramerEvent {
    /// A complete line, CR/LF terminators stripped. Never empty.
    Line(String),
    /// The `>` data prompt, emitted without waiting for a terminator.
    Prompt,
}

/// Accumulates device bytes and splits them into [`FramerEvent`]s.
#[derive(Debug)]
pub struct LineFramer {
    buf: BytesMut,
    max_buffer: usize,
}

impl LineFramer {
    /// Create a framer with the default buffer bound.
    pub fn new() -> Self {
        Self::with_max_buffer(DEFAULT_MAX_BUFFER)
    }

    /// Create a framer with an explicit buffer bound.
    pub fn with_max_buffer(max_buffer: usize) -> Self {
        LineFramer {
            buf: BytesMut::new(),
            max_buffer,
        }
    }

    /// Append raw bytes read from the device.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        if self.buf.len() > self.max_buffer {
            tracing::warn!(len = self.buf.len(), "framer buffer overflow, resyncing");
            self.buf.clear();
        }
    }

    /// Number of bytes currently buffered without a terminator.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Discard any partial line.
    ///
    /// Called when the device closes mid-line: the fragment is dropped,
    /// never delivered as a short line.
    pub fn discard_partial(&mut self) {
        if !self.buf.is_empty() {
            tracing::debug!(len = self.buf.len(), "discarding partial line");
            self.buf.clear();
        }
    }

    /// Drain the next complete event, if any.
    ///
    /// Returns `None` when the buffered data contains no complete line and
    /// no prompt; more bytes are needed.
    pub fn next_event(&mut self) -> Option<FramerEvent> {
        loop {
            // Skip leading terminator bytes (the tail of the previous
            // line's CRLF, or a blank line).
            let skip = self
                .buf
                .iter()
                .take_while(|&&b| b == b'\r' || b == b'\n')
                .count();
            if skip > 0 {
                let _ = self.buf.split_to(skip);
            }
            if self.buf.is_empty() {
                return None;
            }

            // The data prompt is a bare '>' (usually "> ") with no
            // terminator, so it must be recognized eagerly.
            if self.buf[0] == b'>' {
                let consume = if self.buf.len() > 1 && self.buf[1] == b' ' {
                    2
                } else {
                    1
                };
                let _ = self.buf.split_to(consume);
                return Some(FramerEvent::Prompt);
            }

            let term = match self.buf.iter().position(|&b| b == b'\r' || b == b'\n') {
                Some(pos) => pos,
                None => return None,
            };

            let raw = self.buf.split_to(term + 1);
            let line = String::from_utf8_lossy(&raw[..term]).into_owned();
            if line.is_empty() {
                // Lone terminator; keep scanning.
                continue;
            }
            return Some(FramerEvent::Line(line));
        }
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}
