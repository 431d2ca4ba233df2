//! Newline framing for the inbound byte stream.

/// Longest piece kept in the buffer before it is dispatched without waiting
/// for the rest of its line.
pub const MAX_LINE_LENGTH: usize = 4096;

/// One piece of the inbound stream.
///
/// A line no longer than the buffer limit arrives as a single frame with both
/// flags set. A longer line arrives as several frames; only the first has
/// `starts_line` and only the last has `ends_line`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub bytes: Vec<u8>,
    pub starts_line: bool,
    /// Ended with `\n`, or is what was left when the peer closed.
    pub ends_line: bool,
}

impl Frame {
    pub fn is_whole_line(&self) -> bool {
        self.starts_line && self.ends_line
    }
}

/// Accumulates received chunks and yields frames.
#[derive(Debug)]
pub struct LineBuffer {
    buf: Vec<u8>,
    max_len: usize,
    mid_line: bool,
}

impl LineBuffer {
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_len: max_len.max(1),
            mid_line: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete line (including its `\n`), or the next `max_len` bytes
    /// of a line that has not ended yet.
    pub fn next_frame(&mut self) -> Option<Frame> {
        let (end, ends_line) = match self.buf.iter().position(|&b| b == b'\n') {
            Some(pos) if pos < self.max_len => (pos + 1, true),
            _ if self.buf.len() >= self.max_len => (self.max_len, false),
            _ => return None,
        };
        Some(self.cut(end, ends_line))
    }

    /// Whatever is left after the peer closed, if anything.
    pub fn take_remainder(&mut self) -> Option<Frame> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.cut(self.buf.len(), true))
        }
    }

    fn cut(&mut self, end: usize, ends_line: bool) -> Frame {
        let frame = Frame {
            bytes: self.buf.drain(..end).collect(),
            starts_line: !self.mid_line,
            ends_line,
        };
        self.mid_line = !ends_line;
        frame
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new(MAX_LINE_LENGTH)
    }
}

/// Strip every trailing CR and LF.
pub fn normalize_line(line: &[u8]) -> &[u8] {
    let end = line
        .iter()
        .rposition(|&b| b != b'\r' && b != b'\n')
        .map_or(0, |pos| pos + 1);
    &line[..end]
}
