//! Pattern buffer with tail-limited prompt search.
//!
//! Output is cleaned on the way in: ANSI escape sequences are dropped and
//! carriage returns removed, so the rest of the crate only ever sees `\n`
//! line endings. Prompt detection only looks at the last `search_depth`
//! bytes, which keeps large outputs (full route tables, configs) cheap.

use memchr::memrchr;
use vte::{Parser, Perform};

/// Keeps printable text, newlines and tabs.
#[derive(Default)]
struct Printable {
    out: Vec<u8>,
}

impl Perform for Printable {
    fn print(&mut self, c: char) {
        let mut utf8 = [0u8; 4];
        self.out.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
    }

    fn execute(&mut self, byte: u8) {
        if byte == b'\n' || byte == b'\t' {
            self.out.push(byte);
        }
    }
}

/// Accumulates cleaned shell output.
pub struct PatternBuffer {
    buffer: Vec<u8>,

    /// How many bytes from the end to search for patterns.
    search_depth: usize,

    /// Escape sequences may straddle chunks, so the parser outlives them.
    parser: Parser,
}

impl std::fmt::Debug for PatternBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternBuffer")
            .field("len", &self.buffer.len())
            .field("search_depth", &self.search_depth)
            .finish()
    }
}

impl PatternBuffer {
    /// Create a new pattern buffer with the specified search depth.
    pub fn new(search_depth: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
            search_depth,
            parser: Parser::new(),
        }
    }

    /// Append raw device output.
    pub fn extend(&mut self, data: &[u8]) {
        let mut printable = Printable {
            out: Vec::with_capacity(data.len()),
        };
        self.parser.advance(&mut printable, data);
        self.buffer.extend_from_slice(&printable.out);
    }

    /// The trailing line at or after `from` that the prompt must occupy.
    ///
    /// Only the last `search_depth` bytes are considered. Returns the
    /// offset where the line starts and its bytes, or `None` when the
    /// buffer ends in a newline (a prompt never does).
    pub fn trailing_line(&self, from: usize) -> Option<(usize, &[u8])> {
        let floor = from.max(self.buffer.len().saturating_sub(self.search_depth));
        if floor >= self.buffer.len() {
            return None;
        }
        let window = &self.buffer[floor..];
        let start = match memrchr(b'\n', window) {
            Some(pos) if pos + 1 == window.len() => return None,
            Some(pos) => floor + pos + 1,
            None => floor,
        };
        Some((start, &self.buffer[start..]))
    }

    /// Offset just past the first newline at or after `from`.
    pub fn line_end_after(&self, from: usize) -> Option<usize> {
        let from = from.min(self.buffer.len());
        memchr::memchr(b'\n', &self.buffer[from..]).map(|pos| from + pos + 1)
    }

    /// Take ownership of the buffer contents and reset.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Get the buffer contents as a string (lossy UTF-8 conversion).
    pub fn as_str_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.buffer)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear contents and any half-parsed escape sequence.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.parser = Parser::new();
    }

    pub fn search_depth(&self) -> usize {
        self.search_depth
    }
}

impl Default for PatternBuffer {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_extend() {
        let mut buffer = PatternBuffer::new(100);
        buffer.extend(b"Hello, world!");
        assert_eq!(buffer.as_slice(), b"Hello, world!");
    }

    #[test]
    fn test_ansi_stripping() {
        let mut buffer = PatternBuffer::new(100);
        buffer.extend(b"\x1b[32mGreen text\x1b[0m");
        assert_eq!(buffer.as_slice(), b"Green text");
    }

    #[test]
    fn test_escape_split_across_chunks() {
        let mut buffer = PatternBuffer::new(100);
        buffer.extend(b"admin@r1\x1b[");
        buffer.extend(b"1mlab\x1b[0m> ");
        assert_eq!(buffer.as_slice(), b"admin@r1lab> ");
    }

    #[test]
    fn test_carriage_returns_removed() {
        let mut buffer = PatternBuffer::new(100);
        buffer.extend(b"show version\r\r\nHostname: r1\r\n");
        assert_eq!(buffer.as_slice(), b"show version\nHostname: r1\n");
    }

    #[test]
    fn test_utf8_preserved() {
        let mut buffer = PatternBuffer::new(100);
        buffer.extend("description \"Zürich uplink\"\n".as_bytes());
        assert_eq!(buffer.as_str_lossy(), "description \"Zürich uplink\"\n");
    }

    #[test]
    fn test_trailing_line() {
        let mut buffer = PatternBuffer::new(100);
        buffer.extend(b"line one\nadmin@r1> ");
        let (start, line) = buffer.trailing_line(0).unwrap();
        assert_eq!(start, 9);
        assert_eq!(line, b"admin@r1> ");

        buffer.extend(b"\n");
        assert!(buffer.trailing_line(0).is_none());
    }

    #[test]
    fn test_trailing_line_respects_floor_and_depth() {
        let mut buffer = PatternBuffer::new(10);
        buffer.extend(&[b'x'; 100]);
        buffer.extend(b"\nr1> ");
        let (start, line) = buffer.trailing_line(0).unwrap();
        assert_eq!(line, b"r1> ");
        assert_eq!(start, 101);

        assert!(buffer.trailing_line(buffer.len()).is_none());
    }

    #[test]
    fn test_line_end_after() {
        let mut buffer = PatternBuffer::new(100);
        buffer.extend(b"show version\nbody");
        assert_eq!(buffer.line_end_after(0), Some(13));
        assert_eq!(buffer.line_end_after(13), None);
    }

    #[test]
    fn test_take_clears_buffer() {
        let mut buffer = PatternBuffer::new(100);
        buffer.extend(b"test data");
        assert_eq!(buffer.take(), b"test data");
        assert!(buffer.is_empty());
    }
}
