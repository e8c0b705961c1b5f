//! Line Reader Module
//!
//! Strict newline-delimited reader used while replaying the journal.

use std::io::{BufRead, BufReader, Read};

use crate::error::{CacheError, Result};

// == Line Reader ==
/// Reads `\n`-terminated ASCII lines.
///
/// A trailing line without a terminator is never returned: it is treated as
/// the end of input and remembered, so the caller can tell that the journal
/// was cut short by a crash mid-append.
#[derive(Debug)]
pub struct LineReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
    unterminated: bool,
}

impl<R: Read> LineReader<R> {
    // == Constructor ==
    /// Wraps `reader` in a buffered line reader.
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
            buf: Vec::with_capacity(128),
            unterminated: false,
        }
    }

    // == Read Line ==
    /// Returns the next complete line without its terminator.
    ///
    /// Returns `Ok(None)` at end of input, including when the input ends with
    /// a partial line. A `\r` preceding the `\n` is stripped.
    pub fn read_line(&mut self) -> Result<Option<String>> {
        if self.unterminated {
            return Ok(None);
        }

        self.buf.clear();
        let read = self.inner.read_until(b'\n', &mut self.buf)?;
        if read == 0 {
            return Ok(None);
        }
        if self.buf.last() != Some(&b'\n') {
            self.unterminated = true;
            return Ok(None);
        }

        self.buf.pop();
        if self.buf.last() == Some(&b'\r') {
            self.buf.pop();
        }

        if !self.buf.is_ascii() {
            return Err(CacheError::InvalidJournalLine(
                String::from_utf8_lossy(&self.buf).into_owned(),
            ));
        }

        // ASCII is valid UTF-8
        let line = String::from_utf8(std::mem::take(&mut self.buf))
            .map_err(|e| CacheError::InvalidJournalLine(e.to_string()))?;
        Ok(Some(line))
    }

    // == Unterminated Line ==
    /// Returns true if input ended with a line that had no terminator.
    pub fn has_unterminated_line(&self) -> bool {
        self.unterminated
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(input: &[u8]) -> (Vec<String>, bool) {
        let mut reader = LineReader::new(input);
        let mut lines = Vec::new();
        while let Some(line) = reader.read_line().unwrap() {
            lines.push(line);
        }
        (lines, reader.has_unterminated_line())
    }

    #[test]
    fn test_reads_terminated_lines() {
        let (lines, unterminated) = read_all(b"one\ntwo\n\nthree\n");
        assert_eq!(lines, vec!["one", "two", "", "three"]);
        assert!(!unterminated);
    }

    #[test]
    fn test_empty_input() {
        let (lines, unterminated) = read_all(b"");
        assert!(lines.is_empty());
        assert!(!unterminated);
    }

    #[test]
    fn test_truncated_last_line_is_dropped() {
        let (lines, unterminated) = read_all(b"CLEAN k1 1 2\nCLEAN k2 3");
        assert_eq!(lines, vec!["CLEAN k1 1 2"]);
        assert!(unterminated);
    }

    #[test]
    fn test_crlf_is_stripped() {
        let (lines, _) = read_all(b"a\r\nb\n");
        assert_eq!(lines, vec!["a", "b"]);
    }

    #[test]
    fn test_non_ascii_is_rejected() {
        let mut reader = LineReader::new("CLEAN caf\u{e9} 1\n".as_bytes());
        let result = reader.read_line();
        assert!(matches!(result, Err(CacheError::InvalidJournalLine(_))));
    }

    #[test]
    fn test_reads_past_buffer_size() {
        let long = "x".repeat(20_000);
        let input = format!("{}\nshort\n", long);
        let (lines, unterminated) = read_all(input.as_bytes());
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), 20_000);
        assert_eq!(lines[1], "short");
        assert!(!unterminated);
    }
}
