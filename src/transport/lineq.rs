/*!
 * Line Queue
 * Reassembles complete terminator-suffixed lines from partial input
 */

use super::types::{TransportError, TransportResult, DEF_TERMINATOR};
use std::collections::VecDeque;

/// FIFO of completed lines plus at most one trailing fragment.
///
/// Bytes fed incrementally are reassembled into lines ending with the
/// configured terminator. The fragment holds the unterminated tail between
/// feeds and never contains the terminator itself. Concatenating every
/// drained line plus the final fragment reproduces the fed input exactly.
#[derive(Debug)]
pub struct LineQueue {
    lines: VecDeque<String>,
    fragment: String,
    terminator: String,
}

impl Default for LineQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl LineQueue {
    /// Create a queue with the default CRLF terminator.
    pub fn new() -> Self {
        Self {
            lines: VecDeque::new(),
            fragment: String::new(),
            terminator: DEF_TERMINATOR.to_string(),
        }
    }

    /// Create a queue with a custom terminator. The terminator must be
    /// non-empty.
    pub fn with_terminator(terminator: impl Into<String>) -> TransportResult<Self> {
        let terminator = terminator.into();
        if terminator.is_empty() {
            return Err(TransportError::Config(
                "line terminator must not be empty".to_string(),
            ));
        }
        Ok(Self {
            lines: VecDeque::new(),
            fragment: String::new(),
            terminator,
        })
    }

    pub fn terminator(&self) -> &str {
        &self.terminator
    }

    /// The trailing, not-yet-terminated partial line.
    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    /// Count of complete lines waiting to be read.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Feed received bytes. Invalid UTF-8 is replaced rather than dropped.
    pub fn feed(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(data);
        self.feed_str(&text);
    }

    /// Feed already-decoded text.
    pub fn feed_str(&mut self, data: &str) {
        if data.is_empty() {
            return;
        }

        // the fragment never contains the terminator, so only the junction
        // window (the fragment's last terminator-length-minus-one bytes plus
        // the new data) can hold a new match; the already-scanned prefix is
        // neither rescanned nor recopied
        let mut scan_from = self
            .fragment
            .len()
            .saturating_sub(self.terminator.len() - 1);
        while !self.fragment.is_char_boundary(scan_from) {
            scan_from -= 1;
        }
        self.fragment.push_str(data);

        let mut consumed = 0;
        let mut search = scan_from;
        while let Some(at) = self.fragment[search..].find(&self.terminator) {
            let end = search + at + self.terminator.len();
            self.lines.push_back(self.fragment[consumed..end].to_string());
            consumed = end;
            search = end;
        }
        if consumed > 0 {
            self.fragment.drain(..consumed);
        }
    }

    /// Feed text with the terminator appended.
    pub fn feed_line(&mut self, data: &str) {
        let mut line = data.to_string();
        line.push_str(&self.terminator);
        self.feed_str(&line);
    }

    /// Pop the next complete line (terminator included), or `None`.
    pub fn read_line(&mut self) -> Option<String> {
        self.lines.pop_front()
    }

    /// Drain all complete lines.
    pub fn read_lines(&mut self) -> Vec<String> {
        self.lines.drain(..).collect()
    }

    /// Drain all complete lines into one string.
    pub fn read(&mut self) -> String {
        self.lines.drain(..).collect::<Vec<_>>().concat()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_split_lines() {
        let mut q = LineQueue::new();
        q.feed(b"hello ");
        assert!(q.read_line().is_none());
        assert_eq!(q.fragment(), "hello ");

        q.feed(b"world\r\nnext");
        assert_eq!(q.read_line().as_deref(), Some("hello world\r\n"));
        assert_eq!(q.fragment(), "next");
    }

    #[test]
    fn fragment_never_holds_terminator() {
        let mut q = LineQueue::new();
        q.feed(b"a\r\nb\r\nc");
        assert!(!q.fragment().contains("\r\n"));
        assert_eq!(q.read_lines(), vec!["a\r\n", "b\r\n"]);
        assert_eq!(q.fragment(), "c");
    }

    #[test]
    fn custom_terminator() {
        let mut q = LineQueue::with_terminator("\n").unwrap();
        q.feed(b"one\ntwo\n");
        assert_eq!(q.read_line().as_deref(), Some("one\n"));
        assert_eq!(q.read_line().as_deref(), Some("two\n"));
        assert!(q.read_line().is_none());
    }

    #[test]
    fn empty_terminator_rejected() {
        assert!(LineQueue::with_terminator("").is_err());
    }

    #[test]
    fn feed_line_appends_terminator() {
        let mut q = LineQueue::new();
        q.feed_line("ping");
        assert_eq!(q.read_line().as_deref(), Some("ping\r\n"));
    }
}
