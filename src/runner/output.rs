/*!
 * Output
 * Pause-aware output sink; writes buffer while paused and are flushed
 * in order on resume
 */

use log::debug;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Output sink shared by a runner and its task.
///
/// Writes land in an in-memory buffer first. Unless the shared pause flag
/// is set, the buffer is flushed to the real sink immediately, so output
/// written while not paused is never delayed and ordering is preserved
/// across pause boundaries.
pub struct Output {
    sink: Box<dyn Write + Send>,
    buffer: Vec<u8>,
    paused: Arc<AtomicBool>,
    terminator: String,
}

impl Output {
    pub fn new(paused: Arc<AtomicBool>, terminator: impl Into<String>) -> Self {
        Self {
            sink: Box::new(io::stdout()),
            buffer: Vec::new(),
            paused,
            terminator: terminator.into(),
        }
    }

    /// Replace the real sink (stdout by default).
    pub fn set_sink(&mut self, sink: Box<dyn Write + Send>) {
        self.sink = sink;
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Write text, buffering while paused.
    pub fn write(&mut self, text: &str) -> io::Result<()> {
        self.buffer.extend_from_slice(text.as_bytes());
        if !self.is_paused() {
            self.flush_buffered()?;
        }
        Ok(())
    }

    /// Write text with the line terminator appended.
    pub fn write_line(&mut self, text: &str) -> io::Result<()> {
        let mut line = text.to_string();
        line.push_str(&self.terminator);
        self.write(&line)
    }

    /// Flush everything buffered to the real sink, atomically from the
    /// reader's point of view.
    pub fn flush_buffered(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        debug!("flushing {} buffered output bytes", self.buffer.len());
        self.sink.write_all(&self.buffer)?;
        self.sink.flush()?;
        self.buffer.clear();
        Ok(())
    }

    /// Bytes currently held back by a pause.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}
