/*!
 * Connection
 * Buffered non-blocking wrapper around one TCP stream
 */

use super::lineq::LineQueue;
use super::types::{TransportConfig, TransportError, TransportResult};
use log::debug;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

/// A bidirectional byte-stream connection.
///
/// The connection is the exclusive owner of its stream - there is exactly
/// one close point, and the raw stream is never handed out. All reads are
/// zero-wait: `receive` returns an empty buffer when nothing is available
/// so a scheduler tick never blocks on i/o.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: Option<SocketAddr>,
    buffer_size: usize,
    lineq: LineQueue,
    /// Bytes accepted by `write` that the OS would not take yet
    backlog: Vec<u8>,
    closed: bool,
}

impl Connection {
    /// Wrap an accepted or connected stream, switching it to non-blocking
    /// mode.
    pub fn new(stream: TcpStream, config: &TransportConfig) -> TransportResult<Self> {
        stream.set_nonblocking(true)?;
        let peer = stream.peer_addr().ok();
        Ok(Self {
            stream,
            peer,
            buffer_size: config.buffer_size,
            lineq: LineQueue::with_terminator(config.terminator.clone())?,
            backlog: Vec::new(),
            closed: false,
        })
    }

    /// Connect to a local or remote address and wrap the stream.
    ///
    /// The connect itself is the only blocking step, bounded by
    /// `connect_timeout`; the resulting connection is non-blocking.
    pub fn connect(config: &TransportConfig, connect_timeout: Duration) -> TransportResult<Self> {
        let addr: SocketAddr = config
            .addr()
            .parse()
            .map_err(|e| TransportError::Config(format!("bad address {}: {e}", config.addr())))?;
        let stream = TcpStream::connect_timeout(&addr, connect_timeout)
            .map_err(TransportError::from_io)?;
        debug!("connected to {addr}");
        Self::new(stream, config)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn terminator(&self) -> &str {
        self.lineq.terminator()
    }

    /// Send raw bytes, returning the number written.
    ///
    /// `Timeout` is retry-safe. A `Fatal` error marks the connection
    /// closed; it must not be used again.
    pub fn send(&mut self, data: &[u8]) -> TransportResult<usize> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if data.is_empty() {
            return Ok(0);
        }
        match self.stream.write(data) {
            Ok(n) => Ok(n),
            Err(e) => {
                let err = TransportError::from_io(e);
                if err.is_fatal() {
                    self.mark_closed();
                }
                Err(err)
            }
        }
    }

    /// Encode text as UTF-8 and send it in full.
    ///
    /// Bytes the OS will not take right now land in a backlog that is
    /// flushed ahead of later writes, so line boundaries survive
    /// send-buffer backpressure. Returns the number of bytes accepted.
    pub fn write(&mut self, text: &str) -> TransportResult<usize> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.flush_backlog()?;

        let bytes = text.as_bytes();
        if !self.backlog.is_empty() {
            // still backpressured; queue behind the older bytes
            self.backlog.extend_from_slice(bytes);
            return Ok(bytes.len());
        }

        let mut sent = 0;
        while sent < bytes.len() {
            match self.send(&bytes[sent..]) {
                Ok(0) => break,
                Ok(n) => sent += n,
                Err(TransportError::Timeout) => break,
                Err(e) => return Err(e),
            }
        }
        if sent < bytes.len() {
            self.backlog.extend_from_slice(&bytes[sent..]);
        }
        Ok(bytes.len())
    }

    /// Try to drain the write backlog. Stops without error on
    /// backpressure; a fatal error marks the connection closed.
    pub fn flush_backlog(&mut self) -> TransportResult<()> {
        while !self.backlog.is_empty() {
            match self.stream.write(&self.backlog) {
                Ok(0) => break,
                Ok(n) => {
                    self.backlog.drain(..n);
                }
                Err(e) => {
                    let err = TransportError::from_io(e);
                    if err.is_timeout() {
                        break;
                    }
                    if err.is_fatal() {
                        self.mark_closed();
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Bytes currently held back by backpressure.
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Write text with the configured terminator appended.
    pub fn write_line(&mut self, text: &str) -> TransportResult<usize> {
        let mut line = text.to_string();
        line.push_str(self.lineq.terminator());
        self.write(&line)
    }

    /// Zero-wait read of up to `max` bytes (0 = configured buffer size).
    ///
    /// Returns an empty vec when no data is available - "nothing yet" is
    /// never an error. An orderly peer close is fatal: the stream is done.
    pub fn receive(&mut self, max: usize) -> TransportResult<Vec<u8>> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        // a read-only caller must still let queued writes drain
        if !self.backlog.is_empty() {
            self.flush_backlog()?;
        }
        let cap = if max == 0 { self.buffer_size } else { max };
        let mut buf = vec![0u8; cap];
        match self.stream.read(&mut buf) {
            Ok(0) => {
                self.mark_closed();
                Err(TransportError::Fatal("peer closed connection".to_string()))
            }
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) => {
                let err = TransportError::from_io(e);
                match err {
                    TransportError::Timeout => Ok(Vec::new()),
                    other => {
                        if other.is_fatal() {
                            self.mark_closed();
                        }
                        Err(other)
                    }
                }
            }
        }
    }

    /// Read one complete line, feeding available bytes through the
    /// internal line queue. Returns the line with its terminator.
    pub fn read_line(&mut self) -> TransportResult<Option<String>> {
        if let Some(line) = self.lineq.read_line() {
            return Ok(Some(line));
        }
        let data = self.receive(0)?;
        self.lineq.feed(&data);
        Ok(self.lineq.read_line())
    }

    /// Drain every complete line currently available.
    pub fn read_lines(&mut self) -> TransportResult<Vec<String>> {
        let data = self.receive(0)?;
        self.lineq.feed(&data);
        Ok(self.lineq.read_lines())
    }

    /// Shut the connection down. Idempotent; this is the single close
    /// point for the underlying stream.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            // already gone is fine
            debug!("shutdown on {:?}: {e}", self.peer);
        }
        self.mark_closed();
    }

    fn mark_closed(&mut self) {
        if !self.closed {
            self.closed = true;
            debug!("connection to {:?} closed", self.peer);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown();
    }
}
