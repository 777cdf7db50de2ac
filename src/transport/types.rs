/*!
 * Transport Types
 * Error taxonomy and configuration for connections and listeners
 */

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Default receive buffer size in bytes
pub const DEF_BUFFER: usize = 4096;

/// Default line terminator
pub const DEF_TERMINATOR: &str = "\r\n";

/// Default bind host
pub const DEF_HOST: &str = "127.0.0.1";

/// Transport operation result
pub type TransportResult<T> = Result<T, TransportError>;

/// Transport errors
///
/// The `Timeout`/`Fatal` split is load-bearing for callers: a handler is
/// dropped only on `Fatal` (or `Closed`), never on an ordinary timeout.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Transient condition; the operation is retry-safe
    #[error("transport operation timed out")]
    Timeout,

    /// The connection has been shut down on our side
    #[error("transport closed")]
    Closed,

    /// Unrecoverable peer condition; the connection must be dropped
    #[error("fatal transport error: {0}")]
    Fatal(String),

    /// Recoverable i/o error; the connection is usually still usable
    #[error("transport i/o error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration value
    #[error("invalid transport config: {0}")]
    Config(String),
}

impl TransportError {
    /// Classify an i/o error into the transport taxonomy.
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted => {
                TransportError::Timeout
            }
            io::ErrorKind::ConnectionReset => {
                TransportError::Fatal(format!("peer reset connection: {err}"))
            }
            io::ErrorKind::ConnectionAborted => {
                TransportError::Fatal(format!("connection forcibly closed: {err}"))
            }
            io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected => {
                TransportError::Fatal(format!("send after peer disconnect: {err}"))
            }
            _ => TransportError::Io(err),
        }
    }

    /// True when the connection must be dropped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Fatal(_) | TransportError::Closed)
    }

    /// True when the operation may simply be retried next tick.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout)
    }
}

/// Configuration for connections and listeners
///
/// The listen backlog is left to the OS default and listeners get
/// SO_REUSEADDR, matching what std's `TcpListener` already does.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TransportConfig {
    pub host: String,
    /// Port to bind or connect to; 0 binds an ephemeral port
    pub port: u16,
    /// Receive buffer size per read
    pub buffer_size: usize,
    /// Line terminator for `write_line`/`read_line`
    pub terminator: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: DEF_HOST.to_string(),
            port: 0,
            buffer_size: DEF_BUFFER,
            terminator: DEF_TERMINATOR.to_string(),
        }
    }
}

impl TransportConfig {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.terminator = terminator.into();
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Bind address string for this config.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
