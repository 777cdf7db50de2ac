/*!
 * Process Types
 * Supervisor errors, cross-process failure records, stop-log events,
 * and configuration
 */

use crate::transport::TransportError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default deadline for the child to connect back
pub const DEF_HANDSHAKE_DEADLINE: Duration = Duration::from_secs(300);

/// Default timeout for one control-channel query/response
pub const DEF_RESPONSE_TIMEOUT: Duration = Duration::from_secs(9);

/// Default wait after each rung of the stop escalation ladder
pub const DEF_STOP_WAIT: Duration = Duration::from_millis(1100);

/// Default supervisor tick sleep
pub const DEF_SUPERVISOR_SLEEP: Duration = Duration::from_millis(100);

/// Process operation result
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Supervisor errors
#[derive(Error, Debug, Clone)]
pub enum ProcessError {
    #[error("spawn failed: {0}")]
    Spawn(String),

    #[error("bad launch token: {0}")]
    BadToken(String),

    /// Handshake PID mismatch or malformed control line; fatal to the
    /// control channel only
    #[error("control protocol error: {0}")]
    Protocol(String),

    /// The child failed before becoming supervisable
    #[error("child failed to launch: {0}")]
    ChildLaunch(ChildFailure),

    /// The child raised during normal operation
    #[error("child process error: {0}")]
    ChildProcess(ChildFailure),

    #[error("no control channel established")]
    NoControl,

    #[error("timed out waiting for control response")]
    ResponseTimeout,

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<TransportError> for ProcessError {
    fn from(err: TransportError) -> Self {
        ProcessError::Transport(err.to_string())
    }
}

/// Failure record marshalled across the child's stdio.
///
/// A small tagged record rather than a reconstructed exception
/// hierarchy: a kind, a human message, optional structured detail, and
/// the captured traceback lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ChildFailure {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traceback: Vec<String>,
}

impl ChildFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            detail: None,
            traceback: Vec::new(),
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

impl fmt::Display for ChildFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// One entry in the append-only stop-log.
///
/// Every rung of the escalation ladder is recorded, attempted exactly
/// once per `stop()` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "step", content = "detail")]
pub enum StopEvent {
    StopRequested,
    ShutdownSent,
    ShutdownSkipped(String),
    StillAlive,
    Exited(i32),
    Terminated,
    TerminateFailed(String),
    Killed,
    KillFailed(String),
}

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Child program image; defaults to the current executable
    pub program: Option<PathBuf>,
    /// How long the child gets to connect back; zero disables the
    /// control channel entirely
    pub handshake_deadline: Duration,
    /// Bound on one control query/response round trip
    pub response_timeout: Duration,
    /// Wait applied after the graceful rung and after terminate
    pub stop_wait: Duration,
    /// Supervisor tick sleep
    pub sleep: Duration,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            program: None,
            handshake_deadline: DEF_HANDSHAKE_DEADLINE,
            response_timeout: DEF_RESPONSE_TIMEOUT,
            stop_wait: DEF_STOP_WAIT,
            sleep: DEF_SUPERVISOR_SLEEP,
        }
    }
}

impl ProcessConfig {
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = Some(program.into());
        self
    }

    pub fn with_handshake_deadline(mut self, deadline: Duration) -> Self {
        self.handshake_deadline = deadline;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_stop_wait(mut self, wait: Duration) -> Self {
        self.stop_wait = wait;
        self
    }

    pub fn with_sleep(mut self, sleep: Duration) -> Self {
        self.sleep = sleep;
        self
    }

    /// True when a control channel should be set up at launch.
    pub fn control_requested(&self) -> bool {
        !self.handshake_deadline.is_zero()
    }
}
