/*!
 * Runner Types
 * Lifecycle states, errors, configuration, and the per-tick Task hook
 */

use crate::transport::TransportError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Default sleep between ticks
pub const DEF_SLEEP: Duration = Duration::from_millis(100);

/// Default timeout for connecting to a control port
pub const DEF_CONNECT_TIMEOUT: Duration = Duration::from_secs(9);

/// Runner operation result
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Runner errors
#[derive(Error, Debug)]
pub enum RunnerError {
    /// The runner has been closed; a new instance must be created
    #[error("runner is closed")]
    Closed,

    /// The per-tick task hook failed; the loop has stopped
    #[error("task error: {0}")]
    Task(String),

    /// Control-channel failure
    #[error("control channel error: {0}")]
    Control(#[from] TransportError),

    /// The worker thread could not be spawned
    #[error("failed to spawn runner thread: {0}")]
    Spawn(String),

    /// The worker thread panicked before returning a result
    #[error("runner thread panicked")]
    Panicked,
}

impl RunnerError {
    /// Wrap an arbitrary task failure.
    pub fn task(err: impl std::fmt::Display) -> Self {
        RunnerError::Task(err.to_string())
    }
}

/// Runner lifecycle state
///
/// `Closed` is terminal: no sequence of calls returns a closed runner to
/// `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    /// Constructed, never opened
    Created,
    /// `open()` has run; ready to loop
    Open,
    /// Loop in progress
    Running,
    /// `stop()` requested; loop exits at the next tick boundary
    Stopped,
    /// Torn down, irreversibly
    Closed,
}

/// Runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RunnerConfig {
    /// Name used for the worker thread and status records
    pub name: Option<String>,
    /// Sleep between ticks
    pub sleep: Duration,
    /// Local port of a controlling process to connect back to
    pub control_port: Option<u16>,
    /// Bound on the control-port connect
    pub connect_timeout: Duration,
    /// Line terminator for control-channel traffic
    pub terminator: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            name: None,
            sleep: DEF_SLEEP,
            control_port: None,
            connect_timeout: DEF_CONNECT_TIMEOUT,
            terminator: crate::transport::types::DEF_TERMINATOR.to_string(),
        }
    }
}

impl RunnerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_sleep(mut self, sleep: Duration) -> Self {
        self.sleep = sleep;
        self
    }

    pub fn with_control_port(mut self, port: u16) -> Self {
        self.control_port = Some(port);
        self
    }
}

/// Per-tick extension point driven by a [`Runner`](crate::runner::Runner).
///
/// `io` is called once per pass through the loop and must not block; all
/// output belongs on the tick's pause-aware sink, never on stdout
/// directly.
pub trait Task: Send {
    /// One pass through the loop.
    fn io(&mut self, tick: &mut crate::runner::Tick<'_>) -> RunnerResult<()>;

    /// Setup run by `open()` before the state flips to `Open`.
    fn open(&mut self) -> RunnerResult<()> {
        Ok(())
    }

    /// Answer a control-channel query this task recognizes. Queries the
    /// task declines fall through to the base `ping`/`status`/`shutdown`
    /// handling.
    fn query(&mut self, _line: &str) -> Option<Value> {
        None
    }

    /// Task-specific fields merged into the runner's status record.
    fn status(&mut self) -> Value {
        Value::Null
    }

    /// Pause edge detected. Errors are logged and swallowed; the loop
    /// continues.
    fn on_pause(&mut self) -> RunnerResult<()> {
        Ok(())
    }

    /// Resume edge detected, after the buffered output has been flushed.
    fn on_resume(&mut self) -> RunnerResult<()> {
        Ok(())
    }

    /// Teardown, run exactly once from `shutdown()`.
    fn close(&mut self) {}
}
