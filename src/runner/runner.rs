/*!
 * Runner
 * Cooperative event loop with explicit lifecycle states and an
 * extensible per-tick hook
 */

use super::output::Output;
use super::types::{RunnerConfig, RunnerError, RunnerResult, RunnerState, Task};
use crate::transport::{Connection, TransportConfig};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// State shared between a running loop and its handles.
#[derive(Debug)]
pub(crate) struct RunnerShared {
    state: Mutex<RunnerState>,
    paused: Arc<AtomicBool>,
    threaded: AtomicBool,
}

impl RunnerShared {
    fn new() -> Self {
        Self {
            state: Mutex::new(RunnerState::Created),
            paused: Arc::new(AtomicBool::new(false)),
            threaded: AtomicBool::new(false),
        }
    }

    pub(crate) fn state(&self) -> RunnerState {
        *self.state.lock()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state() == RunnerState::Running
    }

    /// Advisory stop: Running becomes Stopped; anything else is left
    /// alone, so a stop before open is a no-op.
    pub(crate) fn request_stop(&self) {
        let mut state = self.state.lock();
        if *state == RunnerState::Running {
            *state = RunnerState::Stopped;
        }
    }

    /// Transition to Closed. Returns true the first time only, so
    /// concurrent teardown cannot double-run.
    fn close(&self) -> bool {
        let mut state = self.state.lock();
        if *state == RunnerState::Closed {
            false
        } else {
            *state = RunnerState::Closed;
            true
        }
    }
}

/// Per-tick context handed to [`Task::io`].
pub struct Tick<'a> {
    out: &'a mut Output,
    shared: &'a RunnerShared,
}

impl<'a> Tick<'a> {
    /// Pause-aware output sink. Task output must go through here, never
    /// to stdout directly.
    pub fn out(&mut self) -> &mut Output {
        self.out
    }

    /// Ask the loop to stop at the next tick boundary.
    pub fn stop(&self) {
        self.shared.request_stop();
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }
}

/// A cooperative run loop.
///
/// Drive it synchronously with [`run`](Runner::run) or on a dedicated
/// worker thread with [`start`](Runner::start). The loop calls the task's
/// `io` hook each pass, services the control connection when one exists,
/// honors pause/resume edges, then sleeps the configured interval.
pub struct Runner {
    config: RunnerConfig,
    shared: Arc<RunnerShared>,
    out: Output,
    control: Option<Connection>,
    pause_state: bool,
}

impl Runner {
    pub fn new(config: RunnerConfig) -> Self {
        let shared = Arc::new(RunnerShared::new());
        let out = Output::new(shared.paused.clone(), config.terminator.clone());
        Self {
            config,
            shared,
            out,
            control: None,
            pause_state: false,
        }
    }

    pub fn state(&self) -> RunnerState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn is_threaded(&self) -> bool {
        self.shared.threaded.load(Ordering::SeqCst)
    }

    pub fn name(&self) -> String {
        self.config
            .name
            .clone()
            .unwrap_or_else(|| format!("runner-{:?}", thread::current().id()))
    }

    pub fn sleep(&self) -> Duration {
        self.config.sleep
    }

    pub fn control_port(&self) -> Option<u16> {
        self.config.control_port
    }

    /// Replace the output sink (stdout by default).
    pub fn set_output_sink(&mut self, sink: Box<dyn std::io::Write + Send>) {
        self.out.set_sink(sink);
    }

    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Idempotent transition to Open. Connects back to the control port
    /// (writing our PID as the handshake line), then runs the task's own
    /// setup. Opening a closed runner is an error.
    pub fn open(&mut self, task: &mut dyn Task) -> RunnerResult<()> {
        match self.shared.state() {
            RunnerState::Closed => return Err(RunnerError::Closed),
            RunnerState::Created => {}
            // already open (or beyond); nothing to do
            _ => return Ok(()),
        }

        if let Some(port) = self.config.control_port {
            self.connect_control(port);
        }

        task.open()?;
        *self.shared.state.lock() = RunnerState::Open;
        debug!("runner {} open", self.name());
        Ok(())
    }

    fn connect_control(&mut self, port: u16) {
        let config = TransportConfig::default()
            .with_port(port)
            .with_terminator(self.config.terminator.clone());
        match Connection::connect(&config, self.config.connect_timeout) {
            Ok(mut conn) => {
                let pid = std::process::id();
                if let Err(e) = conn.write_line(&pid.to_string()) {
                    warn!("control handshake write failed: {e}");
                    return;
                }
                info!("control channel connected on port {port} (pid {pid})");
                self.control = Some(conn);
            }
            Err(e) => {
                // run on without remote control, as a plain loop
                warn!("control connect to port {port} failed: {e}");
            }
        }
    }

    /// Blocking run loop. Opens if necessary, loops while Running, and
    /// always tears down on the way out. A task `io` error stops the
    /// loop and is returned after teardown completes.
    pub fn run(&mut self, task: &mut dyn Task) -> RunnerResult<()> {
        if let Err(e) = self.open(task) {
            self.shutdown(task);
            return Err(e);
        }

        {
            let mut state = self.shared.state.lock();
            if *state == RunnerState::Closed {
                return Err(RunnerError::Closed);
            }
            *state = RunnerState::Running;
        }
        self.pause_state = self.is_paused();
        info!("runner {} running", self.name());

        let mut result = Ok(());
        while self.shared.is_running() {
            {
                let mut tick = Tick {
                    out: &mut self.out,
                    shared: &self.shared,
                };
                if let Err(e) = task.io(&mut tick) {
                    error!("runner {} task error: {e}", self.name());
                    result = Err(e);
                    self.shared.request_stop();
                    break;
                }
            }

            if self.control.is_some() {
                self.service_control(task);
            }

            self.check_pause_edge(task);

            thread::sleep(self.config.sleep);
        }

        self.shutdown(task);
        result
    }

    /// Detect a pause-state change and fire the matching callback.
    /// Callback errors are logged and swallowed; the loop continues.
    fn check_pause_edge(&mut self, task: &mut dyn Task) {
        let paused = self.is_paused();
        if paused == self.pause_state {
            return;
        }
        self.pause_state = paused;
        if paused {
            if let Err(e) = task.on_pause() {
                warn!("on_pause callback failed: {e}");
            }
        } else {
            if let Err(e) = self.out.flush_buffered() {
                warn!("resume flush failed: {e}");
            }
            if let Err(e) = task.on_resume() {
                warn!("on_resume callback failed: {e}");
            }
        }
    }

    /// Drain the control connection and answer every complete line:
    /// one line in, one compact JSON line out. A fatal transport error
    /// drops the control channel; the loop itself carries on.
    fn service_control(&mut self, task: &mut dyn Task) {
        let lines = {
            let Some(conn) = self.control.as_mut() else {
                return;
            };
            match conn.read_lines() {
                Ok(lines) => lines,
                Err(e) if e.is_fatal() => {
                    warn!("control channel lost: {e}");
                    self.control = None;
                    return;
                }
                Err(e) => {
                    debug!("control read: {e}");
                    return;
                }
            }
        };

        for line in lines {
            let query = line.trim();
            if query.is_empty() {
                continue;
            }
            let reply = self.answer_query(task, query);
            let text = match serde_json::to_string(&reply) {
                Ok(text) => text,
                Err(e) => {
                    warn!("could not serialize reply for {query:?}: {e}");
                    continue;
                }
            };
            if let Some(conn) = self.control.as_mut() {
                if let Err(e) = conn.write_line(&text) {
                    if e.is_fatal() {
                        warn!("control channel lost: {e}");
                        self.control = None;
                        return;
                    }
                    debug!("control write: {e}");
                }
            }
        }
    }

    /// Dispatch one control query. The task gets first refusal so it can
    /// extend (or shadow) the base vocabulary; `ping`, `status`, and
    /// `shutdown` are answered here.
    fn answer_query(&mut self, task: &mut dyn Task, query: &str) -> Value {
        if let Some(reply) = task.query(query) {
            return json!({ "query": query, "reply": reply });
        }
        match query {
            "ping" => json!({ "query": query, "reply": "pong" }),
            "status" => json!({ "query": query, "reply": self.status(task) }),
            "shutdown" => {
                info!("runner {} shutdown requested over control channel", self.name());
                self.shared.request_stop();
                json!({ "query": query, "reply": self.status(task) })
            }
            _ => json!({ "query": query, "reply": Value::Null, "error": "unknown-query" }),
        }
    }

    /// Status record: lifecycle flags plus the task's own fields.
    pub fn status(&self, task: &mut dyn Task) -> Value {
        let state = self.shared.state();
        json!({
            "name": self.name(),
            "state": state,
            "active": !matches!(state, RunnerState::Created | RunnerState::Closed),
            "running": state == RunnerState::Running,
            "threaded": self.is_threaded(),
            "paused": self.is_paused(),
            "sleep": self.config.sleep.as_secs_f64(),
            "control_port": self.config.control_port,
            "task": task.status(),
        })
    }

    /// Advisory stop; takes effect at the next tick boundary. A no-op
    /// unless the loop is Running.
    pub fn stop(&self) {
        self.shared.request_stop();
    }

    /// Unconditional, idempotent transition to Closed.
    pub fn close(&mut self) {
        if self.shared.close() {
            if let Some(mut conn) = self.control.take() {
                conn.shutdown();
            }
            let _ = self.out.flush_buffered();
            debug!("runner {} closed", self.name());
        }
    }

    /// Stop then close, running task teardown exactly once.
    pub fn shutdown(&mut self, task: &mut dyn Task) {
        self.shared.request_stop();
        if self.shared.close() {
            task.close();
            if let Some(mut conn) = self.control.take() {
                conn.shutdown();
            }
            let _ = self.out.flush_buffered();
            info!("runner {} shut down", self.name());
        }
    }

    /// Run on a dedicated worker thread, returning a handle for stop,
    /// pause, and join.
    pub fn start(mut self, mut task: Box<dyn Task>) -> RunnerResult<RunnerHandle> {
        let name = self.name();
        let shared = self.shared.clone();
        shared.threaded.store(true, Ordering::SeqCst);

        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || self.run(task.as_mut()))
            .map_err(|e| RunnerError::Spawn(e.to_string()))?;

        Ok(RunnerHandle {
            name,
            shared,
            join: Some(join),
        })
    }
}

/// Handle to a runner loop on its worker thread.
pub struct RunnerHandle {
    name: String,
    shared: Arc<RunnerShared>,
    join: Option<JoinHandle<RunnerResult<()>>>,
}

impl RunnerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> RunnerState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Advisory stop; the loop exits at its next tick boundary.
    pub fn stop(&self) {
        self.shared.request_stop();
    }

    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
    }

    /// Wait for the loop to finish and surface its result.
    pub fn join(mut self) -> RunnerResult<()> {
        match self.join.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(RunnerError::Panicked),
            },
            None => Ok(()),
        }
    }

    /// Stop and wait, in one call.
    pub fn stop_and_join(self) -> RunnerResult<()> {
        self.stop();
        self.join()
    }
}

impl Drop for RunnerHandle {
    fn drop(&mut self) {
        // dropping the handle must not leave a detached loop spinning
        self.shared.request_stop();
    }
}
