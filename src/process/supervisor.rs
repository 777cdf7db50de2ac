/*!
 * Process Supervisor
 * Launches a worker in a child OS process, performs the PID rendezvous
 * handshake over a private control port, captures stdio, and enforces
 * the stop escalation ladder
 */

use super::launch::{encode_token, LaunchSpec};
use super::types::{ChildFailure, ProcessConfig, ProcessError, ProcessResult, StopEvent};
use crate::core::Pid;
use crate::runner::{Runner, RunnerConfig, RunnerHandle, RunnerResult, Task, Tick};
use crate::transport::{Connection, Listener, TransportConfig};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Poll interval used inside bounded waits
const POLL_SLEEP: Duration = Duration::from_millis(20);

/// Window for the child's PID line after the control connection arrives
const PID_READ_WINDOW: Duration = Duration::from_millis(500);

/// Grace period before the post-spawn launch check
const LAUNCH_PROBE: Duration = Duration::from_millis(50);

/// Control-channel state shared between the supervisor tick and the
/// parent-side API.
struct ControlSlot {
    listener: Option<Listener>,
    conn: Option<Connection>,
    /// Lines written before the handshake completed
    queued: Vec<String>,
    deadline: Instant,
    /// The handshake completes at most once
    established: bool,
}

/// State shared between the supervisor loop and the `Process` handle.
struct ProcShared {
    child: Mutex<Option<Child>>,
    /// Sticky exit code; survives reaping
    exit_code: Mutex<Option<i32>>,
    control: Mutex<ControlSlot>,
    failure: Mutex<Option<ProcessError>>,
    /// Plain stdout lines from the child
    output: Mutex<VecDeque<String>>,
    stop_log: Mutex<Vec<StopEvent>>,
}

impl ProcShared {
    /// Poll for an exit code without blocking. The code is retained even
    /// after the child handle is gone.
    fn poll(&self) -> Option<i32> {
        if let Some(code) = *self.exit_code.lock() {
            return Some(code);
        }
        let mut child = self.child.lock();
        let status = child.as_mut()?.try_wait().ok()?;
        let code = status.map(|s| s.code().unwrap_or(-1));
        if let Some(code) = code {
            *self.exit_code.lock() = Some(code);
        }
        code
    }

    fn record_failure(&self, err: ProcessError) {
        let mut slot = self.failure.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }
}

/// Classify the child's captured stdio per the cross-process error
/// protocol: both streams means the child never started correctly
/// (stdout carries kind + payload, stderr the traceback); stderr alone
/// is an ordinary runtime failure.
fn evaluate_streams(stdout: &[u8], stderr: &[u8]) -> Option<ProcessError> {
    if stderr.is_empty() {
        return None;
    }
    let err_text = String::from_utf8_lossy(stderr);
    let err_text = err_text.trim();
    let out_text = String::from_utf8_lossy(stdout);
    let out_text = out_text.trim();

    if !out_text.is_empty() {
        let mut lines = out_text.lines();
        let kind = lines.next().unwrap_or("child-error").trim().to_string();
        let payload = lines.collect::<Vec<_>>().join("\n");
        let mut failure = ChildFailure::new(kind, payload.clone());
        if let Ok(detail) = serde_json::from_str::<Value>(&payload) {
            failure.detail = Some(detail);
        }
        failure.traceback = err_text.lines().map(str::to_string).collect();
        return Some(ProcessError::ChildLaunch(failure));
    }

    // stderr only: structured record when possible, raw text otherwise
    let failure = serde_json::from_str::<ChildFailure>(err_text)
        .unwrap_or_else(|_| ChildFailure::new("child-error", err_text));
    Some(ProcessError::ChildProcess(failure))
}

/// Forward one child pipe through a channel, chunk by chunk, until EOF.
fn spawn_pipe_reader(
    name: &str,
    mut pipe: impl Read + Send + 'static,
    tx: flume::Sender<Vec<u8>>,
) {
    let thread_name = format!("pipe-{name}");
    let spawned = thread::Builder::new().name(thread_name).spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    if let Err(e) = spawned {
        warn!("could not spawn {name} reader: {e}");
    }
}

/// The supervisor's per-tick work: drain stdio, watch for exit, and
/// drive the rendezvous handshake until the deadline.
struct SupervisorTask {
    shared: Arc<ProcShared>,
    expected_pid: Pid,
    stdout_rx: flume::Receiver<Vec<u8>>,
    stderr_rx: flume::Receiver<Vec<u8>>,
    stdout_buf: Vec<u8>,
    stderr_buf: Vec<u8>,
}

impl SupervisorTask {
    fn drain_stdio(&mut self) {
        while let Ok(chunk) = self.stdout_rx.try_recv() {
            self.stdout_buf.extend_from_slice(&chunk);
        }
        while let Ok(chunk) = self.stderr_rx.try_recv() {
            self.stderr_buf.extend_from_slice(&chunk);
        }
    }

    /// The child has exited: turn captured stdio into a typed failure,
    /// or queue plain stdout for the caller.
    fn evaluate_stdio(&mut self) {
        self.drain_stdio();
        if let Some(err) = evaluate_streams(&self.stdout_buf, &self.stderr_buf) {
            error!("child {} failed: {err}", self.expected_pid);
            self.shared.record_failure(err);
        } else if !self.stdout_buf.is_empty() {
            let text = String::from_utf8_lossy(&self.stdout_buf);
            let mut output = self.shared.output.lock();
            output.extend(text.lines().map(str::to_string));
        }
        self.stdout_buf.clear();
        self.stderr_buf.clear();
    }

    /// Poll the control listener while the handshake is pending. On the
    /// first accepted connection, the first line must equal the
    /// OS-reported child PID.
    fn service_handshake(&mut self) {
        let mut slot = self.shared.control.lock();
        if slot.established || slot.listener.is_none() {
            return;
        }
        if Instant::now() >= slot.deadline {
            warn!(
                "handshake deadline elapsed for child {}; control abandoned",
                self.expected_pid
            );
            slot.listener = None;
            return;
        }

        let accepted = match slot.listener.as_ref() {
            Some(listener) => listener.accept_if(),
            None => return,
        };
        let mut conn = match accepted {
            Ok(Some(conn)) => conn,
            Ok(None) => return,
            Err(e) => {
                warn!("control accept failed: {e}");
                return;
            }
        };

        // the PID line should already be in flight; give it a moment
        let window = Instant::now() + PID_READ_WINDOW;
        let mut line = None;
        while Instant::now() < window {
            match conn.read_line() {
                Ok(Some(found)) => {
                    line = Some(found);
                    break;
                }
                Ok(None) => thread::sleep(POLL_SLEEP),
                Err(e) => {
                    self.shared.record_failure(ProcessError::Protocol(format!(
                        "handshake read failed: {e}"
                    )));
                    slot.listener = None;
                    return;
                }
            }
        }

        slot.listener = None;
        match line {
            Some(line) if line.trim() == self.expected_pid.to_string() => {
                info!("control channel established with child {}", self.expected_pid);
                for queued in slot.queued.drain(..) {
                    if let Err(e) = conn.write_line(&queued) {
                        warn!("queued control write failed: {e}");
                        break;
                    }
                }
                slot.conn = Some(conn);
                slot.established = true;
            }
            Some(line) => {
                conn.shutdown();
                self.shared.record_failure(ProcessError::Protocol(format!(
                    "handshake pid mismatch: expected {}, got {:?}",
                    self.expected_pid,
                    line.trim()
                )));
            }
            None => {
                conn.shutdown();
                self.shared.record_failure(ProcessError::Protocol(
                    "no pid line within the handshake window".to_string(),
                ));
            }
        }
    }
}

impl Task for SupervisorTask {
    fn io(&mut self, tick: &mut Tick<'_>) -> RunnerResult<()> {
        self.drain_stdio();

        if self.shared.poll().is_some() {
            // child is gone; classify its last words and wind down
            self.evaluate_stdio();
            tick.stop();
            return Ok(());
        }

        self.service_handshake();
        Ok(())
    }

    fn status(&mut self) -> Value {
        json!({
            "kind": "supervisor",
            "child_pid": self.expected_pid,
        })
    }

    fn close(&mut self) {
        debug!("supervisor for child {} closing", self.expected_pid);
    }
}

/// Launches and supervises one worker in a child OS process.
///
/// The child runs this same program image through the `launch`
/// bootstrap; parent and child talk over a private control connection
/// established by a one-time PID handshake. `stop()` walks the
/// escalation ladder - graceful query, wait, terminate, wait, kill -
/// recording every step in the stop-log.
pub struct Process {
    target: String,
    config: ProcessConfig,
    pid: Pid,
    control_port: Option<u16>,
    shared: Arc<ProcShared>,
    runner: Option<RunnerHandle>,
    stopped: bool,
}

impl Process {
    /// Spawn the child and start the supervisor loop. Returns promptly:
    /// the handshake continues in the background and the control channel
    /// simply remains absent if the child never connects in time.
    pub fn launch(mut spec: LaunchSpec, config: ProcessConfig) -> ProcessResult<Self> {
        let target = spec.target.clone();

        // the rendezvous listener must exist before the child does
        let (listener, control_port) = if config.control_requested() {
            let listener = Listener::bind(&TransportConfig::default())?;
            let port = listener.port();
            spec = spec.with_kwarg("control_port", json!(port));
            (Some(listener), Some(port))
        } else {
            (None, None)
        };
        spec = spec.with_kwarg("sleep", json!(config.sleep.as_secs_f64()));

        let token = encode_token(&spec)?;
        let program = match &config.program {
            Some(program) => program.clone(),
            None => std::env::current_exe()
                .map_err(|e| ProcessError::Spawn(format!("current_exe: {e}")))?,
        };

        let mut child = Command::new(&program)
            .arg("launch")
            .arg(&token)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ProcessError::Spawn(format!("{target}: {e}")))?;
        let pid = child.id();
        info!("launched child {pid} running {target:?}");

        let (stdout_tx, stdout_rx) = flume::unbounded();
        let (stderr_tx, stderr_rx) = flume::unbounded();
        if let Some(stdout) = child.stdout.take() {
            spawn_pipe_reader("stdout", stdout, stdout_tx);
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_pipe_reader("stderr", stderr, stderr_tx);
        }

        let shared = Arc::new(ProcShared {
            child: Mutex::new(Some(child)),
            exit_code: Mutex::new(None),
            control: Mutex::new(ControlSlot {
                listener,
                conn: None,
                queued: Vec::new(),
                deadline: Instant::now() + config.handshake_deadline,
                established: false,
            }),
            failure: Mutex::new(None),
            output: Mutex::new(VecDeque::new()),
            stop_log: Mutex::new(Vec::new()),
        });

        // quick probe: a child dead this early never launched at all
        thread::sleep(LAUNCH_PROBE);
        if shared.poll().is_some() {
            let mut stdout_buf = Vec::new();
            let mut stderr_buf = Vec::new();
            let grab = Instant::now() + Duration::from_millis(200);
            while Instant::now() < grab {
                while let Ok(chunk) = stdout_rx.try_recv() {
                    stdout_buf.extend_from_slice(&chunk);
                }
                while let Ok(chunk) = stderr_rx.try_recv() {
                    stderr_buf.extend_from_slice(&chunk);
                }
                thread::sleep(POLL_SLEEP);
            }
            return Err(match evaluate_streams(&stdout_buf, &stderr_buf) {
                Some(ProcessError::ChildProcess(failure)) | Some(ProcessError::ChildLaunch(failure)) => {
                    ProcessError::ChildLaunch(failure)
                }
                Some(other) => other,
                None => ProcessError::ChildLaunch(ChildFailure::new(
                    "early-exit",
                    format!("child exited immediately with code {:?}", shared.poll()),
                )),
            });
        }

        let task = SupervisorTask {
            shared: shared.clone(),
            expected_pid: pid,
            stdout_rx,
            stderr_rx,
            stdout_buf: Vec::new(),
            stderr_buf: Vec::new(),
        };
        let runner = Runner::new(
            RunnerConfig::default()
                .with_name(format!("supervisor-{pid}"))
                .with_sleep(config.sleep),
        );
        let handle = runner
            .start(Box::new(task))
            .map_err(|e| ProcessError::Spawn(format!("supervisor thread: {e}")))?;

        Ok(Self {
            target,
            config,
            pid,
            control_port,
            shared,
            runner: Some(handle),
            stopped: false,
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Port of the rendezvous listener, when a control channel was
    /// requested.
    pub fn control_port(&self) -> Option<u16> {
        self.control_port
    }

    /// Non-blocking poll for the exit code; sticky once seen.
    pub fn poll(&self) -> Option<i32> {
        self.shared.poll()
    }

    pub fn is_alive(&self) -> bool {
        self.poll().is_none()
    }

    /// True once the PID handshake has completed.
    pub fn has_control(&self) -> bool {
        let slot = self.shared.control.lock();
        slot.established && slot.conn.is_some()
    }

    /// Latest failure recorded by the supervisor, if any.
    pub fn failure(&self) -> Option<ProcessError> {
        self.shared.failure.lock().clone()
    }

    /// Pop one captured plain-stdout line from the child.
    pub fn read_output(&self) -> Option<String> {
        self.shared.output.lock().pop_front()
    }

    /// The append-only escalation record from `stop()` calls.
    pub fn stop_log(&self) -> Vec<StopEvent> {
        self.shared.stop_log.lock().clone()
    }

    /// Write one line to the child over the control channel. Lines
    /// written before the handshake completes are queued and flushed
    /// when it does.
    pub fn write_line(&self, text: &str) -> ProcessResult<()> {
        let mut slot = self.shared.control.lock();
        if slot.established {
            match slot.conn.as_mut() {
                Some(conn) => {
                    conn.write_line(text)?;
                    Ok(())
                }
                None => Err(ProcessError::NoControl),
            }
        } else {
            slot.queued.push(text.to_string());
            Ok(())
        }
    }

    /// Read one reply line from the control channel, if one is waiting.
    pub fn read_line(&self) -> ProcessResult<Option<String>> {
        let mut slot = self.shared.control.lock();
        match slot.conn.as_mut() {
            Some(conn) => match conn.read_line() {
                Ok(line) => Ok(line),
                Err(e) if e.is_fatal() => {
                    slot.conn = None;
                    Err(e.into())
                }
                Err(e) => Err(e.into()),
            },
            None => Err(ProcessError::NoControl),
        }
    }

    /// Synchronous query over the control channel: one line out, one
    /// JSON record back, bounded by the configured response timeout.
    pub fn rquery(&self, query: &str) -> ProcessResult<Value> {
        if !self.has_control() {
            return Err(ProcessError::NoControl);
        }
        self.write_line(query)?;

        let deadline = Instant::now() + self.config.response_timeout;
        loop {
            if let Some(line) = self.read_line()? {
                return serde_json::from_str(line.trim())
                    .map_err(|e| ProcessError::Protocol(format!("malformed reply: {e}")));
            }
            if Instant::now() >= deadline {
                return Err(ProcessError::ResponseTimeout);
            }
            thread::sleep(POLL_SLEEP);
        }
    }

    /// Remote status record from the child.
    pub fn rstatus(&self) -> ProcessResult<Value> {
        self.rquery("status")
    }

    /// Local supervisor status.
    pub fn status(&self) -> Value {
        json!({
            "target": self.target,
            "pid": self.pid,
            "control_port": self.control_port,
            "control": self.has_control(),
            "poll": self.poll(),
            "active": self.is_alive(),
            "stop_log": self.stop_log(),
        })
    }

    fn log_stop(&self, event: StopEvent) {
        debug!("child {} stop-log: {event:?}", self.pid);
        self.shared.stop_log.lock().push(event);
    }

    /// Wait up to `bound` for the child to exit, polling without
    /// blocking the caller for longer than the bound.
    fn wait_for_exit(&self, bound: Duration) -> Option<i32> {
        let deadline = Instant::now() + bound;
        loop {
            if let Some(code) = self.poll() {
                return Some(code);
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(POLL_SLEEP);
        }
    }

    #[cfg(unix)]
    fn terminate(&self) -> Result<(), String> {
        nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(self.pid as i32),
            nix::sys::signal::Signal::SIGTERM,
        )
        .map_err(|e| e.to_string())
    }

    #[cfg(not(unix))]
    fn terminate(&self) -> Result<(), String> {
        self.kill()
    }

    fn kill(&self) -> Result<(), String> {
        let mut child = self.shared.child.lock();
        match child.as_mut() {
            Some(child) => child.kill().map_err(|e| e.to_string()),
            None => Err("child handle gone".to_string()),
        }
    }

    /// Stop the child: graceful `shutdown` query, bounded wait,
    /// terminate, bounded wait, kill. Always safe to call, even on an
    /// already-dead child; every step lands in the stop-log and nothing
    /// is raised from here.
    pub fn stop(&mut self) -> Option<i32> {
        self.stopped = true;
        self.log_stop(StopEvent::StopRequested);

        if self.is_alive() {
            // rung 1: ask nicely
            if self.has_control() {
                match self.write_line("shutdown") {
                    Ok(()) => self.log_stop(StopEvent::ShutdownSent),
                    Err(e) => self.log_stop(StopEvent::ShutdownSkipped(e.to_string())),
                }
            } else {
                self.log_stop(StopEvent::ShutdownSkipped(
                    "no control channel".to_string(),
                ));
            }

            // rung 2: bounded wait
            match self.wait_for_exit(self.config.stop_wait) {
                Some(code) => self.log_stop(StopEvent::Exited(code)),
                None => {
                    self.log_stop(StopEvent::StillAlive);

                    // rung 3: terminate
                    match self.terminate() {
                        Ok(()) => self.log_stop(StopEvent::Terminated),
                        Err(e) => self.log_stop(StopEvent::TerminateFailed(e)),
                    }

                    // rung 4: bounded wait again
                    match self.wait_for_exit(self.config.stop_wait) {
                        Some(code) => self.log_stop(StopEvent::Exited(code)),
                        None => {
                            self.log_stop(StopEvent::StillAlive);

                            // rung 5: kill, then reap
                            match self.kill() {
                                Ok(()) => {
                                    self.log_stop(StopEvent::Killed);
                                    match self.wait_for_exit(self.config.stop_wait) {
                                        Some(code) => self.log_stop(StopEvent::Exited(code)),
                                        None => self.log_stop(StopEvent::StillAlive),
                                    }
                                }
                                Err(e) => self.log_stop(StopEvent::KillFailed(e)),
                            }
                        }
                    }
                }
            }
        } else if let Some(code) = self.poll() {
            self.log_stop(StopEvent::Exited(code));
        }

        // wind down the supervisor loop and the control channel
        if let Some(handle) = self.runner.take() {
            if let Err(e) = handle.stop_and_join() {
                warn!("supervisor loop for child {} ended with: {e}", self.pid);
            }
        }
        {
            let mut slot = self.shared.control.lock();
            if let Some(mut conn) = slot.conn.take() {
                conn.shutdown();
            }
            slot.listener = None;
        }

        self.poll()
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        if !self.stopped {
            self.stop();
        }
    }
}
