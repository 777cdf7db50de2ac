/*!
 * Runner Tests
 * Tests for the cooperative loop lifecycle, pause edges, and the
 * control-channel query protocol
 */

use pretty_assertions::assert_eq;
use runloop::{
    Listener, Runner, RunnerConfig, RunnerError, RunnerResult, RunnerState, Task, Tick,
    TransportConfig,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const FAST_SLEEP: Duration = Duration::from_millis(5);

/// Counts ticks; stops itself after a limit when one is set.
struct Counter {
    ticks: Arc<AtomicU64>,
    limit: Option<u64>,
    opened: bool,
    closed: Arc<AtomicU64>,
    pauses: Arc<AtomicU64>,
    resumes: Arc<AtomicU64>,
}

impl Counter {
    fn new() -> Self {
        Self {
            ticks: Arc::new(AtomicU64::new(0)),
            limit: None,
            opened: false,
            closed: Arc::new(AtomicU64::new(0)),
            pauses: Arc::new(AtomicU64::new(0)),
            resumes: Arc::new(AtomicU64::new(0)),
        }
    }

    fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl Task for Counter {
    fn open(&mut self) -> RunnerResult<()> {
        self.opened = true;
        Ok(())
    }

    fn io(&mut self, tick: &mut Tick<'_>) -> RunnerResult<()> {
        let count = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(limit) = self.limit {
            if count >= limit {
                tick.stop();
            }
        }
        Ok(())
    }

    fn status(&mut self) -> Value {
        json!({ "ticks": self.ticks.load(Ordering::SeqCst) })
    }

    fn on_pause(&mut self) -> RunnerResult<()> {
        self.pauses.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_resume(&mut self) -> RunnerResult<()> {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Fails on the first tick.
struct Faulty;

impl Task for Faulty {
    fn io(&mut self, _tick: &mut Tick<'_>) -> RunnerResult<()> {
        Err(RunnerError::task("deliberate fault"))
    }
}

#[test]
fn test_new_runner_is_created_and_unpaused() {
    let runner = Runner::new(RunnerConfig::default());
    assert_eq!(runner.state(), RunnerState::Created);
    assert!(!runner.is_running());
    assert!(!runner.is_paused());
}

#[test]
fn test_run_to_self_stop_tears_down() {
    let mut task = Counter::new().with_limit(3);
    let ticks = task.ticks.clone();
    let closed = task.closed.clone();

    let mut runner = Runner::new(RunnerConfig::default().with_sleep(FAST_SLEEP));
    runner.run(&mut task).unwrap();

    assert_eq!(ticks.load(Ordering::SeqCst), 3);
    assert!(task.opened);
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    assert_eq!(runner.state(), RunnerState::Closed);
}

#[test]
fn test_task_error_stops_loop_and_surfaces_after_teardown() {
    let mut runner = Runner::new(RunnerConfig::default().with_sleep(FAST_SLEEP));
    let result = runner.run(&mut Faulty);

    assert!(matches!(result, Err(RunnerError::Task(_))));
    assert_eq!(runner.state(), RunnerState::Closed);
}

#[test]
fn test_stop_before_running_is_a_no_op() {
    let runner = Runner::new(RunnerConfig::default());
    runner.stop();
    // only a Running loop can move to Stopped
    assert_eq!(runner.state(), RunnerState::Created);
}

#[test]
fn test_closed_runner_refuses_to_open() {
    let mut runner = Runner::new(RunnerConfig::default());
    runner.close();
    runner.close();
    assert_eq!(runner.state(), RunnerState::Closed);

    let mut task = Counter::new();
    assert!(matches!(runner.run(&mut task), Err(RunnerError::Closed)));
}

#[test]
fn test_threaded_stop_and_join() {
    let task = Counter::new();
    let ticks = task.ticks.clone();

    let runner = Runner::new(
        RunnerConfig::default()
            .with_name("threaded-test")
            .with_sleep(FAST_SLEEP),
    );
    let handle = runner.start(Box::new(task)).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while ticks.load(Ordering::SeqCst) < 2 {
        assert!(Instant::now() < deadline, "loop never ticked");
        thread::sleep(FAST_SLEEP);
    }

    handle.stop_and_join().unwrap();
    let settled = ticks.load(Ordering::SeqCst);
    assert!(settled >= 2);
}

#[test]
fn test_pause_resume_fires_edges_once() {
    let task = Counter::new();
    let pauses = task.pauses.clone();
    let resumes = task.resumes.clone();

    let runner = Runner::new(RunnerConfig::default().with_sleep(FAST_SLEEP));
    let handle = runner.start(Box::new(task)).unwrap();

    handle.pause();
    let deadline = Instant::now() + Duration::from_secs(5);
    while pauses.load(Ordering::SeqCst) == 0 {
        assert!(Instant::now() < deadline, "pause edge never fired");
        thread::sleep(FAST_SLEEP);
    }

    handle.resume();
    let deadline = Instant::now() + Duration::from_secs(5);
    while resumes.load(Ordering::SeqCst) == 0 {
        assert!(Instant::now() < deadline, "resume edge never fired");
        thread::sleep(FAST_SLEEP);
    }

    handle.stop_and_join().unwrap();
    assert_eq!(pauses.load(Ordering::SeqCst), 1);
    assert_eq!(resumes.load(Ordering::SeqCst), 1);
}

/// Control-channel helpers: the runner dials out to this listener and
/// introduces itself with a PID line.
fn accept_control(listener: &Listener) -> runloop::Connection {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(conn) = listener.accept_if().unwrap() {
            return conn;
        }
        assert!(Instant::now() < deadline, "runner never dialed in");
        thread::sleep(Duration::from_millis(10));
    }
}

fn read_control_line(conn: &mut runloop::Connection) -> String {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(line) = conn.read_line().unwrap() {
            return line;
        }
        assert!(Instant::now() < deadline, "no control line arrived");
        thread::sleep(Duration::from_millis(10));
    }
}

fn ask(conn: &mut runloop::Connection, query: &str) -> Value {
    conn.write_line(query).unwrap();
    let line = read_control_line(conn);
    serde_json::from_str(line.trim()).unwrap()
}

#[test]
fn test_control_channel_protocol() {
    let listener = Listener::bind(&TransportConfig::default()).unwrap();

    let runner = Runner::new(
        RunnerConfig::default()
            .with_name("controlled")
            .with_sleep(FAST_SLEEP)
            .with_control_port(listener.port()),
    );
    let handle = runner.start(Box::new(Counter::new())).unwrap();

    let mut control = accept_control(&listener);

    // handshake: first line is the loop's own PID
    let pid_line = read_control_line(&mut control);
    assert_eq!(pid_line.trim(), std::process::id().to_string());

    let reply = ask(&mut control, "ping");
    assert_eq!(reply["reply"], json!("pong"));

    let reply = ask(&mut control, "status");
    assert_eq!(reply["reply"]["name"], json!("controlled"));
    assert_eq!(reply["reply"]["state"], json!("running"));
    assert!(reply["reply"]["task"]["ticks"].as_u64().unwrap() >= 1);

    let reply = ask(&mut control, "made-up-verb");
    assert_eq!(reply["error"], json!("unknown-query"));
    assert_eq!(reply["reply"], Value::Null);

    // shutdown answers first, then the loop winds down
    let reply = ask(&mut control, "shutdown");
    assert_eq!(reply["query"], json!("shutdown"));
    handle.join().unwrap();
}
