/*!
 * Server Tests
 * Tests for the line server task: echo traffic, idle eviction, handler
 * errors, and the keepalive policy
 */

use pretty_assertions::assert_eq;
use runloop::{
    Connection, EchoHandler, Handler, Runner, RunnerConfig, Server, ServerConfig,
    TransportConfig, TransportResult,
};
use std::thread;
use std::time::{Duration, Instant};

const FAST_SLEEP: Duration = Duration::from_millis(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

fn spawn_server(server: Server) -> (u16, runloop::RunnerHandle) {
    let port = server.port();
    let runner = Runner::new(
        RunnerConfig::default()
            .with_name("server-under-test")
            .with_sleep(FAST_SLEEP),
    );
    let handle = runner.start(Box::new(server)).unwrap();
    (port, handle)
}

fn connect(port: u16) -> Connection {
    let config = TransportConfig::default().with_port(port);
    Connection::connect(&config, CONNECT_TIMEOUT).unwrap()
}

fn read_line_within(conn: &mut Connection, bound: Duration) -> String {
    let deadline = Instant::now() + bound;
    loop {
        if let Some(line) = conn.read_line().unwrap() {
            return line;
        }
        assert!(Instant::now() < deadline, "no line arrived");
        thread::sleep(Duration::from_millis(10));
    }
}

/// Poll until the peer's close surfaces as a fatal receive error.
fn assert_peer_closes(conn: &mut Connection, bound: Duration) {
    let deadline = Instant::now() + bound;
    loop {
        match conn.receive(4096) {
            Ok(_) => {
                assert!(Instant::now() < deadline, "peer never closed");
                thread::sleep(Duration::from_millis(10));
            }
            Err(e) => {
                assert!(e.is_fatal(), "unexpected non-fatal error: {e}");
                return;
            }
        }
    }
}

#[test]
fn test_echo_round_trip() {
    let server = Server::bind(ServerConfig::default(), Box::new(|| Box::new(EchoHandler))).unwrap();
    let (port, handle) = spawn_server(server);

    let mut client = connect(port);
    client.write_line("TEST").unwrap();
    assert_eq!(
        read_line_within(&mut client, Duration::from_secs(5)),
        "TEST\r\n"
    );

    // independent clients each get their own handler
    let mut second = connect(port);
    second.write_line("OTHER").unwrap();
    assert_eq!(
        read_line_within(&mut second, Duration::from_secs(5)),
        "OTHER\r\n"
    );

    handle.stop_and_join().unwrap();
}

#[test]
fn test_idle_client_is_evicted() {
    let config = ServerConfig::default().with_idle_ceiling(Duration::from_millis(200));
    let server = Server::bind(config, Box::new(|| Box::new(EchoHandler))).unwrap();
    let (port, handle) = spawn_server(server);

    let mut client = connect(port);
    client.write_line("warm-up").unwrap();
    read_line_within(&mut client, Duration::from_secs(5));

    // go quiet past the ceiling
    assert_peer_closes(&mut client, Duration::from_secs(5));

    handle.stop_and_join().unwrap();
}

#[test]
fn test_active_client_outlives_the_ceiling() {
    let config = ServerConfig::default().with_idle_ceiling(Duration::from_millis(300));
    let server = Server::bind(config, Box::new(|| Box::new(EchoHandler))).unwrap();
    let (port, handle) = spawn_server(server);

    let mut client = connect(port);
    // keep talking across several ceilings' worth of wall time
    for i in 0..8 {
        client.write_line(&format!("beat {i}")).unwrap();
        read_line_within(&mut client, Duration::from_secs(5));
        thread::sleep(Duration::from_millis(100));
    }

    handle.stop_and_join().unwrap();
}

/// Fails on the first message.
struct Grumpy;

impl Handler for Grumpy {
    fn on_data(&mut self, _conn: &mut Connection, _data: &[u8]) -> TransportResult<()> {
        Err(runloop::TransportError::Fatal("refused".to_string()))
    }
}

#[test]
fn test_handler_error_drops_the_client() {
    let server = Server::bind(ServerConfig::default(), Box::new(|| Box::new(Grumpy))).unwrap();
    let (port, handle) = spawn_server(server);

    let mut client = connect(port);
    client.write_line("anything").unwrap();
    assert_peer_closes(&mut client, Duration::from_secs(5));

    handle.stop_and_join().unwrap();
}

#[test]
fn test_keepalive_off_stops_after_last_client() {
    let config = ServerConfig::default().with_keepalive(false);
    let server = Server::bind(config, Box::new(|| Box::new(EchoHandler))).unwrap();
    let (port, handle) = spawn_server(server);

    {
        let mut client = connect(port);
        client.write_line("only visitor").unwrap();
        read_line_within(&mut client, Duration::from_secs(5));
        client.shutdown();
    }

    // having served once and emptied out, the loop winds itself down
    handle.join().unwrap();
}

#[test]
fn test_keepalive_on_runs_past_clients() {
    let server = Server::bind(ServerConfig::default(), Box::new(|| Box::new(EchoHandler))).unwrap();
    let (port, handle) = spawn_server(server);

    {
        let mut client = connect(port);
        client.write_line("visitor").unwrap();
        read_line_within(&mut client, Duration::from_secs(5));
        client.shutdown();
    }

    thread::sleep(Duration::from_millis(200));
    assert!(handle.is_running());

    // and a later client is still served
    let mut client = connect(port);
    client.write_line("again").unwrap();
    assert_eq!(
        read_line_within(&mut client, Duration::from_secs(5)),
        "again\r\n"
    );

    handle.stop_and_join().unwrap();
}
