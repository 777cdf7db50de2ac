/*!
 * Builtin Workers
 * Factories for the workers shipped with the binary
 */

use super::{RegistryError, WorkerRegistry};
use crate::runner::{RunnerResult, Task, Tick};
use crate::server::{EchoHandler, Server, ServerConfig};
use log::info;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

fn kwarg_u64(kwargs: &Map<String, Value>, key: &str) -> Option<u64> {
    kwargs.get(key).and_then(Value::as_u64)
}

fn kwarg_bool(kwargs: &Map<String, Value>, key: &str) -> bool {
    kwargs.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Does nothing each tick. Useful for supervising something that only
/// answers control queries, and for exercising the stop ladder: the
/// `ignore_shutdown` and `ignore_term` kwargs make it deaf to the
/// graceful rungs.
struct IdleTask {
    ignore_shutdown: bool,
    ignore_term: bool,
    ticks: u64,
}

impl Task for IdleTask {
    fn open(&mut self) -> RunnerResult<()> {
        #[cfg(unix)]
        if self.ignore_term {
            // unsafe per the nix signature; SIG_IGN itself is benign
            unsafe {
                nix::sys::signal::signal(
                    nix::sys::signal::Signal::SIGTERM,
                    nix::sys::signal::SigHandler::SigIgn,
                )
                .map_err(crate::runner::RunnerError::task)?;
            }
            info!("idle worker ignoring SIGTERM");
        }
        Ok(())
    }

    fn io(&mut self, _tick: &mut Tick<'_>) -> RunnerResult<()> {
        self.ticks += 1;
        Ok(())
    }

    fn query(&mut self, line: &str) -> Option<Value> {
        // swallowing shutdown keeps the loop alive past the polite rung
        if self.ignore_shutdown && line == "shutdown" {
            return Some(json!({"ignored": line}));
        }
        None
    }

    fn status(&mut self) -> Value {
        json!({
            "kind": "idle",
            "ticks": self.ticks,
            "ignore_shutdown": self.ignore_shutdown,
            "ignore_term": self.ignore_term,
        })
    }
}

fn build_idle(_args: &[Value], kwargs: &Map<String, Value>) -> Box<dyn Task> {
    Box::new(IdleTask {
        ignore_shutdown: kwarg_bool(kwargs, "ignore_shutdown"),
        ignore_term: kwarg_bool(kwargs, "ignore_term"),
        ticks: 0,
    })
}

fn build_echo_server(
    _args: &[Value],
    kwargs: &Map<String, Value>,
) -> Result<Box<dyn Task>, RegistryError> {
    let mut config = ServerConfig::default();
    if let Some(port) = kwarg_u64(kwargs, "port") {
        config = config.with_port(port as u16);
    }
    if let Some(secs) = kwarg_u64(kwargs, "idle_ceiling") {
        config = config.with_idle_ceiling(Duration::from_secs(secs));
    }
    if let Some(keepalive) = kwargs.get("keepalive").and_then(Value::as_bool) {
        config = config.with_keepalive(keepalive);
    }

    let server = Server::bind(config, Box::new(|| Box::new(EchoHandler)))
        .map_err(|e| RegistryError::construct("echo-server", e))?;
    Ok(Box::new(server))
}

/// Register the workers shipped with this binary. Idempotent.
pub fn register_builtins() {
    WorkerRegistry::register("idle", Arc::new(|args, kwargs| Ok(build_idle(args, kwargs))));
    WorkerRegistry::register("echo-server", Arc::new(build_echo_server));
}
