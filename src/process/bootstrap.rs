/*!
 * Child Bootstrap
 * Entry point for a launched child: decode the token, build the worker
 * from the registry, and drive its run loop until it stops
 *
 * Failure protocol (read by the supervising parent at child exit):
 * a launch failure writes its kind and payload to stdout and a
 * structured record to stderr; a runtime failure writes the structured
 * record to stderr alone. A clean run leaves stderr empty.
 */

use super::launch::decode_token;
use super::types::ChildFailure;
use crate::registry::{RegistryError, WorkerRegistry};
use crate::runner::{Runner, RunnerConfig};
use std::time::Duration;

/// Exit code for a worker that failed while running
pub const EXIT_RUNTIME: i32 = 1;

/// Exit code for a worker that never launched
pub const EXIT_LAUNCH: i32 = 2;

/// Ceiling on the tick sleep a token may request
const MAX_SLEEP_SECS: f64 = 3600.0;

/// The polite-stop ladder owns interruption; a stray Ctrl-C against the
/// process group must not bypass it.
#[cfg(unix)]
fn ignore_sigint() {
    use nix::sys::signal::{signal, SigHandler, Signal};
    // unsafe per the nix signature; SIG_IGN itself is benign
    let _ = unsafe { signal(Signal::SIGINT, SigHandler::SigIgn) };
}

#[cfg(not(unix))]
fn ignore_sigint() {}

fn emit_launch_failure(failure: &ChildFailure) -> i32 {
    println!("{}", failure.kind);
    println!("{}", failure.message);
    match serde_json::to_string(failure) {
        Ok(record) => eprintln!("{record}"),
        Err(_) => eprintln!("{}: {}", failure.kind, failure.message),
    }
    EXIT_LAUNCH
}

fn emit_runtime_failure(failure: &ChildFailure) -> i32 {
    match serde_json::to_string(failure) {
        Ok(record) => eprintln!("{record}"),
        Err(_) => eprintln!("{}: {}", failure.kind, failure.message),
    }
    EXIT_RUNTIME
}

/// Decode `token`, construct the worker it names, and run it to
/// completion. Returns the process exit code; never panics outward.
pub fn run(token: &str) -> i32 {
    ignore_sigint();

    let spec = match decode_token(token) {
        Ok(spec) => spec,
        Err(e) => {
            return emit_launch_failure(&ChildFailure::new("bad-token", e.to_string()));
        }
    };

    // the registry is a closed table; the only entry it knows is `run`
    match spec.entry.as_deref() {
        None | Some("run") => {}
        Some(other) => {
            return emit_launch_failure(&ChildFailure::new(
                "bad-entry",
                format!("unsupported entry {other:?}; only \"run\" is available"),
            ));
        }
    }

    // the reserved runner kwargs come from an untrusted token; a value
    // that decodes but cannot be honored is a launch failure, never a
    // panic or a silent truncation
    let mut config = RunnerConfig::default().with_name(spec.target.clone());
    if let Some(value) = spec.kwargs.get("control_port") {
        match value
            .as_u64()
            .filter(|port| (1..=u64::from(u16::MAX)).contains(port))
        {
            Some(port) => config = config.with_control_port(port as u16),
            None => {
                return emit_launch_failure(&ChildFailure::new(
                    "bad-token",
                    format!("control_port out of range: {value}"),
                ));
            }
        }
    }
    if let Some(value) = spec.kwargs.get("sleep") {
        match value
            .as_f64()
            .filter(|sleep| sleep.is_finite() && (0.0..=MAX_SLEEP_SECS).contains(sleep))
        {
            Some(sleep) => config = config.with_sleep(Duration::from_secs_f64(sleep)),
            None => {
                return emit_launch_failure(&ChildFailure::new(
                    "bad-token",
                    format!("sleep out of range: {value}"),
                ));
            }
        }
    }

    let mut task = match WorkerRegistry::create(&spec.target, &spec.args, &spec.kwargs) {
        Ok(task) => task,
        Err(RegistryError::NotFound(name)) => {
            return emit_launch_failure(&ChildFailure::new(
                "unknown-target",
                format!("no registered worker named {name:?}"),
            ));
        }
        Err(e @ RegistryError::Construct { .. }) => {
            return emit_launch_failure(&ChildFailure::new("construct-failed", e.to_string()));
        }
    };

    let mut runner = Runner::new(config);
    match runner.run(task.as_mut()) {
        Ok(()) => 0,
        Err(e) => emit_runtime_failure(&ChildFailure::new("run-failed", e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::launch::{encode_token, LaunchSpec};
    use serde_json::json;

    #[test]
    fn garbage_token_is_a_launch_failure() {
        assert_eq!(run("definitely not a token"), EXIT_LAUNCH);
    }

    #[test]
    fn unknown_entry_is_a_launch_failure() {
        let token =
            encode_token(&LaunchSpec::new("idle").with_entry("destroy_everything")).unwrap();
        assert_eq!(run(&token), EXIT_LAUNCH);
    }

    #[test]
    fn unknown_target_is_a_launch_failure() {
        let token = encode_token(&LaunchSpec::new("no-such-worker")).unwrap();
        assert_eq!(run(&token), EXIT_LAUNCH);
    }

    #[test]
    fn negative_sleep_is_a_launch_failure() {
        let token =
            encode_token(&LaunchSpec::new("idle").with_kwarg("sleep", json!(-1.0))).unwrap();
        assert_eq!(run(&token), EXIT_LAUNCH);
    }

    #[test]
    fn oversized_sleep_is_a_launch_failure() {
        let token =
            encode_token(&LaunchSpec::new("idle").with_kwarg("sleep", json!(1.0e18))).unwrap();
        assert_eq!(run(&token), EXIT_LAUNCH);
    }

    #[test]
    fn non_numeric_sleep_is_a_launch_failure() {
        let token =
            encode_token(&LaunchSpec::new("idle").with_kwarg("sleep", json!("fast"))).unwrap();
        assert_eq!(run(&token), EXIT_LAUNCH);
    }

    #[test]
    fn out_of_range_control_port_is_a_launch_failure() {
        let token =
            encode_token(&LaunchSpec::new("idle").with_kwarg("control_port", json!(70000)))
                .unwrap();
        assert_eq!(run(&token), EXIT_LAUNCH);
    }
}
