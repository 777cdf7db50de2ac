/*!
 * runloop - Main Entry Point
 *
 * Two modes share one binary image:
 * - `launch <token>` runs the child bootstrap for a supervised worker
 * - `serve <name> [port]` runs a registered worker in the foreground
 */

use log::{error, info};
use runloop::process::bootstrap;
use runloop::{register_builtins, Runner, RunnerConfig, WorkerRegistry};
use serde_json::{json, Map};
use std::process::ExitCode;

fn usage() -> ExitCode {
    eprintln!("usage: runloop launch <token>");
    eprintln!("       runloop serve <name> [port]");
    eprintln!();
    eprintln!("registered workers:");
    for name in WorkerRegistry::names() {
        eprintln!("  {name}");
    }
    ExitCode::from(64)
}

fn serve(name: &str, port: Option<u16>) -> ExitCode {
    let mut kwargs = Map::new();
    if let Some(port) = port {
        kwargs.insert("port".to_string(), json!(port));
    }

    let mut task = match WorkerRegistry::create(name, &[], &kwargs) {
        Ok(task) => task,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    info!("serving {name} in the foreground");
    let mut runner = Runner::new(RunnerConfig::default().with_name(name));
    match runner.run(task.as_mut()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{name} stopped with: {e}");
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("launch") => {
            // stderr belongs to the failure protocol here; logging is
            // opt-in and rerouted to stdout so the parent can read it
            if std::env::var_os("RUST_LOG").is_some() {
                env_logger::Builder::from_default_env()
                    .target(env_logger::Target::Stdout)
                    .init();
            }
            register_builtins();
            match args.get(2) {
                Some(token) => {
                    let code = bootstrap::run(token);
                    ExitCode::from(code.clamp(0, 255) as u8)
                }
                None => usage(),
            }
        }
        Some("serve") => {
            env_logger::init();
            register_builtins();
            let port = args.get(3).and_then(|p| p.parse().ok());
            match args.get(2) {
                Some(name) => serve(name, port),
                None => usage(),
            }
        }
        _ => {
            env_logger::init();
            register_builtins();
            usage()
        }
    }
}
