/*!
 * runloop Library
 * Cooperative run-loops, non-blocking line-oriented transport, and
 * child-process supervision exposed as a library
 */

pub mod core;
pub mod process;
pub mod registry;
pub mod runner;
pub mod server;
pub mod transport;

// Re-exports
pub use crate::core::Pid;
pub use process::{ChildFailure, LaunchSpec, Process, ProcessConfig, ProcessError, StopEvent};
pub use registry::{register_builtins, RegistryError, WorkerRegistry};
pub use runner::{
    Runner, RunnerConfig, RunnerError, RunnerHandle, RunnerResult, RunnerState, Task, Tick,
};
pub use server::{EchoHandler, Handler, Server, ServerConfig};
pub use transport::{
    Connection, LineQueue, Listener, TransportConfig, TransportError, TransportResult,
};
