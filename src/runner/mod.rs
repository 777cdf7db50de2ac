/*!
 * Runner Module
 * Cooperative tick-driven run loop with lifecycle states, pause/resume
 * output buffering, and control-channel RPC
 */

pub mod output;
#[allow(clippy::module_inception)]
pub mod runner;
pub mod types;

// Re-export public API
pub use output::Output;
pub use runner::{Runner, RunnerHandle, Tick};
pub use types::{RunnerConfig, RunnerError, RunnerResult, RunnerState, Task};
