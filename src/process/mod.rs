/*!
 * Process Module
 * Child-process supervision: launch token codec, rendezvous handshake,
 * control RPC, stdio capture, and the stop escalation ladder
 */

pub mod bootstrap;
pub mod launch;
pub mod supervisor;
pub mod types;

// Re-export public API
pub use launch::{decode_token, encode_token, LaunchSpec};
pub use supervisor::Process;
pub use types::{ChildFailure, ProcessConfig, ProcessError, ProcessResult, StopEvent};
