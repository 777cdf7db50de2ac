/*!
 * Core Module
 * Shared primitive types used across subsystems
 */

pub mod types;

pub use types::Pid;
