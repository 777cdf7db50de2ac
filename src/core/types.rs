/*!
 * Core Types
 * Primitive aliases shared by the runner, server, and supervisor
 */

/// OS process identifier
pub type Pid = u32;
