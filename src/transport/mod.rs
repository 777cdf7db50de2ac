/*!
 * Transport Module
 * Non-blocking byte-stream connections, listening sockets, and
 * line reassembly
 */

pub mod conn;
pub mod lineq;
pub mod listener;
pub mod types;

// Re-export public API
pub use conn::Connection;
pub use lineq::LineQueue;
pub use listener::Listener;
pub use types::{TransportConfig, TransportError, TransportResult};
