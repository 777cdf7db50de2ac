/*!
 * Server Module
 * Accept-and-dispatch service loop composing a Listener, a Runner task,
 * and per-connection Handlers
 */

pub mod handler;
#[allow(clippy::module_inception)]
pub mod server;
pub mod types;

// Re-export public API
pub use handler::{EchoHandler, Handler};
pub use server::Server;
pub use types::ServerConfig;
