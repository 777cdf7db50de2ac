/*!
 * Handler
 * Per-connection behavior for accepted server connections
 */

use crate::transport::{Connection, TransportResult};

/// Behavior bound 1:1 to an accepted connection.
///
/// The server owns the connection and the receive loop; the handler is
/// called with whatever bytes arrived this tick. An error return evicts
/// the handler and shuts its connection down.
pub trait Handler: Send {
    /// Data arrived on the connection.
    fn on_data(&mut self, conn: &mut Connection, data: &[u8]) -> TransportResult<()>;

    /// The server is about to drop this handler's connection.
    fn on_shutdown(&mut self, _conn: &mut Connection) {}
}

/// Factory producing a handler for each accepted connection.
pub type HandlerFactory = Box<dyn FnMut() -> Box<dyn Handler> + Send>;

/// Default handler: echo received bytes straight back.
#[derive(Debug, Default)]
pub struct EchoHandler;

impl Handler for EchoHandler {
    fn on_data(&mut self, conn: &mut Connection, data: &[u8]) -> TransportResult<()> {
        conn.send(data)?;
        Ok(())
    }
}
