/*!
 * Listener
 * Non-blocking listening socket producing wrapped connections
 */

use super::conn::Connection;
use super::types::{TransportConfig, TransportError, TransportResult};
use log::{debug, info};
use std::net::{SocketAddr, TcpListener};

/// A bound, listening socket whose `accept_if` never blocks a scheduler
/// tick.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    local: SocketAddr,
    config: TransportConfig,
}

impl Listener {
    /// Bind and listen on the configured address. Port 0 binds an
    /// ephemeral port; use `port()` to discover it.
    pub fn bind(config: &TransportConfig) -> TransportResult<Self> {
        let inner = TcpListener::bind(config.addr()).map_err(TransportError::from_io)?;
        inner.set_nonblocking(true)?;
        let local = inner.local_addr()?;
        info!("listening on {local}");
        Ok(Self {
            inner,
            local,
            config: config.clone(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn port(&self) -> u16 {
        self.local.port()
    }

    /// Accept the next waiting connection, or `None` when nobody is
    /// knocking. Never blocks.
    pub fn accept_if(&self) -> TransportResult<Option<Connection>> {
        match self.inner.accept() {
            Ok((stream, addr)) => {
                debug!("accepted connection from {addr}");
                Ok(Some(Connection::new(stream, &self.config)?))
            }
            Err(e) => match TransportError::from_io(e) {
                TransportError::Timeout => Ok(None),
                other => Err(other),
            },
        }
    }
}
