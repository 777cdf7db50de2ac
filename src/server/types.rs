/*!
 * Server Types
 * Configuration for the accept-and-dispatch loop
 */

use crate::transport::TransportConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default idle ceiling before a handler is evicted
pub const DEF_IDLE_CEILING: Duration = Duration::from_secs(300);

/// Default cap on the in-memory server message log
pub const DEF_MAX_MESSAGES: usize = 64;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    /// Bind address, buffer size, and line terminator for accepted
    /// connections
    pub transport: TransportConfig,
    /// Maximum tolerated time since a handler's last activity
    pub idle_ceiling: Duration,
    /// When false, the server stops once it has served at least one
    /// connection and the handler list drains to empty
    pub keepalive: bool,
    /// Cap on the in-memory message log
    pub max_messages: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            idle_ceiling: DEF_IDLE_CEILING,
            keepalive: true,
            max_messages: DEF_MAX_MESSAGES,
        }
    }
}

impl ServerConfig {
    pub fn with_port(mut self, port: u16) -> Self {
        self.transport.port = port;
        self
    }

    pub fn with_idle_ceiling(mut self, idle_ceiling: Duration) -> Self {
        self.idle_ceiling = idle_ceiling;
        self
    }

    pub fn with_keepalive(mut self, keepalive: bool) -> Self {
        self.keepalive = keepalive;
        self
    }
}
