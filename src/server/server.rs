/*!
 * Server
 * Generic accept-and-dispatch loop: accepts connections, feeds
 * handlers, and evicts the idle and the broken
 */

use super::handler::{Handler, HandlerFactory};
use super::types::ServerConfig;
use crate::runner::{RunnerResult, Task, Tick};
use crate::transport::{Connection, Listener, TransportResult};
use log::{debug, info, warn};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::time::Instant;

struct HandlerSlot {
    conn: Connection,
    handler: Box<dyn Handler>,
    last_activity: Instant,
}

/// A connection server driven as a [`Task`] by a
/// [`Runner`](crate::runner::Runner).
///
/// Each tick: accept at most one new connection, service every handler,
/// evict those past the idle ceiling or broken, and record what happened
/// in a bounded message log. One misbehaving connection never stops the
/// loop.
pub struct Server {
    listener: Listener,
    factory: HandlerFactory,
    config: ServerConfig,
    slots: Vec<HandlerSlot>,
    messages: VecDeque<Value>,
    iocount: u64,
    served_any: bool,
}

impl Server {
    /// Bind the listening socket and get ready to serve. Binding happens
    /// here so the port is claimed (and knowable) before the loop runs.
    pub fn bind(config: ServerConfig, factory: HandlerFactory) -> TransportResult<Self> {
        let listener = Listener::bind(&config.transport)?;
        info!("server bound on port {}", listener.port());
        Ok(Self {
            listener,
            factory,
            config,
            slots: Vec::new(),
            messages: VecDeque::new(),
            iocount: 0,
            served_any: false,
        })
    }

    pub fn port(&self) -> u16 {
        self.listener.port()
    }

    pub fn handler_count(&self) -> usize {
        self.slots.len()
    }

    fn record(&mut self, message: Value) {
        if self.messages.len() >= self.config.max_messages {
            self.messages.pop_front();
        }
        self.messages.push_back(message);
    }

    fn accept_one(&mut self) {
        match self.listener.accept_if() {
            Ok(Some(conn)) => {
                let peer = conn.peer_addr();
                self.slots.push(HandlerSlot {
                    conn,
                    handler: (self.factory)(),
                    last_activity: Instant::now(),
                });
                self.served_any = true;
                self.record(json!({ "event": "handler-add", "peer": format!("{peer:?}") }));
                debug!("handler added for {peer:?}");
            }
            Ok(None) => {}
            Err(e) => warn!("accept failed: {e}"),
        }
    }

    /// Service one slot. Returns false when the slot must be removed.
    fn service_slot(slot: &mut HandlerSlot, messages: &mut Vec<Value>) -> bool {
        match slot.conn.receive(0) {
            Ok(data) if data.is_empty() => true,
            Ok(data) => {
                slot.last_activity = Instant::now();
                match slot.handler.on_data(&mut slot.conn, &data) {
                    Ok(()) => true,
                    Err(e) => {
                        messages.push(json!({
                            "event": "handler-err",
                            "peer": format!("{:?}", slot.conn.peer_addr()),
                            "error": e.to_string(),
                        }));
                        false
                    }
                }
            }
            Err(e) if e.is_fatal() => {
                messages.push(json!({
                    "event": "handler-gone",
                    "peer": format!("{:?}", slot.conn.peer_addr()),
                    "error": e.to_string(),
                }));
                false
            }
            Err(e) => {
                // transient; the connection is still usable
                debug!("handler receive: {e}");
                true
            }
        }
    }
}

impl Task for Server {
    fn io(&mut self, tick: &mut Tick<'_>) -> RunnerResult<()> {
        self.accept_one();

        let idle_ceiling = self.config.idle_ceiling;
        let mut new_messages = Vec::new();
        let mut keep = Vec::with_capacity(self.slots.len());
        let mut dropped = Vec::new();

        for mut slot in self.slots.drain(..) {
            if slot.last_activity.elapsed() > idle_ceiling {
                new_messages.push(json!({
                    "event": "handler-idle",
                    "peer": format!("{:?}", slot.conn.peer_addr()),
                }));
                dropped.push(slot);
            } else if Self::service_slot(&mut slot, &mut new_messages) {
                keep.push(slot);
            } else {
                dropped.push(slot);
            }
        }
        self.slots = keep;

        for mut slot in dropped {
            slot.handler.on_shutdown(&mut slot.conn);
            slot.conn.shutdown();
        }
        for message in new_messages {
            self.record(message);
        }

        self.iocount += 1;

        if !self.config.keepalive && self.served_any && self.slots.is_empty() {
            info!("no connections remain and keepalive is off; stopping");
            tick.stop();
        }
        Ok(())
    }

    fn status(&mut self) -> Value {
        let messages: Vec<Value> = self.messages.drain(..).collect();
        json!({
            "port": self.port(),
            "handlers": self.slots.len(),
            "iocount": self.iocount,
            "keepalive": self.config.keepalive,
            "idle_ceiling": self.config.idle_ceiling.as_secs_f64(),
            "messages": messages,
        })
    }

    fn close(&mut self) {
        for mut slot in self.slots.drain(..) {
            slot.handler.on_shutdown(&mut slot.conn);
            slot.conn.shutdown();
        }
        info!("server on port {} closed", self.port());
    }
}
