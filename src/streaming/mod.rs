//! Client-facing socket layer
//!
//! Local network clients connect over TCP, subscribe to `(sensor, stream)`
//! channels and receive state broadcasts as newline-delimited JSON. The hub
//! thread reaches the socket side only through the [`ClientBus`] trait.

pub mod broker;
pub use broker::SocketBroker;

#[cfg(test)]
pub mod mock;

use serde_json::Value;

/// Opaque handle for one accepted client connection
pub type ConnId = usize;

/// A client request queued for the hub to process
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Sensor name the request addresses
    pub sensor: String,
    /// Full request object as received
    pub body: Value,
    /// Connection to answer on
    pub conn: ConnId,
}

/// Seam between the hub thread and the socket broker thread
///
/// Both sides may call concurrently; implementations synchronize
/// internally.
pub trait ClientBus: Send + Sync {
    /// Deliver `msg` to every subscriber of `(sensor, stream)`
    fn broadcast(&self, msg: &Value, sensor: &str, stream: &str);

    /// Best-effort unicast; returns false if the connection is gone
    fn send_message(&self, msg: &Value, conn: ConnId) -> bool;

    /// Drain all queued client requests (each returned exactly once)
    fn get_messages(&self) -> Vec<InboundMessage>;
}
