//! Recording client bus for testing

use super::{ClientBus, ConnId, InboundMessage};
use parking_lot::Mutex;
use serde_json::Value;

/// In-memory bus that records every broadcast and unicast, and feeds
/// scripted inbound messages to the hub.
#[derive(Default)]
pub struct RecordingBus {
    broadcasts: Mutex<Vec<(Value, String, String)>>,
    sent: Mutex<Vec<(Value, ConnId)>>,
    queue: Mutex<Vec<InboundMessage>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an inbound client request for the next `get_messages` drain
    pub fn push_message(&self, sensor: &str, body: Value, conn: ConnId) {
        self.queue.lock().push(InboundMessage {
            sensor: sensor.to_string(),
            body,
            conn,
        });
    }

    /// All broadcasts so far as `(message, sensor, stream)`
    pub fn broadcasts(&self) -> Vec<(Value, String, String)> {
        self.broadcasts.lock().clone()
    }

    /// All unicasts so far as `(message, connection)`
    pub fn sent(&self) -> Vec<(Value, ConnId)> {
        self.sent.lock().clone()
    }
}

impl ClientBus for RecordingBus {
    fn broadcast(&self, msg: &Value, sensor: &str, stream: &str) {
        self.broadcasts
            .lock()
            .push((msg.clone(), sensor.to_string(), stream.to_string()));
    }

    fn send_message(&self, msg: &Value, conn: ConnId) -> bool {
        self.sent.lock().push((msg.clone(), conn));
        true
    }

    fn get_messages(&self) -> Vec<InboundMessage> {
        std::mem::take(&mut *self.queue.lock())
    }
}
