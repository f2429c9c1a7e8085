//! Hub-side proxy for one wireless device
//!
//! A `Node` owns everything the hub knows about a single peripheral: the
//! last reported state, when it last reported, and a side-channel cache of
//! individually requested field values. All physical sends go through a
//! bounded retry; exhausting it surfaces as `DeliveryFailed` and never
//! silently drops a message. Offline detection is driven purely by STATUS
//! staleness, never by send failures.

use super::{DeviceClass, Fields};
use crate::error::{Error, Result};
use crate::protocol::{Kind, Message};
use crate::radio::{Radio, BASE_SEND_ADDR};
use crate::streaming::ClientBus;
use log::{debug, info, warn};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Physical transmission attempts before giving up
pub const SEND_ATTEMPTS: u32 = 5;

/// Delay between transmission attempts
pub const SEND_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Snapshot of a device's reported fields at one point in time
///
/// Replaced wholesale on every accepted update; equality over the fields
/// decides whether subscribers hear about it.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    pub fields: Fields,
    pub online: bool,
}

impl DeviceState {
    /// The state every node starts in, and returns to on staleness
    pub fn offline() -> Self {
        Self {
            fields: Fields::new(),
            online: false,
        }
    }

    pub fn online(fields: Fields) -> Self {
        Self {
            fields,
            online: true,
        }
    }
}

/// Per-device communication state
pub struct Node {
    class: Arc<dyn DeviceClass>,
    state: DeviceState,
    last_status: Option<Instant>,
    /// FIELD_RESPONSE values, distinct from the broadcast state
    cached_fields: BTreeMap<String, Vec<u8>>,
    retry_delay: Duration,
}

impl Node {
    pub fn new(class: Arc<dyn DeviceClass>) -> Self {
        Self {
            class,
            state: DeviceState::offline(),
            last_status: None,
            cached_fields: BTreeMap::new(),
            retry_delay: SEND_RETRY_DELAY,
        }
    }

    #[cfg(test)]
    pub fn with_retry_delay(class: Arc<dyn DeviceClass>, retry_delay: Duration) -> Self {
        let mut node = Self::new(class);
        node.retry_delay = retry_delay;
        node
    }

    pub fn class(&self) -> &dyn DeviceClass {
        self.class.as_ref()
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    /// Last value received for a field via FIELD_RESPONSE
    pub fn cached_value(&self, field: &str) -> Option<&[u8]> {
        self.cached_fields.get(field).map(Vec::as_slice)
    }

    /// Ask the device for one field's value
    pub fn ask_for_value(&mut self, radio: &mut dyn Radio, field: &'static str) -> Result<()> {
        let msg = Message::field_request(self.class.node_id(), field);
        self.send_with_retry(radio, &msg)
    }

    /// Set one field's value on the device
    pub fn set_value(
        &mut self,
        radio: &mut dyn Radio,
        field: &'static str,
        value: Vec<u8>,
    ) -> Result<()> {
        let msg = Message::field_set(self.class.node_id(), field, value);
        self.send_with_retry(radio, &msg)
    }

    /// Transmit a message, retrying up to [`SEND_ATTEMPTS`] times
    pub fn send_with_retry(&mut self, radio: &mut dyn Radio, msg: &Message) -> Result<()> {
        let bytes = msg.encode(self.class.field_table())?;

        radio.stop_listening()?;
        radio.open_writing_pipe(BASE_SEND_ADDR | self.class.send_pipe() as u64)?;
        let outcome = self.attempt_writes(radio, &bytes);
        let restore = radio.start_listening();

        outcome?;
        restore
    }

    fn attempt_writes(&self, radio: &mut dyn Radio, bytes: &[u8]) -> Result<()> {
        let node_id = self.class.node_id();
        for attempt in 1..=SEND_ATTEMPTS {
            match radio.write(bytes) {
                Ok(true) => {
                    debug!("Node {}: delivered on attempt {}", node_id, attempt);
                    return Ok(());
                }
                Ok(false) => debug!("Node {}: no ack on attempt {}", node_id, attempt),
                Err(e) => warn!(
                    "Node {}: radio write failed on attempt {}: {}",
                    node_id, attempt, e
                ),
            }
            if attempt < SEND_ATTEMPTS {
                thread::sleep(self.retry_delay);
            }
        }
        Err(Error::DeliveryFailed {
            node_id,
            attempts: SEND_ATTEMPTS,
        })
    }

    /// Handle one raw inbound frame addressed to this node
    pub fn on_inbound_frame(&mut self, raw: &[u8], bus: &dyn ClientBus) -> Result<()> {
        let msg = Message::decode(raw, self.class.field_table())?;
        self.on_inbound(msg, bus)
    }

    /// Handle one decoded inbound message
    pub fn on_inbound(&mut self, msg: Message, bus: &dyn ClientBus) -> Result<()> {
        match msg.kind {
            Kind::Status => {
                let fields = self.class.parse_status(&msg.payload)?;
                // Stamp on every STATUS frame: a device repeating an
                // identical state is still alive.
                self.last_status = Some(Instant::now());
                let new_state = DeviceState::online(fields);
                if new_state != self.state {
                    self.state = new_state;
                    self.broadcast_state(bus);
                }
                Ok(())
            }
            Kind::FieldResponse => {
                if let Some(name) = msg.field_name {
                    debug!(
                        "Node {}: field `{}` = {:?}",
                        self.class.node_id(),
                        name,
                        msg.payload
                    );
                    self.cached_fields.insert(name.to_string(), msg.payload);
                }
                Ok(())
            }
            other => {
                debug!(
                    "Node {}: ignoring inbound {:?} frame",
                    self.class.node_id(),
                    other
                );
                Ok(())
            }
        }
    }

    /// Transition to offline once the staleness threshold elapses
    pub fn check_staleness(&mut self, now: Instant, bus: &dyn ClientBus) {
        if !self.state.online {
            return;
        }
        let Some(last) = self.last_status else {
            return;
        };
        if now.duration_since(last) > self.class.offline_after() {
            info!(
                "Node {} ({}) offline: no status for more than {:?}",
                self.class.node_id(),
                self.class.name(),
                self.class.offline_after()
            );
            self.state = DeviceState::offline();
            self.broadcast_state(bus);
        }
    }

    /// Process one client request and produce the response object
    pub fn process_client_request(
        &mut self,
        radio: &mut dyn Radio,
        body: &Value,
        bus: &dyn ClientBus,
    ) -> Result<Value> {
        let req_type = body.get("type").and_then(Value::as_str).unwrap_or("");
        match req_type {
            "get_state" => Ok(self.state_message()),
            "set_state" => self.apply_set_state(radio, body, bus),
            other => match self.class.handle_custom_request(body) {
                Some(result) => result,
                None => {
                    warn!(
                        "Node {}: unsupported request type `{}`",
                        self.class.node_id(),
                        other
                    );
                    Ok(json!({"error": "unsupported_request"}))
                }
            },
        }
    }

    fn apply_set_state(
        &mut self,
        radio: &mut dyn Radio,
        body: &Value,
        bus: &dyn ClientBus,
    ) -> Result<Value> {
        if !self.state.online {
            return Ok(json!({"error": "offline"}));
        }
        let Some(requested) = body.get("state").and_then(Value::as_object) else {
            return Ok(json!({"error": "missing_state"}));
        };

        // Only allow-listed keys make it into the node state
        let mut accepted = Fields::new();
        for (key, value) in requested {
            if self.class.allowed_fields().contains(&key.as_str()) {
                accepted.insert(key.clone(), value.clone());
            } else {
                debug!(
                    "Node {}: ignoring disallowed field `{}`",
                    self.class.node_id(),
                    key
                );
            }
        }
        if accepted.is_empty() {
            return Ok(json!({}));
        }

        // Physical side effects happen before the acknowledgement
        for msg in self.class.apply_field_effects(&accepted)? {
            self.send_with_retry(radio, &msg)?;
        }

        let mut fields = self.state.fields.clone();
        fields.extend(accepted);
        let new_state = DeviceState::online(fields);
        if new_state != self.state {
            self.state = new_state;
            self.broadcast_state(bus);
        }

        Ok(json!({}))
    }

    /// The state object broadcast to subscribers and returned by get_state
    pub fn state_message(&self) -> Value {
        json!({
            "sensor": self.class.name(),
            "node_id": self.class.node_id(),
            "msg_stream": self.class.node_id().to_string(),
            "is_online": self.state.online,
            "type": "state",
            "state": self.state.fields,
        })
    }

    fn broadcast_state(&self, bus: &dyn ClientBus) {
        bus.broadcast(
            &self.state_message(),
            self.class.name(),
            &self.class.node_id().to_string(),
        );
    }
}
