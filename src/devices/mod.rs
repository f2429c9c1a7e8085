//! Wireless device classes
//!
//! Each kind of peripheral implements the [`DeviceClass`] capability
//! interface: how to parse its STATUS payload, which state fields clients
//! may touch, how accepted fields translate into physical messages, and
//! where the device sits on the radio (pipe layout, staleness threshold).
//! The hub selects the class by node id; adding a device means adding one
//! implementation here and listing it in [`builtin_classes`].

pub mod node;
pub mod power;
pub mod weather;

pub use node::{DeviceState, Node};
pub use power::PowerControl;
pub use weather::WeatherStation;

use crate::error::Result;
use crate::protocol::{FieldTable, Message};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Default time without a STATUS frame before a device counts as offline
pub const DEFAULT_OFFLINE_AFTER: Duration = Duration::from_secs(20);

/// State field map, keyed by field name
pub type Fields = BTreeMap<String, Value>;

/// Capability interface implemented per device class
pub trait DeviceClass: Send + Sync {
    /// Channel name clients subscribe to (e.g. "lamp")
    fn name(&self) -> &'static str;

    /// Device id on the radio (0–7)
    fn node_id(&self) -> u8;

    /// Field id ↔ name table for field-addressed messages
    fn field_table(&self) -> &'static FieldTable;

    /// State keys clients are allowed to set
    fn allowed_fields(&self) -> &'static [&'static str];

    /// Parse a STATUS payload into state fields
    fn parse_status(&self, payload: &[u8]) -> Result<Fields>;

    /// Translate accepted state fields into physical messages to transmit
    fn apply_field_effects(&self, fields: &Fields) -> Result<Vec<Message>>;

    /// Staleness threshold before the device counts as offline
    fn offline_after(&self) -> Duration {
        DEFAULT_OFFLINE_AFTER
    }

    /// Pipe number the hub listens on for this device
    fn listen_pipe_number(&self) -> u8;

    /// Address offset OR-ed into the receive base address
    fn listen_pipe(&self) -> u8;

    /// Address offset OR-ed into the send base address
    fn send_pipe(&self) -> u8;

    /// Hook for request types beyond get_state/set_state
    fn handle_custom_request(&self, _body: &Value) -> Option<Result<Value>> {
        None
    }
}

/// The device classes this hub knows about
pub fn builtin_classes() -> Vec<Arc<dyn DeviceClass>> {
    vec![Arc::new(PowerControl), Arc::new(WeatherStation)]
}

/// Loose boolean coercion for client-supplied field values
pub(crate) fn value_to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => {
            matches!(s.to_lowercase().as_str(), "1" | "y" | "yes" | "true")
        }
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        _ => false,
    }
}
