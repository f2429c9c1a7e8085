//! Remotely switchable power device ("lamp")
//!
//! Reports a single boolean `power_on` field in its STATUS frames; a
//! client-side state change is translated into a dedicated ON/OFF frame in
//! the device-specific kind range.

use super::{value_to_bool, DeviceClass, Fields};
use crate::error::{Error, Result};
use crate::protocol::{FieldTable, Kind, Message};
use log::info;
use serde_json::Value;

/// Device-specific kind: switch the load on
pub const KIND_POWER_ON: u8 = 31;
/// Device-specific kind: switch the load off
pub const KIND_POWER_OFF: u8 = 30;

const FIELD_TABLE: &FieldTable = &[(1, "power_on")];
const ALLOWED_FIELDS: &[&str] = &["power_on"];

/// Power control device class
pub struct PowerControl;

impl DeviceClass for PowerControl {
    fn name(&self) -> &'static str {
        "lamp"
    }

    fn node_id(&self) -> u8 {
        1
    }

    fn field_table(&self) -> &'static FieldTable {
        FIELD_TABLE
    }

    fn allowed_fields(&self) -> &'static [&'static str] {
        ALLOWED_FIELDS
    }

    fn parse_status(&self, payload: &[u8]) -> Result<Fields> {
        let first = *payload.first().ok_or(Error::FrameTooShort(1))?;
        let mut fields = Fields::new();
        fields.insert("power_on".to_string(), Value::Bool(first != 0));
        Ok(fields)
    }

    fn apply_field_effects(&self, fields: &Fields) -> Result<Vec<Message>> {
        let Some(value) = fields.get("power_on") else {
            return Ok(Vec::new());
        };
        let enabled = value_to_bool(value);
        info!("Setting power state to {}", enabled);
        let kind = if enabled {
            Kind::Device(KIND_POWER_ON)
        } else {
            Kind::Device(KIND_POWER_OFF)
        };
        Ok(vec![Message::new(self.node_id(), kind)])
    }

    fn listen_pipe_number(&self) -> u8 {
        1
    }

    fn listen_pipe(&self) -> u8 {
        0x01
    }

    fn send_pipe(&self) -> u8 {
        0x01
    }
}
