//! Outdoor weather node
//!
//! A battery-powered DHT22 board that reports temperature and humidity.
//! STATUS payload layout: byte 0 is the temperature offset by +100 (so
//! sub-zero readings fit a byte), byte 1 is the relative humidity. The
//! node sleeps between reports, so its staleness threshold is an hour.

use super::{DeviceClass, Fields};
use crate::error::{Error, Result};
use crate::protocol::{FieldTable, Message};
use serde_json::json;
use std::time::Duration;

const FIELD_TABLE: &FieldTable = &[(1, "temperature"), (2, "humidity")];
const ALLOWED_FIELDS: &[&str] = &["temperature", "humidity"];

/// Weather station device class
pub struct WeatherStation;

impl DeviceClass for WeatherStation {
    fn name(&self) -> &'static str {
        "weather"
    }

    fn node_id(&self) -> u8 {
        2
    }

    fn field_table(&self) -> &'static FieldTable {
        FIELD_TABLE
    }

    fn allowed_fields(&self) -> &'static [&'static str] {
        ALLOWED_FIELDS
    }

    fn parse_status(&self, payload: &[u8]) -> Result<Fields> {
        if payload.len() < 2 {
            return Err(Error::FrameTooShort(payload.len()));
        }
        let mut fields = Fields::new();
        fields.insert(
            "temperature".to_string(),
            json!(payload[0] as i32 - 100),
        );
        fields.insert("humidity".to_string(), json!(payload[1] as i32));
        Ok(fields)
    }

    // Nothing on the device is writable; accepted fields only update the
    // hub-side snapshot.
    fn apply_field_effects(&self, _fields: &Fields) -> Result<Vec<Message>> {
        Ok(Vec::new())
    }

    fn offline_after(&self) -> Duration {
        // Sparse reports: the node wakes rarely to save battery
        Duration::from_secs(3600)
    }

    fn listen_pipe_number(&self) -> u8 {
        2
    }

    fn listen_pipe(&self) -> u8 {
        0x02
    }

    fn send_pipe(&self) -> u8 {
        0x02
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        // 118 -> 18 °C, 55 % humidity
        let fields = WeatherStation.parse_status(&[118, 55]).unwrap();
        assert_eq!(fields.get("temperature"), Some(&json!(18)));
        assert_eq!(fields.get("humidity"), Some(&json!(55)));
    }

    #[test]
    fn test_parse_status_negative_temperature() {
        let fields = WeatherStation.parse_status(&[88, 70]).unwrap();
        assert_eq!(fields.get("temperature"), Some(&json!(-12)));
    }

    #[test]
    fn test_parse_status_short_payload() {
        assert!(matches!(
            WeatherStation.parse_status(&[118]),
            Err(Error::FrameTooShort(1))
        ));
    }

    #[test]
    fn test_offline_threshold_override() {
        assert_eq!(WeatherStation.offline_after(), Duration::from_secs(3600));
    }
}
