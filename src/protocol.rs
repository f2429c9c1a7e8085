//! Wireless message codec
//!
//! Frame format: [HEADER] [PAYLOAD ≤ 31 bytes]
//!
//! The header byte packs the node id into the low 3 bits and the message
//! kind into the upper 5 bits, so `(node_id, kind)` always round-trips
//! through a single byte. Kinds 0–4 are common to every device class;
//! kinds 16–31 are reserved for device-specific messages (e.g. the power
//! controller's ON/OFF).
//!
//! Field-addressed messages (FIELD_REQUEST / FIELD_SET / FIELD_RESPONSE)
//! carry a one-byte field identifier after the header, resolved through the
//! device class's field table. An identifier missing from the table is a
//! decode error, never a silent default.

use crate::error::{Error, Result};

/// Maximum payload bytes per frame (one header byte reserved)
pub const MAX_PAYLOAD: usize = 31;

/// First kind value reserved for device-specific messages
pub const DEVICE_KIND_BASE: u8 = 16;

/// Highest kind value representable in the 5-bit header field
pub const KIND_MAX: u8 = 31;

/// Message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Periodic state report from the device, payload parsed per class
    Status,
    /// Ask the device for one field's value
    FieldRequest,
    /// Set one field's value on the device
    FieldSet,
    /// Device answer to a FieldRequest
    FieldResponse,
    /// Ask the device to relay the payload to the next hop
    Proxy,
    /// Device-specific kind in the reserved 16–31 range
    Device(u8),
}

impl Kind {
    /// Decode the raw 5-bit kind value
    pub fn from_raw(raw: u8) -> Result<Self> {
        match raw {
            0 => Ok(Kind::Status),
            1 => Ok(Kind::FieldRequest),
            2 => Ok(Kind::FieldSet),
            3 => Ok(Kind::FieldResponse),
            4 => Ok(Kind::Proxy),
            DEVICE_KIND_BASE..=KIND_MAX => Ok(Kind::Device(raw)),
            other => Err(Error::UnknownKind(other)),
        }
    }

    /// Raw 5-bit kind value
    pub fn as_raw(self) -> u8 {
        match self {
            Kind::Status => 0,
            Kind::FieldRequest => 1,
            Kind::FieldSet => 2,
            Kind::FieldResponse => 3,
            Kind::Proxy => 4,
            Kind::Device(raw) => raw,
        }
    }
}

/// Field id ↔ field name table, one per device class
pub type FieldTable = [(u8, &'static str)];

/// Resolve a field id to its name
pub fn field_name(table: &FieldTable, id: u8) -> Option<&'static str> {
    table.iter().find(|(fid, _)| *fid == id).map(|(_, name)| *name)
}

/// Resolve a field name to its id
pub fn field_id(table: &FieldTable, name: &str) -> Option<u8> {
    table.iter().find(|(_, fname)| *fname == name).map(|(fid, _)| *fid)
}

/// One frame exchanged with a wireless device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Target or source device id (0–7)
    pub node_id: u8,
    /// Message kind
    pub kind: Kind,
    /// Field name for field-addressed kinds
    pub field_name: Option<&'static str>,
    /// Raw payload bytes
    pub payload: Vec<u8>,
}

impl Message {
    /// Create a message with no field and no payload
    pub fn new(node_id: u8, kind: Kind) -> Self {
        Self {
            node_id,
            kind,
            field_name: None,
            payload: Vec::new(),
        }
    }

    /// Create a message carrying an opaque payload
    pub fn with_payload(node_id: u8, kind: Kind, payload: Vec<u8>) -> Self {
        Self {
            node_id,
            kind,
            field_name: None,
            payload,
        }
    }

    /// Build a FIELD_REQUEST for one field
    pub fn field_request(node_id: u8, field: &'static str) -> Self {
        Self {
            node_id,
            kind: Kind::FieldRequest,
            field_name: Some(field),
            payload: Vec::new(),
        }
    }

    /// Build a FIELD_SET carrying the raw value bytes
    pub fn field_set(node_id: u8, field: &'static str, value: Vec<u8>) -> Self {
        Self {
            node_id,
            kind: Kind::FieldSet,
            field_name: Some(field),
            payload: value,
        }
    }

    /// Split a header byte into `(node_id, raw kind)`
    pub fn parse_header(header: u8) -> (u8, u8) {
        (header & 0x07, header >> 3)
    }

    fn format_header(&self) -> Result<u8> {
        if self.node_id > 7 {
            return Err(Error::InvalidNodeId(self.node_id));
        }
        let raw = self.kind.as_raw();
        if raw > KIND_MAX || (raw > 4 && raw < DEVICE_KIND_BASE) {
            return Err(Error::UnknownKind(raw));
        }
        Ok(self.node_id | (raw << 3))
    }

    /// Encode into raw frame bytes
    pub fn encode(&self, table: &FieldTable) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(1 + self.payload.len() + 1);
        out.push(self.format_header()?);

        match self.kind {
            Kind::FieldRequest | Kind::FieldSet | Kind::FieldResponse => {
                let name = self
                    .field_name
                    .ok_or_else(|| Error::InvalidParameter("field name required".into()))?;
                let id = field_id(table, name)
                    .ok_or_else(|| Error::UnknownFieldName(name.to_string()))?;
                out.push(id);
                if self.kind != Kind::FieldRequest {
                    out.extend_from_slice(&self.payload);
                }
            }
            Kind::Status | Kind::Proxy | Kind::Device(_) => {
                out.extend_from_slice(&self.payload);
            }
        }

        if out.len() > 1 + MAX_PAYLOAD {
            return Err(Error::PayloadTooLong(out.len() - 1));
        }
        Ok(out)
    }

    /// Decode raw frame bytes, resolving field ids through `table`
    pub fn decode(raw: &[u8], table: &FieldTable) -> Result<Message> {
        if raw.is_empty() {
            return Err(Error::FrameTooShort(0));
        }

        let (node_id, raw_kind) = Self::parse_header(raw[0]);
        let kind = Kind::from_raw(raw_kind)?;
        let body = &raw[1..];

        match kind {
            Kind::Status | Kind::Proxy | Kind::Device(_) => {
                Ok(Message::with_payload(node_id, kind, body.to_vec()))
            }
            Kind::FieldRequest | Kind::FieldSet | Kind::FieldResponse => {
                if body.is_empty() {
                    return Err(Error::FrameTooShort(raw.len()));
                }
                let name = field_name(table, body[0]).ok_or(Error::UnknownField(body[0]))?;
                let payload = if kind == Kind::FieldRequest {
                    Vec::new()
                } else {
                    body[1..].to_vec()
                };
                Ok(Message {
                    node_id,
                    kind,
                    field_name: Some(name),
                    payload,
                })
            }
        }
    }
}
