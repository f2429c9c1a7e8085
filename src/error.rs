//! Error types for TarangHub

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// TarangHub error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration parse error
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration write error
    #[error("Config write error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame shorter than its kind requires
    #[error("Frame too short: {0} bytes")]
    FrameTooShort(usize),

    /// Payload exceeds the fixed radio frame size
    #[error("Payload too long: {0} bytes")]
    PayloadTooLong(usize),

    /// Kind value outside the known and reserved ranges
    #[error("Unknown message kind: {0:#04x}")]
    UnknownKind(u8),

    /// Field identifier missing from the device class's field table
    #[error("Unknown field id: {0:#04x}")]
    UnknownField(u8),

    /// Field name missing from the device class's field table
    #[error("Unknown field name: {0}")]
    UnknownFieldName(String),

    /// Node id does not fit the packed header layout
    #[error("Node id out of range: {0}")]
    InvalidNodeId(u8),

    /// Physical delivery failed after exhausting the retry budget
    #[error("Delivery to node {node_id} failed after {attempts} attempts")]
    DeliveryFailed {
        /// Target device id
        node_id: u8,
        /// Attempts made before giving up
        attempts: u32,
    },

    /// Inbound frame addressed to a node id with no registered class
    #[error("Unknown node id: {0}")]
    UnknownNode(u8),

    /// Client request addressed to a sensor name with no registered class
    #[error("Unknown sensor: {0}")]
    UnknownSensor(String),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
