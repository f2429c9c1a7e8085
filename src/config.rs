//! Configuration for the TarangHub daemon
//!
//! Loads configuration from a TOML file covering the radio link, the
//! client-facing socket broker, the polling cadence, and logging.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level daemon configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HubConfig {
    pub radio: RadioConfig,
    pub broker: BrokerConfig,
    pub polling: PollingConfig,
    pub logging: LoggingConfig,
}

/// Radio link configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RadioConfig {
    /// Serial port of the UART radio bridge (e.g. "/dev/ttyUSB0")
    pub port: String,
    /// Baud rate for the bridge link
    pub baud_rate: u32,
    /// RF channel number
    pub channel: u8,
    /// Air data rate: "250kbps", "1mbps" or "2mbps"
    pub data_rate: String,
    /// Power amplifier level: "min", "low", "high" or "max"
    pub pa_level: String,
    /// Hardware auto-retransmit delay (250 µs units)
    pub retry_delay: u8,
    /// Hardware auto-retransmit count
    pub retry_count: u8,
}

/// Socket broker configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    /// TCP bind address for client connections
    ///
    /// Examples:
    /// - `0.0.0.0:10101` - Bind to all interfaces
    /// - `127.0.0.1:10101` - Localhost only
    pub bind_address: String,
}

/// Polling loop configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollingConfig {
    /// Interval between hub poll iterations, in milliseconds (min 100)
    pub interval_ms: u64,
    /// Consecutive iteration failures before the sensor status turns to error
    pub errors_threshold: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl HubConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: HubConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Default configuration for a Raspberry Pi hub with a UART radio bridge
    ///
    /// Suitable for testing and development. Production deployments should
    /// use a proper TOML configuration file.
    pub fn hub_defaults() -> Self {
        Self {
            radio: RadioConfig {
                port: "/dev/ttyUSB0".to_string(),
                baud_rate: 115_200,
                channel: 0x30,
                data_rate: "250kbps".to_string(),
                pa_level: "high".to_string(),
                retry_delay: 5,
                retry_count: 15,
            },
            broker: BrokerConfig {
                bind_address: "0.0.0.0:10101".to_string(),
            },
            polling: PollingConfig {
                interval_ms: 1000,
                errors_threshold: 10,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::hub_defaults()
    }
}
