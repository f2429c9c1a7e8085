//! Radio transport for the wireless device link
//!
//! The hub talks to its peripherals through an nRF24-style transceiver
//! exposed behind the [`Radio`] trait: fixed 32-byte frames, one writing
//! pipe, up to six reading pipes, acknowledged writes. The production
//! implementation drives a UART-attached radio bridge; tests use an
//! in-memory mock.

use crate::config::RadioConfig;
use crate::error::{Error, Result};

mod serial;
pub use serial::SerialRadio;

#[cfg(test)]
pub mod mock;

/// Fixed radio frame size in bytes
pub const PAYLOAD_SIZE: usize = 32;

/// Base address the hub transmits to; device send-pipe offset is OR-ed in
pub const BASE_SEND_ADDR: u64 = 0x53_65_4E_64_00;

/// Base address the hub listens on; device listen-pipe offset is OR-ed in
pub const BASE_RECV_ADDR: u64 = 0x52_65_43_76_00;

/// Air data rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataRate {
    Kbps250,
    Mbps1,
    Mbps2,
}

/// Power amplifier level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaLevel {
    Min,
    Low,
    High,
    Max,
}

/// Physical-layer settings applied once at startup
#[derive(Debug, Clone)]
pub struct RadioSettings {
    /// RF channel number
    pub channel: u8,
    /// Air data rate
    pub data_rate: DataRate,
    /// Power amplifier level
    pub pa_level: PaLevel,
    /// Hardware auto-retransmit delay (250 µs units)
    pub retry_delay: u8,
    /// Hardware auto-retransmit count
    pub retry_count: u8,
}

impl RadioSettings {
    /// Build settings from the `[radio]` config section
    pub fn from_config(cfg: &RadioConfig) -> Result<Self> {
        let data_rate = match cfg.data_rate.as_str() {
            "250kbps" => DataRate::Kbps250,
            "1mbps" => DataRate::Mbps1,
            "2mbps" => DataRate::Mbps2,
            other => {
                return Err(Error::InvalidParameter(format!(
                    "unsupported data rate `{}`",
                    other
                )))
            }
        };
        let pa_level = match cfg.pa_level.as_str() {
            "min" => PaLevel::Min,
            "low" => PaLevel::Low,
            "high" => PaLevel::High,
            "max" => PaLevel::Max,
            other => {
                return Err(Error::InvalidParameter(format!(
                    "unsupported PA level `{}`",
                    other
                )))
            }
        };
        Ok(Self {
            channel: cfg.channel,
            data_rate,
            pa_level,
            retry_delay: cfg.retry_delay,
            retry_count: cfg.retry_count,
        })
    }
}

/// Radio trait for the duplex byte-frame channel to the peripherals
pub trait Radio: Send {
    /// Apply physical-layer settings (channel, data rate, PA, hw retries)
    fn configure(&mut self, settings: &RadioSettings) -> Result<()>;

    /// Open a reading pipe on the given pipe number and address
    fn open_reading_pipe(&mut self, pipe: u8, address: u64) -> Result<()>;

    /// Select the address subsequent writes transmit to
    fn open_writing_pipe(&mut self, address: u64) -> Result<()>;

    /// Enter receive mode
    fn start_listening(&mut self) -> Result<()>;

    /// Leave receive mode (required before transmitting)
    fn stop_listening(&mut self) -> Result<()>;

    /// Whether a received frame is waiting
    fn available(&mut self) -> Result<bool>;

    /// Read one received frame, truncated to `max_len` bytes
    fn read(&mut self, max_len: usize) -> Result<Vec<u8>>;

    /// Transmit one frame; `Ok(true)` means the peer acknowledged it
    fn write(&mut self, payload: &[u8]) -> Result<bool>;
}
