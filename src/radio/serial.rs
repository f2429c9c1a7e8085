//! Serial radio bridge implementation
//!
//! Drives an nRF24 module attached through a UART bridge MCU. Every frame
//! on the wire is `[opcode] [len] [payload...]`; the host sends control
//! opcodes to configure the transceiver and transmit frames, the bridge
//! pushes received radio frames and transmit results back.

use super::{DataRate, PaLevel, Radio, RadioSettings, PAYLOAD_SIZE};
use crate::error::{Error, Result};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::thread;
use std::time::{Duration, Instant};

// Host → bridge opcodes
const OP_CONFIGURE: u8 = 0x01;
const OP_OPEN_READING: u8 = 0x02;
const OP_OPEN_WRITING: u8 = 0x03;
const OP_START_LISTEN: u8 = 0x04;
const OP_STOP_LISTEN: u8 = 0x05;
const OP_TRANSMIT: u8 = 0x06;

// Bridge → host opcodes
const OP_FRAME: u8 = 0x10;
const OP_TX_RESULT: u8 = 0x11;

/// How long to wait for the bridge to report a transmit result
const ACK_TIMEOUT: Duration = Duration::from_millis(250);

/// Radio implementation over a UART-attached bridge module
pub struct SerialRadio {
    port: Box<dyn SerialPort>,
    rx: VecDeque<u8>,
    inbound: VecDeque<Vec<u8>>,
    tx_result: Option<bool>,
}

impl SerialRadio {
    /// Open the bridge serial port
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(5))
            .open()?;

        log::info!("Opened radio bridge: {} at {} baud", path, baud_rate);

        Ok(SerialRadio {
            port,
            rx: VecDeque::new(),
            inbound: VecDeque::new(),
            tx_result: None,
        })
    }

    fn send_control(&mut self, opcode: u8, args: &[u8]) -> Result<()> {
        let mut frame = Vec::with_capacity(2 + args.len());
        frame.push(opcode);
        frame.push(args.len() as u8);
        frame.extend_from_slice(args);
        self.port.write_all(&frame)?;
        Ok(())
    }

    /// Pull pending bytes off the port and parse complete bridge frames
    fn pump(&mut self) -> Result<()> {
        let pending = self.port.bytes_to_read()? as usize;
        if pending > 0 {
            let mut buf = vec![0u8; pending.min(512)];
            match self.port.read(&mut buf) {
                Ok(n) => self.rx.extend(&buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.parse_frames();
        Ok(())
    }

    fn parse_frames(&mut self) {
        while self.rx.len() >= 2 {
            let opcode = self.rx[0];
            if opcode != OP_FRAME && opcode != OP_TX_RESULT {
                // Resync one byte at a time
                log::debug!("Bridge: skipping unexpected byte {:#04x}", opcode);
                self.rx.pop_front();
                continue;
            }

            let len = self.rx[1] as usize;
            if self.rx.len() < 2 + len {
                break;
            }

            let frame: Vec<u8> = self.rx.drain(..2 + len).collect();
            let payload = &frame[2..];

            match opcode {
                OP_FRAME => {
                    log::debug!("Bridge: received {}-byte radio frame", payload.len());
                    self.inbound.push_back(payload.to_vec());
                }
                OP_TX_RESULT => {
                    self.tx_result = Some(payload.first().copied() == Some(1));
                }
                _ => unreachable!(),
            }
        }
    }
}

fn address_bytes(address: u64) -> [u8; 5] {
    let bytes = address.to_be_bytes();
    [bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]]
}

impl Radio for SerialRadio {
    fn configure(&mut self, settings: &RadioSettings) -> Result<()> {
        let data_rate = match settings.data_rate {
            DataRate::Kbps250 => 0,
            DataRate::Mbps1 => 1,
            DataRate::Mbps2 => 2,
        };
        let pa_level = match settings.pa_level {
            PaLevel::Min => 0,
            PaLevel::Low => 1,
            PaLevel::High => 2,
            PaLevel::Max => 3,
        };
        self.send_control(
            OP_CONFIGURE,
            &[
                settings.channel,
                data_rate,
                pa_level,
                settings.retry_delay,
                settings.retry_count,
            ],
        )?;
        log::info!(
            "Radio configured: channel {:#04x}, {:?}, {:?}",
            settings.channel,
            settings.data_rate,
            settings.pa_level
        );
        Ok(())
    }

    fn open_reading_pipe(&mut self, pipe: u8, address: u64) -> Result<()> {
        let mut args = vec![pipe];
        args.extend_from_slice(&address_bytes(address));
        self.send_control(OP_OPEN_READING, &args)
    }

    fn open_writing_pipe(&mut self, address: u64) -> Result<()> {
        self.send_control(OP_OPEN_WRITING, &address_bytes(address))
    }

    fn start_listening(&mut self) -> Result<()> {
        self.send_control(OP_START_LISTEN, &[])
    }

    fn stop_listening(&mut self) -> Result<()> {
        self.send_control(OP_STOP_LISTEN, &[])
    }

    fn available(&mut self) -> Result<bool> {
        self.pump()?;
        Ok(!self.inbound.is_empty())
    }

    fn read(&mut self, max_len: usize) -> Result<Vec<u8>> {
        self.pump()?;
        let mut frame = self.inbound.pop_front().unwrap_or_default();
        frame.truncate(max_len);
        Ok(frame)
    }

    fn write(&mut self, payload: &[u8]) -> Result<bool> {
        if payload.len() > PAYLOAD_SIZE {
            return Err(Error::PayloadTooLong(payload.len()));
        }

        self.tx_result = None;
        self.send_control(OP_TRANSMIT, payload)?;

        // The bridge reports the ack outcome of the transmission; treat a
        // silent bridge as an unacknowledged send.
        let deadline = Instant::now() + ACK_TIMEOUT;
        loop {
            self.pump()?;
            if let Some(acked) = self.tx_result.take() {
                return Ok(acked);
            }
            if Instant::now() >= deadline {
                log::debug!("Bridge: no transmit result within {:?}", ACK_TIMEOUT);
                return Ok(false);
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}
