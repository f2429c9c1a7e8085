//! Application orchestration for the TarangHub daemon
//!
//! Wires config → broker → radio → hub → polling driver, and handles
//! graceful shutdown on SIGINT/SIGTERM.

use crate::config::HubConfig;
use crate::devices::builtin_classes;
use crate::error::Result;
use crate::hub::WirelessHub;
use crate::radio::{RadioSettings, SerialRadio};
use crate::sensor::SensorDriver;
use crate::streaming::{ClientBus, SocketBroker};
use log::{info, warn};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Interval between keep-alive stats lines
const STATS_INTERVAL: Duration = Duration::from_secs(30);

/// Main application structure that manages all components
pub struct HubApp {
    broker: Arc<SocketBroker>,
    driver: SensorDriver,
    shutdown: Arc<AtomicBool>,
}

impl HubApp {
    /// Initialize the broker, the radio link and the polling driver
    pub fn new(config: HubConfig) -> Result<Self> {
        info!("Setting up socket broker on {}", config.broker.bind_address);
        let broker = SocketBroker::spawn(&config.broker.bind_address)?;

        info!("Opening radio bridge on {}", config.radio.port);
        let radio = SerialRadio::open(&config.radio.port, config.radio.baud_rate)?;
        let settings = RadioSettings::from_config(&config.radio)?;

        let bus: Arc<dyn ClientBus> = Arc::clone(&broker) as Arc<dyn ClientBus>;
        let hub = WirelessHub::new(Box::new(radio), builtin_classes(), &settings, bus)?;

        let interval = Duration::from_millis(config.polling.interval_ms.max(100));
        let driver = SensorDriver::spawn(Box::new(hub), interval, config.polling.errors_threshold)?;

        Ok(Self {
            broker,
            driver,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Run until a shutdown signal arrives, then stop all threads
    pub fn run(&mut self) -> Result<()> {
        self.setup_signal_handler()?;

        info!("TarangHub running; press Ctrl+C to stop");

        let mut last_stats = Instant::now();
        while !self.shutdown.load(Ordering::Relaxed) {
            thread::sleep(Duration::from_millis(100));

            if last_stats.elapsed() >= STATS_INTERVAL {
                info!(
                    "Status: {:?}, {} client connections",
                    self.driver.status(),
                    self.broker.connection_count()
                );
                last_stats = Instant::now();
            }
        }

        info!("Shutting down");
        self.driver.stop();
        self.broker.stop();
        info!("Shutdown complete");
        Ok(())
    }

    fn setup_signal_handler(&self) -> Result<()> {
        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        let shutdown = Arc::clone(&self.shutdown);

        thread::Builder::new()
            .name("signal-handler".to_string())
            .spawn(move || {
                if let Some(signal) = signals.forever().next() {
                    warn!("Received signal {}, shutting down", signal);
                    shutdown.store(true, Ordering::Relaxed);
                }
            })?;

        Ok(())
    }
}
