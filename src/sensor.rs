//! Generic sensor polling driver
//!
//! Every sensor on the hub — the wireless registry included — exposes one
//! `iteration()` and gets driven on a fixed cadence by a dedicated thread.
//! The driver tracks consecutive failures, surfaces a three-state status,
//! and keeps a thread-safe key/value store for status reporting. The tick
//! is a condvar wait, so `stop()` cancels a sleeping driver immediately;
//! an in-flight iteration is allowed to finish.

use crate::error::Result;
use log::{error, info, warn};
use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A periodically polled sensor
pub trait Sensor: Send {
    /// Short name used in logs and thread names
    fn name(&self) -> &str;

    /// One poll iteration
    fn iteration(&mut self) -> Result<()>;
}

/// Reported sensor health
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorStatus {
    /// No successful iteration yet
    Idle,
    /// Last iteration succeeded
    Ok,
    /// Too many consecutive failures
    Error,
}

struct SensorShared {
    values: Mutex<HashMap<String, Value>>,
    status: Mutex<SensorStatus>,
    stop: Mutex<bool>,
    tick: Condvar,
}

impl SensorShared {
    fn new() -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
            status: Mutex::new(SensorStatus::Idle),
            stop: Mutex::new(false),
            tick: Condvar::new(),
        }
    }
}

/// Drives one sensor on a fixed cadence from a dedicated thread
pub struct SensorDriver {
    shared: Arc<SensorShared>,
    thread: Option<JoinHandle<()>>,
    name: String,
}

impl SensorDriver {
    /// Spawn the polling thread
    ///
    /// `interval` is the tick cadence (sub-second resolution, 100 ms and
    /// up is sensible); `errors_threshold` is how many consecutive
    /// iteration failures flip the status to [`SensorStatus::Error`].
    pub fn spawn(
        mut sensor: Box<dyn Sensor>,
        interval: Duration,
        errors_threshold: u32,
    ) -> Result<SensorDriver> {
        let name = sensor.name().to_string();
        let shared = Arc::new(SensorShared::new());
        let loop_shared = Arc::clone(&shared);

        let thread = thread::Builder::new()
            .name(format!("sensor-{}", name))
            .spawn(move || {
                info!(
                    "Sensor `{}` polling every {:?}",
                    sensor.name(),
                    interval
                );
                run_loop(sensor.as_mut(), interval, errors_threshold, &loop_shared);
            })?;

        Ok(SensorDriver {
            shared,
            thread: Some(thread),
            name,
        })
    }

    /// Current health of the sensor
    pub fn status(&self) -> SensorStatus {
        *self.shared.status.lock()
    }

    /// Read a reported value
    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.shared.values.lock().get(key).cloned()
    }

    /// Store a reported value
    pub fn set_value(&self, key: &str, value: Value) {
        self.shared.values.lock().insert(key.to_string(), value);
    }

    /// Cancel the tick and join the polling thread
    pub fn stop(&mut self) {
        {
            let mut stop = self.shared.stop.lock();
            if *stop {
                return;
            }
            *stop = true;
        }
        self.shared.tick.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        info!("Sensor `{}` stopped", self.name);
    }
}

impl Drop for SensorDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(
    sensor: &mut dyn Sensor,
    interval: Duration,
    errors_threshold: u32,
    shared: &SensorShared,
) {
    let mut consecutive_errors = 0u32;

    loop {
        // Cancellable tick: woken early only by stop()
        {
            let mut stop = shared.stop.lock();
            if *stop {
                break;
            }
            shared.tick.wait_for(&mut stop, interval);
            if *stop {
                break;
            }
        }

        match sensor.iteration() {
            Ok(()) => {
                consecutive_errors = 0;
                *shared.status.lock() = SensorStatus::Ok;
            }
            Err(e) => {
                error!("Sensor `{}` iteration failed: {}", sensor.name(), e);
                consecutive_errors += 1;
                if consecutive_errors >= errors_threshold {
                    let mut status = shared.status.lock();
                    if *status != SensorStatus::Error {
                        warn!(
                            "Sensor `{}` failed {} times in a row, marking as errored",
                            sensor.name(),
                            consecutive_errors
                        );
                    }
                    *status = SensorStatus::Error;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    struct CountingSensor {
        counter: Arc<AtomicU32>,
    }

    impl Sensor for CountingSensor {
        fn name(&self) -> &str {
            "counting"
        }
        fn iteration(&mut self) -> Result<()> {
            self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingSensor;

    impl Sensor for FailingSensor {
        fn name(&self) -> &str {
            "failing"
        }
        fn iteration(&mut self) -> Result<()> {
            Err(Error::Other("boom".to_string()))
        }
    }

    fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_driver_runs_iterations_and_reports_ok() {
        let counter = Arc::new(AtomicU32::new(0));
        let sensor = CountingSensor {
            counter: Arc::clone(&counter),
        };
        let mut driver =
            SensorDriver::spawn(Box::new(sensor), Duration::from_millis(10), 3).unwrap();

        assert!(wait_until(Duration::from_secs(2), || {
            counter.load(Ordering::SeqCst) >= 3
        }));
        assert_eq!(driver.status(), SensorStatus::Ok);
        driver.stop();
    }

    #[test]
    fn test_status_turns_error_after_threshold() {
        let mut driver =
            SensorDriver::spawn(Box::new(FailingSensor), Duration::from_millis(10), 3).unwrap();

        assert_eq!(driver.status(), SensorStatus::Idle);
        assert!(wait_until(Duration::from_secs(2), || {
            driver.status() == SensorStatus::Error
        }));
        driver.stop();
    }

    #[test]
    fn test_stop_cancels_a_long_tick_promptly() {
        let counter = Arc::new(AtomicU32::new(0));
        let sensor = CountingSensor {
            counter: Arc::clone(&counter),
        };
        let mut driver =
            SensorDriver::spawn(Box::new(sensor), Duration::from_secs(3600), 3).unwrap();

        let start = Instant::now();
        driver.stop();
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_value_store() {
        let counter = Arc::new(AtomicU32::new(0));
        let sensor = CountingSensor { counter };
        let mut driver =
            SensorDriver::spawn(Box::new(sensor), Duration::from_millis(50), 3).unwrap();

        assert_eq!(driver.get_value("temperature"), None);
        driver.set_value("temperature", serde_json::json!(21));
        assert_eq!(driver.get_value("temperature"), Some(serde_json::json!(21)));
        driver.stop();
    }
}
