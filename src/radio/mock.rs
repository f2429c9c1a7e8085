//! Mock radio for testing

use super::{Radio, RadioSettings};
use crate::error::Result;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// In-memory radio for unit testing
///
/// Inbound frames are injected by the test; writes are recorded along with
/// the pipe they targeted. Write outcomes can be scripted to exercise the
/// retry path (an empty script means every write is acknowledged).
#[derive(Clone, Default)]
pub struct MockRadio {
    inner: Arc<Mutex<MockRadioInner>>,
}

#[derive(Default)]
struct MockRadioInner {
    inbound: VecDeque<Vec<u8>>,
    written: Vec<Vec<u8>>,
    write_script: VecDeque<bool>,
    writing_pipe: Option<u64>,
    reading_pipes: Vec<(u8, u64)>,
    listening: bool,
    configured: bool,
}

impl MockRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame to be returned by `read`
    pub fn inject_frame(&self, frame: &[u8]) {
        self.inner.lock().inbound.push_back(frame.to_vec());
    }

    /// Script the outcomes of upcoming writes (true = acknowledged)
    pub fn script_writes(&self, outcomes: &[bool]) {
        self.inner.lock().write_script.extend(outcomes);
    }

    /// All payloads passed to `write`, in order
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.inner.lock().written.clone()
    }

    /// The address last opened for writing
    pub fn writing_pipe(&self) -> Option<u64> {
        self.inner.lock().writing_pipe
    }

    /// Reading pipes opened so far
    pub fn reading_pipes(&self) -> Vec<(u8, u64)> {
        self.inner.lock().reading_pipes.clone()
    }

    pub fn is_listening(&self) -> bool {
        self.inner.lock().listening
    }

    pub fn is_configured(&self) -> bool {
        self.inner.lock().configured
    }
}

impl Radio for MockRadio {
    fn configure(&mut self, _settings: &RadioSettings) -> Result<()> {
        self.inner.lock().configured = true;
        Ok(())
    }

    fn open_reading_pipe(&mut self, pipe: u8, address: u64) -> Result<()> {
        self.inner.lock().reading_pipes.push((pipe, address));
        Ok(())
    }

    fn open_writing_pipe(&mut self, address: u64) -> Result<()> {
        self.inner.lock().writing_pipe = Some(address);
        Ok(())
    }

    fn start_listening(&mut self) -> Result<()> {
        self.inner.lock().listening = true;
        Ok(())
    }

    fn stop_listening(&mut self) -> Result<()> {
        self.inner.lock().listening = false;
        Ok(())
    }

    fn available(&mut self) -> Result<bool> {
        Ok(!self.inner.lock().inbound.is_empty())
    }

    fn read(&mut self, max_len: usize) -> Result<Vec<u8>> {
        let mut inner = self.inner.lock();
        let mut frame = inner.inbound.pop_front().unwrap_or_default();
        frame.truncate(max_len);
        Ok(frame)
    }

    fn write(&mut self, payload: &[u8]) -> Result<bool> {
        let mut inner = self.inner.lock();
        inner.written.push(payload.to_vec());
        Ok(inner.write_script.pop_front().unwrap_or(true))
    }
}
