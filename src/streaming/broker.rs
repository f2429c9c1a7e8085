//! Multiplexed TCP broker for client subscriptions and broadcasts
//!
//! A dedicated thread owns the listener and every client socket, all in
//! non-blocking mode, serviced on a short tick. Clients send
//! newline-delimited JSON; a `register` message joins a `(sensor, stream)`
//! channel, anything else is queued for the hub thread to consume via
//! `get_messages()`.
//!
//! One lock guards the connection map and the subscription table. Socket
//! writes happen on cloned handles outside the lock with a bounded retry,
//! so a slow subscriber can only fail its own delivery and be dropped.

use super::{ClientBus, ConnId, InboundMessage};
use crate::error::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde_json::Value;
use socket2::{SockRef, TcpKeepalive};
use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Service tick for the accept/read loop
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Keepalive tuning so half-open peers are reaped
const KEEPALIVE_IDLE: Duration = Duration::from_secs(30);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);
#[cfg(unix)]
const KEEPALIVE_PROBES: u32 = 5;

/// A connection buffering this much without a newline is dropped
const MAX_BUFFERED: usize = 64 * 1024;

/// Bounded retry for writes hitting a full socket buffer
const WRITE_RETRY_LIMIT: u32 = 50;
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(2);

struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    /// Partial line carried over between reads
    buffer: Vec<u8>,
    /// Channels this connection joined, for full unwind on disconnect
    registrations: Vec<(String, String)>,
}

#[derive(Default)]
struct BrokerState {
    connections: HashMap<ConnId, Connection>,
    subscriptions: HashMap<(String, String), HashSet<ConnId>>,
    next_id: ConnId,
}

/// TCP broker multiplexing client connections
pub struct SocketBroker {
    state: Mutex<BrokerState>,
    inbound_tx: Sender<InboundMessage>,
    inbound_rx: Receiver<InboundMessage>,
    shutdown: AtomicBool,
    local_addr: SocketAddr,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SocketBroker {
    /// Bind the listener and start the accept/read thread
    pub fn spawn(bind_address: &str) -> Result<Arc<Self>> {
        let listener = TcpListener::bind(bind_address)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let (inbound_tx, inbound_rx) = unbounded();

        let broker = Arc::new(SocketBroker {
            state: Mutex::new(BrokerState::default()),
            inbound_tx,
            inbound_rx,
            shutdown: AtomicBool::new(false),
            local_addr,
            thread: Mutex::new(None),
        });

        let loop_broker = Arc::clone(&broker);
        let handle = thread::Builder::new()
            .name("socket-broker".to_string())
            .spawn(move || loop_broker.accept_loop(listener))?;
        *broker.thread.lock() = Some(handle);

        info!("Socket broker listening on {}", local_addr);
        Ok(broker)
    }

    /// Address the listener actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of live client connections
    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Number of subscribers of one channel
    pub fn subscriber_count(&self, sensor: &str, stream: &str) -> usize {
        self.state
            .lock()
            .subscriptions
            .get(&(sensor.to_string(), stream.to_string()))
            .map_or(0, HashSet::len)
    }

    /// Request the accept loop to exit and join it
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }

    fn accept_loop(&self, listener: TcpListener) {
        while !self.shutdown.load(Ordering::Relaxed) {
            self.accept_new(&listener);
            self.service_connections();
            thread::sleep(POLL_INTERVAL);
        }
        info!("Socket broker loop exiting");
    }

    fn accept_new(&self, listener: &TcpListener) {
        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = Self::setup_client_socket(&stream) {
                        warn!("Failed to set up socket for {}: {}", peer, e);
                        continue;
                    }
                    let mut state = self.state.lock();
                    let id = state.next_id;
                    state.next_id += 1;
                    state.connections.insert(
                        id,
                        Connection {
                            stream,
                            peer,
                            buffer: Vec::new(),
                            registrations: Vec::new(),
                        },
                    );
                    info!("New client connection from {}", peer);
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!("Error accepting client connection: {}", e);
                    break;
                }
            }
        }
    }

    fn setup_client_socket(stream: &TcpStream) -> std::io::Result<()> {
        stream.set_nonblocking(true)?;
        let keepalive = TcpKeepalive::new()
            .with_time(KEEPALIVE_IDLE)
            .with_interval(KEEPALIVE_INTERVAL);
        #[cfg(unix)]
        let keepalive = keepalive.with_retries(KEEPALIVE_PROBES);
        SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
        Ok(())
    }

    /// Read from every client, splitting complete lines off per-connection
    /// buffers; partial tails wait for the next tick.
    fn service_connections(&self) {
        let mut closed: Vec<ConnId> = Vec::new();
        let mut lines: Vec<(ConnId, String)> = Vec::new();

        {
            let mut state = self.state.lock();
            for (&id, conn) in state.connections.iter_mut() {
                let mut chunk = [0u8; 4096];
                loop {
                    match conn.stream.read(&mut chunk) {
                        Ok(0) => {
                            debug!("Client {} closed the connection", conn.peer);
                            closed.push(id);
                            break;
                        }
                        Ok(n) => {
                            conn.buffer.extend_from_slice(&chunk[..n]);
                            if conn.buffer.len() > MAX_BUFFERED {
                                warn!("Client {} exceeded line buffer limit", conn.peer);
                                closed.push(id);
                                break;
                            }
                        }
                        Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                        Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            debug!("Read error from {}: {}", conn.peer, e);
                            closed.push(id);
                            break;
                        }
                    }
                }

                while let Some(pos) = conn.buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = conn.buffer.drain(..=pos).collect();
                    match String::from_utf8(line) {
                        Ok(text) => {
                            let text = text.trim();
                            if !text.is_empty() {
                                lines.push((id, text.to_string()));
                            }
                        }
                        Err(_) => warn!("Non-UTF8 line from {}, dropping", conn.peer),
                    }
                }
            }
        }

        for id in closed {
            self.unregister(id);
        }
        for (id, line) in lines {
            self.process_line(id, &line);
        }
    }

    fn process_line(&self, id: ConnId, line: &str) {
        let body: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!("Malformed JSON from connection {}: {}", id, e);
                return;
            }
        };

        let sensor = match body.get("sensor").and_then(Value::as_str) {
            Some(s) => s.to_string(),
            None => {
                warn!("Message from connection {} lacks a sensor name", id);
                return;
            }
        };

        if body.get("type").and_then(Value::as_str) == Some("register") {
            let stream = body
                .get("msg_stream")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();

            let mut state = self.state.lock();
            // The connection may have been reaped between read and here
            if let Some(conn) = state.connections.get_mut(&id) {
                conn.registrations.push((sensor.clone(), stream.clone()));
                info!(
                    "Registering {} for sensor `{}`, stream `{}`",
                    conn.peer, sensor, stream
                );
                state
                    .subscriptions
                    .entry((sensor, stream))
                    .or_default()
                    .insert(id);
            }
        } else {
            debug!("Queueing request from connection {} for `{}`", id, sensor);
            let _ = self.inbound_tx.send(InboundMessage {
                sensor,
                body,
                conn: id,
            });
        }
    }

    /// Remove a connection and every subscription it holds (no-op if the
    /// connection is already gone).
    fn unregister(&self, id: ConnId) {
        let mut state = self.state.lock();
        if let Some(conn) = state.connections.remove(&id) {
            let _ = conn.stream.shutdown(Shutdown::Both);
            for key in &conn.registrations {
                if let Some(set) = state.subscriptions.get_mut(key) {
                    set.remove(&id);
                    if set.is_empty() {
                        state.subscriptions.remove(key);
                    }
                }
            }
            info!("Unregistered client {}", conn.peer);
        }
    }

    fn encode_line(msg: &Value) -> Vec<u8> {
        let mut bytes = msg.to_string().into_bytes();
        if !bytes.ends_with(b"\n") {
            bytes.push(b'\n');
        }
        bytes
    }

    /// Write with a bounded retry on a full socket buffer; false on failure
    fn write_payload(stream: &mut TcpStream, bytes: &[u8]) -> bool {
        let mut written = 0;
        let mut retries = 0;
        while written < bytes.len() {
            match stream.write(&bytes[written..]) {
                Ok(0) => return false,
                Ok(n) => {
                    written += n;
                    retries = 0;
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    retries += 1;
                    if retries > WRITE_RETRY_LIMIT {
                        return false;
                    }
                    thread::sleep(WRITE_RETRY_DELAY);
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => return false,
            }
        }
        true
    }
}

impl ClientBus for SocketBroker {
    fn broadcast(&self, msg: &Value, sensor: &str, stream: &str) {
        let bytes = Self::encode_line(msg);

        // Clone target handles under the lock, write outside it
        let targets: Vec<(ConnId, TcpStream)> = {
            let state = self.state.lock();
            match state
                .subscriptions
                .get(&(sensor.to_string(), stream.to_string()))
            {
                Some(ids) => ids
                    .iter()
                    .filter_map(|id| {
                        let conn = state.connections.get(id)?;
                        conn.stream.try_clone().ok().map(|s| (*id, s))
                    })
                    .collect(),
                None => return,
            }
        };

        if targets.is_empty() {
            return;
        }
        debug!(
            "Broadcasting to {} subscribers of {}/{}",
            targets.len(),
            sensor,
            stream
        );

        let mut failed = Vec::new();
        for (id, mut stream) in targets {
            if !Self::write_payload(&mut stream, &bytes) {
                failed.push(id);
            }
        }
        // Cleanup happens inline within the same call
        for id in failed {
            warn!("Dropping subscriber {} after failed broadcast", id);
            self.unregister(id);
        }
    }

    fn send_message(&self, msg: &Value, conn: ConnId) -> bool {
        let bytes = Self::encode_line(msg);

        let stream = {
            self.state
                .lock()
                .connections
                .get(&conn)
                .and_then(|c| c.stream.try_clone().ok())
        };

        match stream {
            Some(mut stream) => {
                if Self::write_payload(&mut stream, &bytes) {
                    true
                } else {
                    self.unregister(conn);
                    false
                }
            }
            None => {
                warn!("Sending data to invalid connection {}", conn);
                false
            }
        }
    }

    fn get_messages(&self) -> Vec<InboundMessage> {
        self.inbound_rx.try_iter().collect()
    }
}
