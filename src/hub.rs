//! Wireless hub registry
//!
//! Owns the radio handle and the node-by-id map; everything reaching a
//! device — inbound radio frames, staleness checks, queued client requests
//! — goes through one poll iteration here. Runs as a [`Sensor`] on the
//! polling driver, which makes this the single writer of node state.

use crate::devices::{DeviceClass, Node};
use crate::error::{Error, Result};
use crate::protocol::Message;
use crate::radio::{Radio, RadioSettings, BASE_RECV_ADDR, PAYLOAD_SIZE};
use crate::sensor::Sensor;
use crate::streaming::ClientBus;
use log::{error, info, warn};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Registry of wireless nodes behind one radio
pub struct WirelessHub {
    radio: Box<dyn Radio>,
    nodes: HashMap<u8, Node>,
    ids_by_name: HashMap<&'static str, u8>,
    bus: Arc<dyn ClientBus>,
}

impl WirelessHub {
    /// Configure the radio and build one node per device class
    pub fn new(
        mut radio: Box<dyn Radio>,
        classes: Vec<Arc<dyn DeviceClass>>,
        settings: &RadioSettings,
        bus: Arc<dyn ClientBus>,
    ) -> Result<Self> {
        radio.configure(settings)?;

        let mut nodes = HashMap::new();
        let mut ids_by_name = HashMap::new();
        for class in classes {
            radio.open_reading_pipe(
                class.listen_pipe_number(),
                BASE_RECV_ADDR | class.listen_pipe() as u64,
            )?;
            ids_by_name.insert(class.name(), class.node_id());
            nodes.insert(class.node_id(), Node::new(class));
        }
        radio.start_listening()?;

        info!("Wireless hub ready with {} device classes", nodes.len());
        Ok(Self {
            radio,
            nodes,
            ids_by_name,
            bus,
        })
    }

    /// Look up a node by its channel name
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.ids_by_name
            .get(name)
            .and_then(|id| self.nodes.get(id))
    }

    /// One poll iteration: drain the radio, age-check every node, then
    /// answer queued client requests.
    pub fn poll_once(&mut self) -> Result<()> {
        self.drain_radio();

        let bus = Arc::clone(&self.bus);
        let now = Instant::now();
        for node in self.nodes.values_mut() {
            node.check_staleness(now, bus.as_ref());
        }

        self.dispatch_client_messages();
        Ok(())
    }

    /// Read all immediately available frames and route them by node id
    fn drain_radio(&mut self) {
        let bus = Arc::clone(&self.bus);
        loop {
            match self.radio.available() {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    error!("Radio poll failed: {}", e);
                    break;
                }
            }

            let frame = match self.radio.read(PAYLOAD_SIZE) {
                Ok(frame) => frame,
                Err(e) => {
                    error!("Radio read failed: {}", e);
                    break;
                }
            };
            if frame.is_empty() {
                break;
            }

            let (node_id, _) = Message::parse_header(frame[0]);
            let Some(node) = self.nodes.get_mut(&node_id) else {
                warn!("Discarding frame: {}", Error::UnknownNode(node_id));
                continue;
            };
            if let Err(e) = node.on_inbound_frame(&frame, bus.as_ref()) {
                warn!("Dropping frame from node {}: {}", node_id, e);
            }
        }
    }

    /// Drain the broker queue, answer each request on its own connection
    fn dispatch_client_messages(&mut self) {
        let bus = Arc::clone(&self.bus);
        for msg in bus.get_messages() {
            let Some(&node_id) = self.ids_by_name.get(msg.sensor.as_str()) else {
                warn!(
                    "Dropping client request: {}",
                    Error::UnknownSensor(msg.sensor.clone())
                );
                bus.send_message(&json!({"error": "unknown_sensor"}), msg.conn);
                continue;
            };
            let Some(node) = self.nodes.get_mut(&node_id) else {
                continue;
            };

            let response =
                match node.process_client_request(self.radio.as_mut(), &msg.body, bus.as_ref()) {
                    Ok(response) => response,
                    Err(e) => {
                        // A failed delivery for one device never halts the others
                        error!("Request for `{}` failed: {}", msg.sensor, e);
                        json!({"error": e.to_string()})
                    }
                };
            bus.send_message(&response, msg.conn);
        }
    }
}

impl Sensor for WirelessHub {
    fn name(&self) -> &str {
        "wireless"
    }

    fn iteration(&mut self) -> Result<()> {
        self.poll_once()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::builtin_classes;
    use crate::radio::mock::MockRadio;
    use crate::streaming::mock::RecordingBus;

    fn make_hub(radio: MockRadio, bus: Arc<RecordingBus>) -> WirelessHub {
        let settings = RadioSettings::from_config(
            &crate::config::HubConfig::hub_defaults().radio,
        )
        .unwrap();
        WirelessHub::new(Box::new(radio), builtin_classes(), &settings, bus).unwrap()
    }

    #[test]
    fn test_construction_configures_radio() {
        let radio = MockRadio::new();
        let bus = Arc::new(RecordingBus::new());
        let hub = make_hub(radio.clone(), bus);

        assert!(radio.is_configured());
        assert!(radio.is_listening());
        assert_eq!(
            radio.reading_pipes(),
            vec![
                (1, BASE_RECV_ADDR | 0x01),
                (2, BASE_RECV_ADDR | 0x02),
            ]
        );
        assert!(hub.node("lamp").is_some());
        assert!(hub.node("weather").is_some());
        assert!(hub.node("toaster").is_none());
    }

    #[test]
    fn test_status_frame_routes_to_owning_node() {
        let radio = MockRadio::new();
        let bus = Arc::new(RecordingBus::new());
        let mut hub = make_hub(radio.clone(), Arc::clone(&bus));

        // Power-on STATUS for the lamp, fresh weather report for node 2
        radio.inject_frame(&[0x01, 0x01]);
        radio.inject_frame(&[0x02, 118, 55]);
        hub.poll_once().unwrap();

        let broadcasts = bus.broadcasts();
        assert_eq!(broadcasts.len(), 2);
        assert_eq!(broadcasts[0].1, "lamp");
        assert_eq!(broadcasts[1].1, "weather");
        assert!(hub.node("lamp").unwrap().state().online);
    }

    #[test]
    fn test_unknown_node_frame_is_discarded() {
        let radio = MockRadio::new();
        let bus = Arc::new(RecordingBus::new());
        let mut hub = make_hub(radio.clone(), Arc::clone(&bus));

        radio.inject_frame(&[0x05, 0x01]); // node 5: nobody home
        hub.poll_once().unwrap();

        assert!(bus.broadcasts().is_empty());
    }

    #[test]
    fn test_malformed_frame_does_not_stop_the_drain() {
        let radio = MockRadio::new();
        let bus = Arc::new(RecordingBus::new());
        let mut hub = make_hub(radio.clone(), Arc::clone(&bus));

        radio.inject_frame(&[0x01]); // STATUS with no payload: parse error
        radio.inject_frame(&[0x02, 118, 55]);
        hub.poll_once().unwrap();

        // The bad lamp frame was skipped, the weather frame got through
        let broadcasts = bus.broadcasts();
        assert_eq!(broadcasts.len(), 1);
        assert_eq!(broadcasts[0].1, "weather");
    }

    #[test]
    fn test_client_request_round_trip() {
        let radio = MockRadio::new();
        let bus = Arc::new(RecordingBus::new());
        let mut hub = make_hub(radio.clone(), Arc::clone(&bus));

        bus.push_message("lamp", json!({"type": "get_state"}), 7);
        hub.poll_once().unwrap();

        let sent = bus.sent();
        assert_eq!(sent.len(), 1);
        let (response, conn) = &sent[0];
        assert_eq!(*conn, 7);
        assert_eq!(response["sensor"], json!("lamp"));
        assert_eq!(response["is_online"], json!(false));
    }

    #[test]
    fn test_unknown_sensor_request_gets_error_response() {
        let radio = MockRadio::new();
        let bus = Arc::new(RecordingBus::new());
        let mut hub = make_hub(radio.clone(), Arc::clone(&bus));

        bus.push_message("toaster", json!({"type": "get_state"}), 3);
        hub.poll_once().unwrap();

        let sent = bus.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, json!({"error": "unknown_sensor"}));
    }

    #[test]
    fn test_set_state_flows_to_radio_and_broadcast() {
        let radio = MockRadio::new();
        let bus = Arc::new(RecordingBus::new());
        let mut hub = make_hub(radio.clone(), Arc::clone(&bus));

        // Lamp reports off, then a client turns it on
        radio.inject_frame(&[0x01, 0x00]);
        hub.poll_once().unwrap();
        assert_eq!(bus.broadcasts().len(), 1);

        bus.push_message(
            "lamp",
            json!({"type": "set_state", "state": {"power_on": true}}),
            9,
        );
        hub.poll_once().unwrap();

        // Ack to the requesting connection
        let sent = bus.sent();
        assert_eq!(sent.last().unwrap(), &(json!({}), 9));

        // Physical ON frame went out on the lamp's send pipe
        let written = radio.written();
        assert_eq!(written, vec![vec![0x01 | 31 << 3]]);

        // And subscribers heard about the change
        let broadcasts = bus.broadcasts();
        assert_eq!(broadcasts.len(), 2);
        assert_eq!(broadcasts[1].0["state"], json!({"power_on": true}));
    }

    #[test]
    fn test_registered_tcp_client_receives_state_broadcast() {
        use crate::streaming::SocketBroker;
        use std::io::{BufRead, BufReader, Write};
        use std::net::TcpStream;
        use std::time::Duration;

        let broker = SocketBroker::spawn("127.0.0.1:0").unwrap();
        let radio = MockRadio::new();
        let settings = RadioSettings::from_config(
            &crate::config::HubConfig::hub_defaults().radio,
        )
        .unwrap();
        let bus: Arc<dyn crate::streaming::ClientBus> =
            Arc::clone(&broker) as Arc<dyn crate::streaming::ClientBus>;
        let mut hub =
            WirelessHub::new(Box::new(radio.clone()), builtin_classes(), &settings, bus).unwrap();

        let mut client = TcpStream::connect(broker.local_addr()).unwrap();
        client
            .write_all(b"{\"type\":\"register\",\"sensor\":\"lamp\",\"msg_stream\":\"1\"}\n")
            .unwrap();
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(broker.subscriber_count("lamp", "1"), 1);

        // STATUS frame toggling power on arrives over the radio
        radio.inject_frame(&[0x01, 0x01]);
        hub.poll_once().unwrap();

        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut reader = BufReader::new(client);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        let received: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(
            received,
            json!({
                "sensor": "lamp",
                "node_id": 1,
                "msg_stream": "1",
                "is_online": true,
                "type": "state",
                "state": {"power_on": true},
            })
        );

        // A request sent over the socket is answered on the same socket
        reader
            .get_mut()
            .write_all(b"{\"type\":\"get_state\",\"sensor\":\"lamp\"}\n")
            .unwrap();
        std::thread::sleep(Duration::from_millis(120));
        hub.poll_once().unwrap();
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        let response: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(response["is_online"], json!(true));
        assert_eq!(response["state"], json!({"power_on": true}));

        broker.stop();
    }

    #[test]
    fn test_delivery_failure_is_reported_not_fatal() {
        let radio = MockRadio::new();
        let bus = Arc::new(RecordingBus::new());
        let mut hub = make_hub(radio.clone(), Arc::clone(&bus));

        radio.inject_frame(&[0x01, 0x00]);
        hub.poll_once().unwrap();

        // Every transmission attempt fails
        radio.script_writes(&[false; 5]);
        bus.push_message(
            "lamp",
            json!({"type": "set_state", "state": {"power_on": true}}),
            4,
        );
        bus.push_message("weather", json!({"type": "get_state"}), 5);
        hub.poll_once().unwrap();

        // The failed request got an error response...
        let sent = bus.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].0["error"]
            .as_str()
            .unwrap()
            .contains("failed after 5 attempts"));
        // ...and the next request was still served
        assert_eq!(sent[1].1, 5);
        assert_eq!(sent[1].0["sensor"], json!("weather"));
    }
}
