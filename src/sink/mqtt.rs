use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, MqttOptions};
use serde::Serialize;

use super::WarningSink;
use crate::proximity::ProximityDecision;

const DEFAULT_MQTT_PORT: u16 = 1883;
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);
const STATE_STOP: &str = "STOP";
const STATE_CLEAR: &str = "CLEAR";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttSettings {
    /// `host` or `host:port`.
    pub broker_addr: String,
    pub topic: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            broker_addr: "127.0.0.1:1883".to_string(),
            topic: "depthguard/stop".to_string(),
            client_id: "depthguard".to_string(),
            username: None,
            password: None,
        }
    }
}

/// Retained state message published on `MqttSettings::topic`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StopPayload {
    pub state: &'static str,
    pub distance_m: Option<f32>,
    pub centroid: Option<[i32; 2]>,
}

impl StopPayload {
    pub fn from_decision(decision: &ProximityDecision) -> Self {
        Self {
            state: if decision.too_close {
                STATE_STOP
            } else {
                STATE_CLEAR
            },
            distance_m: decision.distance_m,
            centroid: decision.centroid.map(|c| [c.x, c.y]),
        }
    }
}

/// Destination for serialized stop states.
trait StatePublisher: Send {
    /// Must not block on a broker outage.
    fn send_state(&mut self, topic: &str, payload: Vec<u8>) -> Result<()>;
}

impl StatePublisher for Client {
    fn send_state(&mut self, topic: &str, payload: Vec<u8>) -> Result<()> {
        Client::try_publish(self, topic.to_string(), QoS::AtLeastOnce, true, payload)
            .context("failed to publish stop state")?;
        Ok(())
    }
}

/// Publishes on the first frame and on every too-close transition.
///
/// A failed publish is logged and forgets the last state, so the next frame
/// publishes again.
struct StopState<P> {
    publisher: P,
    topic: String,
    last_state: Option<bool>,
}

impl<P: StatePublisher> StopState<P> {
    fn new(publisher: P, topic: &str) -> Self {
        Self {
            publisher,
            topic: topic.to_string(),
            last_state: None,
        }
    }

    fn signal(&mut self, decision: &ProximityDecision) -> Result<()> {
        if self.last_state == Some(decision.too_close) {
            return Ok(());
        }
        let payload = serde_json::to_vec(&StopPayload::from_decision(decision))?;
        match self.publisher.send_state(&self.topic, payload) {
            Ok(()) => self.last_state = Some(decision.too_close),
            Err(e) => {
                log::warn!("MqttSink: {:#}, retrying on the next frame", e);
                self.last_state = None;
            }
        }
        Ok(())
    }
}

/// Publishes STOP/CLEAR with QoS 1 whenever the too-close state changes.
///
/// Broker outages never fail `signal`; the connection thread keeps reconnecting.
pub struct MqttSink {
    state: StopState<Client>,
    closing: Arc<AtomicBool>,
    connection_handle: Option<JoinHandle<()>>,
}

impl MqttSink {
    pub fn connect(settings: &MqttSettings) -> Result<Self> {
        let (host, port) = parse_broker_addr(&settings.broker_addr)?;
        let mut options = MqttOptions::new(settings.client_id.clone(), host, port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_start(true);
        if let Some(user) = &settings.username {
            options.set_credentials(user.clone(), settings.password.clone().unwrap_or_default());
        }

        let (client, connection) = Client::new(options, 10);
        let closing = Arc::new(AtomicBool::new(false));
        let handle = spawn_connection_loop(connection, Arc::clone(&closing));
        log::info!(
            "MqttSink: publishing to {} on {}",
            settings.topic,
            settings.broker_addr
        );
        Ok(Self {
            state: StopState::new(client, &settings.topic),
            closing,
            connection_handle: Some(handle),
        })
    }
}

fn spawn_connection_loop(mut connection: Connection, closing: Arc<AtomicBool>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for event in connection.iter() {
            if closing.load(Ordering::SeqCst) {
                break;
            }
            if let Err(e) = event {
                log::warn!("MQTT connection error: {}. Reconnecting...", e);
                std::thread::sleep(RECONNECT_BACKOFF);
            }
        }
    })
}

impl WarningSink for MqttSink {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn signal(&mut self, decision: &ProximityDecision) -> Result<()> {
        self.state.signal(decision)
    }
}

impl Drop for MqttSink {
    fn drop(&mut self) {
        self.closing.store(true, Ordering::SeqCst);
        let _ = self.state.publisher.try_disconnect();
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
    }
}

fn parse_broker_addr(addr: &str) -> Result<(String, u16)> {
    let addr = addr.trim();
    if addr.is_empty() {
        return Err(anyhow!("MQTT broker address must not be empty"));
    }
    match addr.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .map_err(|_| anyhow!("invalid MQTT broker port in {}", addr))?;
            if host.is_empty() {
                return Err(anyhow!("MQTT broker host missing in {}", addr));
            }
            Ok((host.to_string(), port))
        }
        None => Ok((addr.to_string(), DEFAULT_MQTT_PORT)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proximity::Centroid;

    #[test]
    fn broker_addr_defaults_port() -> Result<()> {
        assert_eq!(parse_broker_addr("broker")?, ("broker".to_string(), 1883));
        assert_eq!(
            parse_broker_addr("10.0.0.2:8883")?,
            ("10.0.0.2".to_string(), 8883)
        );
        assert!(parse_broker_addr(":1883").is_err());
        assert!(parse_broker_addr("host:port").is_err());
        Ok(())
    }

    #[test]
    fn stop_payload_serializes_state() -> Result<()> {
        let decision = ProximityDecision {
            centroid: Some(Centroid::new(320, 220)),
            distance_m: Some(0.5),
            too_close: true,
        };
        let json = serde_json::to_string(&StopPayload::from_decision(&decision))?;
        assert_eq!(json, r#"{"state":"STOP","distance_m":0.5,"centroid":[320,220]}"#);

        let clear = serde_json::to_string(&StopPayload::from_decision(
            &ProximityDecision::NOTHING_DETECTED,
        ))?;
        assert_eq!(clear, r#"{"state":"CLEAR","distance_m":null,"centroid":null}"#);
        Ok(())
    }

    /// Records published states; fails the next `failures` sends.
    #[derive(Default)]
    struct RecordingPublisher {
        states: Vec<String>,
        failures: usize,
    }

    impl StatePublisher for RecordingPublisher {
        fn send_state(&mut self, topic: &str, payload: Vec<u8>) -> Result<()> {
            assert_eq!(topic, "depthguard/stop");
            if self.failures > 0 {
                self.failures -= 1;
                return Err(anyhow!("broker unavailable"));
            }
            let json: serde_json::Value = serde_json::from_slice(&payload)?;
            self.states.push(json["state"].as_str().unwrap_or_default().to_string());
            Ok(())
        }
    }

    fn decision(too_close: bool) -> ProximityDecision {
        ProximityDecision {
            centroid: Some(Centroid::new(320, 240)),
            distance_m: Some(if too_close { 0.4 } else { 2.0 }),
            too_close,
        }
    }

    #[test]
    fn publishes_only_state_changes() -> Result<()> {
        let mut state = StopState::new(RecordingPublisher::default(), "depthguard/stop");
        for too_close in [true, true, false, true] {
            state.signal(&decision(too_close))?;
        }
        assert_eq!(state.publisher.states, vec!["STOP", "CLEAR", "STOP"]);
        Ok(())
    }

    #[test]
    fn failed_publish_is_retried_on_next_frame() -> Result<()> {
        let publisher = RecordingPublisher {
            failures: 1,
            ..Default::default()
        };
        let mut state = StopState::new(publisher, "depthguard/stop");

        state.signal(&decision(true))?;
        assert!(state.publisher.states.is_empty());
        assert_eq!(state.last_state, None);

        state.signal(&decision(true))?;
        state.signal(&decision(true))?;
        assert_eq!(state.publisher.states, vec!["STOP"]);
        assert_eq!(state.last_state, Some(true));
        Ok(())
    }

    #[test]
    fn unreachable_broker_does_not_fail_signal() -> Result<()> {
        let settings = MqttSettings {
            broker_addr: "127.0.0.1:1".to_string(),
            ..Default::default()
        };
        let mut sink = MqttSink::connect(&settings)?;
        sink.signal(&decision(true))?;
        sink.signal(&decision(false))?;
        sink.signal(&decision(true))?;
        Ok(())
    }
}
