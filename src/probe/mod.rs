//! Probe engine
//!
//! This module handles:
//! - Announcing the device when a broker session opens
//! - Dispatching inbound commands to method handlers
//! - Running the periodic telemetry loop while connected
//! - Tracking per-check error state and republishing the snapshot

pub mod checks;

use std::sync::Arc;

use bytes::Bytes;
use probe_protocol::{self as protocol, Envelope};
use serde_json::Map;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::methods::{self, sensors, MethodName};
use crate::transport::PubSubClient;
use checks::{presence, ErrorState, StallDetector};

/// Fixed cadence of the telemetry loop
pub const TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Capabilities advertised when the config names none
pub const DEFAULT_CAPABILITIES: &str = "wake,shutdown,reboot";

/// One configured periodic operation, resolved at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeriodicCheck {
    /// Playback position, watched for stalls
    Playback,
    /// Display mode presence
    Display,
    /// Player process presence
    PlayerProcess,
    /// Any other method: publish its envelope on its own topic
    Producer(MethodName),
}

impl PeriodicCheck {
    fn resolve(name: &str) -> Option<Self> {
        match name {
            "playback_position" => Some(PeriodicCheck::Playback),
            "display" => Some(PeriodicCheck::Display),
            "player_process" => Some(PeriodicCheck::PlayerProcess),
            other => MethodName::parse(other).map(PeriodicCheck::Producer),
        }
    }
}

fn resolve_periodic(raw: &str) -> Vec<PeriodicCheck> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .filter_map(|name| match PeriodicCheck::resolve(name) {
            Some(check) => Some(check),
            None => {
                error!("Unknown periodic method {name} in PROBE_METHODS");
                None
            }
        })
        .collect()
}

/// Telemetry and command dispatch for one connection session
///
/// The probe owns no transport; it drives whatever [`PubSubClient`] it is
/// given and reacts to the callbacks the event pump feeds it.
pub struct Probe {
    identity: String,
    client: Arc<dyn PubSubClient>,
    periodic: Vec<PeriodicCheck>,
    capabilities: String,
    connected: watch::Sender<bool>,
    shutdown: watch::Sender<bool>,
}

/// Handle owning the tick worker task
pub struct ProbeHandle {
    task: JoinHandle<()>,
}

impl ProbeHandle {
    /// Wait until the worker has observably exited
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

impl Probe {
    /// Build a probe for one session, validating the configured lists
    ///
    /// Missing or bad config never aborts: unknown periodic names are
    /// skipped, missing capabilities fall back to the default set.
    pub fn new(identity: String, client: Arc<dyn PubSubClient>, config: &Config) -> Self {
        let periodic = match config.get("PROBE_METHODS") {
            Some(raw) => resolve_periodic(raw),
            None => {
                error!("No PROBE_METHODS in config");
                Vec::new()
            }
        };
        let capabilities = match config.get("PROBE_CAPABILITIES") {
            Some(raw) => raw.to_string(),
            None => {
                error!("No PROBE_CAPABILITIES in config");
                DEFAULT_CAPABILITIES.to_string()
            }
        };
        for capability in capabilities.split(',') {
            if MethodName::parse(capability.trim()).is_none() {
                debug!("Capability {capability} has no local handler");
            }
        }
        let (connected, _) = watch::channel(false);
        let (shutdown, _) = watch::channel(false);
        Self {
            identity,
            client,
            periodic,
            capabilities,
            connected,
            shutdown,
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Receiver observing connect and disconnect edges
    pub fn connected_state(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// Spawn the telemetry worker
    ///
    /// Ticks are skipped while disconnected; a tick already running when
    /// [`Probe::stop`] fires finishes before the worker exits.
    pub fn start(self: &Arc<Self>) -> ProbeHandle {
        let probe = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        let task = tokio::spawn(async move {
            let mut ticker = interval(TICK_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut errors = ErrorState::new();
            let mut playback = StallDetector::default();
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if probe.is_connected() {
                            probe.run_checks(&mut errors, &mut playback).await;
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
            debug!("Telemetry worker stopped");
        });
        ProbeHandle { task }
    }

    /// Signal the telemetry worker to stop; idempotent
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Broker session opened: announce the device and subscribe for
    /// commands
    pub async fn on_connect(&self) {
        info!("Connected as {}", self.identity);
        self.connected.send_replace(true);
        self.publish_raw("connected", Bytes::new()).await;
        self.publish_capabilities().await;
        let boot_time = methods::invoke(MethodName::BootTime, Vec::new(), Map::new()).await;
        self.publish_envelope("boot_time", &boot_time).await;
        let filter = protocol::command_filter(&self.identity);
        if let Err(e) = self.client.subscribe_no_local(filter).await {
            error!("Subscribing for commands failed: {e:#}");
        }
    }

    /// Broker session dropped: clear the flag, nothing else
    pub fn on_disconnect(&self) {
        info!("Disconnected");
        self.connected.send_replace(false);
    }

    /// Inbound command: ack it, invoke the method, publish the outcome
    ///
    /// Every well-formed command gets exactly two publications on its
    /// reply topic, an ack and then a terminal envelope.
    pub async fn on_message(&self, topic: &str, payload: &[u8]) {
        let Some(name) = protocol::method_from_topic(topic) else {
            warn!("Command topic {topic} has no method segment");
            return;
        };
        info!("Received method {name}");
        let reply = protocol::publish_topic(&self.identity, name);
        self.publish_to(&reply, &Envelope::received()).await;
        let terminal = match MethodName::parse(name) {
            Some(method) => {
                let (args, kwargs) = protocol::parse_payload(payload);
                methods::invoke(method, args, kwargs).await
            }
            None => {
                debug!("Unknown method {name}");
                Envelope::error("Unknown method", Vec::new())
            }
        };
        debug!("Reply on {reply}: {terminal:?}");
        self.publish_to(&reply, &terminal).await;
    }

    /// One telemetry tick
    ///
    /// Publishes the capability set, runs every configured check, and
    /// republishes capabilities plus the error-state snapshot after each
    /// one. Subscribers therefore see both at least once per completed
    /// check, even when a later check wedges.
    async fn run_checks(&self, errors: &mut ErrorState, playback: &mut StallDetector) {
        self.publish_capabilities().await;
        for check in &self.periodic {
            match check {
                PeriodicCheck::Playback => {
                    let reading = sensors::playback_position().await;
                    errors.insert(checks::PLAYBACK, playback.observe(reading));
                }
                PeriodicCheck::Display => {
                    errors.insert(checks::DISPLAY, presence(sensors::display().await));
                }
                PeriodicCheck::PlayerProcess => {
                    errors.insert(checks::PLAYER, presence(sensors::player_process().await));
                }
                PeriodicCheck::Producer(method) => {
                    let envelope = methods::invoke(*method, Vec::new(), Map::new()).await;
                    self.publish_envelope(method.as_str(), &envelope).await;
                }
            }
            self.publish_capabilities().await;
            self.publish_errors(errors).await;
        }
    }

    async fn publish_capabilities(&self) {
        self.publish_raw("capabilities", Bytes::from(self.capabilities.clone()))
            .await;
    }

    async fn publish_errors(&self, errors: &ErrorState) {
        match serde_json::to_value(errors) {
            Ok(snapshot) => {
                self.publish_envelope("errors", &Envelope::complete(snapshot))
                    .await
            }
            Err(e) => warn!("Encoding error state failed: {e}"),
        }
    }

    async fn publish_envelope(&self, name: &str, envelope: &Envelope) {
        let topic = protocol::publish_topic(&self.identity, name);
        self.publish_to(&topic, envelope).await;
    }

    async fn publish_to(&self, topic: &str, envelope: &Envelope) {
        match envelope.to_bytes() {
            Ok(payload) => {
                if let Err(e) = self.client.publish(topic.to_string(), payload).await {
                    warn!("Publishing on {topic} failed: {e:#}");
                }
            }
            Err(e) => warn!("Encoding reply for {topic} failed: {e}"),
        }
    }

    async fn publish_raw(&self, name: &str, payload: Bytes) {
        let topic = protocol::publish_topic(&self.identity, name);
        if let Err(e) = self.client.publish(topic, payload).await {
            warn!("Publishing {name} failed: {e:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockClient {
        published: Mutex<Vec<(String, Bytes)>>,
        subscribed: Mutex<Vec<String>>,
    }

    impl MockClient {
        fn topics(&self) -> Vec<String> {
            self.published
                .lock()
                .unwrap()
                .iter()
                .map(|(topic, _)| topic.clone())
                .collect()
        }

        fn payloads_on(&self, topic: &str) -> Vec<String> {
            self.published
                .lock()
                .unwrap()
                .iter()
                .filter(|(t, _)| t == topic)
                .map(|(_, payload)| String::from_utf8_lossy(payload).into_owned())
                .collect()
        }

        fn published_count(&self) -> usize {
            self.published.lock().unwrap().len()
        }

        fn subscriptions(&self) -> Vec<String> {
            self.subscribed.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl PubSubClient for MockClient {
        async fn publish(&self, topic: String, payload: Bytes) -> Result<()> {
            self.published.lock().unwrap().push((topic, payload));
            Ok(())
        }

        async fn subscribe_no_local(&self, filter: String) -> Result<()> {
            self.subscribed.lock().unwrap().push(filter);
            Ok(())
        }
    }

    fn config(entries: &[(&str, &str)]) -> Config {
        entries
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    fn probe_with(entries: &[(&str, &str)]) -> (Arc<Probe>, Arc<MockClient>) {
        let client = Arc::new(MockClient::default());
        let probe = Arc::new(Probe::new(
            "kiosk-7".to_string(),
            client.clone() as Arc<dyn PubSubClient>,
            &config(entries),
        ));
        (probe, client)
    }

    #[tokio::test]
    async fn test_command_acks_then_completes() {
        let (probe, client) =
            probe_with(&[("PROBE_METHODS", ""), ("PROBE_CAPABILITIES", "shutdown")]);
        probe
            .on_message("manager/kiosk-7/ping", br#"{"args":[],"kwargs":{}}"#)
            .await;
        assert_eq!(
            client.payloads_on("probe/kiosk-7/ping"),
            [
                r#"{"data":{"status":"received"}}"#,
                r#"{"data":{"status":"complete","result":null}}"#,
            ]
        );
        assert_eq!(client.published_count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_command_acks_then_errors() {
        let (probe, client) =
            probe_with(&[("PROBE_METHODS", ""), ("PROBE_CAPABILITIES", "shutdown")]);
        probe.on_message("manager/kiosk-7/frobnicate", b"").await;
        assert_eq!(
            client.payloads_on("probe/kiosk-7/frobnicate"),
            [
                r#"{"data":{"status":"received"}}"#,
                r#"{"error":{"message":"Unknown method"}}"#,
            ]
        );
        assert_eq!(client.published_count(), 2);
    }

    #[tokio::test]
    async fn test_malformed_payload_still_dispatches() {
        let (probe, client) =
            probe_with(&[("PROBE_METHODS", ""), ("PROBE_CAPABILITIES", "shutdown")]);
        probe.on_message("manager/kiosk-7/ping", b"{broken").await;
        assert_eq!(
            client.payloads_on("probe/kiosk-7/ping"),
            [
                r#"{"data":{"status":"received"}}"#,
                r#"{"data":{"status":"complete","result":null}}"#,
            ]
        );
    }

    #[tokio::test]
    async fn test_short_topic_ignored() {
        let (probe, client) =
            probe_with(&[("PROBE_METHODS", ""), ("PROBE_CAPABILITIES", "shutdown")]);
        probe.on_message("manager/kiosk-7", b"").await;
        assert_eq!(client.published_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_announces_and_subscribes() {
        let (probe, client) = probe_with(&[
            ("PROBE_METHODS", "boot_time"),
            ("PROBE_CAPABILITIES", "shutdown,reboot"),
        ]);
        probe.on_connect().await;
        assert!(probe.is_connected());
        assert_eq!(
            client.topics(),
            [
                "probe/kiosk-7/connected",
                "probe/kiosk-7/capabilities",
                "probe/kiosk-7/boot_time",
            ]
        );
        assert_eq!(client.payloads_on("probe/kiosk-7/connected"), [""]);
        assert_eq!(
            client.payloads_on("probe/kiosk-7/capabilities"),
            ["shutdown,reboot"]
        );
        let boot_time = client.payloads_on("probe/kiosk-7/boot_time");
        assert!(boot_time[0].starts_with(r#"{"data":{"status":"complete","result":"#));
        assert_eq!(client.subscriptions(), ["manager/kiosk-7/#"]);
    }

    #[tokio::test]
    async fn test_disconnect_clears_flag_without_publishing() {
        let (probe, client) = probe_with(&[
            ("PROBE_METHODS", "boot_time"),
            ("PROBE_CAPABILITIES", "shutdown"),
        ]);
        probe.on_connect().await;
        let count = client.published_count();
        probe.on_disconnect();
        assert!(!probe.is_connected());
        assert_eq!(client.published_count(), count);
    }

    #[test]
    fn test_unknown_periodic_methods_skipped() {
        let client = Arc::new(MockClient::default());
        let probe = Probe::new(
            "kiosk-7".to_string(),
            client as Arc<dyn PubSubClient>,
            &config(&[
                ("PROBE_METHODS", "ping,frobnicate,boot_time"),
                ("PROBE_CAPABILITIES", "shutdown"),
            ]),
        );
        assert_eq!(
            probe.periodic,
            [
                PeriodicCheck::Producer(MethodName::Ping),
                PeriodicCheck::Producer(MethodName::BootTime),
            ]
        );
    }

    #[test]
    fn test_missing_capabilities_fall_back_to_default() {
        let client = Arc::new(MockClient::default());
        let probe = Probe::new(
            "kiosk-7".to_string(),
            client as Arc<dyn PubSubClient>,
            &config(&[("PROBE_METHODS", "")]),
        );
        assert_eq!(probe.capabilities, DEFAULT_CAPABILITIES);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnected_ticks_publish_nothing() {
        let (probe, client) = probe_with(&[
            ("PROBE_METHODS", "boot_time"),
            ("PROBE_CAPABILITIES", "shutdown"),
        ]);
        let handle = probe.start();
        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(client.published_count(), 0);
        probe.stop();
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_publishes_capabilities_producers_and_errors() {
        let (probe, client) = probe_with(&[("PROBE_METHODS", "boot_time,ping")]);
        probe.connected.send_replace(true);
        let handle = probe.start();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(
            client.topics(),
            [
                "probe/kiosk-7/capabilities",
                "probe/kiosk-7/boot_time",
                "probe/kiosk-7/capabilities",
                "probe/kiosk-7/errors",
                "probe/kiosk-7/ping",
                "probe/kiosk-7/capabilities",
                "probe/kiosk-7/errors",
            ]
        );
        assert_eq!(
            client.payloads_on("probe/kiosk-7/capabilities"),
            [DEFAULT_CAPABILITIES; 3]
        );
        assert_eq!(
            client.payloads_on("probe/kiosk-7/ping"),
            [r#"{"data":{"status":"complete","result":null}}"#]
        );
        assert_eq!(
            client.payloads_on("probe/kiosk-7/errors"),
            [
                r#"{"data":{"status":"complete","result":{}}}"#,
                r#"{"data":{"status":"complete","result":{}}}"#,
            ]
        );
        probe.stop();
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_player_flagged_as_playback_stall() {
        let (probe, client) = probe_with(&[
            ("PROBE_METHODS", "playback_position"),
            ("PROBE_CAPABILITIES", "shutdown"),
        ]);
        probe.connected.send_replace(true);
        let handle = probe.start();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(
            client.payloads_on("probe/kiosk-7/errors"),
            [r#"{"data":{"status":"complete","result":{"playback":"error"}}}"#]
        );
        probe.stop();
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_terminates_worker() {
        let (probe, _client) =
            probe_with(&[("PROBE_METHODS", ""), ("PROBE_CAPABILITIES", "shutdown")]);
        let handle = probe.start();
        tokio::time::sleep(Duration::from_millis(1)).await;
        probe.stop();
        handle.join().await;
    }
}
