//! Connection supervisor
//!
//! This module handles:
//! - Setup (identity, TLS material) with unbounded retry
//! - Session lifecycle: connect, monitor, tear down, pause, retry
//! - Host identity drift detection forcing a session restart

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::AsyncClient;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::identity;
use crate::notify::Notifier;
use crate::probe::{Probe, ProbeHandle};
use crate::transport::{mqtt, MqttPubSub, TlsMaterial};

/// Connection and pacing parameters for the supervisor
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Broker host
    pub mqtt_hostname: String,
    /// Broker TLS port
    pub mqtt_port: u16,
    /// CA certificate path
    pub ca_certificate: PathBuf,
    /// Client certificate path
    pub certfile: PathBuf,
    /// Client key path
    pub keyfile: PathBuf,
    /// Pause after any failure before the next attempt
    pub reconnect_delay: Duration,
    /// Bound on waiting for the broker session to open
    pub connect_timeout: Duration,
    /// Cadence of identity re-checks and watchdog pings
    pub monitor_interval: Duration,
    /// Bound on event-pump wind-down during teardown
    pub stop_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mqtt_hostname: "localhost".to_string(),
            mqtt_port: 8883,
            ca_certificate: PathBuf::new(),
            certfile: PathBuf::new(),
            keyfile: PathBuf::new(),
            reconnect_delay: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(30),
            monitor_interval: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

/// Why a session ended without a supervision error
enum SessionEnd {
    /// The host identity no longer matches the session's topic namespace
    IdentityChanged { current: String },
    /// The broker connection dropped
    Disconnected,
}

/// Identity and TLS material produced by the setup phase
struct Setup {
    identity: String,
    tls: TlsMaterial,
}

/// Everything owned by one connection attempt
struct Session {
    client: AsyncClient,
    probe: Arc<Probe>,
    probe_handle: ProbeHandle,
    pump: JoinHandle<Result<()>>,
}

pub struct App {
    config: AppConfig,
    user_config: Config,
    notify: Notifier,
    identity: String,
    resolver: fn() -> Result<String>,
}

impl App {
    pub fn new(config: AppConfig, user_config: Config, notify: Notifier) -> Result<Self> {
        let resolver: fn() -> Result<String> = identity::resolve;
        let identity = resolver().context("resolving host identity")?;
        Ok(Self {
            config,
            user_config,
            notify,
            identity,
            resolver,
        })
    }

    /// Drive the connection lifecycle forever
    ///
    /// Setup failures and session failures both retry on a fixed pause;
    /// an identity change re-runs setup under the new name without one.
    pub async fn run(&mut self) {
        loop {
            let setup = self.initialize().await;
            loop {
                match self.run_session(&setup).await {
                    Ok(SessionEnd::IdentityChanged { current }) => {
                        info!("Host identity changed to {current}, restarting");
                        self.identity = current;
                        break;
                    }
                    Ok(SessionEnd::Disconnected) => debug!("Probe is not connected"),
                    Err(e) => {
                        error!("Session failed: {e:#}");
                        self.notify.status("Failed.");
                        self.notify.watchdog();
                    }
                }
                sleep(self.config.reconnect_delay).await;
            }
        }
    }

    /// Produce a working setup, retrying forever
    async fn initialize(&mut self) -> Setup {
        loop {
            match self.try_initialize() {
                Ok(setup) => return setup,
                Err(e) => {
                    error!("Setup failed: {e:#}");
                    sleep(self.config.reconnect_delay).await;
                }
            }
        }
    }

    fn try_initialize(&mut self) -> Result<Setup> {
        let identity = (self.resolver)().context("resolving host identity")?;
        info!("Host identity: {identity}");
        self.identity = identity.clone();
        info!(
            "MQTT TLS material: {} {} {}",
            self.config.ca_certificate.display(),
            self.config.certfile.display(),
            self.config.keyfile.display()
        );
        let tls = TlsMaterial::load(
            &self.config.ca_certificate,
            &self.config.certfile,
            &self.config.keyfile,
        )?;
        Ok(Setup { identity, tls })
    }

    /// One connection attempt: fresh client and probe, supervised until
    /// the session ends, torn down on every exit path
    async fn run_session(&self, setup: &Setup) -> Result<SessionEnd> {
        self.notify.status("Connecting...");
        info!(
            "Connecting MQTT host: {}:{}",
            self.config.mqtt_hostname, self.config.mqtt_port
        );

        let (client, eventloop) = mqtt::client(
            &setup.identity,
            &self.config.mqtt_hostname,
            self.config.mqtt_port,
            setup.tls.clone(),
        );
        let probe = Arc::new(Probe::new(
            setup.identity.clone(),
            Arc::new(MqttPubSub::new(client.clone())),
            &self.user_config,
        ));
        let mut connected = probe.connected_state();
        let mut session = Session {
            probe_handle: probe.start(),
            pump: tokio::spawn(mqtt::run_event_pump(eventloop, probe.clone())),
            client,
            probe,
        };

        // A pump that dies before the session opens must not sit out the
        // whole connect timeout
        let outcome = tokio::select! {
            end = self.supervise(&setup.identity, &mut connected) => end,
            res = &mut session.pump => pump_outcome(res),
        };
        self.stop(session).await;
        outcome
    }

    /// Wait for the session to open, then watch it
    async fn supervise(
        &self,
        identity: &str,
        connected: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd> {
        match timeout(self.config.connect_timeout, connected.wait_for(|up| *up)).await {
            Ok(Ok(_)) => {}
            Ok(Err(_)) => return Err(anyhow!("probe dropped before the session opened")),
            Err(_) => {
                return Err(anyhow!(
                    "no broker session within {:?}",
                    self.config.connect_timeout
                ))
            }
        }
        self.notify.ready();
        self.notify.status("Connected.");

        let mut ticker = interval(self.config.monitor_interval);
        loop {
            tokio::select! {
                _ = connected.wait_for(|up| !*up) => {
                    return Ok(SessionEnd::Disconnected);
                }
                _ = ticker.tick() => {
                    let current = (self.resolver)().context("re-resolving host identity")?;
                    if current != identity {
                        return Ok(SessionEnd::IdentityChanged { current });
                    }
                    info!("Host identity: {current}");
                    self.notify.watchdog();
                }
            }
        }
    }

    /// Teardown in dependency order: broker disconnect, telemetry worker,
    /// event pump. Every phase is bounded by `stop_timeout`; a session
    /// against a wedged socket must never park the supervisor.
    async fn stop(&self, session: Session) {
        let Session {
            client,
            probe,
            probe_handle,
            mut pump,
        } = session;
        if probe.is_connected() {
            match timeout(self.config.stop_timeout, client.disconnect()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Disconnect request failed: {e}"),
                // A stalled disconnect means the request channel is full and
                // the pump has stopped draining it. Killing the pump closes
                // the channel, which fails the queued senders out.
                Err(_) => {
                    debug!("Disconnect request stalled, aborting the event pump");
                    pump.abort();
                }
            }
        }
        probe.stop();
        if timeout(self.config.stop_timeout, probe_handle.join())
            .await
            .is_err()
        {
            debug!("Telemetry worker still busy, detaching it");
        }
        if !pump.is_finished() && timeout(self.config.stop_timeout, &mut pump).await.is_err() {
            pump.abort();
        }
    }
}

fn pump_outcome(res: Result<Result<()>, tokio::task::JoinError>) -> Result<SessionEnd> {
    match res {
        Ok(Ok(())) => Ok(SessionEnd::Disconnected),
        Ok(Err(e)) => Err(e),
        Err(e) => Err(anyhow!("event pump panicked: {e}")),
    }
}
