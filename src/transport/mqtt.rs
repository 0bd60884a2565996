//! MQTT v5 client construction and the broker event pump

use std::fs;
use std::path::Path;
use std::str;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Filter, Packet};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, Event, EventLoop, MqttOptions};
use rumqttc::{Outgoing, TlsConfiguration, Transport};
use tracing::{debug, warn};

use super::traits::PubSubClient;
use crate::probe::Probe;

/// Broker keep-alive interval
const KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Request-channel depth; publishes issued from callback context must
/// never starve the event loop
const CLIENT_CAPACITY: usize = 128;

/// PEM material for mutual TLS
#[derive(Clone)]
pub struct TlsMaterial {
    ca: Vec<u8>,
    cert: Vec<u8>,
    key: Vec<u8>,
}

impl TlsMaterial {
    /// Read the CA certificate and the client certificate/key pair
    pub fn load(ca: &Path, cert: &Path, key: &Path) -> Result<Self> {
        Ok(Self {
            ca: fs::read(ca).with_context(|| format!("reading CA certificate {}", ca.display()))?,
            cert: fs::read(cert)
                .with_context(|| format!("reading client certificate {}", cert.display()))?,
            key: fs::read(key).with_context(|| format!("reading client key {}", key.display()))?,
        })
    }

    fn into_transport(self) -> Transport {
        Transport::Tls(TlsConfiguration::Simple {
            ca: self.ca,
            alpn: None,
            client_auth: Some((self.cert, self.key)),
        })
    }
}

/// Build the broker client for one session
pub fn client(identity: &str, host: &str, port: u16, tls: TlsMaterial) -> (AsyncClient, EventLoop) {
    let mut options = MqttOptions::new(identity, host, port);
    options.set_keep_alive(KEEP_ALIVE);
    options.set_transport(tls.into_transport());
    AsyncClient::new(options, CLIENT_CAPACITY)
}

/// Probe-facing wrapper around the MQTT client
pub struct MqttPubSub {
    client: AsyncClient,
}

impl MqttPubSub {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PubSubClient for MqttPubSub {
    async fn publish(&self, topic: String, payload: Bytes) -> Result<()> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await?;
        Ok(())
    }

    async fn subscribe_no_local(&self, filter: String) -> Result<()> {
        let mut filter = Filter::new(filter, QoS::AtMostOnce);
        filter.nolocal = true;
        self.client.subscribe_many([filter]).await?;
        Ok(())
    }
}

/// Translate broker events into probe callbacks
///
/// Runs until the session ends: returns `Ok` on an orderly disconnect
/// and `Err` on a connection failure. Reconnecting is the supervisor's
/// job, not the event loop's.
pub async fn run_event_pump(mut eventloop: EventLoop, probe: Arc<Probe>) -> Result<()> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    probe.on_connect().await;
                } else {
                    warn!("Broker refused the session: {:?}", ack.code);
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                match str::from_utf8(&publish.topic) {
                    Ok(topic) => probe.on_message(topic, &publish.payload).await,
                    Err(_) => warn!("Dropping command with non-UTF-8 topic"),
                }
            }
            Ok(Event::Incoming(Packet::Disconnect(_))) => {
                probe.on_disconnect();
                return Ok(());
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                probe.on_disconnect();
                return Ok(());
            }
            Ok(event) => debug!("Broker event: {event:?}"),
            Err(e) => {
                probe.on_disconnect();
                return Err(e.into());
            }
        }
    }
}
