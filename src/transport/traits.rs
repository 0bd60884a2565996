//! Publish/subscribe seam between the probe engine and the broker client

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Broker surface the probe engine drives
///
/// One implementation wraps the MQTT client; tests substitute a recorder.
#[async_trait]
pub trait PubSubClient: Send + Sync {
    /// Fire-and-forget publish
    async fn publish(&self, topic: String, payload: Bytes) -> Result<()>;

    /// Subscribe with the no-local option so the agent never receives its
    /// own publications
    async fn subscribe_no_local(&self, filter: String) -> Result<()>;
}
