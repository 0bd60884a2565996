//! Broker transport
//!
//! This module handles:
//! - The publish/subscribe trait the probe engine drives
//! - MQTT v5 client construction with mutual TLS
//! - The event pump translating broker events into probe callbacks

pub mod mqtt;
pub mod traits;

pub use mqtt::{MqttPubSub, TlsMaterial};
pub use traits::PubSubClient;
