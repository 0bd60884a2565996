//! Probe Agent Protocol
//!
//! This crate provides the response envelope codec and the topic naming
//! scheme shared between the probe agent and its manager.

pub mod codec;

pub use codec::{parse_payload, CodecError, Envelope, ResponseData, ResponseError, ResponseStatus};

/// Topic prefix for everything the agent publishes
pub const OUTBOUND_PREFIX: &str = "probe";

/// Topic prefix the manager publishes commands under
pub const INBOUND_PREFIX: &str = "manager";

/// Outbound topic for one named publication of one agent
pub fn publish_topic(identity: &str, name: &str) -> String {
    format!("{OUTBOUND_PREFIX}/{identity}/{name}")
}

/// Subscription filter covering every command addressed to one agent
pub fn command_filter(identity: &str) -> String {
    format!("{INBOUND_PREFIX}/{identity}/#")
}

/// Method name carried in the third segment of a command topic
pub fn method_from_topic(topic: &str) -> Option<&str> {
    topic.split('/').nth(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_topic() {
        assert_eq!(publish_topic("kiosk-7", "boot_time"), "probe/kiosk-7/boot_time");
    }

    #[test]
    fn test_command_filter() {
        assert_eq!(command_filter("kiosk-7"), "manager/kiosk-7/#");
    }

    #[test]
    fn test_method_from_topic() {
        assert_eq!(method_from_topic("manager/kiosk-7/ping"), Some("ping"));
        assert_eq!(method_from_topic("manager/kiosk-7/nested/rest"), Some("nested"));
        assert_eq!(method_from_topic("manager/kiosk-7"), None);
    }
}
