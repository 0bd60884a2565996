//! Per-check error-state tracking

use std::collections::BTreeMap;

use serde::Serialize;

/// Error-state keys
pub const PLAYBACK: &str = "playback";
pub const DISPLAY: &str = "display";
pub const PLAYER: &str = "player";

/// Outcome of one health check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Error,
}

/// Full error-state map, republished after every periodic iteration
pub type ErrorState = BTreeMap<&'static str, CheckStatus>;

/// Flags a frozen subsystem when consecutive readings are identical
///
/// Two absent readings in a row count as a stall too: a player that
/// stopped answering reads the same as one stuck on a frame.
#[derive(Debug, Default)]
pub struct StallDetector {
    last: Option<i64>,
}

impl StallDetector {
    pub fn observe(&mut self, reading: Option<i64>) -> CheckStatus {
        let status = if reading == self.last {
            CheckStatus::Error
        } else {
            CheckStatus::Ok
        };
        self.last = reading;
        status
    }
}

/// Presence check: a value means healthy, absence means failed
pub fn presence<T>(value: Option<T>) -> CheckStatus {
    if value.is_some() {
        CheckStatus::Ok
    } else {
        CheckStatus::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stall_detector_transitions() {
        let mut detector = StallDetector::default();
        assert_eq!(detector.observe(None), CheckStatus::Error);
        assert_eq!(detector.observe(Some(5)), CheckStatus::Ok);
        assert_eq!(detector.observe(Some(5)), CheckStatus::Error);
        assert_eq!(detector.observe(Some(7)), CheckStatus::Ok);
        assert_eq!(detector.observe(None), CheckStatus::Ok);
        assert_eq!(detector.observe(None), CheckStatus::Error);
    }

    #[test]
    fn test_presence() {
        assert_eq!(presence(Some("1920x1080")), CheckStatus::Ok);
        assert_eq!(presence::<bool>(None), CheckStatus::Error);
    }

    #[test]
    fn test_snapshot_serialization() {
        let mut errors = ErrorState::new();
        errors.insert(PLAYBACK, CheckStatus::Ok);
        errors.insert(DISPLAY, CheckStatus::Error);
        let json = serde_json::to_string(&errors).expect("encode failed");
        assert_eq!(json, r#"{"display":"error","playback":"ok"}"#);
    }
}
