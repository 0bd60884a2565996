//! Service manager notification
//!
//! Wraps sd-notify so call sites stay unconditional: without a
//! `NOTIFY_SOCKET` every call is a no-op. Send failures are ignored,
//! these messages are instrumentation rather than control flow.

use sd_notify::NotifyState;

pub struct Notifier {
    enabled: bool,
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            enabled: std::env::var_os("NOTIFY_SOCKET").is_some(),
        }
    }

    pub fn status(&self, message: &str) {
        self.send(&[NotifyState::Status(message)]);
    }

    pub fn ready(&self) {
        self.send(&[NotifyState::Ready]);
    }

    pub fn watchdog(&self) {
        self.send(&[NotifyState::Watchdog]);
    }

    fn send(&self, state: &[NotifyState]) {
        if self.enabled {
            let _ = sd_notify::notify(false, state);
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
