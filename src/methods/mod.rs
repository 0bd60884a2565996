//! Remotely invocable operations
//!
//! This module handles:
//! - The static registry of method names the manager can address
//! - The uniform call wrapper that turns failures into error envelopes
//! - Privileged host actions (shutdown, reboot) and audio control

pub mod sensors;

use probe_protocol::Envelope;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::process::Command;

/// Helper program mediating player IPC (playback position, mute state)
pub(crate) const PLAYER_CONTROL: &str = "player_control";

/// Every operation the agent can execute, by wire name
///
/// `wake` is deliberately absent: it is advertised as a capability but
/// performed by the manager, so inbound `wake` resolves to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodName {
    Ping,
    Shutdown,
    Reboot,
    BootTime,
    Uptime,
    Temperatures,
    Fans,
    PlaybackPosition,
    Display,
    PlayerProcess,
    IsMuted,
    Mute,
    Unmute,
}

impl MethodName {
    pub const ALL: [MethodName; 13] = [
        MethodName::Ping,
        MethodName::Shutdown,
        MethodName::Reboot,
        MethodName::BootTime,
        MethodName::Uptime,
        MethodName::Temperatures,
        MethodName::Fans,
        MethodName::PlaybackPosition,
        MethodName::Display,
        MethodName::PlayerProcess,
        MethodName::IsMuted,
        MethodName::Mute,
        MethodName::Unmute,
    ];

    /// Resolve a wire name by exact match
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|method| method.as_str() == name)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MethodName::Ping => "ping",
            MethodName::Shutdown => "shutdown",
            MethodName::Reboot => "reboot",
            MethodName::BootTime => "boot_time",
            MethodName::Uptime => "uptime",
            MethodName::Temperatures => "temperatures",
            MethodName::Fans => "fans",
            MethodName::PlaybackPosition => "playback_position",
            MethodName::Display => "display",
            MethodName::PlayerProcess => "player_process",
            MethodName::IsMuted => "is_muted",
            MethodName::Mute => "mute",
            MethodName::Unmute => "unmute",
        }
    }
}

/// Failures inside a method invocation
#[derive(Error, Debug)]
pub enum MethodError {
    #[error("command exited with status {0}")]
    ExitStatus(i32),

    #[error("process error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unreadable helper output: {0}")]
    BadOutput(String),
}

impl MethodError {
    /// Wire name carried in the error envelope's message field
    pub fn kind(&self) -> &'static str {
        match self {
            MethodError::ExitStatus(_) => "Exception",
            MethodError::Io(_) => "IoError",
            MethodError::BadOutput(_) => "ParseError",
        }
    }

    /// Detail values carried in the error envelope's errors field
    pub fn details(&self) -> Vec<Value> {
        match self {
            MethodError::ExitStatus(code) => vec![json!(code)],
            MethodError::Io(e) => vec![json!(e.to_string())],
            MethodError::BadOutput(output) => vec![json!(output)],
        }
    }
}

/// Invoke a method and encode the outcome
///
/// Never fails: a successful call becomes a complete-data envelope, any
/// failure becomes an error envelope. This is the only point translating
/// method errors onto the wire.
pub async fn invoke(method: MethodName, args: Vec<Value>, kwargs: Map<String, Value>) -> Envelope {
    match call(method, args, kwargs).await {
        Ok(result) => Envelope::complete(result),
        Err(e) => Envelope::error(e.kind(), e.details()),
    }
}

/// Dispatch one invocation
///
/// Registered operations take no parameters; surplus args/kwargs are
/// accepted and ignored.
async fn call(
    method: MethodName,
    _args: Vec<Value>,
    _kwargs: Map<String, Value>,
) -> Result<Value, MethodError> {
    match method {
        MethodName::Ping => Ok(Value::Null),
        MethodName::Shutdown => {
            run_checked("shutdown", &["now"]).await?;
            Ok(Value::Null)
        }
        MethodName::Reboot => {
            run_checked("reboot", &["now"]).await?;
            Ok(Value::Null)
        }
        MethodName::BootTime => Ok(json!(sensors::boot_time())),
        MethodName::Uptime => Ok(json!(sensors::uptime())),
        MethodName::Temperatures => Ok(sensors::temperatures()),
        MethodName::Fans => Ok(sensors::fans()),
        MethodName::PlaybackPosition => Ok(json!(sensors::playback_position().await)),
        MethodName::Display => Ok(json!(sensors::display().await)),
        MethodName::PlayerProcess => Ok(json!(sensors::player_process().await)),
        MethodName::IsMuted => is_muted().await,
        MethodName::Mute => {
            run_checked(PLAYER_CONTROL, &["set_mute", "1"]).await?;
            Ok(Value::Null)
        }
        MethodName::Unmute => {
            run_checked(PLAYER_CONTROL, &["set_mute", "0"]).await?;
            Ok(Value::Null)
        }
    }
}

/// Mute state via player IPC: 0/1 when the helper answers, null when it
/// is unavailable
async fn is_muted() -> Result<Value, MethodError> {
    match capture(PLAYER_CONTROL, &["get_mute"]).await {
        Some(stdout) => {
            let trimmed = stdout.trim();
            let muted: i64 = trimmed
                .parse()
                .map_err(|_| MethodError::BadOutput(trimmed.to_string()))?;
            Ok(json!(muted))
        }
        None => Ok(Value::Null),
    }
}

/// Run a command, requiring a zero exit status
async fn run_checked(program: &str, args: &[&str]) -> Result<(), MethodError> {
    let status = Command::new(program).args(args).status().await?;
    if status.success() {
        Ok(())
    } else {
        Err(MethodError::ExitStatus(status.code().unwrap_or(-1)))
    }
}

/// Run a command, yielding stdout only on a zero exit status
pub(crate) async fn capture(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().await.ok()?;
    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        None
    }
}
