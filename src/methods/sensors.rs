//! Telemetry producers
//!
//! Readings come from sysinfo where it has the data, from /sys where it
//! does not, and from host helper programs for player and display state.

use std::fs;
use std::path::Path;

use serde_json::{json, Map, Value};
use sysinfo::{Components, System};
use tokio::process::Command;

use super::{capture, PLAYER_CONTROL};

/// Seconds since the epoch at which the host last booted
pub fn boot_time() -> u64 {
    System::boot_time()
}

/// Seconds the host has been up
pub fn uptime() -> u64 {
    System::uptime()
}

/// One entry per thermal component
pub fn temperatures() -> Value {
    let components = Components::new_with_refreshed_list();
    let readings: Vec<Value> = components
        .iter()
        .map(|component| {
            json!({
                "label": component.label(),
                "temperature": component.temperature(),
                "max": component.max(),
                "critical": component.critical(),
            })
        })
        .collect();
    Value::Array(readings)
}

/// Fan speeds grouped by hwmon chip name, from /sys/class/hwmon
///
/// Hosts without fan sensors yield an empty object.
pub fn fans() -> Value {
    let mut chips = Map::new();
    let Ok(entries) = fs::read_dir("/sys/class/hwmon") else {
        return Value::Object(chips);
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = fs::read_to_string(path.join("name"))
            .map(|raw| raw.trim().to_string())
            .unwrap_or_else(|_| entry.file_name().to_string_lossy().into_owned());
        let speeds = fan_speeds(&path);
        if !speeds.is_empty() {
            chips.insert(name, json!(speeds));
        }
    }
    Value::Object(chips)
}

fn fan_speeds(chip: &Path) -> Vec<u64> {
    let Ok(files) = fs::read_dir(chip) else {
        return Vec::new();
    };
    let mut inputs: Vec<_> = files
        .flatten()
        .filter(|file| {
            let name = file.file_name();
            let name = name.to_string_lossy();
            name.starts_with("fan") && name.ends_with("_input")
        })
        .map(|file| file.path())
        .collect();
    inputs.sort();
    inputs
        .iter()
        .filter_map(|input| fs::read_to_string(input).ok())
        .filter_map(|raw| raw.trim().parse().ok())
        .collect()
}

/// Current playback position in seconds, absent when the player IPC
/// helper is unavailable
pub async fn playback_position() -> Option<i64> {
    let stdout = capture(PLAYER_CONTROL, &["file_pos_sec"]).await?;
    Some(parse_position(&stdout))
}

fn parse_position(stdout: &str) -> i64 {
    stdout.trim().parse().unwrap_or(0)
}

/// Active display mode as "{resolution}, {rate} Hz", absent when no
/// mode is active
pub async fn display() -> Option<String> {
    let output = Command::new("xrandr")
        .env("DISPLAY", ":0")
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_display_mode(&String::from_utf8_lossy(&output.stdout))
}

fn parse_display_mode(listing: &str) -> Option<String> {
    let line = listing.lines().find(|line| line.contains('*'))?;
    let mut fields = line.split_whitespace();
    let resolution = fields.next()?;
    let rate: String = fields
        .next()?
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    Some(format!("{resolution}, {rate} Hz"))
}

/// True while the player binary is running, absent otherwise
pub async fn player_process() -> Option<bool> {
    let status = Command::new("pgrep")
        .args(["-x", "kiosk-player"])
        .status()
        .await
        .ok()?;
    status.success().then_some(true)
}
