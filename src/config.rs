//! User configuration
//!
//! The config file is a list of shell-style `KEY=VALUE` tokens. Loading
//! never fails: an unreadable or unparsable file logs an error and
//! yields an empty map, leaving the probe to run on defaults.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::error;

#[derive(Debug, Clone, Default)]
pub struct Config {
    values: BTreeMap<String, String>,
}

impl Config {
    pub fn load(path: &Path) -> Self {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                error!("Loading config {}: {e}", path.display());
                return Self::default();
            }
        };
        let Some(tokens) = shlex::split(&raw) else {
            error!("Loading config {}: unbalanced quoting", path.display());
            return Self::default();
        };
        tokens
            .iter()
            .map(|token| {
                let (key, value) = token.split_once('=').unwrap_or((token.as_str(), ""));
                (key.to_string(), value.to_string())
            })
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

impl FromIterator<(String, String)> for Config {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
