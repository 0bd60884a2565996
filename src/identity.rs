//! Host identity resolution

use anyhow::{ensure, Result};

/// Hostname namespacing every topic this agent touches
///
/// Re-resolved on every monitoring iteration; a change invalidates the
/// running session.
pub fn resolve() -> Result<String> {
    let name = gethostname::gethostname().to_string_lossy().into_owned();
    ensure!(!name.is_empty(), "empty hostname");
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_returns_non_empty() {
        let name = resolve().expect("resolve failed");
        assert!(!name.is_empty());
    }
}
