use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection attempts made by `wait_for_connection` before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Pause between two connection attempts, in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_500;
/// Upper bound on a single remote `sign_event` round trip, in milliseconds.
pub const DEFAULT_SIGN_TIMEOUT_MS: u64 = 20_000;

/// Relays used when a connection URI does not name any.
pub const DEFAULT_RELAYS: &[&str] = &[
    "wss://relay.nsec.app",
    "wss://relay.damus.io",
    "wss://nos.lol",
];

pub fn default_relays() -> Vec<String> {
    DEFAULT_RELAYS.iter().map(|r| r.to_string()).collect()
}

/// How this application introduces itself to the remote signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppMetadata {
    pub name: String,
    pub url: String,
    pub image: String,
}

impl AppMetadata {
    pub fn new(name: impl Into<String>, url: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            image: image.into(),
        }
    }
}

/// Configuration for a NIP-46 remote signer session (Nostr Connect).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectConfig {
    /// App name, url and image advertised in the `nostrconnect://` URI
    pub app: AppMetadata,
    /// Relays to use for the NIP-46 RPC traffic
    pub relays: Vec<String>,
    pub max_attempts: u32,
    pub retry_delay: u64,  // milliseconds
    pub sign_timeout: u64, // milliseconds
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            app: AppMetadata::default(),
            relays: default_relays(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY_MS,
            sign_timeout: DEFAULT_SIGN_TIMEOUT_MS,
        }
    }
}

impl ConnectConfig {
    pub fn new(app: AppMetadata) -> Self {
        Self {
            app,
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_relays(mut self, relays: Vec<String>) -> Self {
        self.relays = relays;
        self
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay)
    }

    pub fn sign_timeout(&self) -> Duration {
        Duration::from_millis(self.sign_timeout)
    }

    /// Configured relays, or the default set when none are configured.
    pub fn relays_or_default(&self) -> Vec<String> {
        if self.relays.is_empty() {
            default_relays()
        } else {
            self.relays.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ConnectConfig::default();
        assert_eq!(cfg.max_attempts, 5);
        assert_eq!(cfg.retry_delay(), Duration::from_millis(1_500));
        assert_eq!(cfg.sign_timeout(), Duration::from_secs(20));
        assert!(!cfg.relays.is_empty());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg = ConnectConfig::from_json(
            r#"{"app":{"name":"Tasks"},"relays":[],"retry_delay":250}"#,
        )
        .unwrap();
        assert_eq!(cfg.app.name, "Tasks");
        assert_eq!(cfg.app.url, "");
        assert_eq!(cfg.retry_delay, 250);
        assert_eq!(cfg.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(cfg.relays_or_default(), default_relays());
    }
}
