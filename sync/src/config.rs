//! Session configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of operations fetched per request.
pub const DEFAULT_LIMIT: usize = 100;

/// Maximum number of operations fetched per request.
pub const MAX_LIMIT: usize = 1000;

/// How long a poll waits for new operations by default.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Name of the stream in the op store
    pub name: String,
    /// Operations fetched per request
    pub limit: usize,
    /// Longest a poll waits before giving up
    #[serde(with = "millis")]
    pub poll_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            limit: DEFAULT_LIMIT,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

impl Config {
    /// Configuration for the named stream with default limits.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// The fetch limit clamped to `1..=MAX_LIMIT`.
    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, MAX_LIMIT)
    }
}

/// Durations as integer milliseconds on the wire.
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_clamped() {
        assert_eq!(Config::default().effective_limit(), DEFAULT_LIMIT);
        assert_eq!(Config::new("doc").with_limit(0).effective_limit(), 1);
        assert_eq!(Config::new("doc").with_limit(5000).effective_limit(), MAX_LIMIT);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: Config = serde_json::from_str(r#"{"name": "notes"}"#).unwrap();
        assert_eq!(config.name, "notes");
        assert_eq!(config.limit, DEFAULT_LIMIT);
        assert_eq!(config.poll_timeout, DEFAULT_POLL_TIMEOUT);

        let config: Config = serde_json::from_str(r#"{"pollTimeout": 250}"#).unwrap();
        assert_eq!(config.poll_timeout, Duration::from_millis(250));
        assert_eq!(config.name, "default");
    }
}
