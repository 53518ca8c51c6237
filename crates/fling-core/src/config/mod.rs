//! Relay server configuration.
//!
//! Settings for the bundled signaling relay, loaded from a TOML file and
//! overridable by the binary's flags.
//!
//! ## Keys
//!
//! | Key               | Default   | Meaning                            |
//! |-------------------|-----------|------------------------------------|
//! | `bind`            | `0.0.0.0` | address to listen on               |
//! | `port`            | `8080`    | port to listen on                  |
//! | `room_ttl`        | `300s`    | lifetime of every room key         |
//! | `sweep_interval`  | `30s`     | cadence of lapsed-entry sweeps     |
//! | `permissive_cors` | `true`    | allow browser clients anywhere     |
//!
//! Durations accept bare seconds (`300`), an `s` suffix (`300s`), or an
//! `m` suffix (`5m`).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Settings for the bundled signaling relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address to bind.
    pub bind: IpAddr,
    /// Port to listen on.
    pub port: u16,
    /// Lifetime applied to every room key.
    #[serde(with = "humantime_serde")]
    pub room_ttl: Duration,
    /// Interval between sweeps of lapsed store entries.
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    /// Allow browser clients from any origin.
    pub permissive_cors: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: crate::DEFAULT_RELAY_PORT,
            room_ttl: Duration::from_secs(crate::DEFAULT_ROOM_TTL_SECS),
            sweep_interval: Duration::from_secs(30),
            permissive_cors: true,
        }
    }
}

impl RelayConfig {
    /// Load configuration from `path`.
    ///
    /// A missing file yields the defaults; an unreadable or malformed
    /// file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config: {e}")))?;
        toml::from_str(&content).map_err(|e| Error::Config(format!("failed to parse config: {e}")))
    }

    /// The socket address the relay listens on.
    #[must_use]
    pub const fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        let trimmed = text.trim();
        let (digits, scale) = if let Some(rest) = trimmed.strip_suffix('m') {
            (rest, 60)
        } else {
            (trimmed.strip_suffix('s').unwrap_or(trimmed), 1)
        };
        digits
            .parse::<u64>()
            .map(|value| Duration::from_secs(value * scale))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.bind, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.port, crate::DEFAULT_RELAY_PORT);
        assert_eq!(config.room_ttl, Duration::from_secs(300));
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
        assert!(config.permissive_cors);
    }

    #[test]
    fn test_listen_addr_joins_bind_and_port() {
        let config = RelayConfig {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 9099,
            ..RelayConfig::default()
        };
        assert_eq!(config.listen_addr().to_string(), "127.0.0.1:9099");
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = RelayConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, RelayConfig::default());
    }

    #[test]
    fn test_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");

        let original = RelayConfig {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 9001,
            room_ttl: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(5),
            permissive_cors: false,
        };
        std::fs::write(&path, toml::to_string_pretty(&original).unwrap()).unwrap();

        let loaded = RelayConfig::load(&path).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "port = 4444\n").unwrap();

        let loaded = RelayConfig::load(&path).unwrap();
        assert_eq!(loaded.port, 4444);
        assert_eq!(loaded.room_ttl, RelayConfig::default().room_ttl);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "port = \"many\"\n").unwrap();

        let err = RelayConfig::load(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_duration_suffixes() {
        let loaded: RelayConfig = toml::from_str("room_ttl = \"5m\"\n").unwrap();
        assert_eq!(loaded.room_ttl, Duration::from_secs(300));

        let loaded: RelayConfig = toml::from_str("room_ttl = \"90s\"\n").unwrap();
        assert_eq!(loaded.room_ttl, Duration::from_secs(90));

        let loaded: RelayConfig = toml::from_str("room_ttl = \"45\"\n").unwrap();
        assert_eq!(loaded.room_ttl, Duration::from_secs(45));

        let malformed = toml::from_str::<RelayConfig>("room_ttl = \"soon\"\n");
        assert!(malformed.is_err());
    }
}
