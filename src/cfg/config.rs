// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

/// Client configuration, grouped by concern. Loadable from YAML or built
/// programmatically from [`Config::default`] with struct update syntax.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    /// Where the central server lives and how we identify to it.
    pub server: ServerConfig,
    /// Inbound peer connection acceptance.
    pub listener: ListenerConfig,
    /// Capacity bounds for peer connections and transfers.
    pub limits: Limits,
    /// Every knob that decides when a suspended operation gives up.
    pub timeouts: Timeouts,
    /// Behavior toggles that do not map to wire parameters.
    pub runtime: RuntimeConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    #[serde(rename = "Address")]
    /// `host:port` of the central server.
    pub address: String,

    #[serde(rename = "ClientVersion")]
    /// Major client version reported at login.
    pub client_version: u32,

    #[serde(rename = "MinorVersion")]
    /// Minor client version reported at login.
    pub minor_version: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "vps.slsknet.org:2271".into(),
            client_version: 160,
            minor_version: 1,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct ListenerConfig {
    #[serde(rename = "Port")]
    /// TCP port for inbound peer connections. Unset means the client accepts
    /// no inbound connections and relies on outbound establishment only;
    /// zero binds an ephemeral port.
    pub port: Option<u16>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct Limits {
    #[serde(rename = "ConcurrentMessageConnections")]
    /// Cap on simultaneously live peer message connections.
    pub concurrent_message_connections: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            concurrent_message_connections: 500,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct Timeouts {
    #[serde(rename = "Connect", with = "serde_secs")]
    /// TCP dial timeout for any outbound connection.
    pub connect: Duration,

    #[serde(rename = "Message", with = "serde_secs")]
    /// Default deadline for any registered wait.
    pub message: Duration,

    #[serde(rename = "PeerInactivity", with = "serde_secs")]
    /// Watchdog period for peer message connections.
    pub peer_inactivity: Duration,

    #[serde(rename = "TransferInactivity", with = "serde_secs")]
    /// Watchdog period for transfer connections.
    pub transfer_inactivity: Duration,

    #[serde(rename = "SearchInactivity", with = "serde_secs")]
    /// A search ends after this long without an accepted response.
    pub search_inactivity: Duration,

    #[serde(rename = "Handshake", with = "serde_secs")]
    /// How long an accepted inbound socket may take to send its init frame.
    pub handshake: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            message: Duration::from_secs(15),
            peer_inactivity: Duration::from_secs(30),
            transfer_inactivity: Duration::from_secs(30),
            search_inactivity: Duration::from_secs(15),
            handshake: Duration::from_secs(5),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct RuntimeConfig {
    #[serde(rename = "EnableDistributedNetwork")]
    /// Whether to announce distributed-overlay participation after login.
    pub enable_distributed_network: bool,

    #[serde(rename = "AutoAcknowledgePrivateMessages")]
    /// Whether inbound private messages are acked to the server immediately.
    pub auto_acknowledge_private_messages: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            enable_distributed_network: true,
            auto_acknowledge_private_messages: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            listener: ListenerConfig::default(),
            limits: Limits::default(),
            timeouts: Timeouts::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates invariants on a constructed configuration.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.server.address.is_empty(),
            "server Address must not be empty"
        );
        ensure!(
            self.limits.concurrent_message_connections >= 1,
            "ConcurrentMessageConnections must be >= 1"
        );
        ensure!(
            self.timeouts.connect > Duration::ZERO,
            "Connect timeout must be positive"
        );
        ensure!(
            self.timeouts.message > Duration::ZERO,
            "Message timeout must be positive"
        );
        Ok(())
    }
}

/// Serde helpers for representing `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().expect("defaults must be valid");
    }

    #[test]
    fn yaml_round_trip() -> Result<()> {
        let cfg = Config {
            listener: ListenerConfig { port: Some(2234) },
            ..Config::default()
        };
        let yaml = serde_yaml::to_string(&cfg)?;
        let parsed: Config = serde_yaml::from_str(&yaml)?;
        assert_eq!(parsed.listener.port, Some(2234));
        assert_eq!(parsed.server.address, cfg.server.address);
        Ok(())
    }

    #[test]
    fn zero_connection_limit_is_rejected() {
        let cfg = Config {
            limits: Limits {
                concurrent_message_connections: 0,
            },
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }
}
