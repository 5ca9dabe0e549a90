//! Configuration types for the RGAP listener and agent.
//!
//! The listener reads a YAML file with strict (unknown-field-rejecting)
//! decoding. The agent has no config file — its fields are assembled by the
//! CLI layer from flags and environment variables, but the resulting shape
//! lives here so both `rgapd` and tests can share it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::Psk;

/// Top-level listener configuration, as decoded from `rgap.yaml`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerConfig {
    /// UDP bind specs, each `host:port` or `host:port@iface-spec`.
    pub listen: Vec<String>,
    pub groups: Vec<GroupConfig>,
    #[serde(default)]
    pub outputs: Vec<OutputConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GroupConfig {
    pub id: u64,
    #[serde(with = "psk_hex")]
    pub psk: Psk,
    #[serde(with = "humantime_serde")]
    pub expire: Duration,
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,
    #[serde(with = "humantime_serde")]
    pub readiness_delay: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    pub kind: OutputKind,
    #[serde(default)]
    pub spec: serde_yaml::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Noop,
    Log,
    Eventlog,
    Hostsfile,
    Dns,
    Command,
}

/// Agent configuration, assembled by the CLI from flags/env vars.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub group: u64,
    pub address: std::net::IpAddr,
    pub psk: Psk,
    /// `<= 0` means one-shot.
    pub interval: Duration,
    pub one_shot: bool,
    pub destinations: Vec<String>,
}

impl GroupConfig {
    /// The effective clock-skew tolerance, coerced into `(0, expire]` per
    /// the original implementation's clamp.
    pub fn effective_clock_skew(&self) -> Duration {
        if self.clock_skew.is_zero() || self.clock_skew > self.expire {
            self.expire
        } else {
            self.clock_skew
        }
    }
}

mod psk_hex {
    use super::Psk;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(psk: &Psk, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&psk.to_hex())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Psk, D::Error> {
        let s = String::deserialize(d)?;
        Psk::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, serde_yaml::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(serde_yaml::Error),
}

impl ListenerConfig {
    /// Load and strictly decode a YAML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: ListenerConfig =
            serde_yaml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        Ok(config)
    }

    /// Default config file path used by the `listener` subcommand when `-c` is omitted.
    pub fn default_path() -> PathBuf {
        PathBuf::from("rgap.yaml")
    }
}
