//! Configuration for the JAUS protocol core.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $JAUS_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/jaus/config.toml
//!   3. ~/.config/jaus/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::wire::{Version, HEADER_SIZE, MAX_PRIORITY};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JausConfig {
    pub protocol: ProtocolConfig,
    pub fragmentation: FragmentationConfig,
    pub delivery: DeliveryConfig,
    pub reassembly: ReassemblyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Header version byte written on outgoing messages.
    pub version: u8,
    /// Priority for messages that do not ask for another one.
    pub default_priority: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FragmentationConfig {
    /// Largest packet the transport carries, header included.
    pub max_packet_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Total transmissions (first send plus retries) before a receipt times out.
    pub max_sends: u32,
    /// How long to wait for a response after each transmission.
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReassemblyConfig {
    /// Quiet period after the last fragment before missing fragments are requested.
    pub stall_delay_ms: u64,
    /// Age after which an incomplete set is dropped.
    pub assembly_timeout_secs: u64,
    /// Consecutive retransmit requests without progress before a set stops being reported.
    pub max_retransmit_requests: u8,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            version: Version::CURRENT.into(),
            default_priority: crate::wire::DEFAULT_PRIORITY,
        }
    }
}

impl Default for FragmentationConfig {
    fn default() -> Self {
        Self {
            max_packet_size: 4096,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_sends: 3,
            timeout_ms: 100,
        }
    }
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            stall_delay_ms: 500,
            assembly_timeout_secs: 30,
            max_retransmit_requests: 3,
        }
    }
}

// ── Accessors ─────────────────────────────────────────────────────────────────

impl ProtocolConfig {
    pub fn version(&self) -> Result<Version, ConfigError> {
        Version::try_from(self.version)
            .map_err(|e| ConfigError::Invalid(format!("protocol.version: {e}")))
    }
}

impl FragmentationConfig {
    /// Body bytes each fragment can carry.
    pub fn max_payload(&self) -> usize {
        self.max_packet_size.saturating_sub(HEADER_SIZE)
    }
}

impl DeliveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl ReassemblyConfig {
    pub fn stall_delay(&self) -> Duration {
        Duration::from_millis(self.stall_delay_ms)
    }

    pub fn assembly_timeout(&self) -> Duration {
        Duration::from_secs(self.assembly_timeout_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("jaus")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl JausConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            JausConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("JAUS_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&JausConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Reject settings the codec cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.protocol.version()?;
        if self.protocol.default_priority > MAX_PRIORITY {
            return Err(ConfigError::Invalid(format!(
                "protocol.default_priority {} exceeds {MAX_PRIORITY}",
                self.protocol.default_priority
            )));
        }
        if self.fragmentation.max_payload() == 0 {
            return Err(ConfigError::Invalid(format!(
                "fragmentation.max_packet_size must exceed the {HEADER_SIZE} byte header"
            )));
        }
        if self.delivery.max_sends == 0 {
            return Err(ConfigError::Invalid(
                "delivery.max_sends must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply JAUS_* env var overrides.
    fn apply_env_overrides(&mut self) {
        fn parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
            std::env::var(name).ok().and_then(|v| v.parse().ok())
        }

        if let Some(v) = parsed("JAUS_PROTOCOL__VERSION") {
            self.protocol.version = v;
        }
        if let Some(v) = parsed("JAUS_PROTOCOL__DEFAULT_PRIORITY") {
            self.protocol.default_priority = v;
        }
        if let Some(v) = parsed("JAUS_FRAGMENTATION__MAX_PACKET_SIZE") {
            self.fragmentation.max_packet_size = v;
        }
        if let Some(v) = parsed("JAUS_DELIVERY__MAX_SENDS") {
            self.delivery.max_sends = v;
        }
        if let Some(v) = parsed("JAUS_DELIVERY__TIMEOUT_MS") {
            self.delivery.timeout_ms = v;
        }
        if let Some(v) = parsed("JAUS_REASSEMBLY__STALL_DELAY_MS") {
            self.reassembly.stall_delay_ms = v;
        }
        if let Some(v) = parsed("JAUS_REASSEMBLY__ASSEMBLY_TIMEOUT_SECS") {
            self.reassembly.assembly_timeout_secs = v;
        }
        if let Some(v) = parsed("JAUS_REASSEMBLY__MAX_RETRANSMIT_REQUESTS") {
            self.reassembly.max_retransmit_requests = v;
        }
    }
}
