//! Node configuration.
//!
//! All capability variants (repeater, gateway, signing, OTA) are runtime
//! configuration rather than compile-time features, so one binary can
//! express every node role and tests can enable combinations freely.
//!
//! Loaded from YAML:
//!
//! ```yaml
//! node:
//!   repeater: true
//! signing:
//!   enabled: true
//!   request_signatures: true
//! ota:
//!   enabled: true
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

/// Node role capabilities (`node.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Forward messages on behalf of other nodes (`node.repeater`).
    #[serde(default)]
    pub repeater: bool,
    /// Bridge the mesh to the controller (`node.gateway`). Implies a
    /// fixed address of 0 and repeater behavior.
    #[serde(default)]
    pub gateway: bool,
    /// Automatically (re-)discover the best parent (`node.auto_find_parent`).
    #[serde(default = "NodeConfig::default_auto_find_parent")]
    pub auto_find_parent: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            repeater: false,
            gateway: false,
            auto_find_parent: true,
        }
    }
}

impl NodeConfig {
    fn default_auto_find_parent() -> bool {
        true
    }
}

/// Message signing (`signing.*`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Sign outbound messages to peers that require it (`signing.enabled`).
    #[serde(default)]
    pub enabled: bool,
    /// Require inbound messages addressed to us to be signed
    /// (`signing.request_signatures`).
    #[serde(default)]
    pub request_signatures: bool,
}

/// OTA firmware updates (`ota.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtaConfig {
    /// Accept over-the-air firmware transfers (`ota.enabled`).
    #[serde(default)]
    pub enabled: bool,
    /// Block request retries before the update is abandoned
    /// (`ota.retries`).
    #[serde(default = "OtaConfig::default_retries")]
    pub retries: u8,
    /// Idle time before a block request is re-sent (`ota.retry_delay_ms`).
    #[serde(default = "OtaConfig::default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Bootloader version reported in the firmware config request
    /// (`ota.bootloader_version`).
    #[serde(default)]
    pub bootloader_version: u16,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            retries: 5,
            retry_delay_ms: 500,
            bootloader_version: 0,
        }
    }
}

impl OtaConfig {
    fn default_retries() -> u8 {
        5
    }
    fn default_retry_delay_ms() -> u64 {
        500
    }
}

/// Protocol timing (`timing.*`). All waits are cooperative: the node
/// keeps servicing traffic while a window is open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Window for collecting parent discovery replies
    /// (`timing.parent_search_wait_ms`).
    #[serde(default = "TimingConfig::default_wait_ms")]
    pub parent_search_wait_ms: u64,
    /// Window for the gateway id response (`timing.id_request_wait_ms`).
    #[serde(default = "TimingConfig::default_wait_ms")]
    pub id_request_wait_ms: u64,
    /// Window for configuration replies during presentation
    /// (`timing.config_wait_ms`).
    #[serde(default = "TimingConfig::default_wait_ms")]
    pub config_wait_ms: u64,
    /// Nonce handshake timeout (`timing.verification_timeout_ms`).
    #[serde(default = "TimingConfig::default_verification_timeout_ms")]
    pub verification_timeout_ms: u64,
    /// Consecutive parent-send failures before rediscovery
    /// (`timing.search_failures`).
    #[serde(default = "TimingConfig::default_search_failures")]
    pub search_failures: u8,
    /// Upper bound for the randomized reply jitter
    /// (`timing.reply_jitter_ms`).
    #[serde(default = "TimingConfig::default_reply_jitter_ms")]
    pub reply_jitter_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            parent_search_wait_ms: 2000,
            id_request_wait_ms: 2000,
            config_wait_ms: 2000,
            verification_timeout_ms: 5000,
            search_failures: 5,
            reply_jitter_ms: 1024,
        }
    }
}

impl TimingConfig {
    fn default_wait_ms() -> u64 {
        2000
    }
    fn default_verification_timeout_ms() -> u64 {
        5000
    }
    fn default_search_failures() -> u8 {
        5
    }
    fn default_reply_jitter_ms() -> u64 {
        1024
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Node role (`node.*`).
    #[serde(default)]
    pub node: NodeConfig,

    /// Message signing (`signing.*`).
    #[serde(default)]
    pub signing: SigningConfig,

    /// OTA firmware updates (`ota.*`).
    #[serde(default)]
    pub ota: OtaConfig,

    /// Protocol timing (`timing.*`).
    #[serde(default)]
    pub timing: TimingConfig,
}

impl Config {
    /// Create a configuration with all defaults (plain leaf node).
    pub fn new() -> Self {
        Self::default()
    }

    /// A repeater node configuration.
    pub fn repeater() -> Self {
        let mut config = Self::default();
        config.node.repeater = true;
        config
    }

    /// A gateway node configuration.
    pub fn gateway() -> Self {
        let mut config = Self::default();
        config.node.gateway = true;
        config.node.repeater = true;
        config.node.auto_find_parent = false;
        config
    }

    /// Load configuration from a YAML file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::ParseYaml {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert!(!config.node.repeater);
        assert!(!config.node.gateway);
        assert!(config.node.auto_find_parent);
        assert!(!config.signing.enabled);
        assert_eq!(config.timing.search_failures, 5);
        assert_eq!(config.ota.retries, 5);
    }

    #[test]
    fn test_gateway_preset() {
        let config = Config::gateway();
        assert!(config.node.gateway);
        assert!(config.node.repeater);
        assert!(!config.node.auto_find_parent);
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = "node:\n  repeater: true\nsigning:\n  enabled: true\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.node.repeater);
        assert!(config.signing.enabled);
        // Unspecified sections fall back to defaults
        assert_eq!(config.timing.parent_search_wait_ms, 2000);
        assert!(!config.ota.enabled);
    }
}
