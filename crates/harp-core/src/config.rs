use serde::{Deserialize, Serialize};

use crate::limits;

/// Top-level toolchain configuration (loaded from harp.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarpConfig {
    pub crypto: CryptoConfig,
    pub identity: IdentityConfig,
    pub limits: LimitsConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Restrict the primitive catalog to the FIPS whitelist (default: false)
    pub fips: bool,
}

/// Defaults applied by `identity new`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// "modern" or "nist" (FIPS mode forces "nist")
    pub default_version: String,
    /// PBKDF2 iterations for passphrase-wrapped private keys
    pub pbes2_iterations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest serialized bundle / container ciphertext in bytes
    pub max_container_size: u64,
    /// Most recipient blocks accepted on unseal
    pub max_recipients: usize,
    /// Largest single secret value in bytes
    pub max_value_size: u64,
    /// Reader timeout, measured from the first byte
    pub read_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            default_version: "modern".into(),
            pbes2_iterations: 600_000,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_container_size: limits::MAX_CONTAINER_SIZE,
            max_recipients: limits::MAX_RECIPIENTS,
            max_value_size: limits::MAX_VALUE_SIZE,
            read_timeout_secs: limits::READ_TIMEOUT.as_secs(),
        }
    }
}

impl LimitsConfig {
    /// Effective caps, clamped to the hard limits.
    pub fn effective(&self) -> limits::Limits {
        limits::Limits::tightened(
            self.max_container_size,
            self.max_recipients,
            self.max_value_size,
        )
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl HarpConfig {
    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> crate::HarpResult<Self> {
        toml::from_str(content).map_err(|e| crate::HarpError::Config(format!("parsing config: {e}")))
    }
}
