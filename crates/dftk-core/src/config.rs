use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::digest::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "DFTK_CONFIG";
pub const API_KEY_ENV: &str = "DFTK_ABUSEIPDB_KEY";
pub const CHUNK_SIZE_ENV: &str = "DFTK_CHUNK_SIZE";
pub const MAX_DECODE_BYTES_ENV: &str = "DFTK_MAX_DECODE_BYTES";

pub const DEFAULT_MAX_DECODE_BYTES: u64 = 64 * 1024 * 1024; // 64 MiB
pub const DEFAULT_ENDPOINT: &str = "https://api.abuseipdb.com/api/v2/check";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DigestConfig {
    pub chunk_size: usize,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecodeConfig {
    pub max_decode_bytes: u64,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            max_decode_bytes: DEFAULT_MAX_DECODE_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReputationConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub max_age_days: u32,
    pub timeout_secs: u64,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            max_age_days: 90,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InspectorConfig {
    pub digest: DigestConfig,
    pub decode: DecodeConfig,
    pub reputation: ReputationConfig,
}

impl InspectorConfig {
    /// Defaults, then the config file, then environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(explicit, |key| std::env::var(key).ok())
    }

    pub fn load_with<F>(explicit: Option<&Path>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match resolve_config_path(explicit, &env) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(&env)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    pub fn apply_env<F>(&mut self, env: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = non_empty(env(API_KEY_ENV)) {
            self.reputation.api_key = Some(key);
        }
        if let Some(v) = non_empty(env(CHUNK_SIZE_ENV)) {
            self.digest.chunk_size = parse_number(CHUNK_SIZE_ENV, &v)?;
        }
        if let Some(v) = non_empty(env(MAX_DECODE_BYTES_ENV)) {
            self.decode.max_decode_bytes = parse_number(MAX_DECODE_BYTES_ENV, &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let chunk = self.digest.chunk_size;
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&chunk) {
            return Err(ConfigError::Invalid {
                key: "digest.chunk_size",
                reason: format!(
                    "{chunk} is outside {MIN_CHUNK_SIZE}..={MAX_CHUNK_SIZE} bytes"
                ),
            });
        }
        if self.decode.max_decode_bytes == 0 {
            return Err(ConfigError::Invalid {
                key: "decode.max_decode_bytes",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.reputation.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "reputation.endpoint",
                reason: "must not be empty".to_string(),
            });
        }
        // AbuseIPDB accepts 1-365 days.
        if !(1..=365).contains(&self.reputation.max_age_days) {
            return Err(ConfigError::Invalid {
                key: "reputation.max_age_days",
                reason: format!("{} is outside 1..=365", self.reputation.max_age_days),
            });
        }
        if self.reputation.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "reputation.timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// An explicit path wins, then `$DFTK_CONFIG`, then the per-user config file
/// if one exists.
fn resolve_config_path<F>(explicit: Option<&Path>, env: &F) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = non_empty(env(CONFIG_ENV)) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir()
        .map(|dir| dir.join("dftk").join("config.toml"))
        .filter(|path| path.is_file())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_number<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Invalid {
        key,
        reason: format!("{raw:?} is not a number"),
    })
}
