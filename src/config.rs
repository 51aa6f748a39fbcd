//! Configuration loading helpers.

use std::env;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::index::{HashAlgorithm, WriterConfig};

const ENV_CONFIG_PATH: &str = "OXITABLE_CONFIG";
const ENV_OVERRIDE_PREFIX: &str = "OXITABLE__";

/// Errors returned by configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error while reading config files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parse error.
    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),
    /// Invalid value for a key.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Raw value string.
        value: String,
    },
    /// Unknown configuration key.
    #[error("unknown config key: {0}")]
    UnknownKey(String),
}

/// Top-level configuration schema.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OxitableConfig {
    /// Index writer configuration.
    pub writer: Option<WriterConfigSpec>,
}

impl OxitableConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Load configuration from the `OXITABLE_CONFIG` env var (if set),
    /// then apply `OXITABLE__section__field` overrides.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let mut config = match env::var(ENV_CONFIG_PATH).ok() {
            Some(path) => Self::load_from_path(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment overrides in-place.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(env::vars())
    }

    /// Apply `OXITABLE__section__field` overrides from `vars`.
    ///
    /// Variables without the prefix are ignored.
    pub fn apply_overrides_from<I, K, V>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let key = key.into();
            let Some(path) = key.strip_prefix(ENV_OVERRIDE_PREFIX) else {
                continue;
            };
            let path = path.to_ascii_lowercase();
            let parts: Vec<&str> = path.split("__").collect();
            let value = value.as_ref().trim();

            match parts.as_slice() {
                ["writer", "offload_threshold"] => {
                    self.writer_mut().offload_threshold = Some(parse_value(&key, value)?);
                }
                ["writer", "hash_algorithm"] => {
                    self.writer_mut().hash_algorithm = Some(value.to_string());
                }
                _ => return Err(ConfigError::UnknownKey(key)),
            }
        }

        Ok(())
    }

    /// Build a `WriterConfig` using defaults plus overrides.
    pub fn to_writer_config(&self) -> Result<WriterConfig, ConfigError> {
        let mut config = WriterConfig::default();
        if let Some(writer) = &self.writer {
            writer.apply_to(&mut config)?;
        }
        Ok(config)
    }

    fn writer_mut(&mut self) -> &mut WriterConfigSpec {
        self.writer.get_or_insert_with(WriterConfigSpec::default)
    }
}

/// Index writer configuration overrides.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriterConfigSpec {
    /// Batch size from which hashing moves to the blocking pool.
    pub offload_threshold: Option<usize>,
    /// Key hash algorithm: "xxh3" or "xxh64".
    pub hash_algorithm: Option<String>,
}

impl WriterConfigSpec {
    fn apply_to(&self, config: &mut WriterConfig) -> Result<(), ConfigError> {
        if let Some(value) = self.offload_threshold {
            config.offload_threshold = value.max(1);
        }
        if let Some(value) = &self.hash_algorithm {
            config.hash_algorithm =
                HashAlgorithm::parse(value).ok_or_else(|| ConfigError::InvalidValue {
                    key: "writer.hash_algorithm".into(),
                    value: value.clone(),
                })?;
        }
        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
