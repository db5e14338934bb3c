#![forbid(unsafe_code)]

//! Pipeline configuration.
//!
//! `SecurityProperties` is read from TOML; every field has a default so an
//! empty file (or no file at all) yields a working configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{algorithm, Error};

/// Tunables shared by every chain built from one configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityProperties {
    /// Number of chunks a worker pipe may hold, counting the one the
    /// producer is filling and the one the consumer is reading. At least 2.
    pub pipe_capacity: usize,

    /// Largest chunk written into the worker pipe, in bytes.
    pub pipe_chunk_size: usize,

    /// Text nodes longer than this are delivered as several character events.
    pub text_chunk_size: usize,

    /// Bound on recursive security-token reference resolution.
    pub max_reference_depth: usize,

    /// How long a pipe end waits for its peer before giving up.
    /// `None` waits forever.
    pub pipe_timeout_ms: Option<u64>,

    /// Canonicalization used for outbound signatures.
    pub default_c14n: String,

    /// Digest used for outbound signature references.
    pub default_digest: String,

    /// Signature method used for outbound signatures.
    pub default_signature: String,

    /// Block cipher used for outbound encryption.
    pub default_encryption: String,
}

impl Default for SecurityProperties {
    fn default() -> Self {
        Self {
            pipe_capacity: 16,
            pipe_chunk_size: 8192,
            text_chunk_size: 64 * 1024,
            max_reference_depth: 10,
            pipe_timeout_ms: None,
            default_c14n: algorithm::EXC_C14N.to_string(),
            default_digest: algorithm::SHA256.to_string(),
            default_signature: algorithm::HMAC_SHA256.to_string(),
            default_encryption: algorithm::AES128_CBC.to_string(),
        }
    }
}

impl SecurityProperties {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let props: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        props.validate()?;
        Ok(props)
    }

    /// Serialize configuration to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // The writer's and the reader's chunk both count against the capacity.
        if self.pipe_capacity < 2 {
            return Err(ConfigError::Validation("pipe_capacity must be at least 2".into()));
        }
        if self.pipe_chunk_size < 16 {
            return Err(ConfigError::Validation(
                "pipe_chunk_size must hold at least one cipher block".into(),
            ));
        }
        if self.text_chunk_size == 0 {
            return Err(ConfigError::Validation("text_chunk_size must be at least 1".into()));
        }
        if self.max_reference_depth == 0 {
            return Err(ConfigError::Validation(
                "max_reference_depth must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn pipe_timeout(&self) -> Option<Duration> {
        self.pipe_timeout_ms.map(Duration::from_millis)
    }

    /// Upper bound on bytes buffered inside one worker pipe.
    pub fn pipe_bound(&self) -> usize {
        self.pipe_capacity * self.pipe_chunk_size
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}
