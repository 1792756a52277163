//! # Pipeline Configuration
//!
//! Loaded once at startup from TOML. Every field has a default, so an empty
//! document is a valid configuration:
//!
//! ```toml
//! frames_in_flight = 2
//! initial_object_capacity = 64
//! initial_instance_capacity = 256
//! auto_instance = true
//! max_meshes = 1024
//!
//! [acquire]
//! policy = "blocking"
//! timeout_ms = 250
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sync::AcquirePolicy;

/// Upper bound on `frames_in_flight`.
pub const MAX_FRAMES_IN_FLIGHT: usize = 8;

/// Errors raised while loading a configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The document is not valid TOML or has the wrong shape.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The values parsed but are out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// How slot acquisition behaves when the next slot is still in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquireMode {
    /// Wait on the slot's fence up to `timeout_ms`.
    Blocking,
    /// Fail immediately.
    NonBlocking,
}

/// `[acquire]` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AcquireConfig {
    /// Blocking or non-blocking acquisition.
    pub policy: AcquireMode,
    /// Longest blocking wait, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self {
            policy: AcquireMode::Blocking,
            timeout_ms: 250,
        }
    }
}

/// Tunables of the transform pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Number of frame slots (K).
    pub frames_in_flight: usize,
    /// Slot acquisition behaviour.
    pub acquire: AcquireConfig,
    /// Legacy object regions reserved per slot at startup.
    pub initial_object_capacity: usize,
    /// Instance model matrices reserved per slot at startup.
    pub initial_instance_capacity: usize,
    /// Promote same-mesh, same-camera objects to instanced draws.
    pub auto_instance: bool,
    /// Maximum number of registered meshes.
    pub max_meshes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            acquire: AcquireConfig::default(),
            initial_object_capacity: 64,
            initial_instance_capacity: 256,
            auto_instance: true,
            max_meshes: 1024,
        }
    }
}

impl PipelineConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed input and
    /// [`ConfigError::Invalid`] on out-of-range values.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`Self::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&source)?;
        tracing::debug!(path = %path.display(), frames_in_flight = config.frames_in_flight, "Loaded pipeline config");
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_FRAMES_IN_FLIGHT).contains(&self.frames_in_flight) {
            return Err(ConfigError::Invalid(format!(
                "frames_in_flight must be in 1..={MAX_FRAMES_IN_FLIGHT}, got {}",
                self.frames_in_flight
            )));
        }
        if self.acquire.policy == AcquireMode::Blocking && self.acquire.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "acquire.timeout_ms must be positive for the blocking policy".into(),
            ));
        }
        if self.max_meshes == 0 {
            return Err(ConfigError::Invalid("max_meshes must be positive".into()));
        }
        Ok(())
    }

    /// The acquisition policy this configuration describes.
    #[must_use]
    pub fn acquire_policy(&self) -> AcquirePolicy {
        match self.acquire.policy {
            AcquireMode::NonBlocking => AcquirePolicy::NonBlocking,
            AcquireMode::Blocking => AcquirePolicy::Blocking {
                timeout: Duration::from_millis(self.acquire.timeout_ms),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(
            config.acquire_policy(),
            AcquirePolicy::Blocking {
                timeout: Duration::from_millis(250)
            }
        );
    }

    #[test]
    fn test_parse_full_document() {
        let config = PipelineConfig::from_toml_str(
            r#"
            frames_in_flight = 3
            initial_object_capacity = 8
            initial_instance_capacity = 32
            auto_instance = false
            max_meshes = 16

            [acquire]
            policy = "non_blocking"
            "#,
        )
        .unwrap();

        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.initial_instance_capacity, 32);
        assert!(!config.auto_instance);
        assert_eq!(config.acquire_policy(), AcquirePolicy::NonBlocking);
    }

    #[test]
    fn test_frames_in_flight_range() {
        let err = PipelineConfig::from_toml_str("frames_in_flight = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = PipelineConfig::from_toml_str("frames_in_flight = 9").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = PipelineConfig::from_toml_str("frames_in_fligth = 2").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = PipelineConfig::load("/nonexistent/orrery.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
