//! Diagnostic configuration
//!
//! Settings can come from a builder, from environment variables or from a
//! JSON/TOML file. Every path ends in [`DiagnosticConfig::validate`].
//!
//! # Environment variables
//!
//! With the default prefix `TWIN_DIAG`:
//!
//! ```text
//! TWIN_DIAG_AUTHORITY=device|server|none
//! TWIN_DIAG_SAMPLE_RATE=0..100
//! TWIN_DIAG_STRATEGY=random|continuous
//! ```
//!
//! # File format
//!
//! ```toml
//! authority = "server"
//! initial_rate_percentage = 20
//! strategy = "continuous"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{DiagError, Result};
use crate::policy::{RatePercentage, SamplingAuthority, SamplingPolicy};
use crate::sampling::SamplingStrategyKind;

/// Default prefix for environment variables
pub const DEFAULT_ENV_PREFIX: &str = "TWIN_DIAG";

/// Sampling configuration for one device session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiagnosticConfig {
    /// Who controls the sampling rate
    pub authority: SamplingAuthority,

    /// Rate in `[0, 100]` used until the cloud says otherwise
    #[serde(default)]
    pub initial_rate_percentage: u8,

    /// Per-message sampling strategy
    #[serde(default)]
    pub strategy: SamplingStrategyKind,
}

impl Default for DiagnosticConfig {
    fn default() -> Self {
        Self {
            authority: SamplingAuthority::None,
            initial_rate_percentage: 0,
            strategy: SamplingStrategyKind::Random,
        }
    }
}

impl DiagnosticConfig {
    pub fn new(authority: SamplingAuthority, initial_rate_percentage: u8) -> Self {
        Self {
            authority,
            initial_rate_percentage,
            ..Default::default()
        }
    }

    /// Create a new config builder
    pub fn builder() -> DiagnosticConfigBuilder {
        DiagnosticConfigBuilder::new()
    }

    /// Check the rate bound and return it as a [`RatePercentage`]
    pub fn validate(&self) -> Result<RatePercentage> {
        RatePercentage::new(i64::from(self.initial_rate_percentage)).ok_or_else(|| {
            DiagError::config(format!(
                "initial_rate_percentage must be within [0, 100], got {}",
                self.initial_rate_percentage
            ))
        })
    }

    /// Build the policy described by this config
    pub fn build_policy(&self) -> Result<SamplingPolicy> {
        let rate = self.validate()?;
        Ok(SamplingPolicy::new(self.authority, rate))
    }

    /// Create config from environment variables with the default prefix
    pub fn from_env() -> Result<Self> {
        Self::from_env_with_prefix(DEFAULT_ENV_PREFIX)
    }

    /// Create config from `<prefix>_AUTHORITY`, `<prefix>_SAMPLE_RATE` and
    /// `<prefix>_STRATEGY`. Unset variables keep their defaults.
    pub fn from_env_with_prefix(prefix: &str) -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = env_var(prefix, "AUTHORITY")? {
            config.authority = value.parse().map_err(DiagError::Config)?;
        }
        if let Some(value) = env_var(prefix, "SAMPLE_RATE")? {
            config.initial_rate_percentage = value.trim().parse().map_err(|_| {
                DiagError::config(format!("{}_SAMPLE_RATE must be an integer in [0, 100]", prefix))
            })?;
        }
        if let Some(value) = env_var(prefix, "STRATEGY")? {
            config.strategy = value.parse().map_err(DiagError::Config)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load config from a `.json` or `.toml` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            Some("toml") => toml::from_str(&content)?,
            _ => {
                return Err(DiagError::config(format!(
                    "unsupported config file format: {}",
                    path.display()
                )))
            }
        };

        config.validate()?;
        Ok(config)
    }
}

fn env_var(prefix: &str, name: &str) -> Result<Option<String>> {
    let var_name = format!("{}_{}", prefix, name);
    match std::env::var(&var_name) {
        Ok(value) => Ok(Some(value)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(DiagError::config(format!(
            "environment variable {} contains invalid UTF-8",
            var_name
        ))),
    }
}

/// Builder for [`DiagnosticConfig`]
#[derive(Debug, Default)]
pub struct DiagnosticConfigBuilder {
    config: DiagnosticConfig,
}

impl DiagnosticConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn authority(mut self, authority: SamplingAuthority) -> Self {
        self.config.authority = authority;
        self
    }

    pub fn initial_rate_percentage(mut self, rate: u8) -> Self {
        self.config.initial_rate_percentage = rate;
        self
    }

    pub fn strategy(mut self, strategy: SamplingStrategyKind) -> Self {
        self.config.strategy = strategy;
        self
    }

    pub fn build(self) -> Result<DiagnosticConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
