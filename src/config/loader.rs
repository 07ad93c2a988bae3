//! Configuration Loader
//!
//! Layers compiled-in defaults, an optional configuration file and
//! `INGRESS_`-prefixed environment variables (sections separated by `__`,
//! e.g. `INGRESS_MANAGER__FINGERPRINT_INTERVAL_MS=1000`), then validates the
//! merged result.

use super::error::{ConfigResult, ConfigurationError};
use super::IngressConfig;
use config::{Config, Environment, File};
use std::env;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const DEFAULT_CONFIG_FILE: &str = "config/ingress";

/// Loaded, validated configuration together with the detected environment
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: IngressConfig,
    environment: String,
}

impl ConfigManager {
    /// Load from the default file location and the environment
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from(None::<&str>)
    }

    /// Load from an explicit file (missing files are skipped) and the environment
    pub fn load_from<P: AsRef<Path>>(path: Option<P>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();

        let defaults = Config::try_from(&IngressConfig::default()).map_err(|e| {
            ConfigurationError::LoadFailed {
                source_name: "defaults".to_string(),
                error: e.to_string(),
            }
        })?;

        let (file_source, source_name) = match path.as_ref() {
            Some(p) => (
                File::from(p.as_ref()).required(false),
                p.as_ref().display().to_string(),
            ),
            None => (
                File::with_name(DEFAULT_CONFIG_FILE).required(false),
                DEFAULT_CONFIG_FILE.to_string(),
            ),
        };

        debug!(
            environment = %environment,
            source = %source_name,
            "Loading ingress supervisor configuration"
        );

        let config: IngressConfig = Config::builder()
            .add_source(defaults)
            .add_source(file_source)
            .add_source(
                Environment::with_prefix("INGRESS")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::LoadFailed {
                source_name,
                error: e.to_string(),
            })?
            .try_deserialize()
            .map_err(|e| ConfigurationError::Deserialize(e.to_string()))?;

        config.validate()?;

        Ok(Arc::new(ConfigManager {
            config,
            environment,
        }))
    }

    /// Wrap an already-built configuration after validating it
    pub fn from_config(config: IngressConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
        }))
    }

    pub fn config(&self) -> &IngressConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub(crate) fn detect_environment() -> String {
        env::var("INGRESS_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }
}
