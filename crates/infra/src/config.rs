//! Configuration loading.
//!
//! Sources, later ones overriding earlier ones:
//! 1. Defaults in code
//! 2. `config/stockflow.toml` (optional)
//! 3. Environment variables with the `STOCKFLOW` prefix, e.g. `STOCKFLOW__LOGGING__JSON=false`

use config::{ConfigError, Environment, File};
use serde::Deserialize;

use stockflow_core::{PROCUREMENT_PREFIX, TRANSFER_PREFIX};
use stockflow_observability::LoggingConfig;

const DEFAULT_FILE: &str = "config/stockflow";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub numbering: NumberingConfig,
    pub logging: LoggingConfig,
}

/// Prefixes of human-readable request numbers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NumberingConfig {
    pub transfer_prefix: String,
    pub procurement_prefix: String,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_FILE)
    }

    /// Load with `file` (extension optional) as the file source.
    pub fn load_from(file: &str) -> Result<Self, ConfigError> {
        let defaults = LoggingConfig::default();
        let config = config::Config::builder()
            .set_default("numbering.transfer_prefix", TRANSFER_PREFIX)?
            .set_default("numbering.procurement_prefix", PROCUREMENT_PREFIX)?
            .set_default("logging.level", defaults.level)?
            .set_default("logging.json", defaults.json)?
            .add_source(File::with_name(file).required(false))
            .add_source(
                Environment::with_prefix("STOCKFLOW")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_a_config_file() {
        let settings = Settings::load_from("config/does-not-exist").unwrap();
        assert_eq!(settings.numbering.transfer_prefix, "TRF");
        assert_eq!(settings.numbering.procurement_prefix, "PRC");
        assert!(!settings.logging.level.is_empty());
    }
}
