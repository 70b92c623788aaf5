//! Process settings from environment variables
//!
//! | Variable           | Default      | Meaning                          |
//! |--------------------|--------------|----------------------------------|
//! | `VIRTA_CONFIG`     | `virta.json` | Pipeline configuration document  |
//! | `VIRTA_LOG_LEVEL`  | `info`       | Default `EnvFilter` directive    |
//! | `VIRTA_LOG_FORMAT` | `pretty`     | `pretty` or `json`               |
//!
//! `RUST_LOG`, when set, overrides `VIRTA_LOG_LEVEL`.

use anyhow::{bail, Result};
use std::env;
use std::path::PathBuf;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => bail!("invalid log format '{other}'. Must be one of: pretty, json"),
        }
    }
}

/// Runtime settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Pipeline configuration file
    pub config_path: PathBuf,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("virta.json"),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl RuntimeConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from any key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let config_path = lookup("VIRTA_CONFIG")
            .map(PathBuf::from)
            .unwrap_or(defaults.config_path);
        let log_level = lookup("VIRTA_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or(defaults.log_level);
        let log_format = match lookup("VIRTA_LOG_FORMAT") {
            Some(val) => val.parse()?,
            None => defaults.log_format,
        };

        let config = Self {
            config_path,
            log_level,
            log_format,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            bail!(
                "invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            );
        }
        if self.config_path.as_os_str().is_empty() {
            bail!("VIRTA_CONFIG cannot be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = RuntimeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn reads_all_variables() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            ("VIRTA_CONFIG", "/etc/virta/pipeline.json"),
            ("VIRTA_LOG_LEVEL", "DEBUG"),
            ("VIRTA_LOG_FORMAT", "json"),
        ]))
        .unwrap();
        assert_eq!(config.config_path, PathBuf::from("/etc/virta/pipeline.json"));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn rejects_unknown_log_level() {
        let err = RuntimeConfig::from_lookup(lookup(&[("VIRTA_LOG_LEVEL", "loud")])).unwrap_err();
        assert!(err.to_string().contains("invalid log level 'loud'"));
    }

    #[test]
    fn rejects_unknown_log_format() {
        assert!(RuntimeConfig::from_lookup(lookup(&[("VIRTA_LOG_FORMAT", "xml")])).is_err());
    }
}
