// src/config/loader.rs
//! Static configuration loader: TOML file plus environment overrides

use crate::config::GatewayConfig;
use std::path::{Path, PathBuf};

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileNotFound(String),
    ParseError(String),
    ValidationError(Vec<String>),
    IoError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Configuration file not found: {}", path),
            ConfigError::ParseError(msg) => write!(f, "Configuration parse error: {}", msg),
            ConfigError::ValidationError(errors) => {
                write!(f, "Configuration validation errors:")?;
                for error in errors {
                    write!(f, "\n  {}", error)?;
                }
                Ok(())
            }
            ConfigError::IoError(msg) => write!(f, "IO error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err.to_string())
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

/// Environment variable prefix for overrides, `GRIDLINK_<SECTION>_<KEY>`
const ENV_PREFIX: &str = "GRIDLINK_";

const SECTIONS: &[&str] = &[
    "api",
    "adapter",
    "acquisition",
    "remote",
    "fota",
    "logging",
];

/// Loads the gateway configuration from an optional TOML file, then
/// applies `GRIDLINK_`-prefixed environment overrides and validates.
pub struct ConfigLoader {
    path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { path: None }
    }

    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
        }
    }

    pub fn load(&self) -> Result<GatewayConfig, ConfigError> {
        let mut value = match &self.path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::FileNotFound(path.display().to_string()));
                }
                let content = std::fs::read_to_string(path)?;
                toml::from_str::<toml::Value>(&content)?
            }
            None => toml::Value::Table(toml::value::Table::new()),
        };

        Self::apply_environment_overrides(&mut value);

        let config: GatewayConfig = value
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError(e.to_string()))?;

        config.validate().map_err(ConfigError::ValidationError)?;
        Ok(config)
    }

    fn apply_environment_overrides(config: &mut toml::Value) {
        for (key, value) in std::env::vars() {
            let Some(rest) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let rest = rest.to_lowercase();

            // GRIDLINK_<SECTION>_<FIELD> targets a section table;
            // GRIDLINK_<FIELD> targets a top-level field (e.g. device_id)
            let (section, field) = match SECTIONS
                .iter()
                .find(|s| rest.starts_with(&format!("{}_", s)))
            {
                Some(section) => (Some(*section), rest[section.len() + 1..].to_string()),
                None => (None, rest),
            };

            let parsed = Self::parse_env_value(&value);
            if let toml::Value::Table(table) = config {
                match section {
                    Some(section) => {
                        let entry = table
                            .entry(section.to_string())
                            .or_insert_with(|| toml::Value::Table(toml::value::Table::new()));
                        if let toml::Value::Table(section_table) = entry {
                            section_table.insert(field, parsed);
                        }
                    }
                    None => {
                        table.insert(field, parsed);
                    }
                }
            }
        }
    }

    fn parse_env_value(value: &str) -> toml::Value {
        if let Ok(int_val) = value.parse::<i64>() {
            toml::Value::Integer(int_val)
        } else if let Ok(float_val) = value.parse::<f64>() {
            toml::Value::Float(float_val)
        } else if let Ok(bool_val) = value.parse::<bool>() {
            toml::Value::Boolean(bool_val)
        } else {
            toml::Value::String(value.to_string())
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
