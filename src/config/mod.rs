// src/config/mod.rs
//! Gateway configuration: static settings, the shared runtime snapshot,
//! and the remote configuration protocol

pub mod loader;
pub mod remote;

pub use loader::{ConfigError, ConfigLoader};
pub use remote::{ConfigUpdateAck, ConfigUpdateRequest, ParameterAck, RemoteConfigHandler};

use crate::hal::AdapterConfig;
use crate::registers::{RegisterConfig, RegisterMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// Complete static configuration of the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "defaults::device_id")]
    pub device_id: String,

    /// Register metadata table, including cloud aliases
    #[serde(default = "defaults::registers")]
    pub registers: Vec<RegisterConfig>,

    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub adapter: AdapterConfig,

    #[serde(default)]
    pub acquisition: AcquisitionSettings,

    #[serde(default)]
    pub remote: RemoteSettings,

    #[serde(default)]
    pub fota: FotaSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Cloud endpoint layout and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    #[serde(default = "defaults::inverter_base_url")]
    pub inverter_base_url: String,

    #[serde(default = "defaults::cloud_base_url")]
    pub cloud_base_url: String,

    #[serde(default = "defaults::read_endpoint")]
    pub read_endpoint: String,

    #[serde(default = "defaults::write_endpoint")]
    pub write_endpoint: String,

    #[serde(default = "defaults::config_endpoint")]
    pub config_endpoint: String,

    #[serde(default = "defaults::upload_endpoint")]
    pub upload_endpoint: String,

    #[serde(default)]
    pub api_key: String,
}

/// Polling parameters shared with the remote configuration protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionSettings {
    #[serde(default = "defaults::polling_interval_ms")]
    pub polling_interval_ms: u64,

    #[serde(default = "defaults::minimum_registers")]
    pub minimum_registers: BTreeSet<u8>,

    #[serde(default = "defaults::background_polling")]
    pub background_polling: bool,
}

/// Remote configuration pull cadence and validation bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    #[serde(default = "defaults::remote_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "defaults::min_sampling_interval_ms")]
    pub min_sampling_interval_ms: u32,

    #[serde(default = "defaults::max_sampling_interval_ms")]
    pub max_sampling_interval_ms: u32,
}

/// FOTA paths, pre-shared key, and cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FotaSettings {
    #[serde(default = "defaults::fota_data_dir")]
    pub data_dir: PathBuf,

    /// Pre-shared key for per-chunk HMAC verification
    #[serde(default)]
    pub psk: String,

    #[serde(default = "defaults::chunk_interval_ms")]
    pub chunk_interval_ms: u64,

    #[serde(default = "defaults::report_interval_ms")]
    pub report_interval_ms: u64,

    #[serde(default = "defaults::manifest_endpoint")]
    pub manifest_endpoint: String,

    #[serde(default = "defaults::chunk_endpoint")]
    pub chunk_endpoint: String,

    #[serde(default = "defaults::status_endpoint")]
    pub status_endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "defaults::log_level")]
    pub level: String,

    #[serde(default = "defaults::log_file")]
    pub file: String,
}

mod defaults {
    use crate::registers::{RegisterConfig, RegisterMap};
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    pub fn device_id() -> String { "GridLink001".to_string() }

    pub fn registers() -> Vec<RegisterConfig> {
        RegisterMap::default_inverter()
            .iter()
            .map(|(_, config)| config.clone())
            .collect()
    }

    pub fn inverter_base_url() -> String { "http://127.0.0.1:8080".to_string() }
    pub fn cloud_base_url() -> String { "http://127.0.0.1:8080".to_string() }
    pub fn read_endpoint() -> String { "/api/inverter/read".to_string() }
    pub fn write_endpoint() -> String { "/api/inverter/write".to_string() }
    pub fn config_endpoint() -> String { "/api/inverter/config".to_string() }
    pub fn upload_endpoint() -> String { "/api/upload".to_string() }

    pub fn polling_interval_ms() -> u64 { 5_000 }
    pub fn minimum_registers() -> BTreeSet<u8> { (0..10).collect() }
    pub fn background_polling() -> bool { true }

    pub fn remote_poll_interval_ms() -> u64 { 60_000 }
    pub fn min_sampling_interval_ms() -> u32 { 1_000 }
    pub fn max_sampling_interval_ms() -> u32 { 3_600_000 }

    pub fn fota_data_dir() -> PathBuf { PathBuf::from("/littlefs") }
    pub fn chunk_interval_ms() -> u64 { 10_000 }
    pub fn report_interval_ms() -> u64 { 30_000 }
    pub fn manifest_endpoint() -> String { "/api/inverter/fota/manifest".to_string() }
    pub fn chunk_endpoint() -> String { "/api/inverter/fota/chunk".to_string() }
    pub fn status_endpoint() -> String { "/api/inverter/fota/status".to_string() }

    pub fn log_level() -> String { "debug".to_string() }
    pub fn log_file() -> String { "/logs/main.log".to_string() }
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            inverter_base_url: defaults::inverter_base_url(),
            cloud_base_url: defaults::cloud_base_url(),
            read_endpoint: defaults::read_endpoint(),
            write_endpoint: defaults::write_endpoint(),
            config_endpoint: defaults::config_endpoint(),
            upload_endpoint: defaults::upload_endpoint(),
            api_key: String::new(),
        }
    }
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            polling_interval_ms: defaults::polling_interval_ms(),
            minimum_registers: defaults::minimum_registers(),
            background_polling: defaults::background_polling(),
        }
    }
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::remote_poll_interval_ms(),
            min_sampling_interval_ms: defaults::min_sampling_interval_ms(),
            max_sampling_interval_ms: defaults::max_sampling_interval_ms(),
        }
    }
}

impl Default for FotaSettings {
    fn default() -> Self {
        Self {
            data_dir: defaults::fota_data_dir(),
            psk: String::new(),
            chunk_interval_ms: defaults::chunk_interval_ms(),
            report_interval_ms: defaults::report_interval_ms(),
            manifest_endpoint: defaults::manifest_endpoint(),
            chunk_endpoint: defaults::chunk_endpoint(),
            status_endpoint: defaults::status_endpoint(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
            file: defaults::log_file(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            device_id: defaults::device_id(),
            registers: defaults::registers(),
            api: ApiSettings::default(),
            adapter: AdapterConfig::default(),
            acquisition: AcquisitionSettings::default(),
            remote: RemoteSettings::default(),
            fota: FotaSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl GatewayConfig {
    /// Build the register lookup table from the configured metadata
    pub fn register_map(&self) -> RegisterMap {
        RegisterMap::new(self.registers.clone())
    }

    /// Check cross-field consistency
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let register_map = self.register_map();
        if register_map.is_empty() {
            errors.push("Register table is empty".to_string());
        }
        for &address in &self.acquisition.minimum_registers {
            if !register_map.contains(address) {
                errors.push(format!(
                    "Minimum register {} is not in the register table",
                    address
                ));
            }
        }

        if self.acquisition.polling_interval_ms
            < u64::from(self.remote.min_sampling_interval_ms)
        {
            errors.push(format!(
                "Polling interval {} ms below minimum {} ms",
                self.acquisition.polling_interval_ms, self.remote.min_sampling_interval_ms
            ));
        }
        if self.acquisition.polling_interval_ms
            > u64::from(self.remote.max_sampling_interval_ms)
        {
            errors.push(format!(
                "Polling interval {} ms above maximum {} ms",
                self.acquisition.polling_interval_ms, self.remote.max_sampling_interval_ms
            ));
        }
        if self.acquisition.minimum_registers.is_empty() {
            errors.push("Minimum register set is empty".to_string());
        }
        if self.remote.min_sampling_interval_ms > self.remote.max_sampling_interval_ms {
            errors.push("Sampling interval bounds are inverted".to_string());
        }
        if self.adapter.max_retries == 0 {
            errors.push("Adapter retry count must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Copy-on-write handle over the runtime acquisition settings.
///
/// Readers take a cheap `Arc` snapshot and never observe torn state; the
/// remote configuration handler swaps in a fresh `Arc` on accepted updates.
pub struct ConfigHandle {
    inner: RwLock<Arc<AcquisitionSettings>>,
}

impl ConfigHandle {
    pub fn new(settings: AcquisitionSettings) -> Self {
        Self {
            inner: RwLock::new(Arc::new(settings)),
        }
    }

    pub fn snapshot(&self) -> Arc<AcquisitionSettings> {
        self.inner.read().unwrap().clone()
    }

    pub fn update<F: FnOnce(&mut AcquisitionSettings)>(&self, mutate: F) {
        let mut guard = self.inner.write().unwrap();
        let mut next = (**guard).clone();
        mutate(&mut next);
        *guard = Arc::new(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.acquisition.polling_interval_ms, 5_000);
        assert_eq!(config.acquisition.minimum_registers.len(), 10);
    }

    #[test]
    fn test_validation_catches_bad_interval() {
        let mut config = GatewayConfig::default();
        config.acquisition.polling_interval_ms = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_catches_unknown_minimum_register() {
        let mut config = GatewayConfig::default();
        config.acquisition.minimum_registers.insert(200);
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("200")));
    }

    #[test]
    fn test_register_table_round_trips_through_toml() {
        let config = GatewayConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let back: GatewayConfig = toml::from_str(&toml_str).unwrap();

        let map = back.register_map();
        assert_eq!(map.len(), 10);
        assert_eq!(map.resolve_alias("voltage"), Some(0));
        assert_eq!(map.get(2).unwrap().gain, 100.0);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = GatewayConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let back: GatewayConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.acquisition, config.acquisition);
        assert_eq!(back.api.config_endpoint, config.api.config_endpoint);
    }

    #[test]
    fn test_handle_snapshot_is_stable() {
        let handle = ConfigHandle::new(AcquisitionSettings::default());
        let before = handle.snapshot();

        handle.update(|c| c.polling_interval_ms = 9_000);

        // The old snapshot is untouched; a new one sees the change
        assert_eq!(before.polling_interval_ms, 5_000);
        assert_eq!(handle.snapshot().polling_interval_ms, 9_000);
    }
}
