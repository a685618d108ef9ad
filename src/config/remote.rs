// src/config/remote.rs
//! Remote configuration protocol: pull, apply, acknowledge
//!
//! The cloud publishes nonce-identified configuration diffs; the handler
//! applies each proposed parameter independently and acknowledges with
//! per-parameter accepted / rejected / unchanged results.

use crate::config::{ConfigHandle, RemoteSettings};
use crate::error::{GatewayError, GatewayResult};
use crate::hal::HttpClient;
use crate::registers::RegisterMap;
use crate::utils::time::Clock;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A register proposed by the cloud, by address or by alias
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RegisterRef {
    Address(u8),
    Alias(String),
}

#[derive(Debug, Deserialize)]
struct ConfigUpdateBody {
    /// Sampling interval in seconds
    sampling_interval: Option<u32>,
    registers: Option<Vec<RegisterRef>>,
}

#[derive(Debug, Deserialize)]
struct ConfigUpdateWire {
    nonce: Option<u32>,
    config_update: Option<ConfigUpdateBody>,
}

/// A materialized configuration update; absent fields mean "no change"
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigUpdateRequest {
    pub nonce: u32,
    pub timestamp_millis: u64,
    pub sampling_interval_ms: Option<u32>,
    pub registers: Option<BTreeSet<u8>>,
}

/// Per-parameter acknowledgment entry
#[derive(Debug, Clone, Serialize)]
pub struct ParameterAck {
    pub parameter: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AckLists {
    pub accepted: Vec<ParameterAck>,
    pub rejected: Vec<ParameterAck>,
    pub unchanged: Vec<ParameterAck>,
}

/// Acknowledgment for one configuration update request
#[derive(Debug, Clone, Serialize)]
pub struct ConfigUpdateAck {
    pub nonce: u32,
    pub timestamp: u64,
    pub all_success: bool,
    pub config_ack: AckLists,
}

/// Pulls configuration diffs from the cloud, applies them to the shared
/// runtime snapshot, and posts acknowledgments.
pub struct RemoteConfigHandler {
    http: Arc<dyn HttpClient>,
    config_url: String,
    handle: Arc<ConfigHandle>,
    registers: RegisterMap,
    settings: RemoteSettings,
    time: Arc<dyn Clock>,
    last_nonce: Mutex<Option<u32>>,
    update_callbacks: Mutex<Vec<Box<dyn Fn() + Send + Sync>>>,
    running: AtomicBool,
}

impl RemoteConfigHandler {
    pub fn new(
        http: Arc<dyn HttpClient>,
        config_url: impl Into<String>,
        handle: Arc<ConfigHandle>,
        registers: RegisterMap,
        settings: RemoteSettings,
        time: Arc<dyn Clock>,
    ) -> Self {
        Self {
            http,
            config_url: config_url.into(),
            handle,
            registers,
            settings,
            time,
            last_nonce: Mutex::new(None),
            update_callbacks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Register a callback fired whenever a parameter is accepted
    pub fn on_update(&self, callback: Box<dyn Fn() + Send + Sync>) {
        self.update_callbacks.lock().unwrap().push(callback);
    }

    /// Start the periodic pull task. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Remote config handler already running");
            return;
        }

        let handler = Arc::clone(self);
        tokio::spawn(async move {
            while handler.running.load(Ordering::SeqCst) {
                handler.tick().await;
                tokio::time::sleep(Duration::from_millis(handler.settings.poll_interval_ms)).await;
            }
        });
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// One pull cycle; transport and protocol failures are logged and
    /// swallowed so the next tick retries.
    pub async fn tick(&self) {
        if let Err(e) = self.check_for_update().await {
            warn!("Config update check failed: {}", e);
        }
    }

    /// Pull, apply, and acknowledge one configuration update.
    ///
    /// Returns the ack that was sent, or `None` when the cloud had no
    /// update pending.
    pub async fn check_for_update(&self) -> GatewayResult<Option<ConfigUpdateAck>> {
        debug!("Checking for config updates");

        let resp = self.http.get(&self.config_url).await?;
        if !resp.is_success() {
            return Err(GatewayError::Transport(format!(
                "Config pull failed: status {}",
                resp.status
            )));
        }

        let Some(request) = self.parse_update(&resp.body)? else {
            debug!("No config update pending");
            return Ok(None);
        };

        let ack = self.apply_update(&request);
        self.send_ack(&ack).await;

        if !ack.config_ack.accepted.is_empty() {
            let callbacks = self.update_callbacks.lock().unwrap();
            for callback in callbacks.iter() {
                if catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                    warn!("Config update callback panicked");
                }
            }
        }

        Ok(Some(ack))
    }

    /// Materialize the wire form, resolving register aliases against the
    /// register table. Unknown aliases are logged and dropped.
    fn parse_update(&self, body: &str) -> GatewayResult<Option<ConfigUpdateRequest>> {
        let wire: ConfigUpdateWire = serde_json::from_str(body)?;

        let Some(update) = wire.config_update else {
            return Ok(None);
        };

        let timestamp_millis = self.time.now_millis();
        let nonce = wire.nonce.unwrap_or(timestamp_millis as u32);

        let sampling_interval_ms = update.sampling_interval.map(|s| s.saturating_mul(1_000));

        let registers = update.registers.map(|refs| {
            let mut set = BTreeSet::new();
            for register in refs {
                match register {
                    RegisterRef::Address(address) => {
                        set.insert(address);
                    }
                    RegisterRef::Alias(alias) => match self.registers.resolve_alias(&alias) {
                        Some(address) => {
                            set.insert(address);
                        }
                        None => warn!("Unknown register name: {}", alias),
                    },
                }
            }
            set
        });

        if sampling_interval_ms.is_none() && registers.is_none() {
            return Ok(None);
        }

        Ok(Some(ConfigUpdateRequest {
            nonce,
            timestamp_millis,
            sampling_interval_ms,
            registers,
        }))
    }

    /// Apply a request atomically and derive the acknowledgment from the
    /// diff against the current snapshot.
    pub fn apply_update(&self, request: &ConfigUpdateRequest) -> ConfigUpdateAck {
        let mut ack = ConfigUpdateAck {
            nonce: request.nonce,
            timestamp: self.time.now_millis(),
            all_success: true,
            config_ack: AckLists::default(),
        };

        info!("Processing config update, nonce={}", request.nonce);

        {
            let mut last_nonce = self.last_nonce.lock().unwrap();
            if *last_nonce == Some(request.nonce) {
                warn!("Nonce {} already processed, ignoring duplicate", request.nonce);
                ack.config_ack.unchanged.push(ParameterAck {
                    parameter: "request".to_string(),
                    old_value: None,
                    new_value: None,
                    reason: "Duplicate request (nonce already processed)".to_string(),
                });
                ack.all_success = false;
                return ack;
            }
            *last_nonce = Some(request.nonce);
        }

        let current = self.handle.snapshot();
        let mut new_interval: Option<u64> = None;
        let mut new_registers: Option<BTreeSet<u8>> = None;

        if let Some(interval_ms) = request.sampling_interval_ms {
            let entry = ParameterAck {
                parameter: "sampling_interval".to_string(),
                old_value: Some(current.polling_interval_ms.to_string()),
                new_value: Some(interval_ms.to_string()),
                reason: String::new(),
            };

            if u64::from(interval_ms) == current.polling_interval_ms {
                ack.config_ack.unchanged.push(ParameterAck {
                    old_value: None,
                    new_value: None,
                    reason: "Value unchanged".to_string(),
                    ..entry
                });
            } else if let Err(reason) = self.validate_interval(interval_ms) {
                warn!("Sampling interval rejected: {}", reason);
                ack.config_ack.rejected.push(ParameterAck { reason, ..entry });
            } else {
                info!(
                    "Sampling interval updated: {} -> {} ms",
                    current.polling_interval_ms, interval_ms
                );
                new_interval = Some(u64::from(interval_ms));
                ack.config_ack.accepted.push(ParameterAck {
                    reason: "Applied successfully".to_string(),
                    ..entry
                });
            }
        }

        if let Some(registers) = &request.registers {
            let entry = ParameterAck {
                parameter: "registers".to_string(),
                old_value: Some(register_list_string(&current.minimum_registers)),
                new_value: Some(register_list_string(registers)),
                reason: String::new(),
            };

            if registers.is_subset(&current.minimum_registers) {
                let reason = if *registers == current.minimum_registers {
                    "Value unchanged".to_string()
                } else {
                    format!(
                        "Polling set already contains {}",
                        register_list_string(registers)
                    )
                };
                ack.config_ack.unchanged.push(ParameterAck {
                    old_value: None,
                    new_value: None,
                    reason,
                    ..entry
                });
            } else if let Err(reason) = self.validate_registers(registers) {
                warn!("Register list rejected: {}", reason);
                ack.config_ack.rejected.push(ParameterAck { reason, ..entry });
            } else {
                info!(
                    "Register list updated: [{}] -> [{}]",
                    register_list_string(&current.minimum_registers),
                    register_list_string(registers)
                );
                new_registers = Some(registers.clone());
                ack.config_ack.accepted.push(ParameterAck {
                    reason: "Applied successfully".to_string(),
                    ..entry
                });
            }
        }

        if new_interval.is_some() || new_registers.is_some() {
            self.handle.update(|settings| {
                if let Some(interval) = new_interval {
                    settings.polling_interval_ms = interval;
                }
                if let Some(registers) = new_registers.take() {
                    settings.minimum_registers = registers;
                }
            });
        }

        ack.all_success = ack.config_ack.rejected.is_empty();
        ack
    }

    fn validate_interval(&self, interval_ms: u32) -> Result<(), String> {
        if interval_ms < self.settings.min_sampling_interval_ms {
            return Err(format!(
                "Sampling interval too low (min: {} ms)",
                self.settings.min_sampling_interval_ms
            ));
        }
        if interval_ms > self.settings.max_sampling_interval_ms {
            return Err(format!(
                "Sampling interval too high (max: {} ms)",
                self.settings.max_sampling_interval_ms
            ));
        }
        Ok(())
    }

    fn validate_registers(&self, registers: &BTreeSet<u8>) -> Result<(), String> {
        if registers.is_empty() {
            return Err("Register list empty after filtering".to_string());
        }
        for &address in registers {
            if !self.registers.contains(address) {
                return Err(format!("Register {} not defined in system", address));
            }
        }
        Ok(())
    }

    async fn send_ack(&self, ack: &ConfigUpdateAck) {
        let url = format!("{}/ack", self.config_url);
        let body = match serde_json::to_vec(ack) {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to serialize config ack: {}", e);
                return;
            }
        };

        match self.http.post(&url, &body, "application/json").await {
            Ok(resp) if resp.is_success() => {
                info!("Config acknowledgment sent, nonce={}", ack.nonce);
            }
            Ok(resp) => {
                warn!("Failed to send config acknowledgment: status={}", resp.status);
            }
            Err(e) => {
                warn!("Failed to send config acknowledgment: {}", e);
            }
        }
    }
}

fn register_list_string(registers: &BTreeSet<u8>) -> String {
    registers
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
