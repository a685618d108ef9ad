// src/commands.rs
//! Remote command execution
//!
//! The cloud issues control commands (register writes) identified by a
//! command id. Commands are queued, validated against the register
//! table, executed once per id through the protocol adapter, and their
//! results are retained until the uplink path reports and clears them.

use crate::error::{GatewayError, GatewayResult};
use crate::hal::ProtocolAdapter;
use crate::registers::{RegisterAccess, RegisterMap};
use crate::utils::time::Clock;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

/// Commands waiting for execution
const MAX_QUEUE_SIZE: usize = 10;
/// Executed results retained for reporting
const MAX_RESULTS_SIZE: usize = 20;
/// Command ids remembered for duplicate detection
const MAX_PROCESSED_IDS: usize = 50;

/// The only supported command action
pub const WRITE_REGISTER_ACTION: &str = "write_register";

/// Outcome of a command execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Success,
    Failed,
    InvalidRegister,
    InvalidValue,
    Timeout,
    Pending,
    Unknown,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Success => "success",
            CommandStatus::Failed => "failed",
            CommandStatus::InvalidRegister => "invalid_register",
            CommandStatus::InvalidValue => "invalid_value",
            CommandStatus::Timeout => "timeout",
            CommandStatus::Pending => "pending",
            CommandStatus::Unknown => "unknown",
        }
    }
}

/// A control command issued by the cloud
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command_id: u32,
    /// Action type; only [`WRITE_REGISTER_ACTION`] is supported
    pub action: String,
    /// Target register by numeric address, cloud alias, or full name
    pub target_register: String,
    /// Engineering value to write; converted to raw counts via the
    /// register's gain
    pub value: f32,
    #[serde(default)]
    pub timestamp: u64,
}

/// Execution result reported back to the cloud
#[derive(Debug, Clone, Serialize)]
pub struct CommandResult {
    pub command_id: u32,
    pub status: CommandStatus,
    pub status_message: String,
    pub executed_at: u64,
    pub actual_value: f32,
    pub error_details: String,
}

struct QueuedCommand {
    request: CommandRequest,
    queued_at: u64,
}

/// Callback invoked for every executed command
pub type CommandCallback = Box<dyn Fn(&CommandResult) + Send + Sync>;

/// Queues and executes cloud control commands against the inverter.
///
/// Each command id is executed at most once; duplicates are refused at
/// queue time. Results accumulate until the reporting path collects and
/// clears them.
pub struct CommandExecutor {
    adapter: Arc<dyn ProtocolAdapter>,
    registers: RegisterMap,
    time: Arc<dyn Clock>,
    queue: Mutex<VecDeque<QueuedCommand>>,
    results: Mutex<VecDeque<CommandResult>>,
    processed_ids: Mutex<VecDeque<u32>>,
    callbacks: Mutex<Vec<CommandCallback>>,
}

impl CommandExecutor {
    pub fn new(
        adapter: Arc<dyn ProtocolAdapter>,
        registers: RegisterMap,
        time: Arc<dyn Clock>,
    ) -> Self {
        Self {
            adapter,
            registers,
            time,
            queue: Mutex::new(VecDeque::new()),
            results: Mutex::new(VecDeque::new()),
            processed_ids: Mutex::new(VecDeque::new()),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Register a callback fired for every executed command
    pub fn on_executed(&self, callback: CommandCallback) {
        self.callbacks.lock().unwrap().push(callback);
    }

    /// Whether a command id has already been executed
    pub fn is_processed(&self, command_id: u32) -> bool {
        self.processed_ids.lock().unwrap().contains(&command_id)
    }

    /// Number of commands waiting for execution
    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Accept a command for execution.
    ///
    /// Duplicates and overflow are refused; a command that fails
    /// validation is refused and its failure is recorded as a result so
    /// the cloud still hears about it.
    pub fn queue_command(&self, request: CommandRequest) -> GatewayResult<()> {
        if self.is_processed(request.command_id) {
            warn!(
                "Command {} already processed, ignoring duplicate",
                request.command_id
            );
            return Err(GatewayError::State(format!(
                "Command {} already processed",
                request.command_id
            )));
        }

        {
            let queue = self.queue.lock().unwrap();
            if queue.len() >= MAX_QUEUE_SIZE {
                error!("Command queue full ({} commands)", queue.len());
                return Err(GatewayError::Resource(format!(
                    "Command queue full ({} commands)",
                    queue.len()
                )));
            }
        }

        if let Err((status, reason)) = self.validate(&request) {
            error!(
                "Command {} validation failed: {}",
                request.command_id, reason
            );
            self.record_result(CommandResult {
                command_id: request.command_id,
                status,
                status_message: "Validation failed".to_string(),
                executed_at: self.time.now_millis(),
                actual_value: 0.0,
                error_details: reason.clone(),
            });
            self.mark_processed(request.command_id);
            return Err(GatewayError::Validation(reason));
        }

        info!(
            "Queued command {}: action={}, target={}, value={:.2}",
            request.command_id, request.action, request.target_register, request.value
        );
        self.queue.lock().unwrap().push_back(QueuedCommand {
            request,
            queued_at: self.time.now_millis(),
        });
        Ok(())
    }

    /// Execute everything in the queue, in arrival order. Returns the
    /// results of this batch.
    pub async fn execute_pending(&self) -> Vec<CommandResult> {
        let pending: Vec<QueuedCommand> = self.queue.lock().unwrap().drain(..).collect();
        if pending.is_empty() {
            return Vec::new();
        }

        info!("Executing {} pending commands", pending.len());

        let mut batch = Vec::with_capacity(pending.len());
        for queued in pending {
            debug!(
                "Command {} waited {} ms in queue",
                queued.request.command_id,
                self.time.now_millis().saturating_sub(queued.queued_at)
            );

            let result = self.execute(&queued.request).await;
            info!(
                "Command {} executed: status={}",
                result.command_id,
                result.status.as_str()
            );

            self.mark_processed(result.command_id);
            self.record_result(result.clone());

            let callbacks = self.callbacks.lock().unwrap();
            for callback in callbacks.iter() {
                if catch_unwind(AssertUnwindSafe(|| callback(&result))).is_err() {
                    error!("Command callback panicked");
                }
            }
            drop(callbacks);

            batch.push(result);
        }

        batch
    }

    /// Results retained since the last [`CommandExecutor::clear_results`]
    pub fn results(&self) -> Vec<CommandResult> {
        self.results.lock().unwrap().iter().cloned().collect()
    }

    /// Drop retained results after they have been reported
    pub fn clear_results(&self) {
        self.results.lock().unwrap().clear();
        debug!("Cleared executed command results");
    }

    async fn execute(&self, request: &CommandRequest) -> CommandResult {
        info!(
            "Executing command {}: {} on {} with value {:.2}",
            request.command_id, request.action, request.target_register, request.value
        );

        let mut result = CommandResult {
            command_id: request.command_id,
            status: CommandStatus::Unknown,
            status_message: String::new(),
            executed_at: self.time.now_millis(),
            actual_value: 0.0,
            error_details: String::new(),
        };

        // Registers may have been reconfigured since queue time
        let (address, raw_value) = match self.validate(request) {
            Ok(resolved) => resolved,
            Err((status, reason)) => {
                result.status = status;
                result.status_message = "Validation failed".to_string();
                result.error_details = reason;
                return result;
            }
        };

        debug!(
            "Writing register {}: value={:.2}, raw={}",
            address, request.value, raw_value
        );

        match self.adapter.write_register(address, raw_value).await {
            Ok(()) => {
                result.status = CommandStatus::Success;
                result.status_message = "Command executed successfully".to_string();
                result.actual_value = request.value;
                info!(
                    "Command {} wrote register {} = {:.2}",
                    request.command_id, address, request.value
                );
            }
            Err(e) => {
                result.status = CommandStatus::Timeout;
                result.status_message = "Write operation failed".to_string();
                result.error_details = format!("Failed to write register {}: {}", address, e);
                error!("Command {} failed: {}", request.command_id, e);
            }
        }

        result
    }

    /// Check a command against the register table; on success returns
    /// the resolved address and the raw register value.
    fn validate(&self, request: &CommandRequest) -> Result<(u8, u16), (CommandStatus, String)> {
        if request.action != WRITE_REGISTER_ACTION {
            return Err((
                CommandStatus::Failed,
                format!("Unsupported action: {}", request.action),
            ));
        }

        if request.target_register.is_empty() {
            return Err((
                CommandStatus::InvalidRegister,
                "Target register cannot be empty".to_string(),
            ));
        }

        let address = self.resolve_register(&request.target_register).ok_or_else(|| {
            (
                CommandStatus::InvalidRegister,
                format!("Unknown register: {}", request.target_register),
            )
        })?;

        let config = self.registers.get(address).ok_or_else(|| {
            (
                CommandStatus::InvalidRegister,
                format!("Register {} has no configuration", address),
            )
        })?;

        if !matches!(config.access, RegisterAccess::Write | RegisterAccess::ReadWrite) {
            return Err((
                CommandStatus::InvalidRegister,
                format!("Register {} is read-only", address),
            ));
        }

        // Engineering value to raw counts, inverse of the read scaling
        let raw = if config.gain > 0.0 {
            f64::from(request.value) * f64::from(config.gain)
        } else {
            f64::from(request.value)
        };
        if !raw.is_finite() || raw < 0.0 || raw > f64::from(u16::MAX) {
            return Err((
                CommandStatus::InvalidValue,
                format!(
                    "Value {:.2} maps to raw {} outside the register range",
                    request.value, raw
                ),
            ));
        }

        Ok((address, raw.round() as u16))
    }

    /// Numeric addresses pass through; names resolve via the register table
    fn resolve_register(&self, target: &str) -> Option<u8> {
        if let Ok(address) = target.parse::<u8>() {
            return Some(address);
        }
        self.registers.resolve_name(target)
    }

    fn record_result(&self, result: CommandResult) {
        let mut results = self.results.lock().unwrap();
        results.push_back(result);
        while results.len() > MAX_RESULTS_SIZE {
            results.pop_front();
        }
    }

    fn mark_processed(&self, command_id: u32) {
        let mut ids = self.processed_ids.lock().unwrap();
        ids.push_back(command_id);
        while ids.len() > MAX_PROCESSED_IDS {
            ids.pop_front();
        }
    }
}
