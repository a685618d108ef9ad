// src/acquisition/scheduler.rs
//! Periodic register polling with buffered drain into the delta codec

use crate::acquisition::{
    AcquisitionSample, ErrorCallback, ReportCallback, SampleBuffer, SampleCallback,
};
use crate::codec::{self, CompressionStats};
use crate::config::ConfigHandle;
use crate::error::GatewayResult;
use crate::hal::ProtocolAdapter;
use crate::registers::RegisterMap;
use crate::utils::time::Clock;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// Interval between buffer drains, independent of the polling interval
pub const BUFFER_DRAIN_INTERVAL_MS: u64 = 15_000;

/// Counters describing scheduler health
#[derive(Debug, Clone, Default, Serialize)]
pub struct AcquisitionStatistics {
    pub total_polls: u64,
    pub successful_polls: u64,
    pub failed_polls: u64,
    pub last_error: Option<String>,
    pub last_poll_time_nanos: Option<u64>,
}

/// One periodic drain: the compressed payload plus its self-check stats
#[derive(Debug, Clone)]
pub struct UplinkReport {
    pub sample_count: usize,
    pub payload: Vec<u8>,
    pub stats: CompressionStats,
}

/// Drives the poll loop: reads registers through the protocol adapter,
/// fills the ring buffer, fans samples out to callbacks, and every
/// [`BUFFER_DRAIN_INTERVAL_MS`] drains the buffer through the codec.
pub struct AcquisitionScheduler {
    adapter: Arc<dyn ProtocolAdapter>,
    config: Arc<ConfigHandle>,
    registers: RwLock<RegisterMap>,
    buffer: SampleBuffer,
    sample_callbacks: Mutex<Vec<SampleCallback>>,
    error_callbacks: Mutex<Vec<ErrorCallback>>,
    report_callbacks: Mutex<Vec<ReportCallback>>,
    statistics: Mutex<AcquisitionStatistics>,
    running: AtomicBool,
    time: Arc<dyn Clock>,
    last_drain_nanos: AtomicU64,
}

impl AcquisitionScheduler {
    pub fn new(
        adapter: Arc<dyn ProtocolAdapter>,
        config: Arc<ConfigHandle>,
        registers: RegisterMap,
        time: Arc<dyn Clock>,
    ) -> Self {
        let now = time.now_nanos();
        Self {
            adapter,
            config,
            registers: RwLock::new(registers),
            buffer: SampleBuffer::new(),
            sample_callbacks: Mutex::new(Vec::new()),
            error_callbacks: Mutex::new(Vec::new()),
            report_callbacks: Mutex::new(Vec::new()),
            statistics: Mutex::new(AcquisitionStatistics::default()),
            running: AtomicBool::new(false),
            time,
            last_drain_nanos: AtomicU64::new(now),
        }
    }

    /// Start the background poll task. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Acquisition scheduler already running");
            return;
        }

        info!(
            "Acquisition scheduler started, interval {} ms",
            self.config.snapshot().polling_interval_ms
        );

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            while scheduler.running.load(Ordering::SeqCst) {
                scheduler.poll_cycle().await;
                scheduler.maybe_drain();

                let interval = scheduler.config.snapshot().polling_interval_ms;
                tokio::time::sleep(Duration::from_millis(interval)).await;
            }
            info!("Acquisition scheduler stopped");
        });
    }

    /// Request the poll task to stop at its next suspension point. Idempotent.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Effective at the start of the next poll cycle
    pub fn set_polling_interval(&self, interval: Duration) {
        let millis = interval.as_millis() as u64;
        self.config.update(|c| c.polling_interval_ms = millis);
        info!("Polling interval updated to {} ms", millis);
    }

    /// Effective at the start of the next poll cycle
    pub fn set_minimum_registers(&self, registers: BTreeSet<u8>) {
        self.config.update(|c| c.minimum_registers = registers);
    }

    /// Replace the register metadata table
    pub fn configure_registers(&self, registers: RegisterMap) {
        *self.registers.write().unwrap() = registers;
    }

    pub fn add_sample_callback(&self, callback: SampleCallback) {
        self.sample_callbacks.lock().unwrap().push(callback);
    }

    pub fn add_error_callback(&self, callback: ErrorCallback) {
        self.error_callbacks.lock().unwrap().push(callback);
    }

    pub fn add_report_callback(&self, callback: ReportCallback) {
        self.report_callbacks.lock().unwrap().push(callback);
    }

    /// One read of one register, bypassing the poll loop and the buffer
    pub async fn read_single(&self, address: u8) -> GatewayResult<AcquisitionSample> {
        let timestamp_nanos = self.time.now_nanos();
        let values = self.adapter.read_registers(address, 1).await?;
        let value = values.first().copied().ok_or_else(|| {
            crate::error::GatewayError::Protocol(format!(
                "Adapter returned no value for register {}",
                address
            ))
        })?;
        Ok(self.build_sample(timestamp_nanos, address, value))
    }

    /// Manual multi-register read; failed addresses are omitted
    pub async fn read_multiple(&self, addresses: &[u8]) -> Vec<AcquisitionSample> {
        let mut samples = Vec::with_capacity(addresses.len());
        for &address in addresses {
            match self.read_single(address).await {
                Ok(sample) => samples.push(sample),
                Err(e) => {
                    warn!("Failed to read register {}: {}", address, e);
                    self.notify_error(&format!("Failed to read register {}: {}", address, e));
                }
            }
        }
        samples
    }

    /// Manual register write, bypassing the poll loop
    pub async fn perform_write(&self, address: u8, value: u16) -> GatewayResult<()> {
        self.adapter.write_register(address, value).await
    }

    pub fn statistics(&self) -> AcquisitionStatistics {
        self.statistics.lock().unwrap().clone()
    }

    pub fn reset_statistics(&self) {
        *self.statistics.lock().unwrap() = AcquisitionStatistics::default();
    }

    /// Number of samples currently buffered
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Run one poll cycle: read the address set, buffer samples, fan out
    /// callbacks, update statistics.
    pub async fn poll_cycle(&self) {
        let snapshot = self.config.snapshot();

        let mut addresses: BTreeSet<u8> = self
            .registers
            .read()
            .unwrap()
            .addresses()
            .into_iter()
            .collect();
        addresses.extend(&snapshot.minimum_registers);

        let mut acquired = 0usize;
        for address in addresses {
            let timestamp_nanos = self.time.now_nanos();
            match self.adapter.read_registers(address, 1).await {
                Ok(values) if !values.is_empty() => {
                    let sample = self.build_sample(timestamp_nanos, address, values[0]);
                    self.store_sample(sample);
                    acquired += 1;
                }
                Ok(_) => {
                    debug!("Poll read of register {} returned no value", address);
                    self.notify_error(&format!("Register {} returned no value", address));
                }
                Err(e) => {
                    debug!("Poll read of register {} failed: {}", address, e);
                    self.notify_error(&format!("Failed to read register {}: {}", address, e));
                }
            }
        }

        let mut stats = self.statistics.lock().unwrap();
        stats.total_polls += 1;
        stats.last_poll_time_nanos = Some(self.time.now_nanos());
        if acquired > 0 {
            stats.successful_polls += 1;
        } else {
            stats.failed_polls += 1;
            stats.last_error = Some("No samples acquired".to_string());
        }
    }

    /// Drain the buffer if the drain interval has elapsed
    pub fn maybe_drain(&self) {
        let now = self.time.now_nanos();
        let last = self.last_drain_nanos.load(Ordering::Relaxed);
        if now.saturating_sub(last) >= BUFFER_DRAIN_INTERVAL_MS * 1_000_000 {
            self.drain_now();
        }
    }

    /// Snapshot, compress, emit a report, and clear the buffer
    pub fn drain_now(&self) {
        let samples = self.buffer.snapshot();

        if !samples.is_empty() {
            match codec::compress_with_stats(&samples) {
                Ok((payload, stats)) => {
                    info!(
                        "Buffer drain: {} samples -> {} bytes (ratio {:.3}, self-check {})",
                        samples.len(),
                        payload.len(),
                        stats.compression_ratio,
                        if stats.validation_passed { "ok" } else { "FAILED" }
                    );

                    let report = UplinkReport {
                        sample_count: samples.len(),
                        payload,
                        stats,
                    };

                    let callbacks = self.report_callbacks.lock().unwrap();
                    for callback in callbacks.iter() {
                        if catch_unwind(AssertUnwindSafe(|| callback(&report))).is_err() {
                            error!("Report callback panicked");
                        }
                    }
                }
                Err(e) => {
                    error!("Buffer compression failed: {}", e);
                    self.notify_error(&format!("Buffer compression failed: {}", e));
                }
            }
        }

        self.buffer.clear();
        self.last_drain_nanos
            .store(self.time.now_nanos(), Ordering::Relaxed);
    }

    /// Partition addresses into maximal runs of consecutive values
    pub fn group_consecutive(addresses: &[u8]) -> Vec<Vec<u8>> {
        if addresses.is_empty() {
            return Vec::new();
        }

        let mut sorted = addresses.to_vec();
        sorted.sort_unstable();

        let mut groups = Vec::new();
        let mut current = vec![sorted[0]];
        for &address in &sorted[1..] {
            if address == *current.last().unwrap() + 1 {
                current.push(address);
            } else {
                groups.push(std::mem::replace(&mut current, vec![address]));
            }
        }
        groups.push(current);
        groups
    }

    fn build_sample(&self, timestamp_nanos: u64, address: u8, value: u16) -> AcquisitionSample {
        let registers = self.registers.read().unwrap();
        let config = registers.get(address);

        let name = config
            .map(|c| c.name.clone())
            .unwrap_or_else(|| "Unknown".to_string());
        let unit = config.map(|c| c.unit.clone()).unwrap_or_default();
        let gain = config.map(|c| c.gain).unwrap_or(1.0);

        let raw_value = i32::from(value);
        let scaled_value = if gain != 0.0 {
            f64::from(raw_value) / f64::from(gain)
        } else {
            f64::from(raw_value)
        };

        AcquisitionSample {
            timestamp_nanos,
            register_address: address,
            register_name: name,
            raw_value,
            scaled_value,
            unit,
        }
    }

    fn store_sample(&self, sample: AcquisitionSample) {
        self.buffer.push(sample.clone());

        let callbacks = self.sample_callbacks.lock().unwrap();
        for callback in callbacks.iter() {
            if catch_unwind(AssertUnwindSafe(|| callback(&sample))).is_err() {
                error!("Sample callback panicked");
            }
        }
    }

    fn notify_error(&self, message: &str) {
        let callbacks = self.error_callbacks.lock().unwrap();
        for callback in callbacks.iter() {
            if catch_unwind(AssertUnwindSafe(|| callback(message))).is_err() {
                error!("Error callback panicked");
            }
        }
    }
}
