// src/hal/simulator.rs
//! In-memory inverter simulator for testing and host-side development

use crate::error::{GatewayError, GatewayResult};
use crate::hal::adapter::ProtocolAdapter;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// Simulator behavior knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// RNG seed for reproducible runs
    pub seed: u64,
    /// Maximum random deviation applied to each read, in raw counts
    pub jitter: u16,
    /// Probability that a read fails with a transport error
    pub failure_rate: f32,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            jitter: 3,
            failure_rate: 0.0,
        }
    }
}

/// Simulated inverter register bank implementing [`ProtocolAdapter`]
pub struct SimulatedInverter {
    registers: Mutex<BTreeMap<u8, u16>>,
    rng: Mutex<StdRng>,
    config: SimulatorConfig,
    fail_next: AtomicBool,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl SimulatedInverter {
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            registers: Mutex::new(Self::default_register_values()),
            rng: Mutex::new(StdRng::seed_from_u64(config.seed)),
            config,
            fail_next: AtomicBool::new(false),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Plausible raw values for the reference inverter's register bank
    fn default_register_values() -> BTreeMap<u8, u16> {
        BTreeMap::from([
            (0, 2303), // Vac 230.3 V
            (1, 51),   // Iac 5.1 A
            (2, 5002), // Fac 50.02 Hz
            (3, 3050), // Vpv1 305.0 V
            (4, 2980), // Vpv2 298.0 V
            (5, 42),   // Ipv1 4.2 A
            (6, 39),   // Ipv2 3.9 A
            (7, 451),  // 45.1 C
            (8, 100),  // export 100 %
            (9, 1250), // 1250 W
        ])
    }

    /// Force the next read to fail with a transport error
    pub fn fail_next_read(&self) {
        self.fail_next.store(true, Ordering::Relaxed);
    }

    pub fn set_register(&self, address: u8, value: u16) {
        self.registers.lock().unwrap().insert(address, value);
    }

    pub fn register(&self, address: u8) -> Option<u16> {
        self.registers.lock().unwrap().get(&address).copied()
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    fn jittered(&self, value: u16) -> u16 {
        if self.config.jitter == 0 {
            return value;
        }
        let jitter = i32::from(self.config.jitter);
        let offset = self.rng.lock().unwrap().gen_range(-jitter..=jitter);
        (i32::from(value) + offset).clamp(0, i32::from(u16::MAX)) as u16
    }

    fn should_fail(&self) -> bool {
        if self.fail_next.swap(false, Ordering::Relaxed) {
            return true;
        }
        self.config.failure_rate > 0.0
            && self.rng.lock().unwrap().gen::<f32>() < self.config.failure_rate
    }
}

impl Default for SimulatedInverter {
    fn default() -> Self {
        Self::new(SimulatorConfig::default())
    }
}

#[async_trait]
impl ProtocolAdapter for SimulatedInverter {
    async fn read_registers(&self, start: u8, count: u16) -> GatewayResult<Vec<u16>> {
        self.reads.fetch_add(1, Ordering::Relaxed);

        if self.should_fail() {
            return Err(GatewayError::Transport(
                "Simulated read failure".to_string(),
            ));
        }

        let registers = self.registers.lock().unwrap().clone();
        let mut values = Vec::with_capacity(usize::from(count));
        for offset in 0..count {
            let address = u8::try_from(u16::from(start) + offset).map_err(|_| {
                GatewayError::Validation(format!("Register address overflow at {}+{}", start, offset))
            })?;
            let value = registers.get(&address).copied().ok_or_else(|| {
                GatewayError::Validation(format!("Unknown register address {}", address))
            })?;
            values.push(self.jittered(value));
        }

        Ok(values)
    }

    async fn write_register(&self, address: u8, value: u16) -> GatewayResult<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);

        let mut registers = self.registers.lock().unwrap();
        match registers.get_mut(&address) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(GatewayError::Validation(format!(
                "Unknown register address {}",
                address
            ))),
        }
    }
}
