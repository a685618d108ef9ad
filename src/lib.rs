// src/lib.rs
//! GridLink Inverter Telemetry Gateway Core
//!
//! Acquisition, compression, remote configuration, and FOTA for an
//! inverter telemetry gateway.

#![doc = include_str!("../README.md")]

pub mod acquisition;
pub mod codec;
pub mod commands;
pub mod config;
mod error;
pub mod fota;
pub mod hal;
pub mod registers;
pub mod utils;

// Re-export commonly used types
pub use acquisition::{
    AcquisitionSample, AcquisitionScheduler, AcquisitionStatistics, SampleBuffer, UplinkReport,
};
pub use commands::{CommandExecutor, CommandRequest, CommandResult, CommandStatus};
pub use config::{ConfigHandle, GatewayConfig, RemoteConfigHandler};
pub use error::{GatewayError, GatewayResult};
pub use fota::{DirPartitions, FotaManager, FotaProgress, FotaState};
pub use hal::{
    CloudProtocolAdapter, HttpClient, HttpResponse, MockHttpClient, ProtocolAdapter,
    SimulatedInverter,
};
pub use registers::{RegisterAccess, RegisterConfig, RegisterMap};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_core_constants_are_reasonable() {
        assert_eq!(acquisition::BUFFER_CAPACITY, 256);
        assert_eq!(acquisition::scheduler::BUFFER_DRAIN_INTERVAL_MS, 15_000);
        assert_eq!(fota::MAX_BOOT_ATTEMPTS, 3);
    }
}
