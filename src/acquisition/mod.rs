//! Data acquisition: sample types, the bounded ring buffer, and the
//! polling scheduler that drives register reads.

pub mod sample_buffer;
pub mod scheduler;

pub use sample_buffer::{SampleBuffer, BUFFER_CAPACITY};
pub use scheduler::{AcquisitionScheduler, AcquisitionStatistics, UplinkReport};

use serde::{Deserialize, Serialize};

/// One observation of one register
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionSample {
    /// Wall-clock timestamp, nanoseconds since the Unix epoch
    pub timestamp_nanos: u64,

    pub register_address: u8,

    pub register_name: String,

    /// Signed view of the 16-bit register word; signed so deltas stay
    /// well-defined when values wrap
    pub raw_value: i32,

    /// Engineering value: raw / gain (raw when gain is zero)
    pub scaled_value: f64,

    pub unit: String,
}

/// Callback invoked for every acquired sample
pub type SampleCallback = Box<dyn Fn(&AcquisitionSample) + Send + Sync>;

/// Callback invoked with a description of each acquisition error
pub type ErrorCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Callback invoked with each periodic compressed drain
pub type ReportCallback = Box<dyn Fn(&UplinkReport) + Send + Sync>;
