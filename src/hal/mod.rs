//! Hardware and transport abstraction layer
//!
//! Seams to the world outside the core: the cloud HTTP transport and the
//! inverter's register bank. Production wiring supplies real transports;
//! tests plug in the mock client and the simulated inverter.

pub mod adapter;
pub mod http;
pub mod simulator;

pub use adapter::{AdapterConfig, CloudProtocolAdapter, ProtocolAdapter};
pub use http::{HttpClient, HttpResponse, MockHttpClient, RecordedRequest};
pub use simulator::{SimulatedInverter, SimulatorConfig};
