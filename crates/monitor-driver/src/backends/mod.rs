//! Device backends besides the real character device.
//!
//! - **Simulated**: software model of the Monitor IP and its kernel driver,
//!   for CI and for exercising the runtime without a bitstream

pub mod simulated;

pub use simulated::{SimConfig, SimulatedMonitor};
