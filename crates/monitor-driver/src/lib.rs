//! User-space runtime for the Monitor FPGA IP.
//!
//! The Monitor captures power samples and signal traces from a design under
//! test. This crate drives its control registers, registers host buffers the
//! captures land in and drains the on-chip BRAM banks into them.
//!
//! # Layers
//!
//! ```text
//! Monitor            owner: lifecycle, registry, transports, CMS sampler
//!   MonitorHw        typed register facade
//!   MonitorDevice    kernel contract: control window, staging mmap, ioctl, poll
//!     CharDevice       /dev/monitor or /dev/xdma0_user
//!     SimulatedMonitor software model of the IP and its kernel driver
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use monitor_driver::{Monitor, PlatformConfig, RegionKind, VoltageReference};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut monitor = Monitor::init(PlatformConfig::from_env()?)?;
//! monitor.alloc(1024, "CON", RegionKind::Power)?;
//! monitor.alloc(1024, "SIG", RegionKind::Traces)?;
//! monitor.config_vref(VoltageReference::Single)?;
//! monitor.set_trigger_mask(0xFFFF_FFFF)?;
//!
//! monitor.start()?;
//! monitor.wait_done()?;
//!
//! // Transfers must cover whole 16-byte words.
//! let power = RegionKind::Power.aligned_len(monitor.power_count()? as usize);
//! let traces = RegionKind::Traces.aligned_len(monitor.traces_count()? as usize);
//! monitor.read_power(power.min(1024))?;
//! monitor.read_traces(traces.min(1024))?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod backends;
pub mod capture;
mod device;
mod dma;
mod error;
mod hw;
pub mod mmio;
mod platform;
mod registry;
mod runtime;
mod sampler;

pub use device::{CharDevice, MonitorDevice, PollEvents, StagingBuffer};
pub use dma::{
    select_transport, AlignedBuffer, DmaToken, DmaTransport, DrainRequest, IoctlPollTransport,
    PositionalReadTransport, RW_MAX_SIZE,
};
pub use error::{ErrorKind, MonitorError, Result};
pub use hw::{MonitorHw, VoltageReference};
pub use mmio::{MappedWindow, RegisterIo};
pub use platform::{CmsWindow, Platform, PlatformConfig, TransportKind};
pub use registry::{Region, RegionKind, Registry, TraceSample};
pub use runtime::{Monitor, MonitorState, Status};
pub use sampler::{CmsSampler, SamplerOutcome};

/// Serialises tests that touch the process-wide owner guard.
#[cfg(test)]
pub(crate) fn test_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
