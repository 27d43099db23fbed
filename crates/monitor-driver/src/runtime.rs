//! The Monitor session owner.
//!
//! One [`Monitor`] may be alive per process; it owns the device, the
//! region registry, the per-session transports and the CMS sampler.
//!
//! ```text
//!          start            DONE / stop          read_*
//!   Idle ────────▶ Busy ───────────────▶ Done ───────────▶ Draining
//!    ▲               │                    ▲ │                  │
//!    │ clean         │ stop               │ └──── start ───▶ Busy
//!    └───────────────┴────────────────────┴──────────────────┘
//! ```

use crate::device::{CharDevice, MonitorDevice, PollEvents};
use crate::dma::{select_transport, DmaTransport, DrainRequest, IoctlPollTransport};
use crate::error::{MonitorError, Result};
use crate::hw::{MonitorHw, VoltageReference};
use crate::platform::PlatformConfig;
use crate::registry::{Region, RegionKind, Registry, TraceSample};
use crate::sampler::CmsSampler;
use monitor_chip::bram;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, trace, warn};

static OWNER_LIVE: AtomicBool = AtomicBool::new(false);

/// Process-wide claim on the hardware; released on drop.
#[derive(Debug)]
struct OwnerGuard;

impl OwnerGuard {
    fn acquire() -> Result<Self> {
        OWNER_LIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self)
            .map_err(|_| MonitorError::state("a Monitor session is already open in this process"))
    }
}

impl Drop for OwnerGuard {
    fn drop(&mut self) {
        OWNER_LIVE.store(false, Ordering::Release);
    }
}

/// Acquisition lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Configured, no acquisition yet (or cleaned)
    Idle,
    /// Acquisition running
    Busy,
    /// Acquisition finished; banks are readable
    Done,
    /// A bank is being copied into its region
    Draining,
}

/// Snapshot of the control block and session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// Session state
    pub state: MonitorState,
    /// BUSY bit
    pub busy: bool,
    /// DONE bit
    pub done: bool,
    /// AXI sniffer enabled
    pub axi_sniffer: bool,
    /// Elapsed cycles register
    pub elapsed_cycles: u32,
    /// Power samples available
    pub power_count: u32,
    /// Trace samples available
    pub traces_count: u32,
    /// ADC error counter
    pub power_errors: u32,
    /// CMS sampler thread alive
    pub sampler_running: bool,
}

/// An open Monitor session.
#[derive(Debug)]
pub struct Monitor {
    config: PlatformConfig,
    state: MonitorState,
    registry: Registry,
    sampler: Option<CmsSampler>,
    cms_count: usize,
    sampler_error: Option<MonitorError>,
    power_transport: Option<Box<dyn DmaTransport>>,
    traces_transport: Box<dyn DmaTransport>,
    device: Box<dyn MonitorDevice>,
    _owner: OwnerGuard,
}

impl Monitor {
    /// Open the device named by `config` and start a session.
    ///
    /// On failure nothing stays acquired.
    ///
    /// # Errors
    ///
    /// - [`MonitorError::State`] if another session is alive
    /// - [`MonitorError::Config`] if `config` is inconsistent
    /// - [`MonitorError::NoDevice`] / [`MonitorError::MapFailed`] from the device
    pub fn init(config: PlatformConfig) -> Result<Self> {
        let owner = OwnerGuard::acquire()?;
        config.validate()?;
        let device = CharDevice::open(&config)?;
        Self::assemble(config, Box::new(device), owner)
    }

    /// Start a session on an already opened device.
    ///
    /// # Errors
    ///
    /// As [`Self::init`], minus the device errors.
    pub fn with_device(config: PlatformConfig, device: Box<dyn MonitorDevice>) -> Result<Self> {
        let owner = OwnerGuard::acquire()?;
        config.validate()?;
        Self::assemble(config, device, owner)
    }

    fn assemble(
        config: PlatformConfig,
        device: Box<dyn MonitorDevice>,
        owner: OwnerGuard,
    ) -> Result<Self> {
        if !config.has_on_chip_adc && device.cms().is_none() {
            return Err(MonitorError::config(format!(
                "{} exposes no CMS window",
                device.path().display()
            )));
        }
        let traces_transport = select_transport(&config)?;
        let power_transport = config
            .has_on_chip_adc
            .then(|| Box::new(IoctlPollTransport) as Box<dyn DmaTransport>);

        info!(
            "Monitor session on {} ({}, traces via {})",
            device.path().display(),
            config.platform,
            traces_transport.name()
        );

        Ok(Self {
            config,
            state: MonitorState::Idle,
            registry: Registry::new(),
            sampler: None,
            cms_count: 0,
            sampler_error: None,
            power_transport,
            traces_transport,
            device,
            _owner: owner,
        })
    }

    /// Session configuration.
    pub const fn config(&self) -> &PlatformConfig {
        &self.config
    }

    /// Lifecycle state as last observed.
    pub const fn state(&self) -> MonitorState {
        self.state
    }

    fn hw(&self) -> MonitorHw<'_> {
        MonitorHw::new(self.device.control())
    }

    /// Pick up a hardware completion nobody waited for.
    fn refresh(&mut self) -> Result<()> {
        if self.state == MonitorState::Busy && self.hw().is_done()? {
            debug!("Acquisition finished");
            self.state = MonitorState::Done;
        }
        Ok(())
    }

    fn require_configurable(&mut self, what: &str) -> Result<()> {
        self.refresh()?;
        if self.state == MonitorState::Busy {
            return Err(MonitorError::state(format!(
                "{what} while an acquisition is running"
            )));
        }
        Ok(())
    }

    // ── Regions ─────────────────────────────────────────────────────────────

    /// Register a zeroed `kind` region of `count` elements.
    ///
    /// # Errors
    ///
    /// [`MonitorError::Duplicate`] or [`MonitorError::NoMemory`].
    pub fn alloc(&mut self, count: usize, name: &str, kind: RegionKind) -> Result<&mut [u8]> {
        self.registry.alloc(count, name, kind)
    }

    /// Release the region called `name`.
    ///
    /// # Errors
    ///
    /// [`MonitorError::NotFound`], or [`MonitorError::State`] while the
    /// CMS sampler holds it.
    pub fn free(&mut self, name: &str) -> Result<()> {
        self.registry.free(name)
    }

    /// Region registered for `kind`.
    pub const fn region(&self, kind: RegionKind) -> Option<&Region> {
        self.registry.slot(kind)
    }

    /// All registered regions.
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Power region contents, unless lent to the sampler.
    pub fn power_samples(&self) -> Option<&[u32]> {
        self.region(RegionKind::Power)
            .filter(|region| !region.is_lent())
            .and_then(Region::power)
    }

    /// Traces region contents.
    pub fn traces(&self) -> Option<&[TraceSample]> {
        self.region(RegionKind::Traces).and_then(Region::traces)
    }

    // ── Configuration ───────────────────────────────────────────────────────

    /// Select the ADC range. The last call before [`Self::start`] wins.
    ///
    /// # Errors
    ///
    /// [`MonitorError::State`] during an acquisition.
    pub fn config_vref(&mut self, vref: VoltageReference) -> Result<()> {
        self.require_configurable("config_vref")?;
        self.hw().config_vref(vref)
    }

    /// Set the signal trigger mask.
    ///
    /// # Errors
    ///
    /// [`MonitorError::State`] during an acquisition.
    pub fn set_trigger_mask(&mut self, mask: u32) -> Result<()> {
        self.require_configurable("set_trigger_mask")?;
        self.hw().set_trigger_mask(mask)
    }

    /// Set the AXI trigger mask and enable the sniffer.
    ///
    /// # Errors
    ///
    /// [`MonitorError::State`] during an acquisition.
    pub fn set_axi_trigger_mask(&mut self, mask: u32) -> Result<()> {
        self.require_configurable("set_axi_trigger_mask")?;
        self.hw().set_axi_trigger_mask(mask)
    }

    // ── Acquisition ─────────────────────────────────────────────────────────

    /// Start an acquisition. Waits for BUSY to clear, then writes START.
    ///
    /// Without an on-chip ADC this also lends the power region to the CMS
    /// sampler until [`Self::stop`].
    ///
    /// # Errors
    ///
    /// - [`MonitorError::State`] if an acquisition is running
    /// - [`MonitorError::Sampler`] if the sampler cannot start
    pub fn start(&mut self) -> Result<()> {
        self.refresh()?;
        if !matches!(self.state, MonitorState::Idle | MonitorState::Done) {
            return Err(MonitorError::state(format!(
                "cannot start while {:?}",
                self.state
            )));
        }
        self.stop_sampler();

        let spins = self.hw().start()?;
        self.state = MonitorState::Busy;
        debug!("Acquisition started after {spins} busy reads");

        if !self.config.has_on_chip_adc {
            if let Err(e) = self.start_sampler() {
                warn!("Stopping acquisition: {e}");
                self.hw().stop()?;
                self.state = MonitorState::Done;
                return Err(e);
            }
        }
        Ok(())
    }

    fn start_sampler(&mut self) -> Result<()> {
        let (Some(window), Some(layout)) = (self.device.cms(), self.config.cms) else {
            return Err(MonitorError::config("no CMS window on this device"));
        };
        self.cms_count = 0;
        self.sampler_error = None;

        let Some(capacity) = self.registry.slot(RegionKind::Power).map(Region::capacity) else {
            warn!("No power region registered; CMS samples are not recorded");
            return Ok(());
        };
        let Some(buffer) = self.registry.lend_power() else {
            return Err(MonitorError::state("power region is already lent"));
        };

        match CmsSampler::start(window, layout, self.config.sample_period, buffer) {
            Ok(sampler) => {
                self.sampler = Some(sampler);
                Ok(())
            }
            Err(e) => {
                self.registry.restore_power(vec![0; capacity]);
                Err(e)
            }
        }
    }

    fn stop_sampler(&mut self) {
        let Some(sampler) = self.sampler.take() else {
            return;
        };
        let outcome = sampler.stop();
        self.cms_count = outcome.count;
        if let Some(e) = outcome.error {
            warn!("CMS sampler reported: {e}");
            self.sampler_error = Some(e);
        }
        self.registry.restore_power(outcome.buffer);
    }

    /// End the acquisition. Safe to call any number of times.
    ///
    /// Joins the CMS sampler if one runs, and writes STOP only when the IP
    /// has not finished on its own.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn stop(&mut self) -> Result<()> {
        self.stop_sampler();
        let hw = self.hw();
        if !hw.is_done()? {
            hw.stop()?;
        }
        if self.state == MonitorState::Busy {
            self.state = MonitorState::Done;
        }
        Ok(())
    }

    /// Write STOP unconditionally and return to [`MonitorState::Idle`].
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn clean(&mut self) -> Result<()> {
        self.stop_sampler();
        self.hw().stop()?;
        self.state = MonitorState::Idle;
        debug!("Monitor cleaned");
        Ok(())
    }

    /// Block until the IP reports DONE. No timeout.
    ///
    /// # Errors
    ///
    /// - [`MonitorError::State`] if nothing was started
    /// - [`MonitorError::Io`] if poll fails
    pub fn wait_done(&mut self) -> Result<()> {
        match self.state {
            MonitorState::Done => return Ok(()),
            MonitorState::Busy => {}
            other => {
                return Err(MonitorError::state(format!(
                    "wait_done with no acquisition running ({other:?})"
                )))
            }
        }
        while !self.hw().is_done()? {
            let ready = self.device.poll(PollEvents::IRQ)?;
            trace!("poll woke: {ready:?}");
        }
        self.state = MonitorState::Done;
        debug!("Acquisition done");
        Ok(())
    }

    // ── Drain ───────────────────────────────────────────────────────────────

    /// Copy the first `ndata` power samples into the power region.
    ///
    /// Without an on-chip ADC the samples are already in place after
    /// [`Self::stop`] and no transfer happens.
    ///
    /// # Errors
    ///
    /// See [`Self::read_traces`].
    pub fn read_power(&mut self, ndata: usize) -> Result<()> {
        self.read_region(RegionKind::Power, ndata)
    }

    /// Copy the first `ndata` trace samples into the traces region.
    ///
    /// # Errors
    ///
    /// - [`MonitorError::State`] before DONE, when `ndata` exceeds the
    ///   region, or while the sampler holds the region
    /// - [`MonitorError::NotFound`] if no region is registered
    /// - [`MonitorError::Alignment`] if the byte length is not a multiple of 16
    /// - Transport errors; the region is then unspecified but intact
    pub fn read_traces(&mut self, ndata: usize) -> Result<()> {
        self.read_region(RegionKind::Traces, ndata)
    }

    fn read_region(&mut self, kind: RegionKind, ndata: usize) -> Result<()> {
        self.refresh()?;
        if self.state != MonitorState::Done {
            return Err(MonitorError::state(format!(
                "{kind} read needs a finished acquisition, state is {:?}",
                self.state
            )));
        }
        if ndata == 0 {
            trace!("Empty {kind} read");
            return Ok(());
        }

        let region = self
            .registry
            .slot(kind)
            .ok_or_else(|| MonitorError::not_found(format!("{kind} region")))?;
        if region.is_lent() {
            return Err(MonitorError::state(format!(
                "{kind} region is held by the CMS sampler; stop first"
            )));
        }
        if ndata > region.capacity() {
            return Err(MonitorError::state(format!(
                "{ndata} {kind} samples exceed region '{}' of {}",
                region.name(),
                region.capacity()
            )));
        }
        let len = ndata * kind.element_size();
        if !bram::is_transfer_aligned(len) {
            return Err(MonitorError::Alignment { bytes: len });
        }

        let transport: &dyn DmaTransport = match kind {
            RegionKind::Power => match self.power_transport.as_deref() {
                Some(transport) => transport,
                None => {
                    debug!("{ndata} power samples already in place from the CMS");
                    return Ok(());
                }
            },
            RegionKind::Traces => self.traces_transport.as_ref(),
        };
        let request = DrainRequest {
            kind,
            hwaddr: match kind {
                RegionKind::Power => self.config.power_bram_addr,
                RegionKind::Traces => self.config.traces_bram_addr,
            },
            len,
        };

        self.state = MonitorState::Draining;
        let registry = &mut self.registry;
        let result = transport.drain(self.device.as_ref(), &request, &mut |bytes| {
            let region = registry
                .slot_mut(kind)
                .ok_or(MonitorError::RegionGone { kind })?;
            region.bytes_mut()[..bytes.len()].copy_from_slice(bytes);
            Ok(())
        });
        self.state = MonitorState::Done;

        result?;
        debug!("Read {ndata} {kind} samples");
        Ok(())
    }

    // ── Status ──────────────────────────────────────────────────────────────

    /// Cycles the last acquisition ran.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn elapsed_cycles(&self) -> Result<u32> {
        self.hw().elapsed_cycles()
    }

    /// Power samples available: from the IP, or from the CMS sampler.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn power_count(&self) -> Result<u32> {
        if self.config.has_on_chip_adc {
            return self.hw().power_count();
        }
        let count = self.sampler.as_ref().map_or(self.cms_count, CmsSampler::count);
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    /// Trace samples available.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn traces_count(&self) -> Result<u32> {
        self.hw().traces_count()
    }

    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn is_busy(&self) -> Result<bool> {
        self.hw().is_busy()
    }

    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn is_done(&self) -> Result<bool> {
        self.hw().is_done()
    }

    /// ADC errors during the last acquisition.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn power_errors(&self) -> Result<u32> {
        self.hw().power_errors()
    }

    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn axi_sniffer_enabled(&self) -> Result<bool> {
        self.hw().axi_sniffer_enabled()
    }

    /// Error latched by the last CMS sampler run.
    pub const fn sampler_error(&self) -> Option<&MonitorError> {
        self.sampler_error.as_ref()
    }

    /// Snapshot of the control block and session.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn status(&self) -> Result<Status> {
        let hw = self.hw();
        let word = hw.status()?;
        Ok(Status {
            state: self.state,
            busy: word & monitor_chip::regs::status::BUSY != 0,
            done: word & monitor_chip::regs::status::DONE != 0,
            axi_sniffer: word & monitor_chip::regs::status::AXI_SNIFFER_ENABLE_OUT != 0,
            elapsed_cycles: hw.elapsed_cycles()?,
            power_count: self.power_count()?,
            traces_count: hw.traces_count()?,
            power_errors: monitor_chip::regs::power_errors(word),
            sampler_running: self.sampler.as_ref().is_some_and(CmsSampler::is_running),
        })
    }

    /// Close the session.
    ///
    /// Stops the sampler and releases the device. Regions still registered
    /// are dropped with a warning.
    pub fn exit(self) {
        drop(self);
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop_sampler();
        for region in self.registry.iter() {
            warn!(
                "Region '{}' ({}) still registered at exit",
                region.name(),
                region.kind()
            );
        }
        info!("Closing Monitor session on {}", self.device.path().display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{SimConfig, SimulatedMonitor};
    use crate::platform::Platform;
    use crate::ErrorKind;

    fn open(sim: SimConfig) -> (Monitor, SimulatedMonitor) {
        let config = PlatformConfig::default();
        let device = SimulatedMonitor::with_sim(&config, sim);
        let monitor = Monitor::with_device(config, Box::new(device.clone())).unwrap();
        (monitor, device)
    }

    #[test]
    fn one_session_per_process() {
        let _lock = crate::test_lock();
        let (monitor, _) = open(SimConfig::default());
        let config = PlatformConfig::default();
        let second = Monitor::with_device(config.clone(), Box::new(SimulatedMonitor::new(&config)));
        assert_eq!(second.unwrap_err().kind(), ErrorKind::State);

        monitor.exit();
        Monitor::with_device(config.clone(), Box::new(SimulatedMonitor::new(&config))).unwrap();
    }

    #[test]
    fn failed_init_releases_the_claim() {
        let _lock = crate::test_lock();
        let config = PlatformConfig::default().with_device_path("/nonexistent/monitor");
        assert_eq!(Monitor::init(config).unwrap_err().kind(), ErrorKind::NoDevice);
        let (_monitor, _) = open(SimConfig::default());
    }

    #[test]
    fn reads_need_a_finished_acquisition() {
        let _lock = crate::test_lock();
        let (mut monitor, _) = open(SimConfig {
            completion_polls: None,
            ..SimConfig::default()
        });
        monitor.alloc(16, "p", RegionKind::Power).unwrap();
        assert_eq!(monitor.read_power(16).unwrap_err().kind(), ErrorKind::State);

        monitor.start().unwrap();
        assert_eq!(monitor.state(), MonitorState::Busy);
        assert_eq!(monitor.read_power(16).unwrap_err().kind(), ErrorKind::State);
        assert_eq!(monitor.read_power(0).unwrap_err().kind(), ErrorKind::State);
    }

    #[test]
    fn drain_checks_size_before_touching_the_region() {
        let _lock = crate::test_lock();
        let (mut monitor, device) = open(SimConfig::default());
        monitor.alloc(16, "p", RegionKind::Power).unwrap();
        monitor.start().unwrap();
        monitor.wait_done().unwrap();

        assert_eq!(monitor.read_power(17).unwrap_err().kind(), ErrorKind::State);
        assert_eq!(monitor.read_power(3).unwrap_err().kind(), ErrorKind::Alignment);
        assert_eq!(monitor.read_traces(4).unwrap_err().kind(), ErrorKind::NotFound);
        assert!(monitor.power_samples().unwrap().iter().all(|&p| p == 0));
        assert_eq!(device.ioctl_count(), 0);
        assert_eq!(monitor.state(), MonitorState::Done);
    }

    #[test]
    fn failed_ioctl_releases_staging() {
        let _lock = crate::test_lock();
        let (mut monitor, device) = open(SimConfig::default());
        monitor.alloc(16, "t", RegionKind::Traces).unwrap();
        monitor.start().unwrap();
        monitor.wait_done().unwrap();

        device.fail_next_ioctl();
        assert_eq!(monitor.read_traces(16).unwrap_err().kind(), ErrorKind::Io);
        assert_eq!(device.live_staging(), 0);
        assert_eq!(monitor.state(), MonitorState::Done);

        monitor.read_traces(16).unwrap();
        assert_eq!(device.live_staging(), 0);
    }

    #[test]
    fn configuration_is_rejected_while_busy() {
        let _lock = crate::test_lock();
        let (mut monitor, device) = open(SimConfig {
            completion_polls: None,
            ..SimConfig::default()
        });
        monitor.config_vref(VoltageReference::Single).unwrap();
        monitor.config_vref(VoltageReference::Double).unwrap();
        assert_eq!(device.vref(), Some(VoltageReference::Double));

        monitor.start().unwrap();
        let err = monitor.set_trigger_mask(1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
        assert_eq!(monitor.start().unwrap_err().kind(), ErrorKind::State);

        monitor.stop().unwrap();
        monitor.set_trigger_mask(0xFF).unwrap();
        monitor.set_axi_trigger_mask(0x0F).unwrap();
        assert_eq!(device.trigger_mask(), 0xFF);
        assert_eq!(device.axi_trigger_mask(), 0x0F);
        assert!(monitor.axi_sniffer_enabled().unwrap());
    }

    #[test]
    fn wait_done_rechecks_after_spurious_wakeups() {
        let _lock = crate::test_lock();
        let (mut monitor, device) = open(SimConfig {
            completion_polls: Some(3),
            ..SimConfig::default()
        });
        device.spurious_wakeups(2);
        monitor.start().unwrap();
        monitor.wait_done().unwrap();

        assert_eq!(device.irq_wakeups(), 3);
        assert_eq!(monitor.state(), MonitorState::Done);
        assert!(monitor.is_done().unwrap());
        assert_eq!(monitor.power_count().unwrap(), 64);
    }

    #[test]
    fn hang_up_ends_the_wait() {
        let _lock = crate::test_lock();
        let (mut monitor, device) = open(SimConfig {
            completion_polls: None,
            ..SimConfig::default()
        });
        monitor.start().unwrap();
        device.hang_up();
        assert_eq!(monitor.wait_done().unwrap_err().kind(), ErrorKind::Io);
        assert_eq!(monitor.state(), MonitorState::Busy);
    }

    #[test]
    fn hang_up_during_drain_is_an_io_error() {
        let _lock = crate::test_lock();
        let (mut monitor, device) = open(SimConfig::default());
        monitor.alloc(16, "t", RegionKind::Traces).unwrap();
        monitor.start().unwrap();
        monitor.wait_done().unwrap();

        device.hang_up();
        assert_eq!(monitor.read_traces(16).unwrap_err().kind(), ErrorKind::Io);
        assert_eq!(device.live_staging(), 0);
        assert_eq!(monitor.state(), MonitorState::Done);
    }

    #[test]
    fn stop_is_idempotent() {
        let _lock = crate::test_lock();
        let (mut monitor, device) = open(SimConfig {
            completion_polls: None,
            ..SimConfig::default()
        });
        monitor.start().unwrap();
        monitor.stop().unwrap();
        let after_first = device.commands();
        monitor.stop().unwrap();
        assert_eq!(device.commands(), after_first);
        assert_eq!(monitor.state(), MonitorState::Done);
    }

    #[test]
    fn clean_always_writes_stop() {
        let _lock = crate::test_lock();
        let (mut monitor, device) = open(SimConfig::default());
        monitor.start().unwrap();
        monitor.wait_done().unwrap();
        monitor.clean().unwrap();
        assert_eq!(monitor.state(), MonitorState::Idle);
        assert_eq!(device.commands().last(), Some(&monitor_chip::regs::command::STOP));
        assert_eq!(monitor.wait_done().unwrap_err().kind(), ErrorKind::State);
    }

    #[test]
    fn status_snapshot() {
        let _lock = crate::test_lock();
        let (mut monitor, _) = open(SimConfig {
            power_errors: 2,
            ..SimConfig::default()
        });
        monitor.start().unwrap();
        monitor.wait_done().unwrap();
        let status = monitor.status().unwrap();
        assert_eq!(status.state, MonitorState::Done);
        assert!(status.done && !status.busy);
        assert_eq!(status.power_count, 64);
        assert_eq!(status.power_errors, 2);
        assert!(status.power_errors <= status.power_count);
        assert!(!status.sampler_running);
    }

    #[test]
    fn cms_platform_needs_a_cms_window() {
        let _lock = crate::test_lock();
        let config = PlatformConfig::preset(Platform::AlveoU250);
        let device = SimulatedMonitor::new(&PlatformConfig::default());
        let err = Monitor::with_device(config, Box::new(device)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
