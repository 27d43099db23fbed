// SPDX-License-Identifier: GPL-2.0-only

//! Simulated Monitor (virtual IP + kernel driver)
//!
//! Implements [`MonitorDevice`] on top of an in-process model of:
//!
//! 1. **The control block**: START raises BUSY, DONE follows after a
//!    configurable number of status reads or IRQ polls (each read sees the
//!    state before it advances time), STOP ends the run early. Index
//!    registers read `count - 1` like the hardware.
//!
//! 2. **The kernel driver**: staging mappings are tracked by user address,
//!    the HW->MEM ioctl validates its token the way the driver does and
//!    holds a device-wide lock until a poll reports DMA completion.
//!
//! 3. **The card manager** (optional): a 256 KiB word window with fixed
//!    current and voltage readings.
//!
//! BRAM banks come pre-filled with recognisable fixtures (`0xDEADBEEF` for
//! power, `0xCAFEBABE_12345678` for traces) that tests can overwrite.

use crate::device::{MonitorDevice, PollEvents, StagingBuffer};
use crate::dma::DmaToken;
use crate::error::{MonitorError, Result};
use crate::hw::VoltageReference;
use crate::mmio::RegisterIo;
use crate::platform::{CmsWindow, PlatformConfig};
use crate::registry::RegionKind;
use monitor_chip::contract;
use monitor_chip::regs::{self, command, status};
use rustix::io::Errno;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

/// Power bank fill pattern.
pub const POWER_FIXTURE: u32 = 0xDEAD_BEEF;
/// Traces bank fill pattern.
pub const TRACES_FIXTURE: u64 = 0xCAFE_BABE_1234_5678;

/// Behaviour of the simulated IP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConfig {
    /// Power samples reported when an acquisition completes on its own
    pub power_samples: u32,
    /// Trace samples reported when an acquisition completes on its own
    pub traces_samples: u32,
    /// Elapsed cycles reported on completion
    pub elapsed_cycles: u32,
    /// ADC errors reported on completion
    pub power_errors: u32,
    /// Status reads or IRQ polls until DONE; `None` runs until STOP
    pub completion_polls: Option<u32>,
    /// CMS current word
    pub cms_current: u32,
    /// CMS voltage word
    pub cms_voltage: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            power_samples: 64,
            traces_samples: 64,
            elapsed_cycles: 1_000,
            power_errors: 0,
            completion_polls: Some(1),
            cms_current: 1_500,
            cms_voltage: 12_000,
        }
    }
}

/// Software Monitor device.
///
/// Clones share the same IP, driver and banks.
#[derive(Debug, Clone)]
pub struct SimulatedMonitor {
    control: SimControl,
    cms: Option<Arc<SimCms>>,
}

#[derive(Debug)]
struct Shared {
    sim: SimConfig,
    power_bram_addr: u64,
    traces_bram_addr: u64,
    state: Mutex<State>,
    wake: Condvar,
}

#[derive(Debug)]
struct State {
    hw: HwModel,
    power_bank: Vec<u32>,
    traces_bank: Vec<u64>,
    staging: Vec<StagingEntry>,
    dma_locked: bool,
    dma_pending: bool,
    irq_pending: bool,
    fail_next_ioctl: bool,
    hung_up: bool,
    spurious_irqs: u32,
    irq_wakeups: usize,
    ioctls: usize,
    commands: Vec<u32>,
}

#[derive(Debug)]
struct HwModel {
    busy: bool,
    done: bool,
    axi_enabled: bool,
    vref: Option<VoltageReference>,
    trigger_mask: u32,
    axi_mask: u32,
    power_index: u32,
    traces_index: u32,
    elapsed: u32,
    errors: u32,
    polls_left: Option<u32>,
}

#[derive(Debug)]
struct StagingEntry {
    addr: usize,
    kind: RegionKind,
    data: Arc<Mutex<Vec<u8>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimulatedMonitor {
    /// Simulated device for `config` with default IP behaviour.
    pub fn new(config: &PlatformConfig) -> Self {
        Self::with_sim(config, SimConfig::default())
    }

    /// Simulated device for `config` with explicit IP behaviour.
    pub fn with_sim(config: &PlatformConfig, sim: SimConfig) -> Self {
        let cms = match config.cms {
            Some(layout) if !config.has_on_chip_adc => {
                Some(Arc::new(SimCms::new(layout, sim.cms_current, sim.cms_voltage)))
            }
            _ => None,
        };
        let state = State {
            hw: HwModel {
                busy: false,
                done: false,
                axi_enabled: false,
                vref: None,
                trigger_mask: 0,
                axi_mask: 0,
                power_index: u32::MAX,
                traces_index: u32::MAX,
                elapsed: 0,
                errors: 0,
                polls_left: None,
            },
            power_bank: vec![POWER_FIXTURE; config.bank_capacity(RegionKind::Power.element_size())],
            traces_bank: vec![
                TRACES_FIXTURE;
                config.bank_capacity(RegionKind::Traces.element_size())
            ],
            staging: Vec::new(),
            dma_locked: false,
            dma_pending: false,
            irq_pending: false,
            fail_next_ioctl: false,
            hung_up: false,
            spurious_irqs: 0,
            irq_wakeups: 0,
            ioctls: 0,
            commands: Vec::new(),
        };
        let shared = Arc::new(Shared {
            sim,
            power_bram_addr: config.power_bram_addr,
            traces_bram_addr: config.traces_bram_addr,
            state: Mutex::new(state),
            wake: Condvar::new(),
        });
        debug!("Simulated Monitor for {}", config.platform);
        Self {
            control: SimControl { shared },
            cms,
        }
    }

    fn shared(&self) -> &Shared {
        &self.control.shared
    }

    /// Overwrite the start of the power bank.
    pub fn load_power_bank(&self, words: &[u32]) {
        let mut state = lock(&self.shared().state);
        let n = words.len().min(state.power_bank.len());
        state.power_bank[..n].copy_from_slice(&words[..n]);
    }

    /// Overwrite the start of the traces bank.
    pub fn load_traces_bank(&self, words: &[u64]) {
        let mut state = lock(&self.shared().state);
        let n = words.len().min(state.traces_bank.len());
        state.traces_bank[..n].copy_from_slice(&words[..n]);
    }

    /// Make the next HW->MEM ioctl fail with `EIO`.
    pub fn fail_next_ioctl(&self) {
        lock(&self.shared().state).fail_next_ioctl = true;
    }

    /// Report the next `n` IRQ polls as ready without raising DONE.
    pub fn spurious_wakeups(&self, n: u32) {
        lock(&self.shared().state).spurious_irqs = n;
    }

    /// Unbind the driver: every poll from now on fails.
    pub fn hang_up(&self) {
        let shared = self.shared();
        lock(&shared.state).hung_up = true;
        shared.wake.notify_all();
    }

    /// Polls that returned IRQ, spurious ones included.
    pub fn irq_wakeups(&self) -> usize {
        lock(&self.shared().state).irq_wakeups
    }

    /// Staging mappings currently alive.
    pub fn live_staging(&self) -> usize {
        lock(&self.shared().state).staging.len()
    }

    /// HW->MEM ioctls accepted so far.
    pub fn ioctl_count(&self) -> usize {
        lock(&self.shared().state).ioctls
    }

    /// Commands written to register 0, oldest first.
    pub fn commands(&self) -> Vec<u32> {
        lock(&self.shared().state).commands.clone()
    }

    /// Voltage reference last configured.
    pub fn vref(&self) -> Option<VoltageReference> {
        lock(&self.shared().state).hw.vref
    }

    /// Trigger mask last written.
    pub fn trigger_mask(&self) -> u32 {
        lock(&self.shared().state).hw.trigger_mask
    }

    /// AXI trigger mask last written.
    pub fn axi_trigger_mask(&self) -> u32 {
        lock(&self.shared().state).hw.axi_mask
    }

    /// Card-manager reset word, if there is a card manager.
    pub fn cms_reset(&self) -> Option<u32> {
        let cms = self.cms.as_ref()?;
        cms.read32(cms.layout.reset_word).ok()
    }

    fn bank_for(&self, kind: RegionKind) -> u64 {
        match kind {
            RegionKind::Power => self.shared().power_bram_addr,
            RegionKind::Traces => self.shared().traces_bram_addr,
        }
    }
}

impl MonitorDevice for SimulatedMonitor {
    fn path(&self) -> &Path {
        Path::new("sim://monitor")
    }

    fn control(&self) -> &dyn RegisterIo {
        &self.control
    }

    fn cms(&self) -> Option<Arc<dyn RegisterIo>> {
        self.cms
            .as_ref()
            .map(|cms| Arc::clone(cms) as Arc<dyn RegisterIo>)
    }

    fn map_staging(&self, kind: RegionKind, len: usize) -> Result<Box<dyn StagingBuffer>> {
        if len == 0 {
            return Err(MonitorError::NoMemory { bytes: 0 });
        }
        let data = Arc::new(Mutex::new(vec![0u8; len]));
        let addr = lock(&data).as_ptr() as usize;
        lock(&self.shared().state).staging.push(StagingEntry {
            addr,
            kind,
            data: Arc::clone(&data),
        });
        trace!("sim: {kind} staging at {addr:#x}, {len} bytes");
        Ok(Box::new(SimStaging {
            shared: Arc::clone(&self.control.shared),
            addr,
            len,
            data,
        }))
    }

    fn dma_hw2mem(&self, kind: RegionKind, token: &DmaToken) -> Result<()> {
        let request = DmaToken::request(kind);
        if contract::ioc_type(request) != contract::IOC_MAGIC
            || contract::ioc_nr(request) > contract::IOC_MAXNR
        {
            return Err(Errno::NOTTY.into());
        }

        let shared = self.shared();
        let mut state = lock(&shared.state);
        while state.dma_locked {
            state = shared.wake.wait(state).unwrap_or_else(PoisonError::into_inner);
        }

        if std::mem::take(&mut state.fail_next_ioctl) {
            return Err(Errno::IO.into());
        }

        let Some(entry) = state.staging.iter().find(|entry| entry.addr == token.memaddr) else {
            debug!("sim: no staging mapping at {:#x}", token.memaddr);
            return Err(Errno::INVAL.into());
        };
        let staging_len = lock(&entry.data).len();
        let bank_len = match kind {
            RegionKind::Power => state.power_bank.len() * kind.element_size(),
            RegionKind::Traces => state.traces_bank.len() * kind.element_size(),
        };
        let bank_ok = u64::try_from(token.hwaddr).is_ok_and(|hw| hw == self.bank_for(kind));
        if entry.kind != kind
            || token.memoff + token.size > staging_len
            || token.hwoff + token.size > bank_len
            || !bank_ok
        {
            debug!("sim: rejected {kind} token {token:?}");
            return Err(Errno::INVAL.into());
        }

        let bank: &[u8] = match kind {
            RegionKind::Power => bytemuck::cast_slice(&state.power_bank),
            RegionKind::Traces => bytemuck::cast_slice(&state.traces_bank),
        };
        let src = &bank[token.hwoff..token.hwoff + token.size];
        lock(&entry.data)[token.memoff..token.memoff + token.size].copy_from_slice(src);

        state.ioctls += 1;
        state.dma_locked = true;
        state.dma_pending = true;
        shared.wake.notify_all();
        Ok(())
    }

    fn poll(&self, events: PollEvents) -> Result<PollEvents> {
        let shared = self.shared();
        let mut state = lock(&shared.state);
        loop {
            if state.hung_up {
                return Err(std::io::Error::other("sim: poll reported HUP").into());
            }
            let mut ready = PollEvents::empty();
            if events.contains(PollEvents::DMA) && state.dma_pending {
                state.dma_pending = false;
                state.dma_locked = false;
                ready |= PollEvents::DMA;
                shared.wake.notify_all();
            }
            if events.contains(PollEvents::IRQ) && state.irq_pending {
                state.irq_pending = false;
                ready |= PollEvents::IRQ;
            } else if events.contains(PollEvents::IRQ) && state.spurious_irqs > 0 {
                state.spurious_irqs -= 1;
                ready |= PollEvents::IRQ;
            }
            if ready.contains(PollEvents::IRQ) {
                state.irq_wakeups += 1;
            }
            if !ready.is_empty() {
                return Ok(ready);
            }
            // Waiting for the interrupt lets simulated time pass.
            if events.contains(PollEvents::IRQ) && state.tick(&shared.sim) {
                continue;
            }
            state = shared.wake.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl State {
    /// Advance a running acquisition by one step. Returns whether it ran.
    fn tick(&mut self, sim: &SimConfig) -> bool {
        let hw = &mut self.hw;
        if !hw.busy {
            return false;
        }
        let Some(left) = hw.polls_left.as_mut() else {
            return false;
        };
        *left = left.saturating_sub(1);
        hw.elapsed = hw.elapsed.wrapping_add(1);
        if *left == 0 {
            hw.polls_left = None;
            hw.busy = false;
            hw.done = true;
            hw.power_index = sim.power_samples.wrapping_sub(1);
            hw.traces_index = sim.traces_samples.wrapping_sub(1);
            hw.elapsed = sim.elapsed_cycles;
            hw.errors = sim.power_errors.min(sim.power_samples);
            self.irq_pending = true;
            trace!("sim: acquisition complete");
        }
        true
    }

    fn command(&mut self, sim: &SimConfig, value: u32) {
        self.commands.push(value);
        let hw = &mut self.hw;
        match value {
            command::CONFIG_VREF => hw.vref = Some(VoltageReference::Single),
            command::CONFIG_2VREF => hw.vref = Some(VoltageReference::Double),
            command::START => {
                hw.busy = true;
                hw.done = false;
                hw.power_index = u32::MAX;
                hw.traces_index = u32::MAX;
                hw.elapsed = 0;
                hw.errors = 0;
                hw.polls_left = sim.completion_polls;
                self.irq_pending = false;
            }
            command::STOP => {
                if hw.busy {
                    self.irq_pending = true;
                }
                hw.busy = false;
                hw.done = true;
                hw.polls_left = None;
            }
            command::AXI_SNIFFER_ENABLE => hw.axi_enabled = true,
            other => trace!("sim: ignored command {other:#x}"),
        }
    }

    fn status(&self) -> u32 {
        let hw = &self.hw;
        let mut word = hw.errors << status::POWER_ERRORS_SHIFT;
        if hw.busy {
            word |= status::BUSY;
        }
        if hw.done {
            word |= status::DONE;
        }
        if hw.axi_enabled {
            word |= status::AXI_SNIFFER_ENABLE_OUT;
        }
        word
    }
}

/// Control block of the simulated IP.
#[derive(Debug, Clone)]
struct SimControl {
    shared: Arc<Shared>,
}

impl SimControl {
    fn check(word: usize) -> Result<()> {
        let limit = regs::CONTROL_WINDOW_SIZE / 4;
        if word >= limit {
            return Err(MonitorError::OutOfBounds { word, limit });
        }
        Ok(())
    }
}

impl RegisterIo for SimControl {
    fn read32(&self, word: usize) -> Result<u32> {
        Self::check(word)?;
        let mut state = lock(&self.shared.state);
        Ok(match word {
            regs::REG0 => {
                let word = state.status();
                if state.tick(&self.shared.sim) && state.irq_pending {
                    self.shared.wake.notify_all();
                }
                word
            }
            regs::ELAPSED_CYCLES => state.hw.elapsed,
            regs::POWER_INDEX => state.hw.power_index,
            regs::TRACES_INDEX => state.hw.traces_index,
            _ => 0,
        })
    }

    fn write32(&self, word: usize, value: u32) -> Result<()> {
        Self::check(word)?;
        let mut state = lock(&self.shared.state);
        match word {
            regs::REG0 => {
                state.command(&self.shared.sim, value);
                self.shared.wake.notify_all();
            }
            regs::AXI_TRIGGER_MASK => state.hw.axi_mask = value,
            regs::TRIGGER_MASK => state.hw.trigger_mask = value,
            _ => {}
        }
        Ok(())
    }

    fn words(&self) -> usize {
        regs::CONTROL_WINDOW_SIZE / 4
    }
}

/// Card-manager window with constant sensor readings.
#[derive(Debug)]
struct SimCms {
    layout: CmsWindow,
    words: Mutex<Vec<u32>>,
}

impl SimCms {
    fn new(layout: CmsWindow, current: u32, voltage: u32) -> Self {
        let mut words = vec![0; layout.size / 4];
        if let Some(w) = words.get_mut(layout.current()) {
            *w = current;
        }
        if let Some(w) = words.get_mut(layout.voltage()) {
            *w = voltage;
        }
        Self {
            layout,
            words: Mutex::new(words),
        }
    }
}

impl RegisterIo for SimCms {
    fn read32(&self, word: usize) -> Result<u32> {
        let words = lock(&self.words);
        words.get(word).copied().ok_or(MonitorError::OutOfBounds {
            word,
            limit: words.len(),
        })
    }

    fn write32(&self, word: usize, value: u32) -> Result<()> {
        let mut words = lock(&self.words);
        let limit = words.len();
        let slot = words
            .get_mut(word)
            .ok_or(MonitorError::OutOfBounds { word, limit })?;
        *slot = value;
        Ok(())
    }

    fn words(&self) -> usize {
        self.layout.size / 4
    }
}

/// Staging mapping handed out by the simulated driver.
#[derive(Debug)]
struct SimStaging {
    shared: Arc<Shared>,
    addr: usize,
    len: usize,
    data: Arc<Mutex<Vec<u8>>>,
}

impl StagingBuffer for SimStaging {
    fn user_addr(&self) -> usize {
        self.addr
    }

    fn len(&self) -> usize {
        self.len
    }

    fn copy_out(&self, sink: &mut dyn FnMut(&[u8]) -> Result<()>) -> Result<()> {
        sink(&lock(&self.data))
    }
}

impl Drop for SimStaging {
    fn drop(&mut self) {
        let mut state = lock(&self.shared.state);
        state.staging.retain(|entry| entry.addr != self.addr);
        // Scribble over the pages the way a reused mapping would.
        lock(&self.data).fill(0x5A);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dma::{DmaTransport, DrainRequest, IoctlPollTransport};
    use crate::hw::MonitorHw;
    use crate::platform::Platform;

    fn sim() -> SimulatedMonitor {
        SimulatedMonitor::new(&PlatformConfig::default())
    }

    #[test]
    fn start_then_done_after_configured_polls() {
        let config = PlatformConfig::default();
        let device = SimulatedMonitor::with_sim(
            &config,
            SimConfig {
                completion_polls: Some(3),
                ..SimConfig::default()
            },
        );
        let hw = MonitorHw::new(device.control());
        hw.start().unwrap();
        assert!(hw.is_busy().unwrap());
        assert!(hw.is_busy().unwrap());
        assert!(hw.is_busy().unwrap());
        assert!(hw.is_done().unwrap());
        assert_eq!(hw.power_count().unwrap(), 64);
        assert_eq!(hw.elapsed_cycles().unwrap(), 1_000);
    }

    #[test]
    fn stop_before_completion_reports_no_samples() {
        let device = SimulatedMonitor::with_sim(
            &PlatformConfig::default(),
            SimConfig {
                completion_polls: None,
                ..SimConfig::default()
            },
        );
        let hw = MonitorHw::new(device.control());
        hw.start().unwrap();
        hw.stop().unwrap();
        assert!(hw.is_done().unwrap());
        assert_eq!(hw.power_count().unwrap(), 0);
        assert_eq!(hw.traces_count().unwrap(), 0);
        assert_eq!(device.commands(), vec![command::START, command::STOP]);
    }

    #[test]
    fn irq_poll_advances_time() {
        let device = sim();
        let hw = MonitorHw::new(device.control());
        hw.start().unwrap();
        let ready = device.poll(PollEvents::IRQ).unwrap();
        assert_eq!(ready, PollEvents::IRQ);
        assert!(hw.is_done().unwrap());
    }

    #[test]
    fn drain_copies_fixture_and_unmaps() {
        let config = PlatformConfig::default();
        let device = SimulatedMonitor::new(&config);
        let request = DrainRequest {
            kind: RegionKind::Power,
            hwaddr: config.power_bram_addr,
            len: 64,
        };
        let mut out = Vec::new();
        IoctlPollTransport
            .drain(&device, &request, &mut |bytes| {
                out.extend_from_slice(bytes);
                Ok(())
            })
            .unwrap();
        let words: &[u32] = bytemuck::cast_slice(&out);
        assert_eq!(words, &[POWER_FIXTURE; 16]);
        assert_eq!(device.live_staging(), 0);
        assert_eq!(device.ioctl_count(), 1);
    }

    #[test]
    fn token_checks_follow_the_driver() {
        let config = PlatformConfig::default();
        let device = SimulatedMonitor::new(&config);
        let staging = device.map_staging(RegionKind::Traces, 64).unwrap();

        let wrong_bank = DmaToken::new(staging.user_addr(), 0x1234_0000, 64);
        assert!(device.dma_hw2mem(RegionKind::Traces, &wrong_bank).is_err());

        let too_long = DmaToken::new(
            staging.user_addr(),
            usize::try_from(config.traces_bram_addr).unwrap(),
            128,
        );
        assert!(device.dma_hw2mem(RegionKind::Traces, &too_long).is_err());

        let unknown = DmaToken::new(0x10, usize::try_from(config.traces_bram_addr).unwrap(), 64);
        assert!(device.dma_hw2mem(RegionKind::Traces, &unknown).is_err());
        assert_eq!(device.ioctl_count(), 0);

        drop(staging);
        assert_eq!(device.live_staging(), 0);
    }

    #[test]
    fn cms_window_only_without_adc() {
        assert!(sim().cms().is_none());
        let device = SimulatedMonitor::new(&PlatformConfig::preset(Platform::AlveoU250));
        let cms = device.cms().unwrap();
        let layout = CmsWindow::u250();
        assert_eq!(cms.read32(layout.current()).unwrap(), 1_500);
        assert_eq!(cms.read32(layout.voltage()).unwrap(), 12_000);
        assert_eq!(device.cms_reset(), Some(0));
    }
}
