//! Typed facade over the Monitor control block.

use crate::error::Result;
use crate::mmio::RegisterIo;
use monitor_chip::regs::{self, command, status};

/// Spins between `yield_now` calls while waiting for BUSY to clear.
const YIELD_INTERVAL: u32 = 64;

/// ADC voltage reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoltageReference {
    /// Internal reference (`CONFIG_VREF`)
    #[default]
    Single,
    /// Doubled reference (`CONFIG_2VREF`)
    Double,
}

impl VoltageReference {
    const fn command(self) -> u32 {
        match self {
            Self::Single => command::CONFIG_VREF,
            Self::Double => command::CONFIG_2VREF,
        }
    }
}

/// Register-level operations on the four Monitor words.
///
/// Holds no state of its own; every call is a read or a write of the
/// window it borrows.
#[derive(Debug, Clone, Copy)]
pub struct MonitorHw<'a> {
    regs: &'a dyn RegisterIo,
}

impl<'a> MonitorHw<'a> {
    /// Wrap a control window.
    pub const fn new(regs: &'a dyn RegisterIo) -> Self {
        Self { regs }
    }

    /// Select the ADC voltage reference.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn config_vref(&self, vref: VoltageReference) -> Result<()> {
        tracing::debug!("Voltage reference: {vref:?}");
        self.regs.write32(regs::REG0, vref.command())
    }

    /// Spin until the IP is no longer BUSY, then issue START once.
    ///
    /// Returns the number of status reads that saw BUSY. There is no
    /// timeout: an IP stuck in BUSY hangs the caller.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn start(&self) -> Result<u32> {
        let mut spins = 0u32;
        while self.regs.read32(regs::REG0)? & status::BUSY != 0 {
            spins = spins.wrapping_add(1);
            if spins % YIELD_INTERVAL == 0 {
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
        tracing::trace!("Idle after {spins} spins");
        self.regs.write32(regs::REG0, command::START)?;
        Ok(spins)
    }

    /// Issue STOP.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn stop(&self) -> Result<()> {
        self.regs.write32(regs::REG0, command::STOP)
    }

    /// Mask of the signals that trigger a trace sample.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn set_trigger_mask(&self, mask: u32) -> Result<()> {
        self.regs.write32(regs::TRIGGER_MASK, mask)
    }

    /// Mask of the AXI sniffer triggers; also enables the sniffer.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn set_axi_trigger_mask(&self, mask: u32) -> Result<()> {
        self.regs.write32(regs::AXI_TRIGGER_MASK, mask)?;
        self.regs.write32(regs::REG0, command::AXI_SNIFFER_ENABLE)
    }

    /// Cycles between START and DONE (or STOP).
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn elapsed_cycles(&self) -> Result<u32> {
        self.regs.read32(regs::ELAPSED_CYCLES)
    }

    /// Power samples captured. Wraps to 0 when the index reads `u32::MAX`.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn power_count(&self) -> Result<u32> {
        Ok(regs::index_to_count(self.regs.read32(regs::POWER_INDEX)?))
    }

    /// Trace samples captured. Wraps like [`Self::power_count`].
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn traces_count(&self) -> Result<u32> {
        Ok(regs::index_to_count(self.regs.read32(regs::TRACES_INDEX)?))
    }

    /// Raw status word.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn status(&self) -> Result<u32> {
        self.regs.read32(regs::REG0)
    }

    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn is_busy(&self) -> Result<bool> {
        Ok(self.status()? & status::BUSY != 0)
    }

    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn is_done(&self) -> Result<bool> {
        Ok(self.status()? & status::DONE != 0)
    }

    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn axi_sniffer_enabled(&self) -> Result<bool> {
        Ok(self.status()? & status::AXI_SNIFFER_ENABLE_OUT != 0)
    }

    /// ADC errors counted during the last acquisition.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn power_errors(&self) -> Result<u32> {
        Ok(regs::power_errors(self.status()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MonitorError;
    use std::sync::Mutex;

    /// Plain register file. START completes the run at once; a previous
    /// run can be left BUSY for a number of status reads.
    #[derive(Debug, Default)]
    struct Latch {
        words: Mutex<[u32; 4]>,
        busy_reads: Mutex<u32>,
        reads_before_start: Mutex<Option<u32>>,
        reads: Mutex<u32>,
        writes: Mutex<Vec<(usize, u32)>>,
    }

    impl RegisterIo for Latch {
        fn read32(&self, word: usize) -> Result<u32> {
            let mut words = self.words.lock().unwrap();
            if word == regs::REG0 {
                *self.reads.lock().unwrap() += 1;
                let mut busy = self.busy_reads.lock().unwrap();
                if *busy > 0 {
                    *busy -= 1;
                    return Ok(status::BUSY);
                }
                words[0] &= !status::BUSY;
            }
            words
                .get(word)
                .copied()
                .ok_or(MonitorError::OutOfBounds { word, limit: 4 })
        }

        fn write32(&self, word: usize, value: u32) -> Result<()> {
            self.writes.lock().unwrap().push((word, value));
            let mut words = self.words.lock().unwrap();
            if word == regs::REG0 && value == command::START {
                let mut before = self.reads_before_start.lock().unwrap();
                before.get_or_insert(*self.reads.lock().unwrap());
                words[0] = status::DONE;
            } else if word != regs::REG0 {
                words[word] = value;
            }
            Ok(())
        }

        fn words(&self) -> usize {
            4
        }
    }

    #[test]
    fn start_waits_for_busy_to_clear() {
        let latch = Latch::default();
        *latch.busy_reads.lock().unwrap() = 3;
        let hw = MonitorHw::new(&latch);

        assert_eq!(hw.start().unwrap(), 3);
        assert_eq!(*latch.reads_before_start.lock().unwrap(), Some(4));
        assert_eq!(*latch.writes.lock().unwrap(), vec![(0, command::START)]);
    }

    #[test]
    fn start_returns_when_the_run_finishes_at_once() {
        let latch = Latch::default();
        let hw = MonitorHw::new(&latch);

        assert_eq!(hw.start().unwrap(), 0);
        assert!(hw.is_done().unwrap());
        assert!(!hw.is_busy().unwrap());
        hw.start().unwrap();
        assert_eq!(latch.writes.lock().unwrap().len(), 2);
    }

    #[test]
    fn vref_commands() {
        let latch = Latch::default();
        let hw = MonitorHw::new(&latch);
        hw.config_vref(VoltageReference::Single).unwrap();
        hw.config_vref(VoltageReference::Double).unwrap();
        let writes = latch.writes.lock().unwrap();
        assert_eq!(*writes, vec![(0, 0x01), (0, 0x02)]);
    }

    #[test]
    fn axi_mask_then_enable() {
        let latch = Latch::default();
        let hw = MonitorHw::new(&latch);
        hw.set_axi_trigger_mask(0xF0).unwrap();
        hw.set_trigger_mask(0x3).unwrap();
        let writes = latch.writes.lock().unwrap();
        assert_eq!(*writes, vec![(2, 0xF0), (0, 0x20), (3, 0x3)]);
    }

    #[test]
    fn counts_wrap_from_max_index() {
        let latch = Latch::default();
        {
            let mut words = latch.words.lock().unwrap();
            words[regs::POWER_INDEX] = u32::MAX;
            words[regs::TRACES_INDEX] = 63;
            words[regs::REG0] = status::DONE | (5 << 3);
        }
        let hw = MonitorHw::new(&latch);
        assert_eq!(hw.power_count().unwrap(), 0);
        assert_eq!(hw.traces_count().unwrap(), 64);
        assert_eq!(hw.power_errors().unwrap(), 5);
        assert!(hw.is_done().unwrap());
    }
}
