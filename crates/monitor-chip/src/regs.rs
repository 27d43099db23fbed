//! Control window register map.
//!
//! The Monitor exposes four 32-bit registers at the start of a 64 KiB
//! control window. Register 0 is a combined command/status word: writes are
//! commands and the register latches only the most recent one, reads return
//! status bits with the power error counter packed above them. Registers
//! 1-3 are overloaded by direction.
//!
//! ```text
//! word  byte   read                          write
//! 0     0x00   status | errors << 3          command
//! 1     0x04   elapsed cycles                -
//! 2     0x08   last power BRAM index         AXI trigger mask
//! 3     0x0c   last traces BRAM index        signal trigger mask
//! ```

/// Size of the control window mapping (64 KiB).
pub const CONTROL_WINDOW_SIZE: usize = 0x1_0000;

/// Number of implemented 32-bit registers.
pub const REG_COUNT: usize = 4;

/// Command/status register (word 0).
pub const REG0: usize = 0x0000 >> 2;
/// Elapsed cycles (word 1).
pub const REG1: usize = 0x0004 >> 2;
/// Power index on read, AXI trigger mask on write (word 2).
pub const REG2: usize = 0x0008 >> 2;
/// Traces index on read, signal trigger mask on write (word 3).
pub const REG3: usize = 0x000c >> 2;

/// Alias: elapsed cycle counter.
pub const ELAPSED_CYCLES: usize = REG1;
/// Alias: last written power BRAM index (0-indexed).
pub const POWER_INDEX: usize = REG2;
/// Alias: AXI sniffer trigger mask.
pub const AXI_TRIGGER_MASK: usize = REG2;
/// Alias: last written traces BRAM index (0-indexed).
pub const TRACES_INDEX: usize = REG3;
/// Alias: signal trigger mask.
pub const TRIGGER_MASK: usize = REG3;

// ── Commands (writes to REG0) ────────────────────────────────────────────────

/// Command bits written to register 0.
pub mod command {
    /// Set the ADC voltage reference to 2.5 V.
    pub const CONFIG_VREF: u32 = 0x01;
    /// Set the ADC voltage reference to 5 V.
    pub const CONFIG_2VREF: u32 = 0x02;
    /// Start an acquisition.
    pub const START: u32 = 0x04;
    /// Stop the acquisition and clear the BRAM banks.
    pub const STOP: u32 = 0x08;
    /// Enable the AXI sniffer as an additional trigger gate.
    pub const AXI_SNIFFER_ENABLE: u32 = 0x20;
}

// ── Status (reads of REG0) ───────────────────────────────────────────────────

/// Status bits read from register 0.
pub mod status {
    /// Acquisition in progress.
    pub const BUSY: u32 = 0x01;
    /// Acquisition finished, BRAMs readable.
    pub const DONE: u32 = 0x02;
    /// AXI sniffer gate is enabled.
    pub const AXI_SNIFFER_ENABLE_OUT: u32 = 0x04;
    /// Mask of all status bits below the error counter.
    pub const MASK: u32 = 0x07;
    /// Bit position of the power error counter.
    pub const POWER_ERRORS_SHIFT: u32 = 3;
}

/// Extract the power error counter from a raw register 0 value.
///
/// The status field is masked off before shifting.
pub const fn power_errors(reg0: u32) -> u32 {
    (reg0 & !status::MASK) >> status::POWER_ERRORS_SHIFT
}

/// Convert a 0-indexed "last written" BRAM index into a sample count.
///
/// An index of `u32::MAX` (nothing written) yields 0.
pub const fn index_to_count(index: u32) -> u32 {
    index.wrapping_add(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_are_consecutive_words() {
        assert_eq!([REG0, REG1, REG2, REG3], [0, 1, 2, 3]);
        assert!(REG_COUNT * 4 <= CONTROL_WINDOW_SIZE);
    }

    #[test]
    fn command_bits_are_distinct() {
        let all = [
            command::CONFIG_VREF,
            command::CONFIG_2VREF,
            command::START,
            command::STOP,
            command::AXI_SNIFFER_ENABLE,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_eq!(a & b, 0);
            }
        }
    }

    #[test]
    fn error_counter_ignores_status_bits() {
        let reg0 =
            (5 << status::POWER_ERRORS_SHIFT) | status::DONE | status::AXI_SNIFFER_ENABLE_OUT;
        assert_eq!(power_errors(reg0), 5);
        assert_eq!(power_errors(status::MASK), 0);
    }

    #[test]
    fn empty_bram_reports_zero_samples() {
        assert_eq!(index_to_count(u32::MAX), 0);
        assert_eq!(index_to_count(0), 1);
        assert_eq!(index_to_count(63), 64);
    }
}
