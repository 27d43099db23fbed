//! Per-board constants.
//!
//! The Monitor is integrated on three boards. The embedded Zynq parts reach
//! it through the `monitor` platform driver; the Alveo U250 reaches it through
//! the XDMA PCIe nodes and has no on-chip ADC, so power is sampled from the
//! card management subsystem (CMS) instead.
//!
//! | Board | Power BRAM | Traces BRAM | Control node |
//! |-------|-----------|-------------|--------------|
//! | Zynq-7000 | `0xB010_0000` | `0xB018_0000` | `/dev/monitor` @ 0 |
//! | Zynq UltraScale+ | `0x2000_0000` | `0x2004_0000` | `/dev/monitor` @ 0 |
//! | Alveo U250 | - | `0x2004_0000` | `/dev/xdma0_user` @ `0x241_0000` |

/// Zynq-7000 BRAM base addresses.
pub mod zynq7000 {
    /// Power BRAM base address.
    pub const POWER_BRAM_ADDR: u64 = 0xB010_0000;
    /// Traces BRAM base address.
    pub const TRACES_BRAM_ADDR: u64 = 0xB018_0000;
}

/// Zynq UltraScale+ BRAM base addresses.
pub mod zynqmp {
    /// Power BRAM base address.
    pub const POWER_BRAM_ADDR: u64 = 0x2000_0000;
    /// Traces BRAM base address.
    pub const TRACES_BRAM_ADDR: u64 = 0x2004_0000;
}

/// Alveo U250 (XDMA) constants.
pub mod u250 {
    /// XDMA user (AXI-Lite) node.
    pub const USER_DEVICE: &str = "/dev/xdma0_user";
    /// XDMA card-to-host stream node used for trace read-out.
    pub const C2H_DEVICE: &str = "/dev/xdma0_c2h_0";
    /// File offset of the Monitor control window inside the user node.
    pub const CONTROL_OFFSET: u64 = 0x241_0000;
    /// Traces BRAM address as seen from the C2H engine.
    ///
    /// Not confirmed against the U250 address map.
    pub const TRACES_BRAM_ADDR: u64 = 0x2004_0000;
    /// Power BRAM address (unused: no on-chip ADC).
    pub const POWER_BRAM_ADDR: u64 = 0x2000_0000;
}

/// Primary platform-driver node.
pub const MONITOR_DEVICE: &str = "/dev/monitor";

/// Size of each BRAM bank in bytes (512 KiB, the spacing between banks).
pub const BRAM_SIZE: usize = 0x8_0000;

/// Card management subsystem window (Alveo only).
///
/// Offsets are in 32-bit words from the start of the CMS mapping.
pub mod cms {
    /// File offset of the CMS mapping inside the XDMA user node.
    pub const WINDOW_OFFSET: u64 = 0x100_0000;
    /// Size of the CMS mapping (256 KiB).
    pub const WINDOW_SIZE: usize = 0x4_0000;
    /// MicroBlaze reset control register (word offset). Write 1 to release.
    pub const RESET_WORD: usize = 32_768;
    /// Start of the CMS register map (word offset).
    pub const REG_MAP_WORD: usize = 40_960;
    /// Board current register, relative to the register map (word offset).
    pub const CURRENT_WORD: usize = 58;
    /// Board voltage register, relative to the register map (word offset).
    pub const VOLTAGE_WORD: usize = 61;
    /// Sampling period in milliseconds (~8 Hz).
    pub const SAMPLE_PERIOD_MS: u64 = 120;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bram_banks_do_not_overlap() {
        assert!(zynq7000::POWER_BRAM_ADDR + BRAM_SIZE as u64 <= zynq7000::TRACES_BRAM_ADDR);
        assert!(zynqmp::POWER_BRAM_ADDR + (BRAM_SIZE as u64 / 2) <= zynqmp::TRACES_BRAM_ADDR);
    }

    #[test]
    fn cms_registers_fit_in_window() {
        let last = (cms::REG_MAP_WORD + cms::VOLTAGE_WORD + 1) * 4;
        assert!(last <= cms::WINDOW_SIZE);
        assert!((cms::RESET_WORD + 1) * 4 <= cms::WINDOW_SIZE);
    }
}
