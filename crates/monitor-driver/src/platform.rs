//! Platform presets and runtime configuration.

use crate::error::{MonitorError, Result};
use monitor_chip::{bram, contract, platform as board, regs};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable selecting the platform preset.
pub const PLATFORM_ENV: &str = "MONITOR_PLATFORM";
/// Environment variable overriding the device node.
pub const DEVICE_ENV: &str = "MONITOR_DEVICE";

/// Supported carrier platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    /// Zynq-7000 with the on-chip XADC
    Zynq7000,
    /// Zynq UltraScale+ MPSoC with the on-chip SYSMON
    ZynqUltrascale,
    /// Alveo U250 over XDMA, power from the CMS
    AlveoU250,
}

impl Platform {
    /// Every preset, in display order.
    pub const ALL: [Self; 3] = [Self::Zynq7000, Self::ZynqUltrascale, Self::AlveoU250];

    /// Short name accepted by [`FromStr`].
    pub const fn name(self) -> &'static str {
        match self {
            Self::Zynq7000 => "zynq7000",
            Self::ZynqUltrascale => "zynqmp",
            Self::AlveoU250 => "u250",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Platform {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "zynq7000" | "zynq" | "z7" => Ok(Self::Zynq7000),
            "zynqmp" | "ultrascale" | "zu" => Ok(Self::ZynqUltrascale),
            "u250" | "alveo" | "au250" => Ok(Self::AlveoU250),
            other => Err(MonitorError::config(format!("unknown platform '{other}'"))),
        }
    }
}

/// How traces (and on-chip power) reach host memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Staging mmap, HW->MEM ioctl, poll for DMA completion
    IoctlPoll,
    /// Positional reads from a card-to-host DMA node
    PositionalRead,
}

/// Layout of the Alveo card-management window, in 32-bit words
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmsWindow {
    /// Byte offset of the window in the user device
    pub offset: u64,
    /// Window size in bytes
    pub size: usize,
    /// Reset/enable word
    pub reset_word: usize,
    /// First word of the sensor register map
    pub reg_map_word: usize,
    /// Current word, relative to the register map
    pub current_word: usize,
    /// Voltage word, relative to the register map
    pub voltage_word: usize,
}

impl CmsWindow {
    /// The U250 card-management layout.
    pub const fn u250() -> Self {
        Self {
            offset: board::cms::WINDOW_OFFSET,
            size: board::cms::WINDOW_SIZE,
            reset_word: board::cms::RESET_WORD,
            reg_map_word: board::cms::REG_MAP_WORD,
            current_word: board::cms::CURRENT_WORD,
            voltage_word: board::cms::VOLTAGE_WORD,
        }
    }

    /// Absolute word of the current sensor.
    pub const fn current(&self) -> usize {
        self.reg_map_word + self.current_word
    }

    /// Absolute word of the voltage sensor.
    pub const fn voltage(&self) -> usize {
        self.reg_map_word + self.voltage_word
    }
}

/// Everything the runtime needs to know about the platform it runs on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformConfig {
    /// Preset this config was built from
    pub platform: Platform,
    /// Device node holding the control window
    pub device_path: PathBuf,
    /// Byte offset of the control window in the device
    pub control_offset: u64,
    /// Control window size in bytes
    pub control_size: usize,
    /// Hardware address of the power BRAM bank
    pub power_bram_addr: u64,
    /// Hardware address of the traces BRAM bank
    pub traces_bram_addr: u64,
    /// Size of each BRAM bank in bytes
    pub bram_size: usize,
    /// Trace transport
    pub transport: TransportKind,
    /// Node read by [`TransportKind::PositionalRead`]
    pub traces_device: Option<PathBuf>,
    /// Power comes from the on-chip ADC through the Monitor
    pub has_on_chip_adc: bool,
    /// CMS window, when power comes from the card manager
    pub cms: Option<CmsWindow>,
    /// CMS sample period
    pub sample_period: Duration,
}

impl PlatformConfig {
    /// Preset for `platform`.
    pub fn preset(platform: Platform) -> Self {
        let base = Self {
            platform,
            device_path: PathBuf::from(board::MONITOR_DEVICE),
            control_offset: contract::PGOFF_CONTROL,
            control_size: regs::CONTROL_WINDOW_SIZE,
            power_bram_addr: 0,
            traces_bram_addr: 0,
            bram_size: board::BRAM_SIZE,
            transport: TransportKind::IoctlPoll,
            traces_device: None,
            has_on_chip_adc: true,
            cms: None,
            sample_period: Duration::from_millis(board::cms::SAMPLE_PERIOD_MS),
        };
        match platform {
            Platform::Zynq7000 => Self {
                power_bram_addr: board::zynq7000::POWER_BRAM_ADDR,
                traces_bram_addr: board::zynq7000::TRACES_BRAM_ADDR,
                ..base
            },
            Platform::ZynqUltrascale => Self {
                power_bram_addr: board::zynqmp::POWER_BRAM_ADDR,
                traces_bram_addr: board::zynqmp::TRACES_BRAM_ADDR,
                ..base
            },
            Platform::AlveoU250 => Self {
                device_path: PathBuf::from(board::u250::USER_DEVICE),
                control_offset: board::u250::CONTROL_OFFSET,
                power_bram_addr: board::u250::POWER_BRAM_ADDR,
                traces_bram_addr: board::u250::TRACES_BRAM_ADDR,
                transport: TransportKind::PositionalRead,
                traces_device: Some(PathBuf::from(board::u250::C2H_DEVICE)),
                has_on_chip_adc: false,
                cms: Some(CmsWindow::u250()),
                ..base
            },
        }
    }

    /// Build from `MONITOR_PLATFORM` (default `zynqmp`) and `MONITOR_DEVICE`.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Config`] if `MONITOR_PLATFORM` names no preset.
    pub fn from_env() -> Result<Self> {
        let platform = match std::env::var(PLATFORM_ENV) {
            Ok(name) => name.parse()?,
            Err(_) => Platform::ZynqUltrascale,
        };
        let mut config = Self::preset(platform);
        if let Ok(path) = std::env::var(DEVICE_ENV) {
            tracing::debug!("{DEVICE_ENV} overrides device node: {path}");
            config.device_path = PathBuf::from(path);
        }
        Ok(config)
    }

    /// Override the device node.
    #[must_use]
    pub fn with_device_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.device_path = path.into();
        self
    }

    /// Override the trace transport, and the node it reads from.
    #[must_use]
    pub fn with_transport(mut self, transport: TransportKind, device: Option<PathBuf>) -> Self {
        self.transport = transport;
        self.traces_device = device;
        self
    }

    /// Override the CMS sample period.
    #[must_use]
    pub fn with_sample_period(mut self, period: Duration) -> Self {
        self.sample_period = period;
        self
    }

    /// Largest element count a bank can hold for `element_size`.
    pub const fn bank_capacity(&self, element_size: usize) -> usize {
        self.bram_size / element_size
    }

    /// Reject inconsistent hand-edited configs.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Config`] describing the first inconsistency.
    pub fn validate(&self) -> Result<()> {
        if self.control_size < regs::REG_COUNT * 4 {
            return Err(MonitorError::config(format!(
                "control window {:#x} too small for {} registers",
                self.control_size,
                regs::REG_COUNT
            )));
        }
        if self.transport == TransportKind::PositionalRead && self.traces_device.is_none() {
            return Err(MonitorError::config(
                "positional-read transport needs a traces device",
            ));
        }
        if !self.has_on_chip_adc && self.cms.is_none() {
            return Err(MonitorError::config(
                "platform without on-chip ADC needs a CMS window",
            ));
        }
        if self.bram_size % bram::TRANSFER_ALIGNMENT != 0 {
            return Err(MonitorError::config(format!(
                "BRAM size {:#x} is not a multiple of {}",
                self.bram_size,
                bram::TRANSFER_ALIGNMENT
            )));
        }
        Ok(())
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self::preset(Platform::ZynqUltrascale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_validate() {
        for platform in Platform::ALL {
            PlatformConfig::preset(platform).validate().unwrap();
        }
    }

    #[test]
    fn u250_uses_cms_and_c2h() {
        let config = PlatformConfig::preset(Platform::AlveoU250);
        assert!(!config.has_on_chip_adc);
        assert_eq!(config.transport, TransportKind::PositionalRead);
        assert_eq!(config.control_offset, 0x241_0000);
        let cms = config.cms.unwrap();
        assert_eq!(cms.current(), 40_960 + 58);
        assert_eq!(cms.voltage(), 40_960 + 61);
    }

    #[test]
    fn platform_names_round_trip() {
        for platform in Platform::ALL {
            assert_eq!(platform.to_string().parse::<Platform>().unwrap(), platform);
        }
        assert!("pynq".parse::<Platform>().is_err());
    }

    #[test]
    fn positional_read_without_node_is_rejected() {
        let config = PlatformConfig::default().with_transport(TransportKind::PositionalRead, None);
        assert_eq!(config.validate().unwrap_err().kind(), crate::ErrorKind::Config);
    }

    #[test]
    fn bank_capacity_per_kind() {
        let config = PlatformConfig::default();
        assert_eq!(config.bank_capacity(4), 131_072);
        assert_eq!(config.bank_capacity(8), 65_536);
    }
}
