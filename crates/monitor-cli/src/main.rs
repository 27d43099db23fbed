//! `monitor`: command-line front end for the Monitor FPGA IP.
//!
//! ```text
//! USAGE:
//!   monitor platforms                List platform presets
//!   monitor status                   Print the control block state
//!   monitor capture [options]        Run one acquisition, write CON.BIN / SIG.BIN
//! ```
//!
//! The platform comes from `--platform`, else `MONITOR_PLATFORM`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use monitor_driver::capture::Capture;
use monitor_driver::{Monitor, Platform, PlatformConfig, RegionKind, VoltageReference};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "monitor", about = "Monitor FPGA IP capture tool", version)]
struct Cli {
    /// Platform preset (zynq7000, zynqmp, u250).
    #[arg(long, global = true)]
    platform: Option<Platform>,

    /// Device node override.
    #[arg(long, global = true)]
    device: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List platform presets and their addresses.
    Platforms,
    /// Print the current status snapshot.
    Status,
    /// Run one acquisition and save the capture files.
    Capture {
        /// Power samples to keep.
        #[arg(long, default_value_t = 1024)]
        power: usize,
        /// Trace samples to keep.
        #[arg(long, default_value_t = 1024)]
        traces: usize,
        /// ADC voltage reference.
        #[arg(long, value_enum, default_value_t = Vref::Single)]
        vref: Vref,
        /// Signal trigger mask.
        #[arg(long, value_parser = parse_mask, default_value = "0xffffffff")]
        mask: u32,
        /// AXI sniffer trigger mask; enables the sniffer when given.
        #[arg(long, value_parser = parse_mask)]
        axi_mask: Option<u32>,
        /// Stop after this many milliseconds instead of waiting for DONE.
        #[arg(long)]
        stop_after_ms: Option<u64>,
        /// Output directory.
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Vref {
    Single,
    Double,
}

impl From<Vref> for VoltageReference {
    fn from(v: Vref) -> Self {
        match v {
            Vref::Single => Self::Single,
            Vref::Double => Self::Double,
        }
    }
}

fn parse_mask(s: &str) -> Result<u32, std::num::ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Platforms => cmd_platforms(),
        Cmd::Status => cmd_status(&config(cli.platform, cli.device)?)?,
        Cmd::Capture {
            power,
            traces,
            vref,
            mask,
            axi_mask,
            stop_after_ms,
            out,
        } => cmd_capture(
            config(cli.platform, cli.device)?,
            &CaptureArgs {
                power,
                traces,
                vref: vref.into(),
                mask,
                axi_mask,
                stop_after: stop_after_ms.map(Duration::from_millis),
                out,
            },
        )?,
    }

    Ok(())
}

fn config(platform: Option<Platform>, device: Option<PathBuf>) -> Result<PlatformConfig> {
    let mut config = match platform {
        Some(platform) => PlatformConfig::preset(platform),
        None => PlatformConfig::from_env().context("Reading MONITOR_PLATFORM")?,
    };
    if let Some(device) = device {
        config = config.with_device_path(device);
    }
    Ok(config)
}

fn cmd_platforms() {
    for platform in Platform::ALL {
        let c = PlatformConfig::preset(platform);
        println!("{platform}");
        println!("  device    {}", c.device_path.display());
        println!("  control   offset {:#x}, {} KiB", c.control_offset, c.control_size / 1024);
        println!(
            "  BRAM      power {:#010x}  traces {:#010x}  ({} KiB each)",
            c.power_bram_addr,
            c.traces_bram_addr,
            c.bram_size / 1024
        );
        println!("  transport {:?}", c.transport);
        if let Some(node) = &c.traces_device {
            println!("  c2h       {}", node.display());
        }
        match c.cms {
            Some(cms) => println!(
                "  power     CMS at {:#x}, every {} ms",
                cms.offset,
                c.sample_period.as_millis()
            ),
            None => println!("  power     on-chip ADC"),
        }
        println!();
    }
}

fn cmd_status(config: &PlatformConfig) -> Result<()> {
    let monitor = Monitor::init(config.clone())
        .with_context(|| format!("Opening {}", config.device_path.display()))?;
    let s = monitor.status()?;

    println!("Platform     : {}", config.platform);
    println!("Device       : {}", config.device_path.display());
    println!("State        : {:?}", s.state);
    println!("Busy / Done  : {} / {}", s.busy, s.done);
    println!("AXI sniffer  : {}", if s.axi_sniffer { "enabled" } else { "off" });
    println!("Elapsed      : {} cycles", s.elapsed_cycles);
    println!("Power        : {} samples, {} errors", s.power_count, s.power_errors);
    println!("Traces       : {} samples", s.traces_count);

    monitor.exit();
    Ok(())
}

struct CaptureArgs {
    power: usize,
    traces: usize,
    vref: VoltageReference,
    mask: u32,
    axi_mask: Option<u32>,
    stop_after: Option<Duration>,
    out: PathBuf,
}

fn cmd_capture(config: PlatformConfig, args: &CaptureArgs) -> Result<()> {
    let mut monitor = Monitor::init(config.clone())
        .with_context(|| format!("Opening {}", config.device_path.display()))?;

    let power_cap = RegionKind::Power.aligned_len(args.power);
    let traces_cap = RegionKind::Traces.aligned_len(args.traces);
    monitor.alloc(power_cap, "CON", RegionKind::Power)?;
    monitor.alloc(traces_cap, "SIG", RegionKind::Traces)?;

    monitor.config_vref(args.vref)?;
    monitor.set_trigger_mask(args.mask)?;
    if let Some(axi) = args.axi_mask {
        monitor.set_axi_trigger_mask(axi)?;
    }

    monitor.start()?;
    match args.stop_after {
        Some(delay) => {
            std::thread::sleep(delay);
            tracing::info!("Stopping after {delay:?}");
        }
        None => monitor.wait_done()?,
    }
    monitor.stop()?;
    if let Some(e) = monitor.sampler_error() {
        tracing::warn!("CMS sampler: {e}");
    }

    let power = (monitor.power_count()? as usize).min(power_cap);
    let traces = (monitor.traces_count()? as usize).min(traces_cap);
    monitor
        .read_power(RegionKind::Power.aligned_len(power))
        .context("Draining power samples")?;
    monitor
        .read_traces(RegionKind::Traces.aligned_len(traces))
        .context("Draining traces")?;

    let capture = Capture::collect(&monitor)?;
    capture
        .save(&args.out)
        .with_context(|| format!("Writing capture to {}", args.out.display()))?;

    println!(
        "{} power samples ({} errors), {} traces, {} cycles -> {}",
        capture.power.len(),
        monitor.power_errors()?,
        capture.traces.len(),
        capture.elapsed_cycles,
        args.out.display()
    );

    monitor.clean()?;
    monitor.free("CON")?;
    monitor.free("SIG")?;
    monitor.exit();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_accept_hex_and_decimal() {
        assert_eq!(parse_mask("0xff").unwrap(), 255);
        assert_eq!(parse_mask("0XFFFFFFFF").unwrap(), u32::MAX);
        assert_eq!(parse_mask("17").unwrap(), 17);
        assert!(parse_mask("0xzz").is_err());
    }

    #[test]
    fn cli_parses_capture() {
        let cli = Cli::try_parse_from([
            "monitor",
            "--platform",
            "u250",
            "capture",
            "--power",
            "10",
            "--vref",
            "double",
            "--stop-after-ms",
            "50",
        ])
        .unwrap();
        assert_eq!(cli.platform, Some(Platform::AlveoU250));
        match cli.command {
            Cmd::Capture {
                power,
                vref,
                stop_after_ms,
                mask,
                ..
            } => {
                assert_eq!(power, 10);
                assert!(matches!(vref, Vref::Double));
                assert_eq!(stop_after_ms, Some(50));
                assert_eq!(mask, u32::MAX);
            }
            _ => panic!("expected capture"),
        }
    }
}
