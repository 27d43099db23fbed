//! Tests against a real Monitor bitstream.
//!
//! Select the board with `MONITOR_PLATFORM` (and `MONITOR_DEVICE` if the
//! node is not at its default path).

use monitor_driver::{Monitor, PlatformConfig, RegionKind, VoltageReference};

#[test]
#[ignore] // Requires the Monitor kernel module and bitstream
fn hardware_acquisition() {
    let config = PlatformConfig::from_env().expect("Bad MONITOR_PLATFORM");
    let mut monitor = Monitor::init(config).expect("Failed to open Monitor");

    monitor.alloc(1024, "CON", RegionKind::Power).unwrap();
    monitor.alloc(1024, "SIG", RegionKind::Traces).unwrap();
    monitor.config_vref(VoltageReference::Single).unwrap();
    monitor.set_trigger_mask(0xFFFF_FFFF).unwrap();

    monitor.start().unwrap();
    monitor.wait_done().unwrap();
    monitor.stop().unwrap();

    let power = (monitor.power_count().unwrap() as usize).min(1024);
    let traces = (monitor.traces_count().unwrap() as usize).min(1024);
    monitor
        .read_power(RegionKind::Power.aligned_len(power).min(1024))
        .unwrap();
    monitor
        .read_traces(RegionKind::Traces.aligned_len(traces).min(1024))
        .unwrap();
    assert!(monitor.power_errors().unwrap() <= monitor.power_count().unwrap());
}

#[test]
#[ignore] // Requires the Monitor kernel module and bitstream
fn hardware_stop_is_idempotent() {
    let mut monitor = Monitor::init(PlatformConfig::from_env().unwrap()).unwrap();
    monitor.start().unwrap();
    monitor.stop().unwrap();
    monitor.stop().unwrap();
    assert!(monitor.is_done().unwrap());
    monitor.clean().unwrap();
}
