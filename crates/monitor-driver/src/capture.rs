//! `CON.BIN` / `SIG.BIN` capture files.
//!
//! - `CON.BIN`: power samples (4 bytes each, native order) followed by the
//!   elapsed-cycles word.
//! - `SIG.BIN`: trace words (8 bytes each, native order).

use crate::error::{MonitorError, Result};
use crate::registry::TraceSample;
use crate::runtime::Monitor;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Power capture file name.
pub const POWER_FILE: &str = "CON.BIN";
/// Traces capture file name.
pub const TRACES_FILE: &str = "SIG.BIN";

/// Write power samples and the elapsed-cycles trailer.
///
/// # Errors
///
/// Propagates writer errors.
pub fn write_power<W: Write>(mut writer: W, samples: &[u32], elapsed_cycles: u32) -> Result<()> {
    writer.write_all(bytemuck::cast_slice(samples))?;
    writer.write_all(&elapsed_cycles.to_ne_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Read a `CON.BIN` stream back into samples and elapsed cycles.
///
/// # Errors
///
/// [`MonitorError::Io`] on reader errors or a malformed length.
pub fn read_power<R: Read>(mut reader: R) -> Result<(Vec<u32>, u32)> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    if bytes.len() < 4 || bytes.len() % 4 != 0 {
        return Err(malformed(POWER_FILE, bytes.len()));
    }
    let (body, trailer) = bytes.split_at(bytes.len() - 4);
    let samples = body
        .chunks_exact(4)
        .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let elapsed = u32::from_ne_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    Ok((samples, elapsed))
}

/// Write trace words.
///
/// # Errors
///
/// Propagates writer errors.
pub fn write_traces<W: Write>(mut writer: W, samples: &[TraceSample]) -> Result<()> {
    writer.write_all(bytemuck::cast_slice(samples))?;
    writer.flush()?;
    Ok(())
}

/// Read a `SIG.BIN` stream.
///
/// # Errors
///
/// [`MonitorError::Io`] on reader errors or a length that is not whole words.
pub fn read_traces<R: Read>(mut reader: R) -> Result<Vec<TraceSample>> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    if bytes.len() % 8 != 0 {
        return Err(malformed(TRACES_FILE, bytes.len()));
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|c| {
            let mut word = [0u8; 8];
            word.copy_from_slice(c);
            TraceSample(u64::from_ne_bytes(word))
        })
        .collect())
}

fn malformed(file: &str, len: usize) -> MonitorError {
    std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("{file}: {len} bytes is not a whole number of samples"),
    )
    .into()
}

/// One acquisition's worth of data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capture {
    /// Power samples
    pub power: Vec<u32>,
    /// Elapsed cycles
    pub elapsed_cycles: u32,
    /// Trace words
    pub traces: Vec<TraceSample>,
}

impl Capture {
    /// Collect the drained data from `monitor`, trimmed to the reported
    /// counts (and to the region capacities).
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn collect(monitor: &Monitor) -> Result<Self> {
        let power_count = monitor.power_count()? as usize;
        let traces_count = monitor.traces_count()? as usize;
        let power = monitor
            .power_samples()
            .map(|p| p[..power_count.min(p.len())].to_vec())
            .unwrap_or_default();
        let traces = monitor
            .traces()
            .map(|t| t[..traces_count.min(t.len())].to_vec())
            .unwrap_or_default();
        Ok(Self {
            power,
            elapsed_cycles: monitor.elapsed_cycles()?,
            traces,
        })
    }

    /// Write `CON.BIN` and `SIG.BIN` into `dir`.
    ///
    /// # Errors
    ///
    /// Propagates file errors.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        write_power(
            BufWriter::new(File::create(dir.join(POWER_FILE))?),
            &self.power,
            self.elapsed_cycles,
        )?;
        write_traces(
            BufWriter::new(File::create(dir.join(TRACES_FILE))?),
            &self.traces,
        )?;
        tracing::info!(
            "Saved {} power / {} trace samples to {}",
            self.power.len(),
            self.traces.len(),
            dir.display()
        );
        Ok(())
    }

    /// Read `CON.BIN` and `SIG.BIN` from `dir`.
    ///
    /// # Errors
    ///
    /// Propagates file and format errors.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let (power, elapsed_cycles) =
            read_power(BufReader::new(File::open(dir.join(POWER_FILE))?))?;
        let traces = read_traces(BufReader::new(File::open(dir.join(TRACES_FILE))?))?;
        Ok(Self {
            power,
            elapsed_cycles,
            traces,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_file_layout() {
        let mut out = Vec::new();
        write_power(&mut out, &[1, 2, 3], 0xABCD).unwrap();
        assert_eq!(out.len(), 16);
        assert_eq!(&out[12..], &0xABCDu32.to_ne_bytes());

        let (samples, elapsed) = read_power(out.as_slice()).unwrap();
        assert_eq!(samples, vec![1, 2, 3]);
        assert_eq!(elapsed, 0xABCD);
    }

    #[test]
    fn empty_power_capture_is_just_the_trailer() {
        let mut out = Vec::new();
        write_power(&mut out, &[], 7).unwrap();
        assert_eq!(read_power(out.as_slice()).unwrap(), (vec![], 7));
    }

    #[test]
    fn truncated_files_are_rejected() {
        assert!(read_power(&[0u8; 3][..]).is_err());
        assert!(read_power(&[0u8; 6][..]).is_err());
        assert!(read_traces(&[0u8; 12][..]).is_err());
    }

    #[test]
    fn trace_words_keep_their_halves() {
        let samples = [TraceSample::new(100, 0b1010), TraceSample::new(101, 0b0101)];
        let mut out = Vec::new();
        write_traces(&mut out, &samples).unwrap();
        let back = read_traces(out.as_slice()).unwrap();
        assert_eq!(back[1].timestamp(), 101);
        assert_eq!(back[1].signals(), 0b0101);
    }
}
