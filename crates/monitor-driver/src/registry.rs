//! Host-side capture buffers.
//!
//! At most one region per [`RegionKind`]. Names are unique across both slots.
//! Element storage is typed (`u32` power samples, [`TraceSample`] traces) and
//! exposed as bytes for the DMA copy-out through `bytemuck`.

use crate::error::{MonitorError, Result};
use bytemuck::{Pod, Zeroable};
use monitor_chip::{bram, contract};
use std::fmt;

/// Which capture a region holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionKind {
    /// 32-bit power samples
    Power,
    /// 64-bit trace words
    Traces,
}

impl RegionKind {
    /// Bytes per element.
    pub const fn element_size(self) -> usize {
        match self {
            Self::Power => bram::POWER_ELEMENT_SIZE,
            Self::Traces => bram::TRACES_ELEMENT_SIZE,
        }
    }

    /// Page index of the staging window for this kind.
    pub const fn pgoff(self) -> u64 {
        match self {
            Self::Power => contract::PGOFF_POWER,
            Self::Traces => contract::PGOFF_TRACES,
        }
    }

    /// HW->MEM ioctl number for this kind.
    pub const fn ioctl_nr(self) -> u8 {
        match self {
            Self::Power => contract::IOC_NR_HW2MEM_POWER,
            Self::Traces => contract::IOC_NR_HW2MEM_TRACES,
        }
    }

    /// Element count rounded up so its byte length is DMA-legal.
    pub const fn aligned_len(self, count: usize) -> usize {
        bram::aligned_count(count, self.element_size())
    }
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Power => "power",
            Self::Traces => "traces",
        })
    }
}

/// One trace word: timestamp in the low half, signal levels in the high half.
#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct TraceSample(pub u64);

impl TraceSample {
    /// Build from its halves.
    pub const fn new(timestamp: u32, signals: u32) -> Self {
        Self(bram::pack_trace(timestamp, signals))
    }

    /// Cycle timestamp.
    pub const fn timestamp(self) -> u32 {
        bram::trace_timestamp(self.0)
    }

    /// Signal levels, one bit per probe.
    pub const fn signals(self) -> u32 {
        bram::trace_signals(self.0)
    }
}

impl fmt::Debug for TraceSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TraceSample({:#010x}@{})", self.signals(), self.timestamp())
    }
}

#[derive(Debug)]
enum RegionData {
    Power(Vec<u32>),
    Traces(Vec<TraceSample>),
}

impl RegionData {
    fn zeroed(kind: RegionKind, count: usize) -> Result<Self> {
        let no_memory = |_| MonitorError::NoMemory {
            bytes: count.saturating_mul(kind.element_size()),
        };
        Ok(match kind {
            RegionKind::Power => {
                let mut data = Vec::new();
                data.try_reserve_exact(count).map_err(no_memory)?;
                data.resize(count, 0);
                Self::Power(data)
            }
            RegionKind::Traces => {
                let mut data = Vec::new();
                data.try_reserve_exact(count).map_err(no_memory)?;
                data.resize(count, TraceSample::default());
                Self::Traces(data)
            }
        })
    }

    fn bytes(&self) -> &[u8] {
        match self {
            Self::Power(data) => bytemuck::cast_slice(data),
            Self::Traces(data) => bytemuck::cast_slice(data),
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match self {
            Self::Power(data) => bytemuck::cast_slice_mut(data),
            Self::Traces(data) => bytemuck::cast_slice_mut(data),
        }
    }
}

/// A registered capture buffer
#[derive(Debug)]
pub struct Region {
    name: String,
    kind: RegionKind,
    capacity: usize,
    data: RegionData,
    lent: bool,
}

impl Region {
    /// Registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Capture kind.
    pub const fn kind(&self) -> RegionKind {
        self.kind
    }

    /// Capacity in elements.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Capacity in bytes.
    pub const fn byte_len(&self) -> usize {
        self.capacity * self.kind.element_size()
    }

    /// Region is lent to the CMS sampler; data is not readable.
    pub const fn is_lent(&self) -> bool {
        self.lent
    }

    /// Raw bytes, native endian.
    pub fn bytes(&self) -> &[u8] {
        self.data.bytes()
    }

    /// Mutable raw bytes, native endian.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.data.bytes_mut()
    }

    /// Power samples, if this is a power region.
    pub fn power(&self) -> Option<&[u32]> {
        match &self.data {
            RegionData::Power(data) => Some(data),
            RegionData::Traces(_) => None,
        }
    }

    /// Trace words, if this is a traces region.
    pub fn traces(&self) -> Option<&[TraceSample]> {
        match &self.data {
            RegionData::Traces(data) => Some(data),
            RegionData::Power(_) => None,
        }
    }
}

/// Two-slot registry keyed by [`RegionKind`]
#[derive(Debug, Default)]
pub struct Registry {
    power: Option<Region>,
    traces: Option<Region>,
}

impl Registry {
    /// Empty registry.
    pub const fn new() -> Self {
        Self {
            power: None,
            traces: None,
        }
    }

    /// Register a zero-filled region of `count` elements and return its bytes.
    ///
    /// # Errors
    ///
    /// - [`MonitorError::Duplicate`] if `kind` already has a region or `name`
    ///   is taken by the other slot
    /// - [`MonitorError::NoMemory`] if the host allocation fails
    pub fn alloc(&mut self, count: usize, name: &str, kind: RegionKind) -> Result<&mut [u8]> {
        if let Some(existing) = self.slot(kind) {
            return Err(MonitorError::duplicate(format!(
                "{kind} region '{}' already registered",
                existing.name
            )));
        }
        if self.find(name).is_some() {
            return Err(MonitorError::duplicate(format!(
                "name '{name}' already in use"
            )));
        }

        let data = RegionData::zeroed(kind, count)?;
        tracing::debug!("Registered {kind} region '{name}': {count} elements");

        let region = self.slot_entry(kind).insert(Region {
            name: name.to_owned(),
            kind,
            capacity: count,
            data,
            lent: false,
        });
        Ok(region.bytes_mut())
    }

    /// Remove the region called `name`.
    ///
    /// # Errors
    ///
    /// - [`MonitorError::NotFound`] if no region has that name
    /// - [`MonitorError::State`] if the region is lent to the sampler
    pub fn free(&mut self, name: &str) -> Result<()> {
        let kind = self
            .find(name)
            .map(Region::kind)
            .ok_or_else(|| MonitorError::not_found(name))?;
        let slot = self.slot_entry(kind);
        if slot.as_ref().is_some_and(Region::is_lent) {
            return Err(MonitorError::state(format!(
                "region '{name}' is in use by the CMS sampler"
            )));
        }
        *slot = None;
        tracing::debug!("Freed {kind} region '{name}'");
        Ok(())
    }

    /// Region registered for `kind`.
    pub const fn slot(&self, kind: RegionKind) -> Option<&Region> {
        match kind {
            RegionKind::Power => self.power.as_ref(),
            RegionKind::Traces => self.traces.as_ref(),
        }
    }

    /// Mutable region registered for `kind`.
    pub fn slot_mut(&mut self, kind: RegionKind) -> Option<&mut Region> {
        self.slot_entry(kind).as_mut()
    }

    /// Region called `name`, in either slot.
    pub fn find(&self, name: &str) -> Option<&Region> {
        self.iter().find(|region| region.name == name)
    }

    /// Registered regions, power first.
    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.power.iter().chain(self.traces.iter())
    }

    /// Number of registered regions.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// No regions registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move the power buffer out for the CMS sampler.
    ///
    /// Returns `None` when there is no power region or it is already lent.
    pub(crate) fn lend_power(&mut self) -> Option<Vec<u32>> {
        let region = self.power.as_mut().filter(|region| !region.lent)?;
        match &mut region.data {
            RegionData::Power(data) => {
                region.lent = true;
                Some(std::mem::take(data))
            }
            RegionData::Traces(_) => None,
        }
    }

    /// Hand a lent power buffer back.
    pub(crate) fn restore_power(&mut self, buffer: Vec<u32>) {
        if let Some(region) = self.power.as_mut() {
            region.data = RegionData::Power(buffer);
            region.lent = false;
        }
    }

    fn slot_entry(&mut self, kind: RegionKind) -> &mut Option<Region> {
        match kind {
            RegionKind::Power => &mut self.power,
            RegionKind::Traces => &mut self.traces,
        }
    }
}
