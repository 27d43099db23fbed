//! The kernel contract seam.
//!
//! [`MonitorDevice`] is everything the runtime asks of the character device:
//! the control window, per-transfer staging mappings, the HW->MEM ioctl and
//! poll for DMA / IRQ completion. [`CharDevice`] talks to the real node;
//! [`crate::backends::SimulatedMonitor`] models IP and driver in software.

#![allow(clippy::cast_possible_wrap)]

use crate::dma::DmaToken;
use crate::error::{MonitorError, Result};
use crate::mmio::{MappedWindow, RegisterIo};
use crate::platform::PlatformConfig;
use crate::registry::RegionKind;
use bitflags::bitflags;
use monitor_chip::contract;
use rustix::event::{poll, PollFd, PollFlags};
use rustix::fs::OFlags;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fmt::Debug;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;

bitflags! {
    /// Events reported by the device's poll.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PollEvents: u16 {
        /// A HW->MEM transfer finished; the device lock is released.
        const DMA = contract::POLLDMA;
        /// The IP raised its done interrupt.
        const IRQ = contract::POLLIRQ;
    }
}

/// A kernel-allocated, physically contiguous staging buffer.
///
/// Dropping it unmaps it.
pub trait StagingBuffer: Debug + Send {
    /// Address the kernel looks the mapping up by.
    fn user_addr(&self) -> usize;

    /// Length in bytes.
    fn len(&self) -> usize;

    /// True for a zero-length buffer.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hand the buffer contents to `sink`.
    ///
    /// # Errors
    ///
    /// Propagates the sink's error.
    fn copy_out(&self, sink: &mut dyn FnMut(&[u8]) -> Result<()>) -> Result<()>;
}

/// Operations the runtime needs from the Monitor's character device.
pub trait MonitorDevice: Debug + Send {
    /// Node this device was opened from.
    fn path(&self) -> &Path;

    /// The four-register control window.
    fn control(&self) -> &dyn RegisterIo;

    /// Card-management window, on platforms that have one.
    fn cms(&self) -> Option<Arc<dyn RegisterIo>>;

    /// Map a `len`-byte staging buffer at the page index of `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::NoMemory`] if the kernel cannot back it.
    fn map_staging(&self, kind: RegionKind, len: usize) -> Result<Box<dyn StagingBuffer>>;

    /// Ask the kernel to copy `token.size` bytes from BRAM into staging.
    ///
    /// On success the device lock stays held until a poll reports
    /// [`PollEvents::DMA`].
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Io`] if the kernel rejects the token.
    fn dma_hw2mem(&self, kind: RegionKind, token: &DmaToken) -> Result<()>;

    /// Block until one of `events` is pending and return the pending set.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Io`] on poll failure.
    fn poll(&self, events: PollEvents) -> Result<PollEvents>;
}

/// The Monitor's character device node.
#[derive(Debug)]
pub struct CharDevice {
    path: PathBuf,
    control: MappedWindow,
    cms: Option<Arc<MappedWindow>>,
    file: File,
}

impl CharDevice {
    /// Open the node named by `config` and map its windows.
    ///
    /// Mappings acquired before a failure are released on the way out.
    ///
    /// # Errors
    ///
    /// - [`MonitorError::NoDevice`] if the node is missing or inaccessible
    /// - [`MonitorError::MapFailed`] if a window cannot be mapped
    pub fn open(config: &PlatformConfig) -> Result<Self> {
        let path = config.device_path.clone();
        tracing::debug!("Opening Monitor device: {}", path.display());

        if !path.exists() {
            return Err(MonitorError::no_device(path));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(OFlags::SYNC.bits() as i32)
            .open(&path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    tracing::warn!("Cannot open {}: {e}", path.display());
                    MonitorError::no_device(&path)
                }
                _ => MonitorError::from(e),
            })?;

        let control = MappedWindow::map(
            &file,
            config.control_offset,
            config.control_size,
            "control window",
        )?;

        let cms = match config.cms {
            Some(layout) if !config.has_on_chip_adc => Some(Arc::new(MappedWindow::map(
                &file,
                layout.offset,
                layout.size,
                "CMS window",
            )?)),
            _ => None,
        };

        tracing::info!("Opened Monitor device: {}", path.display());

        Ok(Self {
            path,
            control,
            cms,
            file,
        })
    }
}

impl MonitorDevice for CharDevice {
    fn path(&self) -> &Path {
        &self.path
    }

    fn control(&self) -> &dyn RegisterIo {
        &self.control
    }

    fn cms(&self) -> Option<Arc<dyn RegisterIo>> {
        self.cms
            .as_ref()
            .map(|window| Arc::clone(window) as Arc<dyn RegisterIo>)
    }

    fn map_staging(&self, kind: RegionKind, len: usize) -> Result<Box<dyn StagingBuffer>> {
        let offset = kind.pgoff() * rustix::param::page_size() as u64;

        // SAFETY: fresh shared mapping at a kernel-chosen address. The driver
        // backs it with DMA-coherent memory valid for `len` bytes until munmap.
        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &self.file,
                offset,
            )
        }
        .map_err(|e| {
            tracing::warn!("{kind} staging mmap of {len} bytes failed: {e}");
            MonitorError::NoMemory { bytes: len }
        })?;

        let ptr = NonNull::new(ptr.cast::<u8>()).ok_or(MonitorError::NoMemory { bytes: len })?;
        tracing::trace!("{kind} staging at {:p}, {len} bytes", ptr);
        Ok(Box::new(CharStaging { ptr, len }))
    }

    fn dma_hw2mem(&self, kind: RegionKind, token: &DmaToken) -> Result<()> {
        let request = DmaToken::request(kind);
        tracing::trace!("HW2MEM {kind}: {token:?}");

        // SAFETY: the driver reads exactly size_of::<DmaToken>() bytes from
        // the pointer, as encoded in the request number. `token` is a live
        // repr(C) value for the whole call.
        let ret = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                request as _,
                std::ptr::from_ref(token),
            )
        };
        if ret < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }

    fn poll(&self, events: PollEvents) -> Result<PollEvents> {
        let mut flags = PollFlags::empty();
        if events.contains(PollEvents::DMA) {
            flags |= PollFlags::IN;
        }
        if events.contains(PollEvents::IRQ) {
            flags |= PollFlags::PRI;
        }

        loop {
            let mut fds = [PollFd::new(&self.file, flags)];
            match poll(&mut fds, -1) {
                Ok(_) => {
                    let ready = ready_events(&self.path, fds[0].revents())?;
                    if !ready.is_empty() {
                        return Ok(ready);
                    }
                }
                Err(rustix::io::Errno::INTR) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Decode `revents` from the Monitor node.
///
/// A hang-up means the driver went away; it is reported as an error so
/// callers do not poll a dead descriptor forever.
fn ready_events(path: &Path, revents: PollFlags) -> Result<PollEvents> {
    if revents.intersects(PollFlags::ERR | PollFlags::NVAL | PollFlags::HUP) {
        return Err(std::io::Error::other(format!(
            "poll on {} reported {revents:?}",
            path.display()
        ))
        .into());
    }
    let mut ready = PollEvents::empty();
    if revents.contains(PollFlags::IN) {
        ready |= PollEvents::DMA;
    }
    if revents.contains(PollFlags::PRI) {
        ready |= PollEvents::IRQ;
    }
    Ok(ready)
}

impl Drop for CharDevice {
    fn drop(&mut self) {
        tracing::info!("Closing Monitor device: {}", self.path.display());
    }
}

/// A staging window mapped from the character device.
#[derive(Debug)]
struct CharStaging {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is owned exclusively and valid from any thread.
unsafe impl Send for CharStaging {}

impl StagingBuffer for CharStaging {
    fn user_addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    fn len(&self) -> usize {
        self.len
    }

    fn copy_out(&self, sink: &mut dyn FnMut(&[u8]) -> Result<()>) -> Result<()> {
        fence(Ordering::Acquire);
        // SAFETY: ptr is valid for len bytes until Drop. The DMA engine has
        // finished writing (poll reported DMA) and nothing else writes it.
        let bytes = unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) };
        sink(bytes)
    }
}

impl Drop for CharStaging {
    fn drop(&mut self) {
        // SAFETY: ptr/len come from the successful mmap in map_staging.
        if let Err(e) = unsafe { munmap(self.ptr.as_ptr().cast(), self.len) } {
            tracing::error!("Failed to unmap staging buffer: {e}");
        }
    }
}
