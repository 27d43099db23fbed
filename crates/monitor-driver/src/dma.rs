//! BRAM-to-host transfer paths.
//!
//! Two transports exist and one is chosen per session:
//!
//! - [`IoctlPollTransport`]: map a staging buffer, hand the kernel a
//!   [`DmaToken`], poll for [`PollEvents::DMA`], copy out, unmap.
//! - [`PositionalReadTransport`]: `pread` the bank straight out of a
//!   card-to-host DMA node into a page-aligned host buffer.

use crate::device::{MonitorDevice, PollEvents};
use crate::error::{MonitorError, Result};
use crate::platform::{PlatformConfig, TransportKind};
use crate::registry::RegionKind;
use bytemuck::{Pod, Zeroable};
use monitor_chip::contract;
use rustix::io::{pread, Errno};
use std::fmt::Debug;
use std::fs::{File, OpenOptions};
use std::ops::{Deref, DerefMut};
use std::os::fd::{AsFd, BorrowedFd};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

/// Largest single read the kernel performs.
pub const RW_MAX_SIZE: usize = 0x7fff_f000;

/// Alignment of positional-read host buffers.
const HOST_ALIGNMENT: usize = 4096;

/// Argument of the HW->MEM ioctl.
///
/// Field order and width are fixed by the kernel driver.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DmaToken {
    /// User address of the staging mapping
    pub memaddr: usize,
    /// Offset into the staging mapping
    pub memoff: usize,
    /// Hardware address of the BRAM bank
    pub hwaddr: usize,
    /// Offset into the bank
    pub hwoff: usize,
    /// Bytes to transfer
    pub size: usize,
}

impl DmaToken {
    /// Token for a whole-prefix transfer from `hwaddr` into `memaddr`.
    pub const fn new(memaddr: usize, hwaddr: usize, size: usize) -> Self {
        Self {
            memaddr,
            memoff: 0,
            hwaddr,
            hwoff: 0,
            size,
        }
    }

    /// ioctl request number for `kind`.
    pub const fn request(kind: RegionKind) -> u32 {
        contract::iow(
            contract::IOC_MAGIC,
            kind.ioctl_nr(),
            std::mem::size_of::<Self>(),
        )
    }
}

/// One drain: the first `len` bytes of the `kind` bank at `hwaddr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainRequest {
    /// Bank being drained
    pub kind: RegionKind,
    /// Hardware address of the bank
    pub hwaddr: u64,
    /// Bytes to move, a multiple of 16
    pub len: usize,
}

/// A way of moving BRAM contents into host memory.
pub trait DmaTransport: Debug + Send {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Move `request.len` bytes and hand them to `sink` exactly once.
    ///
    /// # Errors
    ///
    /// Returns the first device, I/O or sink error. Host resources taken
    /// for the transfer are released on every path.
    fn drain(
        &self,
        device: &dyn MonitorDevice,
        request: &DrainRequest,
        sink: &mut dyn FnMut(&[u8]) -> Result<()>,
    ) -> Result<()>;
}

/// Staging mmap + ioctl + poll.
#[derive(Debug, Default, Clone, Copy)]
pub struct IoctlPollTransport;

impl DmaTransport for IoctlPollTransport {
    fn name(&self) -> &'static str {
        "ioctl-poll"
    }

    fn drain(
        &self,
        device: &dyn MonitorDevice,
        request: &DrainRequest,
        sink: &mut dyn FnMut(&[u8]) -> Result<()>,
    ) -> Result<()> {
        let DrainRequest { kind, hwaddr, len } = *request;
        let hwaddr = usize::try_from(hwaddr).map_err(|_| {
            MonitorError::config(format!("{kind} bank {hwaddr:#x} exceeds the host word size"))
        })?;

        let staging = device.map_staging(kind, len)?;
        let token = DmaToken::new(staging.user_addr(), hwaddr, len);
        device.dma_hw2mem(kind, &token)?;

        loop {
            let ready = device.poll(PollEvents::DMA)?;
            if ready.contains(PollEvents::DMA) {
                break;
            }
            tracing::trace!("Woke for {ready:?} while waiting for {kind} DMA");
        }

        staging.copy_out(&mut |bytes| sink(&bytes[..len]))?;
        tracing::debug!("Drained {len} {kind} bytes via staging");
        Ok(())
    }
}

/// Positional reads from a card-to-host node.
#[derive(Debug)]
pub struct PositionalReadTransport {
    path: PathBuf,
    file: File,
}

impl PositionalReadTransport {
    /// Open the card-to-host node.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::NoDevice`] if the node cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).open(&path).map_err(|e| {
            tracing::warn!("Cannot open {}: {e}", path.display());
            MonitorError::no_device(&path)
        })?;
        tracing::debug!("Opened card-to-host node {}", path.display());
        Ok(Self { path, file })
    }

    /// Node this transport reads.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DmaTransport for PositionalReadTransport {
    fn name(&self) -> &'static str {
        "positional-read"
    }

    fn drain(
        &self,
        _device: &dyn MonitorDevice,
        request: &DrainRequest,
        sink: &mut dyn FnMut(&[u8]) -> Result<()>,
    ) -> Result<()> {
        let DrainRequest { kind, hwaddr, len } = *request;
        let mut buffer = AlignedBuffer::new(len + HOST_ALIGNMENT)?;
        read_exact_at(self.file.as_fd(), &mut buffer[..len], hwaddr)?;
        sink(&buffer[..len])?;
        tracing::debug!("Drained {len} {kind} bytes from {}", self.path.display());
        Ok(())
    }
}

/// Fill `buf` from `fd` at `offset`, in chunks of at most [`RW_MAX_SIZE`].
///
/// # Errors
///
/// Returns [`MonitorError::Io`] on a failed or short read.
pub fn read_exact_at(fd: BorrowedFd<'_>, buf: &mut [u8], offset: u64) -> Result<()> {
    let mut done = 0usize;
    while done < buf.len() {
        let chunk = (buf.len() - done).min(RW_MAX_SIZE);
        let at = offset + done as u64;
        let n = loop {
            match pread(fd, &mut buf[done..done + chunk], at) {
                Err(Errno::INTR) => {}
                other => break other?,
            }
        };
        if n != chunk {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("short read at {at:#x}: {n} of {chunk} bytes"),
            )
            .into());
        }
        done += n;
    }
    Ok(())
}

/// Page-aligned, zeroed host buffer.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    layout: std::alloc::Layout,
}

impl Debug for AlignedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("ptr", &format_args!("{:p}", self.ptr))
            .field("len", &self.layout.size())
            .finish()
    }
}

// SAFETY: the allocation is owned exclusively; no thread-local state.
unsafe impl Send for AlignedBuffer {}

impl AlignedBuffer {
    /// Allocate `len` zeroed bytes on a 4 KiB boundary.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::NoMemory`] if the allocation fails.
    pub fn new(len: usize) -> Result<Self> {
        let layout = std::alloc::Layout::from_size_align(len.max(1), HOST_ALIGNMENT)
            .map_err(|_| MonitorError::NoMemory { bytes: len })?;
        // SAFETY: layout has non-zero size and a power-of-two alignment.
        // Released in Drop with the same layout.
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or(MonitorError::NoMemory { bytes: len })?;
        Ok(Self { ptr, layout })
    }
}

impl Deref for AlignedBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: ptr is valid and initialised for layout.size() bytes.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }
}

impl DerefMut for AlignedBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in deref; &mut self guarantees exclusivity.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: allocated in new() with this exact layout.
        unsafe { std::alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// Trace transport for `config`, chosen once per session.
///
/// # Errors
///
/// Returns [`MonitorError::Config`] if the positional-read node is not
/// configured, or [`MonitorError::NoDevice`] if it cannot be opened.
pub fn select_transport(config: &PlatformConfig) -> Result<Box<dyn DmaTransport>> {
    let transport: Box<dyn DmaTransport> = match config.transport {
        TransportKind::IoctlPoll => Box::new(IoctlPollTransport),
        TransportKind::PositionalRead => {
            let path = config.traces_device.as_ref().ok_or_else(|| {
                MonitorError::config("positional-read transport needs a traces device")
            })?;
            Box::new(PositionalReadTransport::open(path)?)
        }
    };
    tracing::debug!("Trace transport: {}", transport.name());
    Ok(transport)
}
