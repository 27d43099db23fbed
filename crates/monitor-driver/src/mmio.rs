//! Memory-mapped register windows.
//!
//! The control block and the Alveo CMS window are both flat arrays of 32-bit
//! words exposed through `mmap` of a character device. [`RegisterIo`] is the
//! word-indexed seam every consumer goes through, so the simulated IP can
//! stand in for the real mapping.

#![allow(clippy::cast_ptr_alignment)]

use crate::error::{MonitorError, Result};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fmt::Debug;
use std::os::fd::AsFd;
use std::ptr::NonNull;
use std::sync::atomic::{fence, Ordering};

/// Word-indexed 32-bit register access.
pub trait RegisterIo: Debug + Send + Sync {
    /// Read the 32-bit word at `word`.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::OutOfBounds`] if `word` is outside the window.
    fn read32(&self, word: usize) -> Result<u32>;

    /// Write `value` to the 32-bit word at `word`.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::OutOfBounds`] if `word` is outside the window.
    fn write32(&self, word: usize, value: u32) -> Result<()>;

    /// Window size in words.
    fn words(&self) -> usize;
}

/// A shared, read/write `mmap` of a device window.
pub struct MappedWindow {
    ptr: NonNull<u8>,
    size: usize,
    what: &'static str,
}

impl Debug for MappedWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedWindow")
            .field("what", &self.what)
            .field("ptr", &format_args!("{:p}", self.ptr))
            .field("size", &self.size)
            .finish()
    }
}

// SAFETY: the mapping is process-wide and owned exclusively by this value.
// Moving it between threads does not invalidate it.
unsafe impl Send for MappedWindow {}

// SAFETY: all access is bounds-checked volatile word access through &self.
// Concurrent word accesses are what the hardware sees from any multi-threaded
// MMIO user; there is no Rust-visible aliasing of non-volatile data.
unsafe impl Sync for MappedWindow {}

impl MappedWindow {
    /// Map `size` bytes of `fd` starting at byte `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::MapFailed`] if the kernel rejects the mapping.
    pub fn map(fd: impl AsFd, offset: u64, size: usize, what: &'static str) -> Result<Self> {
        if size == 0 || size % 4 != 0 {
            return Err(MonitorError::map_failed(
                what,
                format!("window size {size:#x} is not a whole number of words"),
            ));
        }

        // SAFETY: fresh shared mapping chosen by the kernel (null hint). The
        // returned pointer is valid for `size` bytes until munmap in Drop.
        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                fd,
                offset,
            )
        }
        .map_err(|e| MonitorError::map_failed(what, e))?;

        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| MonitorError::map_failed(what, "kernel returned a null mapping"))?;

        tracing::debug!("Mapped {what} at {:p}, offset={offset:#x}, size={size:#x}", ptr);

        Ok(Self { ptr, size, what })
    }

    /// Mapping size in bytes.
    pub const fn size(&self) -> usize {
        self.size
    }

    fn word_ptr(&self, word: usize) -> Result<*mut u32> {
        let limit = self.size / 4;
        if word >= limit {
            return Err(MonitorError::OutOfBounds { word, limit });
        }
        // SAFETY: word < size/4, so the offset stays inside the mapping.
        Ok(unsafe { self.ptr.as_ptr().add(word * 4) }.cast::<u32>())
    }
}

impl RegisterIo for MappedWindow {
    fn read32(&self, word: usize) -> Result<u32> {
        let ptr = self.word_ptr(word)?;
        // SAFETY: ptr is in bounds and 4-byte aligned (page-aligned base,
        // word-sized stride). Volatile since hardware updates the value.
        let value = unsafe { std::ptr::read_volatile(ptr) };
        fence(Ordering::Acquire);
        Ok(value)
    }

    fn write32(&self, word: usize, value: u32) -> Result<()> {
        let ptr = self.word_ptr(word)?;
        fence(Ordering::Release);
        // SAFETY: as in read32. The write has hardware side effects.
        unsafe { std::ptr::write_volatile(ptr, value) };
        Ok(())
    }

    fn words(&self) -> usize {
        self.size / 4
    }
}

impl Drop for MappedWindow {
    fn drop(&mut self) {
        // SAFETY: ptr/size come from the successful mmap in map() and are
        // unmapped exactly once.
        if let Err(e) = unsafe { munmap(self.ptr.as_ptr().cast(), self.size) } {
            tracing::error!("Failed to unmap {}: {e}", self.what);
        } else {
            tracing::debug!("Unmapped {}", self.what);
        }
    }
}
