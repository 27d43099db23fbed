//! Character-device contract of the `monitor` kernel module.
//!
//! The user-space runtime depends on these values bit for bit.
//!
//! ```text
//! mmap   pgoff 0  control registers (non-cached)
//!        pgoff 1  fresh DMA-coherent buffer (power staging)
//!        pgoff 2  fresh DMA-coherent buffer (traces staging)
//! ioctl  _IOW('x', 0, dmaproxy_token)  HW -> MEM, power bank
//!        _IOW('x', 1, dmaproxy_token)  HW -> MEM, traces bank
//! poll   0x0001 POLLDMA  a DMA transfer completed (releases device mutex)
//!        0x0002 POLLIRQ  the Monitor raised its done interrupt
//! ```

/// mmap page index of the control window.
pub const PGOFF_CONTROL: u64 = 0;
/// mmap page index that allocates a power staging buffer.
pub const PGOFF_POWER: u64 = 1;
/// mmap page index that allocates a traces staging buffer.
pub const PGOFF_TRACES: u64 = 2;

/// ioctl magic byte.
pub const IOC_MAGIC: u8 = b'x';
/// ioctl number: DMA from the power BRAM to memory.
pub const IOC_NR_HW2MEM_POWER: u8 = 0;
/// ioctl number: DMA from the traces BRAM to memory.
pub const IOC_NR_HW2MEM_TRACES: u8 = 1;
/// Highest valid ioctl number.
pub const IOC_MAXNR: u8 = 1;

/// Number of pointer-sized fields in a `dmaproxy_token`.
pub const TOKEN_FIELDS: usize = 5;

/// Poll bit: DMA transfer complete.
pub const POLLDMA: u16 = 0x0001;
/// Poll bit: Monitor done interrupt.
pub const POLLIRQ: u16 = 0x0002;

// Linux generic `_IOC` encoding (x86, ARM, AArch64, RISC-V).
const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = 8;
const IOC_SIZESHIFT: u32 = 16;
const IOC_DIRSHIFT: u32 = 30;
const IOC_WRITE: u32 = 1;

/// `_IOW(ty, nr, size)` request number.
#[allow(clippy::cast_possible_truncation)]
pub const fn iow(ty: u8, nr: u8, size: usize) -> u32 {
    (IOC_WRITE << IOC_DIRSHIFT)
        | ((size as u32) << IOC_SIZESHIFT)
        | ((ty as u32) << IOC_TYPESHIFT)
        | ((nr as u32) << IOC_NRSHIFT)
}

/// Decoded ioctl type byte.
#[allow(clippy::cast_possible_truncation)]
pub const fn ioc_type(request: u32) -> u8 {
    ((request >> IOC_TYPESHIFT) & 0xff) as u8
}

/// Decoded ioctl number.
#[allow(clippy::cast_possible_truncation)]
pub const fn ioc_nr(request: u32) -> u8 {
    ((request >> IOC_NRSHIFT) & 0xff) as u8
}
