//! Sample formats stored in the two on-chip BRAM banks.

/// Bytes per power sample (one 32-bit ADC reading).
pub const POWER_ELEMENT_SIZE: usize = 4;

/// Bytes per trace sample (32-bit timestamp + 32-bit signal snapshot).
pub const TRACES_ELEMENT_SIZE: usize = 8;

/// DMA transfers must be a multiple of this many bytes.
pub const TRANSFER_ALIGNMENT: usize = 16;

/// Whether a transfer of `bytes` satisfies the DMA length rule.
pub const fn is_transfer_aligned(bytes: usize) -> bool {
    bytes % TRANSFER_ALIGNMENT == 0
}

/// Smallest sample count `>= count` whose byte length is 16-byte aligned.
pub const fn aligned_count(count: usize, element_size: usize) -> usize {
    let per_block = TRANSFER_ALIGNMENT / element_size;
    count.div_ceil(per_block) * per_block
}

/// Timestamp part (low 32 bits) of a packed trace sample.
#[allow(clippy::cast_possible_truncation)]
pub const fn trace_timestamp(sample: u64) -> u32 {
    (sample & 0xFFFF_FFFF) as u32
}

/// Signal snapshot part (high 32 bits) of a packed trace sample.
#[allow(clippy::cast_possible_truncation)]
pub const fn trace_signals(sample: u64) -> u32 {
    (sample >> 32) as u32
}

/// Pack a timestamp and a signal snapshot into a trace sample.
pub const fn pack_trace(timestamp: u32, signals: u32) -> u64 {
    ((signals as u64) << 32) | timestamp as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligned_count_rounds_to_sixteen_bytes() {
        assert_eq!(aligned_count(0, POWER_ELEMENT_SIZE), 0);
        assert_eq!(aligned_count(5, POWER_ELEMENT_SIZE), 8);
        assert_eq!(aligned_count(64, POWER_ELEMENT_SIZE), 64);
        assert_eq!(aligned_count(3, TRACES_ELEMENT_SIZE), 4);
        let full_bank = aligned_count(131_071, POWER_ELEMENT_SIZE);
        assert!(is_transfer_aligned(full_bank * POWER_ELEMENT_SIZE));
    }

    #[test]
    fn trace_halves() {
        let s = 0xCAFE_BABE_1234_5678;
        assert_eq!(trace_timestamp(s), 0x1234_5678);
        assert_eq!(trace_signals(s), 0xCAFE_BABE);
        assert_eq!(pack_trace(0x1234_5678, 0xCAFE_BABE), s);
    }
}
