//! Register I/O seam and tile address decoder.
//!
//! # Address Encoding
//!
//! AIE1 addresses encode tile location and register offset on top of the
//! array base address:
//! ```text
//! addr = array_base + (col << col_shift) + (row << row_shift) + offset
//!
//! For AIE1:
//!   array_base = 0x200_0000_0000
//!   COL_SHIFT  = 23
//!   ROW_SHIFT  = 18
//! ```
//!
//! The shifts come from the register layout's `AddressMap`, never from
//! constants in this module.

use std::fmt;
use std::time::{Duration, Instant};

use super::layout::AddressMap;

/// Decoded tile address with column, row, and register offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileAddress {
    pub col: u8,
    pub row: u8,
    /// Register offset within the tile
    pub offset: u32,
}

impl TileAddress {
    /// Decode an absolute address. Returns `None` below the array base.
    pub fn decode(addr: u64, map: &AddressMap) -> Option<Self> {
        let rel = addr.checked_sub(map.array_base)?;
        let row_mask = (1u64 << (map.col_shift - map.row_shift)) - 1;
        Some(Self {
            col: (rel >> map.col_shift) as u8,
            row: ((rel >> map.row_shift) & row_mask) as u8,
            offset: (rel & ((1u64 << map.row_shift) - 1)) as u32,
        })
    }

    /// Encode tile coordinates and offset into an absolute address.
    pub fn encode(col: u8, row: u8, offset: u32, map: &AddressMap) -> u64 {
        map.tile_base(col, row) + offset as u64
    }
}

impl fmt::Display for TileAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tile({},{}) @ 0x{:05X}", self.col, self.row, self.offset)
    }
}

/// Raw 32-bit register access.
///
/// All accesses are synchronous and ordered. Implementations sit on top of
/// a mapped register window, a kernel driver, or `SimRegisters` in tests.
pub trait RegisterIo: Send + Sync {
    fn read32(&self, addr: u64) -> u32;

    fn write32(&self, addr: u64, value: u32);

    /// Masked read-modify-write: only bits in `mask` take `value`.
    fn mask_write32(&self, addr: u64, mask: u32, value: u32) {
        let old = self.read32(addr);
        self.write32(addr, (old & !mask) | (value & mask));
    }

    /// Re-read `addr` until `(read & mask) == expected` or `timeout_us`
    /// microseconds of wall-clock time have passed.
    ///
    /// Always reads at least once, so a zero budget is a single check.
    fn poll(&self, addr: u64, mask: u32, expected: u32, timeout_us: u32) -> bool {
        let deadline = Instant::now() + Duration::from_micros(timeout_us as u64);
        loop {
            if self.read32(addr) & mask == expected {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::layout::RegisterLayout;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Register that reads 1 from the `ready_after`-th read on.
    struct SlowFlag {
        reads: AtomicU32,
        ready_after: u32,
    }

    impl RegisterIo for SlowFlag {
        fn read32(&self, _addr: u64) -> u32 {
            let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
            (n >= self.ready_after) as u32
        }

        fn write32(&self, _addr: u64, _value: u32) {}
    }

    #[test]
    fn test_poll_budget_is_wall_clock() {
        let never = SlowFlag { reads: AtomicU32::new(0), ready_after: u32::MAX };
        assert!(!never.poll(0, 1, 1, 0));
        assert_eq!(never.reads.load(Ordering::SeqCst), 1);

        let start = Instant::now();
        assert!(!never.poll(0, 1, 1, 2000));
        assert!(start.elapsed() >= Duration::from_micros(2000));

        let soon = SlowFlag { reads: AtomicU32::new(0), ready_after: 3 };
        assert!(soon.poll(0, 1, 1, 1_000_000));
        assert_eq!(soon.reads.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_address_roundtrip() {
        let map = RegisterLayout::aie1().address;

        let addr = TileAddress::encode(3, 2, 0x34200, &map);
        assert_eq!(addr, 0x200_0000_0000 + (3 << 23) + (2 << 18) + 0x34200);

        let decoded = TileAddress::decode(addr, &map).unwrap();
        assert_eq!(decoded, TileAddress { col: 3, row: 2, offset: 0x34200 });
        assert_eq!(decoded.to_string(), "tile(3,2) @ 0x34200");
    }

    #[test]
    fn test_decode_below_base() {
        let map = RegisterLayout::aie1().address;
        assert!(TileAddress::decode(0x1000, &map).is_none());
    }
}
