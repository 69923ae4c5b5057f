//! Physical memory map.
//!
//! This module implements the ordered set of non-overlapping physical memory
//! ranges the machine dispatches accesses through. It provides:
//! 1. **Range registration:** ram and device ranges with layout validation.
//! 2. **Lookup:** Binary search by base address.
//! 3. **Device dispatch metadata:** A tagged backing variant and devio width flags,
//!    so hot paths branch on the tag instead of calling through a vtable.
//! 4. **Commitment support:** Per-page `peek` windows for the Merkle tree and
//!    dirty-page bookkeeping for ram ranges.

/// Host buffers and dirty-page bitmaps.
pub mod ram;

use crate::common::constants::{PAGE_SHIFT, PAGE_SIZE};
use crate::common::error::MachineError;

pub use ram::{DirtyPageMap, HostBuffer};

/// Identifies the device behind a device-kind range.
///
/// The machine routes accesses to the matching handler by branching on this
/// tag; devices have no state of their own beyond the processor's
/// integration registers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceId {
    /// Processor shadow: the register file and CSRs as committed words.
    Shadow,
    /// Core-local interruptor: timer compare and derived time.
    Clint,
    /// Host-target interface: halt, console and yield.
    Htif,
    /// Dehashed data device registers.
    Dhd,
}

/// Supported access widths and emulation hints for a device range.
///
/// Bit `i` grants accesses of size `2^i` bytes (bit 0 = byte, bit 3 =
/// doubleword). The separate 32-bit emulation hint synthesizes a 64-bit
/// access from two 32-bit halves, low half first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DevioFlags(u32);

impl DevioFlags {
    /// Byte accesses supported.
    pub const W8: u32 = 1 << 0;
    /// Halfword accesses supported.
    pub const W16: u32 = 1 << 1;
    /// Word accesses supported.
    pub const W32: u32 = 1 << 2;
    /// Doubleword accesses supported.
    pub const W64: u32 = 1 << 3;
    /// Emulate 64-bit accesses as two 32-bit accesses.
    pub const SIZE32_EMULATE_64: u32 = 1 << 4;

    /// Builds a flag set from raw bits.
    pub fn new(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns whether accesses of size `2^log2_size` are supported directly.
    #[inline]
    pub fn supports(self, log2_size: u32) -> bool {
        (self.0 >> log2_size) & 1 != 0
    }

    /// Returns whether 64-bit accesses should be split into 32-bit halves.
    #[inline]
    pub fn size32_emulate_64(self) -> bool {
        self.0 & Self::SIZE32_EMULATE_64 != 0
    }
}

/// Backing storage of a physical memory range.
#[derive(Debug)]
pub enum Backing {
    /// Host memory with dirty-page tracking.
    Ram {
        /// Backing host buffer.
        buffer: HostBuffer,
        /// Dirty-page bitmap for incremental Merkle updates.
        dirty: DirtyPageMap,
    },
    /// A memory-mapped device.
    Device {
        /// Which device handles accesses to this range.
        device: DeviceId,
        /// Supported access widths.
        flags: DevioFlags,
    },
}

/// One range of the physical memory map.
#[derive(Debug)]
pub struct PmaRange {
    start: u64,
    length: u64,
    /// Backing storage (ram buffer or device tag).
    pub backing: Backing,
}

impl PmaRange {
    /// Returns the base physical address.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Returns the length in bytes.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Returns whether `paddr` falls inside this range.
    pub fn contains(&self, paddr: u64) -> bool {
        paddr >= self.start && paddr - self.start < self.length
    }

    /// Returns whether this is a ram-kind range.
    pub fn is_ram(&self) -> bool {
        matches!(self.backing, Backing::Ram { .. })
    }

    /// Borrows one page of backing content for hashing, or `None` when the
    /// page has no representation of its own (device ranges serialize
    /// through the machine instead).
    pub fn peek_page(&self, page_index: u64) -> Option<&[u8]> {
        match &self.backing {
            Backing::Ram { buffer, .. } => {
                let offset = (page_index << PAGE_SHIFT) as usize;
                Some(buffer.slice(offset, PAGE_SIZE as usize))
            }
            Backing::Device { .. } => None,
        }
    }
}

/// The ordered physical memory map.
///
/// Ranges are kept sorted by base address; `find` is a binary search. The
/// range count is small (shadow, ROM, CLINT, HTIF, DHD, RAM, a few drives),
/// so lookup cost is negligible next to the TLB fast paths that bypass it.
#[derive(Debug, Default)]
pub struct PhysMap {
    ranges: Vec<PmaRange>,
}

impl PhysMap {
    /// Creates an empty memory map.
    pub fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    /// Registers a ram-kind range backed by `buffer`.
    ///
    /// # Errors
    ///
    /// Fails if the layout rules are violated (see `validate`) or the
    /// buffer does not match the advertised length.
    pub fn register_ram(
        &mut self,
        start: u64,
        length: u64,
        buffer: HostBuffer,
    ) -> Result<usize, MachineError> {
        if buffer.len() as u64 != length {
            return Err(MachineError::InvalidRange {
                start,
                length,
                reason: "backing buffer does not match range length",
            });
        }
        let dirty = DirtyPageMap::new(length);
        self.insert(PmaRange {
            start,
            length,
            backing: Backing::Ram { buffer, dirty },
        })
    }

    /// Registers a device-kind range.
    ///
    /// # Errors
    ///
    /// Fails if the layout rules are violated (see `validate`).
    pub fn register_device(
        &mut self,
        start: u64,
        length: u64,
        device: DeviceId,
        flags: DevioFlags,
    ) -> Result<usize, MachineError> {
        self.insert(PmaRange {
            start,
            length,
            backing: Backing::Device { device, flags },
        })
    }

    /// Finds the index of the range containing `paddr`.
    #[inline]
    pub fn find(&self, paddr: u64) -> Option<usize> {
        let idx = self
            .ranges
            .partition_point(|r| r.start <= paddr)
            .checked_sub(1)?;
        self.ranges[idx].contains(paddr).then_some(idx)
    }

    /// Borrows a range by index.
    pub fn range(&self, index: usize) -> &PmaRange {
        &self.ranges[index]
    }

    /// Mutably borrows a range by index.
    pub fn range_mut(&mut self, index: usize) -> &mut PmaRange {
        &mut self.ranges[index]
    }

    /// Returns the number of registered ranges.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Returns whether the map has no ranges.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Iterates over the ranges in ascending base order.
    pub fn iter(&self) -> impl Iterator<Item = &PmaRange> {
        self.ranges.iter()
    }

    /// Marks the page containing the range-relative `offset` of range
    /// `index` dirty. No-op for device ranges, which are always rehashed.
    #[inline]
    pub fn set_dirty(&mut self, index: usize, offset: u64) {
        if let Backing::Ram { dirty, .. } = &mut self.ranges[index].backing {
            dirty.mark(offset);
        }
    }

    fn insert(&mut self, range: PmaRange) -> Result<usize, MachineError> {
        Self::validate(range.start, range.length)?;
        for existing in &self.ranges {
            let disjoint = range.start + range.length <= existing.start
                || existing.start + existing.length <= range.start;
            if !disjoint {
                return Err(MachineError::RangeOverlap {
                    start: range.start,
                    length: range.length,
                });
            }
        }
        let pos = self.ranges.partition_point(|r| r.start < range.start);
        self.ranges.insert(pos, range);
        Ok(pos)
    }

    fn validate(start: u64, length: u64) -> Result<(), MachineError> {
        if length == 0 || !length.is_power_of_two() {
            return Err(MachineError::InvalidRange {
                start,
                length,
                reason: "length must be a non-zero power of two",
            });
        }
        if length < PAGE_SIZE {
            return Err(MachineError::InvalidRange {
                start,
                length,
                reason: "length must be at least one page",
            });
        }
        if start & (length - 1) != 0 {
            return Err(MachineError::InvalidRange {
                start,
                length,
                reason: "base must be aligned to the range length",
            });
        }
        if start.checked_add(length).is_none() {
            return Err(MachineError::InvalidRange {
                start,
                length,
                reason: "range wraps the physical address space",
            });
        }
        Ok(())
    }
}
