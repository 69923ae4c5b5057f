//! Physical and Virtual Address types.
//!
//! This module defines strong types for physical and virtual addresses to prevent
//! accidental mixing of address spaces. It provides the following:
//! 1. **Type Safety:** Distinguishes between virtual and physical address spaces at compile time.
//! 2. **Address Manipulation:** Provides helper methods for extracting page offsets and raw values.
//! 3. **MMU Integration:** Acts as the primary interface for address translation operations.

use super::constants::{PAGE_MASK, PAGE_SHIFT};

/// A virtual address in the RISC-V address space.
///
/// Virtual addresses are used by guest software and must be translated to
/// physical addresses through the MMU before accessing memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtAddr(pub u64);

/// A physical address in the guest physical address space.
///
/// Physical addresses select a range in the physical memory map and are used
/// after virtual-to-physical address translation has completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysAddr(pub u64);

impl VirtAddr {
    /// Creates a new virtual address from a raw 64-bit value.
    #[inline(always)]
    pub fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Returns the raw 64-bit address value.
    #[inline(always)]
    pub fn val(&self) -> u64 {
        self.0
    }

    /// Extracts the page offset (lower 12 bits) from the virtual address.
    pub fn page_offset(&self) -> u64 {
        self.0 & PAGE_MASK
    }

    /// Returns the address of the start of the containing 4 KiB page.
    pub fn page_base(&self) -> u64 {
        self.0 & !PAGE_MASK
    }
}

impl PhysAddr {
    /// Creates a new physical address from a raw 64-bit value.
    #[inline(always)]
    pub fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Returns the raw 64-bit address value.
    #[inline(always)]
    pub fn val(&self) -> u64 {
        self.0
    }

    /// Returns the index of the containing 4 KiB page in the physical space.
    pub fn page_index(&self) -> u64 {
        self.0 >> PAGE_SHIFT
    }
}
