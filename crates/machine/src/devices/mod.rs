//! Device ranges.
//!
//! Every device-kind range of the physical memory map is handled here. A
//! device has no storage of its own: its committed words live in the
//! processor state, and the handlers translate range-relative offsets into
//! logged reads and writes of that state. This module provides:
//! 1. **Dispatch:** Routing a `(device, offset, log2_size)` access to its handler.
//! 2. **Commitment:** Serializing each device page for the Merkle tree.
//!
//! Unsupported widths never reach the handlers; the physical access layer
//! applies the devio flags (zero read, dropped write, optional 32-bit
//! emulation of 64-bit accesses) before dispatching.

/// CLINT timer device.
pub mod clint;

/// Dehashed-data device registers.
pub mod dhd;

/// Host-target interface device.
pub mod htif;

/// Processor shadow device.
pub mod shadow;

use crate::bus::DeviceId;
use crate::machine::Machine;
use crate::state::ProcessorState;

/// Serializes one page of a device range into `out`.
///
/// Returns `false` when the page has no committed content (it hashes as
/// pristine).
pub(crate) fn peek_page(
    device: DeviceId,
    state: &ProcessorState,
    page_index: u64,
    out: &mut [u8],
) -> bool {
    match device {
        DeviceId::Shadow => shadow::peek_page(state, page_index, out),
        DeviceId::Clint => clint::peek_page(state, page_index, out),
        DeviceId::Htif => htif::peek_page(state, page_index, out),
        DeviceId::Dhd => dhd::peek_page(state, page_index, out),
    }
}

impl Machine {
    /// Dispatches a supported-width device read.
    pub(crate) fn device_read(&mut self, device: DeviceId, offset: u64, log2_size: u32) -> u64 {
        match device {
            DeviceId::Shadow => self.shadow_read(offset),
            DeviceId::Clint => self.clint_read(offset, log2_size),
            DeviceId::Htif => self.htif_read(offset),
            DeviceId::Dhd => self.dhd_read(offset),
        }
    }

    /// Dispatches a supported-width device write.
    pub(crate) fn device_write(&mut self, device: DeviceId, offset: u64, val: u64, log2_size: u32) {
        match device {
            DeviceId::Shadow => {} // the shadow is read-only to the guest
            DeviceId::Clint => self.clint_write(offset, val, log2_size),
            DeviceId::Htif => self.htif_write(offset, val),
            DeviceId::Dhd => self.dhd_write(offset, val),
        }
    }
}

/// Writes a little-endian word into a page image at `offset`.
pub(crate) fn put_word(out: &mut [u8], offset: u64, val: u64) {
    let offset = offset as usize;
    out[offset..offset + 8].copy_from_slice(&val.to_le_bytes());
}
