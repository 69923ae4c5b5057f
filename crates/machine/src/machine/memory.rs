//! Memory access paths.
//!
//! This file implements the interpreter's view of memory:
//! 1. **Fast paths:** Directly indexed TLB hits resolve to host pointers
//!    without touching the map or the walker.
//! 2. **Slow paths:** Translation, range lookup, TLB refill, device
//!    dispatch with devio width rules, and access logging.
//! 3. **Unaligned decomposition:** Misaligned accesses split into the
//!    minimum aligned sequence at the next smaller power of two; a fault in
//!    any piece reports the original virtual address and leaves memory
//!    untouched up to the faulting piece.
//!
//! Failures never unwind: the would-be trap is staged into
//! `pending_exception`/`pending_tval` and the caller converts it into a
//! raised exception.

use super::Machine;
use crate::bus::Backing;
use crate::common::constants::WORD_MASK;
use crate::common::{AccessType, VirtAddr};
use crate::isa::cause::exception;

/// Reads a value of `1 << log2_size` bytes from a host address.
///
/// # Safety
///
/// `host` must point at `1 << log2_size` readable bytes inside a live
/// [`crate::bus::HostBuffer`].
#[inline(always)]
unsafe fn read_host(host: usize, log2_size: u32) -> u64 {
    // SAFETY: caller contract; reads are unaligned-tolerant.
    unsafe {
        match log2_size {
            0 => u64::from((host as *const u8).read()),
            1 => u64::from((host as *const u16).read_unaligned()),
            2 => u64::from((host as *const u32).read_unaligned()),
            _ => (host as *const u64).read_unaligned(),
        }
    }
}

/// Writes a value of `1 << log2_size` bytes to a host address.
///
/// # Safety
///
/// `host` must point at `1 << log2_size` writable bytes inside a live
/// [`crate::bus::HostBuffer`].
#[inline(always)]
unsafe fn write_host(host: usize, val: u64, log2_size: u32) {
    // SAFETY: caller contract; writes are unaligned-tolerant.
    unsafe {
        match log2_size {
            0 => (host as *mut u8).write(val as u8),
            1 => (host as *mut u16).write_unaligned(val as u16),
            2 => (host as *mut u32).write_unaligned(val as u32),
            _ => (host as *mut u64).write_unaligned(val),
        }
    }
}

/// Splices `val` of `1 << log2_size` bytes into `word` at byte offset
/// `byte` (little-endian).
fn splice_word(word: u64, byte: u64, val: u64, log2_size: u32) -> u64 {
    if log2_size >= 3 {
        return val;
    }
    let width_bits = 8u32 << log2_size;
    let shift = byte * 8;
    let mask = ((1u64 << width_bits) - 1) << shift;
    (word & !mask) | ((val << shift) & mask)
}

impl Machine {
    #[inline]
    pub(crate) fn stage(&mut self, cause: u64, tval: u64) {
        self.state.pending_exception = cause;
        self.state.pending_tval = tval;
    }

    /// Reads `1 << log2_size` bytes at virtual address `vaddr`.
    ///
    /// # Errors
    ///
    /// Stages a load page fault or load access fault and returns `Err`.
    pub(crate) fn read_virtual(&mut self, vaddr: u64, log2_size: u32) -> Result<u64, ()> {
        let size = 1u64 << log2_size;
        if vaddr & (size - 1) != 0 {
            return self.read_virtual_unaligned(vaddr, log2_size);
        }
        if !self.log_active() {
            if let Some(host) = self.tlb.read.hit(vaddr, size) {
                // SAFETY: a valid read-TLB entry maps this page into a live
                // ram buffer; the aligned access cannot cross it.
                return Ok(unsafe { read_host(host, log2_size) });
            }
        }
        self.read_virtual_slow(vaddr, log2_size)
    }

    /// Misaligned reads decompose into two aligned accesses of the same
    /// width (byte pair for halfwords) and merge with shifts. Any fault is
    /// re-reported against the original address.
    fn read_virtual_unaligned(&mut self, vaddr: u64, log2_size: u32) -> Result<u64, ()> {
        let result = match log2_size {
            1 => self.read_virtual(vaddr, 0).and_then(|v0| {
                self.read_virtual(vaddr + 1, 0).map(|v1| v0 | (v1 << 8))
            }),
            2 => {
                let al = (vaddr & 3) * 8;
                let base = vaddr & !3;
                self.read_virtual(base, 2).and_then(|v0| {
                    self.read_virtual(base + 4, 2)
                        .map(|v1| ((v0 >> al) | (v1 << (32 - al))) & 0xFFFF_FFFF)
                })
            }
            _ => {
                let al = (vaddr & 7) * 8;
                let base = vaddr & !7;
                self.read_virtual(base, 3).and_then(|v0| {
                    self.read_virtual(base + 8, 3)
                        .map(|v1| (v0 >> al) | (v1 << (64 - al)))
                })
            }
        };
        if result.is_err() {
            self.state.pending_tval = vaddr;
        }
        result
    }

    fn read_virtual_slow(&mut self, vaddr: u64, log2_size: u32) -> Result<u64, ()> {
        let Ok(paddr) = self.translate_address(VirtAddr::new(vaddr), AccessType::Read) else {
            self.stage(exception::LOAD_PAGE_FAULT, vaddr);
            return Err(());
        };
        let paddr = paddr.val();
        let Some(idx) = self.map.find(paddr) else {
            self.stage(exception::FAULT_LOAD, vaddr);
            return Err(());
        };
        let range = self.map.range(idx);
        let offset = paddr - range.start();
        match &range.backing {
            Backing::Ram { buffer, .. } => {
                let host = buffer.as_ptr() as usize + offset as usize;
                self.tlb.read.fill(vaddr, host as *mut u8);
                self.log_memory_read(paddr, host);
                // SAFETY: offset is inside the range, whose buffer spans it.
                Ok(unsafe { read_host(host, log2_size) })
            }
            Backing::Device { device, flags } => {
                let (device, flags) = (*device, *flags);
                if flags.supports(log2_size) {
                    Ok(self.device_read(device, offset, log2_size))
                } else if flags.size32_emulate_64() && log2_size == 3 {
                    let lo = self.device_read(device, offset, 2);
                    let hi = self.device_read(device, offset + 4, 2);
                    Ok(lo | (hi << 32))
                } else {
                    // Unsupported widths read as zero.
                    Ok(0)
                }
            }
        }
    }

    /// Writes `1 << log2_size` bytes at virtual address `vaddr`.
    ///
    /// # Errors
    ///
    /// Stages a store page fault or store access fault and returns `Err`.
    pub(crate) fn write_virtual(&mut self, vaddr: u64, val: u64, log2_size: u32) -> Result<(), ()> {
        let size = 1u64 << log2_size;
        if vaddr & (size - 1) != 0 {
            // Byte-by-byte: if the first byte faults nothing was written.
            for i in 0..size {
                if self.write_virtual(vaddr + i, (val >> (8 * i)) & 0xFF, 0).is_err() {
                    self.state.pending_tval = vaddr;
                    return Err(());
                }
            }
            return Ok(());
        }
        if !self.log_active() {
            if let Some(host) = self.tlb.write.hit(vaddr, size) {
                // SAFETY: a valid write-TLB entry maps this page into a live
                // ram buffer whose page is already marked dirty.
                unsafe { write_host(host, val, log2_size) };
                return Ok(());
            }
        }
        self.write_virtual_slow(vaddr, val, log2_size)
    }

    fn write_virtual_slow(&mut self, vaddr: u64, val: u64, log2_size: u32) -> Result<(), ()> {
        let Ok(paddr) = self.translate_address(VirtAddr::new(vaddr), AccessType::Write) else {
            self.stage(exception::STORE_PAGE_FAULT, vaddr);
            return Err(());
        };
        let paddr = paddr.val();
        let Some(idx) = self.map.find(paddr) else {
            self.stage(exception::FAULT_STORE, vaddr);
            return Err(());
        };
        let range = self.map.range(idx);
        let offset = paddr - range.start();
        match &range.backing {
            Backing::Ram { buffer, .. } => {
                let host = buffer.as_ptr() as usize + offset as usize;
                self.map.set_dirty(idx, offset);
                // The walker has set the PTE dirty bit by now, which is the
                // prerequisite for caching a write translation.
                self.tlb.write.fill(vaddr, host as *mut u8);
                self.logged_host_write(paddr, host, val, log2_size);
                Ok(())
            }
            Backing::Device { device, flags } => {
                let (device, flags) = (*device, *flags);
                if flags.supports(log2_size) {
                    self.device_write(device, offset, val, log2_size);
                } else if flags.size32_emulate_64() && log2_size == 3 {
                    self.device_write(device, offset, val & 0xFFFF_FFFF, 2);
                    self.device_write(device, offset + 4, val >> 32, 2);
                }
                // Unsupported widths drop the write.
                Ok(())
            }
        }
    }

    /// Fetches one 16-bit instruction parcel at virtual address `vaddr`.
    ///
    /// # Errors
    ///
    /// Stages a fetch page fault or fetch access fault and returns `Err`.
    pub(crate) fn fetch_u16(&mut self, vaddr: u64) -> Result<u16, ()> {
        if !self.log_active() {
            if let Some(host) = self.tlb.fetch.hit(vaddr, 2) {
                // SAFETY: a valid fetch-TLB entry maps this page into a live
                // ram buffer.
                return Ok(unsafe { read_host(host, 1) } as u16);
            }
        }
        let Ok(paddr) = self.translate_address(VirtAddr::new(vaddr), AccessType::Fetch) else {
            self.stage(exception::FETCH_PAGE_FAULT, vaddr);
            return Err(());
        };
        let paddr = paddr.val();
        let Some(idx) = self.map.find(paddr) else {
            self.stage(exception::FAULT_FETCH, vaddr);
            return Err(());
        };
        let range = self.map.range(idx);
        let Backing::Ram { buffer, .. } = &range.backing else {
            // Code only executes from ram-kind ranges.
            self.stage(exception::FAULT_FETCH, vaddr);
            return Err(());
        };
        let host = buffer.as_ptr() as usize + (paddr - range.start()) as usize;
        self.tlb.fetch.fill(vaddr, host as *mut u8);
        self.log_memory_read(paddr, host);
        // SAFETY: the parcel lies inside the range's buffer.
        Ok(unsafe { read_host(host, 1) } as u16)
    }

    /// Reads one committed value at a physical address, dispatching to ram
    /// or a device. Used by the walker (PTE reads) and the atomics.
    pub(crate) fn phys_read(&mut self, paddr: u64, log2_size: u32) -> Option<u64> {
        let idx = self.map.find(paddr)?;
        let range = self.map.range(idx);
        let offset = paddr - range.start();
        match &range.backing {
            Backing::Ram { buffer, .. } => {
                let host = buffer.as_ptr() as usize + offset as usize;
                self.log_memory_read(paddr, host);
                // SAFETY: offset is inside the range's buffer.
                Some(unsafe { read_host(host, log2_size) })
            }
            Backing::Device { device, flags } => {
                let (device, flags) = (*device, *flags);
                flags
                    .supports(log2_size)
                    .then(|| self.device_read(device, offset, log2_size))
                    .or(Some(0))
            }
        }
    }

    /// Writes one committed value at a physical address. Returns `false`
    /// when no range backs the address.
    pub(crate) fn phys_write(&mut self, paddr: u64, val: u64, log2_size: u32) -> bool {
        let Some(idx) = self.map.find(paddr) else {
            return false;
        };
        let range = self.map.range(idx);
        let offset = paddr - range.start();
        match &range.backing {
            Backing::Ram { buffer, .. } => {
                let host = buffer.as_ptr() as usize + offset as usize;
                self.map.set_dirty(idx, offset);
                self.logged_host_write(paddr, host, val, log2_size);
                true
            }
            Backing::Device { device, flags } => {
                let (device, flags) = (*device, *flags);
                if flags.supports(log2_size) {
                    self.device_write(device, offset, val, log2_size);
                }
                true
            }
        }
    }

    /// Records the containing word of a ram read when logging is active.
    fn log_memory_read(&mut self, paddr: u64, host: usize) {
        if !self.log_active() {
            return;
        }
        let word_addr = paddr & !WORD_MASK;
        let word_host = host - (paddr & WORD_MASK) as usize;
        // SAFETY: the containing word lies in the same range as paddr, as
        // all ranges are word-multiple sized and aligned.
        let word = unsafe { read_host(word_host, 3) };
        self.log_read(word_addr, word, "memory");
    }

    /// Performs a ram write with word-granularity logging around it.
    fn logged_host_write(&mut self, paddr: u64, host: usize, val: u64, log2_size: u32) {
        if self.log_active() {
            let word_addr = paddr & !WORD_MASK;
            let word_host = host - (paddr & WORD_MASK) as usize;
            // SAFETY: as in log_memory_read.
            let old = unsafe { read_host(word_host, 3) };
            let new = splice_word(old, paddr & WORD_MASK, val, log2_size);
            self.log_write_pre(word_addr, old, new, "memory");
            // SAFETY: the target bytes lie inside the range's buffer.
            unsafe { write_host(host, val, log2_size) };
            self.log_write_post(word_addr);
        } else {
            // SAFETY: the target bytes lie inside the range's buffer.
            unsafe { write_host(host, val, log2_size) };
        }
    }
}
