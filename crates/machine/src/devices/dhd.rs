//! Dehashed-data device registers.
//!
//! The DHD register block describes a target range the host fills with
//! dehashed data: the target window (`tstart`/`tlength`), the current data
//! and hash lengths, and the input hash words. The dehashing itself is the
//! host's job; the core only commits and exposes the registers. The target
//! range is an ordinary ram range registered at construction.

use crate::machine::Machine;
use crate::state::{DHD_H_REG_COUNT, ProcessorState};

/// Offset of the target range start register.
pub const TSTART_OFFSET: u64 = 0x00;
/// Offset of the target range length register.
pub const TLENGTH_OFFSET: u64 = 0x08;
/// Offset of the dehashed data length register.
pub const DLENGTH_OFFSET: u64 = 0x10;
/// Offset of the input hash length register.
pub const HLENGTH_OFFSET: u64 = 0x18;
/// Offset of the first input hash word; `h[i]` lives at `H_BASE + 8 * i`.
pub const H_BASE: u64 = 0x20;

/// Serializes the DHD register page into `out`.
pub(crate) fn peek_page(state: &ProcessorState, page_index: u64, out: &mut [u8]) -> bool {
    if page_index != 0 {
        return false;
    }
    out.fill(0);
    super::put_word(out, TSTART_OFFSET, state.dhd_tstart);
    super::put_word(out, TLENGTH_OFFSET, state.dhd_tlength);
    super::put_word(out, DLENGTH_OFFSET, state.dhd_dlength);
    super::put_word(out, HLENGTH_OFFSET, state.dhd_hlength);
    for i in 0..DHD_H_REG_COUNT as u64 {
        super::put_word(out, H_BASE + 8 * i, state.dhd_h[i as usize]);
    }
    true
}

impl Machine {
    /// Guest read of a DHD register.
    pub(crate) fn dhd_read(&mut self, offset: u64) -> u64 {
        match offset {
            TSTART_OFFSET => self.read_dhd_tstart(),
            TLENGTH_OFFSET => self.read_dhd_tlength(),
            DLENGTH_OFFSET => self.read_dhd_dlength(),
            HLENGTH_OFFSET => self.read_dhd_hlength(),
            o if (H_BASE..H_BASE + 8 * DHD_H_REG_COUNT as u64).contains(&o) && o & 7 == 0 => {
                self.read_dhd_h(((o - H_BASE) / 8) as usize)
            }
            _ => 0,
        }
    }

    /// Guest write of a DHD register; the target window is fixed at
    /// construction, the remaining registers are writable.
    pub(crate) fn dhd_write(&mut self, offset: u64, val: u64) {
        match offset {
            DLENGTH_OFFSET => self.write_dhd_dlength(val),
            HLENGTH_OFFSET => self.write_dhd_hlength(val),
            o if (H_BASE..H_BASE + 8 * DHD_H_REG_COUNT as u64).contains(&o) && o & 7 == 0 => {
                self.write_dhd_h(((o - H_BASE) / 8) as usize, val);
            }
            _ => {}
        }
    }
}
