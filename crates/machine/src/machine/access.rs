//! Logged state accessors.
//!
//! Every piece of committed state is read and written through the accessors
//! generated here. Outside a logged step they compile down to plain field
//! access; during `Machine::step` each call also records a word access at
//! the state's committed physical address, with a proof of the pre-access
//! contents, and folds writes into the Merkle tree so the next proof chains
//! from the new root.
//!
//! The macro keeps the sixty-odd accessor instances from being written by
//! hand.

use super::Machine;
use crate::common::constants::layout::{CLINT_START, DHD_START, HTIF_START};
use crate::devices::{clint, dhd, htif, shadow};
use crate::state::ILRSC_NONE;

macro_rules! logged_accessors {
    ($($read:ident / $write:ident: $field:ident @ $addr:expr, $name:literal;)*) => {
        impl Machine {
            $(
                #[inline]
                pub(crate) fn $read(&mut self) -> u64 {
                    let val = self.state.$field;
                    self.log_read($addr, val, $name);
                    val
                }

                #[inline]
                pub(crate) fn $write(&mut self, val: u64) {
                    let old = self.state.$field;
                    self.log_write_pre($addr, old, val, $name);
                    self.state.$field = val;
                    self.log_write_post($addr);
                }
            )*
        }
    };
}

/// Read-only variant for registers the interpreter never writes (the
/// identification words and the guest-immutable enable registers).
macro_rules! logged_readers {
    ($($read:ident: $field:ident @ $addr:expr, $name:literal;)*) => {
        impl Machine {
            $(
                #[inline]
                pub(crate) fn $read(&mut self) -> u64 {
                    let val = self.state.$field;
                    self.log_read($addr, val, $name);
                    val
                }
            )*
        }
    };
}

logged_accessors! {
    read_pc / write_pc: pc @ shadow::address(shadow::PC), "pc";
    read_mcycle / write_mcycle: mcycle @ shadow::address(shadow::MCYCLE), "mcycle";
    read_minstret / write_minstret: minstret @ shadow::address(shadow::MINSTRET), "minstret";
    read_mstatus / write_mstatus: mstatus @ shadow::address(shadow::MSTATUS), "mstatus";
    read_mtvec / write_mtvec: mtvec @ shadow::address(shadow::MTVEC), "mtvec";
    read_mscratch / write_mscratch: mscratch @ shadow::address(shadow::MSCRATCH), "mscratch";
    read_mepc / write_mepc: mepc @ shadow::address(shadow::MEPC), "mepc";
    read_mcause / write_mcause: mcause @ shadow::address(shadow::MCAUSE), "mcause";
    read_mtval / write_mtval: mtval @ shadow::address(shadow::MTVAL), "mtval";
    read_mie / write_mie: mie @ shadow::address(shadow::MIE), "mie";
    read_mip / write_mip: mip @ shadow::address(shadow::MIP), "mip";
    read_medeleg / write_medeleg: medeleg @ shadow::address(shadow::MEDELEG), "medeleg";
    read_mideleg / write_mideleg: mideleg @ shadow::address(shadow::MIDELEG), "mideleg";
    read_mcounteren / write_mcounteren: mcounteren @ shadow::address(shadow::MCOUNTEREN), "mcounteren";
    read_stvec / write_stvec: stvec @ shadow::address(shadow::STVEC), "stvec";
    read_sscratch / write_sscratch: sscratch @ shadow::address(shadow::SSCRATCH), "sscratch";
    read_sepc / write_sepc: sepc @ shadow::address(shadow::SEPC), "sepc";
    read_scause / write_scause: scause @ shadow::address(shadow::SCAUSE), "scause";
    read_stval / write_stval: stval @ shadow::address(shadow::STVAL), "stval";
    read_satp / write_satp: satp @ shadow::address(shadow::SATP), "satp";
    read_scounteren / write_scounteren: scounteren @ shadow::address(shadow::SCOUNTEREN), "scounteren";
    read_ilrsc / write_ilrsc: ilrsc @ shadow::address(shadow::ILRSC), "ilrsc";
    read_clint_mtimecmp / write_clint_mtimecmp: clint_mtimecmp @ CLINT_START + clint::MTIMECMP_OFFSET, "clint.mtimecmp";
    read_htif_tohost / write_htif_tohost: htif_tohost @ HTIF_START + htif::TOHOST_OFFSET, "htif.tohost";
    read_htif_fromhost / write_htif_fromhost: htif_fromhost @ HTIF_START + htif::FROMHOST_OFFSET, "htif.fromhost";
    read_dhd_dlength / write_dhd_dlength: dhd_dlength @ DHD_START + dhd::DLENGTH_OFFSET, "dhd.dlength";
    read_dhd_hlength / write_dhd_hlength: dhd_hlength @ DHD_START + dhd::HLENGTH_OFFSET, "dhd.hlength";
}

logged_readers! {
    read_mvendorid: mvendorid @ shadow::address(shadow::MVENDORID), "mvendorid";
    read_marchid: marchid @ shadow::address(shadow::MARCHID), "marchid";
    read_mimpid: mimpid @ shadow::address(shadow::MIMPID), "mimpid";
    read_mhartid: mhartid @ shadow::address(shadow::MHARTID), "mhartid";
    read_misa: misa @ shadow::address(shadow::MISA), "misa";
    read_htif_ihalt: htif_ihalt @ HTIF_START + htif::IHALT_OFFSET, "htif.ihalt";
    read_htif_iconsole: htif_iconsole @ HTIF_START + htif::ICONSOLE_OFFSET, "htif.iconsole";
    read_htif_iyield: htif_iyield @ HTIF_START + htif::IYIELD_OFFSET, "htif.iyield";
    read_dhd_tstart: dhd_tstart @ DHD_START + dhd::TSTART_OFFSET, "dhd.tstart";
    read_dhd_tlength: dhd_tlength @ DHD_START + dhd::TLENGTH_OFFSET, "dhd.tlength";
}

impl Machine {
    /// Reads a general register; `x0` is a hard zero.
    #[inline]
    pub(crate) fn read_x(&mut self, i: u32) -> u64 {
        let val = self.state.x[i as usize];
        self.log_read(shadow::x_address(i), val, "x");
        val
    }

    /// Writes a general register; writes to `x0` are dropped so the zero
    /// register is never observably non-zero.
    #[inline]
    pub(crate) fn write_x(&mut self, i: u32, val: u64) {
        if i == 0 {
            return;
        }
        let old = self.state.x[i as usize];
        self.log_write_pre(shadow::x_address(i), old, val, "x");
        self.state.x[i as usize] = val;
        self.log_write_post(shadow::x_address(i));
    }

    /// Reads one DHD input hash word.
    #[inline]
    pub(crate) fn read_dhd_h(&mut self, i: usize) -> u64 {
        let val = self.state.dhd_h[i];
        self.log_read(DHD_START + dhd::H_BASE + 8 * i as u64, val, "dhd.h");
        val
    }

    /// Writes one DHD input hash word.
    #[inline]
    pub(crate) fn write_dhd_h(&mut self, i: usize, val: u64) {
        let addr = DHD_START + dhd::H_BASE + 8 * i as u64;
        let old = self.state.dhd_h[i];
        self.log_write_pre(addr, old, val, "dhd.h");
        self.state.dhd_h[i] = val;
        self.log_write_post(addr);
    }

    /// Reads the packed `iflags` word.
    #[inline]
    pub(crate) fn read_iflags(&mut self) -> u64 {
        let val = self.state.read_iflags();
        self.log_read(shadow::address(shadow::IFLAGS), val, "iflags");
        val
    }

    /// Writes the packed `iflags` word.
    #[inline]
    pub(crate) fn write_iflags(&mut self, val: u64) {
        let old = self.state.read_iflags();
        self.log_write_pre(shadow::address(shadow::IFLAGS), old, val, "iflags");
        self.state.write_iflags(val);
        self.log_write_post(shadow::address(shadow::IFLAGS));
    }

    /// Sets the halt flag through the committed `iflags` word.
    pub(crate) fn set_iflags_h(&mut self) {
        let iflags = self.read_iflags();
        self.write_iflags(iflags | 1 << crate::state::IFLAGS_H_SHIFT);
    }

    /// Sets the yield flag through the committed `iflags` word.
    pub(crate) fn set_iflags_y(&mut self) {
        let iflags = self.read_iflags();
        self.write_iflags(iflags | 1 << crate::state::IFLAGS_Y_SHIFT);
    }

    /// Sets the idle flag through the committed `iflags` word.
    pub(crate) fn set_iflags_i(&mut self) {
        let iflags = self.read_iflags();
        self.write_iflags(iflags | 1 << crate::state::IFLAGS_I_SHIFT);
    }

    /// Drops any active LR reservation.
    pub(crate) fn clear_ilrsc(&mut self) {
        if self.state.ilrsc != ILRSC_NONE {
            self.write_ilrsc(ILRSC_NONE);
        }
    }
}
