//! CSR read/write dispatch.
//!
//! Access control follows the encoding: CSR bits [11:10] == 11 mark a
//! read-only register (a write intent fails the read), and bits [9:8] give
//! the minimum privilege. Individual registers apply their legal-bit masks
//! on write; `satp` filters unsupported translation modes and flushes the
//! TLBs; `mstatus` flushes them when a translation-relevant field changes.

use super::Machine;
use crate::state::PrivilegeMode;
use crate::state::csr::{
    COUNTEREN_MASK, MEDELEG_MASK, MIDELEG_MASK, MIE_WRITE_MASK, MIP_WRITE_MASK, MSTATUS_FS,
    MSTATUS_MASK, MSTATUS_MPP, MSTATUS_MPRV, MSTATUS_MXR, MSTATUS_SD, MSTATUS_SUM, MSTATUS_TVM,
    MSTATUS_XS, SATP_MODE_BARE, SATP_MODE_SHIFT, SATP_MODE_SV39, SATP_MODE_SV48, SATP_PPN_MASK,
    SSTATUS_MASK,
};
use crate::state::csr;

/// Outcome of a CSR write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CsrWriteResult {
    /// The write took effect (possibly partially, through the register's
    /// legal-bit mask).
    Ok,
    /// The CSR does not exist or is not writable; the caller raises an
    /// illegal instruction.
    Invalid,
    /// The write took effect and invalidated cached translations.
    TlbFlushed,
}

impl Machine {
    /// Reads a CSR, honouring privilege and the read-only encoding.
    ///
    /// Returns `None` when the access must raise an illegal instruction:
    /// the register is absent, the privilege is insufficient, a write is
    /// intended on a read-only register, or a counter is disabled for the
    /// current privilege.
    pub(crate) fn csr_read(&mut self, csr: u32, will_write: bool) -> Option<u64> {
        if csr & 0xC00 == 0xC00 && will_write {
            return None;
        }
        if (self.state.privilege.to_u64() as u32) < (csr >> 8) & 3 {
            return None;
        }
        let val = match csr {
            csr::CYCLE => {
                self.check_counter_enabled(csr)?;
                self.read_mcycle()
            }
            csr::INSTRET => {
                self.check_counter_enabled(csr)?;
                self.read_minstret()
            }
            csr::SSTATUS => self.get_mstatus(SSTATUS_MASK),
            csr::SIE => self.read_mie() & self.read_mideleg(),
            csr::STVEC => self.read_stvec(),
            csr::SCOUNTEREN => self.read_scounteren(),
            csr::SSCRATCH => self.read_sscratch(),
            csr::SEPC => self.read_sepc(),
            csr::SCAUSE => self.read_scause(),
            csr::STVAL => self.read_stval(),
            csr::SIP => self.read_mip() & self.read_mideleg(),
            csr::SATP => {
                if self.state.privilege == PrivilegeMode::Supervisor
                    && self.state.mstatus & MSTATUS_TVM != 0
                {
                    return None;
                }
                self.read_satp()
            }
            csr::MSTATUS => self.get_mstatus(u64::MAX),
            csr::MISA => self.read_misa(),
            csr::MEDELEG => self.read_medeleg(),
            csr::MIDELEG => self.read_mideleg(),
            csr::MIE => self.read_mie(),
            csr::MTVEC => self.read_mtvec(),
            csr::MCOUNTEREN => self.read_mcounteren(),
            csr::MSCRATCH => self.read_mscratch(),
            csr::MEPC => self.read_mepc(),
            csr::MCAUSE => self.read_mcause(),
            csr::MTVAL => self.read_mtval(),
            csr::MIP => self.read_mip(),
            csr::MCYCLE => self.read_mcycle(),
            csr::MINSTRET => self.read_minstret(),
            csr::TSELECT | csr::TDATA1 | csr::TDATA2 | csr::TDATA3 => 0,
            csr::MVENDORID => self.read_mvendorid(),
            csr::MARCHID => self.read_marchid(),
            csr::MIMPID => self.read_mimpid(),
            csr::MHARTID => self.read_mhartid(),
            _ => return None,
        };
        Some(val)
    }

    /// Writes a CSR, applying its legal-bit mask.
    pub(crate) fn csr_write(&mut self, csr: u32, val: u64) -> CsrWriteResult {
        match csr {
            csr::SSTATUS => {
                let mstatus = self.state.mstatus;
                self.set_mstatus((mstatus & !SSTATUS_MASK) | (val & SSTATUS_MASK));
            }
            csr::SIE => {
                let mask = self.read_mideleg();
                let mie = self.read_mie();
                self.write_mie((mie & !mask) | (val & mask));
            }
            csr::STVEC => self.write_stvec(val & !3),
            csr::SCOUNTEREN => self.write_scounteren(val & COUNTEREN_MASK),
            csr::SSCRATCH => self.write_sscratch(val),
            csr::SEPC => self.write_sepc(val & !1),
            csr::SCAUSE => self.write_scause(val),
            csr::STVAL => self.write_stval(val),
            csr::SIP => {
                let mask = self.read_mideleg();
                let mip = self.read_mip();
                self.write_mip((mip & !mask) | (val & mask));
            }
            csr::SATP => {
                if self.state.privilege == PrivilegeMode::Supervisor
                    && self.state.mstatus & MSTATUS_TVM != 0
                {
                    return CsrWriteResult::Invalid;
                }
                // Unsupported modes keep the previous mode field.
                let old_mode = self.state.satp >> SATP_MODE_SHIFT;
                let new_mode = (val >> SATP_MODE_SHIFT) & 0xF;
                let mode = if new_mode == SATP_MODE_BARE
                    || (SATP_MODE_SV39..=SATP_MODE_SV48).contains(&new_mode)
                {
                    new_mode
                } else {
                    old_mode
                };
                self.write_satp((val & SATP_PPN_MASK) | (mode << SATP_MODE_SHIFT));
                self.tlb.flush_all();
                return CsrWriteResult::TlbFlushed;
            }
            csr::MSTATUS => self.set_mstatus(val),
            csr::MISA => {} // writes to misa are ignored
            csr::MEDELEG => {
                let medeleg = self.read_medeleg();
                self.write_medeleg((medeleg & !MEDELEG_MASK) | (val & MEDELEG_MASK));
            }
            csr::MIDELEG => {
                let mideleg = self.read_mideleg();
                self.write_mideleg((mideleg & !MIDELEG_MASK) | (val & MIDELEG_MASK));
            }
            csr::MIE => {
                let mie = self.read_mie();
                self.write_mie((mie & !MIE_WRITE_MASK) | (val & MIE_WRITE_MASK));
            }
            csr::MTVEC => self.write_mtvec(val & !3),
            csr::MCOUNTEREN => self.write_mcounteren(val & COUNTEREN_MASK),
            csr::MSCRATCH => self.write_mscratch(val),
            csr::MEPC => self.write_mepc(val & !1),
            csr::MCAUSE => self.write_mcause(val),
            csr::MTVAL => self.write_mtval(val),
            csr::MIP => {
                let mip = self.read_mip();
                self.write_mip((mip & !MIP_WRITE_MASK) | (val & MIP_WRITE_MASK));
            }
            csr::TSELECT | csr::TDATA1 | csr::TDATA2 | csr::TDATA3 => {} // ignored
            _ => return CsrWriteResult::Invalid,
        }
        CsrWriteResult::Ok
    }

    /// The complete `mstatus` view with the derived SD summary bit.
    fn get_mstatus(&mut self, mask: u64) -> u64 {
        let val = self.read_mstatus() & mask;
        let dirty = val & MSTATUS_FS == MSTATUS_FS || val & MSTATUS_XS == MSTATUS_XS;
        if dirty { val | MSTATUS_SD } else { val }
    }

    /// Masks and installs a new `mstatus`, flushing the TLBs when a
    /// translation-relevant field changes.
    fn set_mstatus(&mut self, val: u64) {
        let old = self.state.mstatus;
        let modified = old ^ val;
        if modified & (MSTATUS_MPRV | MSTATUS_SUM | MSTATUS_MXR) != 0
            || (old & MSTATUS_MPRV != 0 && modified & MSTATUS_MPP != 0)
        {
            self.tlb.flush_all();
        }
        let mask = MSTATUS_MASK & !MSTATUS_FS;
        self.write_mstatus((old & !mask) | (val & mask));
    }

    /// Counter accesses below M-mode are gated by the counter-enable CSRs.
    fn check_counter_enabled(&mut self, csr: u32) -> Option<()> {
        if self.state.privilege < PrivilegeMode::Machine {
            let counteren = if self.state.privilege < PrivilegeMode::Supervisor {
                self.state.scounteren
            } else {
                self.state.mcounteren
            };
            if (counteren >> (csr & 0x1F)) & 1 == 0 {
                return None;
            }
        }
        Some(())
    }
}
