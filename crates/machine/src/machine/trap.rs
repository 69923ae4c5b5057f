//! Trap raising and privileged returns.
//!
//! This file implements the trap delivery path shared by exceptions and
//! interrupts:
//! 1. **Delegation:** `medeleg`/`mideleg` select the handling privilege for
//!    traps arriving at or below supervisor mode.
//! 2. **Context Save:** xEPC/xCAUSE/xTVAL, the xPIE/xPP stack in `mstatus`,
//!    and the privilege switch.
//! 3. **Interrupt Selection:** The pending-and-enabled mask filtered by the
//!    per-privilege global enables; the lowest set bit is taken first.
//! 4. **Returns:** `mret`/`sret` unwind the xPIE/xPP stack.
//!
//! Any trap clears the LR reservation, so a store-conditional interrupted
//! by a trap always fails.

use super::Machine;
use crate::common::constants::CAUSE_INTERRUPT_BIT;
use crate::state::PrivilegeMode;
use crate::state::csr::{
    MSTATUS_MIE, MSTATUS_MPIE, MSTATUS_MPIE_SHIFT, MSTATUS_MPP, MSTATUS_MPP_SHIFT, MSTATUS_SIE,
    MSTATUS_SPIE, MSTATUS_SPIE_SHIFT, MSTATUS_SPP, MSTATUS_SPP_SHIFT,
};

impl Machine {
    /// Switches privilege, flushing cached translations and dropping the
    /// LR reservation on any actual change.
    pub(crate) fn set_privilege(&mut self, new: PrivilegeMode) {
        if self.state.privilege != new {
            self.tlb.flush_all();
            self.clear_ilrsc();
            let iflags = self.read_iflags();
            let cleared = iflags & !(3 << crate::state::IFLAGS_PRV_SHIFT);
            self.write_iflags(cleared | (new.to_u64() << crate::state::IFLAGS_PRV_SHIFT));
        }
    }

    /// Delivers a trap. `cause` carries the interrupt flag in bit 63;
    /// `tval` is the faulting address or instruction.
    pub(crate) fn raise_exception(&mut self, cause: u64, tval: u64) {
        let is_interrupt = cause & CAUSE_INTERRUPT_BIT != 0;
        let code = cause & !CAUSE_INTERRUPT_BIT;
        tracing::debug!(
            cause = code,
            is_interrupt,
            tval,
            pc = self.state.pc,
            privilege = %self.state.privilege,
            "raising trap"
        );

        // A trap always invalidates the reservation.
        self.clear_ilrsc();

        let deleg = if self.state.privilege <= PrivilegeMode::Supervisor {
            let mask = if is_interrupt {
                self.read_mideleg()
            } else {
                self.read_medeleg()
            };
            (mask >> (code & 63)) & 1 != 0
        } else {
            false
        };

        let pc = self.read_pc();
        let prev_ie_bit = self.state.privilege.to_u64();

        if deleg {
            self.write_scause(cause);
            self.write_sepc(pc);
            self.write_stval(tval);
            let mut mstatus = self.read_mstatus();
            // SPIE <- IE bit of the interrupted privilege, SPP <- privilege.
            mstatus = (mstatus & !MSTATUS_SPIE)
                | (((mstatus >> prev_ie_bit) & 1) << MSTATUS_SPIE_SHIFT);
            mstatus = (mstatus & !MSTATUS_SPP)
                | (self.state.privilege.to_u64() << MSTATUS_SPP_SHIFT);
            mstatus &= !MSTATUS_SIE;
            self.write_mstatus(mstatus);
            self.set_privilege(PrivilegeMode::Supervisor);
            let stvec = self.read_stvec();
            self.write_pc(stvec);
        } else {
            self.write_mcause(cause);
            self.write_mepc(pc);
            self.write_mtval(tval);
            let mut mstatus = self.read_mstatus();
            mstatus = (mstatus & !MSTATUS_MPIE)
                | (((mstatus >> prev_ie_bit) & 1) << MSTATUS_MPIE_SHIFT);
            mstatus = (mstatus & !MSTATUS_MPP)
                | (self.state.privilege.to_u64() << MSTATUS_MPP_SHIFT);
            mstatus &= !MSTATUS_MIE;
            self.write_mstatus(mstatus);
            self.set_privilege(PrivilegeMode::Machine);
            let mtvec = self.read_mtvec();
            self.write_pc(mtvec);
        }
    }

    /// The pending interrupt bits that may be taken right now.
    ///
    /// M-mode takes non-delegated interrupts when `mstatus.MIE` is set;
    /// S-mode always takes non-delegated interrupts and takes delegated
    /// ones when `mstatus.SIE` is set; U-mode takes everything enabled.
    pub(crate) fn pending_irq_mask(&mut self) -> u64 {
        let pending = self.state.mip & self.state.mie;
        if pending == 0 {
            return 0;
        }
        let mstatus = self.state.mstatus;
        let mideleg = self.state.mideleg;
        let enabled = match self.state.privilege {
            PrivilegeMode::Machine => {
                if mstatus & MSTATUS_MIE != 0 {
                    !mideleg
                } else {
                    0
                }
            }
            PrivilegeMode::Supervisor => {
                let mut e = !mideleg;
                if mstatus & MSTATUS_SIE != 0 {
                    e |= mideleg;
                }
                e
            }
            PrivilegeMode::User => u64::MAX,
        };
        pending & enabled
    }

    /// Takes the highest-priority (lowest-numbered) pending interrupt, if
    /// any. Returns whether a trap was delivered.
    pub(crate) fn raise_interrupt_if_pending(&mut self) -> bool {
        let mask = self.pending_irq_mask();
        if mask == 0 {
            return false;
        }
        let irq = u64::from(mask.trailing_zeros());
        self.raise_exception(irq | CAUSE_INTERRUPT_BIT, 0);
        true
    }

    /// MRET: return from an M-mode trap handler; returns the resume pc.
    pub(crate) fn exec_mret(&mut self) -> u64 {
        let mut mstatus = self.read_mstatus();
        let mpp = PrivilegeMode::from_u64((mstatus >> MSTATUS_MPP_SHIFT) & 3);
        let mpie = (mstatus >> MSTATUS_MPIE_SHIFT) & 1;
        mstatus = (mstatus & !MSTATUS_MIE) | (mpie << 3);
        mstatus |= MSTATUS_MPIE;
        mstatus &= !MSTATUS_MPP;
        self.write_mstatus(mstatus);
        self.set_privilege(mpp);
        self.read_mepc()
    }

    /// SRET: return from an S-mode trap handler; returns the resume pc.
    pub(crate) fn exec_sret(&mut self) -> u64 {
        let mut mstatus = self.read_mstatus();
        let spp = PrivilegeMode::from_u64((mstatus >> MSTATUS_SPP_SHIFT) & 1);
        let spie = (mstatus >> MSTATUS_SPIE_SHIFT) & 1;
        mstatus = (mstatus & !MSTATUS_SIE) | (spie << 1);
        mstatus |= MSTATUS_SPIE;
        mstatus &= !MSTATUS_SPP;
        self.write_mstatus(mstatus);
        self.set_privilege(spp);
        self.read_sepc()
    }
}
