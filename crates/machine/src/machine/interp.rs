//! The fetch-decode-execute loop.
//!
//! One call to `run_one` performs one interpreted cycle: poll the timer,
//! deliver a pending enabled interrupt or execute one instruction, and
//! advance `mcycle`. Instructions are fetched in 16-bit parcels (a 32-bit
//! instruction may span a page boundary); parcels with the compressed
//! encoding raise illegal instruction since `misa` carries IMA only.
//!
//! Execution never unwinds on a trap: executors return `None` after raising
//! the exception, and the retirement bookkeeping (pc and `minstret`) is
//! skipped for that cycle.

use super::Machine;
use crate::common::{AccessType, VirtAddr};
use crate::isa::cause::exception;
use crate::isa::opcodes::{self, amo, system};
use crate::state::PrivilegeMode;
use crate::state::csr::{MSTATUS_TSR, MSTATUS_TVM, MSTATUS_TW};

#[inline(always)]
fn rd(insn: u32) -> u32 {
    (insn >> 7) & 0x1F
}

#[inline(always)]
fn rs1(insn: u32) -> u32 {
    (insn >> 15) & 0x1F
}

#[inline(always)]
fn rs2(insn: u32) -> u32 {
    (insn >> 20) & 0x1F
}

#[inline(always)]
fn funct3(insn: u32) -> u32 {
    (insn >> 12) & 0x7
}

#[inline(always)]
fn funct7(insn: u32) -> u32 {
    insn >> 25
}

#[inline(always)]
fn imm_i(insn: u32) -> u64 {
    ((insn as i32) >> 20) as u64
}

#[inline(always)]
fn imm_u(insn: u32) -> u64 {
    ((insn & 0xFFFF_F000) as i32) as u64
}

#[inline(always)]
fn imm_s(insn: u32) -> u64 {
    let raw = (u64::from(insn >> 25) << 5) | u64::from((insn >> 7) & 0x1F);
    ((raw << 52) as i64 >> 52) as u64
}

#[inline(always)]
fn imm_b(insn: u32) -> u64 {
    let raw = (u64::from(insn >> 31) << 12)
        | (u64::from((insn >> 7) & 1) << 11)
        | (u64::from((insn >> 25) & 0x3F) << 5)
        | (u64::from((insn >> 8) & 0xF) << 1);
    ((raw << 51) as i64 >> 51) as u64
}

#[inline(always)]
fn imm_j(insn: u32) -> u64 {
    let raw = (u64::from(insn >> 31) << 20)
        | (u64::from((insn >> 12) & 0xFF) << 12)
        | (u64::from((insn >> 20) & 1) << 11)
        | (u64::from((insn >> 21) & 0x3FF) << 1);
    ((raw << 43) as i64 >> 43) as u64
}

/// RISC-V signed division: division by zero yields all-ones, overflow
/// yields the dividend.
#[inline]
fn div64(a: i64, b: i64) -> i64 {
    if b == 0 {
        -1
    } else if a == i64::MIN && b == -1 {
        a
    } else {
        a / b
    }
}

#[inline]
fn rem64(a: i64, b: i64) -> i64 {
    if b == 0 {
        a
    } else if a == i64::MIN && b == -1 {
        0
    } else {
        a % b
    }
}

#[inline]
fn div32(a: i32, b: i32) -> i32 {
    if b == 0 {
        -1
    } else if a == i32::MIN && b == -1 {
        a
    } else {
        a / b
    }
}

#[inline]
fn rem32(a: i32, b: i32) -> i32 {
    if b == 0 {
        a
    } else if a == i32::MIN && b == -1 {
        0
    } else {
        a % b
    }
}

impl Machine {
    /// One interpreted cycle: timer poll, interrupt delivery or instruction
    /// execution, and the `mcycle` tick.
    pub(crate) fn run_one(&mut self) {
        self.poll_timer_interrupt();
        if !self.raise_interrupt_if_pending() {
            self.exec_insn();
        }
        let mcycle = self.read_mcycle();
        self.write_mcycle(mcycle + 1);
    }

    /// Raises the trap staged by a failed memory access.
    fn raise_pending(&mut self) {
        let cause = self.state.pending_exception;
        let tval = self.state.pending_tval;
        self.raise_exception(cause, tval);
    }

    fn exec_insn(&mut self) {
        let pc = self.read_pc();
        let Ok(lo) = self.fetch_u16(pc) else {
            self.raise_pending();
            return;
        };
        if lo & 3 != 3 {
            // Compressed parcel: not in misa.
            self.raise_exception(exception::ILLEGAL_INSTRUCTION, u64::from(lo));
            return;
        }
        let Ok(hi) = self.fetch_u16(pc + 2) else {
            self.raise_pending();
            return;
        };
        let insn = u32::from(lo) | (u32::from(hi) << 16);
        if let Some(next_pc) = self.execute(pc, insn) {
            self.write_pc(next_pc);
            let minstret = self.read_minstret();
            self.write_minstret(minstret + 1);
        }
    }

    fn illegal(&mut self, insn: u32) -> Option<u64> {
        self.raise_exception(exception::ILLEGAL_INSTRUCTION, u64::from(insn));
        None
    }

    /// Checks a control-transfer target for 4-byte alignment (no C
    /// extension).
    fn jump_to(&mut self, target: u64) -> Option<u64> {
        if target & 3 != 0 {
            self.raise_exception(exception::MISALIGNED_FETCH, target);
            return None;
        }
        Some(target)
    }

    fn execute(&mut self, pc: u64, insn: u32) -> Option<u64> {
        match insn & 0x7F {
            opcodes::OP_LUI => {
                self.write_x(rd(insn), imm_u(insn));
                Some(pc.wrapping_add(4))
            }
            opcodes::OP_AUIPC => {
                self.write_x(rd(insn), pc.wrapping_add(imm_u(insn)));
                Some(pc.wrapping_add(4))
            }
            opcodes::OP_JAL => {
                let target = pc.wrapping_add(imm_j(insn));
                let next = self.jump_to(target)?;
                self.write_x(rd(insn), pc.wrapping_add(4));
                Some(next)
            }
            opcodes::OP_JALR => {
                if funct3(insn) != 0 {
                    return self.illegal(insn);
                }
                let base = self.read_x(rs1(insn));
                let target = base.wrapping_add(imm_i(insn)) & !1;
                let next = self.jump_to(target)?;
                self.write_x(rd(insn), pc.wrapping_add(4));
                Some(next)
            }
            opcodes::OP_BRANCH => self.exec_branch(pc, insn),
            opcodes::OP_LOAD => self.exec_load(pc, insn),
            opcodes::OP_STORE => self.exec_store(pc, insn),
            opcodes::OP_IMM => self.exec_op_imm(pc, insn),
            opcodes::OP_IMM_32 => self.exec_op_imm_32(pc, insn),
            opcodes::OP_REG => self.exec_op_reg(pc, insn),
            opcodes::OP_REG_32 => self.exec_op_reg_32(pc, insn),
            opcodes::OP_AMO => self.exec_amo(pc, insn),
            opcodes::OP_MISC_MEM => match funct3(insn) {
                // FENCE and FENCE.I order nothing on an in-order machine.
                0 | 1 => Some(pc.wrapping_add(4)),
                _ => self.illegal(insn),
            },
            opcodes::OP_SYSTEM => self.exec_system(pc, insn),
            _ => self.illegal(insn),
        }
    }

    fn exec_branch(&mut self, pc: u64, insn: u32) -> Option<u64> {
        let a = self.read_x(rs1(insn));
        let b = self.read_x(rs2(insn));
        let taken = match funct3(insn) {
            0 => a == b,
            1 => a != b,
            4 => (a as i64) < (b as i64),
            5 => (a as i64) >= (b as i64),
            6 => a < b,
            7 => a >= b,
            _ => return self.illegal(insn),
        };
        if taken {
            self.jump_to(pc.wrapping_add(imm_b(insn)))
        } else {
            Some(pc.wrapping_add(4))
        }
    }

    fn exec_load(&mut self, pc: u64, insn: u32) -> Option<u64> {
        let addr = self.read_x(rs1(insn)).wrapping_add(imm_i(insn));
        let (log2, signed) = match funct3(insn) {
            0 => (0, true),
            1 => (1, true),
            2 => (2, true),
            3 => (3, true),
            4 => (0, false),
            5 => (1, false),
            6 => (2, false),
            _ => return self.illegal(insn),
        };
        let Ok(raw) = self.read_virtual(addr, log2) else {
            self.raise_pending();
            return None;
        };
        let val = if signed {
            match log2 {
                0 => raw as i8 as u64,
                1 => raw as i16 as u64,
                2 => raw as i32 as u64,
                _ => raw,
            }
        } else {
            raw
        };
        self.write_x(rd(insn), val);
        Some(pc.wrapping_add(4))
    }

    fn exec_store(&mut self, pc: u64, insn: u32) -> Option<u64> {
        let log2 = funct3(insn);
        if log2 > 3 {
            return self.illegal(insn);
        }
        let addr = self.read_x(rs1(insn)).wrapping_add(imm_s(insn));
        let val = self.read_x(rs2(insn));
        if self.write_virtual(addr, val, log2).is_err() {
            self.raise_pending();
            return None;
        }
        Some(pc.wrapping_add(4))
    }

    fn exec_op_imm(&mut self, pc: u64, insn: u32) -> Option<u64> {
        let a = self.read_x(rs1(insn));
        let imm = imm_i(insn);
        let val = match funct3(insn) {
            0 => a.wrapping_add(imm),
            1 => {
                if insn >> 26 != 0 {
                    return self.illegal(insn);
                }
                a << (imm & 0x3F)
            }
            2 => u64::from((a as i64) < (imm as i64)),
            3 => u64::from(a < imm),
            4 => a ^ imm,
            5 => match insn >> 26 {
                0 => a >> (imm & 0x3F),
                0b010000 => ((a as i64) >> (imm & 0x3F)) as u64,
                _ => return self.illegal(insn),
            },
            6 => a | imm,
            _ => a & imm,
        };
        self.write_x(rd(insn), val);
        Some(pc.wrapping_add(4))
    }

    fn exec_op_imm_32(&mut self, pc: u64, insn: u32) -> Option<u64> {
        let a = self.read_x(rs1(insn)) as u32;
        let imm = imm_i(insn) as u32;
        let val = match funct3(insn) {
            0 => a.wrapping_add(imm) as i32 as u64,
            1 => {
                if funct7(insn) != 0 {
                    return self.illegal(insn);
                }
                (a << (imm & 0x1F)) as i32 as u64
            }
            5 => match funct7(insn) {
                0 => (a >> (imm & 0x1F)) as i32 as u64,
                0b0100000 => ((a as i32) >> (imm & 0x1F)) as u64,
                _ => return self.illegal(insn),
            },
            _ => return self.illegal(insn),
        };
        self.write_x(rd(insn), val);
        Some(pc.wrapping_add(4))
    }

    fn exec_op_reg(&mut self, pc: u64, insn: u32) -> Option<u64> {
        let a = self.read_x(rs1(insn));
        let b = self.read_x(rs2(insn));
        let val = match (funct7(insn), funct3(insn)) {
            (0, 0) => a.wrapping_add(b),
            (0x20, 0) => a.wrapping_sub(b),
            (0, 1) => a << (b & 0x3F),
            (0, 2) => u64::from((a as i64) < (b as i64)),
            (0, 3) => u64::from(a < b),
            (0, 4) => a ^ b,
            (0, 5) => a >> (b & 0x3F),
            (0x20, 5) => ((a as i64) >> (b & 0x3F)) as u64,
            (0, 6) => a | b,
            (0, 7) => a & b,
            (opcodes::FUNCT7_MULDIV, f3) => self.muldiv(a, b, f3),
            _ => return self.illegal(insn),
        };
        self.write_x(rd(insn), val);
        Some(pc.wrapping_add(4))
    }

    #[allow(clippy::unused_self)]
    fn muldiv(&self, a: u64, b: u64, funct3: u32) -> u64 {
        match funct3 {
            0 => a.wrapping_mul(b),
            1 => ((i128::from(a as i64) * i128::from(b as i64)) >> 64) as u64,
            2 => ((i128::from(a as i64).wrapping_mul(u128::from(b) as i128)) >> 64) as u64,
            3 => ((u128::from(a) * u128::from(b)) >> 64) as u64,
            4 => div64(a as i64, b as i64) as u64,
            5 => {
                if b == 0 {
                    u64::MAX
                } else {
                    a / b
                }
            }
            6 => rem64(a as i64, b as i64) as u64,
            _ => {
                if b == 0 {
                    a
                } else {
                    a % b
                }
            }
        }
    }

    fn exec_op_reg_32(&mut self, pc: u64, insn: u32) -> Option<u64> {
        let a = self.read_x(rs1(insn)) as u32;
        let b = self.read_x(rs2(insn)) as u32;
        let val = match (funct7(insn), funct3(insn)) {
            (0, 0) => a.wrapping_add(b) as i32 as u64,
            (0x20, 0) => a.wrapping_sub(b) as i32 as u64,
            (0, 1) => (a << (b & 0x1F)) as i32 as u64,
            (0, 5) => (a >> (b & 0x1F)) as i32 as u64,
            (0x20, 5) => ((a as i32) >> (b & 0x1F)) as u64,
            (opcodes::FUNCT7_MULDIV, 0) => (a as i32).wrapping_mul(b as i32) as u64,
            (opcodes::FUNCT7_MULDIV, 4) => div32(a as i32, b as i32) as u64,
            (opcodes::FUNCT7_MULDIV, 5) => {
                (if b == 0 { u32::MAX } else { a / b }) as i32 as u64
            }
            (opcodes::FUNCT7_MULDIV, 6) => rem32(a as i32, b as i32) as u64,
            (opcodes::FUNCT7_MULDIV, 7) => {
                (if b == 0 { a } else { a % b }) as i32 as u64
            }
            _ => return self.illegal(insn),
        };
        self.write_x(rd(insn), val);
        Some(pc.wrapping_add(4))
    }

    fn exec_amo(&mut self, pc: u64, insn: u32) -> Option<u64> {
        let log2 = match funct3(insn) {
            2 => 2,
            3 => 3,
            _ => return self.illegal(insn),
        };
        let size = 1u64 << log2;
        let funct5 = insn >> 27;
        let addr = self.read_x(rs1(insn));
        if addr & (size - 1) != 0 {
            let cause = if funct5 == amo::LR {
                exception::MISALIGNED_LOAD
            } else {
                exception::MISALIGNED_STORE
            };
            self.raise_exception(cause, addr);
            return None;
        }

        if funct5 == amo::LR {
            if rs2(insn) != 0 {
                return self.illegal(insn);
            }
            let Ok(paddr) = self.translate_address(VirtAddr::new(addr), AccessType::Read) else {
                self.raise_exception(exception::LOAD_PAGE_FAULT, addr);
                return None;
            };
            let paddr = paddr.val();
            let Some(raw) = self.phys_read(paddr, log2) else {
                self.raise_exception(exception::FAULT_LOAD, addr);
                return None;
            };
            let val = if log2 == 2 { raw as i32 as u64 } else { raw };
            self.write_ilrsc(paddr);
            self.write_x(rd(insn), val);
            return Some(pc.wrapping_add(4));
        }

        let Ok(paddr) = self.translate_address(VirtAddr::new(addr), AccessType::Write) else {
            self.raise_exception(exception::STORE_PAGE_FAULT, addr);
            return None;
        };
        let paddr = paddr.val();

        if funct5 == amo::SC {
            let reserved = self.read_ilrsc();
            if reserved == paddr {
                let val = self.read_x(rs2(insn));
                if !self.phys_write(paddr, val, log2) {
                    self.raise_exception(exception::FAULT_STORE, addr);
                    return None;
                }
                self.write_x(rd(insn), 0);
            } else {
                self.write_x(rd(insn), 1);
            }
            // The reservation is consumed whether or not the store landed.
            self.clear_ilrsc();
            return Some(pc.wrapping_add(4));
        }

        let Some(raw) = self.phys_read(paddr, log2) else {
            self.raise_exception(exception::FAULT_STORE, addr);
            return None;
        };
        let old = if log2 == 2 { raw as i32 as u64 } else { raw };
        let b = self.read_x(rs2(insn));
        let new = match funct5 {
            amo::SWAP => b,
            amo::ADD => old.wrapping_add(b),
            amo::XOR => old ^ b,
            amo::AND => old & b,
            amo::OR => old | b,
            amo::MIN => {
                if log2 == 2 {
                    (old as i32).min(b as i32) as u64
                } else {
                    (old as i64).min(b as i64) as u64
                }
            }
            amo::MAX => {
                if log2 == 2 {
                    (old as i32).max(b as i32) as u64
                } else {
                    (old as i64).max(b as i64) as u64
                }
            }
            amo::MINU => {
                if log2 == 2 {
                    (old as u32).min(b as u32).into()
                } else {
                    old.min(b)
                }
            }
            amo::MAXU => {
                if log2 == 2 {
                    (old as u32).max(b as u32).into()
                } else {
                    old.max(b)
                }
            }
            _ => return self.illegal(insn),
        };
        if !self.phys_write(paddr, new, log2) {
            self.raise_exception(exception::FAULT_STORE, addr);
            return None;
        }
        self.write_x(rd(insn), old);
        Some(pc.wrapping_add(4))
    }

    fn exec_system(&mut self, pc: u64, insn: u32) -> Option<u64> {
        if funct3(insn) == 0 {
            return self.exec_privileged(pc, insn);
        }
        self.exec_csr(pc, insn)
    }

    fn exec_privileged(&mut self, pc: u64, insn: u32) -> Option<u64> {
        match insn {
            system::ECALL => {
                let cause = match self.state.privilege {
                    PrivilegeMode::User => exception::USER_ECALL,
                    PrivilegeMode::Supervisor => exception::SUPERVISOR_ECALL,
                    PrivilegeMode::Machine => exception::MACHINE_ECALL,
                };
                self.raise_exception(cause, 0);
                None
            }
            system::EBREAK => {
                self.raise_exception(exception::BREAKPOINT, pc);
                None
            }
            system::MRET => {
                if self.state.privilege != PrivilegeMode::Machine {
                    return self.illegal(insn);
                }
                let target = self.exec_mret();
                Some(target)
            }
            system::SRET => {
                if self.state.privilege < PrivilegeMode::Supervisor {
                    return self.illegal(insn);
                }
                if self.state.privilege == PrivilegeMode::Supervisor
                    && self.state.mstatus & MSTATUS_TSR != 0
                {
                    return self.illegal(insn);
                }
                let target = self.exec_sret();
                Some(target)
            }
            system::WFI => {
                if self.state.privilege == PrivilegeMode::User
                    || (self.state.privilege < PrivilegeMode::Machine
                        && self.state.mstatus & MSTATUS_TW != 0)
                {
                    return self.illegal(insn);
                }
                // Parks unless an enabled interrupt is already pending,
                // regardless of the global enable bits.
                if self.state.mip & self.state.mie == 0 {
                    self.set_iflags_i();
                }
                Some(pc.wrapping_add(4))
            }
            _ => {
                if funct7(insn) == system::SFENCE_VMA_FUNCT7 && rd(insn) == 0 {
                    if self.state.privilege == PrivilegeMode::User
                        || (self.state.privilege == PrivilegeMode::Supervisor
                            && self.state.mstatus & MSTATUS_TVM != 0)
                    {
                        return self.illegal(insn);
                    }
                    // No ASIDs: any sfence.vma drops every cached
                    // translation.
                    self.tlb.flush_all();
                    return Some(pc.wrapping_add(4));
                }
                self.illegal(insn)
            }
        }
    }

    fn exec_csr(&mut self, pc: u64, insn: u32) -> Option<u64> {
        let csr = insn >> 20;
        let f3 = funct3(insn);
        let uimm = u64::from(rs1(insn));

        match f3 {
            // CSRRW/CSRRWI: the access check in csr_read runs even when rd
            // is x0; only the read-back into rd is skipped.
            1 | 5 => {
                let src = if f3 == 1 { self.read_x(rs1(insn)) } else { uimm };
                let Some(old) = self.csr_read(csr, true) else {
                    return self.illegal(insn);
                };
                if self.csr_write(csr, src) == super::CsrWriteResult::Invalid {
                    return self.illegal(insn);
                }
                if rd(insn) != 0 {
                    self.write_x(rd(insn), old);
                }
                Some(pc.wrapping_add(4))
            }
            // CSRRS/CSRRC and immediate forms: the write is skipped when
            // the source is x0/zero immediate.
            2 | 3 | 6 | 7 => {
                let src = if f3 < 4 { self.read_x(rs1(insn)) } else { uimm };
                let writes = rs1(insn) != 0;
                let Some(old) = self.csr_read(csr, writes) else {
                    return self.illegal(insn);
                };
                if writes {
                    let new = if f3 & 3 == 2 { old | src } else { old & !src };
                    if self.csr_write(csr, new) == super::CsrWriteResult::Invalid {
                        return self.illegal(insn);
                    }
                }
                self.write_x(rd(insn), old);
                Some(pc.wrapping_add(4))
            }
            _ => self.illegal(insn),
        }
    }
}
