//! Virtual address translation.
//!
//! Implements the Sv39/Sv48 page-table walk. Machine mode and Bare mode
//! pass addresses through; otherwise the walker performs 3 or 4 levels of
//! 9-bit indexing from the `satp` base, reading each PTE through the
//! physical map (so page-walk reads appear in access logs, nested inside
//! the access that triggered them) and writing back accessed/dirty updates.
//!
//! The walker reports only success or failure; the caller maps a failure
//! to the page-fault cause matching the access type.

use super::Machine;
use crate::common::constants::PAGE_SHIFT;
use crate::common::{AccessType, PhysAddr, VirtAddr};
use crate::state::PrivilegeMode;
use crate::state::csr::{
    MSTATUS_MPP_SHIFT, MSTATUS_MPRV, MSTATUS_MXR, MSTATUS_SUM, SATP_MODE_BARE, SATP_MODE_SHIFT,
    SATP_MODE_SV39, SATP_PPN_MASK,
};

/// Page table entry valid bit.
const PTE_V: u64 = 1 << 0;
/// Page table entry user-accessible bit.
const PTE_U: u64 = 1 << 4;
/// Page table entry accessed bit.
const PTE_A: u64 = 1 << 6;
/// Page table entry dirty bit.
const PTE_D: u64 = 1 << 7;
/// Bit position of the physical page number inside a PTE.
const PTE_PPN_SHIFT: u64 = 10;

/// Bits of virtual address indexed per level.
const VPN_BITS: u64 = 9;
/// Size of a PTE in bytes (log2).
const LOG2_PTE_SIZE: u32 = 3;

/// A raw Sv39/Sv48 page table entry.
#[derive(Clone, Copy)]
struct Pte(u64);

impl Pte {
    fn is_valid(self) -> bool {
        self.0 & PTE_V != 0
    }

    /// Permission triple as the xwr bit group (bits 3:1).
    fn xwr(self) -> u64 {
        (self.0 >> 1) & 7
    }

    fn is_user(self) -> bool {
        self.0 & PTE_U != 0
    }

    fn ppn(self) -> u64 {
        (self.0 >> PTE_PPN_SHIFT) & SATP_PPN_MASK
    }
}

impl Machine {
    /// Effective privilege for a data access honours `mstatus.MPRV`;
    /// fetches always use the live privilege.
    fn effective_privilege(&mut self, access: AccessType) -> PrivilegeMode {
        let mstatus = self.state.mstatus;
        if mstatus & MSTATUS_MPRV != 0 && access != AccessType::Fetch {
            PrivilegeMode::from_u64(mstatus >> MSTATUS_MPP_SHIFT)
        } else {
            self.state.privilege
        }
    }

    /// Translates `vaddr` for the given access type.
    ///
    /// # Errors
    ///
    /// Returns `Err(())` on any translation failure; the caller stages the
    /// page-fault cause appropriate to the access.
    pub(crate) fn translate_address(
        &mut self,
        vaddr: VirtAddr,
        access: AccessType,
    ) -> Result<PhysAddr, ()> {
        let va = vaddr.val();
        let priv_ = self.effective_privilege(access);
        if priv_ == PrivilegeMode::Machine {
            return Ok(PhysAddr::new(va));
        }
        let satp = self.state.satp;
        let mode = (satp >> SATP_MODE_SHIFT) & 0xF;
        if mode == SATP_MODE_BARE {
            return Ok(PhysAddr::new(va));
        }

        // Sv39 has 3 levels, Sv48 has 4; anything else was filtered at the
        // satp write.
        let levels = (mode - SATP_MODE_SV39 + 3) as u32;

        // Canonical check: bits above the translated field must sign-extend
        // from its top bit.
        let vaddr_bits = PAGE_SHIFT as u32 + levels * VPN_BITS as u32;
        let shift = 64 - vaddr_bits;
        if (((va << shift) as i64) >> shift) as u64 != va {
            return Err(());
        }

        self.bracket_begin("walk");
        let result = self.walk(va, access, priv_, satp, levels);
        self.bracket_end("walk");
        result.map(PhysAddr::new)
    }

    fn walk(
        &mut self,
        vaddr: u64,
        access: AccessType,
        priv_: PrivilegeMode,
        satp: u64,
        levels: u32,
    ) -> Result<u64, ()> {
        let mstatus = self.state.mstatus;
        let mut pte_base = (satp & SATP_PPN_MASK) << PAGE_SHIFT;

        for level in (0..levels).rev() {
            let vaddr_shift = PAGE_SHIFT + u64::from(level) * VPN_BITS;
            let pte_idx = (vaddr >> vaddr_shift) & ((1 << VPN_BITS) - 1);
            let pte_addr = pte_base + (pte_idx << LOG2_PTE_SIZE);
            let raw = self.phys_read(pte_addr, LOG2_PTE_SIZE).ok_or(())?;
            let pte = Pte(raw);

            if !pte.is_valid() {
                return Err(());
            }
            let xwr = pte.xwr();
            if xwr == 0 {
                // Pointer to the next level.
                pte_base = pte.ppn() << PAGE_SHIFT;
                continue;
            }
            // Writable-but-not-readable is reserved.
            if xwr == 0b010 || xwr == 0b110 {
                return Err(());
            }

            if priv_ == PrivilegeMode::Supervisor {
                // SUM opens user pages to supervisor data accesses only.
                if pte.is_user()
                    && (access == AccessType::Fetch || mstatus & MSTATUS_SUM == 0)
                {
                    return Err(());
                }
            } else if !pte.is_user() {
                return Err(());
            }

            // MXR lets loads read execute-only pages.
            let mut xwr_eff = xwr;
            if mstatus & MSTATUS_MXR != 0 {
                xwr_eff |= xwr >> 2;
            }
            let access_bit = match access {
                AccessType::Read => 0,
                AccessType::Write => 1,
                AccessType::Fetch => 2,
            };
            if (xwr_eff >> access_bit) & 1 == 0 {
                return Err(());
            }

            // Superpage alignment.
            let vaddr_mask = (1u64 << vaddr_shift) - 1;
            let paddr_base = pte.ppn() << PAGE_SHIFT;
            if paddr_base & vaddr_mask != 0 {
                return Err(());
            }

            let mut new_raw = raw | PTE_A;
            if access == AccessType::Write {
                new_raw |= PTE_D;
            }
            if new_raw != raw && !self.phys_write(pte_addr, new_raw, LOG2_PTE_SIZE) {
                return Err(());
            }

            return Ok((vaddr & vaddr_mask) | (paddr_base & !vaddr_mask));
        }
        Err(())
    }
}
