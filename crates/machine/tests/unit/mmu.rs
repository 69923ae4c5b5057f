//! MMU and page-walk unit tests.
//!
//! Builds Sv39 page tables in guest RAM and checks translation, permission
//! faults under MPRV, accessed/dirty write-back, and the fault semantics of
//! a misaligned access crossing into an unmapped page.

use pretty_assertions::assert_eq;
use rvproof_machine::isa::cause::exception;
use rvproof_machine::state::PrivilegeMode;
use rvproof_machine::state::csr::{MSTATUS_MPRV, SATP_MODE_SV39};

use crate::common::{self as h, RAM};

const PTE_V: u64 = 1 << 0;
const PTE_R: u64 = 1 << 1;
const PTE_W: u64 = 1 << 2;
const PTE_X: u64 = 1 << 3;
const PTE_U: u64 = 1 << 4;
const PTE_A: u64 = 1 << 6;
const PTE_D: u64 = 1 << 7;

/// Root page table at RAM + 0x1000 with two 1 GiB identity gigapages:
/// VPN2 0 covers the ROM and devices, VPN2 2 covers RAM.
fn install_identity_gigapages(m: &mut rvproof_machine::Machine, flags: u64) {
    let root = RAM + 0x1000;
    let entry0 = flags; // ppn = 0
    let entry2 = ((RAM >> 12) << 10) | flags;
    if m.write_memory(root, &entry0.to_le_bytes()).is_err() {
        panic!("pte write failed");
    }
    if m.write_memory(root + 16, &entry2.to_le_bytes()).is_err() {
        panic!("pte write failed");
    }
}

fn satp_for_root() -> u64 {
    (SATP_MODE_SV39 << 60) | ((RAM + 0x1000) >> 12)
}

#[test]
fn sv39_identity_load_reads_the_mapped_physical_page() {
    let mut m = h::machine_with(|c| {
        c.processor.iflags = PrivilegeMode::Supervisor.to_u64() << 3;
        c.processor.satp = satp_for_root();
    });
    install_identity_gigapages(&mut m, PTE_V | PTE_R | PTE_W | PTE_X | PTE_A | PTE_D);
    let value = 0x1122_3344_5566_7788u64;
    assert!(m.write_memory(0x17F8, &value.to_le_bytes()).is_ok());

    h::load_prog(
        &mut m,
        RAM,
        &[h::lui(10, 0x1), h::ld(11, 10, 0x7F8), h::EBREAK],
    );
    let _ = m.run(2);
    assert_eq!(m.state.x[10], 0x1000);
    assert_eq!(m.state.x[11], value);
    assert_eq!(m.state.scause, 0, "no fault expected");
    assert_eq!(m.state.mcause, 0, "no fault expected");
}

#[test]
fn mprv_with_user_mpp_faults_on_a_supervisor_only_page() {
    // From M-mode, MPRV redirects data accesses through the User privilege;
    // the identity map has U clear, so the load page-faults with the
    // virtual address in mtval.
    let mut m = h::machine_with(|c| {
        c.processor.satp = satp_for_root();
        c.processor.mstatus |= MSTATUS_MPRV; // MPP = User (zero)
    });
    install_identity_gigapages(&mut m, PTE_V | PTE_R | PTE_W | PTE_X | PTE_A | PTE_D);

    h::load_prog(&mut m, RAM, &[h::lui(10, 0x1), h::ld(11, 10, 0), h::EBREAK]);
    let _ = m.run(2);
    assert_eq!(m.state.mcause, exception::LOAD_PAGE_FAULT);
    assert_eq!(m.state.mtval, 0x1000);
    assert_eq!(m.state.x[11], 0, "the destination register must not change");
}

#[test]
fn walker_sets_accessed_and_dirty_bits_in_memory() {
    let mut m = h::machine_with(|c| {
        c.processor.iflags = PrivilegeMode::Supervisor.to_u64() << 3;
        c.processor.satp = satp_for_root();
    });
    // Leaf PTEs without A/D: the walk must write them back.
    install_identity_gigapages(&mut m, PTE_V | PTE_R | PTE_W | PTE_X);

    h::load_prog(
        &mut m,
        RAM,
        &[
            h::lui(10, 0x1),
            h::ld(11, 10, 0),      // read: sets A on entry 0
            h::lui(12, 0x80001),   // 0x8000_1000 - stores go via entry 2
            h::sd(12, 11, 0x7F8),  // write: sets A and D on entry 2
            h::EBREAK,
        ],
    );
    let _ = m.run(5);

    let entry0 = match m.read_word(RAM + 0x1000) {
        Some(w) => w,
        None => panic!("pte not readable"),
    };
    let entry2 = match m.read_word(RAM + 0x1000 + 16) {
        Some(w) => w,
        None => panic!("pte not readable"),
    };
    assert_eq!(entry0 & PTE_A, PTE_A);
    assert_eq!(entry0 & PTE_D, 0);
    assert_eq!(entry2 & (PTE_A | PTE_D), PTE_A | PTE_D);
}

#[test]
fn user_page_requires_sum_for_supervisor_loads() {
    let mut m = h::machine_with(|c| {
        c.processor.iflags = PrivilegeMode::Supervisor.to_u64() << 3;
        c.processor.satp = satp_for_root();
    });
    // U set everywhere; without SUM a supervisor load must fault. Fetches
    // run from RAM, which is covered by the same U mapping, so the fetch
    // itself faults first - which is exactly the behaviour checked here.
    install_identity_gigapages(&mut m, PTE_V | PTE_R | PTE_W | PTE_X | PTE_U | PTE_A | PTE_D);
    h::load_prog(&mut m, RAM, &[h::addi(1, 0, 1), h::EBREAK]);
    let _ = m.run(1);
    assert_eq!(m.state.mcause, exception::FETCH_PAGE_FAULT);
    assert_eq!(m.state.mtval, RAM);
}

#[test]
fn misaligned_read_crossing_into_an_unmapped_page_faults_with_the_original_address() {
    // Map only the gigapages, then point a misaligned doubleword read at
    // the very top of the mapped RAM gigapage so its tail crosses into
    // unmapped space.
    let mut m = h::machine_with(|c| {
        c.processor.iflags = PrivilegeMode::Supervisor.to_u64() << 3;
        c.processor.satp = satp_for_root();
        c.processor.stvec = RAM + 0x800;
        c.processor.medeleg = 1 << exception::LOAD_PAGE_FAULT;
    });
    // Gigapage for the program fetches, plus a three-level walk mapping
    // only virtual page 0x4000: 0x5000 stays unmapped.
    let flags = PTE_V | PTE_R | PTE_W | PTE_X | PTE_A | PTE_D;
    let root = RAM + 0x1000;
    let l1 = RAM + 0x2000;
    let l0 = RAM + 0x3000;
    let data_page = RAM + 0x5000;
    let write = |m: &mut rvproof_machine::Machine, addr: u64, pte: u64| {
        if m.write_memory(addr, &pte.to_le_bytes()).is_err() {
            panic!("pte write failed");
        }
    };
    write(&mut m, root, ((l1 >> 12) << 10) | PTE_V); // VPN2 0 -> level 1
    write(&mut m, root + 16, ((RAM >> 12) << 10) | flags); // VPN2 2: gigapage
    write(&mut m, l1, ((l0 >> 12) << 10) | PTE_V); // VPN1 0 -> level 0
    write(&mut m, l0 + 4 * 8, ((data_page >> 12) << 10) | flags); // VPN0 4

    assert!(m.write_memory(data_page + 0xFF8, &[1, 2, 3, 4, 5, 6, 7, 8]).is_ok());

    // A doubleword read at 0x4FFC: the first aligned half (0x4FF8) is
    // mapped, the second (0x5000) has no PTE.
    let vaddr = 0x4FFCu64;
    h::load_prog(
        &mut m,
        RAM,
        &[
            h::lui(10, 0x5),
            h::addi(10, 10, -4), // 0x4FFC
            h::ld(11, 10, 0),
            h::EBREAK,
        ],
    );
    let _ = m.run(3);
    assert_eq!(m.state.scause, exception::LOAD_PAGE_FAULT);
    assert_eq!(m.state.stval, vaddr, "fault reports the access address");
    assert_eq!(m.state.x[11], 0, "the destination register must not change");
}
