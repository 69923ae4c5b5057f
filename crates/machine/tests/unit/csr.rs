//! CSR access unit tests.
//!
//! Exercises the CSR instructions end to end: read/write plumbing,
//! read-only and privilege protection, the `satp` mode filter, counter
//! gating, and the `sstatus` restricted view.

use pretty_assertions::assert_eq;
use rvproof_machine::isa::cause::exception;
use rvproof_machine::state::PrivilegeMode;
use rvproof_machine::state::csr::{CYCLE, MSCRATCH, MSTATUS, MSTATUS_SUM, SATP, SSTATUS};

use crate::common::{self as h, RAM};

#[test]
fn csrrw_writes_and_returns_the_old_value() {
    let mut m = h::machine_with(|c| c.processor.mscratch = 7);
    h::load_prog(
        &mut m,
        RAM,
        &[h::addi(1, 0, 42), h::csrrw(2, MSCRATCH, 1), h::EBREAK],
    );
    let _ = m.run(2);
    assert_eq!(m.state.mscratch, 42);
    assert_eq!(m.state.x[2], 7);
}

#[test]
fn csrrs_with_x0_reads_without_writing() {
    let mut m = h::machine_with(|c| c.processor.mscratch = 0xABCD);
    h::load_prog(&mut m, RAM, &[h::csrrs(1, MSCRATCH, 0), h::EBREAK]);
    let _ = m.run(1);
    assert_eq!(m.state.x[1], 0xABCD);
    assert_eq!(m.state.mscratch, 0xABCD);
}

#[test]
fn writing_a_read_only_csr_is_illegal() {
    let mut m = h::machine();
    // mvendorid is in the read-only block (0xF11).
    h::load_prog(&mut m, RAM, &[h::csrrw(1, 0xF11, 2), h::EBREAK]);
    let _ = m.run(1);
    assert_eq!(m.state.mcause, exception::ILLEGAL_INSTRUCTION);
}

#[test]
fn machine_csr_needs_machine_privilege() {
    let mut m = h::machine_with(|c| {
        c.processor.iflags = PrivilegeMode::Supervisor.to_u64() << 3;
    });
    h::load_prog(&mut m, RAM, &[h::csrrs(1, MSCRATCH, 0), h::EBREAK]);
    let _ = m.run(1);
    assert_eq!(m.state.mcause, exception::ILLEGAL_INSTRUCTION);
    assert_eq!(m.state.privilege, PrivilegeMode::Machine, "trapped upward");
}

#[test]
fn csrrw_with_x0_still_enforces_privilege() {
    // The rd=x0 form skips only the read-back, never the access check: a
    // user-mode csrrw x0, satp must trap without touching satp.
    let mut m = h::machine_with(|c| {
        c.processor.iflags = PrivilegeMode::User.to_u64() << 3;
    });
    h::load_prog(&mut m, RAM, &[h::csrrw(0, SATP, 1), h::EBREAK]);
    m.state.x[1] = (8 << 60) | 0x80001;
    let _ = m.run(1);
    assert_eq!(m.state.mcause, exception::ILLEGAL_INSTRUCTION);
    assert_eq!(m.state.satp, 0, "satp must be unchanged");
    assert_eq!(m.state.privilege, PrivilegeMode::Machine, "trapped upward");
}

#[test]
fn csrrw_with_x0_cannot_reach_machine_csrs_from_supervisor() {
    let mut m = h::machine_with(|c| {
        c.processor.iflags = PrivilegeMode::Supervisor.to_u64() << 3;
    });
    h::load_prog(&mut m, RAM, &[h::csrrw(0, MSTATUS, 1), h::EBREAK]);
    m.state.x[1] = u64::MAX;
    let mstatus_before = m.state.mstatus;
    let _ = m.run(1);
    assert_eq!(m.state.mcause, exception::ILLEGAL_INSTRUCTION);
    assert_eq!(m.state.mstatus, mstatus_before, "mstatus must be unchanged");
}

#[test]
fn satp_filters_unsupported_modes() {
    let mut m = h::machine();
    // Mode 5 is reserved: the ppn is written, the mode field is retained.
    h::load_prog(
        &mut m,
        RAM,
        &[
            h::addi(1, 0, 5),
            h::slli(1, 1, 60),
            h::addi(1, 1, 123),
            h::csrrw(0, SATP, 1),
            h::EBREAK,
        ],
    );
    let _ = m.run(4);
    assert_eq!(m.state.satp, 123, "mode stays Bare, ppn is accepted");
}

#[test]
fn satp_accepts_sv39_and_sv48() {
    for mode in [8u64, 9] {
        let mut m = h::machine();
        h::load_prog(
            &mut m,
            RAM,
            &[
                h::addi(1, 0, mode as i32),
                h::slli(1, 1, 60),
                h::csrrw(0, SATP, 1),
                h::EBREAK,
            ],
        );
        let _ = m.run(3);
        assert_eq!(m.state.satp >> 60, mode);
    }
}

#[test]
fn cycle_counter_is_gated_below_machine_mode() {
    // Supervisor reads of the user cycle counter require mcounteren bit 0.
    let mut m = h::machine_with(|c| {
        c.processor.iflags = PrivilegeMode::Supervisor.to_u64() << 3;
    });
    h::load_prog(&mut m, RAM, &[h::csrrs(1, CYCLE, 0), h::EBREAK]);
    let _ = m.run(1);
    assert_eq!(m.state.mcause, exception::ILLEGAL_INSTRUCTION);

    let mut m = h::machine_with(|c| {
        c.processor.iflags = PrivilegeMode::Supervisor.to_u64() << 3;
        c.processor.mcounteren = 1;
    });
    h::load_prog(&mut m, RAM, &[h::csrrs(1, CYCLE, 0), h::EBREAK]);
    let _ = m.run(1);
    assert_eq!(m.state.mcause, 0, "enabled counter read succeeds");
    assert_eq!(m.state.x[1], 0, "cycle counter at the first cycle");
}

#[test]
fn sstatus_is_a_masked_view_of_mstatus() {
    let mut m = h::machine_with(|c| {
        c.processor.iflags = PrivilegeMode::Supervisor.to_u64() << 3;
    });
    h::load_prog(
        &mut m,
        RAM,
        &[
            h::addi(1, 0, 1),
            h::slli(1, 1, 18),            // SUM bit
            h::csrrs(0, SSTATUS, 1),      // set SUM via sstatus
            h::csrrs(2, SSTATUS, 0),      // read it back
            h::EBREAK,
        ],
    );
    let _ = m.run(4);
    assert_ne!(m.state.mstatus & MSTATUS_SUM, 0, "SUM reached mstatus");
    assert_ne!(m.state.x[2] & MSTATUS_SUM, 0);
    // Machine-only bits never leak through the sstatus view.
    assert_eq!(m.state.x[2] & (1 << 3), 0, "MIE is not visible");
}

#[test]
fn mcycle_reads_through_csrrs() {
    let mut m = h::machine();
    h::load_prog(
        &mut m,
        RAM,
        &[h::addi(0, 0, 0), h::csrrs(1, 0xB00, 0), h::EBREAK],
    );
    let _ = m.run(2);
    assert_eq!(m.state.x[1], 1, "mcycle observed during the second cycle");
}
