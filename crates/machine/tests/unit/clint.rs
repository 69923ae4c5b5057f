//! CLINT timer unit tests.
//!
//! Verifies the derived mtime, timer interrupt generation from
//! `mtimecmp`, the MTIP retraction on reprogramming, MSIP plumbing, and
//! the WFI park/wake path.

use pretty_assertions::assert_eq;
use rvproof_machine::isa::cause::interrupt;
use rvproof_machine::state::csr::{MIP_MSIP, MIP_MTIP, MSTATUS_MIE};

use crate::common::{self as h, RAM};

/// Leaves the CLINT base in x10 (0x0200_0000).
fn clint_base() -> u32 {
    h::lui(10, 0x2000)
}

#[test]
fn mtime_is_derived_from_mcycle() {
    let mut m = h::machine_with(|c| c.processor.mcycle = 250);
    h::load_prog(
        &mut m,
        RAM,
        &[
            h::lui(10, 0x200C),      // 0x200C000
            h::addi(10, 10, -8),     // 0x200BFF8 = CLINT mtime
            h::ld(11, 10, 0),
            h::EBREAK,
        ],
    );
    let _ = m.run(253);
    // The load ran at mcycle 252; rtc divides by 100.
    assert_eq!(m.state.x[11], 2);
}

#[test]
fn mtimecmp_write_reads_back_and_clears_mtip() {
    let mut m = h::machine_with(|c| c.processor.mip = MIP_MTIP);
    h::load_prog(
        &mut m,
        RAM,
        &[
            clint_base(),
            h::addi(11, 0, 1),
            h::slli(11, 11, 14),    // 0x4000 = mtimecmp offset
            h::add(10, 10, 11),
            h::addi(12, 0, 0x7FF),
            h::sd(10, 12, 0),
            h::ld(13, 10, 0),
            h::EBREAK,
        ],
    );
    let _ = m.run(7);
    assert_eq!(m.state.clint_mtimecmp, 0x7FF);
    assert_eq!(m.state.x[13], 0x7FF, "mtimecmp reads back");
    assert_eq!(m.state.mip & MIP_MTIP, 0, "reprogramming retracts MTIP");
}

#[test]
fn timer_fires_and_wakes_a_parked_machine() {
    let mut m = h::machine_with(|c| {
        c.clint.mtimecmp = 1; // fires at rtc 1, i.e. mcycle 100
        c.processor.mie = MIP_MTIP;
        c.processor.mstatus |= MSTATUS_MIE;
        c.processor.mtvec = RAM + 0x200;
    });
    h::load_prog(&mut m, RAM, &[h::WFI, h::EBREAK]);

    let _ = m.run(101);
    // WFI parked at mcycle 1; idle time fast-forwarded to the timer at
    // mcycle 100; the interrupt was delivered on the next cycle.
    assert_eq!(m.state.mcycle, 101);
    assert_eq!(m.state.mcause, (1 << 63) | interrupt::MACHINE_TIMER);
    assert_eq!(m.state.mepc, RAM + 4);
    assert_eq!(m.state.pc, RAM + 0x200);
    assert!(!m.state.iflags_i);
    assert_ne!(m.state.mip & MIP_MTIP, 0);
}

#[test]
fn wfi_with_a_pending_interrupt_does_not_park() {
    let mut m = h::machine_with(|c| {
        c.processor.mie = MIP_MSIP;
        c.processor.mip = MIP_MSIP;
        // MIE clear: the interrupt is pending but not deliverable, yet a
        // pending-and-enabled pair still keeps WFI from parking.
    });
    h::load_prog(&mut m, RAM, &[h::WFI, h::addi(1, 0, 7), h::EBREAK]);
    let _ = m.run(2);
    assert!(!m.state.iflags_i);
    assert_eq!(m.state.x[1], 7, "execution continued past the WFI");
}

#[test]
fn msip_write_raises_the_software_interrupt_bit() {
    let mut m = h::machine();
    h::load_prog(
        &mut m,
        RAM,
        &[clint_base(), h::addi(11, 0, 1), h::sw(10, 11, 0), h::EBREAK],
    );
    let _ = m.run(3);
    assert_ne!(m.state.mip & MIP_MSIP, 0);

    // Writing zero clears it again.
    h::load_prog(&mut m, RAM, &[clint_base(), h::sw(10, 0, 0), h::EBREAK]);
    let _ = m.run(m.state.mcycle + 2);
    assert_eq!(m.state.mip & MIP_MSIP, 0);
}

#[test]
fn host_set_mip_wakes_a_parked_machine() {
    let mut m = h::machine_with(|c| {
        c.processor.mie = MIP_MSIP;
    });
    h::load_prog(&mut m, RAM, &[h::WFI, h::addi(1, 0, 3), h::EBREAK]);
    let _ = m.run(1);
    assert!(m.state.iflags_i, "WFI parked the machine");

    m.set_mip(MIP_MSIP);
    assert!(!m.state.iflags_i, "set_mip wakes the machine");
}
