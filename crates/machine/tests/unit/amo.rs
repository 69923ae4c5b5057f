//! Atomics (A extension) unit tests.
//!
//! Covers LR/SC reservation tracking, the trap-clears-reservation rule,
//! and the read-modify-write AMOs.

use pretty_assertions::assert_eq;
use rvproof_machine::state::ILRSC_NONE;
use rvproof_machine::state::csr::{MIP_MSIP, MSTATUS_MIE};

use crate::common::{self as h, RAM};

#[test]
fn lr_sc_pair_succeeds_and_stores() {
    let mut m = h::machine();
    assert!(m.write_memory(RAM + 0x100, &77u64.to_le_bytes()).is_ok());
    h::load_prog(
        &mut m,
        RAM,
        &[
            h::lui(10, 0x80000),
            h::addi(10, 10, 0x100),
            h::addi(12, 0, 55),
            h::lr_d(11, 10),
            h::sc_d(13, 10, 12),
            h::EBREAK,
        ],
    );
    let _ = m.run(5);
    assert_eq!(m.state.x[11], 77, "LR loads the old value");
    assert_eq!(m.state.x[13], 0, "SC succeeds");
    assert_eq!(m.read_word(RAM + 0x100), Some(55));
    assert_eq!(m.state.ilrsc, ILRSC_NONE, "SC consumes the reservation");
}

#[test]
fn sc_to_an_unreserved_address_fails() {
    let mut m = h::machine();
    assert!(m.write_memory(RAM + 0x100, &77u64.to_le_bytes()).is_ok());
    h::load_prog(
        &mut m,
        RAM,
        &[
            h::lui(10, 0x80000),
            h::addi(10, 10, 0x100),
            h::addi(12, 0, 55),
            h::lr_d(11, 10),
            h::addi(10, 10, 8), // move the target off the reservation
            h::sc_d(13, 10, 12),
            h::EBREAK,
        ],
    );
    let _ = m.run(6);
    assert_eq!(m.state.x[13], 1, "SC fails");
    assert_eq!(m.read_word(RAM + 0x108), Some(0), "memory is unchanged");
}

#[test]
fn trap_between_lr_and_sc_clears_the_reservation() {
    // An interrupt delivered between LR and SC must clear the reservation,
    // so the SC reports failure and memory stays untouched.
    let mut m = h::machine_with(|c| {
        c.processor.mie = MIP_MSIP;
        c.processor.mstatus |= MSTATUS_MIE;
        c.processor.mtvec = RAM + 0x200;
    });
    assert!(m.write_memory(RAM + 0x100, &77u64.to_le_bytes()).is_ok());
    h::load_prog(
        &mut m,
        RAM,
        &[
            h::lui(10, 0x80000),
            h::addi(10, 10, 0x100),
            h::addi(12, 0, 55),
            h::lr_d(11, 10),
            h::sc_d(13, 10, 12),
            h::EBREAK,
        ],
    );
    // Handler: just return.
    assert!(m.write_memory(RAM + 0x200, &h::MRET.to_le_bytes()).is_ok());

    // Run up to and including the LR, then raise a software interrupt.
    let _ = m.run(4);
    assert_ne!(m.state.ilrsc, ILRSC_NONE, "LR placed a reservation");
    m.set_mip(MIP_MSIP);

    // One cycle delivers the interrupt; retract it before MRET so it is
    // not taken again, then let the handler return and the SC run.
    let _ = m.run(5);
    m.reset_mip(MIP_MSIP);
    let _ = m.run(8);

    assert_eq!(m.state.x[13], 1, "SC fails after the trap");
    assert_eq!(m.read_word(RAM + 0x100), Some(77), "memory is unchanged");
    assert_eq!(m.state.ilrsc, ILRSC_NONE);
}

#[test]
fn amoadd_w_returns_old_and_adds() {
    let mut m = h::machine();
    assert!(m.write_memory(RAM + 0x100, &10u32.to_le_bytes()).is_ok());
    h::load_prog(
        &mut m,
        RAM,
        &[
            h::lui(10, 0x80000),
            h::addi(10, 10, 0x100),
            h::addi(12, 0, 32),
            h::amoadd_w(11, 10, 12),
            h::EBREAK,
        ],
    );
    let _ = m.run(4);
    assert_eq!(m.state.x[11], 10);
    let mut word = [0u8; 4];
    assert!(m.read_memory(RAM + 0x100, &mut word).is_ok());
    assert_eq!(u32::from_le_bytes(word), 42);
}

#[test]
fn amoswap_d_exchanges_values() {
    let mut m = h::machine();
    assert!(m.write_memory(RAM + 0x100, &111u64.to_le_bytes()).is_ok());
    h::load_prog(
        &mut m,
        RAM,
        &[
            h::lui(10, 0x80000),
            h::addi(10, 10, 0x100),
            h::addi(12, 0, 222),
            h::amoswap_d(11, 10, 12),
            h::EBREAK,
        ],
    );
    let _ = m.run(4);
    assert_eq!(m.state.x[11], 111);
    assert_eq!(m.read_word(RAM + 0x100), Some(222));
}

#[test]
fn misaligned_amo_raises_store_misaligned() {
    let mut m = h::machine();
    h::load_prog(
        &mut m,
        RAM,
        &[
            h::lui(10, 0x80000),
            h::addi(10, 10, 0x101),
            h::amoswap_d(11, 10, 12),
        ],
    );
    let _ = m.run(3);
    assert_eq!(
        m.state.mcause,
        rvproof_machine::isa::cause::exception::MISALIGNED_STORE
    );
    assert_eq!(m.state.mtval, RAM + 0x101);
}
