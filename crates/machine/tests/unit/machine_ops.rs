//! Machine-level operation tests.
//!
//! Root-hash purity, commitment coverage of the register file, host
//! memory access, persistence round trips, and run determinism.

use pretty_assertions::assert_eq;
use rvproof_machine::Machine;
use rvproof_machine::config::MachineConfig;

use crate::common::{self as h, RAM};

#[test]
fn identical_machines_share_a_root() {
    let mut a = h::machine();
    let mut b = h::machine();
    assert_eq!(a.get_root_hash(), b.get_root_hash());
}

#[test]
fn any_memory_byte_changes_the_root() {
    let mut m = h::machine();
    let clean = m.get_root_hash();

    assert!(m.write_memory(RAM + 0x123, &[1]).is_ok());
    assert_ne!(m.get_root_hash(), clean);

    assert!(m.write_memory(RAM + 0x123, &[0]).is_ok());
    assert_eq!(m.get_root_hash(), clean, "restoring the byte restores the root");
}

#[test]
fn the_register_file_is_committed() {
    let mut m = h::machine();
    let clean = m.get_root_hash();
    m.state.x[5] = 1;
    assert_ne!(m.get_root_hash(), clean, "registers are part of the root");
    m.state.x[5] = 0;
    assert_eq!(m.get_root_hash(), clean);
}

#[test]
fn write_memory_read_memory_roundtrip() {
    let mut m = h::machine();
    let data: Vec<u8> = (0..=255).collect();
    assert!(m.write_memory(RAM + 0x800, &data).is_ok());
    let mut back = vec![0u8; data.len()];
    assert!(m.read_memory(RAM + 0x800, &mut back).is_ok());
    assert_eq!(back, data);
}

#[test]
fn host_memory_access_outside_ram_is_rejected() {
    let mut m = h::machine();
    assert!(m.write_memory(0x7000_0000, &[1]).is_err());
    let mut buf = [0u8; 4];
    assert!(m.read_memory(0x7000_0000, &mut buf).is_err());
    // A window straddling the end of a range is rejected too.
    let end = RAM + h::TEST_RAM_LENGTH - 2;
    assert!(m.write_memory(end, &[1, 2, 3, 4]).is_err());
}

#[test]
fn read_word_sees_committed_device_state() {
    let m = h::machine_with(|c| c.clint.mtimecmp = 0x1234);
    assert_eq!(m.read_word(h::CLINT + 0x4000), Some(0x1234));
    // The shadow commits the pc.
    assert_eq!(m.read_word(0x100), Some(0x1000));
    // Unmapped space has no committed word.
    assert_eq!(m.read_word(0x7000_0000), None);
}

#[test]
fn store_load_preserves_the_root_hash() {
    let dir = match tempfile::tempdir() {
        Ok(d) => d,
        Err(e) => panic!("tempdir failed: {e}"),
    };
    let mut m = h::machine();
    h::load_prog(&mut m, RAM, &[h::addi(1, 0, 7), h::addi(2, 1, 1), h::EBREAK]);
    let _ = m.run(2);

    let root = m.get_root_hash();
    assert!(m.store(dir.path()).is_ok());

    let mut reloaded = match Machine::load(dir.path()) {
        Ok(m) => m,
        Err(e) => panic!("load failed: {e}"),
    };
    assert_eq!(reloaded.get_root_hash(), root);
    assert_eq!(reloaded.state.pc, m.state.pc);
    assert_eq!(reloaded.state.mcycle, m.state.mcycle);
    assert_eq!(reloaded.state.x[1], 7);
    assert_eq!(reloaded.state.x[2], 8);
}

#[test]
fn a_reloaded_machine_continues_identically() {
    let dir = match tempfile::tempdir() {
        Ok(d) => d,
        Err(e) => panic!("tempdir failed: {e}"),
    };
    let mut m = h::machine();
    h::load_prog(
        &mut m,
        RAM,
        &[
            h::addi(1, 0, 3),
            h::addi(2, 0, 4),
            h::mul(3, 1, 2),
            h::lui(10, 0x80001),
            h::sd(10, 3, 0),
            h::EBREAK,
        ],
    );
    let _ = m.run(2);
    assert!(m.store(dir.path()).is_ok());
    let mut twin = match Machine::load(dir.path()) {
        Ok(t) => t,
        Err(e) => panic!("load failed: {e}"),
    };

    let _ = m.run(5);
    let _ = twin.run(5);
    assert_eq!(m.get_root_hash(), twin.get_root_hash());
    assert_eq!(m.state.x[3], 12);
    assert_eq!(twin.state.x[3], 12);
}

#[test]
fn identical_runs_are_deterministic() {
    let build = || {
        let mut m = h::machine();
        h::load_prog(
            &mut m,
            RAM,
            &[
                h::addi(1, 0, 100),
                h::addi(2, 0, 0),
                // loop: x2 += x1; x1 -= 1; bne x1, x0, loop
                h::add(2, 2, 1),
                h::addi(1, 1, -1),
                h::bne(1, 0, -8),
                h::EBREAK,
            ],
        );
        m
    };
    let mut a = build();
    let mut b = build();
    let _ = a.run(250);
    let _ = b.run(250);
    assert_eq!(a.state.mcycle, b.state.mcycle);
    assert_eq!(a.state.x[2], b.state.x[2]);
    assert_eq!(a.get_root_hash(), b.get_root_hash());
}

#[test]
fn config_round_trips_through_json() {
    let mut config = MachineConfig::default();
    config.ram.length = h::TEST_RAM_LENGTH;
    config.processor.pc = 0x2000;
    config.processor.x[0] = 0xAA; // x1
    config.htif.yield_manual = true;
    config.dhd.h[2] = 99;

    let json = match serde_json::to_string_pretty(&config) {
        Ok(s) => s,
        Err(e) => panic!("serialize failed: {e}"),
    };
    let decoded: MachineConfig = match serde_json::from_str(&json) {
        Ok(c) => c,
        Err(e) => panic!("deserialize failed: {e}"),
    };
    assert_eq!(decoded.processor.pc, 0x2000);
    assert_eq!(decoded.processor.x[0], 0xAA);
    assert_eq!(decoded.ram.length, h::TEST_RAM_LENGTH);
    assert!(decoded.htif.yield_manual);
    assert_eq!(decoded.dhd.h[2], 99);
}

#[test]
fn rom_bootargs_are_written_into_the_rom_tail() {
    let m = h::machine_with(|c| c.rom.bootargs = Some("console=hvc0".to_owned()));
    let mut buf = [0u8; 12];
    assert!(m.read_memory(0x1000 + 0xF000, &mut buf).is_ok());
    assert_eq!(&buf, b"console=hvc0");
}

#[test]
fn flash_drive_ranges_are_mapped_and_committed() {
    let mut m = h::machine_with(|c| {
        c.flash_drive.push(rvproof_machine::config::FlashDriveConfig {
            start: 0x9000_0000,
            length: 0x1000,
            image_filename: None,
            shared: false,
        });
    });
    let clean = m.get_root_hash();
    assert!(m.write_memory(0x9000_0000, &[0xEE]).is_ok());
    assert_ne!(m.get_root_hash(), clean);
    assert_eq!(m.read_word(0x9000_0000), Some(0xEE));
}
