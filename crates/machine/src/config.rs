//! Machine configuration.
//!
//! This module defines the configuration structures a machine is constructed
//! from. It provides:
//! 1. **Defaults:** Reset values for the processor and the memory layout.
//! 2. **Structures:** Hierarchical config for processor, RAM, ROM, flash drives,
//!    CLINT, HTIF, DHD and rollup memory ranges.
//! 3. **Serialization:** Every structure round-trips through serde; the same
//!    types are persisted by `Machine::store` and consumed by `Machine::load`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::state::csr::{MISA_DEFAULT, MSTATUS_DEFAULT};
use crate::state::{IFLAGS_PRV_SHIFT, ILRSC_NONE, PrivilegeMode};

/// Default configuration constants.
mod defaults {
    /// Reset program counter: the first word of the boot ROM.
    pub const PC: u64 = 0x1000;

    /// Default RAM length (64 MiB).
    pub const RAM_LENGTH: u64 = 64 * 1024 * 1024;

    /// Default timer compare value; `u64::MAX` keeps the timer disarmed
    /// until the guest programs it.
    pub const MTIMECMP: u64 = u64::MAX;
}

/// Per-hart processor state configuration.
///
/// Every field is a raw 64-bit register image; `iflags` packs the privilege
/// mode and the halt/yield/idle flags.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// General registers `x1..x31` (`x0` is a hard zero).
    pub x: [u64; 31],
    /// Program counter.
    pub pc: u64,
    /// Vendor ID.
    pub mvendorid: u64,
    /// Architecture ID.
    pub marchid: u64,
    /// Implementation ID.
    pub mimpid: u64,
    /// Hart ID.
    pub mhartid: u64,
    /// Cycle counter.
    pub mcycle: u64,
    /// Retired-instruction counter.
    pub minstret: u64,
    /// Machine status register.
    pub mstatus: u64,
    /// Machine trap vector.
    pub mtvec: u64,
    /// Machine scratch register.
    pub mscratch: u64,
    /// Machine exception program counter.
    pub mepc: u64,
    /// Machine trap cause.
    pub mcause: u64,
    /// Machine trap value.
    pub mtval: u64,
    /// Machine ISA register.
    pub misa: u64,
    /// Machine interrupt enable.
    pub mie: u64,
    /// Machine interrupt pending.
    pub mip: u64,
    /// Machine exception delegation.
    pub medeleg: u64,
    /// Machine interrupt delegation.
    pub mideleg: u64,
    /// Machine counter enable.
    pub mcounteren: u64,
    /// Supervisor trap vector.
    pub stvec: u64,
    /// Supervisor scratch register.
    pub sscratch: u64,
    /// Supervisor exception program counter.
    pub sepc: u64,
    /// Supervisor trap cause.
    pub scause: u64,
    /// Supervisor trap value.
    pub stval: u64,
    /// Supervisor address translation and protection register.
    pub satp: u64,
    /// Supervisor counter enable.
    pub scounteren: u64,
    /// LR/SC reservation address.
    pub ilrsc: u64,
    /// Packed privilege and halt/yield/idle flags.
    pub iflags: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            x: [0; 31],
            pc: defaults::PC,
            mvendorid: 0,
            marchid: 0,
            mimpid: 0,
            mhartid: 0,
            mcycle: 0,
            minstret: 0,
            mstatus: MSTATUS_DEFAULT,
            mtvec: 0,
            mscratch: 0,
            mepc: 0,
            mcause: 0,
            mtval: 0,
            misa: MISA_DEFAULT,
            mie: 0,
            mip: 0,
            medeleg: 0,
            mideleg: 0,
            mcounteren: 0,
            stvec: 0,
            sscratch: 0,
            sepc: 0,
            scause: 0,
            stval: 0,
            satp: 0,
            scounteren: 0,
            ilrsc: ILRSC_NONE,
            iflags: PrivilegeMode::Machine.to_u64() << IFLAGS_PRV_SHIFT,
        }
    }
}

/// Main RAM configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RamConfig {
    /// RAM length in bytes (power of two, page multiple).
    pub length: u64,
    /// Optional initial image loaded at the base of RAM.
    pub image_filename: Option<PathBuf>,
}

impl Default for RamConfig {
    fn default() -> Self {
        Self {
            length: defaults::RAM_LENGTH,
            image_filename: None,
        }
    }
}

/// Boot ROM configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RomConfig {
    /// Boot arguments written as a NUL-terminated string into the tail of
    /// the ROM range.
    pub bootargs: Option<String>,
    /// Optional image loaded at the base of the ROM range.
    pub image_filename: Option<PathBuf>,
}

/// A flash drive backed by a host file or an anonymous buffer.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashDriveConfig {
    /// Base physical address.
    pub start: u64,
    /// Length in bytes (power of two, page multiple, base-aligned).
    pub length: u64,
    /// Optional backing image.
    pub image_filename: Option<PathBuf>,
    /// When set, the image is mapped shared so stores write through to the
    /// backing file.
    pub shared: bool,
}

/// CLINT configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClintConfig {
    /// Initial timer compare value.
    pub mtimecmp: u64,
}

impl Default for ClintConfig {
    fn default() -> Self {
        Self {
            mtimecmp: defaults::MTIMECMP,
        }
    }
}

/// HTIF configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HtifConfig {
    /// Initial tohost register value.
    pub tohost: u64,
    /// Initial fromhost register value.
    pub fromhost: u64,
    /// Enables the console getchar command.
    pub console_getchar: bool,
    /// Enables manual yield.
    pub yield_manual: bool,
    /// Enables automatic yield.
    pub yield_automatic: bool,
}

/// DHD (dehashed data device) configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DhdConfig {
    /// Target range start.
    pub tstart: u64,
    /// Target range length (zero disables the target range).
    pub tlength: u64,
    /// Dehashed data length.
    pub dlength: u64,
    /// Input hash length.
    pub hlength: u64,
    /// Optional target range image.
    pub image_filename: Option<PathBuf>,
    /// Input hash words.
    pub h: [u64; crate::state::DHD_H_REG_COUNT],
}

/// A plain memory range (used by the rollup buffers).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryRangeConfig {
    /// Base physical address.
    pub start: u64,
    /// Length in bytes (power of two, page multiple, base-aligned).
    pub length: u64,
    /// Optional backing image.
    pub image_filename: Option<PathBuf>,
}

/// Rollup buffer configuration: five memory ranges.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RollupConfig {
    /// Input buffer.
    pub rx_buffer: MemoryRangeConfig,
    /// Output buffer.
    pub tx_buffer: MemoryRangeConfig,
    /// Input metadata buffer.
    pub input_metadata: MemoryRangeConfig,
    /// Voucher hash buffer.
    pub voucher_hashes: MemoryRangeConfig,
    /// Notice hash buffer.
    pub notice_hashes: MemoryRangeConfig,
}

/// Complete machine configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Processor state.
    pub processor: ProcessorConfig,
    /// Main RAM.
    pub ram: RamConfig,
    /// Boot ROM.
    pub rom: RomConfig,
    /// Flash drives.
    pub flash_drive: Vec<FlashDriveConfig>,
    /// CLINT timer.
    pub clint: ClintConfig,
    /// Host-target interface.
    pub htif: HtifConfig,
    /// Dehashed data device.
    pub dhd: DhdConfig,
    /// Rollup buffers, when present.
    pub rollup: Option<RollupConfig>,
}
