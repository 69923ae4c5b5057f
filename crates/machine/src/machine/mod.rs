//! The machine aggregate.
//!
//! This module owns the pieces the rest of the crate operates on:
//! 1. **Assembly:** Builds the physical memory map from a configuration and
//!    loads ROM/RAM/flash images.
//! 2. **Commitment:** Keeps the Merkle tree in sync with the committed state
//!    and produces root hashes and proofs.
//! 3. **Persistence:** Stores the machine into a directory and reloads it.
//! 4. **Host Integration:** Interrupt injection, flag inspection, memory
//!    peeks and pokes, console draining.
//!
//! The interpreter, MMU, CSR logic and logged accessors live in sibling
//! files as further `impl Machine` blocks.

/// Logged state accessors.
mod access;

/// CSR read/write dispatch.
mod csr;

/// The fetch/decode/execute loop.
mod interp;

/// Virtual and physical memory access paths.
mod memory;

/// Virtual address translation.
mod translate;

/// Trap raising, interrupt polling, and privileged returns.
mod trap;

pub use csr::CsrWriteResult;

use std::fs;
use std::io::Read as _;
use std::path::{Path, PathBuf};

use crate::bus::{Backing, DeviceId, DevioFlags, HostBuffer, PhysMap};
use crate::common::constants::layout;
use crate::common::constants::{PAGE_MASK, PAGE_SHIFT, PAGE_SIZE};
use crate::common::error::MachineError;
use crate::config::{
    ClintConfig, DhdConfig, FlashDriveConfig, HtifConfig, MachineConfig, MemoryRangeConfig,
    RamConfig, RomConfig,
};
use crate::devices;
use crate::log::{AccessLog, LogType};
use crate::state::ProcessorState;
use crate::tlb::TlbSet;
use crate::tree::{Hash, LOG2_PAGE_SIZE, LOG2_WORD_SIZE, MerkleTree, Proof};

/// File name of the persisted configuration inside a stored machine
/// directory.
const CONFIG_FILE: &str = "config.json";

/// Why `run` returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakReason {
    /// The cycle budget was reached.
    ReachedTargetMcycle,
    /// The guest halted through the host-target interface.
    Halted,
    /// The guest yielded through the host-target interface.
    Yielded,
}

/// A deterministic RV64IMA machine with a Merkle-committed state.
pub struct Machine {
    /// Architectural processor state (public for host inspection; mutate
    /// only between runs).
    pub state: ProcessorState,
    pub(crate) map: PhysMap,
    pub(crate) tlb: TlbSet,
    pub(crate) tree: MerkleTree,
    pub(crate) log: Option<AccessLog>,
    pub(crate) console: Vec<u8>,
    config: MachineConfig,
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("pc", &format_args!("{:#x}", self.state.pc))
            .field("mcycle", &self.state.mcycle)
            .field("ranges", &self.map.len())
            .finish()
    }
}

impl Machine {
    /// Builds a machine from a configuration.
    ///
    /// # Errors
    ///
    /// Fails on malformed ranges (overlap, bad alignment, bad length), on
    /// images that cannot be read or do not fit, and on host allocation
    /// failures. No partial machine is ever returned.
    pub fn new(config: MachineConfig) -> Result<Self, MachineError> {
        let mut map = PhysMap::new();

        let _ = map.register_device(
            layout::SHADOW_START,
            layout::SHADOW_LENGTH,
            DeviceId::Shadow,
            DevioFlags::new(DevioFlags::W64),
        )?;
        let _ = map.register_device(
            layout::CLINT_START,
            layout::CLINT_LENGTH,
            DeviceId::Clint,
            DevioFlags::new(DevioFlags::W32 | DevioFlags::W64),
        )?;
        let _ = map.register_device(
            layout::HTIF_START,
            layout::HTIF_LENGTH,
            DeviceId::Htif,
            DevioFlags::new(DevioFlags::W64),
        )?;
        let _ = map.register_device(
            layout::DHD_START,
            layout::DHD_LENGTH,
            DeviceId::Dhd,
            DevioFlags::new(DevioFlags::W64),
        )?;

        let rom = Self::build_rom(&config.rom)?;
        let _ = map.register_ram(layout::ROM_START, layout::ROM_LENGTH, rom)?;

        if config.ram.length == 0 {
            return Err(MachineError::InvalidConfig("ram.length must not be zero".to_owned()));
        }
        let ram = Self::build_image_buffer(
            config.ram.length,
            config.ram.image_filename.as_deref(),
            layout::RAM_START,
        )?;
        let _ = map.register_ram(layout::RAM_START, config.ram.length, ram)?;

        for drive in &config.flash_drive {
            let buffer = if drive.shared {
                let path = drive.image_filename.as_deref().ok_or_else(|| {
                    MachineError::InvalidConfig(
                        "shared flash drive requires an image file".to_owned(),
                    )
                })?;
                HostBuffer::map_shared(path, drive.length as usize)?
            } else {
                Self::build_image_buffer(drive.length, drive.image_filename.as_deref(), drive.start)?
            };
            let _ = map.register_ram(drive.start, drive.length, buffer)?;
        }

        if config.dhd.tlength > 0 {
            let buffer = Self::build_image_buffer(
                config.dhd.tlength,
                config.dhd.image_filename.as_deref(),
                config.dhd.tstart,
            )?;
            let _ = map.register_ram(config.dhd.tstart, config.dhd.tlength, buffer)?;
        }

        if let Some(rollup) = &config.rollup {
            for range in [
                &rollup.rx_buffer,
                &rollup.tx_buffer,
                &rollup.input_metadata,
                &rollup.voucher_hashes,
                &rollup.notice_hashes,
            ] {
                if range.length == 0 {
                    continue;
                }
                let buffer = Self::build_image_buffer(
                    range.length,
                    range.image_filename.as_deref(),
                    range.start,
                )?;
                let _ = map.register_ram(range.start, range.length, buffer)?;
            }
        }

        let mut state = ProcessorState::from_config(&config.processor);
        state.clint_mtimecmp = config.clint.mtimecmp;
        state.htif_tohost = config.htif.tohost;
        state.htif_fromhost = config.htif.fromhost;
        state.htif_ihalt = devices::htif::ihalt_from_config();
        state.htif_iconsole = devices::htif::iconsole_from_config(&config.htif);
        state.htif_iyield = devices::htif::iyield_from_config(&config.htif);
        state.dhd_tstart = config.dhd.tstart;
        state.dhd_tlength = config.dhd.tlength;
        state.dhd_dlength = config.dhd.dlength;
        state.dhd_hlength = config.dhd.hlength;
        state.dhd_h = config.dhd.h;

        Ok(Self {
            state,
            map,
            tlb: TlbSet::default(),
            tree: MerkleTree::new(),
            log: None,
            console: Vec::new(),
            config,
        })
    }

    /// Reloads a machine previously persisted with [`Machine::store`].
    ///
    /// # Errors
    ///
    /// Fails if the directory or any range file cannot be read, or if the
    /// persisted configuration is malformed.
    pub fn load(dir: &Path) -> Result<Self, MachineError> {
        let file = fs::File::open(dir.join(CONFIG_FILE))?;
        let config: MachineConfig = serde_json::from_reader(file)?;
        Self::new(config)
    }

    /// Persists the machine into `dir`: the live configuration as JSON plus
    /// one binary file per backed memory range.
    ///
    /// # Errors
    ///
    /// Fails on any I/O error; a partially written directory may remain,
    /// but the machine itself is never modified.
    pub fn store(&self, dir: &Path) -> Result<(), MachineError> {
        fs::create_dir_all(dir)?;
        let mut config = self.serialization_config();

        let patch = |start: u64| -> Result<Option<PathBuf>, MachineError> {
            let Some(idx) = self.map.find(start) else {
                return Ok(None);
            };
            let range = self.map.range(idx);
            let Backing::Ram { buffer, .. } = &range.backing else {
                return Ok(None);
            };
            let name = format!("{:016x}-{:016x}.bin", range.start(), range.length());
            let path = dir.join(name);
            fs::write(&path, buffer.slice(0, buffer.len()))?;
            Ok(Some(path))
        };

        config.rom.image_filename = patch(layout::ROM_START)?;
        config.ram.image_filename = patch(layout::RAM_START)?;
        for drive in &mut config.flash_drive {
            drive.image_filename = patch(drive.start)?;
            drive.shared = false;
        }
        if config.dhd.tlength > 0 {
            config.dhd.image_filename = patch(config.dhd.tstart)?;
        }
        if let Some(rollup) = &mut config.rollup {
            for range in [
                &mut rollup.rx_buffer,
                &mut rollup.tx_buffer,
                &mut rollup.input_metadata,
                &mut rollup.voucher_hashes,
                &mut rollup.notice_hashes,
            ] {
                if range.length > 0 {
                    range.image_filename = patch(range.start)?;
                }
            }
        }

        let file = fs::File::create(dir.join(CONFIG_FILE))?;
        serde_json::to_writer_pretty(file, &config)?;
        Ok(())
    }

    /// Captures the machine's current state as a configuration that
    /// reconstructs it (modulo range images, which `store` adds).
    pub fn serialization_config(&self) -> MachineConfig {
        MachineConfig {
            processor: self.state.to_config(),
            ram: RamConfig {
                length: self.config.ram.length,
                image_filename: None,
            },
            rom: RomConfig {
                bootargs: self.config.rom.bootargs.clone(),
                image_filename: None,
            },
            flash_drive: self
                .config
                .flash_drive
                .iter()
                .map(|d| FlashDriveConfig {
                    start: d.start,
                    length: d.length,
                    image_filename: None,
                    shared: d.shared,
                })
                .collect(),
            clint: ClintConfig {
                mtimecmp: self.state.clint_mtimecmp,
            },
            htif: HtifConfig {
                tohost: self.state.htif_tohost,
                fromhost: self.state.htif_fromhost,
                console_getchar: devices::htif::config_console_getchar(&self.state),
                yield_manual: devices::htif::config_yield_manual(&self.state),
                yield_automatic: devices::htif::config_yield_automatic(&self.state),
            },
            dhd: DhdConfig {
                tstart: self.state.dhd_tstart,
                tlength: self.state.dhd_tlength,
                dlength: self.state.dhd_dlength,
                hlength: self.state.dhd_hlength,
                image_filename: None,
                h: self.state.dhd_h,
            },
            rollup: self.config.rollup.as_ref().map(|r| {
                let strip = |m: &MemoryRangeConfig| MemoryRangeConfig {
                    start: m.start,
                    length: m.length,
                    image_filename: None,
                };
                crate::config::RollupConfig {
                    rx_buffer: strip(&r.rx_buffer),
                    tx_buffer: strip(&r.tx_buffer),
                    input_metadata: strip(&r.input_metadata),
                    voucher_hashes: strip(&r.voucher_hashes),
                    notice_hashes: strip(&r.notice_hashes),
                }
            }),
        }
    }

    /// Brings the Merkle tree up to date with the committed state.
    ///
    /// The write TLB is flushed first, so no cached translation can write a
    /// page behind the freshly cleared dirty bits.
    pub fn update_merkle_tree(&mut self) {
        self.tlb.write.flush();
        let mut scratch = [0u8; PAGE_SIZE as usize];
        let Self { map, tree, state, .. } = self;
        for idx in 0..map.len() {
            let range = map.range(idx);
            match &range.backing {
                Backing::Ram { buffer, dirty } => {
                    for page in dirty.dirty_pages() {
                        let offset = (page << PAGE_SHIFT) as usize;
                        let data = buffer.slice(offset, PAGE_SIZE as usize);
                        tree.update_page(range.start() + (page << PAGE_SHIFT), Some(data));
                    }
                }
                Backing::Device { device, .. } => {
                    for page in 0..(range.length() >> PAGE_SHIFT) {
                        let filled = devices::peek_page(*device, state, page, &mut scratch);
                        let address = range.start() + (page << PAGE_SHIFT);
                        tree.update_page(address, filled.then_some(&scratch[..]));
                    }
                }
            }
        }
        for idx in 0..self.map.len() {
            if let Backing::Ram { dirty, .. } = &mut self.map.range_mut(idx).backing {
                dirty.clear();
            }
        }
    }

    /// Returns the root hash of the committed state, updating the tree
    /// first.
    pub fn get_root_hash(&mut self) -> Hash {
        self.update_merkle_tree();
        self.tree.root_hash()
    }

    /// Produces a proof for the aligned region of `1 << log2_size` bytes at
    /// `address`, updating the tree first.
    ///
    /// # Errors
    ///
    /// Fails on an unaligned address or an out-of-range size.
    pub fn get_proof(&mut self, address: u64, log2_size: u32) -> Result<Proof, MachineError> {
        self.update_merkle_tree();
        let page_data = if log2_size < LOG2_PAGE_SIZE {
            self.read_page_data(address & !PAGE_MASK)
        } else {
            None
        };
        self.tree.get_proof(address, log2_size, page_data.as_deref())
    }

    /// Executes one logged instruction (or interrupt delivery) and returns
    /// the access log.
    ///
    /// The tree is brought up to date first so every recorded proof chains
    /// from the machine's root hash before the step.
    ///
    /// # Errors
    ///
    /// Fails only if log collection is interrupted by an internal error;
    /// the architectural state is still advanced deterministically.
    pub fn step(&mut self, log_type: LogType) -> Result<AccessLog, MachineError> {
        self.update_merkle_tree();
        self.log = Some(AccessLog::new(log_type));
        self.bracket_begin("step");
        if !self.state.iflags_h && !self.state.iflags_y {
            if self.state.iflags_i {
                // Parked: time passes, nothing retires.
                let mcycle = self.read_mcycle();
                self.write_mcycle(mcycle + 1);
            } else {
                self.run_one();
            }
        }
        self.bracket_end("step");
        self.log.take().ok_or(MachineError::NoAccessLog)
    }

    /// Runs the interpreter until the cycle budget `mcycle_end` is reached
    /// or the guest halts or yields.
    pub fn run(&mut self, mcycle_end: u64) -> BreakReason {
        loop {
            if self.state.iflags_h {
                return BreakReason::Halted;
            }
            if self.state.iflags_y {
                return BreakReason::Yielded;
            }
            if self.state.mcycle >= mcycle_end {
                return BreakReason::ReachedTargetMcycle;
            }
            if self.state.iflags_i {
                self.poll_timer_interrupt();
                if self.state.mip & self.state.mie != 0 {
                    self.state.iflags_i = false;
                    continue;
                }
                // Fast-forward idle time to the next timer event, if any.
                let wake = if self.state.mie & crate::state::csr::MIP_MTIP != 0 {
                    self.state
                        .clint_mtimecmp
                        .saturating_mul(crate::common::constants::RTC_FREQ_DIV)
                } else {
                    u64::MAX
                };
                self.state.mcycle = if wake > self.state.mcycle {
                    wake.min(mcycle_end)
                } else {
                    mcycle_end
                };
                continue;
            }
            self.run_one();
        }
    }

    /// Raises bits of `mip` from the host, waking a parked machine when the
    /// result is enabled.
    pub fn set_mip(&mut self, mask: u64) {
        self.state.mip |= mask;
        if self.state.iflags_i && self.state.mip & self.state.mie != 0 {
            self.state.iflags_i = false;
        }
    }

    /// Clears bits of `mip` from the host.
    pub fn reset_mip(&mut self, mask: u64) {
        self.state.mip &= !mask;
    }

    /// Clears the yield flag so the guest can be resumed.
    pub fn reset_iflags_y(&mut self) {
        self.state.iflags_y = false;
    }

    /// Drains and returns the bytes the guest wrote to the HTIF console.
    pub fn console_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.console)
    }

    /// Reads one committed word from the physical address space without
    /// side effects. Returns `None` outside any range.
    pub fn read_word(&self, paddr: u64) -> Option<u64> {
        if paddr & (crate::common::constants::WORD_SIZE - 1) != 0 {
            return None;
        }
        let page = self.read_page_data(paddr & !PAGE_MASK)?;
        let offset = (paddr & PAGE_MASK) as usize;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&page[offset..offset + 8]);
        Some(u64::from_le_bytes(bytes))
    }

    /// Copies bytes out of a ram-kind range.
    ///
    /// # Errors
    ///
    /// Fails when the window is not contained in a single ram range.
    pub fn read_memory(&self, paddr: u64, out: &mut [u8]) -> Result<(), MachineError> {
        let (idx, offset) = self.ram_window(paddr, out.len() as u64)?;
        if let Backing::Ram { buffer, .. } = &self.map.range(idx).backing {
            out.copy_from_slice(buffer.slice(offset as usize, out.len()));
        }
        Ok(())
    }

    /// Copies bytes into a ram-kind range, marking the touched pages dirty
    /// and invalidating any write-TLB entries over them.
    ///
    /// # Errors
    ///
    /// Fails when the window is not contained in a single ram range.
    pub fn write_memory(&mut self, paddr: u64, data: &[u8]) -> Result<(), MachineError> {
        let (idx, offset) = self.ram_window(paddr, data.len() as u64)?;
        if let Backing::Ram { buffer, dirty } = &mut self.map.range_mut(idx).backing {
            buffer.write_slice(offset as usize, data);
            let first_page = offset >> PAGE_SHIFT;
            let last_page = (offset + data.len() as u64 - 1) >> PAGE_SHIFT;
            for page in first_page..=last_page {
                dirty.mark(page << PAGE_SHIFT);
            }
            let host_start = buffer.as_ptr() as usize + offset as usize;
            self.tlb.write.flush_host_range(host_start, data.len());
        }
        Ok(())
    }

    fn ram_window(&self, paddr: u64, len: u64) -> Result<(usize, u64), MachineError> {
        let idx = self.map.find(paddr).ok_or(MachineError::InvalidRange {
            start: paddr,
            length: len,
            reason: "no memory range at address",
        })?;
        let range = self.map.range(idx);
        if !range.is_ram() || paddr + len > range.start() + range.length() {
            return Err(MachineError::InvalidRange {
                start: paddr,
                length: len,
                reason: "window does not fit inside a ram range",
            });
        }
        Ok((idx, paddr - range.start()))
    }

    /// Assembles the current content of the page at `page_addr` for hashing
    /// and proofs. Returns `None` for pages with no committed content.
    pub(crate) fn read_page_data(&self, page_addr: u64) -> Option<Vec<u8>> {
        let idx = self.map.find(page_addr)?;
        let range = self.map.range(idx);
        let page_index = (page_addr - range.start()) >> PAGE_SHIFT;
        match &range.backing {
            Backing::Ram { .. } => range
                .peek_page(page_index)
                .map(<[u8]>::to_vec),
            Backing::Device { device, .. } => {
                let mut scratch = vec![0u8; PAGE_SIZE as usize];
                devices::peek_page(*device, &self.state, page_index, &mut scratch)
                    .then_some(scratch)
            }
        }
    }

    fn build_rom(rom: &RomConfig) -> Result<HostBuffer, MachineError> {
        let mut buffer =
            Self::build_image_buffer(layout::ROM_LENGTH, rom.image_filename.as_deref(), layout::ROM_START)?;
        if let Some(bootargs) = &rom.bootargs {
            let bytes = bootargs.as_bytes();
            let capacity = (layout::ROM_LENGTH - layout::ROM_BOOTARGS_OFFSET) as usize - 1;
            if bytes.len() > capacity {
                return Err(MachineError::InvalidConfig(format!(
                    "bootargs longer than {capacity} bytes"
                )));
            }
            buffer.write_slice(layout::ROM_BOOTARGS_OFFSET as usize, bytes);
        }
        Ok(buffer)
    }

    fn build_image_buffer(
        length: u64,
        image: Option<&Path>,
        start: u64,
    ) -> Result<HostBuffer, MachineError> {
        let mut buffer = HostBuffer::new(length as usize)?;
        if let Some(path) = image {
            let mut file = fs::File::open(path)?;
            let image_size = file.metadata()?.len();
            if image_size > length {
                return Err(MachineError::ImageTooLarge {
                    path: path.to_owned(),
                    image_size,
                    start,
                    length,
                });
            }
            let mut contents = Vec::with_capacity(image_size as usize);
            let _ = file.read_to_end(&mut contents)?;
            buffer.write_slice(0, &contents);
        }
        Ok(buffer)
    }

    // ── access-log plumbing shared by the logged accessors ──

    pub(crate) fn log_active(&self) -> bool {
        self.log.is_some()
    }

    pub(crate) fn bracket_begin(&mut self, text: &str) {
        if let Some(log) = &mut self.log {
            log.begin_bracket(text);
        }
    }

    pub(crate) fn bracket_end(&mut self, text: &str) {
        if let Some(log) = &mut self.log {
            log.end_bracket(text);
        }
    }

    /// Proof of the word at `paddr` against the current (up-to-date) tree.
    fn word_proof(&self, paddr: u64) -> Option<Proof> {
        let page_data = self.read_page_data(paddr & !PAGE_MASK);
        match self.tree.get_proof(paddr, LOG2_WORD_SIZE, page_data.as_deref()) {
            Ok(proof) => Some(proof),
            Err(err) => {
                tracing::error!(paddr, %err, "word proof generation failed");
                None
            }
        }
    }

    /// Records a word read at `paddr`.
    pub(crate) fn log_read(&mut self, paddr: u64, val: u64, text: &str) {
        let Some(log) = &self.log else { return };
        let want_proof = log.log_type.proofs;
        let proof = if want_proof { self.word_proof(paddr) } else { None };
        if let Some(log) = &mut self.log {
            log.push_note(text);
            log.push_access(crate::log::Access {
                kind: crate::log::AccessKind::Read,
                address: paddr,
                log2_size: LOG2_WORD_SIZE,
                read: val.to_le_bytes().to_vec(),
                written: None,
                proof,
            });
        }
    }

    /// Records a word write at `paddr`; call before mutating the state,
    /// then call [`Machine::log_write_post`] after.
    pub(crate) fn log_write_pre(&mut self, paddr: u64, old: u64, new: u64, text: &str) {
        let Some(log) = &self.log else { return };
        let want_proof = log.log_type.proofs;
        let proof = if want_proof { self.word_proof(paddr) } else { None };
        if let Some(log) = &mut self.log {
            log.push_note(text);
            log.push_access(crate::log::Access {
                kind: crate::log::AccessKind::Write,
                address: paddr,
                log2_size: LOG2_WORD_SIZE,
                read: old.to_le_bytes().to_vec(),
                written: Some(new.to_le_bytes().to_vec()),
                proof,
            });
        }
    }

    /// Folds a just-performed word write into the tree so the next logged
    /// access chains from the post-write root.
    pub(crate) fn log_write_post(&mut self, paddr: u64) {
        if self.log.is_none() {
            return;
        }
        let page_addr = paddr & !PAGE_MASK;
        let page_data = self.read_page_data(page_addr);
        self.tree.update_page(page_addr, page_data.as_deref());
    }
}
