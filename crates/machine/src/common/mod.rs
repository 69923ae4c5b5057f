//! Common utilities and types used throughout the machine emulator.
//!
//! This module provides fundamental building blocks that are shared across all
//! components of the emulator. It includes:
//! 1. **Address Types:** Strong types for virtual and physical addresses.
//! 2. **Constants:** System-wide constants for memory geometry and the physical memory layout.
//! 3. **Memory Access:** Definitions for categorizing memory operations (Fetch/Read/Write).
//! 4. **Error Handling:** The structured error hierarchy for construction, invariant and I/O failures.
//! 5. **Hex Encoding:** Serde helpers for the hex-encoded wire format of hashes and data.

/// Address type definitions (physical and virtual addresses).
pub mod addr;

/// Common constants used throughout the emulator.
pub mod constants;

/// Memory access type definitions.
pub mod data;

/// Error types for construction, invariant violations, and I/O.
pub mod error;

/// Serde helpers for hex-encoded byte strings.
pub mod hex;

pub use addr::{PhysAddr, VirtAddr};
pub use constants::{PAGE_MASK, PAGE_SHIFT, PAGE_SIZE};
pub use data::AccessType;
pub use error::MachineError;
