//! Error types for machine construction, invariant violations, and I/O.
//!
//! Architectural traps are deliberately *not* represented here: they are part
//! of the simulated machine's behaviour, staged through
//! `pending_exception`/`pending_tval` and surfaced purely through CSR state
//! and the program counter. The variants below cover the remaining error
//! kinds: configuration mistakes that fail construction, invariant
//! violations (such as proving an unaligned region), and host I/O failures
//! at the persistence boundary.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the machine's fallible host-facing operations.
#[derive(Debug, Error)]
pub enum MachineError {
    /// A memory range is malformed (length not a power of two, not a page
    /// multiple, or base not aligned to the length).
    #[error("invalid memory range [{start:#x}, +{length:#x}): {reason}")]
    InvalidRange {
        /// Base physical address of the offending range.
        start: u64,
        /// Length of the offending range in bytes.
        length: u64,
        /// Human-readable description of the violation.
        reason: &'static str,
    },

    /// A memory range overlaps a previously registered range.
    #[error("memory range [{start:#x}, +{length:#x}) overlaps an existing range")]
    RangeOverlap {
        /// Base physical address of the offending range.
        start: u64,
        /// Length of the offending range in bytes.
        length: u64,
    },

    /// A configuration field is invalid for a reason other than range layout.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A backing image does not fit inside its memory range.
    #[error("image {path} is {image_size} bytes but range [{start:#x}, +{length:#x}) can only hold {length}")]
    ImageTooLarge {
        /// Path of the offending image file.
        path: PathBuf,
        /// Size of the image in bytes.
        image_size: u64,
        /// Base physical address of the target range.
        start: u64,
        /// Length of the target range in bytes.
        length: u64,
    },

    /// An address is not aligned to the requested power-of-two size.
    #[error("address {address:#x} is not aligned to a 2^{log2_size}-byte boundary")]
    UnalignedAddress {
        /// The offending address.
        address: u64,
        /// The log2 of the required alignment.
        log2_size: u32,
    },

    /// A proof or access size is outside the supported interval.
    #[error("log2_size {log2_size} is outside [{min}, {max}]")]
    InvalidLog2Size {
        /// The offending size.
        log2_size: u32,
        /// Smallest supported log2 size.
        min: u32,
        /// Largest supported log2 size.
        max: u32,
    },

    /// An operation that requires an open access log was issued without one,
    /// or vice versa.
    #[error("no access log is being collected")]
    NoAccessLog,

    /// A host I/O failure at the persistence boundary.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A persisted configuration could not be encoded or decoded.
    #[error("persisted configuration: {0}")]
    Persistence(#[from] serde_json::Error),
}
