//! Access logs.
//!
//! This module defines the record of everything a logged step touches:
//! 1. **Accesses:** Word-granularity reads and writes with pre-access data
//!    and optional sibling-hash proofs.
//! 2. **Brackets:** Begin/end annotations delimiting the records of one
//!    logical operation; brackets nest.
//! 3. **Notes:** Free-form annotations tied to a position in the sequence.
//! 4. **Wire Format:** The whole log round-trips through serde as JSON with
//!    hex-encoded data and hashes.

use serde::{Deserialize, Serialize};

use crate::common::hex;
use crate::tree::Proof;

/// Whether an access read or wrote the target region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessKind {
    /// The region was read.
    Read,
    /// The region was overwritten.
    Write,
}

/// One logged access.
///
/// `read` always holds the region's pre-access contents; for writes,
/// `written` holds the post-access contents. The proof, when present,
/// commits the pre-access contents against the root hash in effect just
/// before the access.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Access {
    /// Read or write.
    #[serde(rename = "type")]
    pub kind: AccessKind,
    /// Physical address of the accessed region.
    pub address: u64,
    /// Log2 of the region size in bytes.
    pub log2_size: u32,
    /// Pre-access contents (`1 << log2_size` bytes).
    #[serde(with = "hex")]
    pub read: Vec<u8>,
    /// Post-access contents for writes.
    #[serde(with = "hex::opt", default, skip_serializing_if = "Option::is_none")]
    pub written: Option<Vec<u8>>,
    /// Proof of the pre-access contents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<Proof>,
}

/// Whether a bracket opens or closes an annotated region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BracketKind {
    /// Opens a region.
    Begin,
    /// Closes a region.
    End,
}

/// A begin/end annotation around a run of accesses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BracketNote {
    /// Begin or end.
    #[serde(rename = "type")]
    pub kind: BracketKind,
    /// One-based index of the access the bracket sits before.
    #[serde(rename = "where")]
    pub location: u64,
    /// Label for the bracketed operation.
    pub text: String,
}

/// A free-form annotation tied to a position in the access sequence.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Note {
    /// One-based index of the access the note sits before.
    #[serde(rename = "where")]
    pub location: u64,
    /// Annotation text.
    pub text: String,
}

/// What a log records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogType {
    /// Attach a sibling-hash proof to every access.
    pub proofs: bool,
    /// Record brackets and notes.
    pub annotations: bool,
}

impl LogType {
    /// A log type with both proofs and annotations enabled.
    pub fn full() -> Self {
        Self {
            proofs: true,
            annotations: true,
        }
    }
}

/// The ordered record of everything one logged step touched.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccessLog {
    /// What this log records.
    pub log_type: LogType,
    /// The access sequence, in retirement order.
    pub accesses: Vec<Access>,
    /// Bracket annotations (empty unless annotations are enabled).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub brackets: Vec<BracketNote>,
    /// Free-form notes (empty unless annotations are enabled).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<Note>,
}

impl AccessLog {
    /// Creates an empty log of the given type.
    pub fn new(log_type: LogType) -> Self {
        Self {
            log_type,
            accesses: Vec::new(),
            brackets: Vec::new(),
            notes: Vec::new(),
        }
    }

    /// Returns the number of recorded accesses.
    pub fn len(&self) -> usize {
        self.accesses.len()
    }

    /// Returns whether the log has no accesses.
    pub fn is_empty(&self) -> bool {
        self.accesses.is_empty()
    }

    /// Appends an access record.
    pub fn push_access(&mut self, access: Access) {
        self.accesses.push(access);
    }

    /// Opens a bracket before the next access.
    pub fn begin_bracket(&mut self, text: &str) {
        if self.log_type.annotations {
            self.brackets.push(BracketNote {
                kind: BracketKind::Begin,
                location: self.accesses.len() as u64 + 1,
                text: text.to_owned(),
            });
        }
    }

    /// Closes a bracket after the last access.
    pub fn end_bracket(&mut self, text: &str) {
        if self.log_type.annotations {
            self.brackets.push(BracketNote {
                kind: BracketKind::End,
                location: self.accesses.len() as u64 + 1,
                text: text.to_owned(),
            });
        }
    }

    /// Attaches a note before the next access.
    pub fn push_note(&mut self, text: &str) {
        if self.log_type.annotations {
            self.notes.push(Note {
                location: self.accesses.len() as u64 + 1,
                text: text.to_owned(),
            });
        }
    }
}
