//! State-transition verification.
//!
//! Replays a frozen access log against a claimed before/after root pair
//! without any access to the machine that produced it. A synthetic state
//! answers every read from the log's own data; each record's proof must
//! chain the pre-access contents to the current working root, and each
//! write advances the working root by substituting the written data into
//! the same proof. The first inconsistent record is reported by index.

use thiserror::Error;

use crate::log::{Access, AccessKind, AccessLog};
use crate::tree::{Hash, LOG2_WORD_SIZE, hash_span};

/// Why a record failed verification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyFailure {
    /// The record carries no proof.
    MissingProof,
    /// The proof's declared shape is malformed or does not match the
    /// record's address and size.
    MalformedProof,
    /// The record's data length does not match its declared size.
    MalformedData,
    /// The proof's target hash does not hash the record's read data.
    ReadHashMismatch,
    /// The proof does not chain its target to its own root.
    InconsistentProof,
    /// The proof's root does not match the working root at this point of
    /// the replay.
    RootMismatch,
    /// A write record carries no written data.
    MissingWrittenData,
    /// The final working root does not match the claimed after-root.
    FinalRootMismatch,
}

impl std::fmt::Display for VerifyFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::MissingProof => "access has no proof",
            Self::MalformedProof => "proof shape does not match the access",
            Self::MalformedData => "access data does not match its size",
            Self::ReadHashMismatch => "read data does not match the proof's target hash",
            Self::InconsistentProof => "proof does not chain to its own root",
            Self::RootMismatch => "proof root does not match the working root",
            Self::MissingWrittenData => "write access has no written data",
            Self::FinalRootMismatch => "final root does not match the claimed after-root",
        };
        f.write_str(text)
    }
}

/// A failed verification, pinpointing the offending record.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("access {index}: {failure}")]
pub struct VerifyError {
    /// Index of the offending record (one past the last record for a final
    /// root mismatch), using the configured base.
    pub index: usize,
    /// What was wrong with it.
    pub failure: VerifyFailure,
}

fn fail(index: usize, one_based: bool, failure: VerifyFailure) -> VerifyError {
    VerifyError {
        index: index + usize::from(one_based),
        failure,
    }
}

fn check_access(access: &Access, working_root: &Hash) -> Result<Option<Hash>, VerifyFailure> {
    let proof = access.proof.as_ref().ok_or(VerifyFailure::MissingProof)?;
    if !proof.shape_is_valid()
        || proof.target_address != access.address
        || proof.log2_target_size != access.log2_size
    {
        return Err(VerifyFailure::MalformedProof);
    }
    if access.log2_size < LOG2_WORD_SIZE
        || access.read.len() != 1usize << access.log2_size
    {
        return Err(VerifyFailure::MalformedData);
    }
    let read_hash = hash_span(&access.read, access.log2_size);
    if read_hash != proof.target_hash {
        return Err(VerifyFailure::ReadHashMismatch);
    }
    if proof.reconstruct_root(&proof.target_hash) != proof.root_hash {
        return Err(VerifyFailure::InconsistentProof);
    }
    if proof.root_hash != *working_root {
        return Err(VerifyFailure::RootMismatch);
    }
    match access.kind {
        AccessKind::Read => Ok(None),
        AccessKind::Write => {
            let written = access
                .written
                .as_ref()
                .ok_or(VerifyFailure::MissingWrittenData)?;
            if written.len() != 1usize << access.log2_size {
                return Err(VerifyFailure::MalformedData);
            }
            let written_hash = hash_span(written, access.log2_size);
            Ok(Some(proof.reconstruct_root(&written_hash)))
        }
    }
}

/// Verifies that `log` transforms a state with root `root_before` into a
/// state with root `root_after`.
///
/// # Errors
///
/// Returns the first offending record (indexing per `one_based`) with the
/// reason it failed. A final-root mismatch reports the index one past the
/// last record.
pub fn verify_state_transition(
    root_before: &Hash,
    log: &AccessLog,
    root_after: &Hash,
    one_based: bool,
) -> Result<(), VerifyError> {
    let mut working_root = *root_before;
    for (index, access) in log.accesses.iter().enumerate() {
        match check_access(access, &working_root) {
            Ok(Some(new_root)) => working_root = new_root,
            Ok(None) => {}
            Err(failure) => return Err(fail(index, one_based, failure)),
        }
    }
    if working_root != *root_after {
        return Err(fail(
            log.accesses.len(),
            one_based,
            VerifyFailure::FinalRootMismatch,
        ));
    }
    Ok(())
}
