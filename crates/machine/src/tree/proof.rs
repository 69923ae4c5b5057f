//! Sibling-hash proofs.
//!
//! A proof ties the hash of one aligned power-of-two region to the root
//! hash of the whole address space through the chain of sibling hashes on
//! the path between them. Proofs are self-contained: verification needs no
//! access to the tree that produced them.

use serde::{Deserialize, Serialize};

use super::{Hash, merge};

/// A proof that a target region's hash is consistent with a root hash.
///
/// `sibling_hashes[i]` is the sibling at level `log2_root_size - 1 - i`:
/// the topmost sibling first, the target's immediate sibling last.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    /// Address of the target region.
    pub target_address: u64,
    /// Log2 of the target region size.
    pub log2_target_size: u32,
    /// Log2 of the committed address space size.
    pub log2_root_size: u32,
    /// Hash of the target region's pre-access contents.
    pub target_hash: Hash,
    /// Root hash the proof chains up to.
    pub root_hash: Hash,
    /// Sibling hashes from just below the root down to the target level.
    pub sibling_hashes: Vec<Hash>,
}

impl Proof {
    /// Borrows the sibling hash at tree level `log2_size`.
    ///
    /// # Panics
    ///
    /// Panics if `log2_size` is outside `[log2_target_size, log2_root_size)`.
    pub fn sibling_at(&self, log2_size: u32) -> &Hash {
        assert!((self.log2_target_size..self.log2_root_size).contains(&log2_size));
        &self.sibling_hashes[(self.log2_root_size - 1 - log2_size) as usize]
    }

    /// Recomputes the root hash that results from placing `target_hash` at
    /// the target position, using the proof's sibling chain.
    pub fn reconstruct_root(&self, target_hash: &Hash) -> Hash {
        let mut hash = *target_hash;
        for log2 in self.log2_target_size..self.log2_root_size {
            let sibling = self.sibling_at(log2);
            hash = if (self.target_address >> log2) & 1 != 0 {
                merge(sibling, &hash)
            } else {
                merge(&hash, sibling)
            };
        }
        hash
    }

    /// Returns whether the stored target hash chains up to the stored root.
    pub fn verify(&self) -> bool {
        self.shape_is_valid() && self.reconstruct_root(&self.target_hash) == self.root_hash
    }

    /// Returns whether the declared sizes and sibling count are coherent.
    pub fn shape_is_valid(&self) -> bool {
        self.log2_target_size < self.log2_root_size
            && self.log2_root_size <= super::LOG2_ROOT_SIZE
            && self.log2_target_size >= super::LOG2_WORD_SIZE
            && self.sibling_hashes.len()
                == (self.log2_root_size - self.log2_target_size) as usize
            && (self.log2_target_size >= 64
                || self.target_address & ((1u64 << self.log2_target_size) - 1) == 0)
    }
}
