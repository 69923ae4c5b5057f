//! Merkle tree state commitment.
//!
//! This module commits the machine's 2^64-byte physical address space to a
//! single Keccak-256 root hash. It provides:
//! 1. **Hashing:** Leaf hashes over 8-byte words and node hashes over child pairs.
//! 2. **Pristine Subtrees:** Precomputed hashes for all-zero regions of every size.
//! 3. **Sparse Storage:** Only non-pristine nodes at or above page level are stored;
//!    hashes inside a page are recomputed from the page bytes on demand.
//! 4. **Incremental Update:** `update_page` rehashes one page and the path to the root.
//! 5. **Proofs:** Sibling-hash proofs for any aligned power-of-two region.

/// Sibling-hash proofs and their verification.
pub mod proof;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::common::error::MachineError;
use crate::common::hex;

pub use proof::Proof;

/// Log2 of the leaf (word) size in bytes.
pub const LOG2_WORD_SIZE: u32 = 3;

/// Log2 of the page size in bytes.
pub const LOG2_PAGE_SIZE: u32 = 12;

/// Log2 of the committed address space size in bytes.
pub const LOG2_ROOT_SIZE: u32 = 64;

/// A 32-byte Keccak-256 hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// Borrows the raw hash bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash({})", hex::encode(&self.0))
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl Serialize for Hash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error as _;
        let bytes = hex::deserialize(deserializer)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| D::Error::custom(format!("expected 32 bytes, got {}", b.len())))?;
        Ok(Self(arr))
    }
}

/// Hashes an arbitrary byte string with Keccak-256.
pub fn keccak(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    Hash(hasher.finalize().into())
}

/// Hashes an internal node from its two children.
pub fn merge(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(left.0);
    hasher.update(right.0);
    Hash(hasher.finalize().into())
}

/// Hashes an aligned span of `1 << log2_size` bytes as a subtree.
///
/// A word-sized span hashes its 8 bytes directly; larger spans merge the
/// hashes of their halves.
pub fn hash_span(data: &[u8], log2_size: u32) -> Hash {
    debug_assert_eq!(data.len(), 1usize << log2_size);
    if log2_size == LOG2_WORD_SIZE {
        keccak(data)
    } else {
        let half = data.len() / 2;
        merge(
            &hash_span(&data[..half], log2_size - 1),
            &hash_span(&data[half..], log2_size - 1),
        )
    }
}

/// The sparse Merkle tree over the machine's physical address space.
///
/// Nodes at or above page level that differ from the pristine hash of their
/// size are stored in a map keyed by `(log2_size, address >> log2_size)`.
/// Everything absent is pristine, so a freshly created tree commits an
/// all-zero address space.
pub struct MerkleTree {
    nodes: HashMap<(u32, u64), Hash>,
    pristine: Vec<Hash>,
}

impl std::fmt::Debug for MerkleTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MerkleTree")
            .field("stored_nodes", &self.nodes.len())
            .finish()
    }
}

impl Default for MerkleTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MerkleTree {
    /// Creates a tree committing an all-zero address space.
    pub fn new() -> Self {
        let mut pristine = vec![Hash([0; 32]); (LOG2_ROOT_SIZE + 1) as usize];
        pristine[LOG2_WORD_SIZE as usize] = keccak(&[0u8; 8]);
        for log2 in (LOG2_WORD_SIZE + 1)..=LOG2_ROOT_SIZE {
            let child = pristine[(log2 - 1) as usize];
            pristine[log2 as usize] = merge(&child, &child);
        }
        Self {
            nodes: HashMap::new(),
            pristine,
        }
    }

    /// Returns the hash of a pristine (all-zero) subtree of the given size.
    pub fn pristine_hash(&self, log2_size: u32) -> Hash {
        self.pristine[log2_size as usize]
    }

    /// Returns the current root hash.
    pub fn root_hash(&self) -> Hash {
        self.node(LOG2_ROOT_SIZE, 0)
    }

    fn node(&self, log2_size: u32, index: u64) -> Hash {
        self.nodes
            .get(&(log2_size, index))
            .copied()
            .unwrap_or(self.pristine[log2_size as usize])
    }

    /// Rehashes the page at `page_address` from `data` (or back to pristine
    /// when `data` is `None`) and updates the path to the root.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if `page_address` is not page-aligned or
    /// `data` is not exactly one page.
    pub fn update_page(&mut self, page_address: u64, data: Option<&[u8]>) {
        debug_assert_eq!(page_address & ((1 << LOG2_PAGE_SIZE) - 1), 0);
        let page_hash = match data {
            Some(bytes) => hash_span(bytes, LOG2_PAGE_SIZE),
            None => self.pristine[LOG2_PAGE_SIZE as usize],
        };
        let mut index = page_address >> LOG2_PAGE_SIZE;
        self.set_node(LOG2_PAGE_SIZE, index, page_hash);
        for log2 in (LOG2_PAGE_SIZE + 1)..=LOG2_ROOT_SIZE {
            index >>= 1;
            let left = self.node(log2 - 1, index * 2);
            let right = self.node(log2 - 1, index * 2 + 1);
            let pristine_child = self.pristine[(log2 - 1) as usize];
            if left == pristine_child && right == pristine_child {
                let _ = self.nodes.remove(&(log2, index));
            } else {
                self.set_node(log2, index, merge(&left, &right));
            }
        }
    }

    fn set_node(&mut self, log2_size: u32, index: u64, hash: Hash) {
        if hash == self.pristine[log2_size as usize] {
            let _ = self.nodes.remove(&(log2_size, index));
        } else {
            let _ = self.nodes.insert((log2_size, index), hash);
        }
    }

    /// Produces a sibling-hash proof for the aligned region of
    /// `1 << log2_size` bytes at `address`.
    ///
    /// `page_data` must be the current content of the page containing
    /// `address` when the target is smaller than a page (pass `None` for a
    /// pristine page). Sibling hashes inside that page are recomputed from
    /// the bytes; siblings at or above page level come from the stored
    /// nodes. The caller is responsible for the tree being up to date.
    ///
    /// # Errors
    ///
    /// Fails when `log2_size` is out of range or `address` is not aligned.
    pub fn get_proof(
        &self,
        address: u64,
        log2_size: u32,
        page_data: Option<&[u8]>,
    ) -> Result<Proof, MachineError> {
        if !(LOG2_WORD_SIZE..=LOG2_ROOT_SIZE).contains(&log2_size) {
            return Err(MachineError::InvalidLog2Size {
                log2_size,
                min: LOG2_WORD_SIZE,
                max: LOG2_ROOT_SIZE,
            });
        }
        if log2_size < 64 && address & ((1u64 << log2_size) - 1) != 0 {
            return Err(MachineError::UnalignedAddress { address, log2_size });
        }

        let target_hash = self.subtree_hash(address, log2_size, page_data);
        let mut sibling_hashes = vec![Hash([0; 32]); (LOG2_ROOT_SIZE - log2_size) as usize];
        for log2 in log2_size..LOG2_ROOT_SIZE {
            let sibling_address = address ^ (1u64 << log2);
            let sibling = self.subtree_hash(sibling_address, log2, page_data);
            sibling_hashes[(LOG2_ROOT_SIZE - 1 - log2) as usize] = sibling;
        }

        Ok(Proof {
            target_address: address,
            log2_target_size: log2_size,
            log2_root_size: LOG2_ROOT_SIZE,
            target_hash,
            root_hash: self.root_hash(),
            sibling_hashes,
        })
    }

    /// Hash of the subtree of `1 << log2_size` bytes at `address`.
    ///
    /// Below page level the hash is recomputed from `page_data` when the
    /// subtree lies inside the page the data describes; any other in-page
    /// region is pristine.
    fn subtree_hash(&self, address: u64, log2_size: u32, page_data: Option<&[u8]>) -> Hash {
        if log2_size >= LOG2_PAGE_SIZE {
            return self.node(log2_size, address >> log2_size);
        }
        let Some(data) = page_data else {
            return self.pristine[log2_size as usize];
        };
        let page_mask = (1u64 << LOG2_PAGE_SIZE) - 1;
        let offset = (address & page_mask) as usize;
        let size = 1usize << log2_size;
        hash_span(&data[offset..offset + size], log2_size)
    }
}
