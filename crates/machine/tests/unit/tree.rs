//! Merkle tree unit tests.
//!
//! Verifies pristine hashes, incremental page updates, proof generation
//! and verification, and the equivalence between rehashing a page and
//! substituting a single leaf through a proof.

use pretty_assertions::assert_eq;
use rvproof_machine::common::MachineError;
use rvproof_machine::tree::{LOG2_ROOT_SIZE, MerkleTree, hash_span};

const PAGE: usize = 4096;

fn page_with(offset: usize, bytes: &[u8]) -> Vec<u8> {
    let mut page = vec![0u8; PAGE];
    page[offset..offset + bytes.len()].copy_from_slice(bytes);
    page
}

#[test]
fn empty_tree_commits_the_pristine_space() {
    let tree = MerkleTree::new();
    assert_eq!(tree.root_hash(), tree.pristine_hash(LOG2_ROOT_SIZE));
}

#[test]
fn updating_a_zero_page_keeps_the_pristine_root() {
    let mut tree = MerkleTree::new();
    let pristine = tree.root_hash();
    tree.update_page(0x8000_0000, Some(&vec![0u8; PAGE]));
    assert_eq!(tree.root_hash(), pristine);
}

#[test]
fn updating_a_page_changes_the_root_and_zeroing_restores_it() {
    let mut tree = MerkleTree::new();
    let pristine = tree.root_hash();

    tree.update_page(0x8000_0000, Some(&page_with(0, &[1, 2, 3])));
    let dirty_root = tree.root_hash();
    assert_ne!(dirty_root, pristine);

    tree.update_page(0x8000_0000, None);
    assert_eq!(tree.root_hash(), pristine);
}

#[test]
fn distinct_contents_give_distinct_roots() {
    let mut a = MerkleTree::new();
    let mut b = MerkleTree::new();
    a.update_page(0x1000, Some(&page_with(8, &[0xAA])));
    b.update_page(0x1000, Some(&page_with(8, &[0xAB])));
    assert_ne!(a.root_hash(), b.root_hash());
}

#[test]
fn word_proof_verifies_and_chains_to_the_root() {
    let mut tree = MerkleTree::new();
    let page = page_with(0x18, &0xDEAD_BEEF_u64.to_le_bytes());
    tree.update_page(0x8000_0000, Some(&page));

    let proof = match tree.get_proof(0x8000_0018, 3, Some(&page)) {
        Ok(p) => p,
        Err(e) => panic!("proof failed: {e}"),
    };
    assert!(proof.verify());
    assert_eq!(proof.root_hash, tree.root_hash());
    assert_eq!(proof.target_hash, hash_span(&0xDEAD_BEEF_u64.to_le_bytes(), 3));
    assert_eq!(proof.sibling_hashes.len(), (LOG2_ROOT_SIZE - 3) as usize);
}

#[test]
fn proof_of_a_pristine_word_verifies() {
    let mut tree = MerkleTree::new();
    tree.update_page(0x8000_0000, Some(&page_with(0, &[7])));

    // A word nowhere near any update is still provable.
    let proof = match tree.get_proof(0x4000_0000_0000, 3, None) {
        Ok(p) => p,
        Err(e) => panic!("proof failed: {e}"),
    };
    assert!(proof.verify());
    assert_eq!(proof.target_hash, hash_span(&[0u8; 8], 3));
}

#[test]
fn page_level_proof_verifies() {
    let mut tree = MerkleTree::new();
    let page = page_with(100, &[9; 32]);
    tree.update_page(0x8000_0000, Some(&page));

    let proof = match tree.get_proof(0x8000_0000, 12, Some(&page)) {
        Ok(p) => p,
        Err(e) => panic!("proof failed: {e}"),
    };
    assert!(proof.verify());
    assert_eq!(proof.target_hash, hash_span(&page, 12));
}

#[test]
fn tampered_target_hash_fails_verification() {
    let mut tree = MerkleTree::new();
    let page = page_with(0, &[1]);
    tree.update_page(0, Some(&page));
    let mut proof = match tree.get_proof(0, 3, Some(&page)) {
        Ok(p) => p,
        Err(e) => panic!("proof failed: {e}"),
    };
    proof.target_hash.0[0] ^= 1;
    assert!(!proof.verify());
}

#[test]
fn unaligned_proof_request_is_an_invariant_violation() {
    let tree = MerkleTree::new();
    let err = tree.get_proof(0x8000_0004, 3, None);
    assert!(matches!(err, Err(MachineError::UnalignedAddress { .. })));
}

#[test]
fn out_of_range_log2_size_rejected() {
    let tree = MerkleTree::new();
    assert!(matches!(
        tree.get_proof(0, 2, None),
        Err(MachineError::InvalidLog2Size { .. })
    ));
    assert!(matches!(
        tree.get_proof(0, 65, None),
        Err(MachineError::InvalidLog2Size { .. })
    ));
}

#[test]
fn leaf_substitution_matches_page_rehash() {
    // Substituting one word through a proof must produce exactly the root
    // the tree computes after rehashing the modified page. This is the
    // property the write path of the access logger relies on.
    let mut tree = MerkleTree::new();
    let page = page_with(0x40, &[0x11; 8]);
    tree.update_page(0x8000_0000, Some(&page));

    let proof = match tree.get_proof(0x8000_0040, 3, Some(&page)) {
        Ok(p) => p,
        Err(e) => panic!("proof failed: {e}"),
    };
    let new_word = [0x22u8; 8];
    let substituted_root = proof.reconstruct_root(&hash_span(&new_word, 3));

    let new_page = page_with(0x40, &new_word);
    tree.update_page(0x8000_0000, Some(&new_page));
    assert_eq!(substituted_root, tree.root_hash());
}
