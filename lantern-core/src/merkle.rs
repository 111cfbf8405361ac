//! Simple Merkle tree over byte slices.
//!
//! The tree is the canonical one committed to by block headers: leaves are
//! prefixed with `0x00`, inner nodes with `0x01`, and an n-leaf tree splits
//! at the largest power of two strictly smaller than n. Roots are therefore
//! byte-identical for any implementation following the same layout.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::crypto::Hash;
use crate::error::{Error, Result};

const LEAF_PREFIX: u8 = 0x00;
const INNER_PREFIX: u8 = 0x01;

/// Hash a leaf with the canonical `0x00` domain prefix.
pub fn leaf_hash(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(data);
    Hash::from_bytes(hasher.finalize().into())
}

fn inner_hash(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([INNER_PREFIX]);
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Hash::from_bytes(hasher.finalize().into())
}

/// Largest power of two strictly less than `n`.
fn split_point(n: usize) -> usize {
    debug_assert!(n > 1);
    let mut k = 1;
    while k * 2 < n {
        k *= 2;
    }
    k
}

/// Compute the Merkle root of a list of byte slices.
pub fn root_from_byte_slices<T: AsRef<[u8]>>(items: &[T]) -> Hash {
    match items.len() {
        0 => Hash::from_bytes(Sha256::digest([]).into()),
        1 => leaf_hash(items[0].as_ref()),
        n => {
            let k = split_point(n);
            let left = root_from_byte_slices(&items[..k]);
            let right = root_from_byte_slices(&items[k..]);
            inner_hash(&left, &right)
        }
    }
}

/// A Merkle inclusion proof for a single leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    /// Total number of leaves in the tree.
    pub total: u64,
    /// Index of the proven leaf.
    pub index: u64,
    /// Hash of the proven leaf.
    pub leaf_hash: Hash,
    /// Sibling hashes from the leaf up to the root.
    pub aunts: Vec<Hash>,
}

impl Proof {
    /// Recompute the root this proof commits to.
    pub fn compute_root(&self) -> Result<Hash> {
        compute_from_aunts(self.index, self.total, self.leaf_hash, &self.aunts)
    }

    /// Verify this proof against an expected root and leaf content.
    pub fn verify<T: AsRef<[u8]>>(&self, root: &Hash, leaf: T) -> Result<()> {
        if self.leaf_hash != leaf_hash(leaf.as_ref()) {
            return Err(Error::invalid_proof("leaf hash mismatch"));
        }
        let computed = self.compute_root()?;
        if &computed != root {
            return Err(Error::invalid_proof(format!(
                "root mismatch: computed {}, expected {}",
                computed, root
            )));
        }
        Ok(())
    }
}

fn compute_from_aunts(index: u64, total: u64, leaf: Hash, aunts: &[Hash]) -> Result<Hash> {
    if index >= total || total == 0 {
        return Err(Error::invalid_proof("index out of range"));
    }
    match total {
        1 => {
            if !aunts.is_empty() {
                return Err(Error::invalid_proof("unexpected aunts for single leaf"));
            }
            Ok(leaf)
        }
        _ => {
            let (last, rest) = aunts
                .split_last()
                .ok_or_else(|| Error::invalid_proof("missing aunt"))?;
            let k = split_point(total as usize) as u64;
            if index < k {
                let left = compute_from_aunts(index, k, leaf, rest)?;
                Ok(inner_hash(&left, last))
            } else {
                let right = compute_from_aunts(index - k, total - k, leaf, rest)?;
                Ok(inner_hash(last, &right))
            }
        }
    }
}

/// Compute the root and an inclusion proof for every leaf.
pub fn proofs_from_byte_slices<T: AsRef<[u8]>>(items: &[T]) -> (Hash, Vec<Proof>) {
    let leaves: Vec<Hash> = items.iter().map(|i| leaf_hash(i.as_ref())).collect();
    let total = leaves.len() as u64;
    let mut proofs: Vec<Proof> = leaves
        .iter()
        .enumerate()
        .map(|(i, lh)| Proof {
            total,
            index: i as u64,
            leaf_hash: *lh,
            aunts: Vec::new(),
        })
        .collect();
    let root = build_aunts(&leaves, &mut proofs, 0);
    (root, proofs)
}

fn build_aunts(leaves: &[Hash], proofs: &mut [Proof], offset: usize) -> Hash {
    match leaves.len() {
        0 => Hash::from_bytes(Sha256::digest([]).into()),
        1 => leaves[0],
        n => {
            let k = split_point(n);
            let left = build_aunts(&leaves[..k], proofs, offset);
            let right = build_aunts(&leaves[k..], proofs, offset + k);
            for p in &mut proofs[offset..offset + k] {
                p.aunts.push(right);
            }
            for p in &mut proofs[offset + k..offset + n] {
                p.aunts.push(left);
            }
            inner_hash(&left, &right)
        }
    }
}
