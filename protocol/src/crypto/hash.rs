//! # Hashing Utilities
//!
//! Two hash functions, no more:
//!
//! - **BLAKE3**: the default. Integrity hashes, bundle hashes, Merkle trees,
//!   and key stretching all go through it, always with a domain-separation
//!   context so a backup hash can never be replayed as a bundle hash.
//!
//! - **SHA-256**: for key fingerprints shown to humans and anything that has
//!   to interoperate with tooling that only speaks SHA-256.
//!
//! ## Merkle trees
//!
//! Revocation snapshots commit to the full revoked-ID list with a binary
//! Merkle root. Offline bundles only carry a slice of that list, plus
//! inclusion proofs for entries that concern the bundle's holder. The tree
//! shape is deliberately boring: odd levels duplicate their last node and a
//! single leaf is paired with itself, so the root is always a hash output.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// SHA-256 of `data` as a `Vec<u8>`.
///
/// ```
/// use custodia_protocol::crypto::sha256;
///
/// assert_eq!(sha256(b"custodia").len(), 32);
/// ```
pub fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// SHA-256 into a fixed array, for hot paths that want no allocation.
pub fn sha256_array(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Plain BLAKE3. Prefer [`domain_separated_hash`] for anything persisted.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// BLAKE3 in `derive_key` mode with `context` as the domain tag.
///
/// `derive_key` uses an IV derived from the context string, so two contexts
/// cannot collide even on identical input. Prepending a tag by hand is not
/// the same thing.
pub fn domain_separated_hash(context: &str, data: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

/// Hash several slices as if concatenated, without the concatenation.
pub fn blake3_hash_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    blake3_hash_multi(&[left.as_slice(), right.as_slice()])
}

// ---------------------------------------------------------------------------
// Merkle trees
// ---------------------------------------------------------------------------

/// Which side of the running hash a proof sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

/// One level of an inclusion proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleStep {
    /// Hex-encoded sibling hash.
    pub sibling: String,
    pub side: Side,
}

/// An inclusion proof: the leaf index plus the sibling path to the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf_index: usize,
    pub steps: Vec<MerkleStep>,
}

/// Compute the Merkle root of `leaves`. Empty input yields all zeros.
pub fn merkle_root(leaves: &[[u8; 32]]) -> [u8; 32] {
    if leaves.is_empty() {
        return [0u8; 32];
    }
    if leaves.len() == 1 {
        return hash_pair(&leaves[0], &leaves[0]);
    }

    let mut level: Vec<[u8; 32]> = leaves.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
            .collect();
    }
    level[0]
}

/// Build an inclusion proof for `leaves[index]`, or `None` when out of range.
pub fn merkle_proof(leaves: &[[u8; 32]], index: usize) -> Option<MerkleProof> {
    if index >= leaves.len() {
        return None;
    }

    let mut steps = Vec::new();
    if leaves.len() == 1 {
        steps.push(MerkleStep {
            sibling: hex::encode(leaves[0]),
            side: Side::Right,
        });
        return Some(MerkleProof {
            leaf_index: index,
            steps,
        });
    }

    let mut level: Vec<[u8; 32]> = leaves.to_vec();
    let mut pos = index;
    while level.len() > 1 {
        let (sibling, side) = if pos % 2 == 0 {
            (*level.get(pos + 1).unwrap_or(&level[pos]), Side::Right)
        } else {
            (level[pos - 1], Side::Left)
        };
        steps.push(MerkleStep {
            sibling: hex::encode(sibling),
            side,
        });

        level = level
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
            .collect();
        pos /= 2;
    }

    Some(MerkleProof {
        leaf_index: index,
        steps,
    })
}

/// Fold `leaf` up the proof path and compare with `root`.
///
/// Malformed sibling hex makes the proof fail rather than error; a proof
/// that cannot be parsed proves nothing.
pub fn verify_merkle_proof(leaf: &[u8; 32], proof: &MerkleProof, root: &[u8; 32]) -> bool {
    let mut acc = *leaf;
    for step in &proof.steps {
        let Some(sibling) = decode_hash(&step.sibling) else {
            return false;
        };
        acc = match step.side {
            Side::Left => hash_pair(&sibling, &acc),
            Side::Right => hash_pair(&acc, &sibling),
        };
    }
    !proof.steps.is_empty() && &acc == root
}

/// Parse a 64-character hex string into a 32-byte digest.
pub fn decode_hash(hex_str: &str) -> Option<[u8; 32]> {
    let bytes = hex::decode(hex_str).ok()?;
    bytes.try_into().ok()
}
