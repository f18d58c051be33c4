//! # Cryptographic Primitives
//!
//! Everything security-related flows through here: hashing, sealing,
//! signing, and the canonical codec that turns structured values into bytes
//! worth hashing.
//!
//! Boring, well-audited choices only:
//!
//! - **Ed25519** for signatures.
//! - **AES-256-GCM** for backup sections.
//! - **BLAKE3** for content hashes and Merkle trees, always domain separated.
//! - **SHA-256** where humans compare fingerprints.
//!
//! The algorithms hide behind [`CryptoSuite`] and [`Signer`]. The rest of the
//! crate only ever talks to those traits and to [`IntegrityCodec`].

pub mod codec;
pub mod encryption;
pub mod hash;
pub mod keys;
pub mod signatures;
pub mod suite;

pub use codec::{CodecError, IntegrityCodec};
pub use encryption::EncryptionError;
pub use hash::{
    blake3_hash, domain_separated_hash, merkle_proof, merkle_root, sha256, verify_merkle_proof,
    MerkleProof,
};
pub use keys::{IdentityKeypair, IdentityPublicKey, IdentitySignature, KeyError};
pub use signatures::{Signer, SignatureError};
pub use suite::{CryptoSuite, StandardSuite};
