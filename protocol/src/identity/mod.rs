//! # Identity
//!
//! DID syntax plus the seam to the external identity/credential store.
//! Custodia never issues credentials or edits DID documents; it snapshots
//! them into backups and bundles, and hands a new controller back after a
//! successful recovery.

pub mod address;
pub mod did;
pub mod store;

pub use address::{address_of, validate_address, AccountAddress, AddressError};
pub use did::{validate_did, Did, DidError};
pub use store::{
    AccessPolicy, BiometricModality, BiometricTemplate, ClaimValue, ConsentRecord,
    ControllerRegistry, CredentialRecord, EmergencyContact, HolderState, IdentityRecord,
    IdentityStore, MemoryIdentityStore, ProofMaterial, RestoredState, RevocationSnapshot,
    StoreError, StoreSnapshot,
};
