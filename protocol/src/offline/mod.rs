//! # Offline Verification
//!
//! Bundles let a device check an identity with no ledger in sight. The
//! builder snapshots identity, credentials, revocation state and optional
//! biometrics into one signed structure; the verifier grades that structure
//! against a live request.
//!
//! ```text
//!   IdentityStore ──► OfflinePackageBuilder ──► bundle ──► encode ──► QR / NFC / file / paper
//!                                                                          │
//!   OfflineVerificationRequest ──► OfflineVerifier ◄── decode ◄────────────┘
//! ```

pub mod biometric;
pub mod builder;
pub mod encoding;
pub mod types;
pub mod verifier;

pub use biometric::{BiometricMatcher, TemplateHashMatcher};
pub use builder::{BuildRequest, BundleError, OfflinePackageBuilder};
pub use encoding::{decode, encode, EncodingError};
pub use types::{
    BundleFormat, CryptographicProof, OfflineCredential, OfflineVerificationData,
    OfflineVerificationRequest, OfflineVerificationResult, ProofType, RevocationData,
    VerificationMode,
};
pub use verifier::{sign_challenge, OfflineVerifier};
