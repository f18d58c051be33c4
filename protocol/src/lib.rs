// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Custodia Core Library
//!
//! Two things happen to a decentralized identity when life gets in the way:
//! its owner loses the keys, or its owner needs to prove who they are
//! somewhere the network cannot reach. Custodia handles both.
//!
//! ## Architecture
//!
//! - **crypto**: Hashing, sealing, signing, and the canonical
//!   [`IntegrityCodec`](crypto::IntegrityCodec) every digest goes through.
//! - **identity**: DIDs, account addresses, and the seam to the external
//!   identity/credential store.
//! - **backup**: Encrypted, versioned snapshots of a holder's private state.
//! - **guardian**: Weighted social-recovery guardians and their signed votes.
//! - **recovery**: The recovery state machine that turns proofs and votes
//!   into a new controller.
//! - **offline**: Signed, self-contained verification bundles (JSON, LZ4,
//!   QR, NFC, paper) and the verifier that grades them without a network.
//! - **msg**: Account-signed messages and the server that dispatches them.
//! - **config**: Constants, domain tags, and the policy structs.
//! - **error**: The cross-component [`ErrorKind`](error::ErrorKind).
//! - **clock**, **sync**: Injectable time and per-key locking.
//!
//! ## Design Philosophy
//!
//! 1. Every signature and hash is domain separated.
//! 2. Integrity failures are never retried.
//! 3. Verification never panics and never talks to the network.
//! 4. If it touches a recovery, it has tests. Plural.

pub mod backup;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod guardian;
pub mod identity;
pub mod msg;
pub mod offline;
pub mod recovery;
pub mod sync;
