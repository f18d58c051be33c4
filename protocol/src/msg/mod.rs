//! # Transaction Surface
//!
//! Every state-changing operation as an account-signed message.
//!
//! ```text
//! messages.rs  Request/response types and stateless validate_basic checks
//! signing.rs   SignedMsg envelope, signing and authority binding
//! server.rs    MsgServer: signature, validation, authority, dispatch
//! errors.rs    TxError and the stable identity/4001..4020 codes
//! ```
//!
//! ## Lifecycle
//!
//! 1. **Build** a message with the acting account as `authority`.
//! 2. **Sign** it with [`sign_msg`] using the key behind that address.
//! 3. **Deliver** it to [`MsgServer::deliver`], which answers with a
//!    [`TxResponse`] or a [`TxError`].

pub mod errors;
pub mod messages;
pub mod server;
pub mod signing;

pub use errors::{TxCode, TxError, CODESPACE};
pub use messages::{
    decode_b64, encode_b64, Msg, MsgAddGuardian, MsgAddGuardianResponse, MsgCancelRecovery,
    MsgCancelRecoveryResponse, MsgCreateBackup, MsgCreateBackupResponse, MsgExecuteRecovery,
    MsgExecuteRecoveryResponse, MsgInitiateRecovery, MsgInitiateRecoveryResponse,
    MsgPrepareOfflineBundle, MsgPrepareOfflineBundleResponse, MsgSetGuardianThreshold,
    MsgSetGuardianThresholdResponse, MsgSubmitGuardianVote, MsgSubmitGuardianVoteResponse,
    MsgSubmitProof, MsgSubmitProofResponse, MsgVerifyBackupIntegrity,
    MsgVerifyBackupIntegrityResponse, TxMsg, TxResponse,
};
pub use server::MsgServer;
pub use signing::{sign_msg, SignedMsg};
