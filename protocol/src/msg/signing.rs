//! Message signing.
//!
//! The signed bytes are the canonical JSON of `{type_url, msg}` under
//! [`DOMAIN_MESSAGE`], so a signature over one message type can never be
//! replayed as another. The signer's key must hash to the message's
//! `authority` address.

use serde::{Deserialize, Serialize};

use super::errors::TxError;
use super::messages::Msg;
use crate::config::DOMAIN_MESSAGE;
use crate::crypto::codec::IntegrityCodec;
use crate::crypto::signatures::Signer;
use crate::identity::address::address_of;

/// A message plus the key and signature that authorize it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedMsg<M> {
    pub msg: M,
    /// Hex Ed25519 public key of the signer.
    pub signer: String,
    /// Hex signature over the message's sign document.
    pub signature: String,
}

#[derive(Serialize)]
struct SignDoc<'a, M> {
    type_url: &'static str,
    msg: &'a M,
}

/// Sign `msg` with `signer`.
///
/// The caller is responsible for `signer` matching `msg.authority()`;
/// [`SignedMsg::verify`] rejects the pair otherwise.
pub fn sign_msg<M: Msg + Serialize>(
    codec: &IntegrityCodec,
    signer: &dyn Signer,
    msg: M,
) -> Result<SignedMsg<M>, TxError> {
    let signature = codec.sign_detached(
        signer,
        DOMAIN_MESSAGE,
        &SignDoc {
            type_url: msg.type_url(),
            msg: &msg,
        },
    )?;
    Ok(SignedMsg {
        msg,
        signer: hex::encode(signer.public_key_bytes()),
        signature,
    })
}

impl<M: Msg + Serialize> SignedMsg<M> {
    /// Check the signer owns the authority address and signed these exact
    /// message bytes.
    pub fn verify(&self, codec: &IntegrityCodec) -> Result<(), TxError> {
        let key = hex::decode(&self.signer)
            .map_err(|_| TxError::invalid("signer key is not valid hex"))?;
        let derived = address_of(&key);
        if derived != self.msg.authority() {
            return Err(TxError::unauthorized(format!(
                "signer {derived} is not the authority {}",
                self.msg.authority()
            )));
        }
        codec.verify_detached(
            &key,
            DOMAIN_MESSAGE,
            &SignDoc {
                type_url: self.msg.type_url(),
                msg: &self.msg,
            },
            &self.signature,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::IdentityKeypair;
    use crate::msg::errors::TxCode;
    use crate::msg::messages::{MsgCancelRecovery, MsgInitiateRecovery, TxMsg};

    fn cancel(kp: &IdentityKeypair) -> MsgCancelRecovery {
        MsgCancelRecovery {
            authority: address_of(kp.public_key().as_bytes()),
            request_id: "recovery_1".into(),
        }
    }

    #[test]
    fn signed_message_verifies() {
        let codec = IntegrityCodec::standard();
        let kp = IdentityKeypair::generate();
        let signed = sign_msg(&codec, &kp, cancel(&kp)).unwrap();
        assert_eq!(signed.signature.len(), 128);
        assert_eq!(signed.signer, kp.public_key().to_hex());
        signed.verify(&codec).unwrap();
    }

    #[test]
    fn tampered_message_fails() {
        let codec = IntegrityCodec::standard();
        let kp = IdentityKeypair::generate();
        let mut signed = sign_msg(&codec, &kp, cancel(&kp)).unwrap();
        signed.msg.request_id = "recovery_2".into();
        assert!(signed.verify(&codec).unwrap_err().is(TxCode::InvalidSignature));
    }

    #[test]
    fn foreign_signer_is_unauthorized() {
        let codec = IntegrityCodec::standard();
        let owner = IdentityKeypair::generate();
        let intruder = IdentityKeypair::generate();
        let signed = sign_msg(&codec, &intruder, cancel(&owner)).unwrap();
        assert!(signed.verify(&codec).unwrap_err().is(TxCode::Unauthorized));
    }

    #[test]
    fn signing_is_deterministic() {
        let codec = IntegrityCodec::standard();
        let kp = IdentityKeypair::from_seed(&[3u8; 32]);
        let a = sign_msg(&codec, &kp, cancel(&kp)).unwrap();
        let b = sign_msg(&codec, &kp, cancel(&kp)).unwrap();
        assert_eq!(a.signature, b.signature);
    }

    #[test]
    fn envelope_signature_binds_the_type() {
        let codec = IntegrityCodec::standard();
        let kp = IdentityKeypair::generate();
        let authority = address_of(kp.public_key().as_bytes());
        let signed = sign_msg(
            &codec,
            &kp,
            TxMsg::InitiateRecovery(MsgInitiateRecovery {
                authority,
                holder_did: "did:example:alice".into(),
                backup_id: "backup_1".into(),
                reason: "lost phone".into(),
            }),
        )
        .unwrap();
        signed.verify(&codec).unwrap();
    }
}
