//! Bundle transport encodings.
//!
//! | Format        | Bytes                                              |
//! |---------------|----------------------------------------------------|
//! | SelfContained | JSON                                               |
//! | Compressed    | LZ4 (size-prepended) of JSON                       |
//! | QRCode        | `CUSTODIA:` + URL-safe base64 of the Compressed form |
//! | NFC           | LZ4 (size-prepended) of bincode                    |
//! | Printable     | summary header + wrapped base64 of the Compressed form |
//!
//! The format is also recorded inside the bundle, and decoding checks the
//! two agree.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use thiserror::Error;

use super::types::{BundleFormat, OfflineVerificationData};
use crate::error::ErrorKind;

pub const QR_PREFIX: &str = "CUSTODIA:";
const ARMOR_BEGIN: &str = "-----BEGIN CUSTODIA OFFLINE BUNDLE-----";
const ARMOR_END: &str = "-----END CUSTODIA OFFLINE BUNDLE-----";
const ARMOR_WIDTH: usize = 64;

#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bincode: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("lz4: {0}")]
    Decompress(#[from] lz4_flex::block::DecompressError),

    #[error("base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("QR payload does not start with {QR_PREFIX}")]
    MissingPrefix,

    #[error("malformed printable armor: {0}")]
    Armor(&'static str),

    #[error("bundle says {found}, decoded as {expected}")]
    FormatMismatch {
        expected: BundleFormat,
        found: BundleFormat,
    },
}

impl EncodingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EncodingError::Json(e) if e.is_data() || e.is_syntax() || e.is_eof() => {
                ErrorKind::Validation
            }
            EncodingError::Json(_) => ErrorKind::Internal,
            _ => ErrorKind::Validation,
        }
    }
}

/// Encode `bundle` in its own declared format.
pub fn encode(bundle: &OfflineVerificationData) -> Result<Vec<u8>, EncodingError> {
    match bundle.format {
        BundleFormat::SelfContained => Ok(serde_json::to_vec(bundle)?),
        BundleFormat::Compressed => compressed(bundle),
        BundleFormat::QrCode => {
            let mut out = QR_PREFIX.to_string();
            out.push_str(&URL_SAFE_NO_PAD.encode(compressed(bundle)?));
            Ok(out.into_bytes())
        }
        BundleFormat::Nfc => Ok(lz4_flex::compress_prepend_size(&bincode::serialize(
            bundle,
        )?)),
        BundleFormat::Printable => Ok(printable(bundle)?.into_bytes()),
    }
}

/// Reverse [`encode`] for `format`.
pub fn decode(bytes: &[u8], format: BundleFormat) -> Result<OfflineVerificationData, EncodingError> {
    let bundle: OfflineVerificationData = match format {
        BundleFormat::SelfContained => serde_json::from_slice(bytes)?,
        BundleFormat::Compressed => from_compressed(bytes)?,
        BundleFormat::QrCode => {
            let text = std::str::from_utf8(bytes).map_err(|_| EncodingError::MissingPrefix)?;
            let payload = text
                .trim()
                .strip_prefix(QR_PREFIX)
                .ok_or(EncodingError::MissingPrefix)?;
            from_compressed(&URL_SAFE_NO_PAD.decode(payload)?)?
        }
        BundleFormat::Nfc => bincode::deserialize(&lz4_flex::decompress_size_prepended(bytes)?)?,
        BundleFormat::Printable => {
            let text = std::str::from_utf8(bytes).map_err(|_| EncodingError::Armor("not UTF-8"))?;
            from_compressed(&STANDARD.decode(armor_body(text)?)?)?
        }
    };
    if bundle.format != format {
        return Err(EncodingError::FormatMismatch {
            expected: format,
            found: bundle.format,
        });
    }
    Ok(bundle)
}

fn compressed(bundle: &OfflineVerificationData) -> Result<Vec<u8>, EncodingError> {
    Ok(lz4_flex::compress_prepend_size(&serde_json::to_vec(bundle)?))
}

fn from_compressed(bytes: &[u8]) -> Result<OfflineVerificationData, EncodingError> {
    Ok(serde_json::from_slice(&lz4_flex::decompress_size_prepended(
        bytes,
    )?)?)
}

fn printable(bundle: &OfflineVerificationData) -> Result<String, EncodingError> {
    let body = STANDARD.encode(compressed(bundle)?);
    let mut out = String::with_capacity(body.len() + 512);
    out.push_str(ARMOR_BEGIN);
    out.push('\n');
    out.push_str(&format!("DID: {}\n", bundle.did));
    out.push_str(&format!("Issuer: {}\n", bundle.issuer_did));
    out.push_str(&format!("Level: {}\n", bundle.verification_level));
    out.push_str(&format!("Issued: {}\n", bundle.issued_at.to_rfc3339()));
    out.push_str(&format!("Expires: {}\n", bundle.expires_at.to_rfc3339()));
    out.push_str(&format!("Credentials: {}\n", bundle.credentials.len()));
    for contact in &bundle.emergency_contacts {
        out.push_str(&format!(
            "Emergency: {} ({}) {}\n",
            contact.name, contact.relationship, contact.contact_method
        ));
    }
    out.push_str(&format!("Data-Hash: {}\n", bundle.data_hash));
    out.push('\n');
    for chunk in body.as_bytes().chunks(ARMOR_WIDTH) {
        // base64 output is ASCII, so every chunk is valid UTF-8
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push('\n');
    }
    out.push_str(ARMOR_END);
    out.push('\n');
    Ok(out)
}

/// The base64 lines between the blank line after the header and the END
/// marker.
fn armor_body(text: &str) -> Result<String, EncodingError> {
    let mut lines = text.lines().map(str::trim);
    if lines.next() != Some(ARMOR_BEGIN) {
        return Err(EncodingError::Armor("missing BEGIN marker"));
    }
    for line in lines.by_ref() {
        if line.is_empty() {
            break;
        }
    }
    let mut body = String::new();
    for line in lines {
        if line == ARMOR_END {
            return Ok(body);
        }
        body.push_str(line);
    }
    Err(EncodingError::Armor("missing END marker"))
}
