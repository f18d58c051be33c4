//! Subcommand implementations. Each returns its output instead of printing
//! so `main` decides how it reaches stdout.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use custodia_protocol::clock::SystemClock;
use custodia_protocol::config::CustodiaConfig;
use custodia_protocol::crypto::{IdentityKeypair, IntegrityCodec};
use custodia_protocol::identity::{
    address_of, BiometricModality, Did, MemoryIdentityStore, StoreSnapshot,
};
use custodia_protocol::offline::{
    self, BuildRequest, OfflinePackageBuilder, OfflineVerificationData,
    OfflineVerificationRequest, OfflineVerificationResult, OfflineVerifier, VerificationMode,
};

use crate::cli::{BuildArgs, InspectArgs, KeygenArgs, SignChallengeArgs, VerifyArgs};

/// Public facts about a key, safe to print.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyInfo {
    pub did: String,
    pub address: String,
    pub public_key: String,
    pub fingerprint: String,
}

impl KeyInfo {
    pub fn of(keypair: &IdentityKeypair) -> Self {
        let public = keypair.public_key();
        Self {
            did: Did::from_public_key(&public).to_string(),
            address: address_of(public.as_bytes()),
            public_key: public.to_hex(),
            fingerprint: public.fingerprint(),
        }
    }
}

/// Generate a keypair, writing the secret to `args.out` when given.
pub fn keygen(args: &KeygenArgs) -> Result<(IdentityKeypair, KeyInfo)> {
    if let Some(path) = &args.out {
        if path.exists() && !args.force {
            bail!(
                "key file already exists at {} (pass --force to overwrite)",
                path.display()
            );
        }
    }
    let keypair = IdentityKeypair::generate();
    let info = KeyInfo::of(&keypair);
    if let Some(path) = &args.out {
        write_secret_key(path, &keypair)?;
        info!(path = %path.display(), did = %info.did, "key written");
    }
    Ok((keypair, info))
}

/// Write the hex secret key, owner-readable only on Unix.
pub fn write_secret_key(path: &Path, keypair: &IdentityKeypair) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("failed to open key file {}", path.display()))?;

    // `mode` only applies on creation; an overwritten file keeps its old bits.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to restrict permissions on {}", path.display()))?;
    }
    file.write_all(keypair.secret_key_hex().as_bytes())
        .with_context(|| format!("failed to write key file {}", path.display()))?;
    Ok(())
}

pub fn read_keypair(path: &Path) -> Result<IdentityKeypair> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read key file {}", path.display()))?;
    IdentityKeypair::from_hex(text.trim())
        .with_context(|| format!("malformed key file {}", path.display()))
}

/// Build, sign, and encode a bundle from a store snapshot, writing the
/// encoded bytes to `args.out`.
pub fn build_bundle(args: &BuildArgs, config: &CustodiaConfig) -> Result<OfflineVerificationData> {
    let text = fs::read_to_string(&args.store)
        .with_context(|| format!("failed to read store {}", args.store.display()))?;
    let snapshot: StoreSnapshot = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse store {}", args.store.display()))?;
    let issuer = read_keypair(&args.issuer_key)?;
    let issuer_did = Did::from_public_key(&issuer.public_key()).to_string();

    let builder = OfflinePackageBuilder::new(
        Arc::new(MemoryIdentityStore::from_snapshot(snapshot)),
        IntegrityCodec::standard(),
        issuer_did,
        Arc::new(issuer),
        Arc::new(SystemClock),
        config.bundle.clone(),
    );
    let request = BuildRequest {
        did: args.did.clone(),
        format: args.format,
        expiration_hours: args.hours,
        required_level: args.level,
        include_credentials: args.include.clone(),
        include_biometric: args.biometric,
    };
    let (bundle, bytes) = builder
        .build_encoded(&request)
        .with_context(|| format!("failed to build bundle for {}", args.did))?;
    fs::write(&args.out, &bytes)
        .with_context(|| format!("failed to write bundle {}", args.out.display()))?;

    info!(
        did = %bundle.did,
        format = %bundle.format,
        bytes = bytes.len(),
        credentials = bundle.credentials.len(),
        out = %args.out.display(),
        "bundle written"
    );
    Ok(bundle)
}

/// Verify an encoded bundle. A failed verification is still `Ok`; the
/// caller inspects `success`.
pub fn verify_bundle(args: &VerifyArgs, config: &CustodiaConfig) -> Result<OfflineVerificationResult> {
    let bundle = read_bundle(&args.bundle, args.format)?;

    let mut verifier = OfflineVerifier::new(config.offline.clone());
    for entry in &args.trust {
        let (did, key) = parse_trust(entry)?;
        verifier.add_trusted_issuer(did, key);
    }

    let mut request = OfflineVerificationRequest::new(args.did.clone(), args.mode);
    request.challenge = args.challenge.clone();
    if let Some(nonce) = &args.nonce {
        request.nonce = nonce.clone();
    }
    request.challenge_response = args.response.clone();
    request.required_level = args.level;
    request.required_types = args.require_type.clone();
    for entry in &args.sample {
        let (modality, sample) = parse_sample(entry)?;
        request.biometric_samples.insert(modality, sample);
    }
    if request.challenge_response.is_some() && args.nonce.is_none() {
        warn!("challenge response given without --nonce, it cannot match a fresh nonce");
    }

    Ok(verifier.verify(&bundle, &request))
}

/// Bundle summary without any signature checks.
#[derive(Debug, Clone, Serialize)]
pub struct BundleSummary {
    pub did: String,
    pub issuer_did: String,
    pub format: String,
    pub issued_at: String,
    pub expires_at: String,
    pub verification_level: u8,
    pub kyc_level: u8,
    pub credentials: Vec<CredentialSummary>,
    pub revoked_entries: usize,
    pub biometric_modalities: Vec<String>,
    pub emergency_contacts: usize,
    pub data_hash: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CredentialSummary {
    pub id: String,
    pub types: Vec<String>,
    pub issuer: String,
}

pub fn inspect_bundle(args: &InspectArgs) -> Result<BundleSummary> {
    let bundle = read_bundle(&args.bundle, args.format)?;
    let rev = &bundle.revocation_data;
    Ok(BundleSummary {
        did: bundle.did.clone(),
        issuer_did: bundle.issuer_did.clone(),
        format: bundle.format.as_str().to_string(),
        issued_at: bundle.issued_at.to_rfc3339(),
        expires_at: bundle.expires_at.to_rfc3339(),
        verification_level: bundle.verification_level,
        kyc_level: bundle.kyc_level,
        credentials: bundle
            .credentials
            .iter()
            .map(|c| CredentialSummary {
                id: c.id.clone(),
                types: c.types.clone(),
                issuer: c.issuer.clone(),
            })
            .collect(),
        revoked_entries: rev.revoked_identity_ids.len() + rev.revoked_credential_ids.len(),
        biometric_modalities: bundle
            .biometric_templates
            .keys()
            .map(ToString::to_string)
            .collect(),
        emergency_contacts: bundle.emergency_contacts.len(),
        data_hash: bundle.data_hash.clone(),
    })
}

/// Holder-side challenge signature, hex.
pub fn sign_challenge(args: &SignChallengeArgs) -> Result<String> {
    let holder = read_keypair(&args.key)?;
    let mut request = OfflineVerificationRequest::new(args.did.clone(), VerificationMode::Full);
    request.challenge = args.challenge.clone();
    request.nonce = args.nonce.clone();
    offline::sign_challenge(&IntegrityCodec::standard(), &holder, &request)
        .context("failed to sign challenge")
}

fn read_bundle(path: &Path, format: offline::BundleFormat) -> Result<OfflineVerificationData> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read bundle {}", path.display()))?;
    offline::decode(&bytes, format)
        .with_context(|| format!("failed to decode {} as {}", path.display(), format.as_str()))
}

/// `DID=HEXKEY`, or a bare self-certifying DID.
fn parse_trust(entry: &str) -> Result<(String, Vec<u8>)> {
    if let Some((did, key)) = entry.split_once('=') {
        let key = hex::decode(key.trim())
            .with_context(|| format!("issuer key for {did} is not valid hex"))?;
        return Ok((did.trim().to_string(), key));
    }
    let did: Did = entry
        .parse()
        .with_context(|| format!("trusted issuer {entry} is not a DID"))?;
    let key = did
        .public_key()
        .with_context(|| format!("{entry} does not embed a key, use DID=HEXKEY"))?;
    Ok((entry.to_string(), key.as_bytes().to_vec()))
}

/// `MODALITY=PATH`.
fn parse_sample(entry: &str) -> Result<(BiometricModality, Vec<u8>)> {
    let Some((modality, path)) = entry.split_once('=') else {
        bail!("biometric sample must be MODALITY=PATH, got {entry}");
    };
    let modality: BiometricModality = modality.parse().map_err(anyhow::Error::msg)?;
    let sample =
        fs::read(path).with_context(|| format!("failed to read biometric sample {path}"))?;
    Ok((modality, sample))
}
