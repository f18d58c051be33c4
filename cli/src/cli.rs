//! # CLI Interface
//!
//! Argument structure for the `custodia` binary, via `clap` derive.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use custodia_protocol::offline::{BundleFormat, VerificationMode};

/// Custodia identity tools.
///
/// Generates holder and issuer keys, builds signed offline verification
/// bundles from an identity store snapshot, and verifies bundles with no
/// network access.
#[derive(Parser, Debug)]
#[command(name = "custodia", about = "Custodia identity tools", version, propagate_version = true)]
pub struct CustodiaCli {
    /// Policy file (TOML). Defaults apply when omitted.
    #[arg(long, short = 'c', env = "CUSTODIA_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Default log filter. `RUST_LOG` takes precedence.
    #[arg(long, env = "CUSTODIA_LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// Log format: `pretty` or `json`.
    #[arg(long, env = "CUSTODIA_LOG_FORMAT", default_value = "pretty", global = true)]
    pub log_format: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate an Ed25519 keypair and print its DID and account address.
    Keygen(KeygenArgs),
    /// Build, verify, or inspect offline bundles.
    #[command(subcommand)]
    Bundle(BundleCommand),
    /// Holder-side challenge handling.
    #[command(subcommand)]
    Challenge(ChallengeCommand),
    /// Print version information and exit.
    Version,
}

#[derive(Args, Debug)]
pub struct KeygenArgs {
    /// Where to write the hex secret key. Printed to stdout when omitted.
    #[arg(long, short = 'o')]
    pub out: Option<PathBuf>,

    /// Overwrite an existing key file.
    #[arg(long)]
    pub force: bool,
}

#[derive(Subcommand, Debug)]
pub enum BundleCommand {
    /// Build and sign a bundle for one holder.
    Build(BuildArgs),
    /// Verify a bundle against a request, printing the result as JSON.
    Verify(VerifyArgs),
    /// Decode a bundle and print its contents without verifying.
    Inspect(InspectArgs),
}

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Identity store snapshot (JSON).
    #[arg(long)]
    pub store: PathBuf,

    /// Issuer secret key file (hex).
    #[arg(long, env = "CUSTODIA_ISSUER_KEY")]
    pub issuer_key: PathBuf,

    /// Holder DID.
    #[arg(long)]
    pub did: String,

    /// self-contained, compressed, qr, nfc, or printable.
    #[arg(long, short = 'f', default_value = "self-contained")]
    pub format: BundleFormat,

    /// Bundle lifetime in hours.
    #[arg(long, default_value_t = 24)]
    pub hours: u32,

    /// Minimum verification level the holder must have.
    #[arg(long, default_value_t = 1)]
    pub level: u8,

    /// Credential IDs or types to include. Repeatable.
    #[arg(long = "include")]
    pub include: Vec<String>,

    /// Carry biometric templates.
    #[arg(long)]
    pub biometric: bool,

    /// Output file.
    #[arg(long, short = 'o')]
    pub out: PathBuf,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Encoded bundle file.
    #[arg(long)]
    pub bundle: PathBuf,

    #[arg(long, short = 'f', default_value = "self-contained")]
    pub format: BundleFormat,

    /// DID the presenter claims to be.
    #[arg(long)]
    pub did: String,

    /// Trusted issuer as `DID=HEXKEY`, or a bare `did:custodia:` DID whose
    /// key is embedded. Repeatable.
    #[arg(long = "trust", required = true)]
    pub trust: Vec<String>,

    /// full, partial, minimal, or emergency.
    #[arg(long, short = 'm', default_value = "full")]
    pub mode: VerificationMode,

    /// Challenge issued to the holder.
    #[arg(long, default_value = "")]
    pub challenge: String,

    /// Nonce issued with the challenge.
    #[arg(long)]
    pub nonce: Option<String>,

    /// Holder's hex signature over the challenge.
    #[arg(long)]
    pub response: Option<String>,

    /// Minimum verification level required.
    #[arg(long, default_value_t = 1)]
    pub level: u8,

    /// Credential types that must be present. Repeatable.
    #[arg(long = "require-type")]
    pub require_type: Vec<String>,

    /// Live biometric sample as `MODALITY=PATH`. Repeatable.
    #[arg(long = "sample")]
    pub sample: Vec<String>,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    #[arg(long)]
    pub bundle: PathBuf,

    #[arg(long, short = 'f', default_value = "self-contained")]
    pub format: BundleFormat,
}

#[derive(Subcommand, Debug)]
pub enum ChallengeCommand {
    /// Sign a verifier's challenge with the holder key.
    Sign(SignChallengeArgs),
}

#[derive(Args, Debug)]
pub struct SignChallengeArgs {
    /// Holder secret key file (hex).
    #[arg(long)]
    pub key: PathBuf,

    #[arg(long)]
    pub did: String,

    #[arg(long)]
    pub challenge: String,

    #[arg(long)]
    pub nonce: String,
}
