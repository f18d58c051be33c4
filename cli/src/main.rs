// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Custodia CLI
//!
//! Entry point for the `custodia` binary.
//!
//! - `keygen`           generate a keypair, print its DID and address
//! - `bundle build`     build and sign an offline bundle from a store snapshot
//! - `bundle verify`    verify a bundle with no network access
//! - `bundle inspect`   print a bundle's contents without verifying
//! - `challenge sign`   answer a verifier's challenge with the holder key
//! - `version`          print build version information

mod cli;
mod commands;
mod config;
mod logging;

use anyhow::{bail, Context, Result};
use clap::Parser;

use cli::{BundleCommand, ChallengeCommand, Commands, CustodiaCli};
use logging::LogFormat;

fn main() -> Result<()> {
    let cli = CustodiaCli::parse();
    logging::init_logging(&cli.log_level, LogFormat::from_str_lossy(&cli.log_format));

    let config = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Keygen(args) => {
            let (keypair, info) = commands::keygen(&args)?;
            print_json(&info)?;
            if args.out.is_none() {
                tracing::warn!("no --out given, secret key printed to stdout");
                println!("{}", keypair.secret_key_hex());
            }
            Ok(())
        }
        Commands::Bundle(BundleCommand::Build(args)) => {
            let bundle = commands::build_bundle(&args, &config)?;
            println!("bundle for {} written to {}", bundle.did, args.out.display());
            println!("  format      {}", bundle.format);
            println!("  issued      {}", bundle.issued_at.to_rfc3339());
            println!("  expires     {}", bundle.expires_at.to_rfc3339());
            println!("  credentials {}", bundle.credentials.len());
            println!("  data hash   {}", bundle.data_hash);
            Ok(())
        }
        Commands::Bundle(BundleCommand::Verify(args)) => {
            let result = commands::verify_bundle(&args, &config)?;
            print_json(&result)?;
            if !result.success {
                bail!("verification failed: {}", result.errors.join("; "));
            }
            Ok(())
        }
        Commands::Bundle(BundleCommand::Inspect(args)) => {
            print_json(&commands::inspect_bundle(&args)?)
        }
        Commands::Challenge(ChallengeCommand::Sign(args)) => {
            println!("{}", commands::sign_challenge(&args)?);
            Ok(())
        }
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to render JSON")?;
    println!("{text}");
    Ok(())
}

fn print_version() {
    println!("custodia {}", env!("CARGO_PKG_VERSION"));
    println!("protocol {}", custodia_protocol::config::PROTOCOL_VERSION);
    println!("rustc    {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}
