//! Keybox Chain command-line tool
//!
//! Verifies attestation keyboxes against the revocation list, keeps valid ones
//! in a local cache and forges extended keyboxes.

mod commands;

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use keybox_chain::configs::AppConfig;
use keybox_chain::keybox_document::Algorithm;
use log::LevelFilter;

/// Attestation keybox certificate-chain manager.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log verbosity, one of Off, Error, Warn, Info, Debug, Trace.
    #[arg(long, global = true, default_value_t = String::from("info"))]
    log_level: String,
    /// TOML configuration file; built-in defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check a keybox file, or every .xml file in a directory, for revocation
    Verify {
        path: PathBuf,
    },
    /// Verify keyboxes and copy the valid ones into the local cache
    Import {
        path: PathBuf,
        /// Cache name for a single imported file (.xml is appended if missing)
        #[arg(long = "as")]
        as_name: Option<String>,
        /// Replace an existing cache entry (the old file is backed up)
        #[arg(long)]
        force: bool,
    },
    /// List keyboxes in the local cache
    ListLocal,
    /// Print the keys and certificate chains of a keybox file
    Show {
        file: PathBuf,
    },
    /// Forge a new keybox whose CA certificates extend the input's chain
    Extend {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Which key of the input signs the new certificates
        #[arg(long, value_parser = parse_algorithm)]
        sign_with: Algorithm,
        /// Hex serial for the new ECDSA certificate (random if omitted)
        #[arg(long)]
        ecdsa_serial: Option<String>,
        /// Hex serial for the new RSA certificate (random if omitted)
        #[arg(long)]
        rsa_serial: Option<String>,
        /// RFC 4514 subject for the new ECDSA certificate
        #[arg(long)]
        ecdsa_subject: Option<String>,
        /// RFC 4514 subject for the new RSA certificate
        #[arg(long)]
        rsa_subject: Option<String>,
        /// Overwrite the output file if it exists
        #[arg(long)]
        force: bool,
    },
}

fn parse_algorithm(value: &str) -> std::result::Result<Algorithm, String> {
    Algorithm::from_str(value).map_err(|e| e.to_string())
}

fn init_logging(level: &str) -> Result<()> {
    env_logger::builder()
        .format_timestamp_secs()
        .filter_level(
            LevelFilter::from_str(level).with_context(|| format!("Invalid log level: {}", level))?,
        )
        .init();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Verify { path } => commands::verify::handle_verify(&path, &config),
        Command::Import {
            path,
            as_name,
            force,
        } => commands::verify::handle_import(&path, as_name, force, &config),
        Command::ListLocal => commands::show::handle_list_local(&config),
        Command::Show { file } => commands::show::handle_show(&file),
        Command::Extend {
            input,
            output,
            sign_with,
            ecdsa_serial,
            rsa_serial,
            ecdsa_subject,
            rsa_subject,
            force,
        } => {
            let request = commands::extend::ExtendRequest {
                input,
                output,
                sign_with,
                ecdsa_serial,
                rsa_serial,
                ecdsa_subject,
                rsa_subject,
                force,
            };
            commands::extend::handle_extend(&request, &config)
        }
    }
}
