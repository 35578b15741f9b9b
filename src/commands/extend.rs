use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use keybox_chain::certificate_chain::{describe_name, serial_hex};
use keybox_chain::chain_forge::{extend_keybox, ExtendOptions};
use keybox_chain::configs::AppConfig;
use keybox_chain::keybox_document::{Algorithm, Keybox};
use log::info;

use super::print_banner;

/// Arguments of the `extend` command
#[derive(Debug, Clone)]
pub struct ExtendRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub sign_with: Algorithm,
    pub ecdsa_serial: Option<String>,
    pub rsa_serial: Option<String>,
    pub ecdsa_subject: Option<String>,
    pub rsa_subject: Option<String>,
    pub force: bool,
}

/// Handle the `extend` command
///
/// This command:
/// 1. Parses the input keybox and selects the `--sign-with` key as signer
/// 2. Forges new ECDSA and RSA CA certificates under the signer's leaf
/// 3. Writes a two-slot keybox to `--output`
pub fn handle_extend(request: &ExtendRequest, config: &AppConfig) -> Result<()> {
    if request.output.exists() && !request.force {
        bail!(
            "Output file {} already exists (use --force to overwrite)",
            request.output.display()
        );
    }

    let bytes = fs::read(&request.input)
        .with_context(|| format!("Failed to read {}", request.input.display()))?;
    let input = Keybox::parse(&bytes)
        .with_context(|| format!("Failed to parse keybox {}", request.input.display()))?;

    print_banner("EXTENDING KEYBOX CHAIN");
    println!("📄 Input:   {}", request.input.display());
    println!("🔑 Signer:  {} key", request.sign_with);

    let options = ExtendOptions::new(request.sign_with)
        .device_id(config.forge.device_id.clone())
        .ecdsa_serial(request.ecdsa_serial.clone())
        .ecdsa_subject(request.ecdsa_subject.clone())
        .rsa_serial(request.rsa_serial.clone())
        .rsa_subject(request.rsa_subject.clone());
    let output = extend_keybox(&input, &options).context("Failed to extend certificate chain")?;

    let xml = output.serialize().context("Failed to serialize keybox")?;
    fs::write(&request.output, xml)
        .with_context(|| format!("Failed to write {}", request.output.display()))?;
    info!("Wrote extended keybox to {}", request.output.display());

    print_forged(&output);
    println!("\n✓ Extended keybox written to {}\n", request.output.display());
    Ok(())
}

fn print_forged(output: &Keybox) {
    for (algorithm, entry) in &output.keys {
        match entry.leaf_certificate() {
            Ok(cert) => {
                let serial = serial_hex(&cert).unwrap_or_default();
                println!(
                    "   ✓ {:<6} serial {}  subject {}  (chain length {})",
                    algorithm,
                    serial,
                    describe_name(cert.subject_name()),
                    entry.chain.len()
                );
            }
            Err(e) => println!("   ✗ {:<6} {}", algorithm, e),
        }
    }
}
