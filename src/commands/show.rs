use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use keybox_chain::certificate_chain::{
    authority_key_identifier, decode_pem, describe_name, extension_by_oid, serial_hex,
    subject_key_identifier,
};
use keybox_chain::configs::AppConfig;
use keybox_chain::keybox_cache::KeyboxCache;
use keybox_chain::keybox_document::{KeyEntry, Keybox};
use keybox_chain::raw_extension::{ProvisioningInfo, PROVISIONING_INFO_OID};
use openssl::x509::X509;

use super::print_banner;

/// Handle the `list-local` command
pub fn handle_list_local(config: &AppConfig) -> Result<()> {
    let cache = KeyboxCache::open_with_backup(
        &config.cache.directory,
        &config.cache.backup_directory_name,
    )
    .with_context(|| {
        format!(
            "Failed to open keybox cache at {}",
            config.cache.directory.display()
        )
    })?;
    let names = cache.list().context("Failed to list keybox cache")?;

    println!("Keybox cache: {}", cache.root().display());
    if names.is_empty() {
        println!("  (empty)");
    }
    for name in names {
        println!("  {}", name);
    }
    Ok(())
}

/// Handle the `show` command
///
/// Certificates that fail to decode are reported in place; the rest of the
/// keybox is still printed.
pub fn handle_show(file: &Path) -> Result<()> {
    let bytes = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let keybox = Keybox::parse(&bytes)
        .with_context(|| format!("Failed to parse keybox {}", file.display()))?;

    print_banner(&format!("KEYBOX {}", file.display()));
    println!("📱 DeviceID: {}", display_device_id(&keybox));
    if keybox.keys.is_empty() {
        println!("   No keys present");
    }
    for (algorithm, entry) in &keybox.keys {
        println!("\n🔑 Key: {}", algorithm);
        println!("   Private key: {}", private_key_status(entry));
        println!("   Chain length: {}", entry.chain.len());
        for (index, pem) in entry.chain.iter().enumerate() {
            match decode_pem(pem.as_bytes()) {
                Ok(cert) => print_certificate(index, &cert),
                Err(e) => println!("   [{}] ✗ {}", index, e),
            }
        }
    }
    println!();
    Ok(())
}

fn display_device_id(keybox: &Keybox) -> &str {
    if keybox.device_id.is_empty() {
        "(none)"
    } else {
        &keybox.device_id
    }
}

fn private_key_status(entry: &KeyEntry) -> String {
    match entry.private_key() {
        Ok(key) => format!("✓ {} bits", key.bits()),
        Err(e) => format!("✗ {}", e),
    }
}

fn print_certificate(index: usize, cert: &X509) {
    let serial = serial_hex(cert).unwrap_or_else(|e| format!("<{}>", e));
    println!("   [{}] Subject: {}", index, describe_name(cert.subject_name()));
    println!("       Issuer:  {}", describe_name(cert.issuer_name()));
    println!("       Serial:  {}", serial);
    println!(
        "       Valid:   {} → {}",
        cert.not_before(),
        cert.not_after()
    );
    if let Some(ski) = subject_key_identifier(cert) {
        println!("       SKI:     {}", hex::encode(ski));
    }
    if let Some(aki) = authority_key_identifier(cert) {
        println!("       AKI:     {}", hex::encode(aki));
    }
    if let Ok(Some(ext)) = extension_by_oid(cert, PROVISIONING_INFO_OID) {
        match ProvisioningInfo::from_cbor(&ext.value) {
            Ok(info) => println!(
                "       ProvisioningInfo: certs issued {}, manufacturer {}",
                info.certs_issued, info.manufacturer
            ),
            Err(e) => println!("       ProvisioningInfo: ✗ {}", e),
        }
    }
}
