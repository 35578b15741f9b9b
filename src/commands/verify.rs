use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use keybox_chain::configs::AppConfig;
use keybox_chain::keybox_cache::{has_keybox_extension, KeyboxCache};
use keybox_chain::revocation::RevocationList;
use keybox_chain::verification::{
    verify_batch, BatchSummary, ImportOptions, ImportOutcome, KeyboxFile, VerificationReport,
    VerificationStatus,
};
use log::warn;

use super::{box_bottom, box_line, box_top, print_banner};

/// Handle the `verify` command
///
/// Fetches the revocation list once and checks every keybox found at `path`.
/// Nothing is fetched when `path` holds no keybox files.
pub fn handle_verify(path: &Path, config: &AppConfig) -> Result<()> {
    let files = collect_keybox_files(path)?;
    if files.is_empty() {
        warn!("No keybox files found at {}", path.display());
        return Ok(());
    }

    print_banner("VERIFYING KEYBOXES");
    let revocations = fetch_revocations(config)?;
    let reports = verify_batch(&files, &revocations, None);
    print_reports(&reports);
    print_summary(&BatchSummary::from_reports(&reports), false);
    Ok(())
}

/// Handle the `import` command
///
/// Like `verify`, then copies every valid keybox into the local cache.
/// `--as` names a single import, so it is rejected for multi-file batches
/// before anything is fetched.
pub fn handle_import(
    path: &Path,
    as_name: Option<String>,
    force: bool,
    config: &AppConfig,
) -> Result<()> {
    let files = collect_keybox_files(path)?;
    if as_name.is_some() && files.len() > 1 {
        bail!(
            "--as can only be used when importing a single file ({} found at {})",
            files.len(),
            path.display()
        );
    }
    if files.is_empty() {
        warn!("No keybox files found at {}", path.display());
        return Ok(());
    }

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

    print_banner("IMPORTING KEYBOXES");
    let revocations = fetch_revocations(config)?;
    let options = ImportOptions {
        cache: &cache,
        as_name,
        overwrite: force,
    };
    let reports = verify_batch(&files, &revocations, Some(&options));
    print_reports(&reports);
    print_summary(&BatchSummary::from_reports(&reports), true);
    Ok(())
}

/// A single file, or the `.xml` files directly inside a directory sorted by name.
fn collect_keybox_files(path: &Path) -> Result<Vec<KeyboxFile>> {
    if path.is_file() {
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        return Ok(vec![KeyboxFile::new(display_name(path), bytes)]);
    }
    if !path.is_dir() {
        bail!("{} is neither a file nor a directory", path.display());
    }

    let mut paths = Vec::new();
    for entry in fs::read_dir(path)
        .with_context(|| format!("Failed to read directory {}", path.display()))?
    {
        let entry_path = entry?.path();
        if entry_path.is_file() && has_keybox_extension(&entry_path) {
            paths.push(entry_path);
        }
    }
    paths.sort();

    paths
        .iter()
        .map(|p| {
            let bytes = fs::read(p).with_context(|| format!("Failed to read {}", p.display()))?;
            Ok(KeyboxFile::new(display_name(p), bytes))
        })
        .collect()
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn fetch_revocations(config: &AppConfig) -> Result<RevocationList> {
    let list = RevocationList::fetch(&config.revocation.url, config.revocation.timeout())
        .context("Cannot verify keyboxes without the revocation list")?;
    println!("✓ Revocation list loaded ({} entries)\n", list.len());
    Ok(list)
}

fn print_reports(reports: &[VerificationReport]) {
    for report in reports {
        let glyph = match report.status {
            VerificationStatus::Valid => "✓",
            VerificationStatus::Revoked | VerificationStatus::Invalid => "✗",
        };
        println!("{} {}: {}", glyph, report.name, report.status);
        for (algorithm, serial) in &report.leaf_serials {
            println!("   {:<6} leaf serial {}", algorithm, serial);
        }
        if let Some(reason) = &report.invalid_reason {
            println!("   Reason: {}", reason);
        }
        match &report.import {
            ImportOutcome::NotRequested | ImportOutcome::Skipped => {}
            ImportOutcome::Imported(path) => println!("   ✓ Imported to {}", path.display()),
            ImportOutcome::Conflict(path) => println!(
                "   ✗ Not imported: {} exists (use --force to overwrite)",
                path.display()
            ),
            ImportOutcome::Failed(reason) => println!("   ✗ Import failed: {}", reason),
        }
    }
    println!();
}

fn print_summary(summary: &BatchSummary, import_requested: bool) {
    box_top("VERIFICATION SUMMARY");
    box_line(&format!("Files checked:       {:>5}", summary.total()));
    box_line(&format!("Valid:               {:>5}", summary.valid));
    box_line(&format!("Revoked:             {:>5}", summary.revoked));
    box_line(&format!("Invalid:             {:>5}", summary.invalid));
    if import_requested {
        box_line(&format!("Imported:            {:>5}", summary.imported));
    }
    box_bottom();
}
