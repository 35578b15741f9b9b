//! Verification Engine
//!
//! Evaluates a batch of keybox files against one revocation list:
//!
//! ```text
//! bytes ─► Keybox::parse ─► leaf of each key ─► RevocationList::is_revoked ─► status
//!                                                                   │
//!                                                   Valid + import ─┴─► KeyboxCache::import
//! ```
//!
//! Files are processed sequentially and independently. Per-file failures
//! never leave this module; they become an [`VerificationStatus::Invalid`]
//! report for that file.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use log::{info, warn};

use crate::certificate_chain::serial_hex;
use crate::error::{KeyboxError, Result};
use crate::keybox_cache::{target_file_name, KeyboxCache};
use crate::keybox_document::{Algorithm, Keybox};
use crate::revocation::RevocationList;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStatus {
    Valid,
    Revoked,
    Invalid,
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            VerificationStatus::Valid => "VALID",
            VerificationStatus::Revoked => "REVOKED",
            VerificationStatus::Invalid => "INVALID",
        };
        f.write_str(label)
    }
}

/// One input to [`verify_batch`]: a display name and the file's bytes.
#[derive(Debug, Clone)]
pub struct KeyboxFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl KeyboxFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// What happened to a file when import was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    NotRequested,
    /// Only valid files are imported.
    Skipped,
    Imported(PathBuf),
    Conflict(PathBuf),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct ImportOptions<'a> {
    pub cache: &'a KeyboxCache,
    /// Explicit cache name; only meaningful for single-file batches.
    pub as_name: Option<String>,
    pub overwrite: bool,
}

#[derive(Debug, Clone)]
pub struct VerificationReport {
    pub name: String,
    pub status: VerificationStatus,
    pub leaf_serials: BTreeMap<Algorithm, String>,
    pub invalid_reason: Option<String>,
    pub import: ImportOutcome,
}

impl VerificationReport {
    fn invalid(name: &str, reason: String) -> Self {
        Self {
            name: name.to_string(),
            status: VerificationStatus::Invalid,
            leaf_serials: BTreeMap::new(),
            invalid_reason: Some(reason),
            import: ImportOutcome::NotRequested,
        }
    }

    /// Serial used to name an imported file: the leaf of the first algorithm
    /// in [`Algorithm`] order (ECDSA before RSA), whatever order the `Key`
    /// elements had in the document.
    pub fn first_leaf_serial(&self) -> Option<&str> {
        self.leaf_serials.values().next().map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub valid: usize,
    pub revoked: usize,
    pub invalid: usize,
    pub imported: usize,
}

impl BatchSummary {
    pub fn from_reports(reports: &[VerificationReport]) -> Self {
        let mut summary = BatchSummary::default();
        for report in reports {
            match report.status {
                VerificationStatus::Valid => summary.valid += 1,
                VerificationStatus::Revoked => summary.revoked += 1,
                VerificationStatus::Invalid => summary.invalid += 1,
            }
            if matches!(report.import, ImportOutcome::Imported(_)) {
                summary.imported += 1;
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.valid + self.revoked + self.invalid
    }
}

/// Verify every file against `revocations`, importing valid ones when
/// `import` is given. Always returns exactly one report per input, in order.
pub fn verify_batch(
    files: &[KeyboxFile],
    revocations: &RevocationList,
    import: Option<&ImportOptions<'_>>,
) -> Vec<VerificationReport> {
    files
        .iter()
        .map(|file| {
            let mut report = verify_file(file, revocations);
            if let Some(options) = import {
                report.import = import_if_valid(file, &report, options);
            }
            report
        })
        .collect()
}

/// Evaluate a single file. Never fails; errors become an `Invalid` report.
pub fn verify_file(file: &KeyboxFile, revocations: &RevocationList) -> VerificationReport {
    let keybox = match Keybox::parse(&file.bytes) {
        Ok(keybox) => keybox,
        Err(e) => {
            warn!("{}: {}", file.name, e);
            return VerificationReport::invalid(&file.name, e.to_string());
        }
    };

    let leaf_serials = extract_leaf_serials(&file.name, &keybox);
    if leaf_serials.is_empty() {
        warn!("{}: no usable leaf certificate", file.name);
        return VerificationReport::invalid(
            &file.name,
            "no usable leaf certificate in any key".to_string(),
        );
    }

    let revoked: Vec<&String> = leaf_serials
        .values()
        .filter(|serial| revocations.is_revoked(serial))
        .collect();
    let status = if revoked.is_empty() {
        VerificationStatus::Valid
    } else {
        VerificationStatus::Revoked
    };
    info!(
        "{}: {} (leaf serials: {})",
        file.name,
        status,
        leaf_serials
            .iter()
            .map(|(algorithm, serial)| format!("{}={}", algorithm, serial))
            .collect::<Vec<_>>()
            .join(", ")
    );

    VerificationReport {
        name: file.name.clone(),
        status,
        leaf_serials,
        invalid_reason: None,
        import: ImportOutcome::NotRequested,
    }
}

fn extract_leaf_serials(file_name: &str, keybox: &Keybox) -> BTreeMap<Algorithm, String> {
    let mut serials = BTreeMap::new();
    for (algorithm, entry) in &keybox.keys {
        let serial = entry
            .leaf_certificate()
            .and_then(|leaf| serial_hex(&leaf));
        match serial {
            Ok(serial) => {
                serials.insert(*algorithm, serial);
            }
            Err(e) => warn!(
                "{}: skipping {} key, leaf certificate unusable: {}",
                file_name, algorithm, e
            ),
        }
    }
    serials
}

fn import_if_valid(
    file: &KeyboxFile,
    report: &VerificationReport,
    options: &ImportOptions<'_>,
) -> ImportOutcome {
    if report.status != VerificationStatus::Valid {
        return ImportOutcome::Skipped;
    }
    let Some(serial) = report.first_leaf_serial() else {
        return ImportOutcome::Skipped;
    };
    let name = target_file_name(options.as_name.as_deref(), serial);
    match import_file(file, &name, options) {
        Ok(path) => ImportOutcome::Imported(path),
        Err(KeyboxError::ImportConflict(path)) => {
            warn!(
                "{}: not imported, {} already exists (use --force to overwrite)",
                file.name,
                path.display()
            );
            ImportOutcome::Conflict(path)
        }
        Err(e) => {
            warn!("{}: import failed: {}", file.name, e);
            ImportOutcome::Failed(e.to_string())
        }
    }
}

fn import_file(file: &KeyboxFile, name: &str, options: &ImportOptions<'_>) -> Result<PathBuf> {
    options.cache.import(&file.bytes, name, options.overwrite)
}
