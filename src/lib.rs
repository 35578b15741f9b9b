//! Keybox Chain - Attestation Keybox Certificate-Chain Manager
//!
//! Verifies locally held attestation keyboxes against the published revocation
//! list and forges new CA certificates that extend an existing, trusted signing
//! chain with fresh key material.
//!
//! # Overview
//!
//! A keybox bundles one private key and one leaf-first certificate chain per
//! algorithm slot (`ecdsa`, `rsa`). Extending a keybox inserts a freshly forged
//! CA in front of the original chain:
//!
//! ```text
//! original root
//!   └── ... intermediates ...
//!       └── original leaf (signer)
//!           ├── new ECDSA P-256 CA  ← forged
//!           └── new RSA-2048 CA     ← forged
//! ```
//!
//! # Features
//!
//! - 📄 **Keybox XML**: Tolerant parsing and canonical serialization
//! - 🚫 **Revocation Checks**: One fetch per batch, normalized serial matching
//! - 🔗 **Chain Extension**: SKI/AKI linkage preserved byte for byte
//! - 🏷️ **ProvisioningInfo**: CBOR vendor extension at `1.3.6.1.4.1.11129.2.1.30`
//! - 🗄️ **Local Cache**: Flat `.xml` store with backups on forced overwrite
//!
//! # Quick Start
//!
//! ```bash
//! # Check every keybox in a directory against the live revocation list
//! keybox-chain verify ./keyboxes
//!
//! # Verify and keep a valid keybox in the local cache
//! keybox-chain import device.xml --as pixel
//!
//! # Forge a new two-slot keybox signed by the input's ECDSA key
//! keybox-chain extend --input device.xml --output extended.xml --sign-with ecdsa
//! ```
//!
//! # Module Overview
//!
//! ## [`keybox_document`]
//!
//! ```no_run
//! use keybox_chain::keybox_document::{Algorithm, Keybox};
//!
//! let keybox = Keybox::parse(&std::fs::read("device.xml")?)?;
//! if let Some(entry) = keybox.key(Algorithm::Ecdsa) {
//!     println!("ecdsa chain has {} certificates", entry.chain.len());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## [`revocation`] and [`verification`]
//!
//! ```no_run
//! use keybox_chain::revocation::{RevocationList, DEFAULT_FETCH_TIMEOUT, DEFAULT_REVOCATION_URL};
//! use keybox_chain::verification::{verify_batch, BatchSummary, KeyboxFile};
//!
//! let list = RevocationList::fetch(DEFAULT_REVOCATION_URL, DEFAULT_FETCH_TIMEOUT)?;
//! let files = vec![KeyboxFile::new("device.xml", std::fs::read("device.xml")?)];
//! let reports = verify_batch(&files, &list, None);
//! let summary = BatchSummary::from_reports(&reports);
//! println!("{} valid, {} revoked", summary.valid, summary.revoked);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## [`chain_forge`]
//!
//! ```no_run
//! use keybox_chain::chain_forge::{extend_keybox, ExtendOptions};
//! use keybox_chain::keybox_document::{Algorithm, Keybox};
//!
//! let input = Keybox::parse(&std::fs::read("device.xml")?)?;
//! let output = extend_keybox(&input, &ExtendOptions::new(Algorithm::Rsa))?;
//! std::fs::write("extended.xml", output.serialize()?)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Error Handling
//!
//! Library APIs return [`error::Result`] with a [`error::KeyboxError`] kind so
//! callers can tell a network failure from a malformed revocation list, or a
//! missing signing key from an empty chain. Batch verification never returns an
//! error for a single bad file; it reports that file as `Invalid` instead.

pub mod certificate_chain;
pub mod chain_forge;
pub mod configs;
pub mod error;
pub mod keybox_cache;
pub mod keybox_document;
pub mod raw_extension;
pub mod revocation;
pub mod verification;

#[cfg(test)]
mod test_support;
