//! Error taxonomy for keybox handling.
//!
//! Per-file failures during batch verification are folded into that file's
//! report; every other variant is fatal to the command that produced it.

use std::path::PathBuf;

use thiserror::Error;

use crate::keybox_document::Algorithm;

#[derive(Debug, Error)]
pub enum KeyboxError {
    /// Malformed XML or a keybox structure that cannot be represented.
    #[error("failed to parse keybox: {0}")]
    Parse(String),

    /// A certificate block is not valid PEM/DER.
    #[error("failed to decode certificate: {0}")]
    Certificate(String),

    /// A private key block is missing or cannot be decoded.
    #[error("failed to decode private key: {0}")]
    PrivateKey(String),

    #[error("certificate chain has no leaf certificate")]
    ChainEmpty,

    #[error("keybox does not contain a private key for algorithm '{0}'")]
    MissingSigningKey(Algorithm),

    /// The revocation list could not be obtained (transport, timeout, HTTP status).
    #[error("failed to fetch revocation list: {0}")]
    Network(String),

    /// The revocation service answered but the payload is unusable.
    #[error("revocation list is malformed: {0}")]
    RevocationListMalformed(String),

    #[error("'{}' already exists in the keybox cache; overwrite was not requested", .0.display())]
    ImportConflict(PathBuf),

    /// A cache entry name that is not a single plain file name.
    #[error("invalid keybox cache name '{0}'")]
    InvalidCacheName(String),

    #[error("invalid hex serial number '{0}'")]
    InvalidSerial(String),

    #[error("invalid distinguished name '{0}': {1}")]
    InvalidSubject(String, String),

    /// The ProvisioningInfo CBOR payload could not be encoded or decoded.
    #[error("ProvisioningInfo CBOR error: {0}")]
    Cbor(String),

    #[error("DER encoding failed: {0}")]
    Encoding(String),

    #[error("cryptographic operation failed: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, KeyboxError>;
