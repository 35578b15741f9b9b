//! Certificate Chain Utilities
//!
//! Helpers over leaf-first certificate chains as stored in a keybox:
//!
//! ```text
//! chain[0]      leaf (end-entity / attestation CA handed to the device)
//! chain[1..n-1] intermediates
//! chain[n-1]    root
//! ```
//!
//! Certificates are held as [`openssl::x509::X509`]. OpenSSL exposes no
//! generic "extension by OID" accessor, so lookups of arbitrary extensions
//! (such as the ProvisioningInfo extension) go through `x509-parser` on the
//! certificate's DER encoding.

use openssl::nid::Nid;
use openssl::x509::{X509NameRef, X509Ref, X509};
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::error::{KeyboxError, Result};

/// A decoded X.509v3 extension: its criticality and raw `extnValue` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionValue {
    pub critical: bool,
    pub value: Vec<u8>,
}

/// Decode a single PEM certificate block.
///
/// Any PEM or DER failure is reported as [`KeyboxError::Certificate`] so that
/// callers can treat it as "no usable certificate" without aborting.
pub fn decode_pem(pem: &[u8]) -> Result<X509> {
    X509::from_pem(pem).map_err(|e| KeyboxError::Certificate(e.to_string()))
}

/// Encode a certificate as a PEM block (trailing newline included).
pub fn encode_pem(cert: &X509Ref) -> Result<String> {
    let pem = cert.to_pem()?;
    String::from_utf8(pem).map_err(|e| KeyboxError::Certificate(e.to_string()))
}

pub fn leaf_certificate(chain: &[X509]) -> Result<&X509> {
    chain.first().ok_or(KeyboxError::ChainEmpty)
}

pub fn root_certificate(chain: &[X509]) -> Result<&X509> {
    chain.last().ok_or(KeyboxError::ChainEmpty)
}

/// Canonical textual form of a serial number: lowercase hex, no `0x`
/// prefix, no leading zeros (zero itself is `"0"`).
pub fn normalize_serial(serial: &str) -> String {
    let trimmed = serial.trim();
    let without_prefix = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let digits = without_prefix.trim_start_matches('0').to_ascii_lowercase();
    if digits.is_empty() {
        "0".to_string()
    } else {
        digits
    }
}

/// Serial number of `cert` in canonical form (see [`normalize_serial`]).
pub fn serial_hex(cert: &X509Ref) -> Result<String> {
    let serial = cert.serial_number().to_bn()?;
    let hex = serial.to_hex_str()?;
    Ok(normalize_serial(&hex))
}

/// Raw key identifier from the certificate's SubjectKeyIdentifier extension.
pub fn subject_key_identifier(cert: &X509Ref) -> Option<Vec<u8>> {
    cert.subject_key_id().map(|id| id.as_slice().to_vec())
}

/// Raw key identifier from the certificate's AuthorityKeyIdentifier extension.
pub fn authority_key_identifier(cert: &X509Ref) -> Option<Vec<u8>> {
    cert.authority_key_id().map(|id| id.as_slice().to_vec())
}

/// Look up an extension by dotted OID, e.g. `"1.3.6.1.4.1.11129.2.1.30"`.
pub fn extension_by_oid(cert: &X509Ref, oid: &str) -> Result<Option<ExtensionValue>> {
    let der = cert.to_der()?;
    let (_, parsed) = X509Certificate::from_der(&der)
        .map_err(|e| KeyboxError::Certificate(e.to_string()))?;

    Ok(parsed
        .extensions()
        .iter()
        .find(|ext| ext.oid.to_id_string() == oid)
        .map(|ext| ExtensionValue {
            critical: ext.critical,
            value: ext.value.to_vec(),
        }))
}

/// Contents of the certificate's `subjectPublicKey` BIT STRING, the input to
/// the RFC 5280 method (1) key identifier hash.
pub fn public_key_bits(cert: &X509Ref) -> Result<Vec<u8>> {
    let der = cert.to_der()?;
    let (_, parsed) = X509Certificate::from_der(&der)
        .map_err(|e| KeyboxError::Certificate(e.to_string()))?;
    let bits: &[u8] = parsed.public_key().subject_public_key.data.as_ref();
    Ok(bits.to_vec())
}

/// Render a name in RFC 4514 order (most specific attribute first).
pub fn describe_name(name: &X509NameRef) -> String {
    let mut parts: Vec<String> = name
        .entries()
        .map(|entry| {
            let nid = entry.object().nid();
            let label = match nid {
                Nid::UNDEF => entry.object().to_string(),
                _ => nid
                    .short_name()
                    .map(str::to_string)
                    .unwrap_or_else(|_| entry.object().to_string()),
            };
            let value = entry
                .data()
                .to_string()
                .unwrap_or_else(|_| "<non-utf8>".to_string());
            format!("{}={}", label, value)
        })
        .collect();
    parts.reverse();
    parts.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{self_signed_ec, IssuerOptions};
    use openssl::x509::X509Name;

    #[test]
    fn test_normalize_serial_strips_padding_and_case() {
        assert_eq!(normalize_serial("A1B2C3"), "a1b2c3");
        assert_eq!(normalize_serial("00a1b2c3"), "a1b2c3");
        assert_eq!(normalize_serial("0x00A1b2C3"), "a1b2c3");
        assert_eq!(normalize_serial(" a1b2c3\n"), "a1b2c3");
        assert_eq!(normalize_serial("0000"), "0");
    }

    #[test]
    fn test_serial_hex_is_lowercase_without_leading_zeros() {
        // 0x0a0b has a leading zero nibble once rendered byte-wise
        let (_, cert) = self_signed_ec(&IssuerOptions {
            serial: 0x0a0b,
            ..IssuerOptions::default()
        });
        assert_eq!(serial_hex(&cert).unwrap(), "a0b");
    }

    #[test]
    fn test_decode_pem_rejects_garbage() {
        let err = decode_pem(b"-----BEGIN CERTIFICATE-----\nnope\n-----END CERTIFICATE-----\n")
            .unwrap_err();
        assert!(matches!(err, KeyboxError::Certificate(_)));
    }

    #[test]
    fn test_pem_round_trip_preserves_der() {
        let (_, cert) = self_signed_ec(&IssuerOptions::default());
        let pem = encode_pem(&cert).unwrap();
        let decoded = decode_pem(pem.as_bytes()).unwrap();
        assert_eq!(decoded.to_der().unwrap(), cert.to_der().unwrap());
    }

    #[test]
    fn test_leaf_and_root_of_empty_chain() {
        assert!(matches!(leaf_certificate(&[]), Err(KeyboxError::ChainEmpty)));
        assert!(matches!(root_certificate(&[]), Err(KeyboxError::ChainEmpty)));
    }

    #[test]
    fn test_leaf_is_first_and_root_is_last() {
        let (_, a) = self_signed_ec(&IssuerOptions {
            serial: 1,
            ..IssuerOptions::default()
        });
        let (_, b) = self_signed_ec(&IssuerOptions {
            serial: 2,
            ..IssuerOptions::default()
        });
        let chain = vec![a, b];
        assert_eq!(serial_hex(leaf_certificate(&chain).unwrap()).unwrap(), "1");
        assert_eq!(serial_hex(root_certificate(&chain).unwrap()).unwrap(), "2");
    }

    #[test]
    fn test_key_identifier_accessors() {
        let (_, with_ski) = self_signed_ec(&IssuerOptions::default());
        assert!(subject_key_identifier(&with_ski).is_some());

        let (_, without_ski) = self_signed_ec(&IssuerOptions {
            with_subject_key_id: false,
            ..IssuerOptions::default()
        });
        assert!(subject_key_identifier(&without_ski).is_none());
        assert!(authority_key_identifier(&without_ski).is_none());
    }

    #[test]
    fn test_extension_by_oid_finds_basic_constraints() {
        let (_, cert) = self_signed_ec(&IssuerOptions::default());
        let bc = extension_by_oid(&cert, "2.5.29.19").unwrap().unwrap();
        assert!(bc.critical);
        assert!(extension_by_oid(&cert, "1.2.3.4").unwrap().is_none());
    }

    #[test]
    fn test_describe_name_is_most_specific_first() {
        let (_, cert) = self_signed_ec(&IssuerOptions::default());
        assert_eq!(
            describe_name(cert.subject_name()),
            "CN=Test Attestation Root,O=Keybox Tests"
        );
    }

    #[test]
    fn test_describe_name_keeps_interior_nul() {
        let mut name = X509Name::builder().unwrap();
        name.append_entry_by_text("CN", "a\u{0}b").unwrap();
        let name = name.build();
        assert_eq!(describe_name(&name), "CN=a\u{0}b");
    }
}
