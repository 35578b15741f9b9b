//! X.509v3 extensions assembled from raw DER.
//!
//! The forged CA certificates carry two extensions whose exact bytes matter
//! to downstream validators: the AuthorityKeyIdentifier (which must repeat
//! the issuer's key identifier byte for byte) and the vendor
//! ProvisioningInfo extension. Both are built here as an explicit
//! `{oid, critical, value}` triple and only converted to an OpenSSL
//! extension object at the last moment.

use ciborium::value::Value;
use openssl::asn1::{Asn1Object, Asn1OctetString};
use openssl::x509::X509Extension;
use rand::Rng;
use x509_cert::der::asn1::OctetString;
use x509_cert::der::Encode;
use x509_cert::ext::pkix::AuthorityKeyIdentifier;

use crate::error::{KeyboxError, Result};

pub const AUTHORITY_KEY_IDENTIFIER_OID: &str = "2.5.29.35";
pub const PROVISIONING_INFO_OID: &str = "1.3.6.1.4.1.11129.2.1.30";

/// ProvisioningInfo map keys.
const CERTS_ISSUED_KEY: i128 = 1;
const MANUFACTURER_KEY: i128 = 3;

pub const PROVISIONING_MANUFACTURER: &str = "Google";
const CERTS_ISSUED_MIN: u32 = 5;
const CERTS_ISSUED_MAX: u32 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawExtension {
    pub oid: &'static str,
    pub critical: bool,
    /// Contents of the `extnValue` OCTET STRING.
    pub value: Vec<u8>,
}

impl RawExtension {
    /// Non-critical AuthorityKeyIdentifier carrying only `keyIdentifier`.
    ///
    /// ```text
    /// AuthorityKeyIdentifier ::= SEQUENCE {
    ///     keyIdentifier [0] IMPLICIT OCTET STRING }
    /// ```
    pub fn authority_key_identifier(key_id: &[u8]) -> Result<Self> {
        let aki = AuthorityKeyIdentifier {
            key_identifier: Some(OctetString::new(key_id.to_vec()).map_err(der_error)?),
            authority_cert_issuer: None,
            authority_cert_serial_number: None,
        };
        Ok(Self {
            oid: AUTHORITY_KEY_IDENTIFIER_OID,
            critical: false,
            value: aki.to_der().map_err(der_error)?,
        })
    }

    pub fn to_x509_extension(&self) -> Result<X509Extension> {
        let oid = Asn1Object::from_str(self.oid)?;
        let contents = Asn1OctetString::new_from_bytes(&self.value)?;
        Ok(X509Extension::new_from_der(&oid, self.critical, &contents)?)
    }
}

/// Vendor provisioning metadata: CBOR map `{1: certs_issued, 3: manufacturer}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningInfo {
    pub certs_issued: u32,
    pub manufacturer: String,
}

impl ProvisioningInfo {
    /// A plausible "certificates issued" counter in `[5, 60]`.
    pub fn random() -> Self {
        let certs_issued = rand::thread_rng().gen_range(CERTS_ISSUED_MIN..=CERTS_ISSUED_MAX);
        Self {
            certs_issued,
            manufacturer: PROVISIONING_MANUFACTURER.to_string(),
        }
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let map = Value::Map(vec![
            (
                Value::Integer(CERTS_ISSUED_KEY.try_into().map_err(cbor_error)?),
                Value::Integer(self.certs_issued.into()),
            ),
            (
                Value::Integer(MANUFACTURER_KEY.try_into().map_err(cbor_error)?),
                Value::Text(self.manufacturer.clone()),
            ),
        ]);
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&map, &mut bytes).map_err(cbor_error)?;
        Ok(bytes)
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        let value: Value = ciborium::de::from_reader(bytes).map_err(cbor_error)?;
        let entries = match value {
            Value::Map(entries) => entries,
            _ => return Err(KeyboxError::Cbor("payload is not a map".to_string())),
        };

        let mut certs_issued = None;
        let mut manufacturer = None;
        for (key, value) in entries {
            let key = match key.as_integer() {
                Some(key) => i128::from(key),
                None => continue,
            };
            match key {
                CERTS_ISSUED_KEY => {
                    let count = value
                        .as_integer()
                        .map(i128::from)
                        .and_then(|n| u32::try_from(n).ok())
                        .ok_or_else(|| KeyboxError::Cbor("key 1 is not a count".to_string()))?;
                    certs_issued = Some(count);
                }
                MANUFACTURER_KEY => {
                    let name = value
                        .as_text()
                        .ok_or_else(|| KeyboxError::Cbor("key 3 is not text".to_string()))?;
                    manufacturer = Some(name.to_string());
                }
                _ => {}
            }
        }

        Ok(Self {
            certs_issued: certs_issued
                .ok_or_else(|| KeyboxError::Cbor("missing key 1".to_string()))?,
            manufacturer: manufacturer
                .ok_or_else(|| KeyboxError::Cbor("missing key 3".to_string()))?,
        })
    }

    pub fn to_raw_extension(&self) -> Result<RawExtension> {
        Ok(RawExtension {
            oid: PROVISIONING_INFO_OID,
            critical: false,
            value: self.to_cbor()?,
        })
    }
}

fn cbor_error<E: std::fmt::Display>(e: E) -> KeyboxError {
    KeyboxError::Cbor(e.to_string())
}

fn der_error(e: x509_cert::der::Error) -> KeyboxError {
    KeyboxError::Encoding(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provisioning_info_cbor_layout() {
        let info = ProvisioningInfo {
            certs_issued: 42,
            manufacturer: "Google".to_string(),
        };
        // {1: 42, 3: "Google"}
        let expected = [
            0xa2, 0x01, 0x18, 0x2a, 0x03, 0x66, b'G', b'o', b'o', b'g', b'l', b'e',
        ];
        assert_eq!(info.to_cbor().unwrap(), expected);
        assert_eq!(ProvisioningInfo::from_cbor(&expected).unwrap(), info);
    }

    #[test]
    fn test_random_counter_stays_in_range() {
        for _ in 0..200 {
            let info = ProvisioningInfo::random();
            assert!((5..=60).contains(&info.certs_issued));
            assert_eq!(info.manufacturer, "Google");
        }
    }

    #[test]
    fn test_from_cbor_rejects_non_map() {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&Value::Text("x".into()), &mut bytes).unwrap();
        assert!(matches!(
            ProvisioningInfo::from_cbor(&bytes),
            Err(KeyboxError::Cbor(_))
        ));
    }

    #[test]
    fn test_authority_key_identifier_der() {
        let ext = RawExtension::authority_key_identifier(&[0xde, 0xad]).unwrap();
        assert_eq!(ext.value, vec![0x30, 0x04, 0x80, 0x02, 0xde, 0xad]);
        assert!(!ext.critical);
        ext.to_x509_extension().unwrap();
    }

    #[test]
    fn test_authority_key_identifier_long_key_id() {
        // 200-byte identifier forces long-form DER lengths
        let key_id = vec![0xab; 200];
        let ext = RawExtension::authority_key_identifier(&key_id).unwrap();
        assert_eq!(&ext.value[..6], &[0x30, 0x81, 0xcb, 0x80, 0x81, 0xc8]);
        assert_eq!(&ext.value[6..], key_id.as_slice());
    }
}
