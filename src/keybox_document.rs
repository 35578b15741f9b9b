//! Keybox XML Document
//!
//! Parses and serializes the attestation keybox format:
//!
//! ```text
//! <?xml version="1.0"?>
//! <AndroidAttestation>
//!     <NumberOfKeyboxes>1</NumberOfKeyboxes>
//!     <Keybox DeviceID="...">
//!         <Key algorithm="ecdsa">
//!             <PrivateKey format="pem">...</PrivateKey>
//!             <CertificateChain>
//!                 <NumberOfCertificates>3</NumberOfCertificates>
//!                 <Certificate format="pem">leaf</Certificate>
//!                 <Certificate format="pem">intermediate</Certificate>
//!                 <Certificate format="pem">root</Certificate>
//!             </CertificateChain>
//!         </Key>
//!         <Key algorithm="rsa">...</Key>
//!     </Keybox>
//! </AndroidAttestation>
//! ```
//!
//! `NumberOfCertificates` is informational only. On parse the chain length is
//! the number of certificate blocks actually present; on serialize the count
//! is regenerated from the chain.
//!
//! Certificates and private keys are kept as normalized PEM text and decoded
//! on demand, so one undecodable certificate does not make the rest of the
//! document unreadable.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use log::warn;
use openssl::pkey::{Id, PKey, PKeyRef, Private};
use openssl::x509::X509;
use serde::{Deserialize, Serialize};

use crate::certificate_chain::{decode_pem, encode_pem};
use crate::error::{KeyboxError, Result};

const XML_DECLARATION: &str = "<?xml version=\"1.0\"?>\n";
const ROOT_ELEMENT: &str = "AndroidAttestation";
const PEM_FORMAT: &str = "pem";

/// Key algorithm slot of a keybox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Algorithm {
    Ecdsa,
    Rsa,
}

impl Algorithm {
    pub const ALL: [Algorithm; 2] = [Algorithm::Ecdsa, Algorithm::Rsa];

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Ecdsa => "ecdsa",
            Algorithm::Rsa => "rsa",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = KeyboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ecdsa" => Ok(Algorithm::Ecdsa),
            "rsa" => Ok(Algorithm::Rsa),
            other => Err(KeyboxError::Parse(format!(
                "unknown key algorithm '{}'",
                other
            ))),
        }
    }
}

/// One algorithm slot: a private key and its leaf-first certificate chain.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyEntry {
    /// PEM private key; empty when the document carried none.
    pub private_key_pem: String,
    /// PEM certificate blocks, leaf first. Empty when the leaf is missing.
    pub chain: Vec<String>,
}

impl KeyEntry {
    /// Build an entry from a live key and chain.
    ///
    /// EC and RSA keys are written in the traditional OpenSSL form
    /// (`EC PRIVATE KEY` / `RSA PRIVATE KEY`) that keybox consumers expect.
    pub fn new(private_key: &PKeyRef<Private>, chain: &[X509]) -> Result<Self> {
        let pem = match private_key.id() {
            Id::EC => private_key.ec_key()?.private_key_to_pem()?,
            Id::RSA => private_key.rsa()?.private_key_to_pem()?,
            _ => private_key.private_key_to_pem_pkcs8()?,
        };
        let private_key_pem =
            String::from_utf8(pem).map_err(|e| KeyboxError::PrivateKey(e.to_string()))?;
        let chain = chain
            .iter()
            .map(|cert| encode_pem(cert))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            private_key_pem,
            chain,
        })
    }

    pub fn private_key(&self) -> Result<PKey<Private>> {
        if self.private_key_pem.is_empty() {
            return Err(KeyboxError::PrivateKey(
                "no PrivateKey element present".to_string(),
            ));
        }
        PKey::private_key_from_pem(self.private_key_pem.as_bytes())
            .map_err(|e| KeyboxError::PrivateKey(e.to_string()))
    }

    /// Decode every certificate in the chain, leaf first.
    pub fn certificates(&self) -> Result<Vec<X509>> {
        self.chain
            .iter()
            .map(|pem| decode_pem(pem.as_bytes()))
            .collect()
    }

    /// Decode only the leaf certificate.
    pub fn leaf_certificate(&self) -> Result<X509> {
        let pem = self.chain.first().ok_or(KeyboxError::ChainEmpty)?;
        decode_pem(pem.as_bytes())
    }
}

impl fmt::Debug for KeyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyEntry")
            .field("private_key", &"<redacted>")
            .field("chain_len", &self.chain.len())
            .finish()
    }
}

/// A parsed keybox: device id plus at most one [`KeyEntry`] per algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Keybox {
    pub device_id: String,
    pub keys: BTreeMap<Algorithm, KeyEntry>,
}

impl Keybox {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            keys: BTreeMap::new(),
        }
    }

    pub fn key(&self, algorithm: Algorithm) -> Option<&KeyEntry> {
        self.keys.get(&algorithm)
    }

    /// Insert or replace the entry for `algorithm`, returning the old one.
    pub fn insert(&mut self, algorithm: Algorithm, entry: KeyEntry) -> Option<KeyEntry> {
        self.keys.insert(algorithm, entry)
    }

    /// Parse a keybox document.
    ///
    /// Accepts zero, one or two `Key` elements. A `Key` without a leaf
    /// certificate still yields an entry (with an empty chain). Keys with an
    /// unrecognised `algorithm` are skipped; a repeated algorithm is an error.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| KeyboxError::Parse(format!("document is not UTF-8: {}", e)))?;
        let text = text.trim_start_matches('\u{feff}');

        let document: AttestationXml =
            quick_xml::de::from_str(text).map_err(|e| KeyboxError::Parse(e.to_string()))?;

        let mut keybox = Keybox::new(document.keybox.device_id);
        for key in document.keybox.keys {
            let algorithm = match key.algorithm.parse::<Algorithm>() {
                Ok(algorithm) => algorithm,
                Err(_) => {
                    warn!(
                        "Skipping key with unsupported algorithm '{}'",
                        key.algorithm
                    );
                    continue;
                }
            };
            if keybox.keys.contains_key(&algorithm) {
                return Err(KeyboxError::Parse(format!(
                    "duplicate Key element for algorithm '{}'",
                    algorithm
                )));
            }

            let private_key_pem = key
                .private_key
                .map(|pem| normalize_pem(&pem.text))
                .unwrap_or_default();

            let blocks: Vec<String> = key
                .chain
                .map(|chain| chain.certificates)
                .unwrap_or_default()
                .iter()
                .map(|pem| normalize_pem(&pem.text))
                .collect();
            let chain = match blocks.first() {
                Some(leaf) if !leaf.is_empty() => {
                    blocks.into_iter().filter(|pem| !pem.is_empty()).collect()
                }
                _ => {
                    warn!(
                        "Key with algorithm '{}' is missing its leaf certificate",
                        algorithm
                    );
                    Vec::new()
                }
            };

            keybox.insert(
                algorithm,
                KeyEntry {
                    private_key_pem,
                    chain,
                },
            );
        }
        Ok(keybox)
    }

    /// Serialize to a keybox document, one `Key` per populated algorithm.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let document = AttestationXml {
            number_of_keyboxes: Some("1".to_string()),
            keybox: KeyboxXml {
                device_id: self.device_id.clone(),
                keys: self
                    .keys
                    .iter()
                    .map(|(algorithm, entry)| KeyXml {
                        algorithm: algorithm.to_string(),
                        private_key: Some(PemXml::new(&entry.private_key_pem)),
                        chain: Some(ChainXml {
                            count: Some(entry.chain.len().to_string()),
                            certificates: entry.chain.iter().map(|pem| PemXml::new(pem)).collect(),
                        }),
                    })
                    .collect(),
            },
        };

        let mut body = String::new();
        let mut serializer = quick_xml::se::Serializer::with_root(&mut body, Some(ROOT_ELEMENT))
            .map_err(|e| KeyboxError::Parse(e.to_string()))?;
        serializer.indent('\t', 1);
        document
            .serialize(serializer)
            .map_err(|e| KeyboxError::Parse(e.to_string()))?;

        let mut out = String::with_capacity(XML_DECLARATION.len() + body.len() + 1);
        out.push_str(XML_DECLARATION);
        out.push_str(&body);
        out.push('\n');
        Ok(out.into_bytes())
    }
}

/// Trim every line, drop blank lines, terminate with a newline.
fn normalize_pem(text: &str) -> String {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    if lines.is_empty() {
        return String::new();
    }
    let mut pem = lines.join("\n");
    pem.push('\n');
    pem
}

#[derive(Debug, Deserialize, Serialize)]
struct AttestationXml {
    #[serde(
        rename = "NumberOfKeyboxes",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    number_of_keyboxes: Option<String>,
    #[serde(rename = "Keybox")]
    keybox: KeyboxXml,
}

#[derive(Debug, Deserialize, Serialize)]
struct KeyboxXml {
    #[serde(rename = "@DeviceID", default)]
    device_id: String,
    #[serde(rename = "Key", default)]
    keys: Vec<KeyXml>,
}

#[derive(Debug, Deserialize, Serialize)]
struct KeyXml {
    #[serde(rename = "@algorithm", default)]
    algorithm: String,
    #[serde(rename = "PrivateKey", default, skip_serializing_if = "Option::is_none")]
    private_key: Option<PemXml>,
    #[serde(
        rename = "CertificateChain",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    chain: Option<ChainXml>,
}

#[derive(Debug, Deserialize, Serialize)]
struct ChainXml {
    #[serde(
        rename = "NumberOfCertificates",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    count: Option<String>,
    #[serde(rename = "Certificate", default)]
    certificates: Vec<PemXml>,
}

#[derive(Debug, Deserialize, Serialize)]
struct PemXml {
    #[serde(rename = "@format", default, skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    #[serde(rename = "$text", default)]
    text: String,
}

impl PemXml {
    fn new(pem: &str) -> Self {
        Self {
            format: Some(PEM_FORMAT.to_string()),
            text: format!("\n{}", pem),
        }
    }
}
