//! Chain Forge
//!
//! Builds new CA certificates that extend an existing, trusted attestation
//! chain with fresh key material.
//!
//! # Chain Position
//! ```text
//! original root
//!   └── ... intermediates ...
//!       └── original leaf (issuer, key taken from the input keybox)
//!           └── new CA certificate ← This module
//! ```
//!
//! # Certificate Properties
//! - **Signed by**: the input keybox's private key for the chosen algorithm
//! - **Issuer**: subject of the input chain's leaf certificate
//! - **Subject**: caller supplied, or `title=TEE, serialNumber=<random 128-bit hex>`
//! - **Serial Number**: caller supplied hex, or a random 159-bit positive integer
//! - **Validity**: not-before 200 days ago, not-after 3650 days ahead
//! - **Basic Constraints**: CA=true, no path length, critical
//! - **Key Usage**: keyCertSign only, critical
//! - **Subject Key Identifier**: hash of the new public key
//! - **Authority Key Identifier**: the issuer's SKI bytes, or a hash of the
//!   issuer public key when the issuer carries no SKI
//! - **ProvisioningInfo**: `1.3.6.1.4.1.11129.2.1.30`, CBOR `{1: 5..=60, 3: "Google"}`
//! - **Signature**: SHA-256 with the signer's key type (ECDSA or RSA)
//!
//! # Example
//! ```rust,no_run
//! # use keybox_chain::chain_forge::{extend_keybox, ExtendOptions};
//! # use keybox_chain::keybox_document::{Algorithm, Keybox};
//! # fn example(input: &Keybox) -> keybox_chain::error::Result<()> {
//! let options = ExtendOptions::new(Algorithm::Ecdsa).ecdsa_serial(Some("deadbeef".to_string()));
//! let extended = extend_keybox(input, &options)?;
//! let xml = extended.serialize()?;
//! # Ok(())
//! # }
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, PKeyRef, Private, Public};
use openssl::rsa::Rsa;
use openssl::x509::extension::{BasicConstraints, KeyUsage, SubjectKeyIdentifier};
use openssl::x509::{X509Name, X509Ref, X509};

use crate::certificate_chain::{
    leaf_certificate, normalize_serial, public_key_bits, subject_key_identifier,
};
use crate::error::{KeyboxError, Result};
use crate::keybox_document::{Algorithm, KeyEntry, Keybox};
use crate::raw_extension::{ProvisioningInfo, RawExtension};

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2
const SERIAL_NUMBER_BITS: i32 = 159;
const SUBJECT_SERIAL_BITS: i32 = 128;
const NOT_BEFORE_DAYS_AGO: i64 = 200;
const VALIDITY_DAYS: i64 = 3650;
const SECONDS_PER_DAY: i64 = 86_400;

pub const RSA_KEY_SIZE: u32 = 2048;
pub const DEFAULT_SUBJECT_TITLE: &str = "TEE";
pub const DEFAULT_DEVICE_ID: &str = "generated-ca";

// ================= Authority Key Identifier =================

/// Where the new certificate's AuthorityKeyIdentifier comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityKeyIdSource {
    /// Copied verbatim from the issuer's SubjectKeyIdentifier.
    IssuerSubjectKeyId(Vec<u8>),
    /// Derived as SHA-1 over the issuer's public key bits. Only taken when
    /// the issuer certificate has no SubjectKeyIdentifier.
    IssuerPublicKey(Vec<u8>),
}

impl AuthorityKeyIdSource {
    pub fn for_issuer(issuer: &X509Ref) -> Result<Self> {
        if let Some(ski) = subject_key_identifier(issuer) {
            return Ok(AuthorityKeyIdSource::IssuerSubjectKeyId(ski));
        }
        let bits = public_key_bits(issuer)?;
        Ok(AuthorityKeyIdSource::IssuerPublicKey(
            openssl::sha::sha1(&bits).to_vec(),
        ))
    }

    pub fn key_id(&self) -> &[u8] {
        match self {
            AuthorityKeyIdSource::IssuerSubjectKeyId(id) => id,
            AuthorityKeyIdSource::IssuerPublicKey(id) => id,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, AuthorityKeyIdSource::IssuerPublicKey(_))
    }
}

// ================= New CA Certificate =================

/// Everything needed to forge one CA certificate under an existing issuer.
///
/// # Examples
/// ```rust,no_run
/// # use keybox_chain::chain_forge::NewCaCertSpec;
/// # use openssl::pkey::{PKey, Private, Public};
/// # use openssl::x509::X509;
/// # fn example(issuer: X509, signer: PKey<Private>, new_key: PKey<Public>) -> keybox_chain::error::Result<()> {
/// let cert = NewCaCertSpec::new(issuer, signer, new_key)
///     .subject(Some("CN=Droid CA2,O=Google".to_string()))
///     .serial(Some("deadbeef".to_string()))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct NewCaCertSpec {
    subject: Option<String>,
    serial: Option<String>,
    issuer_cert: X509,
    signing_key: PKey<Private>,
    public_key: PKey<Public>,
}

impl NewCaCertSpec {
    /// # Arguments
    /// * `issuer_cert` - Leaf certificate of the chain being extended
    /// * `signing_key` - Private key matching `issuer_cert`
    /// * `public_key` - Public key the new certificate certifies
    pub fn new(issuer_cert: X509, signing_key: PKey<Private>, public_key: PKey<Public>) -> Self {
        Self {
            subject: None,
            serial: None,
            issuer_cert,
            signing_key,
            public_key,
        }
    }

    /// RFC 4514 subject override (e.g. `"CN=Example CA,O=Example"`).
    pub fn subject(mut self, subject: Option<String>) -> Self {
        self.subject = subject;
        self
    }

    /// Hex serial override (e.g. `"deadbeef"`).
    pub fn serial(mut self, serial_hex: Option<String>) -> Self {
        self.serial = serial_hex;
        self
    }

    /// Assemble and sign the certificate.
    ///
    /// # Errors
    /// - [`KeyboxError::InvalidSerial`] when the serial override is not hex
    /// - [`KeyboxError::InvalidSubject`] when the subject override cannot be parsed
    /// - [`KeyboxError::Crypto`] when OpenSSL fails to build or sign
    pub fn build(&self) -> Result<X509> {
        let mut builder = X509::builder()?;
        builder.set_version(X509_VERSION_3)?;

        let serial = match &self.serial {
            Some(hex) => parse_serial_hex(hex)?,
            None => random_serial()?,
        };
        let serial = serial.to_asn1_integer()?;
        builder.set_serial_number(&serial)?;

        let subject = match &self.subject {
            Some(dn) => parse_distinguished_name(dn)?,
            None => default_subject()?,
        };
        builder.set_subject_name(&subject)?;
        builder.set_issuer_name(self.issuer_cert.subject_name())?;

        let now = unix_now()?;
        let not_before = Asn1Time::from_unix(now - NOT_BEFORE_DAYS_AGO * SECONDS_PER_DAY)?;
        builder.set_not_before(&not_before)?;
        let not_after = Asn1Time::from_unix(now + VALIDITY_DAYS * SECONDS_PER_DAY)?;
        builder.set_not_after(&not_after)?;

        builder.set_pubkey(&self.public_key)?;

        let ski = SubjectKeyIdentifier::new().build(&builder.x509v3_context(None, None))?;
        builder.append_extension(ski)?;

        let aki_source = AuthorityKeyIdSource::for_issuer(&self.issuer_cert)?;
        if aki_source.is_fallback() {
            warn!(
                "Issuer certificate has no SubjectKeyIdentifier; deriving AuthorityKeyIdentifier from the issuer public key"
            );
        }
        let aki = RawExtension::authority_key_identifier(aki_source.key_id())?;
        builder.append_extension(aki.to_x509_extension()?)?;

        let bc = BasicConstraints::new().critical().ca().build()?;
        builder.append_extension(bc)?;

        let ku = KeyUsage::new().critical().key_cert_sign().build()?;
        builder.append_extension(ku)?;

        let provisioning = ProvisioningInfo::random();
        debug!(
            "ProvisioningInfo certs_issued={} manufacturer={}",
            provisioning.certs_issued, provisioning.manufacturer
        );
        builder.append_extension(provisioning.to_raw_extension()?.to_x509_extension()?)?;

        builder.sign(&self.signing_key, MessageDigest::sha256())?;
        Ok(builder.build())
    }
}

pub fn create_ca_cert(spec: &NewCaCertSpec) -> Result<X509> {
    spec.build()
}

/// Forge a CA certificate for `new_public_key` under the leaf of
/// `signer_chain` and return it with its chain `[new_cert] ++ signer_chain`.
pub fn extend_chain(
    signer_private_key: &PKeyRef<Private>,
    signer_chain: &[X509],
    new_public_key: &PKeyRef<Public>,
    subject: Option<String>,
    serial_hex: Option<String>,
) -> Result<(X509, Vec<X509>)> {
    let issuer = leaf_certificate(signer_chain)?.clone();
    let cert = NewCaCertSpec::new(
        issuer,
        signer_private_key.to_owned(),
        new_public_key.to_owned(),
    )
    .subject(subject)
    .serial(serial_hex)
    .build()?;

    let mut chain = Vec::with_capacity(signer_chain.len() + 1);
    chain.push(cert.clone());
    chain.extend(signer_chain.iter().cloned());
    Ok((cert, chain))
}

// ================= Extend-CA orchestration =================

/// Options for [`extend_keybox`].
#[derive(Debug, Clone)]
pub struct ExtendOptions {
    pub sign_with: Algorithm,
    pub device_id: String,
    pub ecdsa_subject: Option<String>,
    pub ecdsa_serial: Option<String>,
    pub rsa_subject: Option<String>,
    pub rsa_serial: Option<String>,
}

impl ExtendOptions {
    pub fn new(sign_with: Algorithm) -> Self {
        Self {
            sign_with,
            device_id: DEFAULT_DEVICE_ID.to_string(),
            ecdsa_subject: None,
            ecdsa_serial: None,
            rsa_subject: None,
            rsa_serial: None,
        }
    }

    pub fn device_id(mut self, device_id: String) -> Self {
        self.device_id = device_id;
        self
    }

    pub fn ecdsa_subject(mut self, subject: Option<String>) -> Self {
        self.ecdsa_subject = subject;
        self
    }

    pub fn ecdsa_serial(mut self, serial_hex: Option<String>) -> Self {
        self.ecdsa_serial = serial_hex;
        self
    }

    pub fn rsa_subject(mut self, subject: Option<String>) -> Self {
        self.rsa_subject = subject;
        self
    }

    pub fn rsa_serial(mut self, serial_hex: Option<String>) -> Self {
        self.rsa_serial = serial_hex;
        self
    }
}

/// Build a new two-slot keybox whose keys are certified by `input`.
///
/// One P-256 and one RSA-2048 keypair are always generated, both certified
/// by the single signer selected by `options.sign_with`.
///
/// # Errors
/// - [`KeyboxError::MissingSigningKey`] if the input has no such algorithm
/// - [`KeyboxError::ChainEmpty`] if that algorithm's chain has no leaf
pub fn extend_keybox(input: &Keybox, options: &ExtendOptions) -> Result<Keybox> {
    let signer = input
        .key(options.sign_with)
        .ok_or(KeyboxError::MissingSigningKey(options.sign_with))?;
    if signer.chain.is_empty() {
        return Err(KeyboxError::ChainEmpty);
    }
    let signer_chain = signer.certificates()?;
    let signer_key = signer.private_key()?;
    info!(
        "Signing with the {} key of '{}' (chain of {} certificates)",
        options.sign_with,
        input.device_id,
        signer_chain.len()
    );

    info!("Generating new ECDSA and RSA keypairs...");
    let new_keys = [
        (
            Algorithm::Ecdsa,
            generate_ec_key()?,
            &options.ecdsa_subject,
            &options.ecdsa_serial,
        ),
        (
            Algorithm::Rsa,
            generate_rsa_key()?,
            &options.rsa_subject,
            &options.rsa_serial,
        ),
    ];

    let mut output = Keybox::new(options.device_id.clone());
    for (algorithm, private_key, subject, serial) in new_keys {
        let public_key = public_key_of(&private_key)?;
        let (_, chain) = extend_chain(
            &signer_key,
            &signer_chain,
            &public_key,
            subject.clone(),
            serial.clone(),
        )?;
        info!(
            "Forged {} CA certificate, chain length {}",
            algorithm,
            chain.len()
        );
        output.insert(algorithm, KeyEntry::new(&private_key, &chain)?);
    }
    Ok(output)
}

// ================= Key and field helpers =================

pub fn generate_ec_key() -> Result<PKey<Private>> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
    Ok(PKey::from_ec_key(EcKey::generate(&group)?)?)
}

pub fn generate_rsa_key() -> Result<PKey<Private>> {
    Ok(PKey::from_rsa(Rsa::generate(RSA_KEY_SIZE)?)?)
}

pub fn public_key_of(private_key: &PKeyRef<Private>) -> Result<PKey<Public>> {
    let der = private_key.public_key_to_der()?;
    Ok(PKey::public_key_from_der(&der)?)
}

fn parse_serial_hex(serial: &str) -> Result<BigNum> {
    let trimmed = serial.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(KeyboxError::InvalidSerial(serial.to_string()));
    }
    BigNum::from_hex_str(digits).map_err(|_| KeyboxError::InvalidSerial(serial.to_string()))
}

fn random_serial() -> Result<BigNum> {
    let mut serial = BigNum::new()?;
    serial.rand(SERIAL_NUMBER_BITS, MsbOption::MAYBE_ZERO, false)?;
    Ok(serial)
}

fn default_subject() -> Result<X509Name> {
    let mut random = BigNum::new()?;
    random.rand(SUBJECT_SERIAL_BITS, MsbOption::MAYBE_ZERO, false)?;
    let serial_attr = normalize_serial(&random.to_hex_str()?);

    let mut name = X509Name::builder()?;
    name.append_entry_by_nid(Nid::TITLE, DEFAULT_SUBJECT_TITLE)?;
    name.append_entry_by_nid(Nid::SERIALNUMBER, &serial_attr)?;
    Ok(name.build())
}

/// Parse an RFC 4514 string. Attributes are listed most specific first, so
/// they are appended in reverse.
fn parse_distinguished_name(dn: &str) -> Result<X509Name> {
    let invalid = |reason: String| KeyboxError::InvalidSubject(dn.to_string(), reason);

    let mut attributes = Vec::new();
    for component in split_unescaped(dn, ',') {
        let component = component.trim();
        if component.is_empty() {
            return Err(invalid("empty attribute".to_string()));
        }
        if split_unescaped(component, '+').len() > 1 {
            return Err(invalid("multi-valued RDNs are not supported".to_string()));
        }
        let key = split_unescaped(component, '=')[0];
        if key.len() == component.len() {
            return Err(invalid(format!("'{}' is not TYPE=value", component)));
        }
        let value = unescape(&component[key.len() + 1..]).map_err(invalid)?;
        attributes.push((key.trim().to_string(), value));
    }

    let mut name = X509Name::builder()?;
    for (key, value) in attributes.iter().rev() {
        name.append_entry_by_text(key, value)
            .map_err(|e| invalid(format!("{}: {}", key, e)))?;
    }
    Ok(name.build())
}

fn split_unescaped(input: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if c == '\\' {
            escaped = true;
        } else if c == separator {
            parts.push(&input[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&input[start..]);
    parts
}

/// Decode RFC 4514 escapes: `\` followed by one character, or by two hex
/// digits naming a UTF-8 byte.
fn unescape(value: &str) -> std::result::Result<String, String> {
    let mut out = Vec::with_capacity(value.len());
    let mut rest = value;
    while let Some(c) = rest.chars().next() {
        rest = &rest[c.len_utf8()..];
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        let pair = rest.get(..2).filter(|p| p.chars().all(|d| d.is_ascii_hexdigit()));
        match (pair, rest.chars().next()) {
            (Some(pair), _) => {
                out.extend(hex::decode(pair).map_err(|e| e.to_string())?);
                rest = &rest[2..];
            }
            (None, Some(next)) => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(next.encode_utf8(&mut buf).as_bytes());
                rest = &rest[next.len_utf8()..];
            }
            (None, None) => return Err("trailing escape character".to_string()),
        }
    }
    String::from_utf8(out).map_err(|_| "hex escapes do not form UTF-8".to_string())
}

fn unix_now() -> Result<i64> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| KeyboxError::Io(std::io::Error::other(e)))?;
    Ok(elapsed.as_secs() as i64)
}
