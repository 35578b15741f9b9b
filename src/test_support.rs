//! Certificate and keybox fixtures for unit tests.

use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{BasicConstraints, KeyUsage, SubjectKeyIdentifier};
use openssl::x509::{X509Name, X509Ref, X509};

use crate::keybox_document::{Algorithm, KeyEntry, Keybox};

pub struct IssuerOptions {
    pub serial: u32,
    pub common_name: &'static str,
    pub with_subject_key_id: bool,
}

impl Default for IssuerOptions {
    fn default() -> Self {
        Self {
            serial: 0x1001,
            common_name: "Test Attestation Root",
            with_subject_key_id: true,
        }
    }
}

pub fn ec_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

pub fn rsa_key() -> PKey<Private> {
    PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap()
}

/// Build a CA certificate for `key`, signed by `issuer` (or self-signed).
pub fn build_cert(
    key: &PKey<Private>,
    issuer: Option<(&PKey<Private>, &X509)>,
    options: &IssuerOptions,
) -> X509 {
    let mut name = X509Name::builder().unwrap();
    name.append_entry_by_nid(Nid::ORGANIZATIONNAME, "Keybox Tests")
        .unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, options.common_name)
        .unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(options.serial).unwrap();
    builder
        .set_serial_number(&serial.to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(&name).unwrap();
    match issuer {
        Some((_, issuer_cert)) => builder.set_issuer_name(issuer_cert.subject_name()).unwrap(),
        None => builder.set_issuer_name(&name).unwrap(),
    }
    builder
        .set_not_before(&openssl::asn1::Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&openssl::asn1::Asn1Time::days_from_now(365).unwrap())
        .unwrap();
    builder.set_pubkey(key).unwrap();

    let bc = BasicConstraints::new().critical().ca().build().unwrap();
    builder.append_extension(bc).unwrap();
    let ku = KeyUsage::new().critical().key_cert_sign().build().unwrap();
    builder.append_extension(ku).unwrap();
    if options.with_subject_key_id {
        let issuer_cert: Option<&X509Ref> = issuer.map(|(_, cert)| &**cert);
        let ski = SubjectKeyIdentifier::new()
            .build(&builder.x509v3_context(issuer_cert, None))
            .unwrap();
        builder.append_extension(ski).unwrap();
    }

    let signing_key = issuer.map(|(key, _)| key).unwrap_or(key);
    builder.sign(signing_key, MessageDigest::sha256()).unwrap();
    builder.build()
}

pub fn self_signed_ec(options: &IssuerOptions) -> (PKey<Private>, X509) {
    let key = ec_key();
    let cert = build_cert(&key, None, options);
    (key, cert)
}

pub fn self_signed_rsa(options: &IssuerOptions) -> (PKey<Private>, X509) {
    let key = rsa_key();
    let cert = build_cert(&key, None, options);
    (key, cert)
}

/// Two-certificate chain `[leaf, root]` for `leaf_key`, leaf carrying `serial`.
pub fn chain_for(leaf_key: &PKey<Private>, serial: u32) -> Vec<X509> {
    let (root_key, root) = self_signed_ec(&IssuerOptions {
        serial: 0x0100,
        ..IssuerOptions::default()
    });
    let leaf = build_cert(
        leaf_key,
        Some((&root_key, &root)),
        &IssuerOptions {
            serial,
            common_name: "Test Attestation Leaf",
            with_subject_key_id: true,
        },
    );
    vec![leaf, root]
}

/// Keybox with an ECDSA and an RSA slot whose leaves carry the given serials.
pub fn sample_keybox(ecdsa_serial: u32, rsa_serial: u32) -> Keybox {
    let mut keybox = Keybox::new("test-device");

    let ecdsa = ec_key();
    let ecdsa_chain = chain_for(&ecdsa, ecdsa_serial);
    keybox.insert(Algorithm::Ecdsa, KeyEntry::new(&ecdsa, &ecdsa_chain).unwrap());

    let rsa = rsa_key();
    let rsa_chain = chain_for(&rsa, rsa_serial);
    keybox.insert(Algorithm::Rsa, KeyEntry::new(&rsa, &rsa_chain).unwrap());

    keybox
}

/// Keybox with only an ECDSA slot.
pub fn single_key_keybox(serial: u32) -> Keybox {
    let mut keybox = Keybox::new("single");
    let key = ec_key();
    let chain = chain_for(&key, serial);
    keybox.insert(Algorithm::Ecdsa, KeyEntry::new(&key, &chain).unwrap());
    keybox
}
