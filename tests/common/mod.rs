//! Test PKI
//!
//! Generates a throwaway CA with server and client leaves at test time and
//! writes everything as PEM into a temporary directory.

#![allow(dead_code)]

use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, PKeyRef, Private};
use openssl::symm::Cipher;
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
    SubjectKeyIdentifier,
};
use openssl::x509::{X509NameBuilder, X509Ref, X509};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Passphrase protecting `server_key_encrypted`
pub const KEY_PASSPHRASE: &str = "correct horse battery staple";

/// Certificate + key files on disk
pub struct Credential {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// All test credentials; files live as long as this value
pub struct TestPki {
    _dir: TempDir,
    /// Trust anchor for `server`, `client` and `expired`
    pub ca_cert: PathBuf,
    /// CN=localhost, SAN DNS:localhost, IP:127.0.0.1
    pub server: Credential,
    /// Same certificate as `server`; key encrypted with `KEY_PASSPHRASE`
    pub server_key_encrypted: PathBuf,
    /// Certificate and key in one PEM file
    pub server_combined: PathBuf,
    /// CN=client, clientAuth
    pub client: Credential,
    /// CN=localhost, validity ended in the past
    pub expired: Credential,
    /// CN=localhost, self-signed, not issued by the CA
    pub self_signed: Credential,
}

fn generate_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

fn serial() -> openssl::asn1::Asn1Integer {
    let mut bn = BigNum::new().unwrap();
    bn.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();
    bn.to_asn1_integer().unwrap()
}

struct Spec<'a> {
    cn: &'a str,
    dns: &'a [&'a str],
    ips: &'a [&'a str],
    client_auth: bool,
    not_before: &'a Asn1TimeRef,
    not_after: &'a Asn1TimeRef,
}

fn issue(
    spec: &Spec<'_>,
    key: &PKeyRef<Private>,
    issuer: Option<(&X509Ref, &PKeyRef<Private>)>,
) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, spec.cn).unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder.set_serial_number(&serial()).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_pubkey(key).unwrap();
    builder.set_not_before(spec.not_before).unwrap();
    builder.set_not_after(spec.not_after).unwrap();

    match issuer {
        Some((ca_cert, _)) => builder.set_issuer_name(ca_cert.subject_name()).unwrap(),
        None => builder.set_issuer_name(&name).unwrap(),
    }

    builder
        .append_extension(BasicConstraints::new().critical().build().unwrap())
        .unwrap();
    let key_usage = KeyUsage::new()
        .critical()
        .digital_signature()
        .key_agreement()
        .build()
        .unwrap();
    builder.append_extension(key_usage).unwrap();

    let mut eku = ExtendedKeyUsage::new();
    eku.server_auth();
    if spec.client_auth {
        eku.client_auth();
    }
    builder.append_extension(eku.build().unwrap()).unwrap();

    let ski = SubjectKeyIdentifier::new()
        .build(&builder.x509v3_context(issuer.map(|(c, _)| c), None))
        .unwrap();
    builder.append_extension(ski).unwrap();

    if let Some((ca_cert, _)) = issuer {
        let aki = AuthorityKeyIdentifier::new()
            .keyid(false)
            .build(&builder.x509v3_context(Some(ca_cert), None))
            .unwrap();
        builder.append_extension(aki).unwrap();
    }

    if !spec.dns.is_empty() || !spec.ips.is_empty() {
        let mut san = SubjectAlternativeName::new();
        for dns in spec.dns {
            san.dns(dns);
        }
        for ip in spec.ips {
            san.ip(ip);
        }
        let ext = san
            .build(&builder.x509v3_context(issuer.map(|(c, _)| c), None))
            .unwrap();
        builder.append_extension(ext).unwrap();
    }

    let signing_key = issuer.map(|(_, k)| k).unwrap_or(key);
    builder.sign(signing_key, MessageDigest::sha256()).unwrap();
    builder.build()
}

fn issue_ca(key: &PKeyRef<Private>) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, "sslsocket test CA").unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder.set_serial_number(&serial()).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(key).unwrap();
    builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
    builder.set_not_after(&Asn1Time::days_from_now(365).unwrap()).unwrap();
    builder
        .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
        .unwrap();
    builder
        .append_extension(KeyUsage::new().critical().key_cert_sign().crl_sign().build().unwrap())
        .unwrap();
    let ski = SubjectKeyIdentifier::new()
        .build(&builder.x509v3_context(None, None))
        .unwrap();
    builder.append_extension(ski).unwrap();

    builder.sign(key, MessageDigest::sha256()).unwrap();
    builder.build()
}

fn write(dir: &TempDir, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn write_credential(dir: &TempDir, name: &str, cert: &X509, key: &PKeyRef<Private>) -> Credential {
    Credential {
        cert: write(dir, &format!("{}.crt", name), &cert.to_pem().unwrap()),
        key: write(dir, &format!("{}.key", name), &key.private_key_to_pem_pkcs8().unwrap()),
    }
}

impl TestPki {
    pub fn generate() -> Self {
        let dir = tempfile::tempdir().unwrap();

        let now = Asn1Time::days_from_now(0).unwrap();
        let later = Asn1Time::days_from_now(30).unwrap();
        let long_ago = Asn1Time::from_unix(1_000_000_000).unwrap();
        let ago = Asn1Time::from_unix(1_100_000_000).unwrap();

        let ca_key = generate_key();
        let ca = issue_ca(&ca_key);

        let server_key = generate_key();
        let server = issue(
            &Spec {
                cn: "localhost",
                dns: &["localhost"],
                ips: &["127.0.0.1"],
                client_auth: false,
                not_before: &now,
                not_after: &later,
            },
            &server_key,
            Some((&*ca, &*ca_key)),
        );

        let client_key = generate_key();
        let client = issue(
            &Spec {
                cn: "client",
                dns: &[],
                ips: &[],
                client_auth: true,
                not_before: &now,
                not_after: &later,
            },
            &client_key,
            Some((&*ca, &*ca_key)),
        );

        let expired_key = generate_key();
        let expired = issue(
            &Spec {
                cn: "localhost",
                dns: &["localhost"],
                ips: &["127.0.0.1"],
                client_auth: false,
                not_before: &long_ago,
                not_after: &ago,
            },
            &expired_key,
            Some((&*ca, &*ca_key)),
        );

        let self_signed_key = generate_key();
        let self_signed = issue(
            &Spec {
                cn: "localhost",
                dns: &["localhost"],
                ips: &["127.0.0.1"],
                client_auth: true,
                not_before: &now,
                not_after: &later,
            },
            &self_signed_key,
            None,
        );

        let encrypted = server_key
            .private_key_to_pem_pkcs8_passphrase(Cipher::aes_256_cbc(), KEY_PASSPHRASE.as_bytes())
            .unwrap();

        let mut combined = server.to_pem().unwrap();
        combined.extend_from_slice(&server_key.private_key_to_pem_pkcs8().unwrap());

        TestPki {
            ca_cert: write(&dir, "ca.crt", &ca.to_pem().unwrap()),
            server: write_credential(&dir, "server", &server, &server_key),
            server_key_encrypted: write(&dir, "server-encrypted.key", &encrypted),
            server_combined: write(&dir, "server-combined.pem", &combined),
            client: write_credential(&dir, "client", &client, &client_key),
            expired: write_credential(&dir, "expired", &expired, &expired_key),
            self_signed: write_credential(&dir, "self-signed", &self_signed, &self_signed_key),
            _dir: dir,
        }
    }
}
