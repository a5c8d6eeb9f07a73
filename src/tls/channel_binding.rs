//! Channel binding data
//!
//! Channel bindings tie an outer authentication exchange (SCRAM, GSSAPI,
//! ...) to one TLS session so the exchange cannot be relayed over another
//! connection. Three types are supported:
//!
//! - `tls-unique` (RFC 5929): the first Finished message of the latest
//!   handshake. Undefined for TLS 1.3.
//! - `tls-server-end-point` (RFC 5929): a hash of the server certificate.
//! - `tls-exporter` (RFC 9266): 32 bytes of exported keying material.

use super::config::{Role, TlsError};
use bytes::Bytes;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::ssl::{SslRef, SslVersion};
use std::fmt;
use std::str::FromStr;

/// Exporter label for `tls-exporter`
pub const EXPORTER_LABEL: &str = "EXPORTER-Channel-Binding";

/// Length of `tls-exporter` data
pub const EXPORTER_LENGTH: usize = 32;

/// Finished messages are at most this long (SHA-384 verify data)
const MAX_FINISHED_LEN: usize = 64;

/// Channel binding type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelBindingType {
    /// `tls-unique`
    TlsUnique,
    /// `tls-server-end-point`
    TlsServerEndPoint,
    /// `tls-exporter`
    TlsExporter,
}

impl ChannelBindingType {
    /// Registered name of the binding type
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelBindingType::TlsUnique => "tls-unique",
            ChannelBindingType::TlsServerEndPoint => "tls-server-end-point",
            ChannelBindingType::TlsExporter => "tls-exporter",
        }
    }
}

impl FromStr for ChannelBindingType {
    type Err = TlsError;

    fn from_str(s: &str) -> Result<Self, TlsError> {
        match s {
            "tls-unique" => Ok(ChannelBindingType::TlsUnique),
            "tls-server-end-point" => Ok(ChannelBindingType::TlsServerEndPoint),
            "tls-exporter" => Ok(ChannelBindingType::TlsExporter),
            _ => Err(TlsError::UnsupportedChannelBinding(s.to_string())),
        }
    }
}

impl fmt::Display for ChannelBindingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extract binding data of `kind` from an established session
pub(crate) fn extract(
    ssl: &SslRef,
    role: Role,
    kind: ChannelBindingType,
) -> Result<Bytes, TlsError> {
    match kind {
        ChannelBindingType::TlsUnique => tls_unique(ssl, role),
        ChannelBindingType::TlsServerEndPoint => tls_server_end_point(ssl, role),
        ChannelBindingType::TlsExporter => tls_exporter(ssl),
    }
}

fn unavailable(kind: ChannelBindingType, reason: impl Into<String>) -> TlsError {
    TlsError::ChannelBindingUnavailable { kind: kind.as_str(), reason: reason.into() }
}

fn tls_unique(ssl: &SslRef, role: Role) -> Result<Bytes, TlsError> {
    let kind = ChannelBindingType::TlsUnique;

    if ssl.version2() == Some(SslVersion::TLS1_3) {
        return Err(unavailable(kind, "not defined for TLS 1.3"));
    }

    // The client sends the first Finished of a full handshake, the server
    // the first Finished of an abbreviated one.
    let we_sent_first = ssl.session_reused() ^ (role == Role::Client);

    let mut buf = [0u8; MAX_FINISHED_LEN];
    let len = if we_sent_first {
        ssl.finished(&mut buf)
    } else {
        ssl.peer_finished(&mut buf)
    };

    if len == 0 || len > buf.len() {
        return Err(unavailable(kind, "no Finished message recorded"));
    }

    Ok(Bytes::copy_from_slice(&buf[..len]))
}

fn tls_server_end_point(ssl: &SslRef, role: Role) -> Result<Bytes, TlsError> {
    let kind = ChannelBindingType::TlsServerEndPoint;

    let cert = match role {
        Role::Client => ssl.peer_certificate(),
        Role::Server => ssl.certificate().map(|c| c.to_owned()),
    }
    .ok_or_else(|| unavailable(kind, "no server certificate"))?;

    let algo_nid = cert.signature_algorithm().object().nid();
    let signature_algorithms = algo_nid
        .signature_algorithms()
        .ok_or_else(|| unavailable(kind, "unknown certificate signature algorithm"))?;

    // MD5 and SHA-1 are upgraded to SHA-256
    let md = match signature_algorithms.digest {
        Nid::MD5 | Nid::SHA1 => MessageDigest::sha256(),
        nid => MessageDigest::from_nid(nid)
            .ok_or_else(|| unavailable(kind, "certificate signature has no single hash function"))?,
    };

    let digest = cert.digest(md)?;
    Ok(Bytes::copy_from_slice(&digest))
}

fn tls_exporter(ssl: &SslRef) -> Result<Bytes, TlsError> {
    let mut out = [0u8; EXPORTER_LENGTH];
    ssl.export_keying_material(&mut out, EXPORTER_LABEL, Some(&[][..]))
        .map_err(|e| unavailable(ChannelBindingType::TlsExporter, e.to_string()))?;
    Ok(Bytes::copy_from_slice(&out))
}
