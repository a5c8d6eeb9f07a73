//! Peer certificate representation
//!
//! `X509Certificate` wraps an OpenSSL certificate and exposes the fields
//! callers usually need after a handshake: names, validity and hostname
//! matching. The encoding stays the engine's; `to_der`/`to_pem` hand it out
//! unchanged.

use super::config::TlsError;
use openssl::nid::Nid;
use openssl::x509::{X509NameRef, X509Ref, X509};
use std::fmt;
use std::net::IpAddr;

/// X.509 certificate
#[derive(Clone)]
pub struct X509Certificate {
    inner: X509,
}

impl X509Certificate {
    /// Wrap an OpenSSL certificate
    pub fn from_x509(cert: X509) -> Self {
        X509Certificate { inner: cert }
    }

    /// Copy a borrowed OpenSSL certificate
    pub fn from_x509_ref(cert: &X509Ref) -> Self {
        X509Certificate { inner: cert.to_owned() }
    }

    /// Parse the first certificate of a PEM document
    pub fn from_pem(pem: &[u8]) -> Result<Self, TlsError> {
        X509::from_pem(pem)
            .map(Self::from_x509)
            .map_err(|e| TlsError::Certificate(format!("Failed to parse certificate: {}", e)))
    }

    /// Underlying OpenSSL certificate
    pub fn as_x509(&self) -> &X509Ref {
        &self.inner
    }

    /// Subject common name, or `<undef>`
    pub fn subject(&self) -> String {
        common_name(self.inner.subject_name()).unwrap_or_else(|| "<undef>".to_string())
    }

    /// Issuer common name, or `<undef>`
    pub fn issuer(&self) -> String {
        common_name(self.inner.issuer_name()).unwrap_or_else(|| "<undef>".to_string())
    }

    /// Subject alternative names as `DNS:name` / `IP:addr` strings
    pub fn subject_alt_names(&self) -> Vec<String> {
        let mut names = Vec::new();

        if let Some(san_ext) = self.inner.subject_alt_names() {
            for name in san_ext {
                if let Some(dns) = name.dnsname() {
                    names.push(format!("DNS:{}", dns));
                } else if let Some(ip) = name.ipaddress().and_then(ip_from_bytes) {
                    names.push(format!("IP:{}", ip));
                }
            }
        }

        names
    }

    /// Start of the validity period, as printed by OpenSSL
    pub fn not_before(&self) -> String {
        self.inner.not_before().to_string()
    }

    /// End of the validity period, as printed by OpenSSL
    pub fn not_after(&self) -> String {
        self.inner.not_after().to_string()
    }

    /// Whether the certificate was issued for `host`
    ///
    /// IP hosts match IP SANs only. DNS hosts match DNS SANs, where a `*`
    /// may stand for the whole left-most label; the subject CN is consulted
    /// only when the certificate carries no DNS SANs.
    pub fn has_valid_hostname(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.');
        if host.is_empty() {
            return false;
        }

        let sans = self.inner.subject_alt_names();

        if let Ok(ip) = host.parse::<IpAddr>() {
            return sans
                .iter()
                .flatten()
                .filter_map(|name| name.ipaddress().and_then(ip_from_bytes))
                .any(|san_ip| san_ip == ip);
        }

        let dns_names: Vec<&str> = sans
            .iter()
            .flatten()
            .filter_map(|name| name.dnsname())
            .collect();

        if !dns_names.is_empty() {
            return dns_names.iter().any(|pattern| hostname_matches(pattern, host));
        }

        common_name(self.inner.subject_name())
            .map(|cn| hostname_matches(&cn, host))
            .unwrap_or(false)
    }

    /// DER encoding
    pub fn to_der(&self) -> Result<Vec<u8>, TlsError> {
        Ok(self.inner.to_der()?)
    }

    /// PEM encoding
    pub fn to_pem(&self) -> Result<Vec<u8>, TlsError> {
        Ok(self.inner.to_pem()?)
    }
}

impl fmt::Debug for X509Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("X509Certificate")
            .field("subject", &self.subject())
            .field("issuer", &self.issuer())
            .field("subject_alt_names", &self.subject_alt_names())
            .finish()
    }
}

impl PartialEq for X509Certificate {
    fn eq(&self, other: &Self) -> bool {
        match (self.inner.to_der(), other.inner.to_der()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl From<X509> for X509Certificate {
    fn from(cert: X509) -> Self {
        Self::from_x509(cert)
    }
}

/// Get Common Name from X509_NAME
///
/// Works on the raw bytes: a value with an embedded NUL or invalid UTF-8 is
/// treated as absent rather than cut short.
fn common_name(name: &X509NameRef) -> Option<String> {
    let data = name.entries_by_nid(Nid::COMMONNAME).next()?.data().as_slice();
    if data.contains(&0) {
        return None;
    }
    std::str::from_utf8(data).ok().map(str::to_string)
}

fn ip_from_bytes(ip: &[u8]) -> Option<IpAddr> {
    match ip.len() {
        4 => <[u8; 4]>::try_from(ip).ok().map(IpAddr::from),
        16 => <[u8; 16]>::try_from(ip).ok().map(IpAddr::from),
        _ => None,
    }
}

/// Case-insensitive name match with a whole-label wildcard in front
fn hostname_matches(pattern: &str, host: &str) -> bool {
    let pattern = pattern.trim_end_matches('.');

    match pattern.strip_prefix("*.") {
        Some(suffix) => {
            // The wildcard covers exactly one label and never a bare suffix
            match host.split_once('.') {
                Some((label, rest)) => {
                    !label.is_empty() && suffix.contains('.') && rest.eq_ignore_ascii_case(suffix)
                }
                None => false,
            }
        }
        None => !pattern.contains('*') && pattern.eq_ignore_ascii_case(host),
    }
}
