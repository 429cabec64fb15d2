// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! TLS material generation and inspection.
//!
//! Pure functions used by the certificate reconciler and the policy server reconciler:
//!
//! - [`generate_ca`] creates the self-signed root shared by every webhook endpoint
//! - [`generate_leaf`] issues a server certificate signed by that root
//! - [`inspect`] parses stored PEM material
//! - [`classify`] maps a stored certificate onto the rotation state machine
//!
//! Certificates are never edited. Rotation always produces a fresh key pair and
//! certificate which replace the previous secret contents.

use crate::constants::{CA_COMMON_NAME, CA_VALIDITY_DAYS, CERT_ORGANIZATION, LEAF_VALIDITY_DAYS};
use crate::errors::CertificateError;
use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use x509_parser::pem::parse_x509_pem;

const SECONDS_PER_DAY: i64 = 86_400;

/// A PEM encoded certificate with its private key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateBundle {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Facts extracted from a stored certificate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateInfo {
    /// Start of validity (Unix timestamp)
    pub not_before: i64,
    /// End of validity (Unix timestamp)
    pub not_after: i64,
    /// Subject common name
    pub common_name: String,
    /// DNS subject alternative names
    pub dns_names: Vec<String>,
    /// Lowercase hex SHA-256 of the DER encoding
    pub fingerprint: String,
}

/// Position of a stored certificate in the rotation state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CertificateState {
    /// No certificate is stored
    Absent,
    /// Valid beyond the rotation window
    Valid,
    /// Still valid but inside the rotation window
    Expiring,
    /// Past its expiry date
    Expired,
}

impl CertificateState {
    /// Whether the certificate must be regenerated.
    #[must_use]
    pub fn needs_regeneration(self) -> bool {
        !matches!(self, Self::Valid)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Valid => "present-valid",
            Self::Expiring => "present-expiring",
            Self::Expired => "present-expired",
        }
    }
}

/// Classify a certificate relative to `now` (Unix timestamp).
///
/// A certificate is expiring when fewer than `lookahead_days` remain before `not_after`.
#[must_use]
pub fn classify(info: Option<&CertificateInfo>, now: i64, lookahead_days: i64) -> CertificateState {
    let Some(info) = info else {
        return CertificateState::Absent;
    };
    if info.not_after <= now {
        CertificateState::Expired
    } else if info.not_after - now <= lookahead_days * SECONDS_PER_DAY {
        CertificateState::Expiring
    } else {
        CertificateState::Valid
    }
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(common_name.to_string()),
    );
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String(CERT_ORGANIZATION.to_string()),
    );
    dn
}

fn generation_error(what: &'static str) -> impl FnOnce(rcgen::Error) -> CertificateError {
    move |source| CertificateError::Generation { what, source }
}

/// Generate a self-signed root CA valid for ten years from `now`.
///
/// # Errors
///
/// Returns an error if key or certificate generation fails.
pub fn generate_ca(now: OffsetDateTime) -> Result<CertificateBundle, CertificateError> {
    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(CA_COMMON_NAME);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params.not_before = now;
    params.not_after = now + Duration::days(CA_VALIDITY_DAYS);

    let key_pair = KeyPair::generate().map_err(generation_error("CA key pair"))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(generation_error("CA certificate"))?;

    Ok(CertificateBundle {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

/// Issue a server certificate for `dns_names`, signed by `ca`, valid for one year.
///
/// The first DNS name becomes the subject common name.
///
/// # Errors
///
/// Returns an error if the CA material cannot be loaded, a DNS name is not valid
/// IA5, or signing fails.
pub fn generate_leaf(
    ca: &CertificateBundle,
    dns_names: &[String],
    now: OffsetDateTime,
) -> Result<CertificateBundle, CertificateError> {
    let mut params = CertificateParams::default();
    params.distinguished_name =
        distinguished_name(dns_names.first().map_or(CA_COMMON_NAME, String::as_str));
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    params.not_before = now;
    params.not_after = now + Duration::days(LEAF_VALIDITY_DAYS);
    params.subject_alt_names = dns_names
        .iter()
        .map(|name| {
            Ia5String::try_from(name.clone())
                .map(SanType::DnsName)
                .map_err(generation_error("subject alternative name"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let ca_key = KeyPair::from_pem(&ca.key_pem).map_err(|e| CertificateError::Parse {
        what: "CA private key",
        reason: e.to_string(),
    })?;
    let issuer =
        Issuer::from_ca_cert_pem(&ca.cert_pem, &ca_key).map_err(|e| CertificateError::Parse {
            what: "CA certificate",
            reason: e.to_string(),
        })?;

    let key_pair = KeyPair::generate().map_err(generation_error("server key pair"))?;
    let cert = params
        .signed_by(&key_pair, &issuer)
        .map_err(generation_error("server certificate"))?;

    Ok(CertificateBundle {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

/// Parse a PEM encoded certificate.
///
/// # Errors
///
/// Returns [`CertificateError::Parse`] when the input is not a PEM encoded X.509 certificate.
pub fn inspect(cert_pem: &str) -> Result<CertificateInfo, CertificateError> {
    let parse_error = |reason: String| CertificateError::Parse {
        what: "certificate",
        reason,
    };

    let (_, pem) = parse_x509_pem(cert_pem.as_bytes()).map_err(|e| parse_error(e.to_string()))?;
    let cert = pem.parse_x509().map_err(|e| parse_error(e.to_string()))?;

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default()
        .to_string();

    let dns_names = cert
        .subject_alternative_name()
        .ok()
        .flatten()
        .map(|san| {
            san.value
                .general_names
                .iter()
                .filter_map(|name| match name {
                    x509_parser::extensions::GeneralName::DNSName(dns) => {
                        Some((*dns).to_string())
                    }
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(CertificateInfo {
        not_before: cert.validity().not_before.timestamp(),
        not_after: cert.validity().not_after.timestamp(),
        common_name,
        dns_names,
        fingerprint: format!("{:x}", Sha256::digest(&pem.contents)),
    })
}

/// SHA-256 fingerprint of a PEM encoded certificate.
///
/// # Errors
///
/// Returns an error when the certificate cannot be parsed.
pub fn fingerprint(cert_pem: &str) -> Result<String, CertificateError> {
    inspect(cert_pem).map(|info| info.fingerprint)
}

/// DNS names under which a service is reachable inside the cluster.
#[must_use]
pub fn service_dns_names(service: &str, namespace: &str) -> Vec<String> {
    vec![
        format!("{service}.{namespace}.svc"),
        format!("{service}.{namespace}.svc.cluster.local"),
    ]
}

/// Current wall clock time in UTC.
#[must_use]
pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}
