// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error taxonomy for the Kubewarden controller.
//!
//! Reconcilers classify every failure so the controller knows whether to back off
//! and retry, or to report and wait:
//!
//! - [`ReconcileError::Transient`] - conflicts, throttling, 5xx and connection failures.
//!   Returned to the controller, which requeues the object with exponential backoff.
//! - [`ReconcileError::Rejected`] - the API server refused the request (403, 422, ...).
//!   The same request fails the same way, so it is reported and requeued on the normal
//!   cadence.
//! - [`ReconcileError::InvalidSpec`] - the user asked for something impossible.
//!   Surfaced through status conditions; retrying an unchanged spec cannot succeed.
//! - [`ReconcileError::MissingDependency`] - something the resource needs does not
//!   exist yet. Surfaced through status and retried on the normal resync cadence.
//!
//! Objects disappearing between read and write are not errors at all: callers check
//! [`is_not_found`] and treat the pass as successful.

use crate::reconcilers::retry::is_retryable_error;
use crate::status_reasons::{
    REASON_API_REQUEST_REJECTED, REASON_INVALID_SPEC, REASON_MISSING_DEPENDENCY,
    REASON_RECONCILE_FAILED,
};
use thiserror::Error;

/// Classified reconciliation failure.
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// Transient cluster API failure, retried with backoff
    #[error("transient API error: {0}")]
    Transient(#[source] kube::Error),

    /// The API server refused the request
    #[error("API server rejected the request: {0}")]
    Rejected(#[source] kube::Error),

    /// The resource spec cannot be satisfied as written
    #[error("invalid spec: {reason}")]
    InvalidSpec {
        /// CamelCase reason written to the status condition
        condition_reason: &'static str,
        /// Human readable explanation
        reason: String,
    },

    /// A referenced object does not exist (yet)
    #[error("missing dependency {kind} '{name}': {reason}")]
    MissingDependency {
        /// Kind of the missing object
        kind: &'static str,
        /// Name of the missing object
        name: String,
        /// Why it is needed
        reason: String,
    },

    /// Certificate generation or parsing failed
    #[error(transparent)]
    Certificate(#[from] CertificateError),

    /// An object could not be converted to JSON
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Any other failure
    #[error(transparent)]
    Other(anyhow::Error),
}

impl ReconcileError {
    /// Convenience constructor for [`ReconcileError::InvalidSpec`] with the generic reason.
    pub fn invalid_spec(reason: impl Into<String>) -> Self {
        Self::InvalidSpec {
            condition_reason: REASON_INVALID_SPEC,
            reason: reason.into(),
        }
    }

    /// Whether the controller should retry the object with exponential backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// CamelCase reason used in status conditions.
    #[must_use]
    pub fn status_reason(&self) -> &'static str {
        match self {
            Self::InvalidSpec {
                condition_reason, ..
            } => condition_reason,
            Self::MissingDependency { .. } => REASON_MISSING_DEPENDENCY,
            Self::Certificate(err) => err.status_reason(),
            Self::Rejected(_) => REASON_API_REQUEST_REJECTED,
            Self::Transient(_) | Self::Serialization(_) | Self::Other(_) => REASON_RECONCILE_FAILED,
        }
    }
}

impl From<kube::Error> for ReconcileError {
    fn from(err: kube::Error) -> Self {
        if is_retryable_error(&err) {
            Self::Transient(err)
        } else {
            Self::Rejected(err)
        }
    }
}

// Helpers written against anyhow keep the classified or kube error they wrap.
impl From<anyhow::Error> for ReconcileError {
    fn from(err: anyhow::Error) -> Self {
        let err = match err.downcast::<Self>() {
            Ok(classified) => return classified,
            Err(other) => other,
        };
        match err.downcast::<kube::Error>() {
            Ok(api_err) => Self::from(api_err),
            Err(other) => Self::Other(other),
        }
    }
}

/// Errors raised while generating or inspecting TLS material.
#[derive(Error, Debug)]
pub enum CertificateError {
    /// Key pair or certificate generation failed
    #[error("failed to generate {what}: {source}")]
    Generation {
        what: &'static str,
        #[source]
        source: rcgen::Error,
    },

    /// Stored PEM material could not be parsed
    #[error("failed to parse {what}: {reason}")]
    Parse { what: &'static str, reason: String },

    /// A secret exists but lacks a required key
    #[error("secret '{secret}' is missing key '{key}'")]
    MissingKey { secret: String, key: String },

    /// The client CA `ConfigMap` required for mutual TLS is absent or incomplete
    #[error("client CA ConfigMap '{name}' not found in namespace '{namespace}'")]
    ClientCaMissing { name: String, namespace: String },
}

impl CertificateError {
    /// CamelCase reason used in status conditions.
    #[must_use]
    pub fn status_reason(&self) -> &'static str {
        match self {
            Self::Generation { .. } => crate::status_reasons::REASON_CERTIFICATE_GENERATION_FAILED,
            Self::Parse { .. } | Self::MissingKey { .. } => {
                crate::status_reasons::REASON_INVALID_CERTIFICATE
            }
            Self::ClientCaMissing { .. } => crate::status_reasons::REASON_CLIENT_CA_MISSING,
        }
    }
}

/// Whether a kube error is an HTTP 404.
#[must_use]
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(status) if status.code == 404)
}
