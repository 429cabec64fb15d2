// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Standard Kubernetes status condition types and reasons for Kubewarden resources.
//!
//! Reasons are programmatic identifiers in CamelCase that explain why a condition has
//! a particular status.
//!
//! # Condition Types
//!
//! ## `PolicyServer`
//!
//! One condition per owned object, written in reconciliation order:
//!
//! - `CARootSecretReconciled`
//! - `CertSecretReconciled`
//! - `ConfigMapReconciled`
//! - `DeploymentReconciled`
//! - `ServiceReconciled`
//! - `PodDisruptionBudgetReconciled`
//!
//! ## Policies
//!
//! - `PolicyActive` - the webhook entry is registered and the policy server is ready
//! - `PolicyServerConfigurationUpToDate` - the target policy server is ready
//!
//! # Example Status
//!
//! ```yaml
//! status:
//!   conditions:
//!     - type: DeploymentReconciled
//!       status: "True"
//!       reason: ReconciliationSucceeded
//!     - type: PodDisruptionBudgetReconciled
//!       status: "False"
//!       reason: InvalidSpec
//!       message: "minAvailable and maxUnavailable are mutually exclusive"
//! ```

// ============================================================================
// Condition Status Values
// ============================================================================

pub const CONDITION_TRUE: &str = "True";
pub const CONDITION_FALSE: &str = "False";
pub const CONDITION_UNKNOWN: &str = "Unknown";

// ============================================================================
// PolicyServer Condition Types
// ============================================================================

/// Condition of the shared CA root secret
pub const CONDITION_CA_ROOT_SECRET_RECONCILED: &str = "CARootSecretReconciled";

/// Condition of the policy server TLS secret
pub const CONDITION_CERT_SECRET_RECONCILED: &str = "CertSecretReconciled";

/// Condition of the policies `ConfigMap`
pub const CONDITION_CONFIG_MAP_RECONCILED: &str = "ConfigMapReconciled";

/// Condition of the policy server Deployment
pub const CONDITION_DEPLOYMENT_RECONCILED: &str = "DeploymentReconciled";

/// Condition of the policy server Service
pub const CONDITION_SERVICE_RECONCILED: &str = "ServiceReconciled";

/// Condition of the policy server `PodDisruptionBudget`
pub const CONDITION_PDB_RECONCILED: &str = "PodDisruptionBudgetReconciled";

// ============================================================================
// Policy Condition Types
// ============================================================================

/// The policy is served by a ready policy server and its webhook entry is registered
pub const CONDITION_POLICY_ACTIVE: &str = "PolicyActive";

/// The target policy server is ready to evaluate the policy
pub const CONDITION_POLICY_SERVER_CONFIGURATION_UP_TO_DATE: &str =
    "PolicyServerConfigurationUpToDate";

// ============================================================================
// Common Reasons
// ============================================================================

/// The reconciliation step finished successfully.
pub const REASON_RECONCILIATION_SUCCEEDED: &str = "ReconciliationSucceeded";

/// The reconciliation step failed with a transient or unexpected error.
pub const REASON_RECONCILE_FAILED: &str = "ReconciliationFailed";

/// The spec cannot be satisfied as written.
///
/// Not retried until the spec changes.
pub const REASON_INVALID_SPEC: &str = "InvalidSpec";

/// A referenced object does not exist yet.
pub const REASON_MISSING_DEPENDENCY: &str = "MissingDependency";

/// The API server refused a write; repeating the same request fails the same way.
pub const REASON_API_REQUEST_REJECTED: &str = "ApiRequestRejected";

// ============================================================================
// Certificate Reasons
// ============================================================================

/// Key or certificate generation failed.
pub const REASON_CERTIFICATE_GENERATION_FAILED: &str = "CertificateGenerationFailed";

/// Stored certificate material is unreadable.
pub const REASON_INVALID_CERTIFICATE: &str = "InvalidCertificate";

/// Mutual TLS is enabled but the client CA `ConfigMap` does not exist.
pub const REASON_CLIENT_CA_MISSING: &str = "ClientCAConfigMapMissing";

// ============================================================================
// Policy Reasons
// ============================================================================

/// The policy webhook entry is registered and the policy server is ready.
pub const REASON_POLICY_ACTIVE: &str = "PolicyActive";

/// The target `PolicyServer` does not exist.
pub const REASON_POLICY_SERVER_NOT_FOUND: &str = "PolicyServerNotFound";

/// The target `PolicyServer` is being deleted.
pub const REASON_POLICY_SERVER_TERMINATING: &str = "PolicyServerTerminating";

/// The target `PolicyServer` has no ready replica.
pub const REASON_POLICY_SERVER_NOT_READY: &str = "PolicyServerNotReady";

/// The webhook entry could not be written.
pub const REASON_WEBHOOK_REGISTRATION_FAILED: &str = "WebhookRegistrationFailed";

/// A group member or the group expression is invalid.
pub const REASON_INVALID_POLICY_GROUP: &str = "InvalidPolicyGroup";

/// Maps a boolean outcome to a condition status string.
#[must_use]
pub fn condition_status(ok: bool) -> &'static str {
    if ok {
        CONDITION_TRUE
    } else {
        CONDITION_FALSE
    }
}
