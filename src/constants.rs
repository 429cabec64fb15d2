// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the Kubewarden controller.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// API Constants
// ============================================================================

/// API group for all Kubewarden policy CRDs
pub const API_GROUP: &str = "policies.kubewarden.io";

/// API version for all Kubewarden policy CRDs
pub const API_VERSION: &str = "v1";

/// Fully qualified API version (group/version)
pub const API_GROUP_VERSION: &str = "policies.kubewarden.io/v1";

/// Kind name for `PolicyServer` resource
pub const KIND_POLICY_SERVER: &str = "PolicyServer";

/// Kind name for `AdmissionPolicy` resource
pub const KIND_ADMISSION_POLICY: &str = "AdmissionPolicy";

/// Kind name for `ClusterAdmissionPolicy` resource
pub const KIND_CLUSTER_ADMISSION_POLICY: &str = "ClusterAdmissionPolicy";

/// Kind name for `AdmissionPolicyGroup` resource
pub const KIND_ADMISSION_POLICY_GROUP: &str = "AdmissionPolicyGroup";

/// Kind name for `ClusterAdmissionPolicyGroup` resource
pub const KIND_CLUSTER_ADMISSION_POLICY_GROUP: &str = "ClusterAdmissionPolicyGroup";

/// Field manager used for server-side apply of objects owned by the controller
pub const FIELD_MANAGER: &str = "kubewarden-controller";

/// Maximum length of a `PolicyServer` name (it becomes part of DNS-1123 labels)
pub const MAX_POLICY_SERVER_NAME_LENGTH: usize = 63;

// ============================================================================
// Policy Server Workload Constants
// ============================================================================

/// Prefix prepended to every `PolicyServer` name for its owned objects
pub const POLICY_SERVER_NAME_PREFIX: &str = "policy-server-";

/// Name of the policy-server container inside the Deployment
pub const POLICY_SERVER_CONTAINER_NAME: &str = "policy-server";

/// HTTPS port the policy server listens on for admission reviews
pub const POLICY_SERVER_PORT: i32 = 8443;

/// Port exposing the policy server readiness endpoint
pub const POLICY_SERVER_READINESS_PORT: i32 = 8081;

/// Path of the policy server readiness endpoint
pub const POLICY_SERVER_READINESS_PATH: &str = "/readiness";

/// Port the policy server exposes Prometheus metrics on
pub const POLICY_SERVER_METRICS_PORT: i32 = 8080;

/// Key inside the policy server `ConfigMap` holding the policies document
pub const POLICY_SERVER_POLICIES_KEY: &str = "policies.yml";

/// Key inside the policy server `ConfigMap` holding the sources document
pub const POLICY_SERVER_SOURCES_KEY: &str = "sources.yml";

/// Mount path of the policies `ConfigMap`
pub const POLICIES_MOUNT_PATH: &str = "/config";

/// Mount path of the sources document
pub const SOURCES_MOUNT_PATH: &str = "/sources";

/// Mount path of the policy server TLS material
pub const CERTS_MOUNT_PATH: &str = "/pki";

/// Mount path of the Sigstore verification configuration
pub const VERIFICATION_MOUNT_PATH: &str = "/verification";

/// Key inside the verification `ConfigMap`
pub const VERIFICATION_CONFIG_KEY: &str = "verification-config";

/// Directory where the policy server stores downloaded policies
pub const POLICIES_DOWNLOAD_DIR: &str = "/tmp";

/// Mount path of the registry credentials
pub const DOCKER_CONFIG_MOUNT_PATH: &str = "/home/kubewarden/.docker";

/// Mount path of the client CA bundle used for mutual TLS
pub const CLIENT_CA_MOUNT_PATH: &str = "/client-ca";

// ============================================================================
// Kubernetes Health Check Constants
// ============================================================================

/// Readiness probe initial delay
pub const READINESS_INITIAL_DELAY_SECS: i32 = 5;

/// Readiness probe period
pub const READINESS_PERIOD_SECS: i32 = 10;

/// Readiness probe timeout
pub const READINESS_TIMEOUT_SECS: i32 = 3;

/// Readiness probe failure threshold
pub const READINESS_FAILURE_THRESHOLD: i32 = 3;

// ============================================================================
// Certificate Constants
// ============================================================================

/// Secret holding the root CA shared by every webhook endpoint
pub const CA_ROOT_SECRET_NAME: &str = "kubewarden-ca";

/// Key of the CA certificate inside the CA root secret
pub const CA_ROOT_CERT_KEY: &str = "ca.crt";

/// Key of the CA private key inside the CA root secret
pub const CA_ROOT_KEY_KEY: &str = "ca.key";

/// Secret holding the controller webhook server certificate
pub const WEBHOOK_SERVER_CERT_SECRET_NAME: &str = "webhook-server-cert";

/// Key of the webhook server certificate
pub const WEBHOOK_SERVER_CERT_KEY: &str = "tls.crt";

/// Key of the webhook server private key
pub const WEBHOOK_SERVER_KEY_KEY: &str = "tls.key";

/// Key of the policy server certificate inside its secret
pub const POLICY_SERVER_CERT_KEY: &str = "policy-server-cert";

/// Key of the policy server private key inside its secret
pub const POLICY_SERVER_KEY_KEY: &str = "policy-server-key";

/// Key of the client CA bundle inside the client CA `ConfigMap`
pub const CLIENT_CA_KEY: &str = "client-ca.crt";

/// Common name of the generated root CA
pub const CA_COMMON_NAME: &str = "kubewarden-controller-ca";

/// Organization written into every generated certificate
pub const CERT_ORGANIZATION: &str = "Kubewarden";

/// Lifetime of the root CA (10 years)
pub const CA_VALIDITY_DAYS: i64 = 3650;

/// Lifetime of leaf certificates (1 year)
pub const LEAF_VALIDITY_DAYS: i64 = 365;

/// The root CA is regenerated when it expires within this window (1 year)
pub const CA_ROTATION_LOOKAHEAD_DAYS: i64 = 365;

/// Leaf certificates are regenerated when they expire within this window
pub const LEAF_ROTATION_LOOKAHEAD_DAYS: i64 = 60;

/// Interval between certificate reconciliation passes (10 minutes)
pub const CERT_RESYNC_INTERVAL_SECS: u64 = 600;

// ============================================================================
// Webhook Registration Constants
// ============================================================================

/// Shared validating webhook configuration holding one entry per policy
pub const VALIDATING_WEBHOOK_CONFIGURATION_NAME: &str = "kubewarden-policies-validating";

/// Shared mutating webhook configuration holding one entry per policy
pub const MUTATING_WEBHOOK_CONFIGURATION_NAME: &str = "kubewarden-policies-mutating";

/// Suffix appended to the policy unique name to form the webhook entry name
pub const WEBHOOK_NAME_SUFFIX: &str = ".kubewarden.admission";

/// Path prefix of the policy server validation endpoint
pub const VALIDATE_PATH_PREFIX: &str = "/validate/";

/// Admission review versions accepted by the policy server
pub const ADMISSION_REVIEW_VERSIONS: &[&str] = &["v1"];

/// Default name of the controller webhook service
pub const DEFAULT_WEBHOOK_SERVICE_NAME: &str = "kubewarden-controller-webhook-service";

/// Default namespace where policy servers are deployed
pub const DEFAULT_DEPLOYMENTS_NAMESPACE: &str = "kubewarden";

/// Policy server targeted by policies that do not name one
pub const DEFAULT_POLICY_SERVER: &str = "default";

// ============================================================================
// Feature Gate Constants
// ============================================================================

/// First Kubernetes minor release (1.x) with match conditions enabled by default
pub const MATCH_CONDITIONS_MIN_MINOR_VERSION: u32 = 28;

// ============================================================================
// Controller Requeue Constants
// ============================================================================

/// Requeue duration after a non-transient controller error (30 seconds)
pub const ERROR_REQUEUE_DURATION_SECS: u64 = 30;

/// First requeue delay after a transient error, doubled on each consecutive failure
pub const ERROR_BACKOFF_INITIAL_MILLIS: u64 = 5_000;

/// Upper bound of the transient error requeue delay (5 minutes)
pub const ERROR_BACKOFF_MAX_SECS: u64 = 300;

/// Attempts made for a single API call before the error is handed to the controller
pub const API_CALL_ATTEMPTS: u32 = 4;

/// Delay before the first in-pass retry of an API call, doubled per attempt
pub const API_CALL_BACKOFF_INITIAL_MILLIS: u64 = 200;

/// Upper bound of the in-pass retry delay
pub const API_CALL_BACKOFF_MAX_MILLIS: u64 = 2_000;

/// Requeue duration once a resource is converged (5 minutes)
pub const READY_REQUEUE_DURATION_SECS: u64 = 300;

/// Requeue duration while waiting on dependencies (30 seconds)
pub const PENDING_REQUEUE_DURATION_SECS: u64 = 30;

/// Requeue duration while waiting for deleted objects to disappear (5 seconds)
pub const DELETION_REQUEUE_DURATION_SECS: u64 = 5;

// ============================================================================
// Kubernetes API Constants
// ============================================================================

/// Items fetched per page when listing policies
pub const LIST_PAGE_SIZE: u32 = 100;

// ============================================================================
// Leader Election Constants
// ============================================================================

/// Name of the lease used for leader election
pub const LEADER_ELECTION_LEASE_NAME: &str = "kubewarden-controller-leader";

/// Default leader election lease duration (15 seconds)
pub const DEFAULT_LEASE_DURATION_SECS: u64 = 15;

/// Default leader election renew grace period (5 seconds)
pub const DEFAULT_LEASE_GRACE_SECS: u64 = 5;

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads for Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

// ============================================================================
// Metrics Server Constants
// ============================================================================

/// Default bind address for the Prometheus metrics HTTP server
pub const DEFAULT_METRICS_BIND_ADDRESS: &str = "0.0.0.0:8088";

/// Default bind address for the health probe HTTP server
pub const DEFAULT_HEALTH_PROBE_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Path for Prometheus metrics endpoint
pub const METRICS_SERVER_PATH: &str = "/metrics";
