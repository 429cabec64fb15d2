// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) for Kubewarden admission policies.
//!
//! This module defines all Kubernetes Custom Resource Definitions handled by the
//! controller.
//!
//! # Resource Types
//!
//! ## Infrastructure
//!
//! - [`PolicyServer`] - A deployment of the policy evaluation server (cluster-scoped)
//!
//! ## Policies
//!
//! - [`AdmissionPolicy`] - A single policy restricted to its own namespace
//! - [`ClusterAdmissionPolicy`] - A single policy evaluated cluster-wide
//! - [`AdmissionPolicyGroup`] - A namespaced group of policies combined by an expression
//! - [`ClusterAdmissionPolicyGroup`] - A cluster-wide group of policies
//!
//! # Example: Creating a Policy Server
//!
//! ```rust,no_run
//! use kubewarden_controller::crd::PolicyServerSpec;
//!
//! let spec = PolicyServerSpec {
//!     image: "ghcr.io/kubewarden/policy-server:v1.20.0".to_string(),
//!     replicas: 2,
//!     ..Default::default()
//! };
//! ```

use crate::constants::POLICY_SERVER_NAME_PREFIX;
use crate::labels::{
    COMPONENT_POLICY_SERVER, K8S_COMPONENT, K8S_INSTANCE, K8S_MANAGED_BY, K8S_PART_OF,
    MANAGED_BY_CONTROLLER, PART_OF_KUBEWARDEN,
};
use k8s_openapi::api::admissionregistration::v1::{MatchCondition, RuleWithOperations};
use k8s_openapi::api::core::v1::{
    Affinity, EnvVar, PodSecurityContext, SecurityContext, Toleration,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Schema for free-form policy settings.
///
/// Settings are opaque to the controller and forwarded verbatim to the policy server.
fn preserve_unknown_fields(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}

/// Standard Kubernetes condition reported in resource status.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition, e.g. `DeploymentReconciled` or `PolicyActive`.
    pub r#type: String,

    /// Status of the condition: True, False, or Unknown.
    pub status: String,

    /// Brief CamelCase reason for the condition's last transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message indicating details about the transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the condition transitioned from one status to another (RFC3339 format).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

// ============================================================================
// PolicyServer
// ============================================================================

/// Security contexts applied to the policy server pod and container.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyServerSecurity {
    /// Security context of the policy-server container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<SecurityContext>,

    /// Security context of the policy server pod
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod: Option<PodSecurityContext>,
}

/// `PolicyServer` runs a pool of policy evaluation servers.
///
/// Each `PolicyServer` owns a Deployment, Service, `ConfigMap`, certificate Secret and
/// optionally a `PodDisruptionBudget` in the controller's deployments namespace.
///
/// # Example
///
/// ```yaml
/// apiVersion: policies.kubewarden.io/v1
/// kind: PolicyServer
/// metadata:
///   name: default
/// spec:
///   image: ghcr.io/kubewarden/policy-server:v1.20.0
///   replicas: 2
///   minAvailable: 1
/// ```
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[kube(
    group = "policies.kubewarden.io",
    version = "v1",
    kind = "PolicyServer",
    shortname = "ps",
    doc = "PolicyServer describes a pool of Kubewarden policy servers. The controller turns it into a Deployment, Service, ConfigMap, TLS secret and optional PodDisruptionBudget."
)]
#[kube(status = "PolicyServerStatus")]
#[serde(rename_all = "camelCase")]
pub struct PolicyServerSpec {
    /// Container image of the policy server
    pub image: String,

    /// Number of policy server replicas
    #[schemars(range(min = 0))]
    pub replicas: i32,

    /// Minimum number of pods that must stay available during voluntary disruptions.
    ///
    /// Mutually exclusive with `maxUnavailable`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_available: Option<IntOrString>,

    /// Maximum number of pods that may be unavailable during voluntary disruptions.
    ///
    /// Mutually exclusive with `minAvailable`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<IntOrString>,

    /// Annotations added to the policy server pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,

    /// Extra environment variables for the policy-server container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<EnvVar>>,

    /// Service account used by the policy server pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    /// Secret of type `kubernetes.io/dockerconfigjson` used to pull policies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_secret: Option<String>,

    /// Registries or hosts that may be accessed without TLS verification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure_sources: Option<Vec<String>>,

    /// Per-host PEM certificate chains trusted when pulling policies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_authorities: Option<BTreeMap<String, Vec<String>>>,

    /// Name of a `ConfigMap` holding the Sigstore verification configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_config: Option<String>,

    /// Pod and container security contexts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_contexts: Option<PolicyServerSecurity>,

    /// Scheduling affinity of the policy server pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,

    /// Resource limits of the policy-server container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<BTreeMap<String, Quantity>>,

    /// Resource requests of the policy-server container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<BTreeMap<String, Quantity>>,

    /// Tolerations of the policy server pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,

    /// Priority class of the policy server pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
}

/// `PolicyServer` status
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyServerStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl PolicyServer {
    /// Name shared by every object the controller creates for this policy server.
    #[must_use]
    pub fn name_with_prefix(&self) -> String {
        format!("{POLICY_SERVER_NAME_PREFIX}{}", self.name_any())
    }

    /// Value of the `app` label selecting this policy server's pods.
    #[must_use]
    pub fn app_label(&self) -> String {
        format!("kubewarden-{}", self.name_with_prefix())
    }

    /// Standard labels carried by every object owned by this policy server.
    #[must_use]
    pub fn common_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (K8S_COMPONENT.to_string(), COMPONENT_POLICY_SERVER.to_string()),
            (K8S_INSTANCE.to_string(), self.name_with_prefix()),
            (K8S_PART_OF.to_string(), PART_OF_KUBEWARDEN.to_string()),
            (K8S_MANAGED_BY.to_string(), MANAGED_BY_CONTROLLER.to_string()),
        ])
    }

    /// Whether the resource is being deleted.
    #[must_use]
    pub fn is_terminating(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}

// ============================================================================
// Shared policy types
// ============================================================================

/// Lifecycle state of a policy as observed by the controller.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PolicyStatusEnum {
    /// Not yet processed by the controller
    #[default]
    Pending,
    /// Target policy server exists, webhook not yet registered
    Scheduled,
    /// Policy server is ready and the webhook entry is registered
    Active,
    /// Target policy server is missing, terminating, or not ready
    Unschedulable,
}

impl PolicyStatusEnum {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Active => "active",
            Self::Unschedulable => "unschedulable",
        }
    }
}

impl fmt::Display for PolicyStatusEnum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested enforcement mode of a policy.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Rejections are enforced
    #[default]
    Protect,
    /// Rejections are only logged
    Monitor,
}

impl PolicyMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Protect => "protect",
            Self::Monitor => "monitor",
        }
    }
}

/// Enforcement mode observed on the running policy server.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PolicyModeStatus {
    Protect,
    Monitor,
    #[default]
    Unknown,
}

impl From<PolicyMode> for PolicyModeStatus {
    fn from(mode: PolicyMode) -> Self {
        match mode {
            PolicyMode::Protect => Self::Protect,
            PolicyMode::Monitor => Self::Monitor,
        }
    }
}

/// Status shared by every policy kind.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatus {
    /// Lifecycle state of the policy
    #[serde(default)]
    pub policy_status: PolicyStatusEnum,

    /// Mode the policy is currently enforced with
    #[serde(default)]
    pub mode: PolicyModeStatus,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// A Kubernetes resource a context-aware policy is allowed to read.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub struct ContextAwareResource {
    /// API version of the resource, e.g. `apps/v1`
    pub api_version: String,
    /// Kind of the resource, e.g. `Deployment`
    pub kind: String,
}

/// Fields common to every policy kind.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpecBase {
    /// Name of the `PolicyServer` evaluating this policy
    #[serde(default = "default_policy_server")]
    pub policy_server: String,

    /// Enforcement mode
    #[serde(default)]
    pub mode: PolicyMode,

    /// Operations and resources the webhook is invoked for
    #[serde(default)]
    pub rules: Vec<RuleWithOperations>,

    /// `Fail` or `Ignore`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_policy: Option<String>,

    /// `Exact` or `Equivalent`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_policy: Option<String>,

    /// Restricts evaluation to objects matching this selector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_selector: Option<LabelSelector>,

    /// CEL conditions evaluated by the API server before calling the webhook
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_conditions: Option<Vec<MatchCondition>>,

    /// `None` or `NoneOnDryRun`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side_effects: Option<String>,

    /// Webhook call timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 1, max = 30))]
    pub timeout_seconds: Option<i32>,

    /// Whether the audit scanner evaluates this policy
    #[serde(default = "default_true")]
    pub background_audit: bool,
}

impl Default for PolicySpecBase {
    fn default() -> Self {
        Self {
            policy_server: default_policy_server(),
            mode: PolicyMode::default(),
            rules: Vec::new(),
            failure_policy: None,
            match_policy: None,
            object_selector: None,
            match_conditions: None,
            side_effects: None,
            timeout_seconds: None,
            background_audit: true,
        }
    }
}

fn default_policy_server() -> String {
    crate::constants::DEFAULT_POLICY_SERVER.to_string()
}

fn default_true() -> bool {
    true
}

/// A member of a policy group.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyGroupMember {
    /// Location of the WebAssembly module, e.g. `registry://ghcr.io/kubewarden/policies/x:v1`
    pub module: String,

    /// Settings passed to the member
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub settings: Option<serde_json::Value>,

    /// Resources the member may read
    #[serde(default)]
    pub context_aware_resources: Vec<ContextAwareResource>,
}

// ============================================================================
// Policy kinds
// ============================================================================

/// `AdmissionPolicy` evaluates a single module for objects in its own namespace.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[kube(
    group = "policies.kubewarden.io",
    version = "v1",
    kind = "AdmissionPolicy",
    namespaced,
    shortname = "ap",
    doc = "AdmissionPolicy registers a Kubewarden policy evaluated only for objects in the policy's own namespace."
)]
#[kube(status = "PolicyStatus")]
#[serde(rename_all = "camelCase")]
pub struct AdmissionPolicySpec {
    #[serde(flatten)]
    pub base: PolicySpecBase,

    /// Location of the WebAssembly module
    pub module: String,

    /// Settings passed to the policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub settings: Option<serde_json::Value>,

    /// Whether the policy may mutate requests
    #[serde(default)]
    pub mutating: bool,

    /// Resources the policy may read
    #[serde(default)]
    pub context_aware_resources: Vec<ContextAwareResource>,
}

/// `ClusterAdmissionPolicy` evaluates a single module for objects across the cluster.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[kube(
    group = "policies.kubewarden.io",
    version = "v1",
    kind = "ClusterAdmissionPolicy",
    shortname = "cap",
    doc = "ClusterAdmissionPolicy registers a Kubewarden policy evaluated for objects across the whole cluster."
)]
#[kube(status = "PolicyStatus")]
#[serde(rename_all = "camelCase")]
pub struct ClusterAdmissionPolicySpec {
    #[serde(flatten)]
    pub base: PolicySpecBase,

    /// Restricts evaluation to namespaces matching this selector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,

    /// Location of the WebAssembly module
    pub module: String,

    /// Settings passed to the policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub settings: Option<serde_json::Value>,

    /// Whether the policy may mutate requests
    #[serde(default)]
    pub mutating: bool,

    /// Resources the policy may read
    #[serde(default)]
    pub context_aware_resources: Vec<ContextAwareResource>,
}

/// `AdmissionPolicyGroup` combines several modules with a boolean expression.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[kube(
    group = "policies.kubewarden.io",
    version = "v1",
    kind = "AdmissionPolicyGroup",
    namespaced,
    shortname = "apg",
    doc = "AdmissionPolicyGroup combines several Kubewarden policies with a boolean expression, evaluated for objects in the group's own namespace."
)]
#[kube(status = "PolicyStatus")]
#[serde(rename_all = "camelCase")]
pub struct AdmissionPolicyGroupSpec {
    #[serde(flatten)]
    pub base: PolicySpecBase,

    /// Members of the group keyed by name
    pub policies: BTreeMap<String, PolicyGroupMember>,

    /// Boolean expression over members, e.g. `signed() && (trusted() || !privileged())`
    pub expression: String,

    /// Message returned when the expression rejects a request
    pub message: String,
}

/// `ClusterAdmissionPolicyGroup` combines several modules cluster-wide.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[kube(
    group = "policies.kubewarden.io",
    version = "v1",
    kind = "ClusterAdmissionPolicyGroup",
    shortname = "capg",
    doc = "ClusterAdmissionPolicyGroup combines several Kubewarden policies with a boolean expression, evaluated for objects across the whole cluster."
)]
#[kube(status = "PolicyStatus")]
#[serde(rename_all = "camelCase")]
pub struct ClusterAdmissionPolicyGroupSpec {
    #[serde(flatten)]
    pub base: PolicySpecBase,

    /// Restricts evaluation to namespaces matching this selector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,

    /// Members of the group keyed by name
    pub policies: BTreeMap<String, PolicyGroupMember>,

    /// Boolean expression over members
    pub expression: String,

    /// Message returned when the expression rejects a request
    pub message: String,
}
