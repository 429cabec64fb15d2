// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Capability interface shared by the four policy kinds.
//!
//! Every downstream component (webhook synthesis, policy server configuration,
//! metrics, status handling) is written against [`Policy`] and never matches on
//! the concrete kind.
//!
//! # Unique names
//!
//! | Kind | Unique name |
//! |------|-------------|
//! | `AdmissionPolicy` | `namespaced-<namespace>-<name>` |
//! | `ClusterAdmissionPolicy` | `clusterwide-<name>` |
//! | `AdmissionPolicyGroup` | `namespaced-group-<namespace>-<name>` |
//! | `ClusterAdmissionPolicyGroup` | `clusterwide-group-<name>` |
//!
//! The prefixes never overlap, so two distinct policies can never share a unique name.

use crate::constants::{
    KIND_ADMISSION_POLICY, KIND_ADMISSION_POLICY_GROUP, KIND_CLUSTER_ADMISSION_POLICY,
    KIND_CLUSTER_ADMISSION_POLICY_GROUP,
};
use crate::crd::{
    AdmissionPolicy, AdmissionPolicyGroup, ClusterAdmissionPolicy, ClusterAdmissionPolicyGroup,
    ContextAwareResource, PolicyGroupMember, PolicyMode, PolicyModeStatus, PolicySpecBase,
    PolicyStatus, PolicyStatusEnum,
};
use crate::labels::{
    POLICY_CATEGORY_ANNOTATION, POLICY_DESCRIPTION_ANNOTATION, POLICY_SEVERITY_ANNOTATION,
    POLICY_TITLE_ANNOTATION,
};
use k8s_openapi::api::admissionregistration::v1::{MatchCondition, RuleWithOperations};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;

/// Behavior shared by `AdmissionPolicy`, `ClusterAdmissionPolicy`,
/// `AdmissionPolicyGroup` and `ClusterAdmissionPolicyGroup`.
pub trait Policy:
    Resource<DynamicType = ()>
    + ResourceExt
    + Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
    /// The kind name (e.g., `ClusterAdmissionPolicy`)
    const KIND: &'static str;

    /// Whether this kind combines several members with an expression
    const IS_GROUP: bool;

    /// Api handle for this kind, scoped to `namespace` when the kind is namespaced.
    fn api(client: Client, namespace: Option<&str>) -> Api<Self>;

    /// Globally unique name used for the webhook entry and the policy server configuration.
    fn unique_name(&self) -> String;

    /// Fields shared by every kind.
    fn base(&self) -> &PolicySpecBase;

    /// Location of the WebAssembly module. Empty for groups.
    fn module(&self) -> &str;

    /// Settings forwarded to the policy server.
    fn settings(&self) -> Option<&serde_json::Value>;

    /// Whether the policy may mutate requests. Always false for groups.
    fn is_mutating(&self) -> bool;

    /// Namespace selector requested by the user. Always `None` for namespaced kinds.
    fn namespace_selector(&self) -> Option<&LabelSelector>;

    /// Resources the policy itself may read. Always empty for groups.
    fn context_aware_resources(&self) -> &[ContextAwareResource];

    /// Members of a group keyed by name. `None` for single policies.
    fn group_members(&self) -> Option<&BTreeMap<String, PolicyGroupMember>>;

    /// Boolean expression combining group members. `None` for single policies.
    fn expression(&self) -> Option<&str>;

    /// Rejection message of a group. `None` for single policies.
    fn message(&self) -> Option<&str>;

    fn status(&self) -> Option<&PolicyStatus>;

    fn status_mut(&mut self) -> &mut Option<PolicyStatus>;

    /// Whether the policy needs access to cluster resources.
    ///
    /// A group is context-aware when any of its members is.
    fn is_context_aware(&self) -> bool {
        match self.group_members() {
            Some(members) => members
                .values()
                .any(|member| !member.context_aware_resources.is_empty()),
            None => !self.context_aware_resources().is_empty(),
        }
    }

    /// Resources read by the policy or by any group member, deduplicated and sorted.
    fn effective_context_aware_resources(&self) -> Vec<ContextAwareResource> {
        let mut resources: BTreeSet<ContextAwareResource> =
            self.context_aware_resources().iter().cloned().collect();
        if let Some(members) = self.group_members() {
            for member in members.values() {
                resources.extend(member.context_aware_resources.iter().cloned());
            }
        }
        resources.into_iter().collect()
    }

    fn policy_server(&self) -> &str {
        &self.base().policy_server
    }

    fn mode(&self) -> PolicyMode {
        self.base().mode
    }

    fn rules(&self) -> &[RuleWithOperations] {
        &self.base().rules
    }

    fn failure_policy(&self) -> Option<&str> {
        self.base().failure_policy.as_deref()
    }

    fn match_policy(&self) -> Option<&str> {
        self.base().match_policy.as_deref()
    }

    fn object_selector(&self) -> Option<&LabelSelector> {
        self.base().object_selector.as_ref()
    }

    fn match_conditions(&self) -> &[MatchCondition] {
        self.base().match_conditions.as_deref().unwrap_or_default()
    }

    fn side_effects(&self) -> Option<&str> {
        self.base().side_effects.as_deref()
    }

    fn timeout_seconds(&self) -> Option<i32> {
        self.base().timeout_seconds
    }

    fn background_audit(&self) -> bool {
        self.base().background_audit
    }

    /// Current lifecycle state, `pending` when no status was written yet.
    fn policy_status(&self) -> PolicyStatusEnum {
        self.status()
            .map(|status| status.policy_status)
            .unwrap_or_default()
    }

    fn set_status(&mut self, policy_status: PolicyStatusEnum) {
        self.status_mut()
            .get_or_insert_with(PolicyStatus::default)
            .policy_status = policy_status;
    }

    fn set_observed_mode(&mut self, mode: PolicyModeStatus) {
        self.status_mut()
            .get_or_insert_with(PolicyStatus::default)
            .mode = mode;
    }

    fn is_terminating(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }

    fn severity(&self) -> Option<&str> {
        annotation(self, POLICY_SEVERITY_ANNOTATION)
    }

    fn category(&self) -> Option<&str> {
        annotation(self, POLICY_CATEGORY_ANNOTATION)
    }

    fn title(&self) -> Option<&str> {
        annotation(self, POLICY_TITLE_ANNOTATION)
    }

    fn description(&self) -> Option<&str> {
        annotation(self, POLICY_DESCRIPTION_ANNOTATION)
    }
}

fn annotation<'a, P: Policy + ?Sized>(policy: &'a P, key: &str) -> Option<&'a str> {
    policy.annotations().get(key).map(String::as_str)
}

impl Policy for AdmissionPolicy {
    const KIND: &'static str = KIND_ADMISSION_POLICY;
    const IS_GROUP: bool = false;

    fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
        match namespace {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        }
    }

    fn unique_name(&self) -> String {
        format!(
            "namespaced-{}-{}",
            self.namespace().unwrap_or_default(),
            self.name_any()
        )
    }

    fn base(&self) -> &PolicySpecBase {
        &self.spec.base
    }

    fn module(&self) -> &str {
        &self.spec.module
    }

    fn settings(&self) -> Option<&serde_json::Value> {
        self.spec.settings.as_ref()
    }

    fn is_mutating(&self) -> bool {
        self.spec.mutating
    }

    fn namespace_selector(&self) -> Option<&LabelSelector> {
        None
    }

    fn context_aware_resources(&self) -> &[ContextAwareResource] {
        &self.spec.context_aware_resources
    }

    fn group_members(&self) -> Option<&BTreeMap<String, PolicyGroupMember>> {
        None
    }

    fn expression(&self) -> Option<&str> {
        None
    }

    fn message(&self) -> Option<&str> {
        None
    }

    fn status(&self) -> Option<&PolicyStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut Option<PolicyStatus> {
        &mut self.status
    }
}

impl Policy for ClusterAdmissionPolicy {
    const KIND: &'static str = KIND_CLUSTER_ADMISSION_POLICY;
    const IS_GROUP: bool = false;

    fn api(client: Client, _namespace: Option<&str>) -> Api<Self> {
        Api::all(client)
    }

    fn unique_name(&self) -> String {
        format!("clusterwide-{}", self.name_any())
    }

    fn base(&self) -> &PolicySpecBase {
        &self.spec.base
    }

    fn module(&self) -> &str {
        &self.spec.module
    }

    fn settings(&self) -> Option<&serde_json::Value> {
        self.spec.settings.as_ref()
    }

    fn is_mutating(&self) -> bool {
        self.spec.mutating
    }

    fn namespace_selector(&self) -> Option<&LabelSelector> {
        self.spec.namespace_selector.as_ref()
    }

    fn context_aware_resources(&self) -> &[ContextAwareResource] {
        &self.spec.context_aware_resources
    }

    fn group_members(&self) -> Option<&BTreeMap<String, PolicyGroupMember>> {
        None
    }

    fn expression(&self) -> Option<&str> {
        None
    }

    fn message(&self) -> Option<&str> {
        None
    }

    fn status(&self) -> Option<&PolicyStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut Option<PolicyStatus> {
        &mut self.status
    }
}

impl Policy for AdmissionPolicyGroup {
    const KIND: &'static str = KIND_ADMISSION_POLICY_GROUP;
    const IS_GROUP: bool = true;

    fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
        match namespace {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        }
    }

    fn unique_name(&self) -> String {
        format!(
            "namespaced-group-{}-{}",
            self.namespace().unwrap_or_default(),
            self.name_any()
        )
    }

    fn base(&self) -> &PolicySpecBase {
        &self.spec.base
    }

    fn module(&self) -> &str {
        ""
    }

    fn settings(&self) -> Option<&serde_json::Value> {
        None
    }

    fn is_mutating(&self) -> bool {
        false
    }

    fn namespace_selector(&self) -> Option<&LabelSelector> {
        None
    }

    fn context_aware_resources(&self) -> &[ContextAwareResource] {
        &[]
    }

    fn group_members(&self) -> Option<&BTreeMap<String, PolicyGroupMember>> {
        Some(&self.spec.policies)
    }

    fn expression(&self) -> Option<&str> {
        Some(&self.spec.expression)
    }

    fn message(&self) -> Option<&str> {
        Some(&self.spec.message)
    }

    fn status(&self) -> Option<&PolicyStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut Option<PolicyStatus> {
        &mut self.status
    }
}

impl Policy for ClusterAdmissionPolicyGroup {
    const KIND: &'static str = KIND_CLUSTER_ADMISSION_POLICY_GROUP;
    const IS_GROUP: bool = true;

    fn api(client: Client, _namespace: Option<&str>) -> Api<Self> {
        Api::all(client)
    }

    fn unique_name(&self) -> String {
        format!("clusterwide-group-{}", self.name_any())
    }

    fn base(&self) -> &PolicySpecBase {
        &self.spec.base
    }

    fn module(&self) -> &str {
        ""
    }

    fn settings(&self) -> Option<&serde_json::Value> {
        None
    }

    fn is_mutating(&self) -> bool {
        false
    }

    fn namespace_selector(&self) -> Option<&LabelSelector> {
        self.spec.namespace_selector.as_ref()
    }

    fn context_aware_resources(&self) -> &[ContextAwareResource] {
        &[]
    }

    fn group_members(&self) -> Option<&BTreeMap<String, PolicyGroupMember>> {
        Some(&self.spec.policies)
    }

    fn expression(&self) -> Option<&str> {
        Some(&self.spec.expression)
    }

    fn message(&self) -> Option<&str> {
        Some(&self.spec.message)
    }

    fn status(&self) -> Option<&PolicyStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut Option<PolicyStatus> {
        &mut self.status
    }
}
