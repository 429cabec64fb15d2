// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Webhook registration for policies.
//!
//! All policies share two admission configurations, `kubewarden-policies-validating` and
//! `kubewarden-policies-mutating`. Each policy owns exactly one entry, named
//! `<uniqueName>.kubewarden.admission`, in one of them.
//!
//! Entries are written with server-side apply under a field manager unique to the policy.
//! The `webhooks` list is keyed by entry name, so concurrent writers never clobber each
//! other's entries, and applying an empty list under a policy's manager removes exactly
//! that policy's entry. The same ownership record tells which fields a policy dropped
//! since its last write.

use crate::constants::{
    ADMISSION_REVIEW_VERSIONS, FIELD_MANAGER, MUTATING_WEBHOOK_CONFIGURATION_NAME,
    POLICY_SERVER_NAME_PREFIX, POLICY_SERVER_PORT, VALIDATE_PATH_PREFIX,
    VALIDATING_WEBHOOK_CONFIGURATION_NAME, WEBHOOK_NAME_SUFFIX,
};
use crate::errors::ReconcileError;
use crate::labels::{K8S_NAMESPACE_NAME, K8S_PART_OF, PART_OF_KUBEWARDEN};
use crate::policy::Policy;
use crate::reconcilers::drift::{applied_fields, is_subset, owns_unwanted_field};
use crate::reconcilers::retry::retry_api_call;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhook, MutatingWebhookConfiguration, ServiceReference, ValidatingWebhook,
    ValidatingWebhookConfiguration, WebhookClientConfig,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, LabelSelectorRequirement, ObjectMeta,
};
use k8s_openapi::ByteString;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Field managers longer than this are rejected by the API server.
const MAX_FIELD_MANAGER_LENGTH: usize = 128;

const DEFAULT_SIDE_EFFECTS: &str = "None";

/// Which shared admission configuration an entry lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WebhookKind {
    Validating,
    Mutating,
}

impl WebhookKind {
    /// Groups are always validating.
    #[must_use]
    pub fn for_policy<P: Policy>(policy: &P) -> Self {
        if policy.is_mutating() {
            Self::Mutating
        } else {
            Self::Validating
        }
    }

    #[must_use]
    pub fn configuration_name(self) -> &'static str {
        match self {
            Self::Validating => VALIDATING_WEBHOOK_CONFIGURATION_NAME,
            Self::Mutating => MUTATING_WEBHOOK_CONFIGURATION_NAME,
        }
    }

    #[must_use]
    pub fn kind(self) -> &'static str {
        match self {
            Self::Validating => "ValidatingWebhookConfiguration",
            Self::Mutating => "MutatingWebhookConfiguration",
        }
    }

    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::Validating => Self::Mutating,
            Self::Mutating => Self::Validating,
        }
    }
}

/// Inputs of the entry builder that do not come from the policy itself.
#[derive(Clone, Copy, Debug)]
pub struct WebhookParams<'a> {
    /// Namespace where policy server services live
    pub deployments_namespace: &'a str,
    /// PEM of the CA root that signed the policy server certificates
    pub ca_bundle: &'a str,
    /// Whether the API server supports `matchConditions`
    pub match_conditions_enabled: bool,
}

/// Name of the admission entry for a policy.
#[must_use]
pub fn webhook_name<P: Policy>(policy: &P) -> String {
    format!("{}{WEBHOOK_NAME_SUFFIX}", policy.unique_name())
}

/// Field manager under which a policy writes its entry.
///
/// Long unique names are hashed to stay within the API server's length limit.
#[must_use]
pub fn policy_field_manager<P: Policy>(policy: &P) -> String {
    let manager = format!("{FIELD_MANAGER}/{}", policy.unique_name());
    if manager.len() <= MAX_FIELD_MANAGER_LENGTH {
        manager
    } else {
        let digest = format!("{:x}", Sha256::digest(policy.unique_name().as_bytes()));
        format!("{FIELD_MANAGER}/{}", &digest[..32])
    }
}

/// Namespace selector of a policy's entry.
///
/// Namespaced policies are pinned to their own namespace. Cluster-wide policies keep the
/// user's selector and additionally never apply to the deployments namespace, so that a
/// broken policy cannot lock the policy servers out.
#[must_use]
pub fn build_namespace_selector<P: Policy>(
    policy: &P,
    deployments_namespace: &str,
) -> LabelSelector {
    if let Some(namespace) = policy.namespace() {
        return LabelSelector {
            match_labels: Some(BTreeMap::from([(
                K8S_NAMESPACE_NAME.to_string(),
                namespace,
            )])),
            ..Default::default()
        };
    }

    let mut selector = policy.namespace_selector().cloned().unwrap_or_default();
    selector
        .match_expressions
        .get_or_insert_with(Vec::new)
        .push(LabelSelectorRequirement {
            key: K8S_NAMESPACE_NAME.to_string(),
            operator: "NotIn".to_string(),
            values: Some(vec![deployments_namespace.to_string()]),
        });
    selector
}

/// Builds the admission entry of a policy, in its validating form.
#[must_use]
pub fn build_validating_webhook<P: Policy>(policy: &P, params: &WebhookParams<'_>) -> ValidatingWebhook {
    let unique_name = policy.unique_name();
    let match_conditions = if params.match_conditions_enabled && !policy.match_conditions().is_empty() {
        Some(policy.match_conditions().to_vec())
    } else {
        None
    };

    ValidatingWebhook {
        name: webhook_name(policy),
        admission_review_versions: ADMISSION_REVIEW_VERSIONS
            .iter()
            .map(|v| (*v).to_string())
            .collect(),
        client_config: WebhookClientConfig {
            ca_bundle: Some(ByteString(params.ca_bundle.as_bytes().to_vec())),
            service: Some(ServiceReference {
                name: format!("{POLICY_SERVER_NAME_PREFIX}{}", policy.policy_server()),
                namespace: params.deployments_namespace.to_string(),
                path: Some(format!("{VALIDATE_PATH_PREFIX}{unique_name}")),
                port: Some(POLICY_SERVER_PORT),
            }),
            url: None,
        },
        rules: Some(policy.rules().to_vec()),
        failure_policy: policy.failure_policy().map(str::to_string),
        match_policy: policy.match_policy().map(str::to_string),
        namespace_selector: Some(build_namespace_selector(policy, params.deployments_namespace)),
        object_selector: policy.object_selector().cloned(),
        side_effects: policy
            .side_effects()
            .unwrap_or(DEFAULT_SIDE_EFFECTS)
            .to_string(),
        timeout_seconds: policy.timeout_seconds(),
        match_conditions,
    }
}

/// Builds the admission entry of a mutating policy.
#[must_use]
pub fn build_mutating_webhook<P: Policy>(policy: &P, params: &WebhookParams<'_>) -> MutatingWebhook {
    let entry = build_validating_webhook(policy, params);
    MutatingWebhook {
        name: entry.name,
        admission_review_versions: entry.admission_review_versions,
        client_config: entry.client_config,
        rules: entry.rules,
        failure_policy: entry.failure_policy,
        match_policy: entry.match_policy,
        namespace_selector: entry.namespace_selector,
        object_selector: entry.object_selector,
        side_effects: entry.side_effects,
        timeout_seconds: entry.timeout_seconds,
        match_conditions: entry.match_conditions,
        reinvocation_policy: None,
    }
}

/// The entry of a policy as JSON, in the configuration it belongs to.
///
/// # Errors
///
/// Returns an error if the entry cannot be serialized.
pub fn desired_entry<P: Policy>(
    policy: &P,
    params: &WebhookParams<'_>,
) -> Result<(WebhookKind, Value), ReconcileError> {
    let kind = WebhookKind::for_policy(policy);
    let entry = match kind {
        WebhookKind::Validating => serde_json::to_value(build_validating_webhook(policy, params))?,
        WebhookKind::Mutating => serde_json::to_value(build_mutating_webhook(policy, params))?,
    };
    Ok((kind, entry))
}

/// Apply body for a shared configuration carrying `entries`.
#[must_use]
pub fn configuration_patch(kind: WebhookKind, entries: Vec<Value>) -> Value {
    json!({
        "apiVersion": "admissionregistration.k8s.io/v1",
        "kind": kind.kind(),
        "metadata": {
            "name": kind.configuration_name(),
            "labels": { K8S_PART_OF: PART_OF_KUBEWARDEN },
        },
        "webhooks": entries,
    })
}

/// A shared admission configuration as read from the cluster.
#[derive(Clone, Debug, Default)]
pub struct ObservedConfiguration {
    pub metadata: ObjectMeta,
    /// Entries serialized to JSON
    pub entries: Vec<Value>,
}

impl ObservedConfiguration {
    /// The entry named `name`, if present.
    #[must_use]
    pub fn entry(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|entry| entry.get("name").and_then(Value::as_str) == Some(name))
    }
}

/// Whether `desired` has to be applied over the observed configuration.
///
/// An entry is up to date when it holds every desired value and the policy's field
/// manager does not own fields the desired entry dropped, such as a removed object
/// selector or timeout.
#[must_use]
pub fn entry_needs_apply(
    observed: Option<&ObservedConfiguration>,
    kind: WebhookKind,
    desired: &Value,
    field_manager: &str,
) -> bool {
    let Some(observed) = observed else {
        return true;
    };
    let Some(name) = desired.get("name").and_then(Value::as_str) else {
        return true;
    };
    let Some(entry) = observed.entry(name) else {
        return true;
    };
    if !is_subset(desired, entry) {
        return true;
    }
    applied_fields(&observed.metadata, field_manager).is_some_and(|owned| {
        owns_unwanted_field(owned, &configuration_patch(kind, vec![desired.clone()]))
    })
}

async fn observed_configuration(
    client: &Client,
    kind: WebhookKind,
) -> Result<Option<ObservedConfiguration>, ReconcileError> {
    let name = kind.configuration_name();
    let operation = format!("get {} {name}", kind.kind());
    let observed = match kind {
        WebhookKind::Validating => {
            let api = Api::<ValidatingWebhookConfiguration>::all(client.clone());
            let api = &api;
            retry_api_call(|| async move { api.get_opt(name).await }, &operation)
                .await?
                .map(|config| to_observed(config.metadata, config.webhooks.unwrap_or_default()))
        }
        WebhookKind::Mutating => {
            let api = Api::<MutatingWebhookConfiguration>::all(client.clone());
            let api = &api;
            retry_api_call(|| async move { api.get_opt(name).await }, &operation)
                .await?
                .map(|config| to_observed(config.metadata, config.webhooks.unwrap_or_default()))
        }
    };
    observed.transpose()
}

fn to_observed<W: Serialize>(
    metadata: ObjectMeta,
    webhooks: Vec<W>,
) -> Result<ObservedConfiguration, ReconcileError> {
    let entries = webhooks
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ObservedConfiguration { metadata, entries })
}

async fn apply_configuration(
    client: &Client,
    kind: WebhookKind,
    body: &Value,
    field_manager: &str,
) -> Result<(), ReconcileError> {
    let name = kind.configuration_name();
    let operation = format!("apply {} {name}", kind.kind());
    let params = PatchParams::apply(field_manager).force();
    let patch = Patch::Apply(body);
    let (params, patch) = (&params, &patch);
    match kind {
        WebhookKind::Validating => {
            let api = Api::<ValidatingWebhookConfiguration>::all(client.clone());
            let api = &api;
            retry_api_call(|| async move { api.patch(name, params, patch).await }, &operation).await?;
        }
        WebhookKind::Mutating => {
            let api = Api::<MutatingWebhookConfiguration>::all(client.clone());
            let api = &api;
            retry_api_call(|| async move { api.patch(name, params, patch).await }, &operation).await?;
        }
    }
    Ok(())
}

async fn remove_entry<P: Policy>(
    client: &Client,
    policy: &P,
    kind: WebhookKind,
) -> Result<bool, ReconcileError> {
    let name = webhook_name(policy);
    let present = observed_configuration(client, kind)
        .await?
        .is_some_and(|observed| observed.entry(&name).is_some());
    if !present {
        return Ok(false);
    }

    info!(
        policy = %policy.name_any(),
        configuration = kind.configuration_name(),
        entry = %name,
        "Removing webhook entry"
    );
    apply_configuration(
        client,
        kind,
        &configuration_patch(kind, Vec::new()),
        &policy_field_manager(policy),
    )
    .await?;
    Ok(true)
}

/// Register (or refresh) the admission entry of a policy.
///
/// Skips the write when the observed entry is up to date (see [`entry_needs_apply`]).
/// When a policy changed between mutating and validating, its entry in the other
/// configuration is removed.
///
/// # Errors
///
/// Returns an error if reading or applying either configuration fails.
pub async fn register_policy_webhook<P: Policy>(
    client: &Client,
    policy: &P,
    params: &WebhookParams<'_>,
) -> Result<(), ReconcileError> {
    let (kind, desired) = desired_entry(policy, params)?;
    let name = webhook_name(policy);
    let field_manager = policy_field_manager(policy);

    let observed = observed_configuration(client, kind).await?;
    if entry_needs_apply(observed.as_ref(), kind, &desired, &field_manager) {
        info!(
            policy = %policy.name_any(),
            configuration = kind.configuration_name(),
            entry = %name,
            "Applying webhook entry"
        );
        apply_configuration(
            client,
            kind,
            &configuration_patch(kind, vec![desired]),
            &field_manager,
        )
        .await?;
    } else {
        debug!(policy = %policy.name_any(), entry = %name, "Webhook entry up to date");
    }

    remove_entry(client, policy, kind.other()).await?;
    Ok(())
}

/// Remove the admission entry of a policy from both configurations.
///
/// A policy without an entry is a no-op.
///
/// # Errors
///
/// Returns an error if reading or applying either configuration fails.
pub async fn unregister_policy_webhook<P: Policy>(
    client: &Client,
    policy: &P,
) -> Result<(), ReconcileError> {
    remove_entry(client, policy, WebhookKind::Validating).await?;
    remove_entry(client, policy, WebhookKind::Mutating).await?;
    Ok(())
}

#[cfg(test)]
#[path = "webhook_tests.rs"]
mod webhook_tests;
