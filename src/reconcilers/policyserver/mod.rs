// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `PolicyServer` reconciliation logic.
//!
//! Converges, in dependency order, every object a policy server needs:
//!
//! 1. CA root and policy server certificate secrets
//! 2. `ConfigMap` with the bound policies and registry sources
//! 3. Deployment, restarted whenever the configuration hash changes
//! 4. Service
//! 5. `PodDisruptionBudget`, or its removal
//!
//! Each step records a status condition. A failing step stops the pass; later steps
//! keep their previous condition.

pub mod deletion;

use crate::constants::{
    FIELD_MANAGER, KIND_POLICY_SERVER, PENDING_REQUEUE_DURATION_SECS, READY_REQUEUE_DURATION_SECS,
};
use crate::context::Context;
use crate::crd::{
    AdmissionPolicy, AdmissionPolicyGroup, ClusterAdmissionPolicy, ClusterAdmissionPolicyGroup,
    PolicyServer,
};
use crate::errors::ReconcileError;
use crate::labels::KUBEWARDEN_FINALIZER;
use crate::metrics::record_reconciliation_requeue;
use crate::policy::Policy;
use crate::policy_server_resources::{
    build_configmap, build_deployment, build_policy_config_entry, build_service, config_version,
    validate_image_pull_secret, validate_policy_server_spec, PolicyServerConfigEntry,
};
use crate::reconcilers::certificate::{check_client_ca, ensure_policy_server_cert, reconcile_ca_root};
use crate::reconcilers::finalizers::{ensure_finalizer, finalizer_phase, FinalizerPhase};
use crate::reconcilers::pagination::list_all_paginated;
use crate::reconcilers::pdb::reconcile_pod_disruption_budget;
use crate::reconcilers::policy::group_expression::validate_group;
use crate::reconcilers::resources::create_or_patch;
use crate::reconcilers::retry::retry_api_call;
use crate::reconcilers::status::PolicyServerStatusUpdater;
use crate::status_reasons::{
    condition_status, CONDITION_CA_ROOT_SECRET_RECONCILED, CONDITION_CERT_SECRET_RECONCILED,
    CONDITION_CONFIG_MAP_RECONCILED, CONDITION_DEPLOYMENT_RECONCILED, CONDITION_PDB_RECONCILED,
    CONDITION_SERVICE_RECONCILED, REASON_INVALID_SPEC, REASON_RECONCILIATION_SUCCEEDED,
};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::api::ListParams;
use kube::runtime::controller::Action;
use kube::{Api, Client, ResourceExt};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Conditions written by a full reconcile pass, in step order.
pub const RECONCILE_CONDITIONS: &[&str] = &[
    CONDITION_CA_ROOT_SECRET_RECONCILED,
    CONDITION_CERT_SECRET_RECONCILED,
    CONDITION_CONFIG_MAP_RECONCILED,
    CONDITION_DEPLOYMENT_RECONCILED,
    CONDITION_SERVICE_RECONCILED,
    CONDITION_PDB_RECONCILED,
];

/// Bound policies of one kind that belong in the policy server configuration.
///
/// Terminating policies are left out, and so are groups that fail validation: the
/// policy server refuses to start with an unparseable group.
#[must_use]
pub fn config_entries<P: Policy>(
    policies: &[P],
    policy_server: &str,
) -> Vec<(String, PolicyServerConfigEntry)> {
    policies
        .iter()
        .filter(|policy| policy.policy_server() == policy_server && !policy.is_terminating())
        .filter(|policy| match (policy.group_members(), policy.expression()) {
            (Some(members), Some(expression)) => validate_group(members, expression).is_ok(),
            _ => true,
        })
        .map(build_policy_config_entry)
        .collect()
}

/// Every policy of kind `P` bound to `policy_server`, terminating ones included.
///
/// # Errors
///
/// Returns an error if the policies cannot be listed.
pub async fn list_bound_policies<P: Policy>(
    client: &Client,
    policy_server: &str,
) -> Result<Vec<P>, ReconcileError> {
    let api = Api::<P>::all(client.clone());
    Ok(list_all_paginated(&api, ListParams::default())
        .await?
        .into_iter()
        .filter(|policy| policy.policy_server() == policy_server)
        .collect())
}

async fn collect_entries<P: Policy>(
    client: &Client,
    policy_server: &str,
    entries: &mut BTreeMap<String, PolicyServerConfigEntry>,
) -> Result<(), ReconcileError> {
    let policies = list_bound_policies::<P>(client, policy_server).await?;
    entries.extend(config_entries(&policies, policy_server));
    Ok(())
}

/// Configuration entries of every policy bound to `policy_server`, keyed by unique name.
async fn bound_policy_entries(
    client: &Client,
    policy_server: &str,
) -> Result<BTreeMap<String, PolicyServerConfigEntry>, ReconcileError> {
    let mut entries = BTreeMap::new();
    collect_entries::<AdmissionPolicy>(client, policy_server, &mut entries).await?;
    collect_entries::<ClusterAdmissionPolicy>(client, policy_server, &mut entries).await?;
    collect_entries::<AdmissionPolicyGroup>(client, policy_server, &mut entries).await?;
    collect_entries::<ClusterAdmissionPolicyGroup>(client, policy_server, &mut entries).await?;
    Ok(entries)
}

/// Spec violations, including those that depend on objects in the cluster.
async fn spec_violations(
    context: &Context,
    policy_server: &PolicyServer,
) -> Result<Vec<String>, ReconcileError> {
    let mut violations = validate_policy_server_spec(&policy_server.name_any(), &policy_server.spec)
        .err()
        .unwrap_or_default();

    if let Some(pull_secret) = policy_server.spec.image_pull_secret.as_deref() {
        let namespace = context.deployments_namespace();
        let secrets: Api<Secret> = Api::namespaced(context.client.clone(), namespace);
        let secrets = &secrets;
        let secret = retry_api_call(
            || async move { secrets.get_opt(pull_secret).await },
            &format!("get Secret {pull_secret}"),
        )
        .await?;
        if let Err(violation) = validate_image_pull_secret(pull_secret, namespace, secret.as_ref()) {
            violations.push(violation);
        }
    }

    Ok(violations)
}

/// Record the outcome of one step, passing the error through.
fn record_step<T>(
    status: &mut PolicyServerStatusUpdater,
    condition: &str,
    result: Result<T, ReconcileError>,
) -> Result<T, ReconcileError> {
    match &result {
        Ok(_) => status.set_condition(
            condition,
            condition_status(true),
            REASON_RECONCILIATION_SUCCEEDED,
            "",
        ),
        Err(err) => status.set_condition(
            condition,
            condition_status(false),
            err.status_reason(),
            &err.to_string(),
        ),
    }
    result
}

async fn reconcile_steps(
    context: &Context,
    policy_server: &PolicyServer,
    status: &mut PolicyServerStatusUpdater,
) -> Result<(), ReconcileError> {
    let client = &context.client;
    let config = &context.config;
    let namespace = context.deployments_namespace();
    let name = policy_server.name_any();

    // 1. Certificates
    let ca = record_step(
        status,
        CONDITION_CA_ROOT_SECRET_RECONCILED,
        reconcile_ca_root(client, namespace).await,
    )?;
    let cert_result: Result<bool, ReconcileError> = async {
        check_client_ca(client, config).await?;
        ensure_policy_server_cert(client, policy_server, namespace, &ca).await
    }
    .await;
    record_step(status, CONDITION_CERT_SECRET_RECONCILED, cert_result)?;

    // 2. ConfigMap
    let configmap_result: Result<String, ReconcileError> = async {
        let entries = bound_policy_entries(client, &name).await?;
        let configmap = build_configmap(policy_server, namespace, &entries)
            .map_err(|e| ReconcileError::Other(e.into()))?;
        let version = config_version(configmap.data.as_ref().unwrap_or(&BTreeMap::new()));

        let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
        create_or_patch(&api, &configmap, FIELD_MANAGER).await?;
        debug!(policy_server = %name, policies = entries.len(), version = %version, "ConfigMap reconciled");
        Ok(version)
    }
    .await;
    let version = record_step(status, CONDITION_CONFIG_MAP_RECONCILED, configmap_result)?;

    // 3. Deployment
    let deployment_result: Result<(), ReconcileError> = async {
        let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
        create_or_patch(&api, &build_deployment(policy_server, config, &version), FIELD_MANAGER)
            .await?;
        Ok(())
    }
    .await;
    record_step(status, CONDITION_DEPLOYMENT_RECONCILED, deployment_result)?;

    // 4. Service
    let service_result: Result<(), ReconcileError> = async {
        let api: Api<Service> = Api::namespaced(client.clone(), namespace);
        create_or_patch(&api, &build_service(policy_server, config), FIELD_MANAGER).await?;
        Ok(())
    }
    .await;
    record_step(status, CONDITION_SERVICE_RECONCILED, service_result)?;

    // 5. PodDisruptionBudget
    record_step(
        status,
        CONDITION_PDB_RECONCILED,
        reconcile_pod_disruption_budget(client, policy_server, namespace).await,
    )?;

    Ok(())
}

/// Reconcile a `PolicyServer`.
///
/// Invalid specs and missing dependencies are reported through status conditions and
/// requeued normally; only transient API failures are returned as errors.
///
/// # Errors
///
/// Returns an error for transient API failures, which the controller retries with backoff.
pub async fn reconcile_policy_server(
    context: &Context,
    policy_server: &PolicyServer,
) -> Result<Action, ReconcileError> {
    let name = policy_server.name_any();
    let api: Api<PolicyServer> = Api::all(context.client.clone());

    match finalizer_phase(policy_server, KUBEWARDEN_FINALIZER) {
        FinalizerPhase::Gone => return Ok(Action::await_change()),
        FinalizerPhase::Terminating => {
            return deletion::finalize_policy_server(context, &api, policy_server).await;
        }
        FinalizerPhase::Active => ensure_finalizer(&api, policy_server, KUBEWARDEN_FINALIZER).await?,
    }

    info!("Reconciling PolicyServer: {}", name);
    let mut status = PolicyServerStatusUpdater::new(policy_server);

    let violations = spec_violations(context, policy_server).await?;
    if !violations.is_empty() {
        let message = violations.join("; ");
        warn!(policy_server = %name, violations = %message, "Invalid PolicyServer spec");
        for condition in RECONCILE_CONDITIONS {
            status.set_condition(condition, condition_status(false), REASON_INVALID_SPEC, &message);
        }
        status.apply(&context.client).await?;
        return Ok(Action::await_change());
    }

    let outcome = reconcile_steps(context, policy_server, &mut status).await;
    if outcome.is_ok() {
        status.set_observed_generation(policy_server.metadata.generation);
    }
    status.apply(&context.client).await?;

    match outcome {
        Ok(()) => {
            info!("Successfully reconciled PolicyServer: {}", name);
            Ok(Action::requeue(Duration::from_secs(READY_REQUEUE_DURATION_SECS)))
        }
        Err(err) if err.is_transient() => Err(err),
        Err(err) => {
            warn!(policy_server = %name, error = %err, "PolicyServer not fully reconciled");
            if matches!(err, ReconcileError::InvalidSpec { .. }) {
                Ok(Action::await_change())
            } else {
                record_reconciliation_requeue(KIND_POLICY_SERVER, "dependency_wait");
                Ok(Action::requeue(Duration::from_secs(PENDING_REQUEUE_DURATION_SECS)))
            }
        }
    }
}
