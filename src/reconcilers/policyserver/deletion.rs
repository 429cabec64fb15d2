// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Deletion of a `PolicyServer`.
//!
//! The finalizer stays in place until everything the server owned is gone:
//!
//! 1. bound policies are deleted, and we wait for them to disappear (their own
//!    finalizers remove their webhook entries)
//! 2. owned objects are deleted: Deployment, Service, `ConfigMap`,
//!    `PodDisruptionBudget` and certificate Secret
//! 3. we wait until those objects and the server's pods are gone
//!
//! Each pass performs whatever step is due and requeues shortly until the last one
//! completes.

use crate::constants::{DELETION_REQUEUE_DURATION_SECS, KIND_POLICY_SERVER};
use crate::context::Context;
use crate::crd::{
    AdmissionPolicy, AdmissionPolicyGroup, ClusterAdmissionPolicy, ClusterAdmissionPolicyGroup,
    PolicyServer,
};
use crate::errors::ReconcileError;
use crate::labels::{KUBEWARDEN_FINALIZER, POLICY_SERVER_LABEL};
use crate::metrics::{record_reconciliation_requeue, record_resource_write, ResourceWrite};
use crate::policy::Policy;
use crate::reconcilers::finalizers::remove_finalizer;
use crate::reconcilers::policyserver::list_bound_policies;
use crate::reconcilers::resources::{delete_if_exists, exists};
use crate::reconcilers::retry::retry_api_call;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::ListParams;
use kube::runtime::controller::Action;
use kube::{Api, Client, ResourceExt};
use std::time::Duration;
use tracing::{debug, info};

/// Where the deletion of a policy server stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeletionProgress {
    /// Bound policies still exist
    WaitingForPolicies(usize),
    /// Owned objects still exist
    WaitingForResources(usize),
    /// Policy server pods are still running
    WaitingForPods(usize),
    /// Nothing is left; the finalizer may be removed
    Complete,
}

impl DeletionProgress {
    /// Derive progress from what is still present, earliest step first.
    #[must_use]
    pub fn from_remaining(policies: usize, resources: usize, pods: usize) -> Self {
        if policies > 0 {
            Self::WaitingForPolicies(policies)
        } else if resources > 0 {
            Self::WaitingForResources(resources)
        } else if pods > 0 {
            Self::WaitingForPods(pods)
        } else {
            Self::Complete
        }
    }
}

/// Delete the bound policies of one kind that are not already terminating.
///
/// Returns how many bound policies of that kind still exist.
async fn delete_bound_policies<P: Policy>(
    client: &Client,
    policy_server: &str,
) -> Result<usize, ReconcileError> {
    let policies = list_bound_policies::<P>(client, policy_server).await?;

    for policy in policies.iter().filter(|policy| !policy.is_terminating()) {
        info!(
            kind = P::KIND,
            policy = %policy.name_any(),
            policy_server = %policy_server,
            "Deleting policy bound to deleted PolicyServer"
        );
        let api = P::api(client.clone(), policy.namespace().as_deref());
        delete_if_exists(&api, &policy.name_any()).await?;
    }

    Ok(policies.len())
}

async fn remaining_policies(
    client: &Client,
    policy_server: &str,
) -> Result<usize, ReconcileError> {
    Ok(delete_bound_policies::<AdmissionPolicy>(client, policy_server).await?
        + delete_bound_policies::<ClusterAdmissionPolicy>(client, policy_server).await?
        + delete_bound_policies::<AdmissionPolicyGroup>(client, policy_server).await?
        + delete_bound_policies::<ClusterAdmissionPolicyGroup>(client, policy_server).await?)
}

/// Delete every object owned by the policy server and count those still present.
async fn remaining_resources(
    client: &Client,
    namespace: &str,
    name: &str,
) -> Result<usize, ReconcileError> {
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let services: Api<Service> = Api::namespaced(client.clone(), namespace);
    let configmaps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let budgets: Api<PodDisruptionBudget> = Api::namespaced(client.clone(), namespace);
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);

    delete_if_exists(&deployments, name).await?;
    delete_if_exists(&services, name).await?;
    delete_if_exists(&configmaps, name).await?;
    delete_if_exists(&budgets, name).await?;
    delete_if_exists(&secrets, name).await?;

    let present = [
        exists(&deployments, name).await?,
        exists(&services, name).await?,
        exists(&configmaps, name).await?,
        exists(&budgets, name).await?,
        exists(&secrets, name).await?,
    ];
    Ok(present.into_iter().filter(|present| *present).count())
}

async fn remaining_pods(
    client: &Client,
    namespace: &str,
    policy_server: &str,
) -> Result<usize, ReconcileError> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let selector = format!("{POLICY_SERVER_LABEL}={policy_server}");
    let params = ListParams::default().labels(&selector);
    let (pods, params) = (&pods, &params);
    let list = retry_api_call(
        || async move { pods.list(params).await },
        &format!("list pods of PolicyServer {policy_server}"),
    )
    .await?;
    Ok(list.items.len())
}

async fn deletion_progress(
    client: &Client,
    namespace: &str,
    policy_server: &PolicyServer,
) -> Result<DeletionProgress, ReconcileError> {
    let name = policy_server.name_any();

    let policies = remaining_policies(client, &name).await?;
    if policies > 0 {
        return Ok(DeletionProgress::from_remaining(policies, 0, 0));
    }

    let resources = remaining_resources(client, namespace, &policy_server.name_with_prefix()).await?;
    let pods = remaining_pods(client, namespace, &name).await?;
    Ok(DeletionProgress::from_remaining(0, resources, pods))
}

/// Advance the deletion of a terminating `PolicyServer`.
///
/// # Errors
///
/// Returns an error if listing, deleting or removing the finalizer fails.
pub async fn finalize_policy_server(
    context: &Context,
    api: &Api<PolicyServer>,
    policy_server: &PolicyServer,
) -> Result<Action, ReconcileError> {
    let name = policy_server.name_any();
    let progress =
        deletion_progress(&context.client, context.deployments_namespace(), policy_server).await?;

    if progress != DeletionProgress::Complete {
        debug!(policy_server = %name, progress = ?progress, "Waiting for PolicyServer cleanup");
        record_reconciliation_requeue(KIND_POLICY_SERVER, "deletion_wait");
        return Ok(Action::requeue(Duration::from_secs(
            DELETION_REQUEUE_DURATION_SECS,
        )));
    }

    remove_finalizer(api, policy_server, KUBEWARDEN_FINALIZER).await?;
    record_resource_write(KIND_POLICY_SERVER, ResourceWrite::Deleted);
    info!("Successfully deleted PolicyServer: {}", name);
    Ok(Action::await_change())
}

#[cfg(test)]
#[path = "deletion_tests.rs"]
mod deletion_tests;
