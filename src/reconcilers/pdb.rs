// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `PodDisruptionBudget` sub-reconciler for policy servers.
//!
//! A policy server sets at most one of `minAvailable` / `maxUnavailable`:
//!
//! - neither set: the budget is deleted (absent budget counts as success)
//! - one set: the budget is applied with that field only; a value left behind for the
//!   other field by an earlier spec or another writer is cleared
//! - both set: the spec is invalid and the existing budget is left untouched

use crate::constants::FIELD_MANAGER;
use crate::crd::PolicyServer;
use crate::errors::ReconcileError;
use crate::labels::{K8S_INSTANCE, K8S_PART_OF, POLICY_SERVER_LABEL};
use crate::policy_server_resources::build_owner_references;
use crate::reconcilers::resources::{create_or_patch, delete_if_exists, fetch};
use crate::reconcilers::retry::retry_api_call;
use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// What the budget for a policy server should look like.
#[derive(Clone, Debug, PartialEq)]
pub enum BudgetPlan {
    /// No disruption settings: remove any existing budget
    Delete,
    /// Apply this budget
    Apply(Box<PodDisruptionBudget>),
}

/// Labels selecting the policy server pods covered by the budget.
#[must_use]
pub fn budget_selector(policy_server: &PolicyServer) -> BTreeMap<String, String> {
    BTreeMap::from([
        (K8S_INSTANCE.to_string(), policy_server.name_with_prefix()),
        (
            K8S_PART_OF.to_string(),
            crate::labels::PART_OF_KUBEWARDEN.to_string(),
        ),
        (POLICY_SERVER_LABEL.to_string(), policy_server.name_any()),
    ])
}

/// Decide the desired budget for a policy server.
///
/// # Errors
///
/// Returns [`ReconcileError::InvalidSpec`] when both `minAvailable` and
/// `maxUnavailable` are set.
pub fn plan_pod_disruption_budget(
    policy_server: &PolicyServer,
    namespace: &str,
) -> Result<BudgetPlan, ReconcileError> {
    let spec = &policy_server.spec;
    let (min_available, max_unavailable) = match (&spec.min_available, &spec.max_unavailable) {
        (None, None) => return Ok(BudgetPlan::Delete),
        (Some(_), Some(_)) => {
            return Err(ReconcileError::invalid_spec(
                "minAvailable and maxUnavailable are mutually exclusive",
            ))
        }
        (min, max) => (min.clone(), max.clone()),
    };

    // The policy server label lets the controller map budget events back to the server.
    let mut labels = policy_server.common_labels();
    labels.insert(POLICY_SERVER_LABEL.to_string(), policy_server.name_any());

    Ok(BudgetPlan::Apply(Box::new(PodDisruptionBudget {
        metadata: ObjectMeta {
            name: Some(policy_server.name_with_prefix()),
            namespace: Some(namespace.into()),
            labels: Some(labels),
            owner_references: Some(build_owner_references(policy_server)),
            ..Default::default()
        },
        spec: Some(PodDisruptionBudgetSpec {
            selector: Some(LabelSelector {
                match_labels: Some(budget_selector(policy_server)),
                ..Default::default()
            }),
            min_available,
            max_unavailable,
            ..Default::default()
        }),
        ..Default::default()
    })))
}

/// The field of `observed` that `desired` leaves unset but which still holds a value.
#[must_use]
pub fn stale_budget_field(
    desired: &PodDisruptionBudget,
    observed: &PodDisruptionBudget,
) -> Option<&'static str> {
    let desired = desired.spec.as_ref()?;
    let observed = observed.spec.as_ref()?;

    if desired.min_available.is_none() && observed.min_available.is_some() {
        Some("minAvailable")
    } else if desired.max_unavailable.is_none() && observed.max_unavailable.is_some() {
        Some("maxUnavailable")
    } else {
        None
    }
}

/// Bring the policy server's budget in line with its spec.
///
/// # Errors
///
/// Returns [`ReconcileError::InvalidSpec`] for conflicting settings, or an API error.
pub async fn reconcile_pod_disruption_budget(
    client: &Client,
    policy_server: &PolicyServer,
    namespace: &str,
) -> Result<(), ReconcileError> {
    let api: Api<PodDisruptionBudget> = Api::namespaced(client.clone(), namespace);
    let name = policy_server.name_with_prefix();

    match plan_pod_disruption_budget(policy_server, namespace)? {
        BudgetPlan::Delete => {
            debug!(policy_server = %policy_server.name_any(), "No disruption settings, removing budget");
            delete_if_exists(&api, &name).await?;
        }
        BudgetPlan::Apply(desired) => {
            if let Some(observed) = fetch(&api, &name).await? {
                if let Some(field) = stale_budget_field(&desired, &observed) {
                    info!(
                        policy_server = %policy_server.name_any(),
                        field = field,
                        "Clearing stale PodDisruptionBudget field"
                    );
                    let params = PatchParams::default();
                    let patch = Patch::Merge(json!({ "spec": { field: null } }));
                    let (api, name, params, patch) = (&api, name.as_str(), &params, &patch);
                    retry_api_call(
                        || async move { api.patch(name, params, patch).await },
                        &format!("clear {field} of PodDisruptionBudget {name}"),
                    )
                    .await?;
                }
            }
            create_or_patch(&api, desired.as_ref(), FIELD_MANAGER).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "pdb_tests.rs"]
mod pdb_tests;
