// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Generic policy controller implementation.
//!
//! One controller runs per policy kind, all sharing this code. Besides the policies
//! themselves, each controller watches:
//!
//! - `PolicyServer` resources, so that policies react when their server appears,
//!   changes or starts terminating
//! - policy server Deployments in the deployments namespace, so that policies become
//!   active as soon as a replica is ready
//!
//! Both watches map the changed object to the policies bound to it through the
//! controller's own reflector store.

use crate::context::Context;
use crate::crd::PolicyServer;
use crate::errors::ReconcileError;
use crate::labels::{KUBEWARDEN_FINALIZER, POLICY_SERVER_LABEL};
use crate::metrics::{
    record_error, record_reconciliation_error, record_reconciliation_requeue,
    record_reconciliation_success, record_resource_write, ResourceWrite,
};
use crate::policy::Policy;
use crate::reconcilers::policy::{cleanup_policy, reconcile_policy};
use crate::reconcilers::retry::backoff_key;
use anyhow::{anyhow, Result};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::runtime::finalizer;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Policies in `store` bound to the policy server named `server`.
#[must_use]
pub fn policies_bound_to<P: Policy>(store: &Store<P>, server: &str) -> Vec<ObjectRef<P>> {
    store
        .state()
        .iter()
        .filter(|policy| policy.policy_server() == server)
        .map(|policy| ObjectRef::from_obj(&**policy))
        .collect()
}

fn policy_backoff_key<P: Policy>(policy: &P) -> String {
    backoff_key(P::KIND, policy.namespace().as_deref(), &policy.name_any())
}

/// Error policy for policy controllers.
///
/// Transient failures back off exponentially per policy; other failures are retried
/// on a fixed delay.
#[allow(clippy::needless_pass_by_value)] // Signature required by kube::runtime::Controller
fn error_policy<P: Policy>(policy: Arc<P>, err: &ReconcileError, ctx: Arc<Context>) -> Action {
    let delay = ctx
        .requeue_backoff
        .after_error(&policy_backoff_key(policy.as_ref()), err);
    error!(
        kind = P::KIND,
        policy = %policy.name_any(),
        error = %err,
        retry_after = ?delay,
        "Reconciliation error"
    );
    let reason = if err.is_transient() { "transient_error" } else { "error" };
    record_reconciliation_requeue(P::KIND, reason);
    Action::requeue(delay)
}

/// Run the controller for one policy kind.
///
/// # Errors
///
/// Returns an error if the controller stream terminates abnormally.
pub async fn run_policy_controller<P: Policy>(context: Arc<Context>) -> Result<()> {
    info!("Starting {} controller", P::KIND);

    let client = context.client.clone();
    let api = Api::<P>::all(client.clone());
    let policy_servers = Api::<PolicyServer>::all(client.clone());
    let deployments =
        Api::<Deployment>::namespaced(client.clone(), context.deployments_namespace());

    let controller = Controller::new(api, WatcherConfig::default().any_semantic());
    let server_store = controller.store();
    let deployment_store = server_store.clone();

    controller
        .watches(policy_servers, WatcherConfig::default(), move |server| {
            policies_bound_to(&server_store, &server.name_any())
        })
        .watches(
            deployments,
            WatcherConfig::default().labels(POLICY_SERVER_LABEL),
            move |deployment| {
                deployment
                    .labels()
                    .get(POLICY_SERVER_LABEL)
                    .map(|server| policies_bound_to(&deployment_store, server))
                    .unwrap_or_default()
            },
        )
        .shutdown_on_signal()
        .run(reconcile_wrapper::<P>, error_policy::<P>, context)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Reconciliation wrapper with finalizer support.
///
/// 1. Finalizer management (added on apply, removed after cleanup)
/// 2. Webhook registration and status, or webhook removal on deletion
/// 3. Metrics recording
async fn reconcile_wrapper<P: Policy>(
    policy: Arc<P>,
    context: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let start = std::time::Instant::now();
    debug!(
        kind = P::KIND,
        policy = %policy.name_any(),
        namespace = ?policy.namespace(),
        "Reconcile wrapper called"
    );

    let api = P::api(context.client.clone(), policy.namespace().as_deref());

    let result = finalizer(&api, KUBEWARDEN_FINALIZER, policy.clone(), |event| async {
        match event {
            finalizer::Event::Apply(policy) => reconcile_policy(&context, policy.as_ref()).await,
            finalizer::Event::Cleanup(policy) => {
                cleanup_policy(&context, policy.as_ref()).await?;
                info!(
                    "Successfully removed {} webhook entry: {}",
                    P::KIND,
                    policy.name_any()
                );
                record_resource_write(P::KIND, ResourceWrite::Deleted);
                Ok(Action::await_change())
            }
        }
    })
    .await;

    let result = result.map_err(|e: finalizer::Error<ReconcileError>| match e {
        finalizer::Error::ApplyFailed(err) | finalizer::Error::CleanupFailed(err) => err,
        finalizer::Error::AddFinalizer(err) | finalizer::Error::RemoveFinalizer(err) => {
            ReconcileError::from(err)
        }
        finalizer::Error::UnnamedObject => ReconcileError::from(anyhow!("{} has no name", P::KIND)),
        finalizer::Error::InvalidFinalizer => {
            ReconcileError::from(anyhow!("Invalid finalizer for {}", P::KIND))
        }
    });

    let duration = start.elapsed();
    match &result {
        Ok(_) => {
            record_reconciliation_success(P::KIND, duration);
            context.requeue_backoff.reset(&policy_backoff_key(policy.as_ref()));
        }
        Err(err) => {
            record_reconciliation_error(P::KIND, duration);
            record_error(P::KIND, err.status_reason());
        }
    }

    result
}

#[cfg(test)]
#[path = "policy_controller_tests.rs"]
mod policy_controller_tests;
