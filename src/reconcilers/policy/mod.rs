// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconciler shared by the four policy kinds.
//!
//! Every pass re-derives the policy status from what it observes:
//!
//! | Observation | Status | Mode |
//! |-------------|--------|------|
//! | invalid group | `unschedulable` | `unknown` |
//! | policy server missing or terminating | `unschedulable` | `unknown` |
//! | policy server has no ready replica | `unschedulable` | `unknown` |
//! | ready, webhook entry not written | `scheduled` | `unknown` |
//! | ready, webhook entry written | `active` | spec mode |
//!
//! The status is written only when it changed.

pub mod group_expression;
pub mod webhook;

use crate::constants::{PENDING_REQUEUE_DURATION_SECS, READY_REQUEUE_DURATION_SECS};
use crate::context::Context;
use crate::crd::{PolicyMode, PolicyModeStatus, PolicyServer, PolicyStatusEnum};
use crate::errors::ReconcileError;
use crate::metrics::{record_policy_count, record_reconciliation_requeue};
use crate::policy::Policy;
use crate::reconcilers::certificate::load_ca_root;
use crate::reconcilers::retry::retry_api_call;
use crate::reconcilers::status::PolicyStatusUpdater;
use crate::status_reasons::{
    condition_status, CONDITION_POLICY_ACTIVE, CONDITION_POLICY_SERVER_CONFIGURATION_UP_TO_DATE,
    REASON_INVALID_POLICY_GROUP, REASON_POLICY_ACTIVE, REASON_POLICY_SERVER_NOT_FOUND,
    REASON_POLICY_SERVER_NOT_READY, REASON_POLICY_SERVER_TERMINATING,
    REASON_RECONCILIATION_SUCCEEDED, REASON_WEBHOOK_REGISTRATION_FAILED,
};
use group_expression::validate_group;
use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use std::time::Duration;
use tracing::{debug, info, warn};
use webhook::{register_policy_webhook, unregister_policy_webhook, WebhookParams};

/// Whether the target policy server can evaluate requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerReadiness {
    Missing,
    Terminating,
    NotReady,
    Ready,
}

impl ServerReadiness {
    /// Readiness from the observed `PolicyServer` and its Deployment.
    #[must_use]
    pub fn observe(server: Option<&PolicyServer>, deployment: Option<&Deployment>) -> Self {
        let Some(server) = server else {
            return Self::Missing;
        };
        if server.is_terminating() {
            return Self::Terminating;
        }
        let Some(deployment) = deployment else {
            return Self::NotReady;
        };
        if deployment.metadata.deletion_timestamp.is_some() {
            return Self::Terminating;
        }

        let ready_replicas = deployment
            .status
            .as_ref()
            .and_then(|status| status.ready_replicas)
            .unwrap_or(0);
        if ready_replicas >= 1 {
            Self::Ready
        } else {
            Self::NotReady
        }
    }

    #[must_use]
    pub fn reason(self) -> &'static str {
        match self {
            Self::Missing => REASON_POLICY_SERVER_NOT_FOUND,
            Self::Terminating => REASON_POLICY_SERVER_TERMINATING,
            Self::NotReady => REASON_POLICY_SERVER_NOT_READY,
            Self::Ready => REASON_RECONCILIATION_SUCCEEDED,
        }
    }
}

/// Status derived for one pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PolicyAssessment {
    pub policy_status: PolicyStatusEnum,
    pub mode: PolicyModeStatus,
    pub reason: &'static str,
}

impl PolicyAssessment {
    fn unschedulable(reason: &'static str) -> Self {
        Self {
            policy_status: PolicyStatusEnum::Unschedulable,
            mode: PolicyModeStatus::Unknown,
            reason,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.policy_status == PolicyStatusEnum::Active
    }
}

/// Derive the status of a policy from its server readiness and webhook outcome.
///
/// A policy is never `active` unless its server has a ready replica.
#[must_use]
pub fn assess_policy(
    readiness: ServerReadiness,
    webhook_registered: bool,
    mode: PolicyMode,
) -> PolicyAssessment {
    match (readiness, webhook_registered) {
        (ServerReadiness::Ready, true) => PolicyAssessment {
            policy_status: PolicyStatusEnum::Active,
            mode: mode.into(),
            reason: REASON_POLICY_ACTIVE,
        },
        (ServerReadiness::Ready, false) => PolicyAssessment {
            policy_status: PolicyStatusEnum::Scheduled,
            mode: PolicyModeStatus::Unknown,
            reason: REASON_WEBHOOK_REGISTRATION_FAILED,
        },
        (readiness, _) => PolicyAssessment::unschedulable(readiness.reason()),
    }
}

fn requeue_for<P: Policy>(assessment: &PolicyAssessment) -> Action {
    if assessment.is_active() {
        Action::requeue(Duration::from_secs(READY_REQUEUE_DURATION_SECS))
    } else {
        record_reconciliation_requeue(P::KIND, "dependency_wait");
        Action::requeue(Duration::from_secs(PENDING_REQUEUE_DURATION_SECS))
    }
}

// Neither condition can hold while the group itself is unusable.
fn record_invalid_group<P: Policy>(
    status: &mut PolicyStatusUpdater<P>,
    message: &str,
) -> PolicyAssessment {
    let assessment = PolicyAssessment::unschedulable(REASON_INVALID_POLICY_GROUP);
    status.set_policy_status(assessment.policy_status);
    status.set_observed_mode(assessment.mode);
    status.set_condition(
        CONDITION_POLICY_SERVER_CONFIGURATION_UP_TO_DATE,
        condition_status(false),
        REASON_INVALID_POLICY_GROUP,
        message,
    );
    status.set_condition(
        CONDITION_POLICY_ACTIVE,
        condition_status(false),
        assessment.reason,
        message,
    );
    assessment
}

fn record_assessment<P: Policy>(
    status: &mut PolicyStatusUpdater<P>,
    readiness: ServerReadiness,
    assessment: &PolicyAssessment,
    message: &str,
) {
    status.set_policy_status(assessment.policy_status);
    status.set_observed_mode(assessment.mode);
    status.set_condition(
        CONDITION_POLICY_SERVER_CONFIGURATION_UP_TO_DATE,
        condition_status(readiness == ServerReadiness::Ready),
        readiness.reason(),
        "",
    );
    status.set_condition(
        CONDITION_POLICY_ACTIVE,
        condition_status(assessment.is_active()),
        assessment.reason,
        message,
    );
}

async fn observe_server<P: Policy>(
    context: &Context,
    policy: &P,
) -> Result<ServerReadiness, ReconcileError> {
    let servers: Api<PolicyServer> = Api::all(context.client.clone());
    let servers = &servers;
    let server_name = policy.policy_server();
    let server = retry_api_call(
        || async move { servers.get_opt(server_name).await },
        &format!("get PolicyServer {server_name}"),
    )
    .await?;

    let deployment = match &server {
        Some(server) => {
            let deployments: Api<Deployment> =
                Api::namespaced(context.client.clone(), context.deployments_namespace());
            let deployments = &deployments;
            let name = server.name_with_prefix();
            let name = name.as_str();
            retry_api_call(
                || async move { deployments.get_opt(name).await },
                &format!("get Deployment {name}"),
            )
            .await?
        }
        None => None,
    };

    Ok(ServerReadiness::observe(server.as_ref(), deployment.as_ref()))
}

async fn register<P: Policy>(context: &Context, policy: &P) -> Result<(), ReconcileError> {
    let ca = load_ca_root(&context.client, context.deployments_namespace()).await?;
    let params = WebhookParams {
        deployments_namespace: context.deployments_namespace(),
        ca_bundle: &ca.cert_pem,
        match_conditions_enabled: context.features.match_conditions,
    };
    register_policy_webhook(&context.client, policy, &params).await?;
    Ok(())
}

/// Reconcile one policy: check its group, resolve its server, register its webhook
/// entry and write the derived status.
///
/// # Errors
///
/// Returns an error when the webhook entry or the status cannot be written because of
/// an API failure. Invalid groups and unready servers are reported through status.
pub async fn reconcile_policy<P: Policy>(
    context: &Context,
    policy: &P,
) -> Result<Action, ReconcileError> {
    let name = policy.name_any();
    debug!(kind = P::KIND, policy = %name, "Reconciling policy");

    let mut status = PolicyStatusUpdater::new(policy);
    status.set_observed_generation(policy.meta().generation);

    if let (Some(members), Some(expression)) = (policy.group_members(), policy.expression()) {
        if let Err(err) = validate_group(members, expression) {
            warn!(kind = P::KIND, policy = %name, error = %err, "Invalid policy group");
            unregister_policy_webhook(&context.client, policy).await?;

            let assessment = record_invalid_group(&mut status, &err.to_string());
            status.apply(&context.client).await?;
            record_policy_count(status.policy());
            return Ok(requeue_for::<P>(&assessment));
        }
    }

    let readiness = observe_server(context, policy).await?;
    if readiness != ServerReadiness::Ready {
        let assessment = assess_policy(readiness, false, policy.mode());
        info!(
            kind = P::KIND,
            policy = %name,
            policy_server = %policy.policy_server(),
            reason = assessment.reason,
            "Policy server not ready, policy is unschedulable"
        );
        // A not-ready server keeps its entry so a rollout never drops enforcement.
        if matches!(readiness, ServerReadiness::Missing | ServerReadiness::Terminating) {
            unregister_policy_webhook(&context.client, policy).await?;
        }
        record_assessment(&mut status, readiness, &assessment, "");
        status.apply(&context.client).await?;
        record_policy_count(status.policy());
        return Ok(requeue_for::<P>(&assessment));
    }

    let registration = register(context, policy).await;
    let assessment = assess_policy(readiness, registration.is_ok(), policy.mode());
    let message = registration
        .as_ref()
        .err()
        .map(ToString::to_string)
        .unwrap_or_default();
    record_assessment(&mut status, readiness, &assessment, &message);
    status.apply(&context.client).await?;

    match registration {
        Ok(()) => {
            info!(kind = P::KIND, policy = %name, "Policy is active");
            record_policy_count(status.policy());
            Ok(requeue_for::<P>(&assessment))
        }
        // A missing CA root is created by the certificate reconciler shortly.
        Err(err) if !err.is_transient() => {
            warn!(kind = P::KIND, policy = %name, error = %err, "Webhook entry not registered yet");
            record_policy_count(status.policy());
            Ok(requeue_for::<P>(&assessment))
        }
        Err(err) => Err(err),
    }
}

/// Remove a deleted policy's webhook entry.
///
/// # Errors
///
/// Returns an error if either webhook configuration cannot be read or written.
pub async fn cleanup_policy<P: Policy>(context: &Context, policy: &P) -> Result<(), ReconcileError> {
    info!(kind = P::KIND, policy = %policy.name_any(), "Removing policy webhook entry");
    unregister_policy_webhook(&context.client, policy).await?;
    Ok(())
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod mod_tests;
