// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status conditions and the per-pass status updaters.
//!
//! Reconcilers collect conditions in memory while they work and write the status once
//! at the end of a pass, only when it changed. A condition keeps its
//! `lastTransitionTime` until its status flips.

use crate::crd::{Condition, PolicyModeStatus, PolicyServer, PolicyServerStatus, PolicyStatusEnum};
use crate::errors::ReconcileError;
use crate::policy::Policy;
use crate::reconcilers::retry::retry_api_call;
use chrono::Utc;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::fmt::Debug;
use tracing::debug;

/// A condition stamped with the current time.
#[must_use]
pub fn create_condition(
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) -> Condition {
    Condition {
        r#type: condition_type.to_string(),
        status: status.to_string(),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        last_transition_time: Some(Utc::now().to_rfc3339()),
    }
}

/// Set `condition_type` in `conditions`, adding it when absent.
///
/// The transition time is refreshed only when the status changes.
pub fn update_condition_in_memory(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) {
    let Some(existing) = conditions.iter_mut().find(|c| c.r#type == condition_type) else {
        conditions.push(create_condition(condition_type, status, reason, message));
        return;
    };

    if existing.status != status || existing.last_transition_time.is_none() {
        existing.last_transition_time = Some(Utc::now().to_rfc3339());
    }
    existing.status = status.to_string();
    existing.reason = Some(reason.to_string());
    existing.message = Some(message.to_string());
}

/// Whether two condition lists carry the same types, statuses, reasons and messages.
///
/// Transition times are not compared.
#[must_use]
pub fn conditions_equal(current: &[Condition], new: &[Condition]) -> bool {
    current.len() == new.len()
        && new.iter().all(|wanted| {
            current.iter().any(|have| {
                have.r#type == wanted.r#type
                    && have.status == wanted.status
                    && have.reason == wanted.reason
                    && have.message == wanted.message
            })
        })
}

async fn patch_status<K, S>(api: &Api<K>, name: &str, status: &S) -> Result<(), ReconcileError>
where
    K: Clone + Debug + DeserializeOwned,
    S: Serialize,
{
    let params = PatchParams::default();
    let patch = Patch::Merge(json!({ "status": serde_json::to_value(status)? }));
    let (params, patch) = (&params, &patch);
    retry_api_call(
        || async move { api.patch_status(name, params, patch).await },
        &format!("patch status of {name}"),
    )
    .await?;
    Ok(())
}

/// Status of one `PolicyServer` pass, written once at the end.
pub struct PolicyServerStatusUpdater {
    name: String,
    current_status: Option<PolicyServerStatus>,
    new_status: PolicyServerStatus,
}

impl PolicyServerStatusUpdater {
    #[must_use]
    pub fn new(policy_server: &PolicyServer) -> Self {
        let current_status = policy_server.status.clone();
        let new_status = current_status.clone().unwrap_or_default();

        Self {
            name: policy_server.name_any(),
            current_status,
            new_status,
        }
    }

    pub fn set_condition(
        &mut self,
        condition_type: &str,
        status: &str,
        reason: &str,
        message: &str,
    ) {
        update_condition_in_memory(
            &mut self.new_status.conditions,
            condition_type,
            status,
            reason,
            message,
        );
    }

    pub fn set_observed_generation(&mut self, generation: Option<i64>) {
        self.new_status.observed_generation = generation;
    }

    /// Whether the collected status differs semantically from the observed one.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        match &self.current_status {
            None => true,
            Some(current) => {
                current.observed_generation != self.new_status.observed_generation
                    || !conditions_equal(&current.conditions, &self.new_status.conditions)
            }
        }
    }

    #[must_use]
    pub fn conditions(&self) -> &[Condition] {
        &self.new_status.conditions
    }

    /// Write the collected status, unless it matches the observed one.
    ///
    /// # Errors
    ///
    /// Returns an error if the patch still fails after retries.
    pub async fn apply(&self, client: &Client) -> Result<(), ReconcileError> {
        if !self.has_changes() {
            debug!(policy_server = %self.name, "Status unchanged, skipping update");
            return Ok(());
        }

        let api: Api<PolicyServer> = Api::all(client.clone());
        patch_status(&api, &self.name, &self.new_status).await?;
        debug!(
            policy_server = %self.name,
            conditions = self.new_status.conditions.len(),
            "Updated PolicyServer status"
        );
        Ok(())
    }
}

/// Status of one policy pass, shared by the four policy kinds.
pub struct PolicyStatusUpdater<P: Policy> {
    policy: P,
    current: P,
}

impl<P: Policy> PolicyStatusUpdater<P> {
    #[must_use]
    pub fn new(policy: &P) -> Self {
        Self {
            policy: policy.clone(),
            current: policy.clone(),
        }
    }

    pub fn set_policy_status(&mut self, policy_status: PolicyStatusEnum) {
        self.policy.set_status(policy_status);
    }

    pub fn set_observed_mode(&mut self, mode: PolicyModeStatus) {
        self.policy.set_observed_mode(mode);
    }

    pub fn set_observed_generation(&mut self, generation: Option<i64>) {
        self.policy
            .status_mut()
            .get_or_insert_with(Default::default)
            .observed_generation = generation;
    }

    pub fn set_condition(
        &mut self,
        condition_type: &str,
        status: &str,
        reason: &str,
        message: &str,
    ) {
        let conditions = &mut self
            .policy
            .status_mut()
            .get_or_insert_with(Default::default)
            .conditions;
        update_condition_in_memory(conditions, condition_type, status, reason, message);
    }

    /// The policy carrying the new status.
    #[must_use]
    pub fn policy(&self) -> &P {
        &self.policy
    }

    #[must_use]
    pub fn has_changes(&self) -> bool {
        match (self.current.status(), self.policy.status()) {
            (None, None) => false,
            (Some(current), Some(new)) => {
                current.policy_status != new.policy_status
                    || current.mode != new.mode
                    || current.observed_generation != new.observed_generation
                    || !conditions_equal(&current.conditions, &new.conditions)
            }
            _ => true,
        }
    }

    /// Write the collected status, unless it matches the observed one.
    ///
    /// # Errors
    ///
    /// Returns an error if the patch still fails after retries.
    pub async fn apply(&self, client: &Client) -> Result<(), ReconcileError> {
        let name = self.policy.name_any();
        if !self.has_changes() {
            debug!(kind = P::KIND, policy = %name, "Status unchanged, skipping update");
            return Ok(());
        }

        let api = P::api(client.clone(), self.policy.namespace().as_deref());
        patch_status(&api, &name, &self.policy.status()).await?;
        debug!(
            kind = P::KIND,
            policy = %name,
            policy_status = %self.policy.policy_status(),
            "Updated policy status"
        );
        Ok(())
    }
}
