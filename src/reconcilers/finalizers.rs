// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Generic finalizer management for Kubernetes resources.
//!
//! A resource guarded by a finalizer moves through three phases:
//!
//! ```text
//! Active ──(deletionTimestamp set)──▶ Terminating ──(finalizer removed)──▶ Gone
//! ```
//!
//! Reconcilers call [`finalizer_phase`] first and branch on the result. Cleanup for a
//! terminating resource may take several passes (waiting for children to disappear);
//! the finalizer is only removed once cleanup reports completion.
//!
//! # Example
//!
//! ```rust,ignore
//! use kubewarden_controller::reconcilers::finalizers::{ensure_finalizer, finalizer_phase, FinalizerPhase};
//!
//! match finalizer_phase(&server, KUBEWARDEN_FINALIZER) {
//!     FinalizerPhase::Active => ensure_finalizer(&api, &server, KUBEWARDEN_FINALIZER).await?,
//!     FinalizerPhase::Terminating => { /* cleanup, then remove_finalizer */ }
//!     FinalizerPhase::Gone => return Ok(Action::await_change()),
//! }
//! ```

use crate::errors::ReconcileError;
use crate::reconcilers::retry::retry_api_call;
use kube::api::{Patch, PatchParams};
use kube::{Api, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::fmt::Debug;
use tracing::info;

async fn patch_finalizers<T>(
    api: &Api<T>,
    name: &str,
    finalizers: Vec<String>,
) -> Result<(), ReconcileError>
where
    T: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned,
{
    let params = PatchParams::default();
    let patch = Patch::Merge(json!({ "metadata": { "finalizers": finalizers } }));
    let (params, patch) = (&params, &patch);
    retry_api_call(
        || async move { api.patch(name, params, patch).await },
        &format!("patch finalizers of {} {name}", T::kind(&())),
    )
    .await?;
    Ok(())
}

/// Lifecycle phase of a resource with respect to a finalizer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinalizerPhase {
    /// Not being deleted
    Active,
    /// Deletion requested, our finalizer still blocks it
    Terminating,
    /// Deletion requested and our finalizer already removed
    Gone,
}

/// Whether `finalizer` is present on the resource.
#[must_use]
pub fn has_finalizer<T: Resource>(resource: &T, finalizer: &str) -> bool {
    resource
        .meta()
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|name| name == finalizer))
}

/// Compute the finalizer phase of a resource.
#[must_use]
pub fn finalizer_phase<T: Resource>(resource: &T, finalizer: &str) -> FinalizerPhase {
    match (
        resource.meta().deletion_timestamp.is_some(),
        has_finalizer(resource, finalizer),
    ) {
        (false, _) => FinalizerPhase::Active,
        (true, true) => FinalizerPhase::Terminating,
        (true, false) => FinalizerPhase::Gone,
    }
}

/// Add a finalizer to a resource if not already present.
///
/// The operation is idempotent - calling it multiple times has no effect if the
/// finalizer is already present.
///
/// # Errors
///
/// Returns an error if the API patch operation fails.
pub async fn ensure_finalizer<T>(api: &Api<T>, resource: &T, finalizer: &str) -> Result<(), ReconcileError>
where
    T: Resource<DynamicType = ()> + ResourceExt + Clone + Debug + DeserializeOwned,
{
    if has_finalizer(resource, finalizer) {
        return Ok(());
    }

    let name = resource.name_any();
    info!(
        "Adding finalizer {} to {} {}",
        finalizer,
        T::kind(&()),
        name
    );

    let mut finalizers = resource.finalizers().to_vec();
    finalizers.push(finalizer.to_string());

    patch_finalizers(api, &name, finalizers).await?;

    Ok(())
}

/// Remove a finalizer from a resource.
///
/// The operation is idempotent - calling it multiple times has no effect if the
/// finalizer is already absent.
///
/// # Errors
///
/// Returns an error if the API patch operation fails.
pub async fn remove_finalizer<T>(api: &Api<T>, resource: &T, finalizer: &str) -> Result<(), ReconcileError>
where
    T: Resource<DynamicType = ()> + ResourceExt + Clone + Debug + DeserializeOwned,
{
    if !has_finalizer(resource, finalizer) {
        return Ok(());
    }

    let name = resource.name_any();
    info!(
        "Removing finalizer {} from {} {}",
        finalizer,
        T::kind(&()),
        name
    );

    let mut finalizers = resource.finalizers().to_vec();
    finalizers.retain(|f| f != finalizer);

    patch_finalizers(api, &name, finalizers).await?;

    info!(
        "Successfully removed finalizer {} from {} {}",
        finalizer,
        T::kind(&()),
        name
    );

    Ok(())
}

#[cfg(test)]
#[path = "finalizers_tests.rs"]
mod finalizers_tests;
