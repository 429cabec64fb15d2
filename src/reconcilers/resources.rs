// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Generic resource creation and update helpers for Kubernetes resources.
//!
//! Every object the controller owns is written with server-side apply (SSA) under a
//! field manager, so only the fields we set are claimed and other writers keep theirs.
//! Before writing, the observed object is compared against the desired one with
//! [`crate::reconcilers::drift::has_drifted`]; an unchanged object is never written.
//!
//! # Example
//!
//! ```rust,no_run
//! use kubewarden_controller::errors::ReconcileError;
//! use kubewarden_controller::reconcilers::resources::create_or_patch;
//! use k8s_openapi::api::core::v1::ConfigMap;
//! use kube::{Api, Client};
//!
//! async fn example(client: &Client, cm: ConfigMap) -> Result<(), ReconcileError> {
//!     let api: Api<ConfigMap> = Api::namespaced(client.clone(), "kubewarden");
//!     create_or_patch(&api, &cm, "kubewarden-controller").await?;
//!     Ok(())
//! }
//! ```

use crate::errors::{is_not_found, ReconcileError};
use crate::metrics::{record_resource_write, ResourceWrite};
use crate::reconcilers::drift::has_drifted;
use crate::reconcilers::retry::retry_api_call;
use kube::api::{DeleteParams, Patch, PatchParams};
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use tracing::{debug, info};

/// What [`create_or_patch`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The object did not exist and was created
    Created,
    /// The object existed with different managed values and was patched
    Patched,
    /// The object already held every managed value; nothing was written
    Unchanged,
}

/// Decide what applying `desired` over `observed` would do.
#[must_use]
pub fn plan_apply<T>(desired: &T, observed: Option<&T>, field_manager: &str) -> ApplyOutcome
where
    T: Resource + Serialize,
{
    match observed {
        None => ApplyOutcome::Created,
        Some(current) if has_drifted(desired, current, field_manager) => ApplyOutcome::Patched,
        Some(_) => ApplyOutcome::Unchanged,
    }
}

/// Create or update a resource using server-side apply.
///
/// The object is read first. If it is absent it is created; if it exists and every
/// managed value already matches, no write happens. Otherwise the object is applied
/// with `force`, taking ownership of the fields we manage and releasing the ones the
/// desired object no longer sets.
///
/// Works for namespaced and cluster-scoped kinds alike: the caller picks the scope
/// when building `api`.
///
/// # Errors
///
/// Returns an error if the resource has no name, or if an API call still fails after
/// retries.
pub async fn create_or_patch<T>(
    api: &Api<T>,
    resource: &T,
    field_manager: &str,
) -> Result<ApplyOutcome, ReconcileError>
where
    T: Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned,
{
    let kind = T::kind(&());
    let name = resource
        .meta()
        .name
        .as_deref()
        .ok_or_else(|| ReconcileError::invalid_spec(format!("{kind} must have a name")))?;

    let observed = fetch(api, name).await?;
    let outcome = plan_apply(resource, observed.as_ref(), field_manager);
    if outcome == ApplyOutcome::Unchanged {
        debug!(kind = %kind, name = %name, "Resource up to date, skipping write");
        return Ok(outcome);
    }

    debug!(
        kind = %kind,
        name = %name,
        namespace = ?resource.meta().namespace,
        outcome = ?outcome,
        "Applying resource"
    );

    let params = PatchParams::apply(field_manager).force();
    let patch = Patch::Apply(resource);
    let (params, patch) = (&params, &patch);
    retry_api_call(
        || async move { api.patch(name, params, patch).await },
        &format!("apply {kind} {name}"),
    )
    .await?;

    if outcome == ApplyOutcome::Created {
        info!("Created {} {}", kind, name);
        record_resource_write(&kind, ResourceWrite::Created);
    } else {
        info!("Updated {} {}", kind, name);
        record_resource_write(&kind, ResourceWrite::Updated);
    }

    Ok(outcome)
}

/// Delete a resource, treating "already gone" as success.
///
/// Returns `true` when a delete request was accepted, `false` when the object did not exist.
///
/// # Errors
///
/// Returns an error if the delete call fails for any reason other than not-found.
pub async fn delete_if_exists<T>(api: &Api<T>, name: &str) -> Result<bool, ReconcileError>
where
    T: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned,
{
    let kind = T::kind(&());
    let params = DeleteParams::background();
    let params = &params;
    match retry_api_call(
        || async move { api.delete(name, params).await },
        &format!("delete {kind} {name}"),
    )
    .await
    {
        Ok(_) => {
            info!("Deleted {} {}", kind, name);
            record_resource_write(&kind, ResourceWrite::Deleted);
            Ok(true)
        }
        Err(e) if is_not_found(&e) => {
            debug!(kind = %kind, name = %name, "Resource already absent");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// Read a resource, `None` when it does not exist.
///
/// # Errors
///
/// Returns an error if the lookup still fails after retries.
pub async fn fetch<T>(api: &Api<T>, name: &str) -> Result<Option<T>, ReconcileError>
where
    T: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned,
{
    let kind = T::kind(&());
    let found = retry_api_call(
        || async move { api.get_opt(name).await },
        &format!("get {kind} {name}"),
    )
    .await?;
    Ok(found)
}

/// Whether a resource still exists.
///
/// # Errors
///
/// Returns an error if the lookup still fails after retries.
pub async fn exists<T>(api: &Api<T>, name: &str) -> Result<bool, ReconcileError>
where
    T: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned,
{
    Ok(fetch(api, name).await?.is_some())
}

#[cfg(test)]
#[path = "resources_tests.rs"]
mod resources_tests;
