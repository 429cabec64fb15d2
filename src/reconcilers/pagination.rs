// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Paginated list helper.
//!
//! Policy servers list every policy of every kind on each pass to render their
//! configuration. Fetching in pages keeps a single response bounded on clusters with
//! many policies.

use crate::constants::LIST_PAGE_SIZE;
use crate::reconcilers::retry::retry_api_call;
use crate::errors::ReconcileError;
use kube::{api::ListParams, Api, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::debug;

/// List every object matching `list_params`, one page at a time.
///
/// Each page request is retried on transient API errors.
///
/// # Example
///
/// ```no_run
/// use kube::{Api, Client, api::ListParams};
/// use kubewarden_controller::crd::ClusterAdmissionPolicy;
/// use kubewarden_controller::reconcilers::pagination::list_all_paginated;
///
/// # async fn example() -> anyhow::Result<()> {
/// let client = Client::try_default().await?;
/// let api: Api<ClusterAdmissionPolicy> = Api::all(client);
/// let policies = list_all_paginated(&api, ListParams::default()).await?;
/// println!("Found {} policies", policies.len());
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if a page cannot be fetched after retries.
pub async fn list_all_paginated<K>(
    api: &Api<K>,
    mut list_params: ListParams,
) -> Result<Vec<K>, ReconcileError>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    list_params.limit = Some(LIST_PAGE_SIZE);

    let mut all_items = Vec::new();
    let mut pages = 0;

    loop {
        pages += 1;
        let params = &list_params;
        let page = retry_api_call(
            || async move { api.list(params).await },
            &format!("list {}", K::kind(&())),
        )
        .await?;
        all_items.extend(page.items);

        match page.metadata.continue_ {
            Some(token) if !token.is_empty() => list_params.continue_token = Some(token),
            _ => break,
        }
    }

    debug!(
        kind = %K::kind(&()),
        pages,
        items = all_items.len(),
        "Completed paginated list"
    );

    Ok(all_items)
}

#[cfg(test)]
#[path = "pagination_tests.rs"]
mod pagination_tests;
