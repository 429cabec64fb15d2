// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Drift detection between desired and observed objects.
//!
//! The API server defaults many fields and appends metadata of its own, so an observed
//! object is never equal to the object we built. Drift is checked in two directions:
//!
//! - every value we want must already be present ([`is_subset`]), with resource
//!   quantities compared by value since the server rewrites them in canonical form;
//! - every field our field manager owns, as recorded in `metadata.managedFields`, must
//!   still be wanted ([`owns_unwanted_field`]). Otherwise a field dropped from the
//!   desired object would stay on the cluster forever.

use crate::policy_server_resources::parse_quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use serde::Serialize;
use serde_json::Value;

/// Top level fields owned by the API server or other controllers, never compared.
const IGNORED_TOP_LEVEL_FIELDS: &[&str] = &["status"];

/// Maps whose values are resource quantities (`resources.limits`, `resources.requests`).
const QUANTITY_MAPS: &[&str] = &["limits", "requests"];

/// Whether `desired` is contained in `observed`.
///
/// - Objects: every key of `desired` must exist in `observed` with a matching value.
/// - Arrays: same length, element-wise containment (order matters).
/// - A `null` desired value matches an absent or `null` observed value.
/// - Scalars compare by equality, with integers and floats of equal value matching.
/// - Values under `limits` and `requests` compare as quantities, so `1000m` matches `1`.
#[must_use]
pub fn is_subset(desired: &Value, observed: &Value) -> bool {
    contains(desired, observed, None)
}

fn contains(desired: &Value, observed: &Value, parent: Option<&str>) -> bool {
    match (desired, observed) {
        (Value::Null, Value::Null) => true,
        (Value::Object(want), Value::Object(have)) => {
            let quantities = parent.is_some_and(|key| QUANTITY_MAPS.contains(&key));
            want.iter().all(|(key, value)| match have.get(key) {
                Some(observed_value) if quantities => same_quantity(value, observed_value),
                Some(observed_value) => contains(value, observed_value, Some(key)),
                None => value.is_null() || is_empty_collection(value),
            })
        }
        (Value::Array(want), Value::Array(have)) => {
            want.len() == have.len() && want.iter().zip(have).all(|(w, h)| contains(w, h, None))
        }
        (Value::Number(want), Value::Number(have)) => match (want.as_f64(), have.as_f64()) {
            (Some(w), Some(h)) => (w - h).abs() < f64::EPSILON,
            _ => want == have,
        },
        _ => desired == observed,
    }
}

fn same_quantity(desired: &Value, observed: &Value) -> bool {
    match (
        desired.as_str().and_then(parse_quantity),
        observed.as_str().and_then(parse_quantity),
    ) {
        (Some(want), Some(have)) => {
            let scale = want.abs().max(have.abs()).max(1.0);
            (want - have).abs() <= scale * 1e-9
        }
        _ => desired == observed,
    }
}

// The API server drops empty maps and lists on write.
fn is_empty_collection(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Field set last applied by `field_manager`, from `metadata.managedFields`.
///
/// Only server-side apply entries on the main resource count; updates and
/// subresource writes (such as `status`) are ignored.
#[must_use]
pub fn applied_fields<'a>(metadata: &'a ObjectMeta, field_manager: &str) -> Option<&'a Value> {
    metadata
        .managed_fields
        .as_ref()?
        .iter()
        .find(|entry| {
            entry.manager.as_deref() == Some(field_manager)
                && entry.operation.as_deref() == Some("Apply")
                && entry.subresource.as_deref().unwrap_or_default().is_empty()
        })?
        .fields_v1
        .as_ref()
        .map(|fields| &fields.0)
}

// Where a `fieldsV1` key leads inside the desired object.
enum Step<'a> {
    Present(&'a Value),
    Missing,
    Ignored,
}

fn step<'a>(desired: &'a Value, key: &str) -> Step<'a> {
    if key == "." {
        return Step::Ignored;
    }
    if let Some(field) = key.strip_prefix("f:") {
        return match desired.get(field) {
            Some(value) if !value.is_null() => Step::Present(value),
            _ => Step::Missing,
        };
    }
    if let Some(raw) = key.strip_prefix("k:") {
        let Ok(Value::Object(identity)) = serde_json::from_str::<Value>(raw) else {
            return Step::Ignored;
        };
        let Some(items) = desired.as_array() else {
            return Step::Missing;
        };
        // Keys the server defaulted (such as a port protocol) may be absent from ours.
        return items
            .iter()
            .find(|item| {
                identity
                    .iter()
                    .all(|(name, value)| item.get(name).is_none_or(|have| have == value))
            })
            .map_or(Step::Missing, Step::Present);
    }
    if let Some(raw) = key.strip_prefix("v:") {
        let Ok(value) = serde_json::from_str::<Value>(raw) else {
            return Step::Ignored;
        };
        return desired
            .as_array()
            .and_then(|items| items.iter().find(|item| **item == value))
            .map_or(Step::Missing, Step::Present);
    }
    if let Some(index) = key.strip_prefix("i:") {
        let Ok(index) = index.parse::<usize>() else {
            return Step::Ignored;
        };
        return desired.get(index).map_or(Step::Missing, Step::Present);
    }
    Step::Ignored
}

/// Whether the `fieldsV1` set `owned` contains a field `desired` no longer sets.
///
/// A previous apply claimed the field; a new apply without it would make the server
/// remove it, so the object must be written again.
#[must_use]
pub fn owns_unwanted_field(owned: &Value, desired: &Value) -> bool {
    let Value::Object(owned) = owned else {
        return false;
    };
    owned.iter().any(|(key, children)| match step(desired, key) {
        Step::Present(value) => owns_unwanted_field(children, value),
        Step::Missing => true,
        Step::Ignored => false,
    })
}

/// Whether `observed` differs from `desired` in any field `field_manager` manages.
///
/// Serialization failures count as drift so that the caller writes the object.
#[must_use]
pub fn has_drifted<T: Resource + Serialize>(desired: &T, observed: &T, field_manager: &str) -> bool {
    let (Ok(mut desired_value), Ok(observed_value)) =
        (serde_json::to_value(desired), serde_json::to_value(observed))
    else {
        return true;
    };

    if let Value::Object(fields) = &mut desired_value {
        for field in IGNORED_TOP_LEVEL_FIELDS {
            fields.remove(*field);
        }
    }

    !is_subset(&desired_value, &observed_value)
        || applied_fields(observed.meta(), field_manager)
            .is_some_and(|owned| owns_unwanted_field(owned, &desired_value))
}

#[cfg(test)]
#[path = "drift_tests.rs"]
mod drift_tests;
