// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `resources.rs`

#[cfg(test)]
mod tests {
    use crate::reconcilers::resources::{plan_apply, ApplyOutcome};
    use k8s_openapi::api::core::v1::Service;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{FieldsV1, ManagedFieldsEntry, ObjectMeta};
    use serde_json::json;

    const MANAGER: &str = "kubewarden-controller";

    fn service(annotations: Option<(&str, &str)>) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some("policy-server-default".into()),
                namespace: Some("kubewarden".into()),
                annotations: annotations
                    .map(|(k, v)| [(k.to_string(), v.to_string())].into_iter().collect()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_absent_object_is_created() {
        assert_eq!(plan_apply(&service(None), None, MANAGER), ApplyOutcome::Created);
    }

    #[test]
    fn test_matching_object_is_left_alone() {
        let desired = service(Some(("prometheus.io/scrape", "true")));
        let mut observed = desired.clone();
        observed.metadata.resource_version = Some("7".into());
        assert_eq!(plan_apply(&desired, Some(&observed), MANAGER), ApplyOutcome::Unchanged);
    }

    #[test]
    fn test_dropped_annotation_is_patched() {
        let mut observed = service(Some(("prometheus.io/scrape", "true")));
        observed.metadata.managed_fields = Some(vec![ManagedFieldsEntry {
            manager: Some(MANAGER.into()),
            operation: Some("Apply".into()),
            fields_type: Some("FieldsV1".into()),
            fields_v1: Some(FieldsV1(json!({
                "f:metadata": {"f:annotations": {"f:prometheus.io/scrape": {}}}
            }))),
            ..Default::default()
        }]);

        assert_eq!(
            plan_apply(&service(None), Some(&observed), MANAGER),
            ApplyOutcome::Patched
        );
    }
}
