// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `drift.rs`

#[cfg(test)]
mod tests {
    use crate::reconcilers::drift::{applied_fields, has_drifted, is_subset, owns_unwanted_field};
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{FieldsV1, ManagedFieldsEntry, ObjectMeta};
    use serde_json::{json, Value};
    use std::collections::BTreeMap;

    const MANAGER: &str = "kubewarden-controller";

    fn configmap(data: &[(&str, &str)], resource_version: Option<&str>) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some("policy-server-default".into()),
                namespace: Some("kubewarden".into()),
                resource_version: resource_version.map(str::to_string),
                ..Default::default()
            },
            data: Some(
                data.iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect::<BTreeMap<_, _>>(),
            ),
            ..Default::default()
        }
    }

    fn applied_by(manager: &str, operation: &str, subresource: Option<&str>, fields: Value) -> ManagedFieldsEntry {
        ManagedFieldsEntry {
            manager: Some(manager.into()),
            operation: Some(operation.into()),
            subresource: subresource.map(str::to_string),
            fields_type: Some("FieldsV1".into()),
            fields_v1: Some(FieldsV1(fields)),
            ..Default::default()
        }
    }

    fn deployment(pod_spec: Value) -> Deployment {
        serde_json::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "policy-server-default", "namespace": "kubewarden"},
            "spec": {
                "selector": {"matchLabels": {"app": "kubewarden-policy-server-default"}},
                "template": {"spec": pod_spec}
            }
        }))
        .unwrap()
    }

    fn container(resources: Value) -> Value {
        json!({
            "name": "policy-server-default",
            "image": "ghcr.io/kubewarden/policy-server:v1.20.0",
            "ports": [{"containerPort": 8443, "protocol": "TCP"}],
            "resources": resources
        })
    }

    // Fields the controller claimed when it applied the tolerant version of the pod.
    fn owned_pod_fields() -> Value {
        json!({
            "f:spec": {
                "f:selector": {},
                "f:template": {
                    "f:spec": {
                        "f:containers": {
                            "k:{\"name\":\"policy-server-default\"}": {
                                ".": {},
                                "f:image": {},
                                "f:name": {},
                                "f:ports": {
                                    "k:{\"containerPort\":8443,\"protocol\":\"TCP\"}": {
                                        ".": {},
                                        "f:containerPort": {},
                                        "f:protocol": {}
                                    }
                                },
                                "f:resources": {"f:limits": {"f:cpu": {}}}
                            }
                        },
                        "f:priorityClassName": {},
                        "f:serviceAccountName": {},
                        "f:tolerations": {}
                    }
                }
            }
        })
    }

    #[test]
    fn test_server_added_fields_are_not_drift() {
        let desired = json!({"spec": {"replicas": 2}});
        let observed = json!({
            "spec": {"replicas": 2, "revisionHistoryLimit": 10},
            "metadata": {"uid": "abc"}
        });
        assert!(is_subset(&desired, &observed));
    }

    #[test]
    fn test_changed_value_is_drift() {
        let desired = json!({"spec": {"replicas": 3}});
        let observed = json!({"spec": {"replicas": 2}});
        assert!(!is_subset(&desired, &observed));
    }

    #[test]
    fn test_array_length_and_order_matter() {
        assert!(is_subset(&json!([{"a": 1}]), &json!([{"a": 1, "b": 2}])));
        assert!(!is_subset(&json!([1, 2]), &json!([2, 1])));
        assert!(!is_subset(&json!([1]), &json!([1, 2])));
    }

    #[test]
    fn test_null_and_empty_match_absent() {
        assert!(is_subset(&json!({"a": null}), &json!({})));
        assert!(is_subset(&json!({"labels": {}}), &json!({})));
        assert!(!is_subset(&json!({"a": 1}), &json!({})));
    }

    #[test]
    fn test_number_representations() {
        assert!(is_subset(&json!(1), &json!(1.0)));
    }

    #[test]
    fn test_quantities_compare_by_value() {
        let desired = json!({"resources": {"limits": {"cpu": "1000m", "memory": "1024Mi"}}});
        let canonical = json!({"resources": {"limits": {"cpu": "1", "memory": "1Gi"}}});
        assert!(is_subset(&desired, &canonical));

        let raised = json!({"resources": {"limits": {"cpu": "2", "memory": "1Gi"}}});
        assert!(!is_subset(&desired, &raised));

        // Outside resource maps the strings must match exactly.
        assert!(!is_subset(&json!({"cpu": "1000m"}), &json!({"cpu": "1"})));
    }

    #[test]
    fn test_has_drifted_ignores_metadata_added_by_server() {
        let desired = configmap(&[("policies.yml", "{}")], None);
        let observed = configmap(&[("policies.yml", "{}")], Some("42"));
        assert!(!has_drifted(&desired, &observed, MANAGER));

        let changed = configmap(&[("policies.yml", "a: b")], None);
        assert!(has_drifted(&changed, &observed, MANAGER));
    }

    #[test]
    fn test_applied_fields_only_reads_our_apply_entry() {
        let metadata = ObjectMeta {
            managed_fields: Some(vec![
                applied_by("kubectl", "Apply", None, json!({"f:data": {"f:other": {}}})),
                applied_by(MANAGER, "Update", None, json!({"f:data": {"f:update": {}}})),
                applied_by(MANAGER, "Apply", Some("status"), json!({"f:status": {}})),
                applied_by(MANAGER, "Apply", None, json!({"f:data": {"f:policies.yml": {}}})),
            ]),
            ..Default::default()
        };

        assert_eq!(
            applied_fields(&metadata, MANAGER),
            Some(&json!({"f:data": {"f:policies.yml": {}}}))
        );
        assert!(applied_fields(&metadata, "someone-else").is_none());
        assert!(applied_fields(&ObjectMeta::default(), MANAGER).is_none());
    }

    #[test]
    fn test_removed_pod_fields_are_drift() {
        let tolerant = json!({
            "containers": [container(json!({"limits": {"cpu": "1"}}))],
            "priorityClassName": "high",
            "serviceAccountName": "policy-server",
            "tolerations": [{"key": "dedicated", "operator": "Exists"}]
        });
        let mut observed = deployment(tolerant);
        observed.metadata.managed_fields = Some(vec![applied_by(MANAGER, "Apply", None, owned_pod_fields())]);

        let desired = deployment(json!({
            "containers": [container(json!({"limits": {"cpu": "1"}}))]
        }));

        // Every desired value is still present, only the ownership reveals the removal.
        assert!(is_subset(
            &serde_json::to_value(&desired).unwrap(),
            &serde_json::to_value(&observed).unwrap()
        ));
        assert!(has_drifted(&desired, &observed, MANAGER));
        assert!(!has_drifted(&desired, &observed, "someone-else"));
    }

    #[test]
    fn test_owned_fields_still_wanted_are_not_drift() {
        let pod = json!({
            "containers": [container(json!({"limits": {"cpu": "1000m"}}))],
            "priorityClassName": "high",
            "serviceAccountName": "policy-server",
            "tolerations": [{"key": "dedicated", "operator": "Exists"}]
        });
        let desired = deployment(pod.clone());

        let mut server_pod = pod;
        server_pod["containers"][0]["resources"]["limits"]["cpu"] = json!("1");
        server_pod["containers"][0]["terminationMessagePath"] = json!("/dev/termination-log");
        server_pod["dnsPolicy"] = json!("ClusterFirst");
        let mut observed = deployment(server_pod);
        observed.metadata.managed_fields = Some(vec![applied_by(MANAGER, "Apply", None, owned_pod_fields())]);

        assert!(!has_drifted(&desired, &observed, MANAGER));
    }

    #[test]
    fn test_list_item_identity_keys() {
        let owned = json!({
            "f:ports": {
                "k:{\"containerPort\":8443,\"protocol\":\"TCP\"}": {"f:containerPort": {}}
            }
        });

        // The protocol is defaulted by the server and may be absent from ours.
        assert!(!owns_unwanted_field(&owned, &json!({"ports": [{"containerPort": 8443}]})));
        assert!(owns_unwanted_field(&owned, &json!({"ports": [{"containerPort": 9443}]})));
        assert!(owns_unwanted_field(&owned, &json!({})));
    }

    #[test]
    fn test_set_values_and_indexes() {
        let finalizers = json!({"f:finalizers": {"v:\"kubewarden\"": {}}});
        assert!(!owns_unwanted_field(&finalizers, &json!({"finalizers": ["kubewarden"]})));
        assert!(owns_unwanted_field(&finalizers, &json!({"finalizers": ["other"]})));

        let indexed = json!({"f:args": {"i:1": {}}});
        assert!(!owns_unwanted_field(&indexed, &json!({"args": ["a", "b"]})));
        assert!(owns_unwanted_field(&indexed, &json!({"args": ["a"]})));

        assert!(!owns_unwanted_field(&json!({".": {}}), &json!({})));
    }
}
