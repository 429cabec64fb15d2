// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `crd.rs`

#[cfg(test)]
mod tests {
    use crate::crd::*;
    use kube::CustomResourceExt;
    use serde_json::json;

    #[test]
    fn test_policy_server_names_and_labels() {
        let server = PolicyServer::new("default", PolicyServerSpec::default());
        assert_eq!(server.name_with_prefix(), "policy-server-default");
        assert_eq!(server.app_label(), "kubewarden-policy-server-default");

        let labels = server.common_labels();
        assert_eq!(labels["app.kubernetes.io/instance"], "policy-server-default");
        assert_eq!(labels["app.kubernetes.io/part-of"], "kubewarden");
        assert_eq!(labels["app.kubernetes.io/component"], "policy-server");
        assert!(!server.is_terminating());
    }

    #[test]
    fn test_policy_server_spec_from_yaml_shape() {
        let server: PolicyServer = serde_json::from_value(json!({
            "apiVersion": "policies.kubewarden.io/v1",
            "kind": "PolicyServer",
            "metadata": { "name": "ps1" },
            "spec": {
                "image": "ghcr.io/kubewarden/policy-server:v1.20.0",
                "replicas": 3,
                "minAvailable": 2,
                "insecureSources": ["registry.local:5000"],
                "sourceAuthorities": { "registry.local:5000": ["PEM"] }
            }
        }))
        .unwrap();

        assert_eq!(server.spec.replicas, 3);
        assert!(server.spec.max_unavailable.is_none());
        assert_eq!(
            server.spec.insecure_sources,
            Some(vec!["registry.local:5000".to_string()])
        );
    }

    #[test]
    fn test_policy_defaults() {
        let policy: ClusterAdmissionPolicy = serde_json::from_value(json!({
            "apiVersion": "policies.kubewarden.io/v1",
            "kind": "ClusterAdmissionPolicy",
            "metadata": { "name": "privileged" },
            "spec": { "module": "registry://ghcr.io/kubewarden/policies/pod-privileged:v0.2.5" }
        }))
        .unwrap();

        assert_eq!(policy.spec.base.policy_server, "default");
        assert_eq!(policy.spec.base.mode, PolicyMode::Protect);
        assert!(policy.spec.base.background_audit);
        assert!(!policy.spec.mutating);
        assert!(policy.status.is_none());
    }

    #[test]
    fn test_status_enums_serialize_lowercase() {
        let status = PolicyStatus {
            policy_status: PolicyStatusEnum::Unschedulable,
            mode: PolicyModeStatus::Unknown,
            ..Default::default()
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["policyStatus"], "unschedulable");
        assert_eq!(value["mode"], "unknown");
        assert_eq!(PolicyStatusEnum::default(), PolicyStatusEnum::Pending);
        assert_eq!(PolicyStatusEnum::Active.to_string(), "active");
    }

    #[test]
    fn test_mode_maps_to_observed_mode() {
        assert_eq!(PolicyModeStatus::from(PolicyMode::Monitor), PolicyModeStatus::Monitor);
        assert_eq!(PolicyModeStatus::from(PolicyMode::Protect), PolicyModeStatus::Protect);
    }

    #[test]
    fn test_group_spec_round_trips_members() {
        let group: AdmissionPolicyGroup = serde_json::from_value(json!({
            "apiVersion": "policies.kubewarden.io/v1",
            "kind": "AdmissionPolicyGroup",
            "metadata": { "name": "signed-and-trusted", "namespace": "team-a" },
            "spec": {
                "policies": {
                    "signed": { "module": "registry://example/signed:v1", "settings": { "keys": ["k"] } },
                    "trusted": { "module": "registry://example/trusted:v1" }
                },
                "expression": "signed() && trusted()",
                "message": "image must be signed and trusted"
            }
        }))
        .unwrap();

        assert_eq!(group.spec.policies.len(), 2);
        assert_eq!(group.spec.policies["signed"].settings, Some(json!({ "keys": ["k"] })));
        assert!(group.spec.policies["trusted"].context_aware_resources.is_empty());
    }

    #[test]
    fn test_crd_scopes_and_status_subresource() {
        assert_eq!(PolicyServer::crd().spec.scope, "Cluster");
        assert_eq!(ClusterAdmissionPolicy::crd().spec.scope, "Cluster");
        assert_eq!(ClusterAdmissionPolicyGroup::crd().spec.scope, "Cluster");
        assert_eq!(AdmissionPolicy::crd().spec.scope, "Namespaced");
        assert_eq!(AdmissionPolicyGroup::crd().spec.scope, "Namespaced");

        for crd in [PolicyServer::crd(), AdmissionPolicy::crd(), ClusterAdmissionPolicyGroup::crd()] {
            assert_eq!(crd.spec.group, "policies.kubewarden.io");
            let version = &crd.spec.versions[0];
            assert_eq!(version.name, "v1");
            assert!(version
                .subresources
                .as_ref()
                .and_then(|s| s.status.as_ref())
                .is_some());
        }
    }
}
