// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `policy_controller.rs`

use crate::crd::{ClusterAdmissionPolicy, ClusterAdmissionPolicySpec, PolicySpecBase};
use crate::policy_controller::policies_bound_to;

fn cluster_policy(name: &str, server: &str) -> ClusterAdmissionPolicy {
    ClusterAdmissionPolicy::new(
        name,
        ClusterAdmissionPolicySpec {
            base: PolicySpecBase {
                policy_server: server.to_string(),
                ..Default::default()
            },
            module: "registry://ghcr.io/kubewarden/policies/safe-labels:v1".into(),
            ..Default::default()
        },
    )
}

#[test]
fn test_policies_bound_to_server() {
    let (reader, mut writer) = kube::runtime::reflector::store::<ClusterAdmissionPolicy>();
    for policy in [
        cluster_policy("a", "default"),
        cluster_policy("b", "reserved"),
        cluster_policy("c", "default"),
    ] {
        writer.apply_watcher_event(&kube::runtime::watcher::Event::Apply(policy));
    }

    let mut names: Vec<String> = policies_bound_to(&reader, "default")
        .into_iter()
        .map(|object_ref| object_ref.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["a".to_string(), "c".to_string()]);

    assert!(policies_bound_to(&reader, "missing").is_empty());
}

#[test]
fn test_empty_store_maps_to_nothing() {
    let (reader, _writer) = kube::runtime::reflector::store::<ClusterAdmissionPolicy>();
    assert!(policies_bound_to(&reader, "default").is_empty());
}

#[test]
fn test_backoff_key_includes_namespace_for_namespaced_policies() {
    use crate::crd::{AdmissionPolicy, AdmissionPolicySpec};

    let mut namespaced = AdmissionPolicy::new(
        "privileged",
        AdmissionPolicySpec {
            module: "registry://ghcr.io/kubewarden/policies/pod-privileged:v1".into(),
            ..Default::default()
        },
    );
    namespaced.metadata.namespace = Some("team-a".into());

    assert_eq!(
        super::policy_backoff_key(&namespaced),
        "AdmissionPolicy/team-a/privileged"
    );
    assert_eq!(
        super::policy_backoff_key(&cluster_policy("safe-labels", "default")),
        "ClusterAdmissionPolicy/safe-labels"
    );
}
