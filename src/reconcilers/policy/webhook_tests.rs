// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `webhook.rs`

#[cfg(test)]
mod tests {
    use crate::crd::{
        AdmissionPolicy, AdmissionPolicySpec, ClusterAdmissionPolicy,
        ClusterAdmissionPolicyGroup, ClusterAdmissionPolicyGroupSpec, ClusterAdmissionPolicySpec,
        PolicyGroupMember, PolicySpecBase,
    };
    use crate::reconcilers::drift::is_subset;
    use crate::reconcilers::policy::webhook::{
        build_mutating_webhook, build_namespace_selector, build_validating_webhook,
        configuration_patch, desired_entry, entry_needs_apply, policy_field_manager, webhook_name,
        ObservedConfiguration, WebhookKind, WebhookParams,
    };
    use k8s_openapi::api::admissionregistration::v1::{MatchCondition, RuleWithOperations};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
        FieldsV1, LabelSelector, LabelSelectorRequirement, ManagedFieldsEntry, ObjectMeta,
    };
    use serde_json::{json, Value};
    use std::collections::BTreeMap;

    const CA: &str = "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";

    fn params(match_conditions_enabled: bool) -> WebhookParams<'static> {
        WebhookParams {
            deployments_namespace: "kubewarden",
            ca_bundle: CA,
            match_conditions_enabled,
        }
    }

    fn base() -> PolicySpecBase {
        PolicySpecBase {
            policy_server: "reserved".into(),
            rules: vec![RuleWithOperations {
                api_groups: Some(vec![String::new()]),
                api_versions: Some(vec!["v1".into()]),
                operations: Some(vec!["CREATE".into()]),
                resources: Some(vec!["pods".into()]),
                scope: None,
            }],
            match_conditions: Some(vec![MatchCondition {
                name: "not-system".into(),
                expression: "!request.userInfo.username.startsWith('system:')".into(),
            }]),
            ..Default::default()
        }
    }

    fn admission_policy() -> AdmissionPolicy {
        let mut policy = AdmissionPolicy::new(
            "privileged",
            AdmissionPolicySpec {
                base: base(),
                module: "registry://ghcr.io/kubewarden/policies/pod-privileged:v0.2.5".into(),
                ..Default::default()
            },
        );
        policy.metadata.namespace = Some("team-a".into());
        policy
    }

    fn cluster_policy(mutating: bool, selector: Option<LabelSelector>) -> ClusterAdmissionPolicy {
        ClusterAdmissionPolicy::new(
            "psa",
            ClusterAdmissionPolicySpec {
                base: base(),
                module: "registry://ghcr.io/kubewarden/policies/psa-label-enforcer:v0.1.0".into(),
                mutating,
                namespace_selector: selector,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_webhook_names_and_field_managers() {
        let policy = admission_policy();
        assert_eq!(
            webhook_name(&policy),
            "namespaced-team-a-privileged.kubewarden.admission"
        );
        assert_eq!(
            policy_field_manager(&policy),
            "kubewarden-controller/namespaced-team-a-privileged"
        );
    }

    #[test]
    fn test_long_field_manager_is_hashed() {
        let policy = ClusterAdmissionPolicy::new(
            &"x".repeat(200),
            ClusterAdmissionPolicySpec::default(),
        );
        let manager = policy_field_manager(&policy);
        assert!(manager.len() <= 128);
        assert!(manager.starts_with("kubewarden-controller/"));
        assert_eq!(manager, policy_field_manager(&policy));
    }

    #[test]
    fn test_kind_selection() {
        assert_eq!(
            WebhookKind::for_policy(&cluster_policy(true, None)),
            WebhookKind::Mutating
        );
        assert_eq!(
            WebhookKind::for_policy(&cluster_policy(false, None)),
            WebhookKind::Validating
        );
        assert_eq!(WebhookKind::Mutating.other(), WebhookKind::Validating);
        assert_eq!(
            WebhookKind::Mutating.configuration_name(),
            "kubewarden-policies-mutating"
        );
    }

    #[test]
    fn test_groups_are_always_validating() {
        let group = ClusterAdmissionPolicyGroup::new(
            "group",
            ClusterAdmissionPolicyGroupSpec {
                base: base(),
                policies: BTreeMap::from([(
                    "signed".to_string(),
                    PolicyGroupMember {
                        module: "registry://example/signed:v1".into(),
                        ..Default::default()
                    },
                )]),
                expression: "signed()".into(),
                message: "rejected".into(),
                ..Default::default()
            },
        );
        assert_eq!(WebhookKind::for_policy(&group), WebhookKind::Validating);
    }

    #[test]
    fn test_namespaced_policy_is_pinned_to_its_namespace() {
        let selector = build_namespace_selector(&admission_policy(), "kubewarden");
        assert_eq!(
            selector.match_labels.unwrap()["kubernetes.io/metadata.name"],
            "team-a"
        );
        assert!(selector.match_expressions.is_none());
    }

    #[test]
    fn test_cluster_policy_excludes_deployments_namespace() {
        let user_selector = LabelSelector {
            match_labels: Some(BTreeMap::from([("env".to_string(), "prod".to_string())])),
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "tier".into(),
                operator: "Exists".into(),
                values: None,
            }]),
        };
        let selector =
            build_namespace_selector(&cluster_policy(false, Some(user_selector)), "kubewarden");

        assert_eq!(selector.match_labels.unwrap()["env"], "prod");
        let expressions = selector.match_expressions.unwrap();
        assert_eq!(expressions.len(), 2);
        assert_eq!(expressions[0].key, "tier");
        assert_eq!(expressions[1].key, "kubernetes.io/metadata.name");
        assert_eq!(expressions[1].operator, "NotIn");
        assert_eq!(expressions[1].values, Some(vec!["kubewarden".to_string()]));
    }

    #[test]
    fn test_validating_entry_points_at_policy_server() {
        let entry = build_validating_webhook(&admission_policy(), &params(true));

        assert_eq!(entry.name, "namespaced-team-a-privileged.kubewarden.admission");
        assert_eq!(entry.admission_review_versions, vec!["v1".to_string()]);
        assert_eq!(entry.side_effects, "None");

        let client_config = entry.client_config;
        assert_eq!(client_config.ca_bundle.unwrap().0, CA.as_bytes());
        let service = client_config.service.unwrap();
        assert_eq!(service.name, "policy-server-reserved");
        assert_eq!(service.namespace, "kubewarden");
        assert_eq!(service.port, Some(8443));
        assert_eq!(
            service.path.as_deref(),
            Some("/validate/namespaced-team-a-privileged")
        );

        assert_eq!(entry.rules.unwrap().len(), 1);
        assert_eq!(entry.match_conditions.unwrap().len(), 1);
    }

    #[test]
    fn test_match_conditions_follow_feature_gate() {
        let entry = build_validating_webhook(&admission_policy(), &params(false));
        assert!(entry.match_conditions.is_none());
    }

    #[test]
    fn test_mutating_entry_carries_the_same_fields() {
        let policy = cluster_policy(true, None);
        let validating = build_validating_webhook(&policy, &params(true));
        let mutating = build_mutating_webhook(&policy, &params(true));

        assert_eq!(mutating.name, validating.name);
        assert_eq!(mutating.client_config, validating.client_config);
        assert_eq!(mutating.namespace_selector, validating.namespace_selector);
        assert!(mutating.reinvocation_policy.is_none());
    }

    #[test]
    fn test_configuration_patch_shape() {
        let policy = cluster_policy(true, None);
        let (kind, entry) = desired_entry(&policy, &params(true)).unwrap();
        assert_eq!(kind, WebhookKind::Mutating);

        let patch = configuration_patch(kind, vec![entry]);
        assert_eq!(patch["kind"], "MutatingWebhookConfiguration");
        assert_eq!(patch["metadata"]["name"], "kubewarden-policies-mutating");
        assert_eq!(
            patch["metadata"]["labels"]["app.kubernetes.io/part-of"],
            "kubewarden"
        );
        assert_eq!(patch["webhooks"][0]["name"], "clusterwide-psa.kubewarden.admission");

        let removal = configuration_patch(WebhookKind::Validating, Vec::new());
        assert_eq!(removal["webhooks"].as_array().map(Vec::len), Some(0));
    }

    #[test]
    fn test_server_defaulted_entry_is_not_drift() {
        let (_, desired) = desired_entry(&admission_policy(), &params(true)).unwrap();

        let mut observed = desired.clone();
        observed["timeoutSeconds"] = serde_json::json!(10);
        observed["matchPolicy"] = serde_json::json!("Equivalent");
        observed["rules"][0]["scope"] = serde_json::json!("*");
        assert!(is_subset(&desired, &observed));

        observed["clientConfig"]["service"]["name"] = serde_json::json!("policy-server-default");
        assert!(!is_subset(&desired, &observed));
    }

    fn restrictive_cluster_policy() -> ClusterAdmissionPolicy {
        let mut policy = cluster_policy(false, None);
        policy.spec.base.object_selector = Some(LabelSelector {
            match_labels: Some(BTreeMap::from([("tier".to_string(), "frontend".to_string())])),
            ..Default::default()
        });
        policy.spec.base.timeout_seconds = Some(5);
        policy.spec.base.failure_policy = Some("Fail".into());
        policy
    }

    // What the policy's field manager owns after applying `entry`.
    fn owned_entry_fields(entry: &Value) -> Value {
        let mut fields = serde_json::Map::new();
        fields.insert(".".into(), json!({}));
        for key in entry.as_object().unwrap().keys() {
            fields.insert(format!("f:{key}"), json!({}));
        }
        let mut webhooks = serde_json::Map::new();
        webhooks.insert(format!("k:{}", json!({"name": entry["name"]})), Value::Object(fields));
        json!({
            "f:metadata": {"f:labels": {"f:app.kubernetes.io/part-of": {}}},
            "f:webhooks": webhooks
        })
    }

    fn observed_configuration(entry: &Value, manager: &str) -> ObservedConfiguration {
        let mut served = entry.clone();
        served["matchPolicy"] = json!("Equivalent");
        served["rules"][0]["scope"] = json!("*");
        if served.get("timeoutSeconds").is_none() {
            served["timeoutSeconds"] = json!(10);
        }
        ObservedConfiguration {
            metadata: ObjectMeta {
                name: Some("kubewarden-policies-validating".into()),
                managed_fields: Some(vec![ManagedFieldsEntry {
                    manager: Some(manager.to_string()),
                    operation: Some("Apply".into()),
                    fields_type: Some("FieldsV1".into()),
                    fields_v1: Some(FieldsV1(owned_entry_fields(entry))),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            entries: vec![served],
        }
    }

    #[test]
    fn test_dropped_entry_fields_need_apply() {
        let before = restrictive_cluster_policy();
        let manager = policy_field_manager(&before);
        let (kind, applied) = desired_entry(&before, &params(true)).unwrap();
        assert_eq!(applied["name"], "clusterwide-psa.kubewarden.admission");
        assert!(applied.get("objectSelector").is_some());
        let observed = observed_configuration(&applied, &manager);

        let mut after = before.clone();
        after.spec.base.object_selector = None;
        after.spec.base.timeout_seconds = None;
        after.spec.base.failure_policy = None;
        after.spec.base.match_conditions = None;
        let (_, desired) = desired_entry(&after, &params(true)).unwrap();

        // The observed entry still holds every value the new entry sets.
        assert!(is_subset(&desired, &observed.entries[0]));
        assert!(entry_needs_apply(Some(&observed), kind, &desired, &manager));
    }

    #[test]
    fn test_unchanged_entry_needs_no_apply() {
        let policy = restrictive_cluster_policy();
        let manager = policy_field_manager(&policy);
        let (kind, desired) = desired_entry(&policy, &params(true)).unwrap();
        let observed = observed_configuration(&desired, &manager);

        assert!(!entry_needs_apply(Some(&observed), kind, &desired, &manager));
    }

    #[test]
    fn test_server_defaults_are_not_owned() {
        let policy = cluster_policy(false, None);
        let manager = policy_field_manager(&policy);
        let (kind, desired) = desired_entry(&policy, &params(true)).unwrap();
        assert!(desired.get("timeoutSeconds").is_none());
        let observed = observed_configuration(&desired, &manager);
        assert_eq!(observed.entries[0]["timeoutSeconds"], 10);

        assert!(!entry_needs_apply(Some(&observed), kind, &desired, &manager));
    }

    #[test]
    fn test_missing_configuration_or_entry_needs_apply() {
        let policy = cluster_policy(false, None);
        let manager = policy_field_manager(&policy);
        let (kind, desired) = desired_entry(&policy, &params(true)).unwrap();
        assert!(entry_needs_apply(None, kind, &desired, &manager));

        let other = admission_policy();
        let (_, other_entry) = desired_entry(&other, &params(true)).unwrap();
        let observed = observed_configuration(&other_entry, &policy_field_manager(&other));
        assert!(observed.entry(webhook_name(&policy).as_str()).is_none());
        assert!(entry_needs_apply(Some(&observed), kind, &desired, &manager));
    }
}
