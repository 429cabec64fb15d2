// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for the policy reconciler's status derivation.

#[cfg(test)]
mod tests {
    use crate::crd::{
        ClusterAdmissionPolicyGroup, ClusterAdmissionPolicyGroupSpec, PolicyMode,
        PolicyModeStatus, PolicyServer, PolicyServerSpec, PolicyStatus, PolicyStatusEnum,
    };
    use crate::policy::Policy;
    use crate::reconcilers::policy::{assess_policy, record_invalid_group, ServerReadiness};
    use crate::reconcilers::status::{create_condition, PolicyStatusUpdater};
    use crate::status_reasons::{
        CONDITION_FALSE, CONDITION_POLICY_ACTIVE,
        CONDITION_POLICY_SERVER_CONFIGURATION_UP_TO_DATE, CONDITION_TRUE,
        REASON_INVALID_POLICY_GROUP, REASON_POLICY_ACTIVE, REASON_POLICY_SERVER_NOT_FOUND,
        REASON_POLICY_SERVER_NOT_READY, REASON_POLICY_SERVER_TERMINATING,
        REASON_RECONCILIATION_SUCCEEDED, REASON_WEBHOOK_REGISTRATION_FAILED,
    };
    use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
    use serde_json::json;

    fn server() -> PolicyServer {
        PolicyServer::new(
            "default",
            PolicyServerSpec {
                image: "ghcr.io/kubewarden/policy-server:latest".into(),
                replicas: 1,
                ..Default::default()
            },
        )
    }

    fn deployment(ready_replicas: Option<i32>) -> Deployment {
        Deployment {
            status: Some(DeploymentStatus {
                ready_replicas,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn terminating<T: serde::de::DeserializeOwned>(kind_json: serde_json::Value) -> T {
        serde_json::from_value(kind_json).unwrap()
    }

    #[test]
    fn test_missing_server() {
        assert_eq!(ServerReadiness::observe(None, None), ServerReadiness::Missing);
    }

    #[test]
    fn test_terminating_server() {
        let server: PolicyServer = terminating(json!({
            "apiVersion": "policies.kubewarden.io/v1",
            "kind": "PolicyServer",
            "metadata": {
                "name": "default",
                "deletionTimestamp": "2025-01-01T00:00:00Z",
                "finalizers": ["kubewarden.io/finalizer"]
            },
            "spec": { "image": "policy-server", "replicas": 1 }
        }));
        assert_eq!(
            ServerReadiness::observe(Some(&server), Some(&deployment(Some(1)))),
            ServerReadiness::Terminating
        );
    }

    #[test]
    fn test_terminating_deployment() {
        let deployment: Deployment = terminating(json!({
            "metadata": {
                "name": "policy-server-default",
                "deletionTimestamp": "2025-01-01T00:00:00Z"
            },
            "status": { "readyReplicas": 1 }
        }));
        assert_eq!(
            ServerReadiness::observe(Some(&server()), Some(&deployment)),
            ServerReadiness::Terminating
        );
    }

    #[test]
    fn test_ready_replicas_decide_readiness() {
        let server = server();
        assert_eq!(
            ServerReadiness::observe(Some(&server), None),
            ServerReadiness::NotReady
        );
        assert_eq!(
            ServerReadiness::observe(Some(&server), Some(&deployment(None))),
            ServerReadiness::NotReady
        );
        assert_eq!(
            ServerReadiness::observe(Some(&server), Some(&deployment(Some(0)))),
            ServerReadiness::NotReady
        );
        assert_eq!(
            ServerReadiness::observe(Some(&server), Some(&deployment(Some(2)))),
            ServerReadiness::Ready
        );
    }

    #[test]
    fn test_active_requires_ready_server_and_webhook() {
        let active = assess_policy(ServerReadiness::Ready, true, PolicyMode::Monitor);
        assert_eq!(active.policy_status, PolicyStatusEnum::Active);
        assert_eq!(active.mode, PolicyModeStatus::Monitor);
        assert_eq!(active.reason, REASON_POLICY_ACTIVE);

        let scheduled = assess_policy(ServerReadiness::Ready, false, PolicyMode::Protect);
        assert_eq!(scheduled.policy_status, PolicyStatusEnum::Scheduled);
        assert_eq!(scheduled.mode, PolicyModeStatus::Unknown);
        assert_eq!(scheduled.reason, REASON_WEBHOOK_REGISTRATION_FAILED);
    }

    #[test]
    fn test_never_active_without_ready_replica() {
        for (readiness, reason) in [
            (ServerReadiness::Missing, REASON_POLICY_SERVER_NOT_FOUND),
            (ServerReadiness::Terminating, REASON_POLICY_SERVER_TERMINATING),
            (ServerReadiness::NotReady, REASON_POLICY_SERVER_NOT_READY),
        ] {
            for webhook_registered in [true, false] {
                let assessment = assess_policy(readiness, webhook_registered, PolicyMode::Protect);
                assert_eq!(assessment.policy_status, PolicyStatusEnum::Unschedulable);
                assert_eq!(assessment.mode, PolicyModeStatus::Unknown);
                assert_eq!(assessment.reason, reason);
            }
        }
    }

    #[test]
    fn test_server_appearing_moves_policy_to_active() {
        // A policy targeting a server that does not exist yet, then a ready one.
        let before = assess_policy(
            ServerReadiness::observe(None, None),
            false,
            PolicyMode::Protect,
        );
        assert_eq!(before.policy_status, PolicyStatusEnum::Unschedulable);

        let server = server();
        let after = assess_policy(
            ServerReadiness::observe(Some(&server), Some(&deployment(Some(1)))),
            true,
            PolicyMode::Protect,
        );
        assert_eq!(after.policy_status, PolicyStatusEnum::Active);
        assert_eq!(after.mode, PolicyModeStatus::Protect);
    }

    #[test]
    fn test_invalid_group_clears_both_conditions() {
        let mut group = ClusterAdmissionPolicyGroup::new(
            "restricted",
            ClusterAdmissionPolicyGroupSpec {
                expression: "missing_member()".into(),
                ..Default::default()
            },
        );
        group.status = Some(PolicyStatus {
            policy_status: PolicyStatusEnum::Active,
            mode: PolicyModeStatus::Protect,
            conditions: vec![
                create_condition(
                    CONDITION_POLICY_SERVER_CONFIGURATION_UP_TO_DATE,
                    CONDITION_TRUE,
                    REASON_RECONCILIATION_SUCCEEDED,
                    "",
                ),
                create_condition(CONDITION_POLICY_ACTIVE, CONDITION_TRUE, REASON_POLICY_ACTIVE, ""),
            ],
            observed_generation: Some(1),
        });

        let mut status = PolicyStatusUpdater::new(&group);
        let assessment = record_invalid_group(&mut status, "unknown member 'missing_member'");

        assert_eq!(assessment.policy_status, PolicyStatusEnum::Unschedulable);
        assert!(status.has_changes());
        let written = status.policy().status().unwrap();
        assert_eq!(written.policy_status, PolicyStatusEnum::Unschedulable);
        assert_eq!(written.mode, PolicyModeStatus::Unknown);
        assert_eq!(written.conditions.len(), 2);
        for condition in &written.conditions {
            assert_eq!(condition.status, CONDITION_FALSE, "{}", condition.r#type);
            assert_eq!(condition.reason.as_deref(), Some(REASON_INVALID_POLICY_GROUP));
            assert_eq!(
                condition.message.as_deref(),
                Some("unknown member 'missing_member'")
            );
        }
    }
}
