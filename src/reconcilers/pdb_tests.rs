// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `pdb.rs`

#[cfg(test)]
mod tests {
    use crate::crd::{PolicyServer, PolicyServerSpec};
    use crate::errors::ReconcileError;
    use crate::reconcilers::pdb::{plan_pod_disruption_budget, stale_budget_field, BudgetPlan};
    use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

    fn policy_server(
        min_available: Option<IntOrString>,
        max_unavailable: Option<IntOrString>,
    ) -> PolicyServer {
        PolicyServer::new(
            "ps1",
            PolicyServerSpec {
                image: "ghcr.io/kubewarden/policy-server:latest".into(),
                replicas: 3,
                min_available,
                max_unavailable,
                ..Default::default()
            },
        )
    }

    fn applied(plan: BudgetPlan) -> PodDisruptionBudget {
        match plan {
            BudgetPlan::Apply(pdb) => *pdb,
            BudgetPlan::Delete => panic!("expected a budget to be applied"),
        }
    }

    #[test]
    fn test_no_settings_deletes_budget() {
        let plan = plan_pod_disruption_budget(&policy_server(None, None), "kubewarden").unwrap();
        assert_eq!(plan, BudgetPlan::Delete);
    }

    #[test]
    fn test_min_available_budget() {
        let pdb = applied(
            plan_pod_disruption_budget(
                &policy_server(Some(IntOrString::Int(2)), None),
                "kubewarden",
            )
            .unwrap(),
        );

        assert_eq!(pdb.metadata.name.as_deref(), Some("policy-server-ps1"));
        assert_eq!(pdb.metadata.namespace.as_deref(), Some("kubewarden"));
        // The controller watches budgets through this label.
        assert_eq!(pdb.metadata.labels.unwrap()["kubewarden/policy-server"], "ps1");
        let spec = pdb.spec.unwrap();
        assert_eq!(spec.min_available, Some(IntOrString::Int(2)));
        assert!(spec.max_unavailable.is_none());

        let selector = spec.selector.unwrap().match_labels.unwrap();
        assert_eq!(selector["app.kubernetes.io/instance"], "policy-server-ps1");
        assert_eq!(selector["app.kubernetes.io/part-of"], "kubewarden");
        assert_eq!(selector["kubewarden/policy-server"], "ps1");
    }

    #[test]
    fn test_max_unavailable_budget() {
        let pdb = applied(
            plan_pod_disruption_budget(
                &policy_server(None, Some(IntOrString::String("50%".into()))),
                "kubewarden",
            )
            .unwrap(),
        );
        let spec = pdb.spec.unwrap();
        assert!(spec.min_available.is_none());
        assert_eq!(spec.max_unavailable, Some(IntOrString::String("50%".into())));
    }

    #[test]
    fn test_both_settings_are_rejected() {
        let err = plan_pod_disruption_budget(
            &policy_server(Some(IntOrString::Int(1)), Some(IntOrString::Int(1))),
            "kubewarden",
        )
        .unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidSpec { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_switching_fields_clears_the_previous_one() {
        // ps1 first ran with maxUnavailable, then switched to minAvailable.
        let observed = PodDisruptionBudget {
            spec: Some(PodDisruptionBudgetSpec {
                max_unavailable: Some(IntOrString::Int(1)),
                ..Default::default()
            }),
            ..Default::default()
        };
        let desired = applied(
            plan_pod_disruption_budget(
                &policy_server(Some(IntOrString::Int(2)), None),
                "kubewarden",
            )
            .unwrap(),
        );
        assert_eq!(stale_budget_field(&desired, &observed), Some("maxUnavailable"));

        let in_sync = PodDisruptionBudget {
            spec: Some(PodDisruptionBudgetSpec {
                min_available: Some(IntOrString::Int(2)),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(stale_budget_field(&desired, &in_sync), None);
    }
}
