// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `metrics.rs`

#[cfg(test)]
mod tests {
    use crate::crd::{
        AdmissionPolicy, AdmissionPolicySpec, PolicySpecBase, PolicyStatus, PolicyStatusEnum,
    };
    use crate::metrics::{
        gather_metrics, record_policy_count, record_reconciliation_error,
        record_reconciliation_requeue, record_reconciliation_success, record_resource_write,
        ResourceWrite, POLICY_TOTAL, RECONCILIATION_DURATION_SECONDS, RECONCILIATION_TOTAL,
        REQUEUE_TOTAL, RESOURCE_WRITES_TOTAL,
    };
    use std::time::Duration;

    #[test]
    fn test_record_reconciliation_success() {
        let resource_type = "TestResource";
        record_reconciliation_success(resource_type, Duration::from_millis(500));

        let counter = RECONCILIATION_TOTAL.with_label_values(&[resource_type, "success"]);
        assert!(counter.get() > 0.0);

        let histogram = RECONCILIATION_DURATION_SECONDS.with_label_values(&[resource_type]);
        assert!(histogram.get_sample_count() > 0);
    }

    #[test]
    fn test_record_reconciliation_error() {
        let resource_type = "TestResourceError";
        record_reconciliation_error(resource_type, Duration::from_millis(250));

        let counter = RECONCILIATION_TOTAL.with_label_values(&[resource_type, "error"]);
        assert!(counter.get() > 0.0);
    }

    #[test]
    fn test_record_requeue_counts_reason() {
        let resource_type = "TestRequeue";
        record_reconciliation_requeue(resource_type, "dependency_wait");
        record_reconciliation_requeue(resource_type, "dependency_wait");

        assert_eq!(
            REQUEUE_TOTAL
                .with_label_values(&[resource_type, "dependency_wait"])
                .get(),
            2.0
        );
        assert_eq!(
            RECONCILIATION_TOTAL
                .with_label_values(&[resource_type, "requeue"])
                .get(),
            2.0
        );
    }

    #[test]
    fn test_record_resource_write_by_operation() {
        record_resource_write("TestWrites", ResourceWrite::Created);
        record_resource_write("TestWrites", ResourceWrite::Deleted);

        let created = RESOURCE_WRITES_TOTAL.with_label_values(&["TestWrites", "created"]);
        let updated = RESOURCE_WRITES_TOTAL.with_label_values(&["TestWrites", "updated"]);
        assert_eq!(created.get(), 1.0);
        assert_eq!(updated.get(), 0.0);
    }

    #[test]
    fn test_record_policy_count_labels() {
        let mut policy = AdmissionPolicy::new(
            "privileged",
            AdmissionPolicySpec {
                base: PolicySpecBase {
                    failure_policy: Some("Fail".into()),
                    ..Default::default()
                },
                module: "registry://ghcr.io/kubewarden/policies/pod-privileged:v0.2.5".into(),
                ..Default::default()
            },
        );
        policy.metadata.namespace = Some("metrics-test".into());
        policy.status = Some(PolicyStatus {
            policy_status: PolicyStatusEnum::Active,
            ..Default::default()
        });

        record_policy_count(&policy);

        let counter = POLICY_TOTAL.with_label_values(&[
            "namespaced-metrics-test-privileged",
            "default",
            "registry://ghcr.io/kubewarden/policies/pod-privileged:v0.2.5",
            "false",
            "metrics-test",
            "Fail",
            "active",
        ]);
        assert!(counter.get() >= 1.0);
    }

    #[test]
    fn test_gather_metrics() {
        record_reconciliation_success("GatherTest", Duration::from_millis(100));

        let metrics_text = gather_metrics().expect("gathering metrics should succeed");
        assert!(metrics_text.contains("kubewarden_controller_reconciliations_total"));
    }
}
