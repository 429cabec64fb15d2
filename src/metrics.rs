// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the Kubewarden controller.
//!
//! Controller metrics are prefixed with `kubewarden_controller_`. The policy inventory
//! counter keeps its historical name `kubewarden_policy_total` so existing dashboards
//! continue to work. Everything is registered in [`METRICS_REGISTRY`] and served on
//! `/metrics` by [`crate::health`].

use crate::policy::Policy;
use prometheus::core::Collector;
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::LazyLock;
use std::time::Duration;

const METRICS_NAMESPACE: &str = "kubewarden_controller";

/// Name of the policy inventory counter
pub const POLICY_TOTAL_METRIC_NAME: &str = "kubewarden_policy_total";

pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Metric names and label sets are static; a registration failure is a programming error.
fn register<C: Collector + Clone + 'static>(collector: C) -> C {
    METRICS_REGISTRY
        .register(Box::new(collector.clone()))
        .expect("metric registered twice");
    collector
}

fn controller_counter(name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let opts = Opts::new(format!("{METRICS_NAMESPACE}_{name}"), help);
    register(CounterVec::new(opts, labels).expect("valid counter definition"))
}

/// Reconcile passes by `resource_type` and `status` (`success`, `error`, `requeue`)
pub static RECONCILIATION_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    controller_counter(
        "reconciliations_total",
        "Total number of reconciliations by resource type and status",
        &["resource_type", "status"],
    )
});

pub static RECONCILIATION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_reconciliation_duration_seconds"),
        "Duration of reconciliations in seconds by resource type",
    )
    .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]);
    register(HistogramVec::new(opts, &["resource_type"]).expect("valid histogram definition"))
});

/// Requeues by `resource_type` and `reason`
/// (`error`, `transient_error`, `dependency_wait`, `deletion_wait`)
pub static REQUEUE_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    controller_counter(
        "requeues_total",
        "Total number of requeue operations by resource type and reason",
        &["resource_type", "reason"],
    )
});

/// Writes to owned objects by `resource_type` and `operation`
pub static RESOURCE_WRITES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    controller_counter(
        "resource_writes_total",
        "Total number of owned object writes by type and operation",
        &["resource_type", "operation"],
    )
});

/// Failed passes by `resource_type` and `error_type` (the status condition reason)
pub static ERRORS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    controller_counter(
        "errors_total",
        "Total number of errors by resource type and error category",
        &["resource_type", "error_type"],
    )
});

/// Successful policy reconcile passes, labelled with the policy's attributes.
pub static POLICY_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        POLICY_TOTAL_METRIC_NAME,
        "How many policies are installed in the cluster",
    );
    let labels = [
        "name",
        "policy_server",
        "module",
        "mutating",
        "namespace",
        "failure_policy",
        "policy_status",
    ];
    register(CounterVec::new(opts, &labels).expect("valid counter definition"))
});

/// Certificates generated by `secret` and the `state` that triggered generation
pub static CERTIFICATE_ROTATIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    controller_counter(
        "certificate_rotations_total",
        "Total number of certificates generated by secret and triggering state",
        &["secret", "state"],
    )
});

pub static LEADER_ELECTIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    controller_counter(
        "leader_elections_total",
        "Total number of leader election events by status",
        &["status"],
    )
});

/// 1 while this pod holds the lease, 0 otherwise
pub static LEADER_STATUS: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_leader_status"),
        "Current leader election status (1 = leader, 0 = follower)",
    );
    register(GaugeVec::new(opts, &["pod_name"]).expect("valid gauge definition"))
});

/// Kind of write performed on an owned object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceWrite {
    Created,
    Updated,
    Deleted,
}

impl ResourceWrite {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

fn observe_pass(resource_type: &str, status: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, status])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[resource_type])
        .observe(duration.as_secs_f64());
}

pub fn record_reconciliation_success(resource_type: &str, duration: Duration) {
    observe_pass(resource_type, "success", duration);
}

pub fn record_reconciliation_error(resource_type: &str, duration: Duration) {
    observe_pass(resource_type, "error", duration);
}

pub fn record_reconciliation_requeue(resource_type: &str, reason: &str) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, "requeue"])
        .inc();
    REQUEUE_TOTAL
        .with_label_values(&[resource_type, reason])
        .inc();
}

pub fn record_resource_write(resource_type: &str, write: ResourceWrite) {
    RESOURCE_WRITES_TOTAL
        .with_label_values(&[resource_type, write.as_str()])
        .inc();
}

pub fn record_error(resource_type: &str, error_type: &str) {
    ERRORS_TOTAL
        .with_label_values(&[resource_type, error_type])
        .inc();
}

/// Record one successful reconcile pass of a policy.
pub fn record_policy_count<P: Policy>(policy: &P) {
    let name = policy.unique_name();
    let mutating = policy.is_mutating().to_string();
    let namespace = policy.meta().namespace.clone().unwrap_or_default();
    let status = policy.policy_status();
    POLICY_TOTAL
        .with_label_values(&[
            name.as_str(),
            policy.policy_server(),
            policy.module(),
            mutating.as_str(),
            namespace.as_str(),
            policy.failure_policy().unwrap_or_default(),
            status.as_str(),
        ])
        .inc();
}

pub fn record_certificate_rotation(secret: &str, state: &str) {
    CERTIFICATE_ROTATIONS_TOTAL
        .with_label_values(&[secret, state])
        .inc();
}

pub fn record_leader_elected(pod_name: &str) {
    LEADER_ELECTIONS_TOTAL
        .with_label_values(&["acquired"])
        .inc();
    LEADER_STATUS.with_label_values(&[pod_name]).set(1.0);
}

pub fn record_leader_lost(pod_name: &str) {
    LEADER_ELECTIONS_TOTAL.with_label_values(&["lost"]).inc();
    LEADER_STATUS.with_label_values(&[pod_name]).set(0.0);
}

/// Encode every registered metric in the Prometheus text format.
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&METRICS_REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod metrics_tests;
