// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Command line flags and the immutable controller configuration derived from them.
//!
//! Flags are parsed once at startup into [`Cli`] and converted into a
//! [`ControllerConfig`] which is shared by every reconciler through
//! [`crate::context::Context`].

use crate::constants::{
    DEFAULT_DEPLOYMENTS_NAMESPACE, DEFAULT_HEALTH_PROBE_BIND_ADDRESS,
    DEFAULT_LEASE_DURATION_SECS, DEFAULT_LEASE_GRACE_SECS, DEFAULT_METRICS_BIND_ADDRESS,
    DEFAULT_WEBHOOK_SERVICE_NAME,
};
use clap::Parser;
use std::net::SocketAddr;

/// Kubewarden controller command line.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "kubewarden-controller",
    about = "Reconciles Kubewarden policy servers, policies and their webhook registrations"
)]
pub struct Cli {
    /// Namespace where policy servers and certificate secrets are deployed
    #[arg(long, env = "NAMESPACE", default_value = DEFAULT_DEPLOYMENTS_NAMESPACE)]
    pub deployments_namespace: String,

    /// Name of the service exposing the controller webhook server
    #[arg(long, default_value = DEFAULT_WEBHOOK_SERVICE_NAME)]
    pub webhook_service_name: String,

    /// Enable leader election so only one replica reconciles at a time
    #[arg(long)]
    pub leader_elect: bool,

    /// Leader election lease duration in seconds
    #[arg(long, default_value_t = DEFAULT_LEASE_DURATION_SECS)]
    pub lease_duration_secs: u64,

    /// Leader election renew grace period in seconds
    #[arg(long, default_value_t = DEFAULT_LEASE_GRACE_SECS)]
    pub lease_grace_secs: u64,

    /// `ConfigMap` holding the client CA bundle. Enables mutual TLS when set.
    #[arg(long, default_value = "")]
    pub client_ca_configmap_name: String,

    /// Enable Prometheus metrics on policy servers
    #[arg(long)]
    pub enable_metrics: bool,

    /// Enable OpenTelemetry tracing on policy servers
    #[arg(long)]
    pub enable_tracing: bool,

    /// Inject an OpenTelemetry collector sidecar into policy server pods
    #[arg(long)]
    pub enable_otel_sidecar: bool,

    /// Secret holding the OpenTelemetry collector CA certificate
    #[arg(long, default_value = "")]
    pub opentelemetry_certificate_secret: String,

    /// Secret holding the OpenTelemetry client certificate
    #[arg(long, default_value = "")]
    pub opentelemetry_client_certificate_secret: String,

    /// Make policy servers accept every admission review for the deployments namespace
    #[arg(long)]
    pub always_accept_admission_reviews_on_deployments_namespace: bool,

    /// Address the controller metrics endpoint binds to
    #[arg(long, default_value = DEFAULT_METRICS_BIND_ADDRESS)]
    pub metrics_bind_address: SocketAddr,

    /// Address the health probe endpoint binds to
    #[arg(long, default_value = DEFAULT_HEALTH_PROBE_BIND_ADDRESS)]
    pub health_probe_bind_address: SocketAddr,
}

/// Telemetry settings propagated to policy server deployments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub metrics_enabled: bool,
    pub tracing_enabled: bool,
    pub otel_sidecar_enabled: bool,
    pub otel_certificate_secret: Option<String>,
    pub otel_client_certificate_secret: Option<String>,
}

impl TelemetryConfig {
    /// Whether any OpenTelemetry signal is exported by policy servers.
    #[must_use]
    pub fn otel_enabled(&self) -> bool {
        self.metrics_enabled || self.tracing_enabled
    }
}

/// Immutable configuration shared by every reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub deployments_namespace: String,
    pub webhook_service_name: String,
    pub client_ca_configmap_name: Option<String>,
    pub always_accept_admission_reviews_on_deployments_namespace: bool,
    pub telemetry: TelemetryConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            deployments_namespace: DEFAULT_DEPLOYMENTS_NAMESPACE.to_string(),
            webhook_service_name: DEFAULT_WEBHOOK_SERVICE_NAME.to_string(),
            client_ca_configmap_name: None,
            always_accept_admission_reviews_on_deployments_namespace: false,
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Mutual TLS is enabled when a client CA `ConfigMap` is configured.
    #[must_use]
    pub fn mtls_enabled(&self) -> bool {
        self.client_ca_configmap_name.is_some()
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl From<&Cli> for ControllerConfig {
    fn from(cli: &Cli) -> Self {
        Self {
            deployments_namespace: cli.deployments_namespace.clone(),
            webhook_service_name: cli.webhook_service_name.clone(),
            client_ca_configmap_name: non_empty(&cli.client_ca_configmap_name),
            always_accept_admission_reviews_on_deployments_namespace: cli
                .always_accept_admission_reviews_on_deployments_namespace,
            telemetry: TelemetryConfig {
                metrics_enabled: cli.enable_metrics,
                tracing_enabled: cli.enable_tracing,
                otel_sidecar_enabled: cli.enable_otel_sidecar,
                otel_certificate_secret: non_empty(&cli.opentelemetry_certificate_secret),
                otel_client_certificate_secret: non_empty(
                    &cli.opentelemetry_client_certificate_secret,
                ),
            },
        }
    }
}
