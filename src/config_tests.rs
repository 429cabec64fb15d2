// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for command line parsing.

#[cfg(test)]
mod tests {
    use crate::config::{Cli, ControllerConfig};
    use clap::Parser;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["kubewarden-controller"]).unwrap();
        let config = ControllerConfig::from(&cli);

        assert_eq!(config.deployments_namespace, "kubewarden");
        assert_eq!(
            config.webhook_service_name,
            "kubewarden-controller-webhook-service"
        );
        assert!(!config.mtls_enabled());
        assert!(!config.telemetry.otel_enabled());
        assert!(!cli.leader_elect);
        assert_eq!(cli.metrics_bind_address.port(), 8088);
    }

    #[test]
    fn test_client_ca_enables_mtls() {
        let cli = Cli::try_parse_from([
            "kubewarden-controller",
            "--client-ca-configmap-name",
            "client-ca",
        ])
        .unwrap();
        let config = ControllerConfig::from(&cli);

        assert!(config.mtls_enabled());
        assert_eq!(config.client_ca_configmap_name.as_deref(), Some("client-ca"));
    }

    #[test]
    fn test_blank_client_ca_does_not_enable_mtls() {
        let cli =
            Cli::try_parse_from(["kubewarden-controller", "--client-ca-configmap-name", "  "])
                .unwrap();
        assert!(!ControllerConfig::from(&cli).mtls_enabled());
    }

    #[test]
    fn test_telemetry_flags() {
        let cli = Cli::try_parse_from([
            "kubewarden-controller",
            "--enable-metrics",
            "--enable-otel-sidecar",
            "--opentelemetry-certificate-secret",
            "otel-ca",
        ])
        .unwrap();
        let config = ControllerConfig::from(&cli);

        assert!(config.telemetry.metrics_enabled);
        assert!(!config.telemetry.tracing_enabled);
        assert!(config.telemetry.otel_sidecar_enabled);
        assert!(config.telemetry.otel_enabled());
        assert_eq!(
            config.telemetry.otel_certificate_secret.as_deref(),
            Some("otel-ca")
        );
        assert_eq!(config.telemetry.otel_client_certificate_secret, None);
    }
}
