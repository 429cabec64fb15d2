// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Policy server Kubernetes resource builders
//!
//! This module provides functions to build the Kubernetes resources (`Secret`, `ConfigMap`,
//! `Deployment`, `Service`) that make up a running `PolicyServer`. All functions are pure
//! and easily testable; the reconciler in [`crate::reconcilers::policyserver`] only applies
//! what is built here.

use crate::certs::CertificateBundle;
use crate::config::ControllerConfig;
use crate::constants::{
    API_GROUP_VERSION, CERTS_MOUNT_PATH, CLIENT_CA_KEY, CLIENT_CA_MOUNT_PATH,
    DOCKER_CONFIG_MOUNT_PATH, KIND_POLICY_SERVER, MAX_POLICY_SERVER_NAME_LENGTH,
    POLICIES_DOWNLOAD_DIR, POLICIES_MOUNT_PATH, POLICY_SERVER_CERT_KEY,
    POLICY_SERVER_CONTAINER_NAME, POLICY_SERVER_KEY_KEY, POLICY_SERVER_METRICS_PORT,
    POLICY_SERVER_POLICIES_KEY, POLICY_SERVER_PORT, POLICY_SERVER_READINESS_PATH,
    POLICY_SERVER_READINESS_PORT, POLICY_SERVER_SOURCES_KEY, READINESS_FAILURE_THRESHOLD,
    READINESS_INITIAL_DELAY_SECS, READINESS_PERIOD_SECS, READINESS_TIMEOUT_SECS,
    SOURCES_MOUNT_PATH, VERIFICATION_CONFIG_KEY, VERIFICATION_MOUNT_PATH,
};
use crate::crd::{ContextAwareResource, PolicyServer, PolicyServerSpec};
use crate::labels::{
    APP_LABEL, CA_FINGERPRINT_ANNOTATION, CONFIG_VERSION_ANNOTATION,
    OTEL_SIDECAR_INJECT_ANNOTATION, POLICY_SERVER_LABEL,
};
use crate::policy::Policy;
use k8s_openapi::api::{
    apps::v1::{Deployment, DeploymentSpec},
    core::v1::{
        Capabilities, ConfigMap, ConfigMapVolumeSource, Container, ContainerPort,
        EmptyDirVolumeSource, EnvVar, HTTPGetAction, KeyToPath, PodSpec, PodTemplateSpec, Probe,
        ResourceRequirements, Secret, SecretVolumeSource, SecurityContext, Service, ServicePort,
        ServiceSpec, Volume, VolumeMount,
    },
};
use k8s_openapi::apimachinery::pkg::{
    api::resource::Quantity,
    apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference},
    util::intstr::IntOrString,
};
use k8s_openapi::ByteString;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::debug;

// Volume names
const VOLUME_POLICIES: &str = "policies";
const VOLUME_SOURCES: &str = "sources";
const VOLUME_CERTS: &str = "certs";
const VOLUME_POLICY_STORE: &str = "policy-store";
const VOLUME_VERIFICATION: &str = "verification";
const VOLUME_DOCKER_CONFIG: &str = "imagepullsecret";
const VOLUME_CLIENT_CA: &str = "client-ca";
const VOLUME_OTEL_CERTIFICATE: &str = "otel-certificate";
const VOLUME_OTEL_CLIENT_CERTIFICATE: &str = "otel-client-certificate";

const DOCKER_CONFIG_SECRET_KEY: &str = ".dockerconfigjson";
const DOCKER_CONFIG_SECRET_TYPE: &str = "kubernetes.io/dockerconfigjson";
const DOCKER_CONFIG_FILENAME: &str = "config.json";

const OTEL_CERTIFICATE_MOUNT_PATH: &str = "/otel-certificate";
const OTEL_CLIENT_CERTIFICATE_MOUNT_PATH: &str = "/otel-client-certificate";

/// Builds the owner reference tying a child object to its `PolicyServer`.
///
/// Garbage collection removes the children once the `PolicyServer` is gone.
#[must_use]
pub fn build_owner_references(policy_server: &PolicyServer) -> Vec<OwnerReference> {
    vec![OwnerReference {
        api_version: API_GROUP_VERSION.to_string(),
        kind: KIND_POLICY_SERVER.to_string(),
        name: policy_server.name_any(),
        uid: policy_server.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }]
}

/// Labels identifying the policy server pods.
///
/// The `PodDisruptionBudget` selects on a subset of these, the Deployment and Service
/// select on the `app` label alone.
#[must_use]
pub fn build_pod_labels(policy_server: &PolicyServer) -> BTreeMap<String, String> {
    let mut labels = policy_server.common_labels();
    labels.insert(APP_LABEL.into(), policy_server.app_label());
    labels.insert(POLICY_SERVER_LABEL.into(), policy_server.name_any());
    labels
}

fn selector_labels(policy_server: &PolicyServer) -> BTreeMap<String, String> {
    BTreeMap::from([(APP_LABEL.to_string(), policy_server.app_label())])
}

fn object_meta(policy_server: &PolicyServer, namespace: &str) -> ObjectMeta {
    let mut labels = policy_server.common_labels();
    labels.insert(POLICY_SERVER_LABEL.into(), policy_server.name_any());
    ObjectMeta {
        name: Some(policy_server.name_with_prefix()),
        namespace: Some(namespace.into()),
        labels: Some(labels),
        owner_references: Some(build_owner_references(policy_server)),
        ..Default::default()
    }
}

// ============================================================================
// Certificate Secret
// ============================================================================

/// Builds the `Secret` holding the policy server's TLS certificate.
///
/// The secret is annotated with the fingerprint of the CA that signed it so a CA
/// rotation can be detected without parsing the leaf.
#[must_use]
pub fn build_cert_secret(
    policy_server: &PolicyServer,
    namespace: &str,
    bundle: &CertificateBundle,
    ca_fingerprint: &str,
) -> Secret {
    let mut metadata = object_meta(policy_server, namespace);
    metadata.annotations = Some(BTreeMap::from([(
        CA_FINGERPRINT_ANNOTATION.to_string(),
        ca_fingerprint.to_string(),
    )]));

    Secret {
        metadata,
        type_: Some("Opaque".into()),
        data: Some(BTreeMap::from([
            (
                POLICY_SERVER_CERT_KEY.to_string(),
                ByteString(bundle.cert_pem.clone().into_bytes()),
            ),
            (
                POLICY_SERVER_KEY_KEY.to_string(),
                ByteString(bundle.key_pem.clone().into_bytes()),
            ),
        ])),
        ..Default::default()
    }
}

// ============================================================================
// ConfigMap
// ============================================================================

/// A member of a policy group as seen by the policy server.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyGroupMemberEntry {
    pub module: String,
    pub settings: serde_json::Value,
    pub context_aware_resources: Vec<ContextAwareResource>,
}

/// One policy entry in `policies.yml`.
///
/// Single policies carry `module`; groups carry `policies`, `expression` and `message`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyServerConfigEntry {
    /// `<namespace>/<name>` of the policy object
    pub namespaced_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    pub policy_mode: String,
    pub allowed_to_mutate: bool,
    pub context_aware_resources: Vec<ContextAwareResource>,
    pub settings: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policies: Option<BTreeMap<String, PolicyGroupMemberEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn settings_or_empty(settings: Option<&serde_json::Value>) -> serde_json::Value {
    settings
        .filter(|value| !value.is_null())
        .cloned()
        .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()))
}

/// Builds the `policies.yml` entry for a policy bound to a policy server.
///
/// Returns the entry keyed by the policy's unique name.
#[must_use]
pub fn build_policy_config_entry<P: Policy>(policy: &P) -> (String, PolicyServerConfigEntry) {
    let namespaced_name = match policy.namespace() {
        Some(namespace) => format!("{namespace}/{}", policy.name_any()),
        None => format!("/{}", policy.name_any()),
    };

    let entry = match policy.group_members() {
        Some(members) => PolicyServerConfigEntry {
            namespaced_name,
            module: None,
            policy_mode: policy.mode().as_str().to_string(),
            allowed_to_mutate: false,
            context_aware_resources: Vec::new(),
            settings: settings_or_empty(None),
            policies: Some(
                members
                    .iter()
                    .map(|(name, member)| {
                        (
                            name.clone(),
                            PolicyGroupMemberEntry {
                                module: member.module.clone(),
                                settings: settings_or_empty(member.settings.as_ref()),
                                context_aware_resources: member.context_aware_resources.clone(),
                            },
                        )
                    })
                    .collect(),
            ),
            expression: policy.expression().map(str::to_string),
            message: policy.message().map(str::to_string),
        },
        None => PolicyServerConfigEntry {
            namespaced_name,
            module: Some(policy.module().to_string()),
            policy_mode: policy.mode().as_str().to_string(),
            allowed_to_mutate: policy.is_mutating(),
            context_aware_resources: policy.effective_context_aware_resources(),
            settings: settings_or_empty(policy.settings()),
            policies: None,
            expression: None,
            message: None,
        },
    };

    (policy.unique_name(), entry)
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum SourceAuthority<'a> {
    Data { data: &'a str },
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
struct SourcesConfig<'a> {
    insecure_sources: Vec<&'a str>,
    source_authorities: BTreeMap<&'a str, Vec<SourceAuthority<'a>>>,
}

/// Renders `sources.yml` from the policy server's registry settings.
///
/// # Errors
///
/// Returns an error if YAML serialization fails.
pub fn build_sources_yaml(spec: &PolicyServerSpec) -> Result<String, serde_yaml::Error> {
    let sources = SourcesConfig {
        insecure_sources: spec
            .insecure_sources
            .iter()
            .flatten()
            .map(String::as_str)
            .collect(),
        source_authorities: spec
            .source_authorities
            .iter()
            .flatten()
            .map(|(host, pems)| {
                (
                    host.as_str(),
                    pems.iter()
                        .map(|pem| SourceAuthority::Data { data: pem })
                        .collect(),
                )
            })
            .collect(),
    };
    serde_yaml::to_string(&sources)
}

/// Renders `policies.yml` from the entries of every bound policy.
///
/// # Errors
///
/// Returns an error if YAML serialization fails.
pub fn build_policies_yaml(
    entries: &BTreeMap<String, PolicyServerConfigEntry>,
) -> Result<String, serde_yaml::Error> {
    serde_yaml::to_string(entries)
}

/// Hex SHA-256 over the `ConfigMap` data, used to roll pods when configuration changes.
#[must_use]
pub fn config_version(data: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in data {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// Builds the `ConfigMap` holding `policies.yml` and `sources.yml`.
///
/// # Errors
///
/// Returns an error if either document cannot be serialized.
pub fn build_configmap(
    policy_server: &PolicyServer,
    namespace: &str,
    entries: &BTreeMap<String, PolicyServerConfigEntry>,
) -> Result<ConfigMap, serde_yaml::Error> {
    let data = BTreeMap::from([
        (
            POLICY_SERVER_POLICIES_KEY.to_string(),
            build_policies_yaml(entries)?,
        ),
        (
            POLICY_SERVER_SOURCES_KEY.to_string(),
            build_sources_yaml(&policy_server.spec)?,
        ),
    ]);

    debug!(
        policy_server = %policy_server.name_any(),
        policies = entries.len(),
        "Built policy server ConfigMap"
    );

    Ok(ConfigMap {
        metadata: object_meta(policy_server, namespace),
        data: Some(data),
        ..Default::default()
    })
}

// ============================================================================
// Deployment
// ============================================================================

fn env_var(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.into(),
        mount_path: path.into(),
        read_only: Some(true),
        ..Default::default()
    }
}

fn configmap_volume(name: &str, configmap: &str, items: Option<Vec<KeyToPath>>) -> Volume {
    Volume {
        name: name.into(),
        config_map: Some(ConfigMapVolumeSource {
            name: configmap.into(),
            items,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn secret_volume(name: &str, secret: &str, items: Option<Vec<KeyToPath>>) -> Volume {
    Volume {
        name: name.into(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret.into()),
            items,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn key_to_path(key: &str, path: &str) -> Option<Vec<KeyToPath>> {
    Some(vec![KeyToPath {
        key: key.into(),
        path: path.into(),
        ..Default::default()
    }])
}

fn default_container_security_context() -> SecurityContext {
    SecurityContext {
        read_only_root_filesystem: Some(true),
        privileged: Some(false),
        run_as_non_root: Some(true),
        allow_privilege_escalation: Some(false),
        capabilities: Some(Capabilities {
            drop: Some(vec!["ALL".to_string()]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Environment, volumes and mounts derived from the policy server spec and controller flags.
struct PodWiring {
    env: Vec<EnvVar>,
    volumes: Vec<Volume>,
    mounts: Vec<VolumeMount>,
}

fn build_pod_wiring(policy_server: &PolicyServer, config: &ControllerConfig) -> PodWiring {
    let spec = &policy_server.spec;
    let prefixed = policy_server.name_with_prefix();
    let telemetry = &config.telemetry;

    let mut env = vec![
        env_var(
            "KUBEWARDEN_CERT_FILE",
            format!("{CERTS_MOUNT_PATH}/{POLICY_SERVER_CERT_KEY}"),
        ),
        env_var(
            "KUBEWARDEN_KEY_FILE",
            format!("{CERTS_MOUNT_PATH}/{POLICY_SERVER_KEY_KEY}"),
        ),
        env_var("KUBEWARDEN_PORT", POLICY_SERVER_PORT.to_string()),
        env_var("KUBEWARDEN_POLICIES_DOWNLOAD_DIR", POLICIES_DOWNLOAD_DIR),
        env_var(
            "KUBEWARDEN_POLICIES",
            format!("{POLICIES_MOUNT_PATH}/{POLICY_SERVER_POLICIES_KEY}"),
        ),
        env_var(
            "KUBEWARDEN_SOURCES_PATH",
            format!("{SOURCES_MOUNT_PATH}/{POLICY_SERVER_SOURCES_KEY}"),
        ),
    ];
    let mut volumes = vec![
        configmap_volume(
            VOLUME_POLICIES,
            &prefixed,
            key_to_path(POLICY_SERVER_POLICIES_KEY, POLICY_SERVER_POLICIES_KEY),
        ),
        configmap_volume(
            VOLUME_SOURCES,
            &prefixed,
            key_to_path(POLICY_SERVER_SOURCES_KEY, POLICY_SERVER_SOURCES_KEY),
        ),
        secret_volume(VOLUME_CERTS, &prefixed, None),
        Volume {
            name: VOLUME_POLICY_STORE.into(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
    ];
    let mut mounts = vec![
        mount(VOLUME_POLICIES, POLICIES_MOUNT_PATH),
        mount(VOLUME_SOURCES, SOURCES_MOUNT_PATH),
        mount(VOLUME_CERTS, CERTS_MOUNT_PATH),
        VolumeMount {
            name: VOLUME_POLICY_STORE.into(),
            mount_path: POLICIES_DOWNLOAD_DIR.into(),
            ..Default::default()
        },
    ];

    if let Some(verification) = &spec.verification_config {
        env.push(env_var(
            "KUBEWARDEN_VERIFICATION_CONFIG_PATH",
            format!("{VERIFICATION_MOUNT_PATH}/{VERIFICATION_CONFIG_KEY}"),
        ));
        volumes.push(configmap_volume(
            VOLUME_VERIFICATION,
            verification,
            key_to_path(VERIFICATION_CONFIG_KEY, VERIFICATION_CONFIG_KEY),
        ));
        mounts.push(mount(VOLUME_VERIFICATION, VERIFICATION_MOUNT_PATH));
    }

    if let Some(pull_secret) = &spec.image_pull_secret {
        env.push(env_var(
            "KUBEWARDEN_DOCKER_CONFIG_JSON_PATH",
            format!("{DOCKER_CONFIG_MOUNT_PATH}/{DOCKER_CONFIG_FILENAME}"),
        ));
        volumes.push(secret_volume(
            VOLUME_DOCKER_CONFIG,
            pull_secret,
            key_to_path(DOCKER_CONFIG_SECRET_KEY, DOCKER_CONFIG_FILENAME),
        ));
        mounts.push(mount(VOLUME_DOCKER_CONFIG, DOCKER_CONFIG_MOUNT_PATH));
    }

    if config.always_accept_admission_reviews_on_deployments_namespace {
        env.push(env_var(
            "KUBEWARDEN_ALWAYS_ACCEPT_ADMISSION_REVIEWS_ON_NAMESPACE",
            config.deployments_namespace.clone(),
        ));
    }

    if let Some(client_ca) = &config.client_ca_configmap_name {
        env.push(env_var(
            "KUBEWARDEN_CLIENT_CA_FILE",
            format!("{CLIENT_CA_MOUNT_PATH}/{CLIENT_CA_KEY}"),
        ));
        volumes.push(configmap_volume(
            VOLUME_CLIENT_CA,
            client_ca,
            key_to_path(CLIENT_CA_KEY, CLIENT_CA_KEY),
        ));
        mounts.push(mount(VOLUME_CLIENT_CA, CLIENT_CA_MOUNT_PATH));
    }

    if telemetry.metrics_enabled {
        env.push(env_var("KUBEWARDEN_ENABLE_METRICS", "1"));
    }
    if telemetry.tracing_enabled {
        env.push(env_var("KUBEWARDEN_LOG_FMT", "otlp"));
    }

    // Without the sidecar the policy server talks OTLP to a remote collector directly.
    if telemetry.otel_enabled() && !telemetry.otel_sidecar_enabled {
        if let Some(secret) = &telemetry.otel_certificate_secret {
            env.push(env_var(
                "OTEL_EXPORTER_OTLP_CERTIFICATE",
                format!("{OTEL_CERTIFICATE_MOUNT_PATH}/ca.crt"),
            ));
            volumes.push(secret_volume(VOLUME_OTEL_CERTIFICATE, secret, None));
            mounts.push(mount(VOLUME_OTEL_CERTIFICATE, OTEL_CERTIFICATE_MOUNT_PATH));
        }
        if let Some(secret) = &telemetry.otel_client_certificate_secret {
            env.push(env_var(
                "OTEL_EXPORTER_OTLP_CLIENT_CERTIFICATE",
                format!("{OTEL_CLIENT_CERTIFICATE_MOUNT_PATH}/tls.crt"),
            ));
            env.push(env_var(
                "OTEL_EXPORTER_OTLP_CLIENT_KEY",
                format!("{OTEL_CLIENT_CERTIFICATE_MOUNT_PATH}/tls.key"),
            ));
            volumes.push(secret_volume(VOLUME_OTEL_CLIENT_CERTIFICATE, secret, None));
            mounts.push(mount(
                VOLUME_OTEL_CLIENT_CERTIFICATE,
                OTEL_CLIENT_CERTIFICATE_MOUNT_PATH,
            ));
        }
    }

    // User supplied variables come last so they win on duplicate names.
    env.extend(spec.env.iter().flatten().cloned());

    PodWiring {
        env,
        volumes,
        mounts,
    }
}

/// Annotations of the pod template.
///
/// Carries the user annotations, the configuration hash and, when the OpenTelemetry
/// sidecar is enabled, the injection request.
#[must_use]
pub fn build_pod_annotations(
    policy_server: &PolicyServer,
    config: &ControllerConfig,
    config_version: &str,
) -> BTreeMap<String, String> {
    let mut annotations = policy_server.spec.annotations.clone().unwrap_or_default();
    annotations.insert(
        CONFIG_VERSION_ANNOTATION.to_string(),
        config_version.to_string(),
    );
    if config.telemetry.otel_sidecar_enabled && config.telemetry.otel_enabled() {
        annotations.insert(OTEL_SIDECAR_INJECT_ANNOTATION.to_string(), "true".to_string());
    }
    annotations
}

/// Builds the policy server `Deployment`.
///
/// `config_version` is the hash of the policy server `ConfigMap`; it is written into the
/// pod template so that any configuration change triggers a rollout.
#[must_use]
pub fn build_deployment(
    policy_server: &PolicyServer,
    config: &ControllerConfig,
    config_version: &str,
) -> Deployment {
    let spec = &policy_server.spec;
    let namespace = config.deployments_namespace.as_str();
    let wiring = build_pod_wiring(policy_server, config);

    debug!(
        policy_server = %policy_server.name_any(),
        namespace = %namespace,
        replicas = spec.replicas,
        config_version = %config_version,
        "Building policy server Deployment"
    );

    let mut ports = vec![ContainerPort {
        name: Some("policy-server".into()),
        container_port: POLICY_SERVER_PORT,
        protocol: Some("TCP".into()),
        ..Default::default()
    }];
    if config.telemetry.metrics_enabled {
        ports.push(ContainerPort {
            name: Some("metrics".into()),
            container_port: POLICY_SERVER_METRICS_PORT,
            protocol: Some("TCP".into()),
            ..Default::default()
        });
    }

    let container = Container {
        name: POLICY_SERVER_CONTAINER_NAME.into(),
        image: Some(spec.image.clone()),
        ports: Some(ports),
        env: Some(wiring.env),
        volume_mounts: Some(wiring.mounts),
        readiness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some(POLICY_SERVER_READINESS_PATH.into()),
                port: IntOrString::Int(POLICY_SERVER_READINESS_PORT),
                scheme: Some("HTTP".into()),
                ..Default::default()
            }),
            initial_delay_seconds: Some(READINESS_INITIAL_DELAY_SECS),
            period_seconds: Some(READINESS_PERIOD_SECS),
            timeout_seconds: Some(READINESS_TIMEOUT_SECS),
            failure_threshold: Some(READINESS_FAILURE_THRESHOLD),
            ..Default::default()
        }),
        resources: Some(ResourceRequirements {
            limits: spec.limits.clone(),
            requests: spec.requests.clone(),
            ..Default::default()
        }),
        security_context: Some(
            spec.security_contexts
                .as_ref()
                .and_then(|sc| sc.container.clone())
                .unwrap_or_else(default_container_security_context),
        ),
        ..Default::default()
    };

    let mut labels = policy_server.common_labels();
    labels.insert(APP_LABEL.into(), policy_server.app_label());

    Deployment {
        metadata: ObjectMeta {
            labels: Some(labels),
            ..object_meta(policy_server, namespace)
        },
        spec: Some(DeploymentSpec {
            replicas: Some(spec.replicas),
            selector: LabelSelector {
                match_labels: Some(selector_labels(policy_server)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(build_pod_labels(policy_server)),
                    annotations: Some(build_pod_annotations(
                        policy_server,
                        config,
                        config_version,
                    )),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(wiring.volumes),
                    service_account_name: spec.service_account_name.clone(),
                    security_context: spec
                        .security_contexts
                        .as_ref()
                        .and_then(|sc| sc.pod.clone()),
                    affinity: spec.affinity.clone(),
                    tolerations: spec.tolerations.clone(),
                    priority_class_name: spec.priority_class_name.clone(),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

// ============================================================================
// Service
// ============================================================================

/// Builds the `Service` fronting the policy server pods.
///
/// Exposes the admission port and, when metrics are enabled, the metrics port.
#[must_use]
pub fn build_service(policy_server: &PolicyServer, config: &ControllerConfig) -> Service {
    let mut ports = vec![ServicePort {
        name: Some("policy-server".into()),
        port: POLICY_SERVER_PORT,
        target_port: Some(IntOrString::Int(POLICY_SERVER_PORT)),
        protocol: Some("TCP".into()),
        ..Default::default()
    }];
    if config.telemetry.metrics_enabled {
        ports.push(ServicePort {
            name: Some("metrics".into()),
            port: POLICY_SERVER_METRICS_PORT,
            target_port: Some(IntOrString::Int(POLICY_SERVER_METRICS_PORT)),
            protocol: Some("TCP".into()),
            ..Default::default()
        });
    }

    Service {
        metadata: object_meta(policy_server, &config.deployments_namespace),
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(policy_server)),
            ports: Some(ports),
            type_: Some("ClusterIP".into()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Validates a policy server spec the way the admission webhook does.
///
/// Returns every violation found, not just the first one.
///
/// # Errors
///
/// Returns the list of violations when the spec is invalid.
pub fn validate_policy_server_spec(name: &str, spec: &PolicyServerSpec) -> Result<(), Vec<String>> {
    let mut violations = Vec::new();

    if name.len() > MAX_POLICY_SERVER_NAME_LENGTH {
        violations.push(format!(
            "name '{name}' is {} characters long, the maximum is {MAX_POLICY_SERVER_NAME_LENGTH}",
            name.len()
        ));
    }

    if spec.min_available.is_some() && spec.max_unavailable.is_some() {
        violations.push("minAvailable and maxUnavailable cannot both be set".to_string());
    }

    if spec.replicas < 0 {
        violations.push(format!("replicas must not be negative, got {}", spec.replicas));
    }

    validate_quantities("limits", spec.limits.as_ref(), &mut violations);
    validate_quantities("requests", spec.requests.as_ref(), &mut violations);

    if let (Some(limits), Some(requests)) = (&spec.limits, &spec.requests) {
        for (resource, request) in requests {
            let Some(limit) = limits.get(resource) else {
                continue;
            };
            if let (Some(request_value), Some(limit_value)) =
                (parse_quantity(&request.0), parse_quantity(&limit.0))
            {
                if request_value > limit_value {
                    violations.push(format!(
                        "request for '{resource}' ({}) exceeds its limit ({})",
                        request.0, limit.0
                    ));
                }
            }
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

fn validate_quantities(
    field: &str,
    quantities: Option<&BTreeMap<String, Quantity>>,
    violations: &mut Vec<String>,
) {
    for (resource, quantity) in quantities.into_iter().flatten() {
        match parse_quantity(&quantity.0) {
            None => violations.push(format!(
                "{field}.{resource}: '{}' is not a valid quantity",
                quantity.0
            )),
            Some(value) if value < 0.0 => violations.push(format!(
                "{field}.{resource}: '{}' must not be negative",
                quantity.0
            )),
            Some(_) => {}
        }
    }
}

/// Checks the secret named by `spec.imagePullSecret`, as read from `namespace`.
///
/// The policy server mounts `.dockerconfigjson` from it, so the secret must exist and
/// carry the docker config type.
///
/// # Errors
///
/// Returns the violation when the secret is missing or of another type.
pub fn validate_image_pull_secret(
    name: &str,
    namespace: &str,
    secret: Option<&Secret>,
) -> Result<(), String> {
    let Some(secret) = secret else {
        return Err(format!(
            "imagePullSecret: secret '{name}' not found in namespace '{namespace}'"
        ));
    };
    match secret.type_.as_deref() {
        Some(DOCKER_CONFIG_SECRET_TYPE) => Ok(()),
        _ => Err(format!(
            "imagePullSecret: secret '{name}' is not of type {DOCKER_CONFIG_SECRET_TYPE}"
        )),
    }
}

/// Parses a Kubernetes resource quantity (`500m`, `1.5Gi`, `2e3`) into its numeric value.
///
/// Returns `None` when the string is not a quantity.
#[must_use]
pub fn parse_quantity(input: &str) -> Option<f64> {
    let input = input.trim();
    let split = input
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(input.len());
    let (number, suffix) = input.split_at(split);
    if number.is_empty() || number == "+" || number == "-" {
        return None;
    }
    let value: f64 = number.parse().ok()?;

    let multiplier = match suffix {
        "" => 1.0,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        exponent if exponent.starts_with(['e', 'E']) => {
            let power: i32 = exponent[1..].parse().ok()?;
            10f64.powi(power)
        }
        _ => return None,
    };

    Some(value * multiplier)
}

#[cfg(test)]
#[path = "policy_server_resources_tests.rs"]
mod policy_server_resources_tests;
