// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Certificate reconciler.
//!
//! Keeps three kinds of TLS material in the deployments namespace:
//!
//! 1. The CA root secret (`kubewarden-ca`), self-signed, rotated within a year of expiry
//! 2. The controller webhook server certificate (`webhook-server-cert`)
//! 3. One certificate per policy server (`policy-server-<name>`), written by the
//!    policy server reconciler through [`ensure_policy_server_cert`]
//!
//! Leaf secrets record the fingerprint of the CA that signed them. A leaf whose recorded
//! fingerprint differs from the current CA was issued before a CA rotation and is reissued.
//!
//! The CA and webhook server certificate are refreshed by [`run_certificate_reconciler`]
//! on a fixed resync interval, independent of any watched resource.

use crate::certs::{
    classify, fingerprint, generate_ca, generate_leaf, inspect, now, service_dns_names,
    CertificateBundle, CertificateState,
};
use crate::config::ControllerConfig;
use crate::constants::{
    CA_ROOT_CERT_KEY, CA_ROOT_KEY_KEY, CA_ROOT_SECRET_NAME, CA_ROTATION_LOOKAHEAD_DAYS,
    CERT_RESYNC_INTERVAL_SECS, CLIENT_CA_KEY, FIELD_MANAGER, LEAF_ROTATION_LOOKAHEAD_DAYS,
    POLICY_SERVER_CERT_KEY, POLICY_SERVER_KEY_KEY, WEBHOOK_SERVER_CERT_KEY,
    WEBHOOK_SERVER_CERT_SECRET_NAME, WEBHOOK_SERVER_KEY_KEY,
};
use crate::context::Context;
use crate::crd::PolicyServer;
use crate::errors::{CertificateError, ReconcileError};
use crate::labels::{
    CA_FINGERPRINT_ANNOTATION, K8S_MANAGED_BY, K8S_PART_OF, MANAGED_BY_CONTROLLER,
    PART_OF_KUBEWARDEN,
};
use crate::policy_server_resources::build_cert_secret;
use crate::reconcilers::resources::{create_or_patch, fetch};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use kube::{Api, Client, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Read a PEM certificate and key pair out of a secret.
///
/// Returns `Ok(None)` when the secret carries neither key, and an error when only one
/// of them is present or either is not UTF-8.
///
/// # Errors
///
/// Returns [`CertificateError::MissingKey`] or [`CertificateError::Parse`].
pub fn bundle_from_secret(
    secret: &Secret,
    cert_key: &str,
    key_key: &str,
) -> Result<Option<CertificateBundle>, CertificateError> {
    let missing = |key: &str| CertificateError::MissingKey {
        secret: secret.name_any(),
        key: key.to_string(),
    };
    let Some(data) = secret.data.as_ref() else {
        return Ok(None);
    };

    let (cert, key) = match (data.get(cert_key), data.get(key_key)) {
        (None, None) => return Ok(None),
        (Some(cert), Some(key)) => (cert, key),
        (None, Some(_)) => return Err(missing(cert_key)),
        (Some(_), None) => return Err(missing(key_key)),
    };

    let decode = |bytes: &ByteString| {
        String::from_utf8(bytes.0.clone()).map_err(|e| CertificateError::Parse {
            what: "secret data",
            reason: e.to_string(),
        })
    };

    Ok(Some(CertificateBundle {
        cert_pem: decode(cert)?,
        key_pem: decode(key)?,
    }))
}

/// Rotation state of a stored CA root.
///
/// Unparseable material is treated as expired so that it gets replaced.
#[must_use]
pub fn ca_state(existing: Option<&CertificateBundle>, now_ts: i64) -> CertificateState {
    let info = existing.and_then(|bundle| inspect(&bundle.cert_pem).ok());
    match (existing, info) {
        (Some(_), None) => CertificateState::Expired,
        (_, info) => classify(info.as_ref(), now_ts, CA_ROTATION_LOOKAHEAD_DAYS),
    }
}

/// Why a stored leaf certificate must be reissued, if it must.
///
/// A leaf is reissued when it is absent, expired, inside its rotation window, or was
/// signed by a CA other than `ca_fingerprint`.
#[must_use]
pub fn leaf_reissue_reason(
    existing: Option<&CertificateBundle>,
    recorded_ca_fingerprint: Option<&str>,
    ca_fingerprint: &str,
    now_ts: i64,
) -> Option<&'static str> {
    let info = existing.and_then(|bundle| inspect(&bundle.cert_pem).ok());
    if existing.is_some() && info.is_none() {
        return Some(CertificateState::Expired.as_str());
    }

    let state = classify(info.as_ref(), now_ts, LEAF_ROTATION_LOOKAHEAD_DAYS);
    if state.needs_regeneration() {
        return Some(state.as_str());
    }
    if recorded_ca_fingerprint != Some(ca_fingerprint) {
        return Some("ca-rotated");
    }
    None
}

fn controller_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        (K8S_PART_OF.to_string(), PART_OF_KUBEWARDEN.to_string()),
        (K8S_MANAGED_BY.to_string(), MANAGED_BY_CONTROLLER.to_string()),
    ])
}

/// Builds a TLS secret holding a certificate bundle.
#[must_use]
pub fn build_tls_secret(
    name: &str,
    namespace: &str,
    bundle: &CertificateBundle,
    keys: (&str, &str),
    annotations: Option<BTreeMap<String, String>>,
    owner_references: Option<Vec<OwnerReference>>,
) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            labels: Some(controller_labels()),
            annotations,
            owner_references,
            ..Default::default()
        },
        type_: Some("Opaque".into()),
        data: Some(BTreeMap::from([
            (
                keys.0.to_string(),
                ByteString(bundle.cert_pem.clone().into_bytes()),
            ),
            (
                keys.1.to_string(),
                ByteString(bundle.key_pem.clone().into_bytes()),
            ),
        ])),
        ..Default::default()
    }
}

fn owner_reference_to(secret: &Secret) -> Option<Vec<OwnerReference>> {
    Some(vec![OwnerReference {
        api_version: "v1".into(),
        kind: "Secret".into(),
        name: secret.name_any(),
        uid: secret.metadata.uid.clone()?,
        controller: Some(true),
        block_owner_deletion: Some(true),
    }])
}

/// The current CA root together with the secret holding it.
pub struct CaRoot {
    pub bundle: CertificateBundle,
    pub fingerprint: String,
    pub secret: Secret,
}

/// Ensure the CA root secret exists and is outside its rotation window.
///
/// # Errors
///
/// Returns an error if generation fails or the secret cannot be read or written.
pub async fn reconcile_ca_root(client: &Client, namespace: &str) -> Result<CaRoot, ReconcileError> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);

    let observed = fetch(&api, CA_ROOT_SECRET_NAME).await?;
    let existing = match &observed {
        Some(secret) => bundle_from_secret(secret, CA_ROOT_CERT_KEY, CA_ROOT_KEY_KEY)
            .unwrap_or_else(|e| {
                warn!(error = %e, "Stored CA root is unusable, regenerating");
                None
            }),
        None => None,
    };

    let issued_at = now();
    let state = ca_state(existing.as_ref(), issued_at.unix_timestamp());

    let (bundle, secret) = match (existing, observed) {
        (Some(bundle), Some(secret)) if !state.needs_regeneration() => {
            debug!("CA root is valid");
            (bundle, secret)
        }
        _ => {
            info!(state = state.as_str(), "Generating CA root");
            let bundle = generate_ca(issued_at)?;
            let desired = build_tls_secret(
                CA_ROOT_SECRET_NAME,
                namespace,
                &bundle,
                (CA_ROOT_CERT_KEY, CA_ROOT_KEY_KEY),
                None,
                None,
            );
            create_or_patch(&api, &desired, FIELD_MANAGER).await?;
            crate::metrics::record_certificate_rotation(CA_ROOT_SECRET_NAME, state.as_str());
            let secret = fetch(&api, CA_ROOT_SECRET_NAME).await?.ok_or_else(|| {
                ReconcileError::MissingDependency {
                    kind: "Secret",
                    name: CA_ROOT_SECRET_NAME.to_string(),
                    reason: "CA root disappeared right after it was written".to_string(),
                }
            })?;
            (bundle, secret)
        }
    };

    Ok(CaRoot {
        fingerprint: fingerprint(&bundle.cert_pem)?,
        bundle,
        secret,
    })
}

/// Read the CA root without creating it.
///
/// # Errors
///
/// Returns [`ReconcileError::MissingDependency`] while the certificate reconciler has not
/// yet created the CA, or an error if the stored material is unusable.
pub async fn load_ca_root(client: &Client, namespace: &str) -> Result<CertificateBundle, ReconcileError> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let missing = || ReconcileError::MissingDependency {
        kind: "Secret",
        name: CA_ROOT_SECRET_NAME.to_string(),
        reason: "CA root has not been generated yet".to_string(),
    };

    let secret = fetch(&api, CA_ROOT_SECRET_NAME).await?.ok_or_else(missing)?;
    bundle_from_secret(&secret, CA_ROOT_CERT_KEY, CA_ROOT_KEY_KEY)?.ok_or_else(missing)
}

/// Ensure the controller's webhook server certificate is current.
///
/// # Errors
///
/// Returns an error if issuing or storing the certificate fails.
pub async fn reconcile_webhook_server_cert(
    client: &Client,
    config: &ControllerConfig,
    ca: &CaRoot,
) -> Result<(), ReconcileError> {
    let namespace = config.deployments_namespace.as_str();
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);

    let observed = fetch(&api, WEBHOOK_SERVER_CERT_SECRET_NAME).await?;
    let existing = observed.as_ref().and_then(|secret| {
        bundle_from_secret(secret, WEBHOOK_SERVER_CERT_KEY, WEBHOOK_SERVER_KEY_KEY)
            .ok()
            .flatten()
    });
    let recorded = observed
        .as_ref()
        .and_then(|secret| secret.annotations().get(CA_FINGERPRINT_ANNOTATION).cloned());

    let issued_at = now();
    let Some(reason) = leaf_reissue_reason(
        existing.as_ref(),
        recorded.as_deref(),
        &ca.fingerprint,
        issued_at.unix_timestamp(),
    ) else {
        debug!("Webhook server certificate is valid");
        return Ok(());
    };

    info!(reason = reason, "Issuing webhook server certificate");
    let dns_names = service_dns_names(&config.webhook_service_name, namespace);
    let bundle = generate_leaf(&ca.bundle, &dns_names, issued_at)?;
    let desired = build_tls_secret(
        WEBHOOK_SERVER_CERT_SECRET_NAME,
        namespace,
        &bundle,
        (WEBHOOK_SERVER_CERT_KEY, WEBHOOK_SERVER_KEY_KEY),
        Some(BTreeMap::from([(
            CA_FINGERPRINT_ANNOTATION.to_string(),
            ca.fingerprint.clone(),
        )])),
        owner_reference_to(&ca.secret),
    );
    create_or_patch(&api, &desired, FIELD_MANAGER).await?;
    crate::metrics::record_certificate_rotation(WEBHOOK_SERVER_CERT_SECRET_NAME, reason);

    Ok(())
}

/// Ensure the certificate secret of a policy server is current.
///
/// Returns `true` when a new certificate was issued.
///
/// # Errors
///
/// Returns an error if issuing or storing the certificate fails.
pub async fn ensure_policy_server_cert(
    client: &Client,
    policy_server: &PolicyServer,
    namespace: &str,
    ca: &CaRoot,
) -> Result<bool, ReconcileError> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let name = policy_server.name_with_prefix();

    let observed = fetch(&api, &name).await?;
    let existing = observed.as_ref().and_then(|secret| {
        bundle_from_secret(secret, POLICY_SERVER_CERT_KEY, POLICY_SERVER_KEY_KEY)
            .ok()
            .flatten()
    });
    let recorded = observed
        .as_ref()
        .and_then(|secret| secret.annotations().get(CA_FINGERPRINT_ANNOTATION).cloned());

    let issued_at = now();
    let Some(reason) = leaf_reissue_reason(
        existing.as_ref(),
        recorded.as_deref(),
        &ca.fingerprint,
        issued_at.unix_timestamp(),
    ) else {
        return Ok(false);
    };

    info!(
        policy_server = %policy_server.name_any(),
        reason = reason,
        "Issuing policy server certificate"
    );
    let bundle = generate_leaf(&ca.bundle, &service_dns_names(&name, namespace), issued_at)?;
    let desired = build_cert_secret(policy_server, namespace, &bundle, &ca.fingerprint);
    create_or_patch(&api, &desired, FIELD_MANAGER).await?;
    crate::metrics::record_certificate_rotation(&name, reason);

    Ok(true)
}

/// Verify the client CA `ConfigMap` required for mutual TLS.
///
/// No-op when mutual TLS is disabled.
///
/// # Errors
///
/// Returns [`CertificateError::ClientCaMissing`] when the `ConfigMap` or its
/// `client-ca.crt` key is absent.
pub async fn check_client_ca(client: &Client, config: &ControllerConfig) -> Result<(), ReconcileError> {
    let Some(name) = &config.client_ca_configmap_name else {
        return Ok(());
    };
    let namespace = config.deployments_namespace.as_str();
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);

    let has_key = fetch(&api, name)
        .await?
        .and_then(|cm| cm.data)
        .is_some_and(|data| data.get(CLIENT_CA_KEY).is_some_and(|pem| !pem.trim().is_empty()));

    if has_key {
        Ok(())
    } else {
        Err(CertificateError::ClientCaMissing {
            name: name.clone(),
            namespace: namespace.to_string(),
        }
        .into())
    }
}

/// One certificate pass: CA root, webhook server certificate, client CA check.
///
/// # Errors
///
/// Returns the first failure; later steps are skipped.
pub async fn reconcile_certificates(context: &Context) -> Result<(), ReconcileError> {
    let ca = reconcile_ca_root(&context.client, context.deployments_namespace()).await?;
    reconcile_webhook_server_cert(&context.client, &context.config, &ca).await?;
    check_client_ca(&context.client, &context.config).await
}

/// Run the certificate reconciler until the process exits.
///
/// Failures are logged and retried on the next tick; they never stop the loop.
///
/// # Errors
///
/// Never returns under normal operation.
pub async fn run_certificate_reconciler(context: Arc<Context>) -> anyhow::Result<()> {
    info!(
        interval_secs = CERT_RESYNC_INTERVAL_SECS,
        "Starting certificate reconciler"
    );
    let mut interval = tokio::time::interval(Duration::from_secs(CERT_RESYNC_INTERVAL_SECS));

    loop {
        interval.tick().await;
        let start = std::time::Instant::now();
        match reconcile_certificates(&context).await {
            Ok(()) => {
                crate::metrics::record_reconciliation_success("Certificate", start.elapsed());
            }
            Err(e) => {
                error!(error = %e, reason = e.status_reason(), "Certificate reconciliation failed");
                crate::metrics::record_reconciliation_error("Certificate", start.elapsed());
                crate::metrics::record_error("Certificate", e.status_reason());
            }
        }
    }
}

#[cfg(test)]
#[path = "certificate_tests.rs"]
mod certificate_tests;
