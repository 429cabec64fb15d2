// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common label and annotation constants used across all reconcilers.
//!
//! This module defines standard Kubernetes labels and Kubewarden-specific labels/annotations
//! to ensure consistency across all resources created by the controller.

// ============================================================================
// Kubernetes Standard Labels
// https://kubernetes.io/docs/concepts/overview/working-with-objects/common-labels/
// ============================================================================

/// Standard label for the component name within the architecture (e.g., "policy-server")
pub const K8S_COMPONENT: &str = "app.kubernetes.io/component";

/// Standard label for the tool being used to manage the operation of an application
pub const K8S_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Standard label for a unique name identifying the instance of an application
pub const K8S_INSTANCE: &str = "app.kubernetes.io/instance";

/// Standard label for the name of a higher-level application this one is part of
pub const K8S_PART_OF: &str = "app.kubernetes.io/part-of";

/// Well-known label carrying a namespace's own name
pub const K8S_NAMESPACE_NAME: &str = "kubernetes.io/metadata.name";

// ============================================================================
// Kubernetes Standard Label Values
// ============================================================================

/// Value for `app.kubernetes.io/part-of`
pub const PART_OF_KUBEWARDEN: &str = "kubewarden";

/// Component value for policy server workloads
pub const COMPONENT_POLICY_SERVER: &str = "policy-server";

/// Value for `app.kubernetes.io/managed-by`
pub const MANAGED_BY_CONTROLLER: &str = "kubewarden-controller";

// ============================================================================
// Kubewarden-Specific Labels
// ============================================================================

/// Label selecting the pods of one policy server deployment
pub const APP_LABEL: &str = "app";

/// Label carrying the name of the owning `PolicyServer`
pub const POLICY_SERVER_LABEL: &str = "kubewarden/policy-server";

// ============================================================================
// Kubewarden-Specific Annotations
// ============================================================================

/// Pod template annotation holding the hash of the rendered policy server configuration
pub const CONFIG_VERSION_ANNOTATION: &str = "kubewarden/config-version";

/// Annotation on leaf certificate secrets recording the fingerprint of the signing CA
pub const CA_FINGERPRINT_ANNOTATION: &str = "kubewarden.io/ca-fingerprint";

/// Pod template annotation requesting OpenTelemetry collector sidecar injection
pub const OTEL_SIDECAR_INJECT_ANNOTATION: &str = "sidecar.opentelemetry.io/inject";

/// Policy severity annotation
pub const POLICY_SEVERITY_ANNOTATION: &str = "io.kubewarden.policy.severity";

/// Policy category annotation
pub const POLICY_CATEGORY_ANNOTATION: &str = "io.kubewarden.policy.category";

/// Policy title annotation
pub const POLICY_TITLE_ANNOTATION: &str = "io.kubewarden.policy.title";

/// Policy description annotation
pub const POLICY_DESCRIPTION_ANNOTATION: &str = "io.kubewarden.policy.description";

// ============================================================================
// Finalizers
// ============================================================================

/// Finalizer shared by `PolicyServer` and every policy kind
pub const KUBEWARDEN_FINALIZER: &str = "kubewarden.io/finalizer";
