// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # Kubewarden Controller
//!
//! A Kubernetes controller that turns Kubewarden admission policies into running
//! policy servers and admission webhook registrations.
//!
//! ## Overview
//!
//! The controller watches five custom resources in the `policies.kubewarden.io/v1` group:
//!
//! - `PolicyServer` - a pool of policy-server pods evaluating WebAssembly policies
//! - `AdmissionPolicy` / `ClusterAdmissionPolicy` - a single policy module
//! - `AdmissionPolicyGroup` / `ClusterAdmissionPolicyGroup` - several modules combined
//!   with a boolean expression
//!
//! For every `PolicyServer` it maintains a Deployment, Service, policies `ConfigMap`,
//! serving certificate and optional `PodDisruptionBudget`. For every policy it
//! registers a validating or mutating webhook entry pointing at the policy server,
//! once that server is ready.
//!
//! ## Modules
//!
//! - [`crd`] - Custom Resource Definition types
//! - [`policy`] - kind-independent view of the four policy kinds
//! - [`policy_server_resources`] - desired Deployment, Service and `ConfigMap` builders
//! - [`reconcilers`] - reconciliation logic for each resource type
//! - [`policy_controller`] - controller wiring shared by the policy kinds
//! - [`certs`] - CA and serving certificate generation
//! - [`context`] - shared controller context
//! - [`config`] - command line and environment configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! use kubewarden_controller::crd::{ClusterAdmissionPolicy, ClusterAdmissionPolicySpec};
//! use kubewarden_controller::policy::Policy;
//!
//! let policy = ClusterAdmissionPolicy::new(
//!     "privileged-pods",
//!     ClusterAdmissionPolicySpec {
//!         module: "registry://ghcr.io/kubewarden/policies/pod-privileged:v0.2.5".to_string(),
//!         ..Default::default()
//!     },
//! );
//!
//! assert_eq!(policy.unique_name(), "clusterwide-privileged-pods");
//! ```

pub mod certs;
pub mod config;
pub mod constants;
pub mod context;
pub mod crd;
pub mod errors;
pub mod feature_gates;
pub mod health;
pub mod labels;
pub mod metrics;
pub mod policy;
pub mod policy_controller;
pub mod policy_server_resources;
pub mod reconcilers;
pub mod status_reasons;

#[cfg(test)]
mod config_tests;
#[cfg(test)]
mod crd_tests;
#[cfg(test)]
mod status_reasons_tests;
