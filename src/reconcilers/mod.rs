// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconciliation logic for Kubewarden resources.
//!
//! # Reconciliation Architecture
//!
//! Every reconciler is level-triggered:
//!
//! 1. **Observe** - read the resource and the objects it depends on
//! 2. **Derive** - compute the full desired state from the spec
//! 3. **Apply** - write only what drifted, with server-side apply
//! 4. **Status** - re-derive status from what was observed and write it if it changed
//!
//! # Available Reconcilers
//!
//! - [`reconcile_policy_server`] - Deployment, Service, `ConfigMap`, certificates and
//!   `PodDisruptionBudget` of a `PolicyServer`
//! - [`reconcile_policy`] - webhook entry and status of any policy kind
//! - [`cleanup_policy`] - webhook entry removal for deleted policies
//! - [`certificate::run_certificate_reconciler`] - periodic CA and webhook certificate rotation
//!
//! # Shared building blocks
//!
//! - [`resources`] - create-or-patch and delete helpers
//! - [`drift`] - desired vs. observed comparison
//! - [`finalizers`] - finalizer phase machine
//! - [`status`] - condition bookkeeping and status writers
//! - [`retry`] - backoff for transient API errors and for failing reconciles

pub mod certificate;
pub mod drift;
pub mod finalizers;
pub mod pagination;
pub mod pdb;
pub mod policy;
pub mod policyserver;
pub mod resources;
pub mod retry;
pub mod status;

pub use policy::{cleanup_policy, reconcile_policy};
pub use policyserver::reconcile_policy_server;
