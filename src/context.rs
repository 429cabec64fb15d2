// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context for all controllers.
//!
//! Every controller receives an `Arc<Context>` built once at startup. It holds:
//! - Kubernetes client
//! - Immutable controller configuration
//! - Feature gates detected on the API server
//! - Per-object requeue backoff
//!
//! Apart from the backoff counters, nothing in the context changes after startup.

use crate::config::ControllerConfig;
use crate::feature_gates::FeatureGates;
use crate::reconcilers::retry::RequeueBackoff;
use kube::Client;
use std::sync::Arc;

/// Shared context passed to all controllers.
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client for API operations
    pub client: Client,

    /// Controller configuration derived from command line flags
    pub config: ControllerConfig,

    /// API server capabilities detected at startup
    pub features: FeatureGates,

    /// Consecutive transient failures per object
    pub requeue_backoff: Arc<RequeueBackoff>,
}

impl Context {
    #[must_use]
    pub fn new(client: Client, config: ControllerConfig, features: FeatureGates) -> Self {
        Self {
            client,
            config,
            features,
            requeue_backoff: Arc::new(RequeueBackoff::new()),
        }
    }

    /// Namespace where policy servers and certificate secrets live.
    #[must_use]
    pub fn deployments_namespace(&self) -> &str {
        &self.config.deployments_namespace
    }
}
