// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cluster capability probes evaluated once at startup.
//!
//! The result is stored in [`crate::context::Context`] and never refreshed, so a
//! cluster upgrade requires a controller restart to take effect.

use crate::constants::MATCH_CONDITIONS_MIN_MINOR_VERSION;
use k8s_openapi::apimachinery::pkg::version::Info;
use kube::Client;
use tracing::{info, warn};

/// Capabilities of the connected API server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureGates {
    /// Admission webhooks accept `matchConditions`
    pub match_conditions: bool,
}

impl FeatureGates {
    /// Probe the API server version.
    ///
    /// Probe failures are logged and every gate defaults to disabled.
    pub async fn probe(client: &Client) -> Self {
        match client.apiserver_version().await {
            Ok(info) => {
                let gates = Self::from_version(&info);
                info!(
                    major = %info.major,
                    minor = %info.minor,
                    match_conditions = gates.match_conditions,
                    "Detected Kubernetes API server capabilities"
                );
                gates
            }
            Err(e) => {
                warn!(error = %e, "Failed to query API server version, disabling feature gates");
                Self::default()
            }
        }
    }

    #[must_use]
    pub fn from_version(info: &Info) -> Self {
        Self {
            match_conditions: supports_match_conditions(&info.major, &info.minor),
        }
    }
}

/// Parse a version component such as `28` or `28+` (managed distributions).
fn parse_version_component(component: &str) -> Option<u32> {
    let digits: String = component
        .trim()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Whether a Kubernetes version enables admission webhook match conditions (1.28+).
#[must_use]
pub fn supports_match_conditions(major: &str, minor: &str) -> bool {
    match (parse_version_component(major), parse_version_component(minor)) {
        (Some(major), Some(_)) if major > 1 => true,
        (Some(1), Some(minor)) => minor >= MATCH_CONDITIONS_MIN_MINOR_VERSION,
        _ => false,
    }
}
