// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `status_reasons` module

#[cfg(test)]
mod tests {
    use crate::status_reasons::*;

    #[test]
    fn test_condition_status_strings() {
        assert_eq!(condition_status(true), CONDITION_TRUE);
        assert_eq!(condition_status(false), CONDITION_FALSE);
        assert_eq!(CONDITION_UNKNOWN, "Unknown");
    }

    #[test]
    fn test_policy_server_condition_types() {
        assert_eq!(CONDITION_CA_ROOT_SECRET_RECONCILED, "CARootSecretReconciled");
        assert_eq!(CONDITION_CERT_SECRET_RECONCILED, "CertSecretReconciled");
        assert_eq!(CONDITION_CONFIG_MAP_RECONCILED, "ConfigMapReconciled");
        assert_eq!(CONDITION_DEPLOYMENT_RECONCILED, "DeploymentReconciled");
        assert_eq!(CONDITION_SERVICE_RECONCILED, "ServiceReconciled");
        assert_eq!(CONDITION_PDB_RECONCILED, "PodDisruptionBudgetReconciled");
    }

    #[test]
    fn test_reasons_are_camel_case() {
        for reason in [
            REASON_RECONCILIATION_SUCCEEDED,
            REASON_RECONCILE_FAILED,
            REASON_INVALID_SPEC,
            REASON_MISSING_DEPENDENCY,
            REASON_CERTIFICATE_GENERATION_FAILED,
            REASON_INVALID_CERTIFICATE,
            REASON_CLIENT_CA_MISSING,
            REASON_POLICY_ACTIVE,
            REASON_POLICY_SERVER_NOT_FOUND,
            REASON_POLICY_SERVER_TERMINATING,
            REASON_POLICY_SERVER_NOT_READY,
            REASON_WEBHOOK_REGISTRATION_FAILED,
            REASON_INVALID_POLICY_GROUP,
        ] {
            assert!(reason.chars().next().is_some_and(char::is_uppercase), "{reason}");
            assert!(reason.chars().all(char::is_alphanumeric), "{reason}");
        }
    }
}
