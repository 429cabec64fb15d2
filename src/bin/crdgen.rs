// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! CRD YAML Generator
//!
//! Generates Kubernetes CRD YAML files from Rust types defined in src/crd.rs.
//! This ensures the YAML files in deploy/crds/ are always in sync with the Rust code.
//!
//! Usage:
//!   cargo run --bin crdgen
//!
//! Generated files will be written to deploy/crds/ with proper headers.

use kube::CustomResourceExt;
use kubewarden_controller::crd::{
    AdmissionPolicy, AdmissionPolicyGroup, ClusterAdmissionPolicy, ClusterAdmissionPolicyGroup,
    PolicyServer,
};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;

const COPYRIGHT_HEADER: &str = "# Copyright (c) 2025 Erick Bourgeois, firestoned
# SPDX-License-Identifier: MIT
#
# This file is AUTO-GENERATED from src/crd.rs
# DO NOT EDIT MANUALLY - Run `cargo run --bin crdgen` to regenerate
#
";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let output_dir = Path::new("deploy/crds");

    // Ensure output directory exists
    fs::create_dir_all(output_dir)?;

    println!("Generating CRD YAML files from src/crd.rs...");

    generate_crd::<PolicyServer>("policyservers.crd.yaml", output_dir, &policy_server_columns())?;
    generate_crd::<AdmissionPolicy>("admissionpolicies.crd.yaml", output_dir, &policy_columns(true))?;
    generate_crd::<ClusterAdmissionPolicy>(
        "clusteradmissionpolicies.crd.yaml",
        output_dir,
        &policy_columns(true),
    )?;
    generate_crd::<AdmissionPolicyGroup>(
        "admissionpolicygroups.crd.yaml",
        output_dir,
        &policy_columns(false),
    )?;
    generate_crd::<ClusterAdmissionPolicyGroup>(
        "clusteradmissionpolicygroups.crd.yaml",
        output_dir,
        &policy_columns(false),
    )?;

    println!("✓ Successfully generated CRD YAML files in deploy/crds/");
    println!("\nNext steps:");
    println!("  1. Review the generated files");
    println!("  2. Deploy with: kubectl apply -f deploy/crds/");

    Ok(())
}

fn policy_server_columns() -> Vec<Value> {
    vec![
        json!({ "name": "Replicas", "type": "integer", "jsonPath": ".spec.replicas" }),
        json!({ "name": "Image", "type": "string", "jsonPath": ".spec.image" }),
    ]
}

/// Printer columns shared by the policy kinds. Groups cannot mutate.
fn policy_columns(single_module: bool) -> Vec<Value> {
    let mut columns = vec![json!({
        "name": "Policy Server",
        "type": "string",
        "jsonPath": ".spec.policyServer"
    })];
    if single_module {
        columns.push(json!({ "name": "Mutating", "type": "boolean", "jsonPath": ".spec.mutating" }));
    }
    columns.extend([
        json!({ "name": "BackgroundAudit", "type": "boolean", "jsonPath": ".spec.backgroundAudit" }),
        json!({ "name": "Mode", "type": "string", "jsonPath": ".spec.mode" }),
        json!({ "name": "Observed mode", "type": "string", "jsonPath": ".status.mode" }),
        json!({ "name": "Status", "type": "string", "jsonPath": ".status.policyStatus" }),
        json!({
            "name": "Severity",
            "type": "string",
            "priority": 1,
            "jsonPath": ".metadata.annotations.io\\.kubewarden\\.policy\\.severity"
        }),
        json!({
            "name": "Category",
            "type": "string",
            "priority": 1,
            "jsonPath": ".metadata.annotations.io\\.kubewarden\\.policy\\.category"
        }),
    ]);
    columns
}

fn generate_crd<T>(
    filename: &str,
    output_dir: &Path,
    columns: &[Value],
) -> Result<(), Box<dyn std::error::Error>>
where
    T: CustomResourceExt,
{
    let crd = T::crd();

    // Convert CRD to JSON for manipulation
    let mut crd_json: Value = serde_json::to_value(&crd)?;

    if let Some(versions) = crd_json["spec"]["versions"].as_array_mut() {
        for version in versions {
            version["additionalPrinterColumns"] = Value::Array(columns.to_vec());
        }
    }

    // Convert back to YAML
    let yaml = serde_yaml::to_string(&crd_json)?;

    // Add copyright header
    let content = format!("{COPYRIGHT_HEADER}{yaml}");

    let output_path = output_dir.join(filename);
    fs::write(&output_path, content)?;

    println!("  ✓ Generated {filename}");

    Ok(())
}
