// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::Result;
use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::{
    runtime::{controller::Action, reflector::ObjectRef, watcher::Config, Controller},
    Api, Client, ResourceExt,
};
use kube_lease_manager::LeaseManagerBuilder;
use kubewarden_controller::{
    config::{Cli, ControllerConfig},
    constants::{KIND_POLICY_SERVER, LEADER_ELECTION_LEASE_NAME, TOKIO_WORKER_THREADS},
    context::Context,
    crd::{
        AdmissionPolicy, AdmissionPolicyGroup, ClusterAdmissionPolicy,
        ClusterAdmissionPolicyGroup, PolicyServer,
    },
    errors::ReconcileError,
    feature_gates::FeatureGates,
    health::{health_router, metrics_router, serve, HealthState},
    labels::POLICY_SERVER_LABEL,
    policy::Policy,
    policy_controller::run_policy_controller,
    metrics::{
        record_error, record_reconciliation_error, record_reconciliation_requeue,
        record_reconciliation_success,
    },
    reconcilers::{
        certificate::run_certificate_reconciler, reconcile_policy_server, retry::backoff_key,
    },
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

fn main() -> Result<()> {
    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("kubewarden-controller")
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

/// Initialize tracing.
///
/// Respects `RUST_LOG` (defaults to `info`) and `RUST_LOG_FORMAT` (`json` or text).
fn init_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }
}

async fn async_main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    info!("Starting Kubewarden controller");
    let config = ControllerConfig::from(&cli);
    debug!(?config, "Controller configuration loaded");

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;
    debug!("Kubernetes client initialized successfully");

    let features = FeatureGates::probe(&client).await;
    info!(
        match_conditions = features.match_conditions,
        "Probed API server capabilities"
    );

    let context = Arc::new(Context::new(client.clone(), config, features));
    let health = Arc::new(HealthState::new());

    tokio::spawn(log_server_exit(
        "health",
        serve("health", cli.health_probe_bind_address, health_router(health.clone())),
    ));
    tokio::spawn(log_server_exit(
        "metrics",
        serve("metrics", cli.metrics_bind_address, metrics_router()),
    ));

    if !cli.leader_elect {
        info!("Leader election disabled, starting all controllers");
        health.set_ready(true);
        return run_all_controllers(context).await;
    }

    let identity = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "kubewarden-controller".to_string());

    info!(
        lease = LEADER_ELECTION_LEASE_NAME,
        namespace = %context.deployments_namespace(),
        identity = %identity,
        "Leader election enabled, waiting for leadership"
    );

    let manager = LeaseManagerBuilder::new(client, LEADER_ELECTION_LEASE_NAME)
        .with_namespace(context.deployments_namespace())
        .with_identity(&identity)
        .with_duration(cli.lease_duration_secs)
        .with_grace(cli.lease_grace_secs)
        .build()
        .await?;
    let (mut leadership, lease_task) = manager.watch().await;

    while !*leadership.borrow_and_update() {
        leadership.changed().await?;
    }

    info!(identity = %identity, "Acquired leadership, starting all controllers");
    kubewarden_controller::metrics::record_leader_elected(&identity);
    health.set_ready(true);

    let result = tokio::select! {
        result = run_all_controllers(context) => result,
        () = wait_for_leadership_loss(&mut leadership) => {
            error!(identity = %identity, "Lost leadership, exiting so another replica can take over");
            kubewarden_controller::metrics::record_leader_lost(&identity);
            Err(anyhow::anyhow!("leadership lost"))
        }
    };

    info!("Stopping all controllers and releasing leader election lease...");
    health.set_ready(false);
    drop(leadership);
    match lease_task.await {
        Ok(Ok(_)) => debug!("Leader election lease released"),
        Ok(Err(e)) => warn!(error = %e, "Failed to release leader election lease"),
        Err(e) => warn!(error = %e, "Leader election task panicked"),
    }

    result
}

async fn wait_for_leadership_loss(leadership: &mut watch::Receiver<bool>) {
    loop {
        if leadership.changed().await.is_err() || !*leadership.borrow_and_update() {
            return;
        }
    }
}

async fn log_server_exit(name: &'static str, server: impl std::future::Future<Output = Result<()>>) {
    if let Err(e) = server.await {
        error!(server = name, error = %e, "HTTP server exited");
    }
}

async fn run_all_controllers(context: Arc<Context>) -> Result<()> {
    // Controllers should never exit - if one fails, we log it and exit the main process
    tokio::select! {
        result = run_policy_server_controller(context.clone()) => {
            error!("CRITICAL: PolicyServer controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("PolicyServer controller exited unexpectedly without error")
        }
        result = run_policy_controller::<AdmissionPolicy>(context.clone()) => {
            error!("CRITICAL: AdmissionPolicy controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("AdmissionPolicy controller exited unexpectedly without error")
        }
        result = run_policy_controller::<ClusterAdmissionPolicy>(context.clone()) => {
            error!("CRITICAL: ClusterAdmissionPolicy controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("ClusterAdmissionPolicy controller exited unexpectedly without error")
        }
        result = run_policy_controller::<AdmissionPolicyGroup>(context.clone()) => {
            error!("CRITICAL: AdmissionPolicyGroup controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("AdmissionPolicyGroup controller exited unexpectedly without error")
        }
        result = run_policy_controller::<ClusterAdmissionPolicyGroup>(context.clone()) => {
            error!("CRITICAL: ClusterAdmissionPolicyGroup controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("ClusterAdmissionPolicyGroup controller exited unexpectedly without error")
        }
        result = run_certificate_reconciler(context.clone()) => {
            error!("CRITICAL: certificate reconciler exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("certificate reconciler exited unexpectedly without error")
        }
    }
}

/// Map an owned object carrying the policy server label to its `PolicyServer`.
fn owning_policy_server<K: ResourceExt>(object: &K) -> Option<ObjectRef<PolicyServer>> {
    object
        .labels()
        .get(POLICY_SERVER_LABEL)
        .map(|name| ObjectRef::new(name))
}

/// Map a policy to the `PolicyServer` it is bound to.
fn bound_policy_server<P: Policy>(policy: &P) -> Option<ObjectRef<PolicyServer>> {
    Some(ObjectRef::new(policy.policy_server()))
}

/// Run the `PolicyServer` controller
async fn run_policy_server_controller(context: Arc<Context>) -> Result<()> {
    info!("Starting PolicyServer controller");

    let client = context.client.clone();
    let namespace = context.deployments_namespace().to_string();
    let api = Api::<PolicyServer>::all(client.clone());
    let owned = || Config::default().labels(POLICY_SERVER_LABEL);

    Controller::new(api, Config::default().any_semantic())
        .watches(
            Api::<AdmissionPolicy>::all(client.clone()),
            Config::default(),
            |policy| bound_policy_server(&policy),
        )
        .watches(
            Api::<ClusterAdmissionPolicy>::all(client.clone()),
            Config::default(),
            |policy| bound_policy_server(&policy),
        )
        .watches(
            Api::<AdmissionPolicyGroup>::all(client.clone()),
            Config::default(),
            |policy| bound_policy_server(&policy),
        )
        .watches(
            Api::<ClusterAdmissionPolicyGroup>::all(client.clone()),
            Config::default(),
            |policy| bound_policy_server(&policy),
        )
        .watches(
            Api::<Deployment>::namespaced(client.clone(), &namespace),
            owned(),
            |deployment| owning_policy_server(&deployment),
        )
        .watches(
            Api::<Service>::namespaced(client.clone(), &namespace),
            owned(),
            |service| owning_policy_server(&service),
        )
        .watches(
            Api::<PodDisruptionBudget>::namespaced(client.clone(), &namespace),
            owned(),
            |pdb| owning_policy_server(&pdb),
        )
        .watches(
            Api::<ConfigMap>::namespaced(client, &namespace),
            owned(),
            |configmap| owning_policy_server(&configmap),
        )
        .shutdown_on_signal()
        .run(reconcile_policy_server_wrapper, error_policy, context)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Reconcile wrapper for `PolicyServer`
async fn reconcile_policy_server_wrapper(
    policy_server: Arc<PolicyServer>,
    context: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let start = std::time::Instant::now();
    debug!(
        policy_server = %policy_server.name_any(),
        "Reconcile wrapper called for PolicyServer"
    );

    let result = reconcile_policy_server(&context, &policy_server).await;
    let duration = start.elapsed();

    match result {
        Ok(action) => {
            info!(
                "Successfully reconciled PolicyServer: {}",
                policy_server.name_any()
            );
            record_reconciliation_success(KIND_POLICY_SERVER, duration);
            context
                .requeue_backoff
                .reset(&backoff_key(KIND_POLICY_SERVER, None, &policy_server.name_any()));
            Ok(action)
        }
        Err(e) => {
            error!("Failed to reconcile PolicyServer: {}", e);
            record_reconciliation_error(KIND_POLICY_SERVER, duration);
            record_error(KIND_POLICY_SERVER, e.status_reason());
            Err(e)
        }
    }
}

/// Error policy for the `PolicyServer` controller
#[allow(clippy::needless_pass_by_value)] // Signature required by kube::runtime::Controller
fn error_policy(resource: Arc<PolicyServer>, err: &ReconcileError, ctx: Arc<Context>) -> Action {
    let key = backoff_key(KIND_POLICY_SERVER, None, &resource.name_any());
    let delay = ctx.requeue_backoff.after_error(&key, err);
    warn!(policy_server = %resource.name_any(), retry_after = ?delay, "Requeueing PolicyServer after error");
    let reason = if err.is_transient() { "transient_error" } else { "error" };
    record_reconciliation_requeue(KIND_POLICY_SERVER, reason);
    Action::requeue(delay)
}
