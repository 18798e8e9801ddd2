//! soomkill-agent - cooperative swap-based OOM eviction
//!
//! Runs as a DaemonSet on nodes with kernel swap enabled under the
//! `LimitedSwap` policy. Any container with resident swap has exceeded its
//! memory limit and would have been OOM-killed without swap; this agent
//! detects the condition from cgroup accounting and requests a graceful
//! delete through the orchestrator instead.

use agent_lib::health::{components, HealthRegistry};
use agent_lib::{
    AgentMetrics, CgroupScanner, ContainerSwapCollector, PodCache, PodKiller, PodLookup,
    Reconciler, ReconcilerConfig, SwapIoCollector,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use kube::Client;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = config::AgentConfig::parse();
    config.validate()?;

    info!(node = %config.node_name, version = AGENT_VERSION, "Starting soomkill-agent");
    info!(
        poll_interval_secs = config.poll_interval_secs,
        swap_threshold_percent = config.swap_threshold_percent,
        dry_run = config.dry_run,
        protected_namespaces = ?config.protected_namespaces,
        "Configuration loaded"
    );

    // Validate environment (cgroup v2, systemd driver, swap accounting)
    // before anything else touches the node.
    let scanner = CgroupScanner::new(&config.cgroup_root);
    scanner
        .validate_environment()
        .context("environment validation failed")?;
    info!(
        cgroup_version = "v2",
        cgroup_driver = "systemd",
        swap_enabled = true,
        "Environment validated"
    );

    let metrics = AgentMetrics::new();
    metrics.set_config(config.swap_threshold_percent, config.dry_run);

    let health_registry = HealthRegistry::new();
    health_registry.register(components::SCANNER).await;
    health_registry.register(components::POD_CACHE).await;
    health_registry.register(components::RECONCILER).await;

    // One shutdown signal fans out to the reconciler, the watch, and the
    // sync wait. Receivers are subscribed before the signal task starts so
    // none can miss an early signal. In-flight delete RPCs are left to
    // complete.
    let (shutdown_tx, _) = broadcast::channel(1);
    let cache_shutdown_rx = shutdown_tx.subscribe();
    let sync_shutdown_rx = shutdown_tx.subscribe();
    let reconciler_shutdown_rx = shutdown_tx.subscribe();
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            }
            let _ = shutdown_tx.send(());
        });
    }

    let client = create_client(&config).await?;

    let cache = Arc::new(
        PodCache::new(client.clone(), &config.node_name).with_health(health_registry.clone()),
    );
    {
        let cache = cache.clone();
        tokio::spawn(async move { cache.run(cache_shutdown_rx).await });
    }

    // Scrape-time collectors recompute node and per-container swap state
    // from the scanner and cache on every /metrics pull.
    let registry = prometheus::default_registry();
    registry
        .register(Box::new(SwapIoCollector::new(scanner.clone())))
        .context("failed to register swap I/O collector")?;
    registry
        .register(Box::new(ContainerSwapCollector::new(
            scanner.clone(),
            cache.clone() as Arc<dyn PodLookup>,
        )))
        .context("failed to register container swap collector")?;

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics.clone()));
    {
        let addr = config.metrics_addr.clone();
        tokio::spawn(async move {
            if let Err(e) = api::serve(addr, app_state).await {
                error!(error = %e, "Metrics server failed");
            }
        });
    }

    // The reconciler must not tick against an empty cache: it would skip
    // every candidate and report nothing wrong.
    info!("Waiting for pod cache to sync");
    if !cache.wait_for_initial_sync(sync_shutdown_rx).await {
        bail!("shut down before pod cache sync completed");
    }
    health_registry.set_ready(true).await;

    let killer = Arc::new(PodKiller::new(
        client,
        cache.clone() as Arc<dyn PodLookup>,
        &config.node_name,
        config.dry_run,
    ));

    let reconciler = Reconciler::new(
        ReconcilerConfig {
            poll_interval: config.poll_interval(),
            swap_threshold_percent: config.swap_threshold_percent,
            protected_namespaces: config.protected_namespace_set(),
            dry_run: config.dry_run,
        },
        scanner,
        cache as Arc<dyn PodLookup>,
        killer,
        metrics,
    )
    .with_health(health_registry.clone());

    reconciler.log_startup_scan()?;
    reconciler.run(reconciler_shutdown_rx).await;

    info!("Agent stopped");
    Ok(())
}

async fn create_client(config: &config::AgentConfig) -> Result<Client> {
    match &config.kubeconfig {
        Some(path) => {
            let kubeconfig = kube::config::Kubeconfig::read_from(path)
                .with_context(|| format!("failed to read kubeconfig at {}", path.display()))?;
            let client_config = kube::Config::from_custom_kubeconfig(
                kubeconfig,
                &kube::config::KubeConfigOptions::default(),
            )
            .await
            .context("failed to build client config from kubeconfig")?;
            Client::try_from(client_config).context("failed to create Kubernetes client")
        }
        None => Client::try_default()
            .await
            .context("failed to create in-cluster Kubernetes client"),
    }
}
