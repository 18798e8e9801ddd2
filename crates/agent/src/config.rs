//! Agent configuration

use anyhow::{bail, Result};
use clap::Parser;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Per-node agent that converts kernel OOM kills into graceful pod
/// eviction on swap-enabled nodes.
#[derive(Parser, Debug, Clone)]
#[command(name = "soomkill-agent")]
#[command(author, version, about, long_about = None)]
#[command(allow_negative_numbers = true)]
pub struct AgentConfig {
    /// Name of the node to monitor
    #[arg(long, env = "NODE_NAME")]
    pub node_name: String,

    /// Reconciler tick period in seconds (minimum 1)
    #[arg(long, default_value_t = 1)]
    pub poll_interval_secs: u64,

    /// Delete pods whose max container swap usage exceeds this percentage
    /// of the memory limit
    #[arg(long, default_value_t = 1.0)]
    pub swap_threshold_percent: f64,

    /// Path to the cgroup v2 root
    #[arg(long, default_value = "/sys/fs/cgroup")]
    pub cgroup_root: PathBuf,

    /// Log and emit events without issuing delete calls
    #[arg(long, env = "DRY_RUN", default_value_t = true, action = clap::ArgAction::Set)]
    pub dry_run: bool,

    /// Address to serve /metrics and /healthz on
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub metrics_addr: String,

    /// Comma-separated list of namespaces whose pods are never deleted
    #[arg(long, default_value = "kube-system", value_delimiter = ',')]
    pub protected_namespaces: Vec<String>,

    /// Path to kubeconfig file (uses in-cluster config if not set)
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.node_name.is_empty() {
            bail!("--node-name or NODE_NAME environment variable is required");
        }
        if self.poll_interval_secs < 1 {
            bail!(
                "--poll-interval-secs must be at least 1, got {}",
                self.poll_interval_secs
            );
        }
        if self.swap_threshold_percent < 0.0 {
            bail!(
                "--swap-threshold-percent must be >= 0, got {}",
                self.swap_threshold_percent
            );
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Protected namespaces as a set, with surrounding whitespace and empty
    /// entries dropped.
    pub fn protected_namespace_set(&self) -> HashSet<String> {
        self.protected_namespaces
            .iter()
            .map(|ns| ns.trim().to_string())
            .filter(|ns| !ns.is_empty())
            .collect()
    }
}
