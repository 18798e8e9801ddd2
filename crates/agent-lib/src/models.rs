//! Core data models for the soomkill agent

use serde::{Deserialize, Serialize};

/// Sentinel for an unlimited memory budget (`memory.max` contains the
/// literal string `max`).
pub const MEMORY_UNLIMITED: u64 = 1 << 62;

/// Pressure Stall Information averages for one line of `memory.pressure`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PsiAverages {
    pub avg10: f64,
    pub avg60: f64,
    pub avg300: f64,
    pub total: u64,
}

/// Memory PSI for a cgroup: `some` = at least one task stalled,
/// `full` = all tasks stalled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PsiStats {
    pub some: PsiAverages,
    pub full: PsiAverages,
}

/// Point-in-time memory accounting snapshot for one container cgroup.
///
/// Reads are not atomic across files; callers tolerate transient zero or
/// missing readings within a scrape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerMetrics {
    /// Cgroup path relative to the cgroup root.
    pub cgroup_path: String,
    pub swap_current_bytes: u64,
    pub memory_current_bytes: u64,
    /// Memory limit in bytes; [`MEMORY_UNLIMITED`] when `memory.max` is `max`.
    pub memory_max_bytes: u64,
    pub psi: PsiStats,
}

/// Node-level swap I/O counters from `/proc/vmstat`. Cumulative and
/// monotone; exposed for observability only, never a kill trigger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SwapIoStats {
    pub pswpin: u64,
    pub pswpout: u64,
}

/// Result of one discovery walk under `kubepods.slice`.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Container cgroups matching a known runtime prefix, relative to the
    /// cgroup root.
    pub recognized: Vec<String>,
    /// `.scope` directories with an unknown prefix. Noise here indicates an
    /// unsupported container runtime.
    pub unrecognized: Vec<String>,
}

/// Kubernetes quality-of-service class, as encoded in the cgroup path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QosClass {
    Guaranteed,
    Burstable,
    BestEffort,
}

impl QosClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            QosClass::Guaranteed => "guaranteed",
            QosClass::Burstable => "burstable",
            QosClass::BestEffort => "besteffort",
        }
    }
}

/// The cache's view of one pod scheduled to this node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodView {
    pub uid: String,
    pub namespace: String,
    pub name: String,
    pub qos: Option<QosClass>,
    /// Set once the orchestrator has marked the pod for termination.
    pub deletion_timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

impl PodView {
    /// Index key in the cache's namespace/name index.
    pub fn namespaced_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// A deletion candidate after cache resolution: identity is known and the
/// protection checks have passed.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCandidate {
    pub uid: String,
    pub namespace: String,
    pub name: String,
    /// Maximum `swap_current / memory_max * 100` over the pod's containers.
    pub swap_percent: f64,
}

/// Swap usage as a percentage of the memory limit, guarding the zero and
/// unlimited cases.
pub fn swap_ratio_percent(swap_current_bytes: u64, memory_max_bytes: u64) -> f64 {
    if memory_max_bytes == 0 || memory_max_bytes >= MEMORY_UNLIMITED {
        return 0.0;
    }
    swap_current_bytes as f64 / memory_max_bytes as f64 * 100.0
}
