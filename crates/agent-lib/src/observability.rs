//! Observability for the soomkill agent
//!
//! Provides:
//! - Prometheus counters/gauges for the deletion path and configuration
//! - Scrape-time collectors that recompute node and per-container swap
//!   state from the scanner and pod cache on every `/metrics` pull

use crate::cache::PodLookup;
use crate::models::QosClass;
use crate::scanner::{extract_container_id, extract_pod_uid, extract_qos, CgroupScanner};
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_gauge, Gauge, GaugeVec,
    Histogram, IntCounter, IntGauge, Opts,
};
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

/// Metric namespace prefix shared by everything this agent exposes.
const NAMESPACE: &str = "soomkiller";

/// Buckets for per-tick reconcile latency (seconds). A tick is dominated by
/// cgroup file reads plus at most a handful of delete RPCs.
const RECONCILE_BUCKETS: &[f64] = &[
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

struct AgentMetricsInner {
    pods_killed_total: IntCounter,
    last_kill_timestamp_seconds: Gauge,
    config_swap_threshold_percent: Gauge,
    config_dry_run: IntGauge,
    reconcile_errors_total: IntCounter,
    delete_errors_total: IntCounter,
    reconcile_duration_seconds: Histogram,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            pods_killed_total: register_int_counter!(
                format!("{NAMESPACE}_pods_killed_total"),
                "Total number of pods deleted due to swap usage over threshold"
            )
            .expect("Failed to register pods_killed_total"),

            last_kill_timestamp_seconds: register_gauge!(
                format!("{NAMESPACE}_last_kill_timestamp_seconds"),
                "Unix timestamp of the last pod deletion"
            )
            .expect("Failed to register last_kill_timestamp_seconds"),

            config_swap_threshold_percent: register_gauge!(
                format!("{NAMESPACE}_config_swap_threshold_percent"),
                "Configured swap threshold as percentage of memory limit"
            )
            .expect("Failed to register config_swap_threshold_percent"),

            config_dry_run: register_int_gauge!(
                format!("{NAMESPACE}_config_dry_run"),
                "1 if dry-run mode is enabled, 0 otherwise"
            )
            .expect("Failed to register config_dry_run"),

            reconcile_errors_total: register_int_counter!(
                format!("{NAMESPACE}_reconcile_errors_total"),
                "Total number of reconcile ticks that ended with an error"
            )
            .expect("Failed to register reconcile_errors_total"),

            delete_errors_total: register_int_counter!(
                format!("{NAMESPACE}_delete_errors_total"),
                "Total number of failed pod delete requests"
            )
            .expect("Failed to register delete_errors_total"),

            reconcile_duration_seconds: register_histogram!(
                format!("{NAMESPACE}_reconcile_duration_seconds"),
                "Time spent in one reconcile tick",
                RECONCILE_BUCKETS.to_vec()
            )
            .expect("Failed to register reconcile_duration_seconds"),
        }
    }
}

/// Lightweight handle to the global metrics instance. Clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct AgentMetrics {
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    /// Create a metrics handle (initializes global metrics on first call)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AgentMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    /// Publish the effective configuration for dashboard visibility
    pub fn set_config(&self, swap_threshold_percent: f64, dry_run: bool) {
        self.inner()
            .config_swap_threshold_percent
            .set(swap_threshold_percent);
        self.inner().config_dry_run.set(i64::from(dry_run));
    }

    pub fn inc_pods_killed(&self) {
        self.inner().pods_killed_total.inc();
        self.inner()
            .last_kill_timestamp_seconds
            .set(chrono::Utc::now().timestamp() as f64);
    }

    pub fn inc_reconcile_errors(&self) {
        self.inner().reconcile_errors_total.inc();
    }

    pub fn inc_delete_errors(&self) {
        self.inner().delete_errors_total.inc();
    }

    pub fn observe_reconcile_duration(&self, duration_secs: f64) {
        self.inner().reconcile_duration_seconds.observe(duration_secs);
    }

    /// Current value of the kill counter (used by tests and logs)
    pub fn pods_killed(&self) -> u64 {
        self.inner().pods_killed_total.get()
    }

    pub fn delete_errors(&self) -> u64 {
        self.inner().delete_errors_total.get()
    }
}

/// Exposes node-level swap I/O counters from `/proc/vmstat` at scrape time.
pub struct SwapIoCollector {
    scanner: CgroupScanner,
    descs: Vec<Desc>,
}

impl SwapIoCollector {
    pub fn new(scanner: CgroupScanner) -> Self {
        let descs = vec![
            Desc::new(
                format!("{NAMESPACE}_node_swap_in_pages_total"),
                "Total pages swapped in (from /proc/vmstat pswpin)".to_string(),
                vec![],
                Default::default(),
            )
            .expect("Failed to build pswpin desc"),
            Desc::new(
                format!("{NAMESPACE}_node_swap_out_pages_total"),
                "Total pages swapped out (from /proc/vmstat pswpout)".to_string(),
                vec![],
                Default::default(),
            )
            .expect("Failed to build pswpout desc"),
        ];
        Self { scanner, descs }
    }
}

impl Collector for SwapIoCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let Ok(stats) = self.scanner.get_swap_io_stats() else {
            return Vec::new();
        };

        let pswpin = IntCounter::new(
            format!("{NAMESPACE}_node_swap_in_pages_total"),
            "Total pages swapped in (from /proc/vmstat pswpin)",
        )
        .expect("Failed to build pswpin counter");
        pswpin.inc_by(stats.pswpin);

        let pswpout = IntCounter::new(
            format!("{NAMESPACE}_node_swap_out_pages_total"),
            "Total pages swapped out (from /proc/vmstat pswpout)",
        )
        .expect("Failed to build pswpout counter");
        pswpout.inc_by(stats.pswpout);

        let mut families = pswpin.collect();
        families.extend(pswpout.collect());
        families
    }
}

const CONTAINER_LABELS: &[&str] = &["namespace", "pod", "container"];

/// Per-container swap state, recomputed from the cgroup tree and the pod
/// cache on every scrape. Only Burstable containers with resident swap are
/// emitted, and only when the cache can resolve their pod identity.
pub struct ContainerSwapCollector {
    scanner: CgroupScanner,
    pods: Arc<dyn PodLookup>,
    descs: Vec<Desc>,
}

struct ContainerGauges {
    swap_bytes: GaugeVec,
    memory_max_bytes: GaugeVec,
    psi_some_avg10: GaugeVec,
    psi_some_avg60: GaugeVec,
    psi_some_avg300: GaugeVec,
    psi_full_avg10: GaugeVec,
    psi_full_avg60: GaugeVec,
    psi_full_avg300: GaugeVec,
}

fn container_gauge(name: &str, help: &str) -> GaugeVec {
    GaugeVec::new(
        Opts::new(format!("{NAMESPACE}_{name}"), help),
        CONTAINER_LABELS,
    )
    .expect("Failed to build container gauge")
}

impl ContainerGauges {
    fn new() -> Self {
        Self {
            swap_bytes: container_gauge("container_swap_bytes", "Current swap usage in bytes"),
            memory_max_bytes: container_gauge(
                "container_memory_max_bytes",
                "Memory limit in bytes (memory.max)",
            ),
            psi_some_avg10: container_gauge(
                "container_memory_psi_some_avg10",
                "Memory PSI some 10s average",
            ),
            psi_some_avg60: container_gauge(
                "container_memory_psi_some_avg60",
                "Memory PSI some 60s average",
            ),
            psi_some_avg300: container_gauge(
                "container_memory_psi_some_avg300",
                "Memory PSI some 300s average",
            ),
            psi_full_avg10: container_gauge(
                "container_memory_psi_full_avg10",
                "Memory PSI full 10s average",
            ),
            psi_full_avg60: container_gauge(
                "container_memory_psi_full_avg60",
                "Memory PSI full 60s average",
            ),
            psi_full_avg300: container_gauge(
                "container_memory_psi_full_avg300",
                "Memory PSI full 300s average",
            ),
        }
    }

    fn collect(self) -> Vec<MetricFamily> {
        let mut families = self.swap_bytes.collect();
        families.extend(self.memory_max_bytes.collect());
        families.extend(self.psi_some_avg10.collect());
        families.extend(self.psi_some_avg60.collect());
        families.extend(self.psi_some_avg300.collect());
        families.extend(self.psi_full_avg10.collect());
        families.extend(self.psi_full_avg60.collect());
        families.extend(self.psi_full_avg300.collect());
        families
    }
}

impl ContainerSwapCollector {
    pub fn new(scanner: CgroupScanner, pods: Arc<dyn PodLookup>) -> Self {
        let mut descs: Vec<Desc> = [
            ("container_swap_bytes", "Current swap usage in bytes"),
            ("container_memory_max_bytes", "Memory limit in bytes (memory.max)"),
            ("container_memory_psi_some_avg10", "Memory PSI some 10s average"),
            ("container_memory_psi_some_avg60", "Memory PSI some 60s average"),
            ("container_memory_psi_some_avg300", "Memory PSI some 300s average"),
            ("container_memory_psi_full_avg10", "Memory PSI full 10s average"),
            ("container_memory_psi_full_avg60", "Memory PSI full 60s average"),
            ("container_memory_psi_full_avg300", "Memory PSI full 300s average"),
        ]
        .iter()
        .map(|(name, help)| {
            Desc::new(
                format!("{NAMESPACE}_{name}"),
                help.to_string(),
                CONTAINER_LABELS.iter().map(|l| l.to_string()).collect(),
                Default::default(),
            )
            .expect("Failed to build container desc")
        })
        .collect();

        descs.push(
            Desc::new(
                format!("{NAMESPACE}_candidate_pods_count"),
                "Number of pods on this node currently using swap".to_string(),
                vec![],
                Default::default(),
            )
            .expect("Failed to build candidate count desc"),
        );

        Self {
            scanner,
            pods,
            descs,
        }
    }
}

impl Collector for ContainerSwapCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let Ok(scan) = self.scanner.find_pod_cgroups() else {
            return Vec::new();
        };

        let gauges = ContainerGauges::new();
        let mut candidate_uids: HashSet<String> = HashSet::new();

        for path in &scan.recognized {
            if extract_qos(path) != Some(QosClass::Burstable) {
                continue;
            }
            let Some(uid) = extract_pod_uid(path) else {
                continue;
            };
            let Ok(metrics) = self.scanner.get_container_metrics(path) else {
                continue;
            };
            if metrics.swap_current_bytes == 0 {
                continue;
            }
            let Some(pod) = self.pods.get_by_uid(&uid) else {
                continue;
            };
            let container = extract_container_id(path).unwrap_or_else(|| path.clone());
            let labels = &[pod.namespace.as_str(), pod.name.as_str(), container.as_str()];

            gauges
                .swap_bytes
                .with_label_values(labels)
                .set(metrics.swap_current_bytes as f64);
            gauges
                .memory_max_bytes
                .with_label_values(labels)
                .set(metrics.memory_max_bytes as f64);
            gauges
                .psi_some_avg10
                .with_label_values(labels)
                .set(metrics.psi.some.avg10);
            gauges
                .psi_some_avg60
                .with_label_values(labels)
                .set(metrics.psi.some.avg60);
            gauges
                .psi_some_avg300
                .with_label_values(labels)
                .set(metrics.psi.some.avg300);
            gauges
                .psi_full_avg10
                .with_label_values(labels)
                .set(metrics.psi.full.avg10);
            gauges
                .psi_full_avg60
                .with_label_values(labels)
                .set(metrics.psi.full.avg60);
            gauges
                .psi_full_avg300
                .with_label_values(labels)
                .set(metrics.psi.full.avg300);

            candidate_uids.insert(uid);
        }

        let candidate_count = IntGauge::new(
            format!("{NAMESPACE}_candidate_pods_count"),
            "Number of pods on this node currently using swap",
        )
        .expect("Failed to build candidate count gauge");
        candidate_count.set(candidate_uids.len() as i64);

        let mut families = gauges.collect();
        families.extend(candidate_count.collect());
        families
    }
}
