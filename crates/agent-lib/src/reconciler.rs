//! The per-tick detection and eviction loop.
//!
//! Each tick is a pure function of the cgroup tree and the pod cache at
//! tick start: scan container cgroups, aggregate the maximum swap ratio
//! per pod, filter by threshold and policy, delete in descending order.
//! No state is carried across ticks: resident swap pages are themselves
//! the signal that a memory budget was breached, so there is no cooldown,
//! no sustained-duration window, and nothing to forget on restart.

use crate::cache::PodLookup;
use crate::health::{components, HealthRegistry};
use crate::killer::{PodTerminator, TerminateOutcome};
use crate::models::{swap_ratio_percent, QosClass, ResolvedCandidate};
use crate::observability::AgentMetrics;
use crate::scanner::{extract_pod_uid, extract_qos, CgroupScanner};
use anyhow::Result;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant};
use tracing::{debug, error, info, warn};

/// How many ticks between repeated unrecognized-runtime reports and
/// UID-extraction warnings. At the 1 s default interval this is about
/// once a minute.
const NOISE_REPORT_TICKS: u64 = 60;

/// Cap on example paths included in an unrecognized-runtime report.
const UNRECOGNIZED_EXAMPLE_CAP: usize = 5;

/// Reconciler configuration.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Tick period; at least one second.
    pub poll_interval: Duration,
    /// A pod whose maximum container swap ratio strictly exceeds this
    /// percentage is a deletion candidate.
    pub swap_threshold_percent: f64,
    /// Namespaces whose pods are never deleted.
    pub protected_namespaces: HashSet<String>,
    /// Log and emit as if deleting, but issue no delete calls.
    pub dry_run: bool,
}

/// Counts from one reconcile tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct TickSummary {
    over_threshold: usize,
    resolved: usize,
    deleted: usize,
    delete_errors: usize,
}

/// Drives scan → aggregate → filter → resolve → act once per tick.
pub struct Reconciler {
    config: ReconcilerConfig,
    scanner: CgroupScanner,
    pods: Arc<dyn PodLookup>,
    killer: Arc<dyn PodTerminator>,
    metrics: AgentMetrics,
    health: Option<HealthRegistry>,
    ticks: u64,
}

impl Reconciler {
    pub fn new(
        config: ReconcilerConfig,
        scanner: CgroupScanner,
        pods: Arc<dyn PodLookup>,
        killer: Arc<dyn PodTerminator>,
        metrics: AgentMetrics,
    ) -> Self {
        Self {
            config,
            scanner,
            pods,
            killer,
            metrics,
            health: None,
            ticks: 0,
        }
    }

    /// Report tick state to the given health registry.
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// One scan without acting, run at startup so discovery results and
    /// unsupported-runtime noise surface before the first tick.
    pub fn log_startup_scan(&self) -> Result<()> {
        let scan = self.scanner.find_pod_cgroups()?;
        info!(
            recognized = scan.recognized.len(),
            unrecognized = scan.unrecognized.len(),
            "Initial cgroup discovery"
        );
        if !scan.unrecognized.is_empty() {
            report_unrecognized(&scan.unrecognized);
        }
        Ok(())
    }

    /// Run the tick loop until shutdown. A failed tick is logged and
    /// counted; only the shutdown signal exits the loop.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            swap_threshold_percent = self.config.swap_threshold_percent,
            dry_run = self.config.dry_run,
            "Starting reconciler"
        );

        let mut ticker = interval(self.config.poll_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let start = Instant::now();
                    match self.reconcile().await {
                        Ok(summary) => {
                            if summary.resolved > 0 {
                                info!(
                                    over_threshold = summary.over_threshold,
                                    resolved = summary.resolved,
                                    deleted = summary.deleted,
                                    delete_errors = summary.delete_errors,
                                    "Reconcile tick complete"
                                );
                            }
                            if let Some(health) = &self.health {
                                health.set_healthy(components::RECONCILER).await;
                            }
                        }
                        Err(error) => {
                            error!(error = %error, "Reconcile error");
                            self.metrics.inc_reconcile_errors();
                            if let Some(health) = &self.health {
                                health
                                    .set_degraded(components::RECONCILER, error.to_string())
                                    .await;
                            }
                        }
                    }
                    self.metrics
                        .observe_reconcile_duration(start.elapsed().as_secs_f64());
                }
                _ = shutdown.recv() => {
                    info!("Shutting down reconciler");
                    break;
                }
            }
        }
    }

    async fn reconcile(&mut self) -> Result<TickSummary> {
        let log_noise = self.ticks % NOISE_REPORT_TICKS == 0;
        self.ticks += 1;

        let ratios = self.scan_swap_ratios(log_noise)?;

        let over_threshold: HashMap<&str, f64> = ratios
            .iter()
            .filter(|(_, &pct)| pct > self.config.swap_threshold_percent)
            .map(|(uid, &pct)| (uid.as_str(), pct))
            .collect();

        let mut summary = TickSummary {
            over_threshold: over_threshold.len(),
            ..Default::default()
        };

        if over_threshold.is_empty() {
            debug!(
                pods_using_swap = ratios.len(),
                "No pods over swap threshold"
            );
            return Ok(summary);
        }

        let candidates = self.resolve(&over_threshold);
        summary.resolved = candidates.len();

        for candidate in &candidates {
            match self.killer.terminate(candidate).await {
                Ok(TerminateOutcome::Deleted) => {
                    summary.deleted += 1;
                    self.metrics.inc_pods_killed();
                }
                Ok(TerminateOutcome::AlreadyGone) | Ok(TerminateOutcome::DryRun) => {}
                Err(error) => {
                    // The next tick re-observes the same cgroup state, so
                    // no in-tick retry.
                    error!(
                        error = %error,
                        namespace = %candidate.namespace,
                        pod = %candidate.name,
                        "Failed to terminate pod"
                    );
                    summary.delete_errors += 1;
                    self.metrics.inc_delete_errors();
                }
            }
        }

        Ok(summary)
    }

    /// Walk the recognized container cgroups and aggregate the maximum
    /// swap ratio per pod UID. Only Burstable pods are considered: under
    /// `LimitedSwap` they are the only pods granted swap, Guaranteed pods
    /// get none and BestEffort pods have no limit to ratio against.
    fn scan_swap_ratios(&self, log_noise: bool) -> Result<HashMap<String, f64>> {
        let scan = self.scanner.find_pod_cgroups()?;

        if log_noise && !scan.unrecognized.is_empty() {
            report_unrecognized(&scan.unrecognized);
        }

        let mut ratios: HashMap<String, f64> = HashMap::new();

        for path in &scan.recognized {
            if extract_qos(path) != Some(QosClass::Burstable) {
                continue;
            }

            let Some(uid) = extract_pod_uid(path) else {
                if log_noise {
                    warn!(path = %path, "Could not extract pod UID from cgroup path");
                }
                continue;
            };

            let metrics = match self.scanner.get_container_metrics(path) {
                Ok(metrics) => metrics,
                Err(error) => {
                    // Containers exit between discovery and read; skip.
                    warn!(error = %error, path = %path, "Failed to read container metrics");
                    continue;
                }
            };

            if metrics.swap_current_bytes == 0 {
                continue;
            }

            let ratio =
                swap_ratio_percent(metrics.swap_current_bytes, metrics.memory_max_bytes);
            let entry = ratios.entry(uid).or_insert(0.0);
            if ratio > *entry {
                *entry = ratio;
            }
        }

        Ok(ratios)
    }

    /// Resolve UIDs through the pod cache, dropping pods the cache does
    /// not know, pods already terminating, and protected namespaces.
    /// Output is ordered by descending swap percent, ties broken by UID.
    fn resolve(&self, over_threshold: &HashMap<&str, f64>) -> Vec<ResolvedCandidate> {
        let mut resolved = Vec::with_capacity(over_threshold.len());

        for (&uid, &swap_percent) in over_threshold {
            let Some(view) = self.pods.get_by_uid(uid) else {
                debug!(uid = %uid, "Pod not in cache, skipping");
                continue;
            };
            if view.deletion_timestamp.is_some() {
                debug!(
                    namespace = %view.namespace,
                    pod = %view.name,
                    "Pod already terminating, skipping"
                );
                continue;
            }
            if self.config.protected_namespaces.contains(&view.namespace) {
                debug!(
                    namespace = %view.namespace,
                    pod = %view.name,
                    "Namespace protected, skipping"
                );
                continue;
            }

            resolved.push(ResolvedCandidate {
                uid: uid.to_string(),
                namespace: view.namespace,
                name: view.name,
                swap_percent,
            });
        }

        resolved.sort_by(|a, b| {
            b.swap_percent
                .partial_cmp(&a.swap_percent)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.uid.cmp(&b.uid))
        });

        resolved
    }
}

fn report_unrecognized(unrecognized: &[String]) {
    let examples: Vec<&String> =
        unrecognized.iter().take(UNRECOGNIZED_EXAMPLE_CAP).collect();
    warn!(
        count = unrecognized.len(),
        examples = ?examples,
        "Found cgroup scopes with unrecognized runtime prefix"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PodView;
    use anyhow::bail;
    use async_trait::async_trait;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const MIB: u64 = 1024 * 1024;

    /// Pod lookup over a fixed map.
    struct MapLookup(HashMap<String, PodView>);

    impl MapLookup {
        fn new(views: Vec<PodView>) -> Self {
            Self(views.into_iter().map(|v| (v.uid.clone(), v)).collect())
        }
    }

    impl PodLookup for MapLookup {
        fn get_by_uid(&self, uid: &str) -> Option<PodView> {
            self.0.get(uid).cloned()
        }
    }

    /// Terminator that records calls and returns a fixed outcome.
    struct MockTerminator {
        outcome: TerminateOutcome,
        calls: Mutex<Vec<ResolvedCandidate>>,
    }

    impl MockTerminator {
        fn new(outcome: TerminateOutcome) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<ResolvedCandidate> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PodTerminator for MockTerminator {
        async fn terminate(&self, candidate: &ResolvedCandidate) -> Result<TerminateOutcome> {
            self.calls.lock().unwrap().push(candidate.clone());
            Ok(self.outcome)
        }
    }

    /// Terminator that fails for one pod name and deletes the rest.
    struct FlakyTerminator {
        fail_name: String,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PodTerminator for FlakyTerminator {
        async fn terminate(&self, candidate: &ResolvedCandidate) -> Result<TerminateOutcome> {
            self.calls.lock().unwrap().push(candidate.name.clone());
            if candidate.name == self.fail_name {
                bail!("connection refused");
            }
            Ok(TerminateOutcome::Deleted)
        }
    }

    fn view(uid: &str, namespace: &str, name: &str) -> PodView {
        PodView {
            uid: uid.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            qos: Some(QosClass::Burstable),
            deletion_timestamp: None,
        }
    }

    fn create_mock_root(temp_dir: &TempDir) -> std::path::PathBuf {
        let root = temp_dir.path().to_path_buf();
        fs::write(root.join("cgroup.controllers"), "cpu memory io\n").unwrap();
        fs::create_dir_all(root.join("kubepods.slice")).unwrap();
        root
    }

    fn create_container(
        root: &Path,
        qos: QosClass,
        pod_uid: &str,
        scope_name: &str,
        swap_bytes: u64,
        memory_max_bytes: u64,
    ) {
        let pod_slice = match qos {
            QosClass::Burstable => format!(
                "kubepods.slice/kubepods-burstable.slice/kubepods-burstable-pod{pod_uid}.slice"
            ),
            QosClass::BestEffort => format!(
                "kubepods.slice/kubepods-besteffort.slice/kubepods-besteffort-pod{pod_uid}.slice"
            ),
            QosClass::Guaranteed => format!("kubepods.slice/kubepods-pod{pod_uid}.slice"),
        };
        let full = root.join(pod_slice).join(scope_name);
        fs::create_dir_all(&full).unwrap();
        fs::write(full.join("memory.swap.current"), format!("{swap_bytes}\n")).unwrap();
        fs::write(full.join("memory.current"), "268435456\n").unwrap();
        fs::write(full.join("memory.max"), format!("{memory_max_bytes}\n")).unwrap();
        fs::write(
            full.join("memory.pressure"),
            "some avg10=1.00 avg60=1.00 avg300=1.00 total=1000\n\
             full avg10=1.00 avg60=1.00 avg300=1.00 total=1000\n",
        )
        .unwrap();
    }

    fn reconciler(
        root: &Path,
        threshold: f64,
        protected: &[&str],
        lookup: MapLookup,
        killer: Arc<dyn PodTerminator>,
    ) -> Reconciler {
        let config = ReconcilerConfig {
            poll_interval: Duration::from_secs(1),
            swap_threshold_percent: threshold,
            protected_namespaces: protected.iter().map(|s| s.to_string()).collect(),
            dry_run: false,
        };
        Reconciler::new(
            config,
            CgroupScanner::new(root),
            Arc::new(lookup),
            killer,
            AgentMetrics::new(),
        )
    }

    #[tokio::test]
    async fn test_only_burstable_pods_are_candidates() {
        // Burstable A at ~19.5%, Guaranteed B and BestEffort C with the
        // same swap; only A may be deleted.
        let temp_dir = TempDir::new().unwrap();
        let root = create_mock_root(&temp_dir);
        create_container(&root, QosClass::Burstable, "uid-a", "cri-containerd-a.scope", 100 * MIB, 512 * MIB);
        create_container(&root, QosClass::Guaranteed, "uid-b", "cri-containerd-b.scope", 100 * MIB, 512 * MIB);
        create_container(&root, QosClass::BestEffort, "uid-c", "cri-containerd-c.scope", 100 * MIB, 512 * MIB);

        let lookup = MapLookup::new(vec![
            view("uid-a", "default", "pod-a"),
            view("uid-b", "default", "pod-b"),
            view("uid-c", "default", "pod-c"),
        ]);
        let killer = MockTerminator::new(TerminateOutcome::Deleted);
        let mut reconciler = reconciler(&root, 10.0, &[], lookup, killer.clone());

        let summary = reconciler.reconcile().await.unwrap();

        let calls = killer.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "pod-a");
        assert!((calls[0].swap_percent - 19.53125).abs() < 1e-9);
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.over_threshold, 1);
    }

    #[tokio::test]
    async fn test_under_threshold_pod_is_spared() {
        let temp_dir = TempDir::new().unwrap();
        let root = create_mock_root(&temp_dir);
        create_container(&root, QosClass::Burstable, "uid-a", "cri-containerd-a.scope", 5 * MIB, 512 * MIB);
        create_container(&root, QosClass::Burstable, "uid-d", "cri-containerd-d.scope", 100 * MIB, 512 * MIB);

        let lookup = MapLookup::new(vec![
            view("uid-a", "default", "pod-a"),
            view("uid-d", "default", "pod-d"),
        ]);
        let killer = MockTerminator::new(TerminateOutcome::Deleted);
        let mut reconciler = reconciler(&root, 10.0, &[], lookup, killer.clone());

        reconciler.reconcile().await.unwrap();

        let calls = killer.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "pod-d");
    }

    #[tokio::test]
    async fn test_multi_container_pod_aggregates_max_not_sum() {
        // Two containers, each just under 20%; the pod's effective ratio
        // is the max, so a 30% threshold spares it and a 10% one does not.
        let temp_dir = TempDir::new().unwrap();
        let root = create_mock_root(&temp_dir);
        create_container(&root, QosClass::Burstable, "uid-a", "cri-containerd-c1.scope", 50 * MIB, 256 * MIB);
        create_container(&root, QosClass::Burstable, "uid-a", "cri-containerd-c2.scope", 100 * MIB, 512 * MIB);

        let lookup = MapLookup::new(vec![view("uid-a", "default", "pod-a")]);
        let killer = MockTerminator::new(TerminateOutcome::Deleted);
        let mut rec = reconciler(&root, 10.0, &[], lookup, killer.clone());

        rec.reconcile().await.unwrap();
        let calls = killer.calls();
        assert_eq!(calls.len(), 1);
        assert!((calls[0].swap_percent - 19.53125).abs() < 1e-9);

        // Sum would be ~39%; max keeps it under a 30% threshold.
        let lookup = MapLookup::new(vec![view("uid-a", "default", "pod-a")]);
        let killer = MockTerminator::new(TerminateOutcome::Deleted);
        let mut rec = reconciler(&root, 30.0, &[], lookup, killer.clone());
        rec.reconcile().await.unwrap();
        assert!(killer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_protected_namespace_is_never_deleted() {
        let temp_dir = TempDir::new().unwrap();
        let root = create_mock_root(&temp_dir);
        create_container(&root, QosClass::Burstable, "uid-a", "cri-containerd-a.scope", 200 * MIB, 256 * MIB);

        let lookup = MapLookup::new(vec![view("uid-a", "kube-system", "dns-0")]);
        let killer = MockTerminator::new(TerminateOutcome::Deleted);
        let mut reconciler = reconciler(&root, 1.0, &["kube-system"], lookup, killer.clone());

        let summary = reconciler.reconcile().await.unwrap();

        assert!(killer.calls().is_empty());
        assert_eq!(summary.over_threshold, 1);
        assert_eq!(summary.resolved, 0);
    }

    #[tokio::test]
    async fn test_terminating_pod_is_not_double_evicted() {
        let temp_dir = TempDir::new().unwrap();
        let root = create_mock_root(&temp_dir);
        create_container(&root, QosClass::Burstable, "uid-a", "cri-containerd-a.scope", 200 * MIB, 256 * MIB);

        let mut terminating = view("uid-a", "default", "pod-a");
        terminating.deletion_timestamp = Some(chrono::Utc::now());
        let lookup = MapLookup::new(vec![terminating]);
        let killer = MockTerminator::new(TerminateOutcome::Deleted);
        let mut reconciler = reconciler(&root, 1.0, &[], lookup, killer.clone());

        reconciler.reconcile().await.unwrap();
        assert!(killer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_outcome_is_not_counted_as_kill() {
        let temp_dir = TempDir::new().unwrap();
        let root = create_mock_root(&temp_dir);
        create_container(&root, QosClass::Burstable, "uid-a", "cri-containerd-a.scope", 200 * MIB, 256 * MIB);
        create_container(&root, QosClass::Burstable, "uid-b", "cri-containerd-b.scope", 100 * MIB, 256 * MIB);

        let lookup = MapLookup::new(vec![
            view("uid-a", "default", "pod-a"),
            view("uid-b", "default", "pod-b"),
        ]);
        let killer = MockTerminator::new(TerminateOutcome::DryRun);
        let mut reconciler = reconciler(&root, 1.0, &[], lookup, killer.clone());

        let summary = reconciler.reconcile().await.unwrap();

        assert_eq!(killer.calls().len(), 2);
        assert_eq!(summary.deleted, 0);
        assert_eq!(summary.delete_errors, 0);
    }

    #[tokio::test]
    async fn test_already_gone_is_success_but_not_a_kill() {
        let temp_dir = TempDir::new().unwrap();
        let root = create_mock_root(&temp_dir);
        create_container(&root, QosClass::Burstable, "uid-a", "cri-containerd-a.scope", 200 * MIB, 256 * MIB);

        let lookup = MapLookup::new(vec![view("uid-a", "default", "pod-a")]);
        let killer = MockTerminator::new(TerminateOutcome::AlreadyGone);
        let mut reconciler = reconciler(&root, 1.0, &[], lookup, killer.clone());

        let summary = reconciler.reconcile().await.unwrap();
        assert_eq!(summary.deleted, 0);
        assert_eq!(summary.delete_errors, 0);
        assert_eq!(killer.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_unrecognized_runtime_generates_no_candidates() {
        let temp_dir = TempDir::new().unwrap();
        let root = create_mock_root(&temp_dir);
        create_container(&root, QosClass::Burstable, "uid-a", "docker-a.scope", 200 * MIB, 256 * MIB);

        let lookup = MapLookup::new(vec![view("uid-a", "default", "pod-a")]);
        let killer = MockTerminator::new(TerminateOutcome::Deleted);
        let mut reconciler = reconciler(&root, 1.0, &[], lookup, killer.clone());

        let summary = reconciler.reconcile().await.unwrap();
        assert!(killer.calls().is_empty());
        assert_eq!(summary.over_threshold, 0);
    }

    #[tokio::test]
    async fn test_underscore_uid_resolves_against_dashed_cache_key() {
        let temp_dir = TempDir::new().unwrap();
        let root = create_mock_root(&temp_dir);
        create_container(
            &root,
            QosClass::Burstable,
            "aaaa1111_2222_3333_4444_555566667777",
            "cri-containerd-a.scope",
            200 * MIB,
            256 * MIB,
        );

        let lookup = MapLookup::new(vec![view(
            "aaaa1111-2222-3333-4444-555566667777",
            "default",
            "pod-a",
        )]);
        let killer = MockTerminator::new(TerminateOutcome::Deleted);
        let mut reconciler = reconciler(&root, 1.0, &[], lookup, killer.clone());

        reconciler.reconcile().await.unwrap();
        let calls = killer.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].uid, "aaaa1111-2222-3333-4444-555566667777");
    }

    #[tokio::test]
    async fn test_pod_missing_from_cache_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let root = create_mock_root(&temp_dir);
        create_container(&root, QosClass::Burstable, "uid-gone", "cri-containerd-a.scope", 200 * MIB, 256 * MIB);

        let lookup = MapLookup::new(vec![]);
        let killer = MockTerminator::new(TerminateOutcome::Deleted);
        let mut reconciler = reconciler(&root, 1.0, &[], lookup, killer.clone());

        let summary = reconciler.reconcile().await.unwrap();
        assert!(killer.calls().is_empty());
        assert_eq!(summary.over_threshold, 1);
        assert_eq!(summary.resolved, 0);
    }

    #[tokio::test]
    async fn test_deletions_ordered_by_descending_swap_percent() {
        let temp_dir = TempDir::new().unwrap();
        let root = create_mock_root(&temp_dir);
        create_container(&root, QosClass::Burstable, "uid-low", "cri-containerd-a.scope", 50 * MIB, 512 * MIB);
        create_container(&root, QosClass::Burstable, "uid-high", "cri-containerd-b.scope", 200 * MIB, 256 * MIB);
        create_container(&root, QosClass::Burstable, "uid-mid", "cri-containerd-c.scope", 100 * MIB, 256 * MIB);

        let lookup = MapLookup::new(vec![
            view("uid-low", "default", "pod-low"),
            view("uid-high", "default", "pod-high"),
            view("uid-mid", "default", "pod-mid"),
        ]);
        let killer = MockTerminator::new(TerminateOutcome::Deleted);
        let mut reconciler = reconciler(&root, 1.0, &[], lookup, killer.clone());

        reconciler.reconcile().await.unwrap();
        let names: Vec<String> = killer.calls().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["pod-high", "pod-mid", "pod-low"]);
    }

    #[tokio::test]
    async fn test_equal_percent_ties_break_by_uid() {
        let temp_dir = TempDir::new().unwrap();
        let root = create_mock_root(&temp_dir);
        create_container(&root, QosClass::Burstable, "uid-bbb", "cri-containerd-a.scope", 100 * MIB, 256 * MIB);
        create_container(&root, QosClass::Burstable, "uid-aaa", "cri-containerd-b.scope", 100 * MIB, 256 * MIB);

        let lookup = MapLookup::new(vec![
            view("uid-bbb", "default", "pod-b"),
            view("uid-aaa", "default", "pod-a"),
        ]);
        let killer = MockTerminator::new(TerminateOutcome::Deleted);
        let mut reconciler = reconciler(&root, 1.0, &[], lookup, killer.clone());

        reconciler.reconcile().await.unwrap();
        let uids: Vec<String> = killer.calls().into_iter().map(|c| c.uid).collect();
        assert_eq!(uids, vec!["uid-aaa", "uid-bbb"]);
    }

    #[tokio::test]
    async fn test_identical_inputs_produce_identical_delete_sets() {
        let temp_dir = TempDir::new().unwrap();
        let root = create_mock_root(&temp_dir);
        create_container(&root, QosClass::Burstable, "uid-a", "cri-containerd-a.scope", 200 * MIB, 256 * MIB);
        create_container(&root, QosClass::Burstable, "uid-b", "cri-containerd-b.scope", 100 * MIB, 256 * MIB);

        let lookup = MapLookup::new(vec![
            view("uid-a", "default", "pod-a"),
            view("uid-b", "default", "pod-b"),
        ]);
        let killer = MockTerminator::new(TerminateOutcome::Deleted);
        let mut reconciler = reconciler(&root, 1.0, &[], lookup, killer.clone());

        reconciler.reconcile().await.unwrap();
        reconciler.reconcile().await.unwrap();

        let calls = killer.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[0..2], calls[2..4]);
    }

    #[tokio::test]
    async fn test_per_candidate_failure_does_not_abort_tick() {
        let temp_dir = TempDir::new().unwrap();
        let root = create_mock_root(&temp_dir);
        create_container(&root, QosClass::Burstable, "uid-a", "cri-containerd-a.scope", 200 * MIB, 256 * MIB);
        create_container(&root, QosClass::Burstable, "uid-b", "cri-containerd-b.scope", 100 * MIB, 256 * MIB);

        let lookup = MapLookup::new(vec![
            view("uid-a", "default", "pod-a"),
            view("uid-b", "default", "pod-b"),
        ]);
        let killer = Arc::new(FlakyTerminator {
            fail_name: "pod-a".to_string(),
            calls: Mutex::new(Vec::new()),
        });
        let mut reconciler = reconciler(&root, 1.0, &[], lookup, killer.clone());

        let summary = reconciler.reconcile().await.unwrap();

        assert_eq!(killer.calls.lock().unwrap().len(), 2);
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.delete_errors, 1);
    }

    #[tokio::test]
    async fn test_zero_swap_containers_contribute_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let root = create_mock_root(&temp_dir);
        create_container(&root, QosClass::Burstable, "uid-a", "cri-containerd-a.scope", 0, 256 * MIB);

        let lookup = MapLookup::new(vec![view("uid-a", "default", "pod-a")]);
        let killer = MockTerminator::new(TerminateOutcome::Deleted);
        let mut reconciler = reconciler(&root, 0.0, &[], lookup, killer.clone());

        let summary = reconciler.reconcile().await.unwrap();
        assert!(killer.calls().is_empty());
        assert_eq!(summary.over_threshold, 0);
    }

    #[tokio::test]
    async fn test_startup_scan_logs_without_acting() {
        let temp_dir = TempDir::new().unwrap();
        let root = create_mock_root(&temp_dir);
        create_container(&root, QosClass::Burstable, "uid-a", "cri-containerd-a.scope", 200 * MIB, 256 * MIB);

        let lookup = MapLookup::new(vec![view("uid-a", "default", "pod-a")]);
        let killer = MockTerminator::new(TerminateOutcome::Deleted);
        let reconciler = reconciler(&root, 1.0, &[], lookup, killer.clone());

        reconciler.log_startup_scan().unwrap();
        assert!(killer.calls().is_empty());
    }
}
