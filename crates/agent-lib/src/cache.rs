//! Node-scoped pod cache fed by a long-lived watch.
//!
//! The cache is the only bridge from kernel-side pod UIDs to orchestrator
//! identity, and it is what keeps the steady-state detection path free of
//! API calls: the watch is scoped to `spec.nodeName=<node>` and lookups are
//! in-memory. Two indices are maintained, the standard namespace/name one
//! and a UID index, because cgroup paths carry only the UID.

use crate::health::{components, HealthRegistry};
use crate::models::{PodView, QosClass};
use dashmap::DashMap;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Read side of the cache. The reconciler and the scrape-time collector
/// depend on this seam rather than on the cache type, so tests can supply
/// a fixed map.
pub trait PodLookup: Send + Sync {
    /// Point-in-time snapshot of the pod with this UID. `None` means
    /// "pod unknown", possibly deleted between cgroup enumeration and
    /// lookup, which callers treat as a skip, not an error.
    fn get_by_uid(&self, uid: &str) -> Option<PodView>;
}

/// The dual-index store behind [`PodCache`]. Writes come from the watch
/// loop; reads may happen concurrently from the reconciler and the metrics
/// scrape path. Lookups clone, so a returned view stays valid after the
/// pod disappears from the index.
#[derive(Default)]
struct PodIndex {
    by_uid: DashMap<String, PodView>,
    by_name: DashMap<String, String>,
}

impl PodIndex {
    fn upsert(&self, pod: &Pod) {
        let Some(view) = pod_view(pod) else {
            warn!("Ignoring pod watch event without uid/name/namespace");
            return;
        };
        debug!(uid = %view.uid, pod = %view.namespaced_name(), "Pod cache upsert");
        self.by_name.insert(view.namespaced_name(), view.uid.clone());
        self.by_uid.insert(view.uid.clone(), view);
    }

    fn remove(&self, pod: &Pod) {
        let Some(uid) = pod.metadata.uid.as_deref() else {
            return;
        };
        if let Some((_, view)) = self.by_uid.remove(uid) {
            debug!(uid = %uid, pod = %view.namespaced_name(), "Pod cache remove");
            self.by_name.remove(&view.namespaced_name());
        }
    }

    fn replace(&self, pods: &[Pod]) {
        self.by_uid.clear();
        self.by_name.clear();
        for pod in pods {
            self.upsert(pod);
        }
    }

    fn get_by_uid(&self, uid: &str) -> Option<PodView> {
        self.by_uid.get(uid).map(|entry| entry.clone())
    }

    fn get_by_namespaced_name(&self, namespace: &str, name: &str) -> Option<PodView> {
        let uid = self.by_name.get(&format!("{namespace}/{name}"))?;
        self.by_uid.get(uid.value()).map(|entry| entry.clone())
    }
}

/// UID-indexed view of the pods scheduled to one node.
pub struct PodCache {
    client: Client,
    node_name: String,
    index: PodIndex,
    synced_tx: watch::Sender<bool>,
    health: Option<HealthRegistry>,
}

impl PodCache {
    pub fn new(client: Client, node_name: impl Into<String>) -> Self {
        let (synced_tx, _) = watch::channel(false);
        Self {
            client,
            node_name: node_name.into(),
            index: PodIndex::default(),
            synced_tx,
            health: None,
        }
    }

    /// Report watch-loop state to the given health registry.
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Drive the watch loop until shutdown. Watch errors are logged and the
    /// stream resumes with backoff; the cache keeps serving whatever it
    /// last contained.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(node = %self.node_name, "Starting pod cache watch");

        let api: Api<Pod> = Api::all(self.client.clone());
        let config =
            watcher::Config::default().fields(&format!("spec.nodeName={}", self.node_name));
        let mut stream = watcher(api, config).default_backoff().boxed();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutting down pod cache watch");
                    break;
                }
                event = stream.try_next() => match event {
                    Ok(Some(event)) => self.apply(event).await,
                    Ok(None) => {
                        warn!("Pod watch stream ended");
                        break;
                    }
                    Err(error) => {
                        warn!(error = %error, "Pod watch error, retrying with backoff");
                        if let Some(health) = &self.health {
                            health
                                .set_degraded(components::POD_CACHE, error.to_string())
                                .await;
                        }
                    }
                }
            }
        }
    }

    /// Block until the initial list has been applied. Returns false if the
    /// shutdown signal fires first. The reconciler must not start before
    /// this returns true; early ticks against an empty cache would skip
    /// every candidate.
    pub async fn wait_for_initial_sync(&self, mut shutdown: broadcast::Receiver<()>) -> bool {
        let mut synced_rx = self.synced_tx.subscribe();
        loop {
            if *synced_rx.borrow() {
                return true;
            }
            tokio::select! {
                _ = shutdown.recv() => return false,
                changed = synced_rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    pub fn has_synced(&self) -> bool {
        *self.synced_tx.borrow()
    }

    /// Number of pods currently cached.
    pub fn len(&self) -> usize {
        self.index.by_uid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.by_uid.is_empty()
    }

    /// Lookup through the namespace/name index.
    pub fn get_by_namespaced_name(&self, namespace: &str, name: &str) -> Option<PodView> {
        self.index.get_by_namespaced_name(namespace, name)
    }

    async fn apply(&self, event: watcher::Event<Pod>) {
        match event {
            watcher::Event::Applied(pod) => self.index.upsert(&pod),
            watcher::Event::Deleted(pod) => self.index.remove(&pod),
            watcher::Event::Restarted(pods) => {
                self.index.replace(&pods);
                if !*self.synced_tx.borrow() {
                    info!(pods = pods.len(), "Pod cache synced");
                }
                let _ = self.synced_tx.send(true);
                if let Some(health) = &self.health {
                    health.set_healthy(components::POD_CACHE).await;
                }
            }
        }
    }
}

impl PodLookup for PodCache {
    fn get_by_uid(&self, uid: &str) -> Option<PodView> {
        self.index.get_by_uid(uid)
    }
}

/// Project an API pod object onto the cache's view of it. Pods without a
/// uid, name, or namespace are not indexable.
fn pod_view(pod: &Pod) -> Option<PodView> {
    let uid = pod.metadata.uid.clone()?;
    let name = pod.metadata.name.clone()?;
    let namespace = pod.metadata.namespace.clone()?;
    let qos = pod
        .status
        .as_ref()
        .and_then(|status| status.qos_class.as_deref())
        .and_then(parse_qos_class);
    let deletion_timestamp = pod.metadata.deletion_timestamp.as_ref().map(|t| t.0);

    Some(PodView {
        uid,
        namespace,
        name,
        qos,
        deletion_timestamp,
    })
}

fn parse_qos_class(qos: &str) -> Option<QosClass> {
    match qos {
        "Guaranteed" => Some(QosClass::Guaranteed),
        "Burstable" => Some(QosClass::Burstable),
        "BestEffort" => Some(QosClass::BestEffort),
        _ => None,
    }
}
