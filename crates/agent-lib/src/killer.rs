//! Deletion path: event emission and graceful pod delete.
//!
//! The delete request carries no grace-period override, so the orchestrator
//! honors the pod's own `terminationGracePeriodSeconds`: SIGTERM, wait,
//! then SIGKILL. That grace period is where the softness of this agent
//! lives; the detection loop itself applies no delay.

use crate::cache::PodLookup;
use crate::models::{PodView, ResolvedCandidate};
use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ObjectReference, Pod};
use kube::api::DeleteParams;
use kube::runtime::events::{self, EventType, Recorder, Reporter};
use kube::{Api, Client};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Component name used on emitted events and log lines.
pub const AGENT_NAME: &str = "soomkill-agent";

/// Reason string on the deletion event.
pub const EVENT_REASON: &str = "Soomkilled";

/// What a terminate call actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// Delete request accepted by the orchestrator.
    Deleted,
    /// The pod was already gone (`NotFound`); success, but not a kill.
    AlreadyGone,
    /// Dry-run mode: logged only, no API call issued.
    DryRun,
}

/// Seam between the reconciler and the orchestrator delete machinery.
#[async_trait]
pub trait PodTerminator: Send + Sync {
    async fn terminate(&self, candidate: &ResolvedCandidate) -> Result<TerminateOutcome>;
}

/// Production terminator backed by the orchestrator API.
pub struct PodKiller {
    client: Client,
    pods: Arc<dyn PodLookup>,
    reporter: Reporter,
    node_name: String,
    dry_run: bool,
}

impl PodKiller {
    pub fn new(
        client: Client,
        pods: Arc<dyn PodLookup>,
        node_name: impl Into<String>,
        dry_run: bool,
    ) -> Self {
        let node_name = node_name.into();
        let reporter = Reporter {
            controller: AGENT_NAME.to_string(),
            instance: Some(node_name.clone()),
        };
        Self {
            client,
            pods,
            reporter,
            node_name,
            dry_run,
        }
    }

    /// Best-effort event on the pod object, emitted before the delete so
    /// the trace survives even if the object disappears right after.
    async fn emit_event(&self, candidate: &ResolvedCandidate, view: &PodView) {
        let reference = ObjectReference {
            api_version: Some("v1".to_string()),
            kind: Some("Pod".to_string()),
            name: Some(view.name.clone()),
            namespace: Some(view.namespace.clone()),
            uid: Some(view.uid.clone()),
            ..Default::default()
        };
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), reference);
        let event = events::Event {
            type_: EventType::Warning,
            reason: EVENT_REASON.to_string(),
            note: Some(kill_message(&candidate.name, &self.node_name, candidate.swap_percent)),
            action: "Deleting".to_string(),
            secondary: None,
        };

        if let Err(error) = recorder.publish(event).await {
            warn!(
                error = %error,
                namespace = %candidate.namespace,
                pod = %candidate.name,
                "Failed to emit event, proceeding with delete"
            );
        }
    }
}

#[async_trait]
impl PodTerminator for PodKiller {
    async fn terminate(&self, candidate: &ResolvedCandidate) -> Result<TerminateOutcome> {
        if self.dry_run {
            info!(
                namespace = %candidate.namespace,
                pod = %candidate.name,
                swap_percent = candidate.swap_percent,
                "[dry-run] Would delete pod"
            );
            return Ok(TerminateOutcome::DryRun);
        }

        // Events attach to the object, so re-resolve the view. A cache miss
        // here skips the event but never the delete; the pod may be
        // intermittently visible.
        match self.pods.get_by_uid(&candidate.uid) {
            Some(view) => self.emit_event(candidate, &view).await,
            None => debug!(
                uid = %candidate.uid,
                "Pod not in cache at delete time, skipping event"
            ),
        }

        warn!(
            namespace = %candidate.namespace,
            pod = %candidate.name,
            swap_percent = candidate.swap_percent,
            "Deleting pod over swap threshold"
        );

        let api: Api<Pod> = Api::namespaced(self.client.clone(), &candidate.namespace);
        match api.delete(&candidate.name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(
                    namespace = %candidate.namespace,
                    pod = %candidate.name,
                    "Successfully deleted pod"
                );
                Ok(TerminateOutcome::Deleted)
            }
            Err(kube::Error::Api(response)) if response.code == 404 => {
                info!(
                    namespace = %candidate.namespace,
                    pod = %candidate.name,
                    "Pod already deleted"
                );
                Ok(TerminateOutcome::AlreadyGone)
            }
            Err(error) => Err(error).with_context(|| {
                format!(
                    "failed to delete pod {}/{}",
                    candidate.namespace, candidate.name
                )
            }),
        }
    }
}

/// Message placed on the `Soomkilled` event.
fn kill_message(pod_name: &str, node_name: &str, swap_percent: f64) -> String {
    format!(
        "Pod {pod_name} deleted by {AGENT_NAME} on node {node_name}: swap usage {swap_percent:.1}%"
    )
}
