//! Component health tracking backing the `/healthz` and `/readyz` probes.
//!
//! Each long-lived part of the agent (scanner, pod cache, reconciler)
//! reports its state here; the HTTP layer turns the aggregate into probe
//! responses. Degraded components keep the agent alive, an unhealthy one
//! fails both probes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Component names used in the registry.
pub mod components {
    pub const SCANNER: &str = "scanner";
    pub const POD_CACHE: &str = "pod_cache";
    pub const RECONCILER: &str = "reconciler";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Having trouble but still operating, e.g. a disconnected watch that
    /// is reconnecting with backoff.
    Degraded,
    Unhealthy,
}

/// One component's last reported state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn now(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Aggregate returned by `/healthz`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

/// Aggregate returned by `/readyz`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

fn aggregate(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
    let mut status = ComponentStatus::Healthy;
    for health in components.values() {
        match health.status {
            ComponentStatus::Unhealthy => return ComponentStatus::Unhealthy,
            ComponentStatus::Degraded => status = ComponentStatus::Degraded,
            ComponentStatus::Healthy => {}
        }
    }
    status
}

/// Shared, cloneable registry of component health.
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component, initially healthy.
    pub async fn register(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_healthy(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Degraded, Some(message.into()))
            .await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Unhealthy, Some(message.into()))
            .await;
    }

    async fn set(&self, name: &str, status: ComponentStatus, message: Option<String>) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), ComponentHealth::now(status, message));
    }

    /// Flip readiness; set once the initial pod cache sync completes.
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = aggregate(&components);
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        if !*self.ready.read().await {
            return ReadinessResponse {
                ready: false,
                reason: Some("Agent not yet initialized".to_string()),
            };
        }
        if self.health().await.status == ComponentStatus::Unhealthy {
            return ReadinessResponse {
                ready: false,
                reason: Some("Critical component unhealthy".to_string()),
            };
        }
        ReadinessResponse {
            ready: true,
            reason: None,
        }
    }
}
