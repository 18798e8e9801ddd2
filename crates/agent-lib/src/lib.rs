//! Core library for the soomkill node agent
//!
//! This crate provides the pieces of the detection and eviction loop:
//! - Cgroup v2 scanning and memory/swap accounting reads
//! - A node-scoped, UID-indexed pod cache fed by an orchestrator watch
//! - The per-tick reconciler
//! - The event-emitting deletion path
//! - Health checks and Prometheus observability

pub mod cache;
pub mod health;
pub mod killer;
pub mod models;
pub mod observability;
pub mod reconciler;
pub mod scanner;

pub use cache::{PodCache, PodLookup};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use killer::{PodKiller, PodTerminator, TerminateOutcome, AGENT_NAME, EVENT_REASON};
pub use models::*;
pub use observability::{AgentMetrics, ContainerSwapCollector, SwapIoCollector};
pub use reconciler::{Reconciler, ReconcilerConfig};
pub use scanner::CgroupScanner;
