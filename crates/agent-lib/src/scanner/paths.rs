//! Pure string inspection of systemd-driver cgroup paths.
//!
//! Layout produced by the systemd cgroup driver:
//! `kubepods.slice/kubepods-<qos>.slice/kubepods-<qos>-pod<uid>.slice/<runtime>-<id>.scope`
//! Guaranteed pods have no QoS subdirectory.

use crate::models::QosClass;

/// Runtime prefixes this agent understands. An allow-list: anything else is
/// reported as unrecognized rather than guessed at, since an unknown runtime
/// may lay out its cgroups differently.
pub const RECOGNIZED_RUNTIME_PREFIXES: &[&str] = &["cri-containerd-", "crio-"];

/// Whether a `.scope` directory name belongs to a known container runtime.
pub fn is_recognized_scope(name: &str) -> bool {
    RECOGNIZED_RUNTIME_PREFIXES
        .iter()
        .any(|p| name.starts_with(p))
}

/// Extract the pod UID from a cgroup path.
///
/// Scans path components suffixed `.slice` for a `-pod` marker and returns
/// the substring after it, with underscores normalized to dashes so the
/// result matches the orchestrator's canonical UID form.
pub fn extract_pod_uid(cgroup_path: &str) -> Option<String> {
    for part in cgroup_path.split('/') {
        let Some(part) = part.strip_suffix(".slice") else {
            continue;
        };
        let Some(idx) = part.rfind("-pod") else {
            continue;
        };
        let uid = &part[idx + 4..];
        if uid.is_empty() {
            continue;
        }
        return Some(uid.replace('_', "-"));
    }
    None
}

/// Extract the QoS class from a cgroup path.
///
/// Guaranteed pods sit directly under `kubepods.slice` without a QoS
/// subdirectory, so the absence of a burstable/besteffort marker inside the
/// kubepods subtree means guaranteed.
pub fn extract_qos(cgroup_path: &str) -> Option<QosClass> {
    if cgroup_path.contains("kubepods-burstable") {
        return Some(QosClass::Burstable);
    }
    if cgroup_path.contains("kubepods-besteffort") {
        return Some(QosClass::BestEffort);
    }
    if cgroup_path.contains("kubepods.slice") {
        return Some(QosClass::Guaranteed);
    }
    None
}

/// Extract the runtime-prefixed container ID from a cgroup path, e.g.
/// `cri-containerd-abc...` from `.../cri-containerd-abc....scope`.
pub fn extract_container_id(cgroup_path: &str) -> Option<String> {
    cgroup_path
        .split('/')
        .rev()
        .find_map(|part| part.strip_suffix(".scope"))
        .filter(|id| is_recognized_scope(id))
        .map(str::to_string)
}
