//! Cgroup v2 scanning: container discovery and memory/swap accounting reads.
//!
//! The scanner is the only component that touches the filesystem. It holds
//! no state and performs no orchestrator API calls; concurrent use from the
//! reconciler and the metrics scrape path is safe. Reads are synchronous:
//! cgroup files resolve in microseconds and the Prometheus collector trait
//! that shares this code is not async.

mod paths;


pub use paths::{
    extract_container_id, extract_pod_uid, extract_qos, is_recognized_scope,
    RECOGNIZED_RUNTIME_PREFIXES,
};

use crate::models::{ContainerMetrics, PsiAverages, PsiStats, ScanResult, SwapIoStats, MEMORY_UNLIMITED};
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Scanner over the unified cgroup hierarchy of one node.
#[derive(Debug, Clone)]
pub struct CgroupScanner {
    cgroup_root: PathBuf,
    vmstat_path: PathBuf,
}

impl CgroupScanner {
    pub fn new(cgroup_root: impl Into<PathBuf>) -> Self {
        Self {
            cgroup_root: cgroup_root.into(),
            vmstat_path: PathBuf::from("/proc/vmstat"),
        }
    }

    /// Create a scanner with a custom vmstat path (for testing).
    pub fn with_vmstat_path(
        cgroup_root: impl Into<PathBuf>,
        vmstat_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cgroup_root: cgroup_root.into(),
            vmstat_path: vmstat_path.into(),
        }
    }

    pub fn cgroup_root(&self) -> &Path {
        &self.cgroup_root
    }

    /// Check the startup preconditions and fail with a specific message on
    /// the first one that does not hold:
    /// cgroup v2 unified hierarchy, systemd cgroup driver, swap accounting.
    pub fn validate_environment(&self) -> Result<()> {
        let controllers = self.cgroup_root.join("cgroup.controllers");
        if !controllers.exists() {
            bail!(
                "cgroup v2 not detected: {} not found (cgroup v1 is not supported)",
                controllers.display()
            );
        }

        let kubepods = self.cgroup_root.join("kubepods.slice");
        if !kubepods.exists() {
            bail!(
                "systemd cgroup driver not detected: {} not found (cgroupfs driver is not supported)",
                kubepods.display()
            );
        }

        let swap_max = kubepods.join("memory.swap.max");
        if !swap_max.exists() {
            bail!("swap not enabled: {} not found", swap_max.display());
        }

        Ok(())
    }

    /// Walk the subtree under `kubepods.slice` and classify every `.scope`
    /// directory by runtime prefix. Per-entry walk errors are skipped; a
    /// read error on the root is fatal.
    pub fn find_pod_cgroups(&self) -> Result<ScanResult> {
        let kubepods = self.cgroup_root.join("kubepods.slice");
        if !kubepods.exists() {
            bail!("kubepods.slice not found at {}", kubepods.display());
        }

        let mut result = ScanResult::default();
        self.walk_scopes(&kubepods, &mut result, true)?;

        Ok(result)
    }

    fn walk_scopes(&self, dir: &Path, result: &mut ScanResult, is_root: bool) -> Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if is_root => {
                return Err(e).with_context(|| format!("failed to read {}", dir.display()))
            }
            // A container exiting mid-walk removes its directory; skip.
            Err(_) => return Ok(()),
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.ends_with(".scope") {
                let rel = path
                    .strip_prefix(&self.cgroup_root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .into_owned();
                if is_recognized_scope(&name) {
                    result.recognized.push(rel);
                } else {
                    result.unrecognized.push(rel);
                }
            }

            self.walk_scopes(&path, result, false)?;
        }

        Ok(())
    }

    /// Read the memory accounting snapshot for one container cgroup
    /// (path relative to the cgroup root). Any read error fails the whole
    /// call; the caller skips the container for this tick.
    pub fn get_container_metrics(&self, cgroup_path: &str) -> Result<ContainerMetrics> {
        let full = self.cgroup_root.join(cgroup_path);

        let swap_current_bytes = read_u64_file(&full.join("memory.swap.current"))
            .context("failed to read memory.swap.current")?;
        let memory_current_bytes =
            read_u64_file(&full.join("memory.current")).context("failed to read memory.current")?;
        let memory_max_bytes =
            read_memory_max(&full.join("memory.max")).context("failed to read memory.max")?;
        let psi = read_psi(&full.join("memory.pressure"))
            .context("failed to read memory.pressure")?;

        Ok(ContainerMetrics {
            cgroup_path: cgroup_path.to_string(),
            swap_current_bytes,
            memory_current_bytes,
            memory_max_bytes,
            psi,
        })
    }

    /// Parse node-wide swap I/O counters from `/proc/vmstat`. Missing
    /// `pswpin`/`pswpout` lines yield zeros.
    pub fn get_swap_io_stats(&self) -> Result<SwapIoStats> {
        let content = fs::read_to_string(&self.vmstat_path)
            .with_context(|| format!("failed to read {}", self.vmstat_path.display()))?;

        let mut stats = SwapIoStats::default();
        for line in content.lines() {
            let mut fields = line.split_whitespace();
            let (Some(key), Some(value)) = (fields.next(), fields.next()) else {
                continue;
            };
            match key {
                "pswpin" => {
                    if let Ok(v) = value.parse() {
                        stats.pswpin = v;
                    }
                }
                "pswpout" => {
                    if let Ok(v) = value.parse() {
                        stats.pswpout = v;
                    }
                }
                _ => {}
            }
        }

        Ok(stats)
    }
}

fn read_u64_file(path: &Path) -> Result<u64> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    content
        .trim()
        .parse()
        .with_context(|| format!("failed to parse {} value", path.display()))
}

/// `memory.max` is an integer byte count or the literal `max` (unlimited),
/// mapped to [`MEMORY_UNLIMITED`].
fn read_memory_max(path: &Path) -> Result<u64> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let content = content.trim();
    if content == "max" {
        return Ok(MEMORY_UNLIMITED);
    }
    content
        .parse()
        .with_context(|| format!("failed to parse {} value", path.display()))
}

/// Parse the two-line PSI format of `memory.pressure`:
/// `some avg10=17.42 avg60=3.24 avg300=0.68 total=2649745`
/// `full avg10=13.37 avg60=2.41 avg300=0.50 total=2098080`
fn read_psi(path: &Path) -> Result<PsiStats> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;

    let mut psi = PsiStats::default();
    for line in content.lines() {
        let mut fields = line.split_whitespace();
        let Some(kind) = fields.next() else { continue };

        let mut avgs = PsiAverages::default();
        for field in fields {
            let Some((key, value)) = field.split_once('=') else {
                continue;
            };
            match key {
                "avg10" => avgs.avg10 = value.parse().unwrap_or(0.0),
                "avg60" => avgs.avg60 = value.parse().unwrap_or(0.0),
                "avg300" => avgs.avg300 = value.parse().unwrap_or(0.0),
                "total" => avgs.total = value.parse().unwrap_or(0),
                _ => {}
            }
        }

        match kind {
            "some" => psi.some = avgs,
            "full" => psi.full = avgs,
            _ => {}
        }
    }

    Ok(psi)
}
