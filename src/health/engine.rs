// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Periodic health evaluation.
//!
//! Every tick pulls a device snapshot and the critical event list from the
//! GPU agent, derives a verdict per device and swaps the result into the
//! [`HealthStore`]. Under Kubernetes the unhealthy set is mirrored onto the
//! node as `metricsexporter.amd.com.gpu.<i>.state` labels.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{HealthState, HealthStore, MockCounts, Verdict};
use crate::common::config::{EnvConfig, ExporterConfig};
use crate::config::{ConfigStore, MetricConfig};
use crate::device::sysfs::SysfsDevices;
use crate::api::metrics::normalize;
use crate::error::Result;
use crate::proto::amdgpu::{EventSeverity, Gpu, GpuStats};
use crate::scheduler::{resolve_workload, Workload};
use crate::traits::{MetricsClient, NodeLabeler, SchedulerClient};
use crate::utils::format_uuid;

/// Uncorrectable ECC blocks that take part in health evaluation.
pub const ECC_HEALTH_FIELDS: [&str; 19] = [
    "GPU_ECC_UNCORRECT_SDMA",
    "GPU_ECC_UNCORRECT_GFX",
    "GPU_ECC_UNCORRECT_MMHUB",
    "GPU_ECC_UNCORRECT_ATHUB",
    "GPU_ECC_UNCORRECT_BIF",
    "GPU_ECC_UNCORRECT_HDP",
    "GPU_ECC_UNCORRECT_XGMI_WAFL",
    "GPU_ECC_UNCORRECT_DF",
    "GPU_ECC_UNCORRECT_SMN",
    "GPU_ECC_UNCORRECT_SEM",
    "GPU_ECC_UNCORRECT_MP0",
    "GPU_ECC_UNCORRECT_MP1",
    "GPU_ECC_UNCORRECT_FUSE",
    "GPU_ECC_UNCORRECT_UMC",
    "GPU_ECC_UNCORRECT_MCA",
    "GPU_ECC_UNCORRECT_VCN",
    "GPU_ECC_UNCORRECT_JPEG",
    "GPU_ECC_UNCORRECT_IH",
    "GPU_ECC_UNCORRECT_MPIO",
];

fn uncorrectable_count(stats: &GpuStats, field: &str) -> u64 {
    match field {
        "GPU_ECC_UNCORRECT_SDMA" => stats.sdma_uncorrectable_errors,
        "GPU_ECC_UNCORRECT_GFX" => stats.gfx_uncorrectable_errors,
        "GPU_ECC_UNCORRECT_MMHUB" => stats.mmhub_uncorrectable_errors,
        "GPU_ECC_UNCORRECT_ATHUB" => stats.athub_uncorrectable_errors,
        "GPU_ECC_UNCORRECT_BIF" => stats.bif_uncorrectable_errors,
        "GPU_ECC_UNCORRECT_HDP" => stats.hdp_uncorrectable_errors,
        "GPU_ECC_UNCORRECT_XGMI_WAFL" => stats.xgmi_wafl_uncorrectable_errors,
        "GPU_ECC_UNCORRECT_DF" => stats.df_uncorrectable_errors,
        "GPU_ECC_UNCORRECT_SMN" => stats.smn_uncorrectable_errors,
        "GPU_ECC_UNCORRECT_SEM" => stats.sem_uncorrectable_errors,
        "GPU_ECC_UNCORRECT_MP0" => stats.mp0_uncorrectable_errors,
        "GPU_ECC_UNCORRECT_MP1" => stats.mp1_uncorrectable_errors,
        "GPU_ECC_UNCORRECT_FUSE" => stats.fuse_uncorrectable_errors,
        "GPU_ECC_UNCORRECT_UMC" => stats.umc_uncorrectable_errors,
        "GPU_ECC_UNCORRECT_MCA" => stats.mca_uncorrectable_errors,
        "GPU_ECC_UNCORRECT_VCN" => stats.vcn_uncorrectable_errors,
        "GPU_ECC_UNCORRECT_JPEG" => stats.jpeg_uncorrectable_errors,
        "GPU_ECC_UNCORRECT_IH" => stats.ih_uncorrectable_errors,
        "GPU_ECC_UNCORRECT_MPIO" => stats.mpio_uncorrectable_errors,
        _ => 0,
    }
}

/// ECC verdict for one device.
///
/// A mock count, when present, replaces the live counter. The device is
/// unhealthy as soon as any count is strictly above its threshold, so a
/// threshold of 0 trips on any nonzero count.
pub fn evaluate_device(gpu: &Gpu, config: &MetricConfig, mocks: &MockCounts) -> Verdict {
    let id = gpu
        .status
        .as_ref()
        .map(|s| s.index.to_string())
        .unwrap_or_default();
    let default_stats = GpuStats::default();
    let stats = gpu.stats.as_ref().unwrap_or(&default_stats);

    let mut verdict = Verdict::Healthy;
    for field in ECC_HEALTH_FIELDS {
        let threshold = config.health_threshold(field);
        let count = match mocks.get(field) {
            Some(&mock) if mock > 0 => f64::from(mock),
            _ => normalize(uncorrectable_count(stats, field)),
        };
        if count > f64::from(threshold) {
            info!(
                "gpuid[{id}] is set to unhealthy for ecc field [{field}] error crossing threshold {threshold}, current value {count}"
            );
            verdict = Verdict::Unhealthy;
        }
    }
    verdict
}

fn device_state(
    gpu: &Gpu,
    workloads: &HashMap<String, Workload>,
    sysfs: &SysfsDevices,
    verdict: Verdict,
) -> Option<HealthState> {
    let status = gpu.status.as_ref()?;
    let id = status.index.to_string();
    let device = status
        .pcie_status
        .as_ref()
        .map(|p| p.pcie_bus_id.to_lowercase())
        .unwrap_or_default();
    let uuid = gpu
        .spec
        .as_ref()
        .map(|s| format_uuid(&s.id))
        .unwrap_or_default();
    let workload = resolve_workload(workloads, &device, sysfs.logical_name(&id), status.index);
    Some(HealthState {
        id,
        uuid,
        verdict,
        device,
        workloads: workload.map(|w| w.to_string()).into_iter().collect(),
    })
}

/// Fresh ECC-only states for every device in `gpus`.
pub fn build_states(
    gpus: &[Gpu],
    workloads: &HashMap<String, Workload>,
    sysfs: &SysfsDevices,
    config: &MetricConfig,
    store: &HealthStore,
) -> BTreeMap<String, HealthState> {
    gpus.iter()
        .filter_map(|gpu| {
            let id = gpu.status.as_ref()?.index.to_string();
            let verdict = evaluate_device(gpu, config, &store.mocks_for(&id));
            device_state(gpu, workloads, sysfs, verdict).map(|s| (s.id.clone(), s))
        })
        .collect()
}

/// Label changes needed so that exactly the unhealthy devices carry a
/// state label. Returns `(add, remove)`.
pub fn label_patch(
    existing: &BTreeMap<String, String>,
    states: &BTreeMap<String, HealthState>,
) -> (BTreeMap<String, String>, Vec<String>) {
    let mut add = BTreeMap::new();
    let mut remove = Vec::new();
    for i in 0..ExporterConfig::MAX_GPU_PER_SERVER {
        let key = EnvConfig::node_health_label(i);
        let desired = states
            .get(&i.to_string())
            .filter(|s| !s.verdict.is_healthy())
            .map(|s| s.verdict.as_str());
        match (desired, existing.get(&key)) {
            (Some(want), Some(have)) if have == want => {}
            (Some(want), _) => {
                add.insert(key, want.to_string());
            }
            (None, Some(_)) => remove.push(key),
            (None, None) => {}
        }
    }
    (add, remove)
}

fn workload_strings(workloads: &HashMap<String, Workload>) -> HashMap<String, String> {
    workloads
        .iter()
        .map(|(k, v)| (k.clone(), v.to_string()))
        .collect()
}

pub struct HealthEngine {
    client: Arc<dyn MetricsClient>,
    scheduler: Arc<dyn SchedulerClient>,
    labeler: Option<Arc<dyn NodeLabeler>>,
    store: Arc<HealthStore>,
    config: Arc<ConfigStore>,
    sysfs: Arc<SysfsDevices>,
    node_name: String,
    interval: Duration,
}

impl HealthEngine {
    pub fn new(
        client: Arc<dyn MetricsClient>,
        scheduler: Arc<dyn SchedulerClient>,
        store: Arc<HealthStore>,
        config: Arc<ConfigStore>,
        sysfs: Arc<SysfsDevices>,
    ) -> Self {
        Self {
            client,
            scheduler,
            labeler: None,
            store,
            config,
            sysfs,
            node_name: String::new(),
            interval: EnvConfig::refresh_interval(),
        }
    }

    /// Mirror verdicts onto `node` through `labeler`.
    pub fn with_labeler(mut self, labeler: Arc<dyn NodeLabeler>, node_name: impl Into<String>) -> Self {
        self.labeler = Some(labeler);
        self.node_name = node_name.into();
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn store(&self) -> &Arc<HealthStore> {
        &self.store
    }

    /// Tick until `cancel` fires. The first tick runs immediately.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("health loop started, interval {:?}", self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!("health check failed: {e}");
                    }
                    if let Err(e) = self.sync_node_labels().await {
                        warn!("node label update failed: {e}");
                    }
                }
            }
        }
        info!("health loop stopped");
    }

    async fn list_workloads(&self) -> HashMap<String, Workload> {
        match self.scheduler.list_workloads().await {
            Ok(wls) => wls,
            Err(e) => {
                warn!("Error listing workloads: {e}");
                HashMap::new()
            }
        }
    }

    /// One evaluation pass.
    pub async fn tick(&self) -> Result<()> {
        let workloads = self.list_workloads().await;
        let wl_strings = workload_strings(&workloads);

        if !self.store.compute_node_healthy() {
            warn!("compute node unhealthy, skipping device evaluation");
            self.store.mark_all(Verdict::Unhealthy, Some(&wl_strings));
            return Ok(());
        }

        let snapshot = match self.client.get_gpus().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.client.close().await;
                self.store.mark_all(Verdict::Unhealthy, Some(&wl_strings));
                return Err(e);
            }
        };
        if snapshot.is_empty() {
            // driver gone: keep the old device set, all unhealthy
            warn!("gpuagent returned no devices; marking known devices unhealthy");
            self.store.mark_all(Verdict::Unhealthy, Some(&wl_strings));
            return Ok(());
        }

        let config = self.config.config();
        let mut states = build_states(
            &snapshot.gpus,
            &workloads,
            &self.sysfs,
            &config,
            &self.store,
        );

        let events = match self.client.get_events(EventSeverity::Critical).await {
            Ok(events) => events,
            Err(e) => {
                self.client.close().await;
                self.store.mark_all(Verdict::Unhealthy, Some(&wl_strings));
                return Err(e);
            }
        };
        let by_uuid: HashMap<String, String> = states
            .values()
            .map(|s| (s.uuid.clone(), s.id.clone()))
            .collect();
        for event in &events {
            let uuid = format_uuid(&event.gpu);
            let time = event
                .time
                .as_ref()
                .and_then(|t| chrono::DateTime::from_timestamp(t.seconds, t.nanos.max(0) as u32))
                .map(|t| t.to_rfc3339())
                .unwrap_or_default();
            debug!(
                "evt id={} gpuid={uuid} severity={:?} time={time} description={}",
                event.id,
                event.severity(),
                event.description
            );
            if event.severity() != EventSeverity::Critical {
                continue;
            }
            match by_uuid.get(&uuid).and_then(|id| states.get_mut(id)) {
                Some(state) => {
                    info!("gpuid[{}] is set to unhealthy for evt[{}]", state.id, event.id);
                    state.verdict = Verdict::Unhealthy;
                }
                None => debug!("ignoring event {} for unknown gpu {uuid}", event.id),
            }
        }

        self.store.replace(states);
        Ok(())
    }

    /// Patch node labels so they match the current verdicts.
    pub async fn sync_node_labels(&self) -> Result<()> {
        let Some(labeler) = self.labeler.as_ref() else {
            return Ok(());
        };
        let existing = labeler.node_labels(&self.node_name).await?;
        let (add, remove) = label_patch(&existing, &self.store.states());
        if add.is_empty() && remove.is_empty() {
            return Ok(());
        }
        info!(
            "patching node {} labels: add {:?}, remove {:?}",
            self.node_name, add, remove
        );
        labeler
            .patch_node_labels(&self.node_name, &add, &remove)
            .await
    }

    /// Set the compute-node flag. Devices follow it at once; when no state
    /// exists yet the device list is fetched to seed one.
    pub async fn set_compute_node_health(&self, healthy: bool) -> Result<()> {
        if !self.store.set_compute_node_healthy(healthy) || !self.store.is_empty() {
            return Ok(());
        }
        let workloads = self.list_workloads().await;
        let snapshot = self.client.get_gpus().await?;
        let verdict = if healthy {
            Verdict::Healthy
        } else {
            Verdict::Unhealthy
        };
        let states = snapshot
            .gpus
            .iter()
            .filter_map(|gpu| device_state(gpu, &workloads, &self.sysfs, verdict))
            .map(|s| (s.id.clone(), s))
            .collect();
        self.store.replace(states);
        Ok(())
    }
}
