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

//! Scrape-time collection.
//!
//! A scrape resets the registry, then gathers the device snapshot, the
//! workload map, the partition map and the kernel VRAM counters (in that
//! order) and emits one sample set per selected device.

pub mod emit;
pub mod labels;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::metrics::fields::GPU_NODES_TOTAL;
use crate::api::metrics::{MetricSink, Registry};
use crate::config::ConfigStore;
use crate::device::profiler::{ProfileSnapshot, ProfilerClient};
use crate::device::sysfs::SysfsDevices;
use crate::error::Result;
use crate::health::engine::build_states;
use crate::health::HealthStore;
use crate::policy::Policy;
use crate::scheduler::{resolve_workload, Workload};
use crate::traits::{MetricsClient, NodeLabeler, PodLabels, SchedulerClient};
use crate::utils::pcie_base_address;

pub use emit::{emit_device, DeviceExtras};
pub use labels::{device_labels, host_labels, DeviceContext};

pub struct Collector {
    client: Arc<dyn MetricsClient>,
    scheduler: Arc<dyn SchedulerClient>,
    labeler: Option<Arc<dyn NodeLabeler>>,
    sysfs: Arc<SysfsDevices>,
    profiler: Option<ProfilerClient>,
    health: Arc<HealthStore>,
    config: Arc<ConfigStore>,
    hostname: String,
    registry: Mutex<Registry>,
}

impl Collector {
    pub fn new(
        client: Arc<dyn MetricsClient>,
        scheduler: Arc<dyn SchedulerClient>,
        sysfs: Arc<SysfsDevices>,
        health: Arc<HealthStore>,
        config: Arc<ConfigStore>,
        hostname: impl Into<String>,
    ) -> Self {
        let hostname = hostname.into();
        let policy = Policy::resolve(&config.config(), &hostname, false);
        Self {
            client,
            scheduler,
            labeler: None,
            sysfs,
            profiler: None,
            health,
            config,
            hostname,
            registry: Mutex::new(Registry::new(policy)),
        }
    }

    /// Pod metadata source for extra pod labels.
    pub fn with_labeler(mut self, labeler: Arc<dyn NodeLabeler>) -> Self {
        self.labeler = Some(labeler);
        self
    }

    /// Allow profiler families; the config must still enable this host.
    pub fn with_profiler(mut self, profiler: ProfilerClient) -> Self {
        self.profiler = Some(profiler);
        let policy = self.resolve_policy();
        self.registry.get_mut().rebuild(policy);
        self
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    fn resolve_policy(&self) -> Policy {
        Policy::resolve(
            &self.config.config(),
            &self.hostname,
            self.profiler.is_some(),
        )
    }

    pub async fn policy(&self) -> Policy {
        self.registry.lock().await.policy().clone()
    }

    /// Start a new config epoch: re-resolve policy, rebuild the registry and
    /// populate it once. Health is re-seeded by this first pass.
    pub async fn rebuild(&self) {
        let policy = self.resolve_policy();
        let mut registry = self.registry.lock().await;
        registry.rebuild(policy);
        self.health.unseed();
        if let Err(e) = self.update_stats(&mut registry).await {
            warn!("initial metrics population failed: {e}");
        }
    }

    /// Reset, repopulate and render. Collection errors leave the registry
    /// partially filled; the scrape itself never fails.
    pub async fn scrape(&self) -> String {
        let mut registry = self.registry.lock().await;
        registry.reset();
        if let Err(e) = self.update_stats(&mut registry).await {
            warn!("metrics update failed: {e}");
        }
        registry.render()
    }

    async fn workloads(&self) -> HashMap<String, Workload> {
        match self.scheduler.list_workloads().await {
            Ok(wls) => wls,
            Err(e) => {
                warn!("Error listing workloads: {e}");
                HashMap::new()
            }
        }
    }

    async fn pod_labels(&self, policy: &Policy) -> PodLabels {
        let Some(labeler) = self.labeler.as_ref() else {
            return PodLabels::new();
        };
        if policy.labels.extra_pod_labels().is_empty() {
            return PodLabels::new();
        }
        match labeler.pod_labels(&self.hostname).await {
            Ok(pods) => pods,
            Err(e) => {
                warn!("failed to list pods on {}: {e}", self.hostname);
                PodLabels::new()
            }
        }
    }

    async fn profile(&self, policy: &Policy) -> ProfileSnapshot {
        let Some(profiler) = self.profiler.as_ref().filter(|_| policy.profiling) else {
            return ProfileSnapshot::new();
        };
        match profiler.metrics(&policy.fields.profiler_counters()).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!("profiler metrics unavailable: {e}");
                ProfileSnapshot::new()
            }
        }
    }

    /// Populate `registry` from live sources.
    pub async fn update_stats(&self, registry: &mut Registry) -> Result<()> {
        let policy = registry.policy().clone();

        let snapshot = self.client.get_gpus().await?;
        let workloads = self.workloads().await;
        let partitions = &snapshot.partitions;
        let used_vram = self.sysfs.used_vram();
        let pod_labels = self.pod_labels(&policy).await;
        let profile = self.profile(&policy).await;

        if !self.health.is_seeded() {
            info!("seeding health state from {} gpus", snapshot.gpus.len());
            let states = build_states(
                &snapshot.gpus,
                &workloads,
                &self.sysfs,
                &self.config.config(),
                &self.health,
            );
            self.health.replace(states);
        }

        registry.set(
            GPU_NODES_TOTAL,
            &host_labels(&policy.labels, &self.hostname),
            snapshot.gpus.len() as f64,
        );

        for gpu in &snapshot.gpus {
            let Some(status) = gpu.status.as_ref() else {
                debug!("skipping gpu without status");
                continue;
            };
            if !policy.selector.is_selected(status.index) {
                continue;
            }
            let id = status.index.to_string();
            let pcie = status
                .pcie_status
                .as_ref()
                .map(|p| p.pcie_bus_id.to_lowercase())
                .unwrap_or_default();
            let workload =
                resolve_workload(&workloads, &pcie, self.sysfs.logical_name(&id), status.index);
            let pod = workload
                .and_then(Workload::container)
                .and_then(|c| pod_labels.get(&(c.namespace.clone(), c.pod.clone())));
            let ctx = DeviceContext {
                gpu,
                parent: partitions.get(pcie_base_address(&pcie)),
                workload,
                pod_labels: pod,
                hostname: &self.hostname,
            };
            let labels = device_labels(&policy.labels, &ctx);
            let extras = DeviceExtras {
                health: self.health.state(&id).map(|s| s.verdict),
                used_vram: used_vram.get(&status.kfd_id).copied(),
                profile: profile.get(&id),
            };
            emit_device(registry, &labels, gpu, &extras);
        }
        Ok(())
    }
}
