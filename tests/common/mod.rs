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

//! Fakes for the GPU agent, the workload source and the orchestrator.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use amd_metrics_exporter::collector::Collector;
use amd_metrics_exporter::config::ConfigStore;
use amd_metrics_exporter::device::sysfs::SysfsDevices;
use amd_metrics_exporter::error::{Error, Result};
use amd_metrics_exporter::gpuagent::build_snapshot;
use amd_metrics_exporter::health::{HealthEngine, HealthStore};
use amd_metrics_exporter::proto::amdgpu::{
    Event, EventSeverity, Gpu, GpuPcieStatus, GpuSpec, GpuStats, GpuStatus,
};
use amd_metrics_exporter::scheduler::{SchedulerKind, Workload};
use amd_metrics_exporter::traits::{
    GpuSnapshot, MetricsClient, NodeLabeler, PodLabels, SchedulerClient,
};

pub const UUID0: &str = "72ff740f-0000-1000-804c-3b58bf67050e";
pub const UUID1: &str = "72ff740f-0000-1000-804c-3b58bf670511";

pub fn uuid_bytes(uuid: &str) -> Vec<u8> {
    uuid::Uuid::parse_str(uuid).unwrap().as_bytes().to_vec()
}

pub fn gpu(index: u32, uuid: &str, serial: &str) -> Gpu {
    Gpu {
        spec: Some(GpuSpec {
            id: uuid_bytes(uuid),
            ..Default::default()
        }),
        status: Some(GpuStatus {
            index,
            serial_num: serial.to_string(),
            card_model: "MI300X".to_string(),
            card_series: "AMD Instinct".to_string(),
            card_vendor: "Advanced Micro Devices, Inc. [AMD/ATI]".to_string(),
            pcie_status: Some(GpuPcieStatus {
                pcie_bus_id: format!("0000:{:02x}:00.0", 0x0c + index),
                ..Default::default()
            }),
            kfd_id: 1000 + index,
            ..Default::default()
        }),
        stats: Some(GpuStats {
            package_power: 41,
            ..Default::default()
        }),
    }
}

/// The two devices used by most scenarios.
pub fn two_gpus() -> Vec<Gpu> {
    vec![gpu(0, UUID0, "A"), gpu(1, UUID1, "B")]
}

#[derive(Default)]
pub struct FakeAgent {
    gpus: Mutex<Vec<Gpu>>,
    events: Mutex<Vec<Event>>,
    fail: Mutex<bool>,
    closes: AtomicUsize,
}

impl FakeAgent {
    pub fn new(gpus: Vec<Gpu>) -> Arc<Self> {
        let agent = Self::default();
        *agent.gpus.lock().unwrap() = gpus;
        Arc::new(agent)
    }

    pub fn set_gpus(&self, gpus: Vec<Gpu>) {
        *self.gpus.lock().unwrap() = gpus;
    }

    pub fn update_gpu(&self, index: usize, f: impl FnOnce(&mut Gpu)) {
        f(&mut self.gpus.lock().unwrap()[index]);
    }

    pub fn push_event(&self, uuid: &str, severity: EventSeverity) {
        let mut events = self.events.lock().unwrap();
        let id = events.len() as u64 + 1;
        events.push(Event {
            id,
            gpu: uuid_bytes(uuid),
            severity: severity as i32,
            time: None,
            description: "test event".to_string(),
        });
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsClient for FakeAgent {
    async fn get_gpus(&self) -> Result<GpuSnapshot> {
        if *self.fail.lock().unwrap() {
            return Err(Error::AgentUnavailable);
        }
        Ok(build_snapshot(self.gpus.lock().unwrap().clone()))
    }

    async fn get_events(&self, severity: EventSeverity) -> Result<Vec<Event>> {
        if *self.fail.lock().unwrap() {
            return Err(Error::AgentUnavailable);
        }
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| severity == EventSeverity::None || e.severity() == severity)
            .cloned()
            .collect())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeScheduler {
    workloads: Mutex<HashMap<String, Workload>>,
}

impl FakeScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, key: &str, workload: Workload) {
        self.workloads
            .lock()
            .unwrap()
            .insert(key.to_string(), workload);
    }
}

#[async_trait]
impl SchedulerClient for FakeScheduler {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::Kubernetes
    }

    async fn list_workloads(&self) -> Result<HashMap<String, Workload>> {
        Ok(self.workloads.lock().unwrap().clone())
    }
}

/// In-memory node object.
#[derive(Default)]
pub struct FakeLabeler {
    pub labels: Mutex<BTreeMap<String, String>>,
    pub pods: Mutex<PodLabels>,
    pub patches: AtomicUsize,
}

impl FakeLabeler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn label(&self, key: &str) -> Option<String> {
        self.labels.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl NodeLabeler for FakeLabeler {
    async fn node_labels(&self, _node: &str) -> Result<BTreeMap<String, String>> {
        Ok(self.labels.lock().unwrap().clone())
    }

    async fn patch_node_labels(
        &self,
        _node: &str,
        add: &BTreeMap<String, String>,
        remove: &[String],
    ) -> Result<()> {
        self.patches.fetch_add(1, Ordering::SeqCst);
        let mut labels = self.labels.lock().unwrap();
        for key in remove {
            labels.remove(key);
        }
        labels.extend(add.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn pod_labels(&self, _node: &str) -> Result<PodLabels> {
        Ok(self.pods.lock().unwrap().clone())
    }
}

/// Sysfs handle with no partitions and an empty topology directory.
pub fn empty_sysfs(dir: &Path) -> Arc<SysfsDevices> {
    let pattern = dir.join("platform/amdgpu_xcp_*/drm/renderD*");
    Arc::new(SysfsDevices::with_paths(
        &pattern.to_string_lossy(),
        dir.join("nodes"),
    ))
}

/// Wiring shared by the scrape and health suites.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub agent: Arc<FakeAgent>,
    pub scheduler: Arc<FakeScheduler>,
    pub labeler: Arc<FakeLabeler>,
    pub config: Arc<ConfigStore>,
    pub health: Arc<HealthStore>,
    pub sysfs: Arc<SysfsDevices>,
}

impl Harness {
    pub fn new(gpus: Vec<Gpu>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(ConfigStore::new(dir.path().join("config.json"), 50061));
        let _ = config.refresh();
        let sysfs = empty_sysfs(dir.path());
        Self {
            agent: FakeAgent::new(gpus),
            scheduler: FakeScheduler::new(),
            labeler: FakeLabeler::new(),
            config,
            health: Arc::new(HealthStore::new()),
            sysfs,
            dir,
        }
    }

    pub fn config_path(&self) -> std::path::PathBuf {
        self.dir.path().join("config.json")
    }

    /// Replace the config document and reload the store.
    pub fn write_config(&self, doc: &str) {
        std::fs::write(self.config_path(), doc).unwrap();
        self.config.refresh().unwrap();
    }

    pub fn collector(&self) -> Collector {
        Collector::new(
            self.agent.clone(),
            self.scheduler.clone(),
            self.sysfs.clone(),
            self.health.clone(),
            self.config.clone(),
            "test-host",
        )
        .with_labeler(self.labeler.clone())
    }

    pub fn engine(&self) -> HealthEngine {
        HealthEngine::new(
            self.agent.clone(),
            self.scheduler.clone(),
            self.health.clone(),
            self.config.clone(),
            self.sysfs.clone(),
        )
        .with_labeler(self.labeler.clone(), "test-node")
    }
}

/// Sample lines of `family` in a rendered exposition.
pub fn samples<'a>(body: &'a str, family: &str) -> Vec<&'a str> {
    let prefix = format!("{family}{{");
    body.lines()
        .filter(|l| l.starts_with(&prefix) || l.starts_with(&format!("{family} ")))
        .collect()
}

/// The sample of `family` carrying every `k="v"` pair in `labels`.
pub fn find_sample<'a>(body: &'a str, family: &str, labels: &[(&str, &str)]) -> Option<&'a str> {
    samples(body, family).into_iter().find(|line| {
        labels
            .iter()
            .all(|(k, v)| line.contains(&format!("{k}=\"{v}\"")))
    })
}

/// Label keys of a sample line, in order.
pub fn label_keys(line: &str) -> Vec<String> {
    let Some(start) = line.find('{') else {
        return Vec::new();
    };
    let end = line.rfind('}').unwrap();
    line[start + 1..end]
        .split("\",")
        .filter_map(|pair| pair.split_once('=').map(|(k, _)| k.to_string()))
        .collect()
}

pub fn value(line: &str) -> f64 {
    line.rsplit(' ').next().unwrap().parse().unwrap()
}
