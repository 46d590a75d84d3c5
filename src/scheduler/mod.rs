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

//! Workload attribution: which container or batch job is using a device.

pub mod kubernetes;
pub mod slurm;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::Result;
use crate::traits::SchedulerClient;

pub use kubernetes::KubernetesScheduler;
pub use slurm::{SlurmOptions, SlurmScheduler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerKind {
    Kubernetes,
    Slurm,
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerKind::Kubernetes => write!(f, "Kubernetes"),
            SchedulerKind::Slurm => write!(f, "Slurm"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerInfo {
    pub pod: String,
    pub namespace: String,
    pub container: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobInfo {
    pub id: String,
    pub user: String,
    pub partition: String,
    pub cluster: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Workload {
    Container(ContainerInfo),
    Job(JobInfo),
}

impl Workload {
    pub fn kind(&self) -> SchedulerKind {
        match self {
            Workload::Container(_) => SchedulerKind::Kubernetes,
            Workload::Job(_) => SchedulerKind::Slurm,
        }
    }

    pub fn container(&self) -> Option<&ContainerInfo> {
        match self {
            Workload::Container(c) => Some(c),
            Workload::Job(_) => None,
        }
    }

    pub fn job(&self) -> Option<&JobInfo> {
        match self {
            Workload::Job(j) => Some(j),
            Workload::Container(_) => None,
        }
    }
}

/// Human-readable form reported on the health socket.
impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Workload::Container(c) => write!(
                f,
                "pod : {}, namespace : {}, container: {}",
                c.pod, c.namespace, c.container
            ),
            Workload::Job(j) => write!(
                f,
                "id: {}, user : {}, partition: {}, cluster: {}",
                j.id, j.user, j.partition, j.cluster
            ),
        }
    }
}

/// Look up the workload of a device, trying its PCIe address, then its
/// logical device name, then its index.
pub fn resolve_workload<'a>(
    workloads: &'a HashMap<String, Workload>,
    pcie_addr: &str,
    logical_name: Option<&str>,
    index: u32,
) -> Option<&'a Workload> {
    if !pcie_addr.is_empty() {
        if let Some(wl) = workloads.get(&pcie_addr.to_lowercase()) {
            return Some(wl);
        }
    }
    if let Some(name) = logical_name {
        if let Some(wl) = workloads.get(name) {
            return Some(wl);
        }
    }
    workloads.get(&index.to_string())
}

/// Pick the attribution source for this host.
pub async fn detect(
    kubernetes: bool,
    slurm: SlurmOptions,
    cancel: CancellationToken,
) -> Result<Arc<dyn SchedulerClient>> {
    if kubernetes {
        info!("Workload attribution via kubelet pod resources");
        Ok(Arc::new(KubernetesScheduler::default()))
    } else {
        info!("Workload attribution via batch job files");
        Ok(Arc::new(SlurmScheduler::start(slurm, cancel).await?))
    }
}
