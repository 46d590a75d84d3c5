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

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tonic::transport::Channel;
use tracing::{debug, info, warn};

use super::{ContainerInfo, SchedulerKind, Workload};
use crate::common::config::{EnvConfig, ExporterConfig};
use crate::error::Result;
use crate::proto::v1alpha1::pod_resources_lister_client::PodResourcesListerClient;
use crate::proto::v1alpha1::{ListPodResourcesRequest, ListPodResourcesResponse};
use crate::traits::SchedulerClient;
use crate::utils::uds::unix_channel;

/// Kubelet pod-resources client over its local UNIX socket.
pub struct KubernetesScheduler {
    socket: PathBuf,
    timeout: Duration,
    client: Mutex<Option<PodResourcesListerClient<Channel>>>,
}

impl Default for KubernetesScheduler {
    fn default() -> Self {
        Self::new(ExporterConfig::POD_RESOURCE_SOCKET)
    }
}

impl KubernetesScheduler {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
            timeout: EnvConfig::query_timeout(),
            client: Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<PodResourcesListerClient<Channel>> {
        let mut guard = self.client.lock().await;
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }

        let channel = unix_channel(&self.socket, self.timeout).await?;
        info!("Connected to kubelet at {}", self.socket.display());

        let client = PodResourcesListerClient::new(channel);
        *guard = Some(client.clone());
        Ok(client)
    }

    async fn list(&self) -> Result<ListPodResourcesResponse> {
        let mut client = self.connect().await?;
        match client.list(ListPodResourcesRequest {}).await {
            Ok(resp) => Ok(resp.into_inner()),
            Err(status) => {
                *self.client.lock().await = None;
                Err(status.into())
            }
        }
    }
}

/// Map every AMD GPU device id (lower-cased) to the container holding it.
pub fn workloads_from_pod_resources(resp: &ListPodResourcesResponse) -> HashMap<String, Workload> {
    let mut out = HashMap::new();
    for pod in &resp.pod_resources {
        for container in &pod.containers {
            for devices in &container.devices {
                if devices.resource_name != ExporterConfig::GPU_RESOURCE_NAME {
                    continue;
                }
                for id in &devices.device_ids {
                    out.insert(
                        id.to_lowercase(),
                        Workload::Container(ContainerInfo {
                            pod: pod.name.clone(),
                            namespace: pod.namespace.clone(),
                            container: container.name.clone(),
                        }),
                    );
                }
            }
        }
    }
    out
}

#[async_trait]
impl SchedulerClient for KubernetesScheduler {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::Kubernetes
    }

    /// Never fails: an unreachable kubelet yields no attribution.
    async fn list_workloads(&self) -> Result<HashMap<String, Workload>> {
        match self.list().await {
            Ok(resp) => {
                let wls = workloads_from_pod_resources(&resp);
                debug!("pod resources: {} gpu devices assigned", wls.len());
                Ok(wls)
            }
            Err(e) => {
                warn!("Failed to list pod resources: {e}");
                Ok(HashMap::new())
            }
        }
    }

    async fn close(&self) {
        *self.client.lock().await = None;
    }
}
