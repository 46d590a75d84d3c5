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

//! Client for the local GPU agent.
//!
//! The connection is established lazily on first use and dropped on any
//! transport fault; the next call (or the next health tick) reconnects.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info, warn};

use crate::common::config::{EnvConfig, ExporterConfig};
use crate::error::{Error, Result};
use crate::proto::amdgpu::event_filter::Filter;
use crate::proto::amdgpu::event_svc_client::EventSvcClient;
use crate::proto::amdgpu::gpu_svc_client::GpuSvcClient;
use crate::proto::amdgpu::{
    Event, EventFilter, EventMatchAttrs, EventRequest, EventSeverity, Gpu, GpuGetRequest,
};
use crate::traits::{GpuSnapshot, MetricsClient};
use crate::utils::pcie_base_address;

#[derive(Clone)]
struct AgentStubs {
    gpu: GpuSvcClient<Channel>,
    event: EventSvcClient<Channel>,
}

pub struct GpuAgentClient {
    addr: String,
    timeout: Duration,
    stubs: Mutex<Option<AgentStubs>>,
}

impl GpuAgentClient {
    /// `addr` is a URI such as `http://0.0.0.0:50061`.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: EnvConfig::query_timeout(),
            stubs: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn is_connected(&self) -> bool {
        self.stubs.lock().await.is_some()
    }

    async fn stubs(&self) -> Result<AgentStubs> {
        let mut guard = self.stubs.lock().await;
        if let Some(stubs) = guard.as_ref() {
            return Ok(stubs.clone());
        }

        info!("Agent connecting to {}", self.addr);
        let channel = Endpoint::from_shared(self.addr.clone())?
            .connect_timeout(Duration::from_secs(ExporterConfig::CONNECT_TIMEOUT_SECS))
            .timeout(self.timeout)
            .connect()
            .await?;
        let stubs = AgentStubs {
            gpu: GpuSvcClient::new(channel.clone()),
            event: EventSvcClient::new(channel),
        };
        *guard = Some(stubs.clone());
        Ok(stubs)
    }

    async fn on_rpc_error(&self, status: tonic::Status) -> Error {
        warn!("gpuagent call failed: {status}");
        if matches!(
            status.code(),
            tonic::Code::Unavailable | tonic::Code::Unknown | tonic::Code::Cancelled
        ) {
            self.close().await;
        }
        Error::Rpc(status)
    }
}

/// Split a device listing into exported devices and the partition map.
///
/// A partition-0 device whose PCIe address carries a function suffix is
/// recorded under its base address. Devices that list logical partitions
/// are physical parents and are not exported themselves.
pub fn build_snapshot(response: Vec<Gpu>) -> GpuSnapshot {
    let mut snapshot = GpuSnapshot::default();
    for gpu in response {
        let Some(status) = gpu.status.as_ref() else {
            snapshot.gpus.push(gpu);
            continue;
        };
        if let Some(pcie) = status.pcie_status.as_ref() {
            let addr = pcie.pcie_bus_id.to_lowercase();
            let base = pcie_base_address(&addr);
            if base != addr && status.partition_id == 0 {
                snapshot.partitions.insert(base.to_string(), gpu.clone());
            }
        }
        if !status.gpu_partition.is_empty() {
            continue;
        }
        snapshot.gpus.push(gpu);
    }
    snapshot
}

#[async_trait]
impl MetricsClient for GpuAgentClient {
    async fn get_gpus(&self) -> Result<GpuSnapshot> {
        let mut stubs = self.stubs().await?;
        let resp = match stubs.gpu.gpu_get(GpuGetRequest { id: Vec::new() }).await {
            Ok(resp) => resp.into_inner(),
            Err(status) => return Err(self.on_rpc_error(status).await),
        };
        if resp.api_status != 0 {
            warn!("gpuagent api status {}", resp.api_status);
            return Err(Error::AgentStatus(resp.api_status));
        }
        let snapshot = build_snapshot(resp.response);
        debug!(
            "gpuagent returned {} gpus, {} partition parents",
            snapshot.gpus.len(),
            snapshot.partitions.len()
        );
        Ok(snapshot)
    }

    async fn get_events(&self, severity: EventSeverity) -> Result<Vec<Event>> {
        let mut stubs = self.stubs().await?;
        let mut req = EventRequest { filter: None };
        if severity != EventSeverity::None {
            req.filter = Some(EventFilter {
                filter: Some(Filter::MatchAttrs(EventMatchAttrs {
                    severity: severity as i32,
                    gpu: Vec::new(),
                })),
            });
        }
        let resp = match stubs.event.event_get(req).await {
            Ok(resp) => resp.into_inner(),
            Err(status) => return Err(self.on_rpc_error(status).await),
        };
        if resp.api_status != 0 {
            return Err(Error::AgentStatus(resp.api_status));
        }
        Ok(resp.event)
    }

    async fn close(&self) {
        if self.stubs.lock().await.take().is_some() {
            info!("gpuagent client closing");
        }
    }
}
