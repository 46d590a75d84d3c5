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

use async_trait::async_trait;

use crate::error::Result;
use crate::proto::amdgpu::{Event, EventSeverity, Gpu};

/// One device listing from the agent.
#[derive(Debug, Clone, Default)]
pub struct GpuSnapshot {
    /// Devices to export. Physical parents of partitioned devices are
    /// filtered out.
    pub gpus: Vec<Gpu>,
    /// Partition-0 devices keyed by PCIe base address, used to resolve
    /// identity labels of sibling partitions.
    pub partitions: HashMap<String, Gpu>,
}

impl GpuSnapshot {
    pub fn is_empty(&self) -> bool {
        self.gpus.is_empty()
    }
}

/// Source of per-device statistics and events.
#[async_trait]
pub trait MetricsClient: Send + Sync {
    async fn get_gpus(&self) -> Result<GpuSnapshot>;

    /// Events, filtered by severity unless `severity` is NONE.
    async fn get_events(&self, severity: EventSeverity) -> Result<Vec<Event>>;

    /// Drop the connection; the next call reconnects.
    async fn close(&self);
}
