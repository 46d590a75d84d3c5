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
use crate::scheduler::{SchedulerKind, Workload};

/// Workload attribution source.
///
/// Keys are a lower-cased PCIe address, a logical device name such as
/// `amdgpu_xcp_3`, or a decimal device index.
#[async_trait]
pub trait SchedulerClient: Send + Sync {
    fn kind(&self) -> SchedulerKind;

    async fn list_workloads(&self) -> Result<HashMap<String, Workload>>;

    /// Stop background watchers.
    async fn close(&self) {}
}
