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

use std::collections::BTreeMap;

use crate::api::metrics::Labels;
use crate::policy::{GpuLabel, LabelPolicy};
use crate::proto::amdgpu::{Gpu, GpuStatus};
use crate::scheduler::Workload;
use crate::utils::format_uuid;

const COMPUTE_PARTITION_PREFIX: &str = "GPU_COMPUTE_PARTITION_TYPE_";
const MEMORY_PARTITION_PREFIX: &str = "GPU_MEMORY_PARTITION_TYPE_";

/// Everything label population needs to know about one device.
#[derive(Debug, Clone, Copy)]
pub struct DeviceContext<'a> {
    pub gpu: &'a Gpu,
    /// Partition-0 device sharing this device's PCIe base address.
    pub parent: Option<&'a Gpu>,
    pub workload: Option<&'a Workload>,
    pub pod_labels: Option<&'a BTreeMap<String, String>>,
    pub hostname: &'a str,
}

fn partition_type(name: &str, prefix: &str) -> String {
    name.strip_prefix(prefix).unwrap_or(name).to_lowercase()
}

/// Labels of host-scope samples.
pub fn host_labels(policy: &LabelPolicy, hostname: &str) -> Labels {
    let mut labels = Labels::new();
    labels.insert(GpuLabel::Hostname.key(), hostname.to_string());
    for (key, value) in policy.custom_labels() {
        labels.insert(key.clone(), value.clone());
    }
    labels
}

/// Base label set of a device. Index labels are added at emission sites.
pub fn device_labels(policy: &LabelPolicy, ctx: &DeviceContext<'_>) -> Labels {
    let default_status = GpuStatus::default();
    let status = ctx.gpu.status.as_ref().unwrap_or(&default_status);
    // identity attributes come from the partition parent when there is one
    let identity = ctx.parent.unwrap_or(ctx.gpu);
    let id_status = identity.status.as_ref().unwrap_or(status);
    let container = ctx.workload.and_then(Workload::container);
    let job = ctx.workload.and_then(Workload::job);

    let mut labels = Labels::new();
    for label in policy.enabled() {
        let value = match label {
            GpuLabel::GpuId => status.index.to_string(),
            GpuLabel::SerialNumber => id_status.serial_num.clone(),
            GpuLabel::CardModel => id_status.card_model.clone(),
            GpuLabel::CardSeries => id_status.card_series.clone(),
            GpuLabel::CardVendor => id_status.card_vendor.clone(),
            GpuLabel::DriverVersion => status.driver_version.clone(),
            GpuLabel::VbiosVersion => status.vbios_version.clone(),
            GpuLabel::Hostname => ctx.hostname.to_string(),
            GpuLabel::GpuPartitionId => status.partition_id.to_string(),
            GpuLabel::GpuComputePartitionType => identity
                .spec
                .as_ref()
                .map(|s| {
                    partition_type(
                        s.compute_partition_type().as_str_name(),
                        COMPUTE_PARTITION_PREFIX,
                    )
                })
                .unwrap_or_default(),
            GpuLabel::GpuMemoryPartitionType => identity
                .spec
                .as_ref()
                .map(|s| {
                    partition_type(
                        s.memory_partition_type().as_str_name(),
                        MEMORY_PARTITION_PREFIX,
                    )
                })
                .unwrap_or_default(),
            GpuLabel::GpuUuid => ctx
                .gpu
                .spec
                .as_ref()
                .map(|s| format_uuid(&s.id))
                .unwrap_or_default(),
            GpuLabel::Pod => container.map(|c| c.pod.clone()).unwrap_or_default(),
            GpuLabel::Namespace => container.map(|c| c.namespace.clone()).unwrap_or_default(),
            GpuLabel::Container => container.map(|c| c.container.clone()).unwrap_or_default(),
            GpuLabel::JobId => job.map(|j| j.id.clone()).unwrap_or_default(),
            GpuLabel::JobUser => job.map(|j| j.user.clone()).unwrap_or_default(),
            GpuLabel::JobPartition => job.map(|j| j.partition.clone()).unwrap_or_default(),
            GpuLabel::ClusterName => job.map(|j| j.cluster.clone()).unwrap_or_default(),
        };
        labels.insert(label.key(), value);
    }

    for (exported, pod_key) in policy.extra_pod_labels() {
        let value = ctx
            .pod_labels
            .and_then(|l| l.get(pod_key))
            .cloned()
            .unwrap_or_default();
        labels.insert(exported.clone(), value);
    }
    for (key, value) in policy.custom_labels() {
        labels.insert(key.clone(), value.clone());
    }
    labels
}
