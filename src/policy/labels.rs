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

use tracing::{debug, warn};

use crate::common::config::ExporterConfig;
use crate::config::GpuConfig;

/// Every label the exporter knows how to populate, in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GpuLabel {
    GpuId,
    SerialNumber,
    CardModel,
    Hostname,
    GpuPartitionId,
    GpuComputePartitionType,
    GpuMemoryPartitionType,
    GpuUuid,
    Pod,
    Namespace,
    Container,
    JobId,
    JobUser,
    JobPartition,
    ClusterName,
    CardSeries,
    CardVendor,
    DriverVersion,
    VbiosVersion,
}

impl GpuLabel {
    pub const ALL: [GpuLabel; 19] = [
        GpuLabel::GpuId,
        GpuLabel::SerialNumber,
        GpuLabel::CardModel,
        GpuLabel::Hostname,
        GpuLabel::GpuPartitionId,
        GpuLabel::GpuComputePartitionType,
        GpuLabel::GpuMemoryPartitionType,
        GpuLabel::GpuUuid,
        GpuLabel::Pod,
        GpuLabel::Namespace,
        GpuLabel::Container,
        GpuLabel::JobId,
        GpuLabel::JobUser,
        GpuLabel::JobPartition,
        GpuLabel::ClusterName,
        GpuLabel::CardSeries,
        GpuLabel::CardVendor,
        GpuLabel::DriverVersion,
        GpuLabel::VbiosVersion,
    ];

    pub const MANDATORY: [GpuLabel; 7] = [
        GpuLabel::GpuId,
        GpuLabel::SerialNumber,
        GpuLabel::CardModel,
        GpuLabel::Hostname,
        GpuLabel::GpuPartitionId,
        GpuLabel::GpuComputePartitionType,
        GpuLabel::GpuMemoryPartitionType,
    ];

    /// Labels whose value an operator may set through custom labels.
    pub const CUSTOMIZABLE: [GpuLabel; 1] = [GpuLabel::ClusterName];

    /// Canonical upper-snake name, as written in config files.
    pub fn canonical(&self) -> &'static str {
        match self {
            GpuLabel::GpuId => "GPU_ID",
            GpuLabel::SerialNumber => "SERIAL_NUMBER",
            GpuLabel::CardModel => "CARD_MODEL",
            GpuLabel::Hostname => "HOSTNAME",
            GpuLabel::GpuPartitionId => "GPU_PARTITION_ID",
            GpuLabel::GpuComputePartitionType => "GPU_COMPUTE_PARTITION_TYPE",
            GpuLabel::GpuMemoryPartitionType => "GPU_MEMORY_PARTITION_TYPE",
            GpuLabel::GpuUuid => "GPU_UUID",
            GpuLabel::Pod => "POD",
            GpuLabel::Namespace => "NAMESPACE",
            GpuLabel::Container => "CONTAINER",
            GpuLabel::JobId => "JOB_ID",
            GpuLabel::JobUser => "JOB_USER",
            GpuLabel::JobPartition => "JOB_PARTITION",
            GpuLabel::ClusterName => "CLUSTER_NAME",
            GpuLabel::CardSeries => "CARD_SERIES",
            GpuLabel::CardVendor => "CARD_VENDOR",
            GpuLabel::DriverVersion => "DRIVER_VERSION",
            GpuLabel::VbiosVersion => "VBIOS_VERSION",
        }
    }

    /// Exported label key.
    pub fn key(&self) -> String {
        self.canonical().to_lowercase()
    }

    pub fn from_name(name: &str) -> Option<GpuLabel> {
        let upper = name.trim().to_uppercase();
        Self::ALL.into_iter().find(|l| l.canonical() == upper)
    }

    pub fn is_mandatory(&self) -> bool {
        Self::MANDATORY.contains(self)
    }

    /// Labels carried by host-scope samples such as `gpu_nodes_total`.
    pub fn is_host_scope(&self) -> bool {
        matches!(self, GpuLabel::Hostname)
    }
}

/// Effective label set for one config epoch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LabelPolicy {
    enabled: Vec<GpuLabel>,
    custom: Vec<(String, String)>,
    extra_pod: Vec<(String, String)>,
}

impl LabelPolicy {
    pub fn resolve(config: Option<&GpuConfig>) -> Self {
        let mut enabled: Vec<GpuLabel> = GpuLabel::MANDATORY.to_vec();
        if let Some(cfg) = config {
            for name in &cfg.labels {
                match GpuLabel::from_name(name) {
                    Some(label) => {
                        if !enabled.contains(&label) {
                            debug!("label {} enabled", label.canonical());
                            enabled.push(label);
                        }
                    }
                    None => warn!("Unknown label {name} ignored"),
                }
            }
        }
        enabled.sort();

        let custom = config.map(resolve_custom_labels).unwrap_or_default();
        let extra_pod = config.map(resolve_extra_pod_labels).unwrap_or_default();

        Self {
            enabled,
            custom,
            extra_pod,
        }
    }

    pub fn enabled(&self) -> &[GpuLabel] {
        &self.enabled
    }

    pub fn is_enabled(&self, label: GpuLabel) -> bool {
        self.enabled.contains(&label)
    }

    pub fn custom_labels(&self) -> &[(String, String)] {
        &self.custom
    }

    /// `(exported_label, pod_label_key)` pairs.
    pub fn extra_pod_labels(&self) -> &[(String, String)] {
        &self.extra_pod
    }

    /// Leading label dimensions shared by every device-scope family.
    pub fn base_dimensions(&self) -> Vec<String> {
        self.enabled.iter().map(GpuLabel::key).collect()
    }

    /// Dimensions appended after any index labels: extra pod labels then
    /// custom labels, skipping keys already present.
    pub fn trailing_dimensions(&self) -> Vec<String> {
        let base = self.base_dimensions();
        let mut out: Vec<String> = Vec::new();
        let extra = self.extra_pod.iter().map(|(k, _)| k);
        let custom = self.custom.iter().map(|(k, _)| k);
        for key in extra.chain(custom) {
            if !base.contains(key) && !out.contains(key) {
                out.push(key.clone());
            }
        }
        out
    }

    /// Dimensions of host-scope families.
    pub fn host_dimensions(&self) -> Vec<String> {
        let mut dims: Vec<String> = self
            .enabled
            .iter()
            .filter(|l| l.is_host_scope())
            .map(GpuLabel::key)
            .collect();
        for (key, _) in &self.custom {
            if !dims.contains(key) {
                dims.push(key.clone());
            }
        }
        dims
    }
}

fn reserved_label_keys() -> Vec<String> {
    GpuLabel::ALL
        .iter()
        .filter(|l| !GpuLabel::CUSTOMIZABLE.contains(l))
        .map(GpuLabel::key)
        .collect()
}

fn resolve_custom_labels(cfg: &GpuConfig) -> Vec<(String, String)> {
    let reserved = reserved_label_keys();
    let mut out: Vec<(String, String)> = Vec::new();
    for (name, value) in &cfg.custom_labels {
        if out.len() >= ExporterConfig::MAX_CUSTOM_LABELS {
            warn!(
                "Max custom labels supported: {}, ignoring extra labels",
                ExporterConfig::MAX_CUSTOM_LABELS
            );
            break;
        }
        let key = name.to_lowercase();
        if reserved.contains(&key) {
            warn!("Label {key} cannot be customized, ignoring");
            continue;
        }
        if out.iter().any(|(k, _)| *k == key) {
            continue;
        }
        out.push((key, value.clone()));
    }
    out
}

fn resolve_extra_pod_labels(cfg: &GpuConfig) -> Vec<(String, String)> {
    let builtin: Vec<String> = GpuLabel::ALL.iter().map(GpuLabel::key).collect();
    let mut out: Vec<(String, String)> = Vec::new();
    for (exported, pod_key) in &cfg.extra_pod_labels {
        if out.len() >= ExporterConfig::MAX_EXTRA_POD_LABELS {
            warn!(
                "Max extra pod labels supported: {}, ignoring extra labels",
                ExporterConfig::MAX_EXTRA_POD_LABELS
            );
            break;
        }
        let key = exported.to_lowercase();
        if builtin.contains(&key) {
            warn!("Extra pod label {key} collides with a built-in label, ignoring");
            continue;
        }
        if out.iter().any(|(k, _)| *k == key) {
            continue;
        }
        out.push((key, pod_key.clone()));
    }
    out
}
