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

//! Typed view of the metrics config document.
//!
//! Every key is optional; an empty document `{}` is a valid config that
//! enables all fields and only the mandatory labels.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Top-level config document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MetricConfig {
    /// HTTP port; 0 means the built-in default.
    pub server_port: u32,
    #[serde(rename = "GPUConfig")]
    pub gpu_config: Option<GpuConfig>,
    pub common_config: Option<CommonConfig>,
}

/// Per-device export policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct GpuConfig {
    /// Opt-in label names, matched case-insensitively.
    pub labels: Vec<String>,
    /// Field allowlist; empty means every field is exported.
    pub fields: Vec<String>,
    /// Inclusive index ranges such as `"0-3,6"`.
    pub selector: String,
    /// Constant labels added to every device sample.
    pub custom_labels: BTreeMap<String, String>,
    /// `exported_label -> pod_label_key`.
    pub extra_pod_labels: BTreeMap<String, String>,
    /// Hostname (or `all`) to profiler enablement.
    pub profiler_metrics: BTreeMap<String, bool>,
    /// Uncorrectable ECC thresholds keyed by field name, e.g.
    /// `GPU_ECC_UNCORRECT_GFX`.
    ///
    /// A device is unhealthy when its count is strictly greater than the
    /// threshold. A threshold of 0 (also the value for absent keys) therefore
    /// trips on any nonzero count.
    pub health_thresholds: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CommonConfig {
    pub health_service: Option<HealthServiceConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct HealthServiceConfig {
    pub enable: Option<bool>,
}

impl MetricConfig {
    pub fn gpu(&self) -> Option<&GpuConfig> {
        self.gpu_config.as_ref()
    }

    /// Health socket enablement, true unless explicitly disabled.
    pub fn health_service_enabled(&self) -> bool {
        self.common_config
            .as_ref()
            .and_then(|c| c.health_service.as_ref())
            .and_then(|h| h.enable)
            .unwrap_or(true)
    }

    /// Threshold for an uncorrectable-error field; absent keys are 0.
    pub fn health_threshold(&self, field: &str) -> u32 {
        self.gpu()
            .and_then(|g| g.health_thresholds.get(field).copied())
            .unwrap_or(0)
    }

    /// Whether profiler fields are exported on `hostname`.
    pub fn profiler_enabled_for(&self, hostname: &str) -> bool {
        self.gpu().is_some_and(|g| {
            g.profiler_metrics.get(hostname).copied().unwrap_or(false)
                || g.profiler_metrics.get("all").copied().unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_document() {
        let doc = r#"{
            "ServerPort": 5001,
            "GPUConfig": {
                "Labels": ["gpu_uuid", "POD"],
                "Fields": ["GPU_PACKAGE_POWER"],
                "Selector": "0-1",
                "CustomLabels": {"cluster_name": "c1"},
                "ExtraPodLabels": {"team": "app.kubernetes.io/team"},
                "ProfilerMetrics": {"node-a": true},
                "HealthThresholds": {"GPU_ECC_UNCORRECT_GFX": 4}
            },
            "CommonConfig": {"HealthService": {"Enable": false}}
        }"#;
        let cfg: MetricConfig = serde_json::from_str(doc).unwrap();
        assert_eq!(cfg.server_port, 5001);
        let gpu = cfg.gpu().unwrap();
        assert_eq!(gpu.labels, vec!["gpu_uuid", "POD"]);
        assert_eq!(gpu.selector, "0-1");
        assert_eq!(cfg.health_threshold("GPU_ECC_UNCORRECT_GFX"), 4);
        assert_eq!(cfg.health_threshold("GPU_ECC_UNCORRECT_SDMA"), 0);
        assert!(!cfg.health_service_enabled());
        assert!(cfg.profiler_enabled_for("node-a"));
        assert!(!cfg.profiler_enabled_for("node-b"));
    }

    #[test]
    fn test_empty_document_defaults() {
        let cfg: MetricConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, MetricConfig::default());
        assert!(cfg.health_service_enabled());
        assert!(!cfg.profiler_enabled_for("any"));
    }

    #[test]
    fn test_profiler_all_key() {
        let cfg: MetricConfig =
            serde_json::from_str(r#"{"GPUConfig": {"ProfilerMetrics": {"all": true}}}"#).unwrap();
        assert!(cfg.profiler_enabled_for("whatever"));
    }
}
