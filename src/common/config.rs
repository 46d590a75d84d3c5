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

use std::time::Duration;

/// Application-wide configuration constants
pub struct ExporterConfig;

impl ExporterConfig {
    // Network
    pub const DEFAULT_SERVER_PORT: u16 = 5000;
    pub const DEFAULT_BIND_ADDR: &'static str = "0.0.0.0";
    pub const DEFAULT_AGENT_PORT: u16 = 50061;
    pub const ZMQ_PORT: u16 = 6601;
    pub const HTTP_READ_TIMEOUT_SECS: u64 = 45;
    pub const HTTP_SHUTDOWN_GRACE_SECS: u64 = 5;

    // Paths
    pub const DEFAULT_CONFIG_PATH: &'static str = "/etc/metrics/config.json";
    pub const SLURM_JOB_DIR: &'static str = "/var/run/exporter/";
    pub const HEALTH_SOCKET_PATH: &'static str =
        "/var/lib/amd-metrics-exporter/amdgpu_device_metrics_exporter_grpc.socket";
    pub const POD_RESOURCE_SOCKET: &'static str = "/var/lib/kubelet/pod-resources/kubelet.sock";
    pub const SERVICE_FILE: &'static str = "/usr/lib/systemd/system/amd-metrics-exporter.service";
    pub const LOG_FILE_NAME: &'static str = "exporter.log";

    // Kubernetes
    pub const GPU_RESOURCE_NAME: &'static str = "amd.com/gpu";
    pub const NODE_HEALTH_LABEL_PREFIX: &'static str = "metricsexporter.amd.com.gpu.";
    pub const NODE_HEALTH_LABEL_SUFFIX: &'static str = ".state";
    pub const MAX_GPU_PER_SERVER: usize = 16;

    // Labels
    pub const MAX_CUSTOM_LABELS: usize = 10;
    pub const MAX_EXTRA_POD_LABELS: usize = 10;

    // Timing
    pub const REFRESH_INTERVAL_SECS: u64 = 30;
    pub const QUERY_TIMEOUT_SECS: u64 = 10;
    pub const CONNECT_TIMEOUT_SECS: u64 = 5;
    pub const CONFIG_DEBOUNCE_SECS: u64 = 3;
    pub const PROFILER_TIMEOUT_SECS: u64 = 15;
    pub const PROFILER_CACHE_SECS: u64 = 10;

    // Sysfs
    pub const RENDER_START_ID: u32 = 128;
    pub const LOGICAL_DEVICE_PREFIX: &'static str = "amdgpu_xcp_";
    pub const XCP_RENDER_GLOB: &'static str = "/sys/devices/platform/amdgpu_xcp_*/drm/renderD*";
    pub const KFD_TOPOLOGY_NODES: &'static str = "/sys/class/kfd/kfd/topology/nodes";
}

/// Environment-derived settings
pub struct EnvConfig;

impl EnvConfig {
    pub const SERVER_PORT_VAR: &'static str = "METRICS_EXPORTER_PORT";

    pub fn refresh_interval() -> Duration {
        Duration::from_secs(ExporterConfig::REFRESH_INTERVAL_SECS)
    }

    pub fn query_timeout() -> Duration {
        Duration::from_secs(ExporterConfig::QUERY_TIMEOUT_SECS)
    }

    pub fn debounce() -> Duration {
        Duration::from_secs(ExporterConfig::CONFIG_DEBOUNCE_SECS)
    }

    pub fn shutdown_grace() -> Duration {
        Duration::from_secs(ExporterConfig::HTTP_SHUTDOWN_GRACE_SECS)
    }

    /// Port from `METRICS_EXPORTER_PORT`, if set and parseable.
    pub fn server_port_override() -> Option<u16> {
        std::env::var(Self::SERVER_PORT_VAR)
            .ok()
            .and_then(|v| v.trim().parse::<u16>().ok())
    }

    /// Node label key carrying the health verdict of GPU `gpu_id`.
    pub fn node_health_label(gpu_id: impl std::fmt::Display) -> String {
        format!(
            "{}{gpu_id}{}",
            ExporterConfig::NODE_HEALTH_LABEL_PREFIX,
            ExporterConfig::NODE_HEALTH_LABEL_SUFFIX
        )
    }
}
