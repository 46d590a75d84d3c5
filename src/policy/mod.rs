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

//! Label and field resolution for one config epoch.

pub mod fields;
pub mod labels;
pub mod selector;

pub use fields::FieldPolicy;
pub use labels::{GpuLabel, LabelPolicy};
pub use selector::{parse_index_ranges, GpuSelector};

use crate::config::MetricConfig;

/// Everything the collector needs to know about what to export.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    pub labels: LabelPolicy,
    pub fields: FieldPolicy,
    pub selector: GpuSelector,
    pub profiling: bool,
}

impl Policy {
    /// Resolve from a config snapshot. `profiler_allowed` is the boot-time
    /// switch; the config must also enable profiling for `hostname`.
    pub fn resolve(config: &MetricConfig, hostname: &str, profiler_allowed: bool) -> Self {
        let gpu = config.gpu();
        let profiling = profiler_allowed && config.profiler_enabled_for(hostname);
        Self {
            labels: LabelPolicy::resolve(gpu),
            fields: FieldPolicy::resolve(gpu, profiling),
            selector: gpu
                .map(|g| GpuSelector::from_config(&g.selector))
                .unwrap_or_default(),
            profiling,
        }
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::resolve(&MetricConfig::default(), "", false)
    }
}
