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

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::api::metrics::fields::{self, FieldSpec, FIELDS};
use crate::config::GpuConfig;

/// Set of exported families for one config epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPolicy {
    enabled: BTreeSet<&'static str>,
}

impl FieldPolicy {
    /// An empty `Fields` list enables every known family; a non-empty list
    /// enables only the named ones. Profiler families are dropped unless
    /// `profiling` is set.
    pub fn resolve(config: Option<&GpuConfig>, profiling: bool) -> Self {
        let requested: &[String] = config.map(|c| c.fields.as_slice()).unwrap_or(&[]);

        let mut enabled: BTreeSet<&'static str> = if requested.is_empty() {
            FIELDS.iter().map(|f| f.name).collect()
        } else {
            let mut set = BTreeSet::new();
            for name in requested {
                match fields::lookup(name) {
                    Some(spec) => {
                        set.insert(spec.name);
                    }
                    None => warn!("Unknown field {name} ignored"),
                }
            }
            set
        };

        if !profiling {
            for spec in fields::profiler_fields() {
                if enabled.remove(spec.name) {
                    debug!("profiler field {} disabled", spec.field_name());
                }
            }
        }

        Self { enabled }
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled.contains(name)
    }

    /// Enabled families in table order.
    pub fn enabled_specs(&self) -> impl Iterator<Item = &'static FieldSpec> + '_ {
        FIELDS.iter().filter(|f| self.enabled.contains(f.name))
    }

    /// Profiler counter names to request from the helper.
    pub fn profiler_counters(&self) -> Vec<&'static str> {
        self.enabled_specs().filter_map(|f| f.profiler).collect()
    }

    pub fn len(&self) -> usize {
        self.enabled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.enabled.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_enables_all_but_profiler() {
        let policy = FieldPolicy::resolve(None, false);
        assert!(policy.is_enabled("gpu_package_power"));
        assert!(policy.is_enabled("gpu_nodes_total"));
        assert!(!policy.is_enabled("gpu_prof_sq_waves"));
        assert!(policy.profiler_counters().is_empty());
        assert_eq!(
            policy.len(),
            FIELDS.len() - fields::profiler_fields().count()
        );
    }

    #[test]
    fn test_profiling_enables_profiler_fields() {
        let policy = FieldPolicy::resolve(None, true);
        assert_eq!(policy.len(), FIELDS.len());
        assert!(policy.profiler_counters().contains(&"SQ_WAVES"));
    }

    #[test]
    fn test_explicit_list_flips_default_off() {
        let cfg = GpuConfig {
            fields: vec![
                "GPU_PACKAGE_POWER".to_string(),
                "gpu_edge_temperature".to_string(),
                "GPU_NOT_A_FIELD".to_string(),
                "GPU_PROF_SQ_WAVES".to_string(),
            ],
            ..Default::default()
        };
        let policy = FieldPolicy::resolve(Some(&cfg), false);
        let names: Vec<&str> = policy.enabled_specs().map(|f| f.name).collect();
        assert_eq!(names, vec!["gpu_package_power", "gpu_edge_temperature"]);

        let with_prof = FieldPolicy::resolve(Some(&cfg), true);
        assert_eq!(with_prof.profiler_counters(), vec!["SQ_WAVES"]);
    }
}
