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

//! Gauge families keyed by label tuple, rebuilt whenever policy changes.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info};

use super::fields::{FieldSpec, Scope};
use super::{Labels, MetricBuilder, MetricSink};
use crate::policy::Policy;

/// Unsigned source counter as reported by the GPU agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    U16(u16),
    U32(u32),
    U64(u64),
}

impl From<u16> for Counter {
    fn from(v: u16) -> Self {
        Counter::U16(v)
    }
}

impl From<u32> for Counter {
    fn from(v: u32) -> Self {
        Counter::U32(v)
    }
}

impl From<u64> for Counter {
    fn from(v: u64) -> Self {
        Counter::U64(v)
    }
}

/// Convert a counter to a sample value. Width-max sentinels mean
/// "unavailable" and become 0.
pub fn normalize(value: impl Into<Counter>) -> f64 {
    match value.into() {
        Counter::U16(v) => {
            if v == u16::MAX {
                0.0
            } else {
                f64::from(v)
            }
        }
        Counter::U32(v) => {
            if v == u32::MAX || v == u32::from(u16::MAX) {
                0.0
            } else {
                f64::from(v)
            }
        }
        Counter::U64(v) => {
            if v == u64::MAX || v == u64::from(u32::MAX) || v == u64::from(u16::MAX) {
                0.0
            } else {
                v as f64
            }
        }
    }
}

#[derive(Debug)]
struct Family {
    spec: &'static FieldSpec,
    dimensions: Vec<String>,
    samples: BTreeMap<Vec<String>, f64>,
}

impl Family {
    fn new(spec: &'static FieldSpec, dimensions: Vec<String>) -> Self {
        Self {
            spec,
            dimensions,
            samples: BTreeMap::new(),
        }
    }

    fn tuple(&self, labels: &Labels) -> Vec<String> {
        self.dimensions
            .iter()
            .map(|d| labels.get(d).cloned().unwrap_or_default())
            .collect()
    }
}

#[derive(Debug)]
pub struct Registry {
    policy: Policy,
    families: Vec<Family>,
    by_name: HashMap<&'static str, usize>,
}

impl Registry {
    pub fn new(policy: Policy) -> Self {
        let mut registry = Self {
            policy: Policy::default(),
            families: Vec::new(),
            by_name: HashMap::new(),
        };
        registry.rebuild(policy);
        registry
    }

    /// Drop every family and register the ones enabled by `policy`.
    pub fn rebuild(&mut self, policy: Policy) {
        let base = policy.labels.base_dimensions();
        let trailing = policy.labels.trailing_dimensions();
        let host = policy.labels.host_dimensions();

        let mut families = Vec::new();
        let mut by_name = HashMap::new();
        for spec in policy.fields.enabled_specs() {
            let dimensions = match spec.scope {
                Scope::Host => host.clone(),
                Scope::Device => {
                    let mut dims = base.clone();
                    dims.extend(spec.index.iter().map(|d| d.to_string()));
                    dims.extend(trailing.iter().cloned());
                    dims
                }
            };
            debug!("registering {} with {:?}", spec.name, dimensions);
            by_name.insert(spec.name, families.len());
            families.push(Family::new(spec, dimensions));
        }

        info!(
            "Metric registry rebuilt: {} families, labels {:?}",
            families.len(),
            base
        );
        self.families = families;
        self.by_name = by_name;
        self.policy = policy;
    }

    /// Clear every sample, keeping families.
    pub fn reset(&mut self) {
        for family in &mut self.families {
            family.samples.clear();
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn is_registered(&self, family: &str) -> bool {
        self.by_name.contains_key(family)
    }

    pub fn family_names(&self) -> Vec<&'static str> {
        self.families.iter().map(|f| f.spec.name).collect()
    }

    pub fn dimensions(&self, family: &str) -> Option<&[String]> {
        self.by_name
            .get(family)
            .map(|&i| self.families[i].dimensions.as_slice())
    }

    pub fn sample_count(&self) -> usize {
        self.families.iter().map(|f| f.samples.len()).sum()
    }

    /// Text exposition of every family that has at least one sample.
    pub fn render(&self) -> String {
        let mut builder = MetricBuilder::new();
        for family in &self.families {
            if family.samples.is_empty() {
                continue;
            }
            let name = family.spec.name;
            builder.help(name, family.spec.help).type_(name, "gauge");
            for (tuple, value) in &family.samples {
                let labels: Vec<(&str, &str)> = family
                    .dimensions
                    .iter()
                    .map(String::as_str)
                    .zip(tuple.iter().map(String::as_str))
                    .collect();
                builder.metric(name, &labels, *value);
            }
        }
        builder.build()
    }
}

impl MetricSink for Registry {
    fn set(&mut self, family: &str, labels: &Labels, value: f64) -> bool {
        let Some(&idx) = self.by_name.get(family) else {
            return false;
        };
        let fam = &mut self.families[idx];
        let tuple = fam.tuple(labels);
        fam.samples.insert(tuple, value);
        true
    }
}
