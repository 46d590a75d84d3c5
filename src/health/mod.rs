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

//! Per-device health verdicts shared by the health loop, the scrape path
//! and the health socket.

pub mod engine;
pub mod node_labels;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use tracing::info;

use crate::proto::metricssvc::GpuState;

pub use engine::{evaluate_device, HealthEngine, ECC_HEALTH_FIELDS};
pub use node_labels::KubeNodeLabeler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Healthy,
    Unhealthy,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Healthy => "healthy",
            Verdict::Unhealthy => "unhealthy",
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, Verdict::Healthy)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthState {
    /// Device index as a decimal string.
    pub id: String,
    pub uuid: String,
    pub verdict: Verdict,
    /// Lower-cased PCIe address.
    pub device: String,
    pub workloads: Vec<String>,
}

impl From<&HealthState> for GpuState {
    fn from(state: &HealthState) -> Self {
        GpuState {
            id: state.id.clone(),
            uuid: state.uuid.clone(),
            health: state.verdict.as_str().to_string(),
            device: state.device.clone(),
            associated_workload: state.workloads.clone(),
        }
    }
}

/// Per-device mock counters keyed by ECC field name.
pub type MockCounts = HashMap<String, u32>;

#[derive(Debug)]
struct HealthInner {
    states: BTreeMap<String, HealthState>,
    mocks: HashMap<String, MockCounts>,
    compute_node_healthy: bool,
    seeded: bool,
}

impl Default for HealthInner {
    fn default() -> Self {
        Self {
            states: BTreeMap::new(),
            mocks: HashMap::new(),
            compute_node_healthy: true,
            seeded: false,
        }
    }
}

/// Health state map and mock overrides behind one lock.
#[derive(Debug, Default)]
pub struct HealthStore {
    inner: Mutex<HealthInner>,
}

impl HealthStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HealthInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn states(&self) -> BTreeMap<String, HealthState> {
        self.lock().states.clone()
    }

    pub fn state(&self, id: &str) -> Option<HealthState> {
        self.lock().states.get(id).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().states.is_empty()
    }

    /// Swap in a freshly computed map.
    pub fn replace(&self, states: BTreeMap<String, HealthState>) {
        let mut inner = self.lock();
        inner.states = states;
        inner.seeded = true;
    }

    /// Set every known device to `verdict`. When `workloads` is given the
    /// workload strings are refreshed too, keyed by device PCIe address.
    pub fn mark_all(&self, verdict: Verdict, workloads: Option<&HashMap<String, String>>) {
        let mut inner = self.lock();
        for state in inner.states.values_mut() {
            state.verdict = verdict;
            if let Some(wls) = workloads {
                state.workloads = wls.get(&state.device).cloned().into_iter().collect();
            }
        }
    }

    /// Install mock counts for `id`. A count of 0 removes the field.
    pub fn set_mock(&self, id: &str, fields: &[String], counts: &[u32]) {
        let mut inner = self.lock();
        let entry = inner.mocks.entry(id.to_string()).or_default();
        for (field, &count) in fields.iter().zip(counts) {
            if count == 0 {
                entry.remove(field);
            } else {
                entry.insert(field.clone(), count);
            }
        }
        if entry.is_empty() {
            inner.mocks.remove(id);
        }
    }

    pub fn mocks_for(&self, id: &str) -> MockCounts {
        self.lock().mocks.get(id).cloned().unwrap_or_default()
    }

    pub fn compute_node_healthy(&self) -> bool {
        self.lock().compute_node_healthy
    }

    /// Flip the compute-node flag. Returns false when unchanged. Known
    /// devices follow the flag immediately.
    pub fn set_compute_node_healthy(&self, healthy: bool) -> bool {
        let mut inner = self.lock();
        if inner.compute_node_healthy == healthy {
            return false;
        }
        info!(
            "updating compute node health from: {}, to: {healthy}",
            inner.compute_node_healthy
        );
        inner.compute_node_healthy = healthy;
        let verdict = if healthy {
            Verdict::Healthy
        } else {
            Verdict::Unhealthy
        };
        for state in inner.states.values_mut() {
            state.verdict = verdict;
        }
        true
    }

    /// Whether the map has been populated in the current config epoch.
    pub fn is_seeded(&self) -> bool {
        self.lock().seeded
    }

    /// Start a new epoch; the next scrape seeds the map again.
    pub fn unseed(&self) {
        self.lock().seeded = false;
    }
}
