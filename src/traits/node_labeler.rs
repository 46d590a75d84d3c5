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

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;

use crate::error::Result;

/// Labels of pods on this node, keyed by `(namespace, pod)`.
pub type PodLabels = HashMap<(String, String), BTreeMap<String, String>>;

/// Orchestrator API used for health labels and pod label lookups.
#[async_trait]
pub trait NodeLabeler: Send + Sync {
    async fn node_labels(&self, node: &str) -> Result<BTreeMap<String, String>>;

    /// Apply `add` and delete `remove` in one patch.
    async fn patch_node_labels(
        &self,
        node: &str,
        add: &BTreeMap<String, String>,
        remove: &[String],
    ) -> Result<()>;

    async fn pod_labels(&self, node: &str) -> Result<PodLabels>;
}
