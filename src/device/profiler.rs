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

//! Client for the `rocpctl` profiler helper.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::common::config::ExporterConfig;
use crate::error::{Error, Result};
use crate::utils::run_shell_with_timeout;

/// Counter values per gpu id, keyed by profiler counter name.
pub type ProfileSnapshot = HashMap<String, HashMap<String, f64>>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ProfilerOutput {
    #[serde(default)]
    gpu_metrics: Vec<GpuProfile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GpuProfile {
    gpu_id: String,
    #[serde(default)]
    metrics: Vec<ProfileMetric>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ProfileMetric {
    field: String,
    value: String,
}

/// Parse helper output. Values that are not numbers read as 0.
pub fn parse_profiler_output(data: &[u8]) -> Result<ProfileSnapshot> {
    let output: ProfilerOutput = serde_json::from_slice(data)?;
    Ok(output
        .gpu_metrics
        .into_iter()
        .map(|gpu| {
            let values = gpu
                .metrics
                .into_iter()
                .map(|m| {
                    let value = m.value.trim().parse::<f64>().unwrap_or_else(|e| {
                        debug!("profiler value {:?} for {}: {e}", m.value, m.field);
                        0.0
                    });
                    (m.field, value)
                })
                .collect();
            (gpu.gpu_id, values)
        })
        .collect())
}

struct CachedProfile {
    read_at: Instant,
    counters: Vec<String>,
    snapshot: ProfileSnapshot,
}

pub struct ProfilerClient {
    command: String,
    timeout: Duration,
    ttl: Duration,
    cache: Mutex<Option<CachedProfile>>,
}

impl Default for ProfilerClient {
    fn default() -> Self {
        Self::new("rocpctl")
    }
}

impl ProfilerClient {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: Duration::from_secs(ExporterConfig::PROFILER_TIMEOUT_SECS),
            ttl: Duration::from_secs(ExporterConfig::PROFILER_CACHE_SECS),
            cache: Mutex::new(None),
        }
    }

    pub fn with_timing(mut self, timeout: Duration, ttl: Duration) -> Self {
        self.timeout = timeout;
        self.ttl = ttl;
        self
    }

    /// Sample `counters`, reusing a result younger than the cache TTL.
    ///
    /// A failed run clears the cache so stale values are never served after
    /// an error.
    pub async fn metrics(&self, counters: &[&str]) -> Result<ProfileSnapshot> {
        if counters.is_empty() {
            return Ok(ProfileSnapshot::new());
        }

        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.read_at.elapsed() < self.ttl && cached.counters == counters {
                debug!("returning profiler metrics from cache");
                return Ok(cached.snapshot.clone());
            }
        }

        let result = self.run(counters).await;
        match &result {
            Ok(snapshot) => {
                *cache = Some(CachedProfile {
                    read_at: Instant::now(),
                    counters: counters.iter().map(|c| c.to_string()).collect(),
                    snapshot: snapshot.clone(),
                });
            }
            Err(e) => {
                warn!("profiler sampling failed: {e}");
                *cache = None;
            }
        }
        result
    }

    async fn run(&self, counters: &[&str]) -> Result<ProfileSnapshot> {
        let command_line = format!("{} {}", self.command, counters.join(" "));
        let output = run_shell_with_timeout(&command_line, self.timeout)
            .await
            .map_err(|e| Error::Profiler(format!("{command_line}: {e}")))?;
        if !output.status.success() {
            return Err(Error::Profiler(format!(
                "{command_line} exited with {}",
                output.status
            )));
        }
        parse_profiler_output(&output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_output() {
        let data = br#"{"GpuMetrics":[
            {"GpuId":"0","Metrics":[{"Field":"SQ_WAVES","Value":"12.5"},{"Field":"GPU_UTIL","Value":"n/a"}]},
            {"GpuId":"1","Metrics":[]}
        ]}"#;
        let snap = parse_profiler_output(data).unwrap();
        assert_eq!(snap["0"]["SQ_WAVES"], 12.5);
        assert_eq!(snap["0"]["GPU_UTIL"], 0.0);
        assert!(snap["1"].is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_profiler_output(b"not json").is_err());
    }

    #[tokio::test]
    async fn test_results_are_cached() {
        let dir = tempfile::tempdir().unwrap();
        let counter_file = dir.path().join("runs");
        let script = dir.path().join("fake-rocpctl");
        std::fs::write(
            &script,
            format!(
                "#!/bin/bash\necho run >> {}\necho '{{\"GpuMetrics\":[{{\"GpuId\":\"0\",\"Metrics\":[{{\"Field\":\"'$1'\",\"Value\":\"3\"}}]}}]}}'\n",
                counter_file.display()
            ),
        )
        .unwrap();
        let client = ProfilerClient::new(format!("bash {}", script.display()));

        let first = client.metrics(&["SQ_WAVES"]).await.unwrap();
        assert_eq!(first["0"]["SQ_WAVES"], 3.0);
        let second = client.metrics(&["SQ_WAVES"]).await.unwrap();
        assert_eq!(first, second);

        let runs = std::fs::read_to_string(&counter_file).unwrap();
        assert_eq!(runs.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_failure_clears_cache() {
        let client = ProfilerClient::new("false");
        assert!(client.metrics(&["SQ_WAVES"]).await.is_err());
        assert!(client.cache.lock().await.is_none());
        assert!(client.metrics(&[]).await.unwrap().is_empty());
    }
}
