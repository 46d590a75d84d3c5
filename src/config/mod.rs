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

//! Config store backed by a JSON file.
//!
//! The store keeps the last successfully parsed document and the effective
//! server port behind one lock. Readers always get a snapshot by value.

pub mod types;

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{info, warn};

use crate::common::config::{EnvConfig, ExporterConfig};
use crate::error::{Error, Result};

pub use types::{CommonConfig, GpuConfig, HealthServiceConfig, MetricConfig};

#[derive(Debug, Clone)]
struct ConfigInner {
    server_port: u16,
    config: MetricConfig,
}

impl Default for ConfigInner {
    fn default() -> Self {
        Self {
            server_port: ExporterConfig::DEFAULT_SERVER_PORT,
            config: MetricConfig::default(),
        }
    }
}

#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    agent_port: u16,
    inner: RwLock<ConfigInner>,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>, agent_port: u16) -> Self {
        Self {
            path: path.into(),
            agent_port,
            inner: RwLock::new(ConfigInner::default()),
        }
    }

    /// Re-read the config file.
    ///
    /// On any read or parse failure the store reverts to defaults and the
    /// error is returned so the caller can log it.
    pub fn refresh(&self) -> Result<()> {
        let parsed = self.load();
        let next = match &parsed {
            Ok(config) => ConfigInner {
                server_port: match u16::try_from(config.server_port) {
                    Ok(0) | Err(_) => ExporterConfig::DEFAULT_SERVER_PORT,
                    Ok(port) => port,
                },
                config: config.clone(),
            },
            Err(e) => {
                warn!(
                    "Failed to load config {}: {e}; using defaults",
                    self.path.display()
                );
                ConfigInner::default()
            }
        };

        match self.inner.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        parsed.map(|_| ())
    }

    fn load(&self) -> Result<MetricConfig> {
        let data = std::fs::read_to_string(&self.path)?;
        let config: MetricConfig = serde_json::from_str(&data)?;
        if config.server_port > u32::from(u16::MAX) {
            return Err(Error::Config(format!(
                "ServerPort {} out of range",
                config.server_port
            )));
        }
        info!("Loaded metrics config from {}", self.path.display());
        Ok(config)
    }

    fn snapshot(&self) -> ConfigInner {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// HTTP port; `METRICS_EXPORTER_PORT` wins when parseable.
    pub fn server_port(&self) -> u16 {
        EnvConfig::server_port_override().unwrap_or_else(|| self.snapshot().server_port)
    }

    pub fn health_service_enabled(&self) -> bool {
        self.snapshot().config.health_service_enabled()
    }

    /// Current config record by value.
    pub fn config(&self) -> MetricConfig {
        self.snapshot().config
    }

    pub fn config_path(&self) -> &Path {
        &self.path
    }

    pub fn agent_addr(&self) -> String {
        format!("http://0.0.0.0:{}", self.agent_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_refresh_reads_port_and_labels() {
        let file = write_config(r#"{"ServerPort": 5055, "GPUConfig": {"Labels": ["GPU_UUID"]}}"#);
        let store = ConfigStore::new(file.path(), 50061);
        store.refresh().unwrap();
        assert_eq!(store.snapshot().server_port, 5055);
        assert_eq!(store.config().gpu().unwrap().labels, vec!["GPU_UUID"]);
        assert!(store.health_service_enabled());
    }

    #[test]
    fn test_missing_file_reverts_to_defaults() {
        let file = write_config(r#"{"ServerPort": 5055}"#);
        let store = ConfigStore::new(file.path(), 50061);
        store.refresh().unwrap();

        let missing = ConfigStore::new("/nonexistent/config.json", 50061);
        assert!(missing.refresh().is_err());
        assert_eq!(missing.snapshot().server_port, 5000);
        assert_eq!(missing.config(), MetricConfig::default());
    }

    #[test]
    fn test_invalid_json_reverts_previous_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"ServerPort": 6000, "GPUConfig": {"Selector": "1"}}"#).unwrap();
        let store = ConfigStore::new(&path, 50061);
        store.refresh().unwrap();
        assert_eq!(store.config().gpu().unwrap().selector, "1");

        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(store.refresh(), Err(Error::Json(_))));
        assert_eq!(store.snapshot().server_port, 5000);
        assert!(store.config().gpu().is_none());
    }

    #[test]
    fn test_zero_port_means_default() {
        let file = write_config(r#"{"ServerPort": 0}"#);
        let store = ConfigStore::new(file.path(), 50061);
        store.refresh().unwrap();
        assert_eq!(store.snapshot().server_port, 5000);
    }

    #[test]
    fn test_agent_addr() {
        let store = ConfigStore::new("/tmp/none.json", 50062);
        assert_eq!(store.agent_addr(), "http://0.0.0.0:50062");
    }
}
