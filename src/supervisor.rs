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

//! Config watcher and server lifecycle.
//!
//! The watcher sits on the config file's parent directory so that atomic
//! rename updates are seen. A burst of events is coalesced by a debounce
//! timer; when it fires the HTTP listener and the health socket are torn
//! down, the config is re-read, the registry rebuilt and both restarted.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{EventKind, RecursiveMode, Watcher};
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::{start_http, HealthService, HealthSocket, HttpServer};
use crate::collector::Collector;
use crate::common::config::{EnvConfig, ExporterConfig};
use crate::config::ConfigStore;
use crate::error::Result;
use crate::health::HealthStore;

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub bind: IpAddr,
    pub debug_api: bool,
    pub health_socket: PathBuf,
    pub debounce: Duration,
    pub shutdown_grace: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            bind: IpAddr::from([0, 0, 0, 0]),
            debug_api: false,
            health_socket: PathBuf::from(ExporterConfig::HEALTH_SOCKET_PATH),
            debounce: EnvConfig::debounce(),
            shutdown_grace: EnvConfig::shutdown_grace(),
        }
    }
}

#[derive(Default)]
struct Servers {
    http: Option<HttpServer>,
    socket: Option<HealthSocket>,
}

pub struct Supervisor {
    config: Arc<ConfigStore>,
    collector: Arc<Collector>,
    health: Arc<HealthStore>,
    opts: SupervisorOptions,
    cancel: CancellationToken,
    servers: Mutex<Servers>,
}

impl Supervisor {
    pub fn new(
        config: Arc<ConfigStore>,
        collector: Arc<Collector>,
        health: Arc<HealthStore>,
        opts: SupervisorOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            collector,
            health,
            opts,
            cancel,
            servers: Mutex::new(Servers::default()),
        }
    }

    /// Address of the running metrics listener.
    pub async fn http_addr(&self) -> Option<SocketAddr> {
        self.servers.lock().await.http.as_ref().map(HttpServer::local_addr)
    }

    pub async fn health_socket_running(&self) -> bool {
        self.servers.lock().await.socket.is_some()
    }

    async fn start_servers(&self) -> Servers {
        let mut servers = Servers::default();
        let addr = SocketAddr::new(self.opts.bind, self.config.server_port());
        match start_http(addr, self.collector.clone(), &self.cancel).await {
            Ok(server) => servers.http = Some(server),
            Err(e) => error!("Failed to start metrics server on {addr}: {e}"),
        }

        if self.config.health_service_enabled() {
            let service = HealthService::new(self.health.clone(), self.opts.debug_api);
            match HealthSocket::start(&self.opts.health_socket, service, &self.cancel).await {
                Ok(socket) => servers.socket = Some(socket),
                Err(e) => error!(
                    "Failed to start health service on {}: {e}",
                    self.opts.health_socket.display()
                ),
            }
        } else {
            info!("Health service disabled by config");
        }
        servers
    }

    async fn stop_servers(&self, servers: Servers) {
        if let Some(http) = servers.http {
            http.shutdown(self.opts.shutdown_grace).await;
        }
        if let Some(socket) = servers.socket {
            socket.shutdown().await;
        }
    }

    /// Stop both surfaces, re-read config, rebuild and restart.
    pub async fn reload(&self) {
        let mut guard = self.servers.lock().await;
        let old = std::mem::take(&mut *guard);
        self.stop_servers(old).await;

        if let Err(e) = self.config.refresh() {
            warn!("config reload failed: {e}");
        }
        self.collector.rebuild().await;
        *guard = self.start_servers().await;
    }

    /// Load config, start serving and react to config changes until
    /// cancelled.
    pub async fn run(&self) -> Result<()> {
        if let Err(e) = self.config.refresh() {
            warn!("initial config load failed: {e}");
        }
        self.collector.rebuild().await;
        *self.servers.lock().await = self.start_servers().await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let _ = tx.send(res);
        })?;
        let dir = watch_dir(self.config.config_path());
        match std::fs::create_dir_all(&dir)
            .map_err(notify::Error::io)
            .and_then(|_| watcher.watch(&dir, RecursiveMode::NonRecursive))
        {
            Ok(()) => info!("Watching config directory {}", dir.display()),
            Err(e) => warn!("Config watch on {} unavailable: {e}", dir.display()),
        }

        let debounce = tokio::time::sleep(Duration::MAX);
        tokio::pin!(debounce);
        let mut pending = false;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                res = rx.recv() => match res {
                    Some(Ok(event)) => {
                        if matches!(event.kind, EventKind::Access(_)) {
                            continue;
                        }
                        debug!("config event {:?} on {:?}", event.kind, event.paths);
                        debounce.as_mut().reset(Instant::now() + self.opts.debounce);
                        pending = true;
                    }
                    Some(Err(e)) => warn!("config watch error: {e}"),
                    None => break,
                },
                _ = &mut debounce, if pending => {
                    pending = false;
                    info!("config change detected, reloading");
                    self.reload().await;
                }
            }
        }

        drop(watcher);
        let servers = std::mem::take(&mut *self.servers.lock().await);
        self.stop_servers(servers).await;
        info!("supervisor stopped");
        Ok(())
    }
}

fn watch_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_dir() {
        assert_eq!(
            watch_dir(Path::new("/etc/metrics/config.json")),
            PathBuf::from("/etc/metrics")
        );
        assert_eq!(watch_dir(Path::new("config.json")), PathBuf::from("."));
    }

    #[test]
    fn test_default_options() {
        let opts = SupervisorOptions::default();
        assert_eq!(opts.debounce, Duration::from_secs(3));
        assert_eq!(opts.shutdown_grace, Duration::from_secs(5));
        assert!(!opts.debug_api);
    }
}
