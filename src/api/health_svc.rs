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

//! Health service on a local UNIX socket.
//!
//! Device plugins poll `List`/`GetGPUState`; `SetError` injects mock ECC
//! counts and is only honoured when the daemon runs with the debug API.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UnixListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnixListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Server};
use tonic::{Request, Response, Status};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::health::HealthStore;
use crate::proto::metricssvc::metrics_service_client::MetricsServiceClient;
use crate::proto::metricssvc::metrics_service_server::{MetricsService, MetricsServiceServer};
use crate::proto::metricssvc::{
    GpuErrorRequest, GpuErrorResponse, GpuGetRequest, GpuState, GpuStateResponse,
};
use crate::utils::uds::{cleanup_socket, remove_stale_socket, set_socket_permissions, unix_channel};

const SOCKET_MODE: u32 = 0o777;

#[derive(Debug, Clone)]
pub struct HealthService {
    store: Arc<HealthStore>,
    debug_api: bool,
}

impl HealthService {
    pub fn new(store: Arc<HealthStore>, debug_api: bool) -> Self {
        Self { store, debug_api }
    }

    fn states(&self) -> std::result::Result<Vec<GpuState>, Status> {
        let states = self.store.states();
        if states.is_empty() {
            return Err(Error::HealthUnavailable.into());
        }
        Ok(states.values().map(GpuState::from).collect())
    }
}

#[tonic::async_trait]
impl MetricsService for HealthService {
    async fn list(
        &self,
        _request: Request<()>,
    ) -> std::result::Result<Response<GpuStateResponse>, Status> {
        Ok(Response::new(GpuStateResponse {
            gpu_state: self.states()?,
        }))
    }

    async fn get_gpu_state(
        &self,
        request: Request<GpuGetRequest>,
    ) -> std::result::Result<Response<GpuStateResponse>, Status> {
        let ids = request.into_inner().id;
        let gpu_state = self
            .states()?
            .into_iter()
            .filter(|s| ids.contains(&s.id))
            .collect();
        Ok(Response::new(GpuStateResponse { gpu_state }))
    }

    async fn set_error(
        &self,
        request: Request<GpuErrorRequest>,
    ) -> std::result::Result<Response<GpuErrorResponse>, Status> {
        if !self.debug_api {
            return Err(Error::DebugDisabled.into());
        }
        let req = request.into_inner();
        info!("Got SetError : {req:?}");
        if req.fields.len() != req.counts.len() {
            return Err(Error::InvalidRequest(format!(
                "{} fields but {} counts",
                req.fields.len(),
                req.counts.len()
            ))
            .into());
        }
        self.store.set_mock(&req.id, &req.fields, &req.counts);
        Ok(Response::new(GpuErrorResponse {
            id: req.id,
            fields: req.fields,
        }))
    }
}

/// A bound health socket serving in the background.
pub struct HealthSocket {
    path: PathBuf,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl HealthSocket {
    /// Bind `path` (replacing a stale file) and serve `service` until
    /// `parent` is cancelled or [`HealthSocket::shutdown`] is called.
    pub async fn start(
        path: impl Into<PathBuf>,
        service: HealthService,
        parent: &CancellationToken,
    ) -> Result<Self> {
        let path = path.into();
        if let Err(e) = remove_stale_socket(&path) {
            warn!("Failed to remove stale socket file: {e}");
        }
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let listener = UnixListener::bind(&path)?;
        if let Err(e) = set_socket_permissions(&path, SOCKET_MODE) {
            warn!("Failed to set socket permissions: {e}");
        }
        info!("Health service listening on {}", path.display());

        let cancel = parent.child_token();
        let token = cancel.clone();
        let incoming = UnixListenerStream::new(listener);
        let handle = tokio::spawn(async move {
            let result = Server::builder()
                .add_service(MetricsServiceServer::new(service))
                .serve_with_incoming_shutdown(incoming, async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                tracing::error!("Health service error: {e}");
            }
        });

        Ok(Self {
            path,
            cancel,
            handle,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Graceful stop; in-flight calls finish first.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!("Health service task failed: {e}");
        }
        cleanup_socket(&self.path);
        info!("Health service on {} stopped", self.path.display());
    }
}

/// Client for the health socket, used by `metricsclient` and tests.
pub async fn connect(path: &Path, timeout: Duration) -> Result<MetricsServiceClient<Channel>> {
    Ok(MetricsServiceClient::new(unix_channel(path, timeout).await?))
}
