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

use std::net::SocketAddr;
use std::time::Duration;

use axum::http::StatusCode;
use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::api::handlers::{metrics_handler, SharedState};
use crate::common::config::ExporterConfig;
use crate::error::Result;

/// The `/metrics` router.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(ExporterConfig::HTTP_READ_TIMEOUT_SECS),
        ))
        .layer(TraceLayer::new_for_http())
}

/// A running metrics listener.
pub struct HttpServer {
    addr: SocketAddr,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Bind `addr` and serve in the background until `parent` is cancelled or
/// [`HttpServer::shutdown`] is called.
pub async fn start_http(
    addr: SocketAddr,
    state: SharedState,
    parent: &CancellationToken,
) -> Result<HttpServer> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    let cancel = parent.child_token();
    let token = cancel.clone();
    let app = router(state);

    tracing::info!("Metrics server listening on {local}");
    let handle = tokio::spawn(async move {
        let shutdown = async move { token.cancelled().await };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!("HTTP server error: {e}");
        }
    });

    Ok(HttpServer {
        addr: local,
        cancel,
        handle,
    })
}

impl HttpServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting and wait up to `grace` for in-flight scrapes.
    pub async fn shutdown(self, grace: Duration) {
        self.cancel.cancel();
        let mut handle = self.handle;
        match tokio::time::timeout(grace, &mut handle).await {
            Ok(Ok(())) => tracing::info!("Metrics server on {} stopped", self.addr),
            Ok(Err(e)) => tracing::warn!("Metrics server task failed: {e}"),
            Err(_) => {
                tracing::warn!("Metrics server did not stop within {grace:?}, aborting");
                handle.abort();
            }
        }
    }
}
