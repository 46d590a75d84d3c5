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

//! Health service over a UNIX socket in a temp directory.

mod common;

use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;

use amd_metrics_exporter::api::health_svc::connect;
use amd_metrics_exporter::api::{HealthService, HealthSocket};
use amd_metrics_exporter::health::HealthStore;
use amd_metrics_exporter::proto::metricssvc::{GpuErrorRequest, GpuGetRequest};
use common::*;
use tokio_util::sync::CancellationToken;

async fn seeded_store() -> (Harness, Arc<HealthStore>) {
    let h = Harness::new(two_gpus());
    h.engine().tick().await.unwrap();
    let store = h.health.clone();
    (h, store)
}

#[tokio::test]
async fn test_list_and_get() {
    let (h, store) = seeded_store().await;
    let path = h.dir.path().join("run/health.socket");
    let cancel = CancellationToken::new();
    let socket = HealthSocket::start(&path, HealthService::new(store, false), &cancel)
        .await
        .unwrap();
    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o777);

    let mut client = connect(&path, Duration::from_secs(5)).await.unwrap();
    let all = client.list(()).await.unwrap().into_inner().gpu_state;
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].id, "0");
    assert_eq!(all[0].uuid, UUID0);
    assert_eq!(all[0].health, "healthy");
    assert_eq!(all[0].device, "0000:0c:00.0");

    let one = client
        .get_gpu_state(GpuGetRequest {
            id: vec!["1".to_string(), "9".to_string()],
        })
        .await
        .unwrap()
        .into_inner()
        .gpu_state;
    assert_eq!(one.len(), 1);
    assert_eq!(one[0].uuid, UUID1);

    socket.shutdown().await;
    assert!(!path.exists());
}

#[tokio::test]
async fn test_empty_store_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("health.socket");
    let cancel = CancellationToken::new();
    let socket = HealthSocket::start(
        &path,
        HealthService::new(Arc::new(HealthStore::new()), false),
        &cancel,
    )
    .await
    .unwrap();
    let mut client = connect(&path, Duration::from_secs(5)).await.unwrap();
    let err = client.list(()).await.unwrap_err();
    assert_eq!(err.code(), tonic::Code::Unavailable);
    cancel.cancel();
    socket.shutdown().await;
}

#[tokio::test]
async fn test_set_error_requires_debug() {
    let (h, store) = seeded_store().await;
    let path = h.dir.path().join("health.socket");
    let cancel = CancellationToken::new();
    let socket = HealthSocket::start(&path, HealthService::new(store.clone(), false), &cancel)
        .await
        .unwrap();
    let mut client = connect(&path, Duration::from_secs(5)).await.unwrap();
    let err = client
        .set_error(GpuErrorRequest {
            id: "0".to_string(),
            fields: vec!["GPU_ECC_UNCORRECT_GFX".to_string()],
            counts: vec![4],
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::PermissionDenied);
    assert!(store.mocks_for("0").is_empty());
    socket.shutdown().await;
}

#[tokio::test]
async fn test_set_error_drives_next_tick() {
    let (h, store) = seeded_store().await;
    let path = h.dir.path().join("health.socket");
    let cancel = CancellationToken::new();
    let socket = HealthSocket::start(&path, HealthService::new(store.clone(), true), &cancel)
        .await
        .unwrap();
    let mut client = connect(&path, Duration::from_secs(5)).await.unwrap();

    let err = client
        .set_error(GpuErrorRequest {
            id: "0".to_string(),
            fields: vec!["GPU_ECC_UNCORRECT_GFX".to_string()],
            counts: vec![],
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::InvalidArgument);

    let resp = client
        .set_error(GpuErrorRequest {
            id: "0".to_string(),
            fields: vec!["GPU_ECC_UNCORRECT_GFX".to_string()],
            counts: vec![4],
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(resp.id, "0");
    assert_eq!(resp.fields, vec!["GPU_ECC_UNCORRECT_GFX"]);

    h.engine().tick().await.unwrap();
    let got = client
        .get_gpu_state(GpuGetRequest {
            id: vec!["0".to_string()],
        })
        .await
        .unwrap()
        .into_inner()
        .gpu_state;
    assert_eq!(got[0].health, "unhealthy");

    socket.shutdown().await;
}

#[tokio::test]
async fn test_stale_socket_file_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("health.socket");
    std::fs::write(&path, b"stale").unwrap();
    let cancel = CancellationToken::new();
    let socket = HealthSocket::start(
        &path,
        HealthService::new(Arc::new(HealthStore::new()), false),
        &cancel,
    )
    .await
    .unwrap();
    assert!(connect(&path, Duration::from_secs(5)).await.is_ok());
    socket.shutdown().await;
}
