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

//! Config reload through the supervisor's directory watch.

mod common;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use amd_metrics_exporter::supervisor::{Supervisor, SupervisorOptions};
use common::*;
use tokio_util::sync::CancellationToken;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

async fn scrape(sup: &Supervisor) -> String {
    let addr = sup.http_addr().await.unwrap();
    reqwest::get(format!("http://{addr}/metrics"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_config_change_rebuilds_and_restarts() {
    let h = Harness::new(two_gpus());
    let port = free_port();
    std::fs::write(h.config_path(), format!(r#"{{"ServerPort": {port}}}"#)).unwrap();

    let cancel = CancellationToken::new();
    let socket = h.dir.path().join("health.socket");
    let sup = Arc::new(Supervisor::new(
        h.config.clone(),
        Arc::new(h.collector()),
        h.health.clone(),
        SupervisorOptions {
            bind: IpAddr::from([127, 0, 0, 1]),
            debug_api: false,
            health_socket: socket.clone(),
            debounce: Duration::from_millis(200),
            shutdown_grace: Duration::from_secs(1),
        },
        cancel.clone(),
    ));
    let task = {
        let sup = sup.clone();
        tokio::spawn(async move { sup.run().await })
    };

    assert!(wait_for(|| async { sup.http_addr().await.is_some() }).await);
    assert_eq!(sup.http_addr().await.unwrap().port(), port);
    assert!(sup.health_socket_running().await);
    assert!(socket.exists());
    let body = scrape(&sup).await;
    assert!(find_sample(&body, "gpu_package_power", &[("gpu_id", "0")]).is_some());

    // atomic replace: write a sibling file, then rename over the config
    let tmp = h.dir.path().join("config.json.tmp");
    std::fs::write(
        &tmp,
        format!(
            r#"{{"ServerPort": {port}, "GPUConfig": {{"Selector": "1"}},
                "CommonConfig": {{"HealthService": {{"Enable": false}}}}}}"#
        ),
    )
    .unwrap();
    std::fs::rename(&tmp, h.config_path()).unwrap();

    assert!(wait_for(|| async { !sup.health_socket_running().await }).await);
    assert!(!socket.exists());
    let body = scrape(&sup).await;
    assert!(find_sample(&body, "gpu_package_power", &[("gpu_id", "0")]).is_none());
    assert!(find_sample(&body, "gpu_package_power", &[("gpu_id", "1")]).is_some());

    cancel.cancel();
    task.await.unwrap().unwrap();
    assert!(sup.http_addr().await.is_none());
}

#[tokio::test]
async fn test_missing_config_serves_defaults() {
    let h = Harness::new(two_gpus());
    let collector = Arc::new(h.collector());
    let cancel = CancellationToken::new();
    let sup = Supervisor::new(
        h.config.clone(),
        collector,
        h.health.clone(),
        SupervisorOptions {
            bind: IpAddr::from([127, 0, 0, 1]),
            health_socket: h.dir.path().join("health.socket"),
            debounce: Duration::from_millis(100),
            ..Default::default()
        },
        cancel.clone(),
    );
    // port 5000 may be taken on the test host; reload only needs the store
    sup.reload().await;
    assert!(sup.health_socket_running().await);
    assert!(h.config.config().gpu().is_none());
    cancel.cancel();
}
