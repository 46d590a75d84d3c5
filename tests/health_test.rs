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

//! Health engine ticks against a fake agent and node object.

mod common;

use amd_metrics_exporter::health::Verdict;
use amd_metrics_exporter::proto::amdgpu::EventSeverity;
use amd_metrics_exporter::scheduler::{JobInfo, Workload};
use common::*;

const LABEL0: &str = "metricsexporter.amd.com.gpu.0.state";
const LABEL1: &str = "metricsexporter.amd.com.gpu.1.state";

fn verdict(h: &Harness, id: &str) -> Verdict {
    h.health.state(id).unwrap().verdict
}

#[tokio::test]
async fn test_ecc_threshold_trips_and_recovers() {
    let h = Harness::new(two_gpus());
    h.write_config(r#"{"GPUConfig": {"HealthThresholds": {"GPU_ECC_UNCORRECT_GFX": 0}}}"#);
    h.agent.update_gpu(0, |gpu| {
        gpu.stats.as_mut().unwrap().gfx_uncorrectable_errors = 5;
    });
    let engine = h.engine();
    let collector = h.collector();
    collector.rebuild().await;

    engine.tick().await.unwrap();
    engine.sync_node_labels().await.unwrap();
    assert_eq!(verdict(&h, "0"), Verdict::Unhealthy);
    assert_eq!(verdict(&h, "1"), Verdict::Healthy);
    assert_eq!(h.labeler.label(LABEL0).as_deref(), Some("unhealthy"));
    assert_eq!(h.labeler.label(LABEL1), None);

    let body = collector.scrape().await;
    let line = find_sample(&body, "gpu_health", &[("gpu_id", "0")]).unwrap();
    assert_eq!(value(line), 0.0);
    let line = find_sample(&body, "gpu_health", &[("gpu_id", "1")]).unwrap();
    assert_eq!(value(line), 1.0);

    h.agent.update_gpu(0, |gpu| {
        gpu.stats.as_mut().unwrap().gfx_uncorrectable_errors = 0;
    });
    engine.tick().await.unwrap();
    engine.sync_node_labels().await.unwrap();
    assert_eq!(verdict(&h, "0"), Verdict::Healthy);
    assert_eq!(h.labeler.label(LABEL0), None);
}

#[tokio::test]
async fn test_threshold_above_count_keeps_healthy() {
    let h = Harness::new(two_gpus());
    h.write_config(r#"{"GPUConfig": {"HealthThresholds": {"GPU_ECC_UNCORRECT_UMC": 10}}}"#);
    h.agent.update_gpu(1, |gpu| {
        gpu.stats.as_mut().unwrap().umc_uncorrectable_errors = 10;
    });
    let engine = h.engine();
    engine.tick().await.unwrap();
    assert_eq!(verdict(&h, "1"), Verdict::Healthy);

    h.agent.update_gpu(1, |gpu| {
        gpu.stats.as_mut().unwrap().umc_uncorrectable_errors = 11;
    });
    engine.tick().await.unwrap();
    assert_eq!(verdict(&h, "1"), Verdict::Unhealthy);
}

#[tokio::test]
async fn test_critical_event_marks_device() {
    let h = Harness::new(two_gpus());
    h.agent.push_event(UUID1, EventSeverity::Critical);
    let engine = h.engine();
    engine.tick().await.unwrap();
    assert_eq!(verdict(&h, "0"), Verdict::Healthy);
    assert_eq!(verdict(&h, "1"), Verdict::Unhealthy);
    assert_eq!(h.health.state("1").unwrap().uuid, UUID1);
}

#[tokio::test]
async fn test_event_for_unknown_gpu_is_ignored() {
    let h = Harness::new(two_gpus());
    h.agent
        .push_event("00000000-0000-1000-8000-000000000000", EventSeverity::Critical);
    let engine = h.engine();
    engine.tick().await.unwrap();
    assert!(h.health.states().values().all(|s| s.verdict.is_healthy()));
}

#[tokio::test]
async fn test_agent_failure_marks_known_devices() {
    let h = Harness::new(two_gpus());
    let engine = h.engine();
    engine.tick().await.unwrap();
    assert_eq!(h.health.states().len(), 2);

    h.agent.set_failing(true);
    assert!(engine.tick().await.is_err());
    assert_eq!(h.agent.close_count(), 1);
    assert_eq!(h.health.states().len(), 2);
    assert!(h.health.states().values().all(|s| !s.verdict.is_healthy()));

    h.agent.set_failing(false);
    engine.tick().await.unwrap();
    assert!(h.health.states().values().all(|s| s.verdict.is_healthy()));
}

#[tokio::test]
async fn test_empty_listing_keeps_device_set() {
    let h = Harness::new(two_gpus());
    let engine = h.engine();
    engine.tick().await.unwrap();

    h.agent.set_gpus(Vec::new());
    engine.tick().await.unwrap();
    let states = h.health.states();
    assert_eq!(states.keys().cloned().collect::<Vec<_>>(), vec!["0", "1"]);
    assert!(states.values().all(|s| !s.verdict.is_healthy()));

    engine.sync_node_labels().await.unwrap();
    assert_eq!(h.labeler.label(LABEL0).as_deref(), Some("unhealthy"));
    assert_eq!(h.labeler.label(LABEL1).as_deref(), Some("unhealthy"));
}

#[tokio::test]
async fn test_mock_counts_override_live_values() {
    let h = Harness::new(two_gpus());
    let engine = h.engine();
    h.health
        .set_mock("0", &["GPU_ECC_UNCORRECT_SDMA".to_string()], &[3]);
    engine.tick().await.unwrap();
    assert_eq!(verdict(&h, "0"), Verdict::Unhealthy);

    h.health
        .set_mock("0", &["GPU_ECC_UNCORRECT_SDMA".to_string()], &[0]);
    engine.tick().await.unwrap();
    assert_eq!(verdict(&h, "0"), Verdict::Healthy);
}

#[tokio::test]
async fn test_compute_node_flag() {
    let h = Harness::new(two_gpus());
    let engine = h.engine();

    // no state yet: the flag seeds the map
    engine.set_compute_node_health(false).await.unwrap();
    assert_eq!(h.health.states().len(), 2);
    assert!(h.health.states().values().all(|s| !s.verdict.is_healthy()));

    engine.tick().await.unwrap();
    assert!(h.health.states().values().all(|s| !s.verdict.is_healthy()));

    engine.set_compute_node_health(true).await.unwrap();
    assert!(h.health.states().values().all(|s| s.verdict.is_healthy()));
}

#[tokio::test]
async fn test_label_patch_only_on_change() {
    let h = Harness::new(two_gpus());
    h.agent.update_gpu(1, |gpu| {
        gpu.stats.as_mut().unwrap().sdma_uncorrectable_errors = 1;
    });
    let engine = h.engine();
    engine.tick().await.unwrap();
    engine.sync_node_labels().await.unwrap();
    engine.sync_node_labels().await.unwrap();
    assert_eq!(
        h.labeler.patches.load(std::sync::atomic::Ordering::SeqCst),
        1
    );
    assert_eq!(h.labeler.label(LABEL1).as_deref(), Some("unhealthy"));
}

#[tokio::test]
async fn test_workload_strings_attached() {
    let h = Harness::new(two_gpus());
    h.scheduler.insert(
        "0000:0c:00.0",
        Workload::Job(JobInfo {
            id: "77".into(),
            user: "bob".into(),
            partition: "p".into(),
            cluster: "c".into(),
        }),
    );
    let engine = h.engine();
    engine.tick().await.unwrap();
    let state = h.health.state("0").unwrap();
    assert_eq!(state.device, "0000:0c:00.0");
    assert_eq!(
        state.workloads,
        vec!["id: 77, user : bob, partition: p, cluster: c"]
    );
    assert!(h.health.state("1").unwrap().workloads.is_empty());
}
