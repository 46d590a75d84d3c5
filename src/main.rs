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
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use amd_metrics_exporter::cli::Cli;
use amd_metrics_exporter::collector::Collector;
use amd_metrics_exporter::config::ConfigStore;
use amd_metrics_exporter::device::profiler::ProfilerClient;
use amd_metrics_exporter::device::sysfs::SysfsDevices;
use amd_metrics_exporter::gpuagent::GpuAgentClient;
use amd_metrics_exporter::health::{HealthEngine, HealthStore, KubeNodeLabeler};
use amd_metrics_exporter::scheduler::{self, SlurmOptions};
use amd_metrics_exporter::supervisor::{Supervisor, SupervisorOptions};
use amd_metrics_exporter::traits::{MetricsClient, NodeLabeler, SchedulerClient};
use amd_metrics_exporter::utils::logging::init_logging;
use amd_metrics_exporter::utils::{get_hostname, get_node_name, is_kubernetes};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging();

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    if let Err(e) = run(cli, cancel).await {
        error!("exporter failed: {e}");
        std::process::exit(1);
    }
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut sigterm =
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("Failed to listen for SIGTERM: {e}");
                        if signal::ctrl_c().await.is_ok() {
                            cancel.cancel();
                        }
                        return;
                    }
                };
            tokio::select! {
                _ = signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {e}");
            return;
        }
        info!("shutdown signal received");
        cancel.cancel();
    });
}

async fn run(cli: Cli, cancel: CancellationToken) -> amd_metrics_exporter::error::Result<()> {
    let config = Arc::new(ConfigStore::new(&cli.config, cli.agent_grpc_port));
    if let Err(e) = config.refresh() {
        warn!("using default config: {e}");
    }

    let hostname = get_hostname();
    let kubernetes = is_kubernetes();
    info!(
        "amd-metrics-exporter {} on {hostname} (kubernetes: {kubernetes})",
        env!("CARGO_PKG_VERSION")
    );

    let agent: Arc<dyn MetricsClient> = Arc::new(GpuAgentClient::new(config.agent_addr()));
    let slurm = SlurmOptions {
        enable_zmq: !cli.zmq_disable,
        ..Default::default()
    };
    let workloads = scheduler::detect(kubernetes, slurm, cancel.clone()).await?;
    info!("workload source: {}", workloads.kind());
    let sysfs = Arc::new(SysfsDevices::default());
    let health = Arc::new(HealthStore::new());

    let labeler: Option<Arc<dyn NodeLabeler>> = if kubernetes {
        match KubeNodeLabeler::in_cluster() {
            Ok(l) => Some(Arc::new(l)),
            Err(e) => {
                warn!("node labels disabled: {e}");
                None
            }
        }
    } else {
        None
    };

    let mut collector = Collector::new(
        agent.clone(),
        workloads.clone(),
        sysfs.clone(),
        health.clone(),
        config.clone(),
        hostname,
    );
    let mut engine = HealthEngine::new(
        agent.clone(),
        workloads.clone(),
        health.clone(),
        config.clone(),
        sysfs,
    );
    if let Some(labeler) = &labeler {
        collector = collector.with_labeler(labeler.clone());
        let node = get_node_name();
        if node.is_empty() {
            warn!("node name unknown, node health labels disabled");
        } else {
            engine = engine.with_labeler(labeler.clone(), node);
        }
    }
    if cli.enable_profiler {
        collector = collector.with_profiler(ProfilerClient::default());
    }

    let engine = Arc::new(engine);
    let health_task = tokio::spawn(engine.run(cancel.clone()));

    let supervisor = Supervisor::new(
        config,
        Arc::new(collector),
        health,
        SupervisorOptions {
            bind: cli.bind,
            debug_api: cli.enable_debug_api,
            health_socket: cli.health_socket,
            ..Default::default()
        },
        cancel.clone(),
    );
    let result = supervisor.run().await;

    cancel.cancel();
    if let Err(e) = health_task.await {
        warn!("health task failed: {e}");
    }
    workloads.close().await;
    agent.close().await;
    info!("exporter stopped");
    result
}
