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
//! Command-line client for the exporter's local health socket.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use amd_metrics_exporter::api::health_svc::connect;
use amd_metrics_exporter::common::config::ExporterConfig;
use amd_metrics_exporter::device::sysfs::SysfsDevices;
use amd_metrics_exporter::proto::metricssvc::{GpuErrorRequest, GpuGetRequest, GpuState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Health socket path.
    #[arg(long, default_value = ExporterConfig::HEALTH_SOCKET_PATH)]
    socket: PathBuf,
    /// Print JSON instead of a table.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Health of every GPU.
    List,
    /// Health of the given GPU ids.
    Get { ids: Vec<String> },
    /// Install mock error counts from a JSON file (debug mode only).
    SetError { file: PathBuf },
    /// Logical partition devices found on this host.
    Devices,
}

/// Payload file accepted by `set-error`.
#[derive(Debug, Deserialize)]
struct ErrorFile {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Fields", default)]
    fields: Vec<String>,
    #[serde(rename = "Counts", default)]
    counts: Vec<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StateView {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "UUID")]
    uuid: String,
    health: String,
    device: String,
    associated_workload: Vec<String>,
}

impl From<GpuState> for StateView {
    fn from(s: GpuState) -> Self {
        Self {
            id: s.id,
            uuid: s.uuid,
            health: s.health,
            device: s.device,
            associated_workload: s.associated_workload,
        }
    }
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("metricsclient: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> CliResult<()> {
    if let Command::Devices = args.command {
        let devices = SysfsDevices::default();
        let mut rows: Vec<_> = devices.logical_devices().iter().collect();
        rows.sort();
        if args.json {
            println!("{}", serde_json::to_string_pretty(&rows)?);
        } else {
            for (id, name) in rows {
                println!("{id:>4}  {name}");
            }
        }
        return Ok(());
    }

    let mut client = connect(&args.socket, Duration::from_secs(5)).await?;
    match args.command {
        Command::List => {
            let resp = client.list(()).await?.into_inner();
            print_states(resp.gpu_state, args.json)?;
        }
        Command::Get { ids } => {
            let resp = client
                .get_gpu_state(GpuGetRequest { id: ids })
                .await?
                .into_inner();
            print_states(resp.gpu_state, args.json)?;
        }
        Command::SetError { file } => {
            let data = std::fs::read_to_string(&file)?;
            let req: ErrorFile = serde_json::from_str(&data)?;
            let resp = client
                .set_error(GpuErrorRequest {
                    id: req.id,
                    fields: req.fields,
                    counts: req.counts,
                })
                .await?
                .into_inner();
            println!("GPU {} updated fields: {}", resp.id, resp.fields.join(", "));
        }
        Command::Devices => {}
    }
    Ok(())
}

fn print_states(states: Vec<GpuState>, json: bool) -> CliResult<()> {
    let views: Vec<StateView> = states.into_iter().map(StateView::from).collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&views)?);
        return Ok(());
    }
    println!("{:<4} {:<38} {:<10} {:<16} WORKLOAD", "ID", "UUID", "HEALTH", "DEVICE");
    for v in views {
        println!(
            "{:<4} {:<38} {:<10} {:<16} {}",
            v.id,
            v.uuid,
            v.health,
            v.device,
            v.associated_workload.join("; ")
        );
    }
    Ok(())
}
