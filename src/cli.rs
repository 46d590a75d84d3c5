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
use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::common::config::ExporterConfig;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the metrics config document.
    #[arg(long = "amd-metrics-config", default_value = ExporterConfig::DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
    /// Port of the local GPU agent gRPC endpoint.
    #[arg(long, default_value_t = ExporterConfig::DEFAULT_AGENT_PORT)]
    pub agent_grpc_port: u16,
    /// Address the metrics listener binds to.
    #[arg(long, default_value = ExporterConfig::DEFAULT_BIND_ADDR)]
    pub bind: IpAddr,
    /// Accept SetError calls on the health socket.
    #[arg(long)]
    pub enable_debug_api: bool,
    /// Allow profiler counter families when the config enables this host.
    #[arg(long)]
    pub enable_profiler: bool,
    /// Do not bind the batch-job push socket.
    #[arg(long)]
    pub zmq_disable: bool,
    /// Health socket path.
    #[arg(long, default_value = ExporterConfig::HEALTH_SOCKET_PATH, hide = true)]
    pub health_socket: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["amd-metrics-exporter"]);
        assert_eq!(cli.config, PathBuf::from("/etc/metrics/config.json"));
        assert_eq!(cli.agent_grpc_port, 50061);
        assert_eq!(cli.bind, IpAddr::from([0, 0, 0, 0]));
        assert!(!cli.enable_debug_api);
        assert!(!cli.enable_profiler);
        assert!(!cli.zmq_disable);
    }

    #[test]
    fn test_flags() {
        let cli = Cli::parse_from([
            "amd-metrics-exporter",
            "--amd-metrics-config",
            "/tmp/c.json",
            "--agent-grpc-port",
            "50062",
            "--bind",
            "127.0.0.1",
            "--enable-debug-api",
            "--zmq-disable",
        ]);
        assert_eq!(cli.config, PathBuf::from("/tmp/c.json"));
        assert_eq!(cli.agent_grpc_port, 50062);
        assert_eq!(cli.bind, IpAddr::from([127, 0, 0, 1]));
        assert!(cli.enable_debug_api);
        assert!(cli.zmq_disable);
    }
}
