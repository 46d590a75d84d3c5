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

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::common::config::ExporterConfig;

/// Install the global tracing subscriber.
///
/// Logs go to stdout; when `LOGDIR` is set they are also appended to
/// `<LOGDIR>/exporter.log`.
pub fn init_logging() {
    let file_layer = std::env::var_os("LOGDIR").and_then(|dir| {
        let mut path = PathBuf::from(dir);
        if let Err(e) = std::fs::create_dir_all(&path) {
            eprintln!("Failed to create log directory {}: {e}", path.display());
            return None;
        }
        path.push(ExporterConfig::LOG_FILE_NAME);
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            ),
            Err(e) => {
                eprintln!("Failed to open log file {}: {e}", path.display());
                None
            }
        }
    });

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "amd_metrics_exporter=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
}
