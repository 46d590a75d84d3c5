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

//! Batch job attribution.
//!
//! Job prolog/epilog scripts drop one JSON file per job into the job
//! directory. Each file is a flat map of the job environment; the devices in
//! `CUDA_VISIBLE_DEVICES` are attributed to that job until the file is
//! removed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{JobInfo, SchedulerKind, Workload};
use crate::common::config::ExporterConfig;
use crate::error::Result;
use crate::traits::SchedulerClient;

const VISIBLE_DEVICES_KEY: &str = "CUDA_VISIBLE_DEVICES";

type JobMap = Arc<RwLock<HashMap<String, JobInfo>>>;

#[derive(Debug, Clone)]
pub struct SlurmOptions {
    pub job_dir: PathBuf,
    /// Bind the push socket (only with the `zmq` feature).
    pub enable_zmq: bool,
    pub zmq_port: u16,
}

impl Default for SlurmOptions {
    fn default() -> Self {
        Self {
            job_dir: PathBuf::from(ExporterConfig::SLURM_JOB_DIR),
            enable_zmq: true,
            zmq_port: ExporterConfig::ZMQ_PORT,
        }
    }
}

/// Push notification carrying the same content as a job file event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
#[cfg_attr(not(feature = "zmq"), allow(dead_code))]
pub(crate) struct JobNotification {
    pub op: JobOp,
    pub name: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum JobOp {
    Write,
    Remove,
}

pub struct SlurmScheduler {
    jobs: JobMap,
    cancel: CancellationToken,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl SlurmScheduler {
    /// Watch `opts.job_dir`, replay the files already there, and (with the
    /// `zmq` feature) listen for push notifications.
    pub async fn start(opts: SlurmOptions, cancel: CancellationToken) -> Result<Self> {
        tokio::fs::create_dir_all(&opts.job_dir).await?;
        let jobs: JobMap = Arc::new(RwLock::new(HashMap::new()));
        let cancel = cancel.child_token();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let _ = tx.send(res);
        })?;
        watcher.watch(&opts.job_dir, RecursiveMode::NonRecursive)?;
        info!("Watching job directory {}", opts.job_dir.display());

        replay_existing(&opts.job_dir, &jobs).await;

        let loop_jobs = jobs.clone();
        let loop_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = loop_cancel.cancelled() => break,
                    res = rx.recv() => match res {
                        Some(Ok(event)) => handle_event(&loop_jobs, event).await,
                        Some(Err(e)) => warn!("job directory watch error: {e}"),
                        None => break,
                    },
                }
            }
            debug!("job directory watcher stopped");
        });

        #[cfg(feature = "zmq")]
        if opts.enable_zmq {
            push::spawn_listener(opts.zmq_port, jobs.clone(), cancel.clone()).await?;
        }
        #[cfg(not(feature = "zmq"))]
        if opts.enable_zmq {
            debug!("push listener not built in; relying on job files only");
        }

        Ok(Self {
            jobs,
            cancel,
            watcher: Mutex::new(Some(watcher)),
        })
    }
}

async fn replay_existing(dir: &Path, jobs: &JobMap) {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to read {}: {e}", dir.display());
            return;
        }
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if let Some(name) = job_file_name(&path) {
            write_from_file(jobs, name, &path).await;
        }
    }
}

/// File name if it looks like a job file (a bare integer).
fn job_file_name(path: &Path) -> Option<&str> {
    let name = path.file_name()?.to_str()?;
    if name.parse::<i64>().is_ok() {
        Some(name)
    } else {
        debug!("skip {}", path.display());
        None
    }
}

async fn handle_event(jobs: &JobMap, event: notify::Event) {
    for path in &event.paths {
        let Some(name) = job_file_name(path) else {
            continue;
        };
        match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) => write_from_file(jobs, name, path).await,
            EventKind::Remove(_) => {
                remove_job(&mut *jobs.write().await, name);
                info!("job file {name} removed");
            }
            _ => {}
        }
    }
}

async fn write_from_file(jobs: &JobMap, name: &str, path: &Path) {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) => {
            debug!("failed to read {}: {e}", path.display());
            return;
        }
    };
    match serde_json::from_slice::<HashMap<String, String>>(&data) {
        Ok(env) => {
            let mut map = jobs.write().await;
            apply_job_env(&mut map, &env);
            debug!("job file {name} applied, {} devices attributed", map.len());
        }
        Err(e) => warn!("could not parse job env {}: {e}", path.display()),
    }
}

/// Attribute every device listed in the job env to that job.
pub(crate) fn apply_job_env(jobs: &mut HashMap<String, JobInfo>, env: &HashMap<String, String>) {
    let Some(devices) = env.get(VISIBLE_DEVICES_KEY) else {
        return;
    };
    let field = |k: &str| env.get(k).cloned().unwrap_or_default();
    let info = JobInfo {
        id: field("SLURM_JOB_ID"),
        user: field("SLURM_JOB_USER"),
        partition: field("SLURM_JOB_PARTITION"),
        cluster: field("SLURM_CLUSTER_NAME"),
    };
    for device in devices.split(',') {
        jobs.insert(device.trim().to_string(), info.clone());
    }
}

pub(crate) fn remove_job(jobs: &mut HashMap<String, JobInfo>, name: &str) {
    jobs.remove(name);
}

#[cfg_attr(not(feature = "zmq"), allow(dead_code))]
pub(crate) fn apply_notification(jobs: &mut HashMap<String, JobInfo>, note: &JobNotification) {
    match note.op {
        JobOp::Write => apply_job_env(jobs, &note.env),
        JobOp::Remove => remove_job(jobs, &note.name),
    }
}

#[cfg(feature = "zmq")]
mod push {
    use super::*;
    use zeromq::{PullSocket, Socket, SocketRecv};

    use crate::error::Error;

    pub(super) async fn spawn_listener(
        port: u16,
        jobs: JobMap,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut socket = PullSocket::new();
        let endpoint = format!("tcp://0.0.0.0:{port}");
        socket
            .bind(&endpoint)
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
        info!("Listening for job notifications on {endpoint}");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    msg = socket.recv() => match msg {
                        Ok(msg) => {
                            let Some(frame) = msg.get(0) else { continue };
                            match serde_json::from_slice::<JobNotification>(frame) {
                                Ok(note) => {
                                    apply_notification(&mut *jobs.write().await, &note);
                                    debug!("job notification {:?} {} applied", note.op, note.name);
                                }
                                Err(e) => warn!("invalid job notification: {e}"),
                            }
                        }
                        Err(e) => {
                            warn!("job notification socket error: {e}");
                            break;
                        }
                    },
                }
            }
        });
        Ok(())
    }
}

#[async_trait]
impl SchedulerClient for SlurmScheduler {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::Slurm
    }

    async fn list_workloads(&self) -> Result<HashMap<String, Workload>> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .iter()
            .map(|(k, v)| (k.clone(), Workload::Job(v.clone())))
            .collect())
    }

    async fn close(&self) {
        self.cancel.cancel();
        let watcher = match self.watcher.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(watcher);
    }
}
