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

//! Logical partition discovery and KFD memory counters from sysfs.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::common::config::ExporterConfig;

static XCP_RE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"amdgpu_xcp_(\d+)").ok());
static RENDER_RE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"renderD(\d+)").ok());

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Map gpu id (render minor modulo 128) to logical device name
/// `amdgpu_xcp_N`. Unreadable or unmatched entries are skipped.
pub fn find_logical_devices(pattern: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let (Some(xcp_re), Some(render_re)) = (XCP_RE.as_ref(), RENDER_RE.as_ref()) else {
        return out;
    };
    let paths = match glob::glob(pattern) {
        Ok(paths) => paths,
        Err(e) => {
            warn!("invalid device glob {pattern}: {e}");
            return out;
        }
    };
    for entry in paths {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                debug!("skip unreadable entry: {e}");
                continue;
            }
        };
        if fs::metadata(&path).is_err() {
            continue;
        }
        let text = path.to_string_lossy();
        let (Some(xcp), Some(render)) = (xcp_re.captures(&text), render_re.captures(&text)) else {
            continue;
        };
        let Ok(render_minor) = render[1].parse::<u32>() else {
            continue;
        };
        let gpu_id = render_minor % ExporterConfig::RENDER_START_ID;
        out.insert(
            gpu_id.to_string(),
            format!("{}{}", ExporterConfig::LOGICAL_DEVICE_PREFIX, &xcp[1]),
        );
    }
    out
}

/// Used VRAM in MB per KFD topology node id.
pub fn read_used_vram(nodes_dir: &Path) -> HashMap<u32, u64> {
    let mut out = HashMap::new();
    let entries = match fs::read_dir(nodes_dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("cannot read {}: {e}", nodes_dir.display());
            return out;
        }
    };
    for entry in entries.flatten() {
        let Some(node_id) = entry
            .file_name()
            .to_str()
            .and_then(|n| n.parse::<u32>().ok())
        else {
            continue;
        };
        let counter = entry.path().join("mem_banks/0/used_memory");
        match fs::read_to_string(&counter) {
            Ok(text) => match text.trim().parse::<u64>() {
                Ok(bytes) => {
                    out.insert(node_id, bytes / BYTES_PER_MB);
                }
                Err(e) => debug!("bad counter in {}: {e}", counter.display()),
            },
            Err(e) => debug!("skip {}: {e}", counter.display()),
        }
    }
    out
}

/// Handle on the kernel surfaces, with the logical device map captured once.
#[derive(Debug, Clone)]
pub struct SysfsDevices {
    kfd_nodes: PathBuf,
    logical: HashMap<String, String>,
}

impl Default for SysfsDevices {
    fn default() -> Self {
        Self::with_paths(
            ExporterConfig::XCP_RENDER_GLOB,
            ExporterConfig::KFD_TOPOLOGY_NODES,
        )
    }
}

impl SysfsDevices {
    pub fn with_paths(xcp_glob: &str, kfd_nodes: impl Into<PathBuf>) -> Self {
        let logical = find_logical_devices(xcp_glob);
        debug!("logical devices: {logical:?}");
        Self {
            kfd_nodes: kfd_nodes.into(),
            logical,
        }
    }

    /// Logical device name for a gpu id, if the device is a partition.
    pub fn logical_name(&self, gpu_id: &str) -> Option<&str> {
        self.logical.get(gpu_id).map(String::as_str)
    }

    pub fn logical_devices(&self) -> &HashMap<String, String> {
        &self.logical
    }

    pub fn used_vram(&self) -> HashMap<u32, u64> {
        read_used_vram(&self.kfd_nodes)
    }
}
