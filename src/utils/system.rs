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

use std::path::Path;

use crate::common::config::ExporterConfig;

/// Name this node is known by: `DS_NODE_NAME`, then `NODE_NAME`, else empty.
pub fn get_node_name() -> String {
    for var in ["DS_NODE_NAME", "NODE_NAME"] {
        if let Ok(name) = std::env::var(var) {
            if !name.is_empty() {
                return name;
            }
        }
    }
    String::new()
}

/// Hostname used for the `hostname` label and node-scoped API calls.
pub fn get_hostname() -> String {
    let node_name = get_node_name();
    if !node_name.is_empty() {
        return node_name;
    }
    match whoami::fallible::hostname() {
        Ok(name) => name,
        Err(e) => {
            tracing::warn!("Failed to read hostname: {e}");
            String::new()
        }
    }
}

/// Whether the daemon runs under the container orchestrator.
///
/// True when `KUBERNETES_SERVICE_HOST` is set, or when the bare-metal service
/// unit is absent and the kubelet pod-resources socket exists.
pub fn is_kubernetes() -> bool {
    if std::env::var_os("KUBERNETES_SERVICE_HOST").is_some() {
        return true;
    }
    !Path::new(ExporterConfig::SERVICE_FILE).exists()
        && Path::new(ExporterConfig::POD_RESOURCE_SOCKET).exists()
}

/// Strip the trailing `.function` from a PCIe address.
pub fn pcie_base_address(full_addr: &str) -> &str {
    let mut parts = full_addr.split('.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(base), Some(_), None) => base,
        _ => full_addr,
    }
}

/// Canonical 36-char form of a 16-byte device uuid; empty when malformed.
pub fn format_uuid(bytes: &[u8]) -> String {
    match uuid::Uuid::from_slice(bytes) {
        Ok(id) => id.hyphenated().to_string(),
        Err(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcie_base_address() {
        assert_eq!(pcie_base_address("0000:0c:00.1"), "0000:0c:00");
        assert_eq!(pcie_base_address("0000:0c:00"), "0000:0c:00");
        assert_eq!(pcie_base_address("a.b.c"), "a.b.c");
    }

    #[test]
    fn test_format_uuid() {
        let bytes = [
            0x72, 0xff, 0x74, 0x0f, 0x00, 0x00, 0x10, 0x00, 0x80, 0x4c, 0x3b, 0x58, 0xbf, 0x67,
            0x05, 0x0e,
        ];
        assert_eq!(format_uuid(&bytes), "72ff740f-0000-1000-804c-3b58bf67050e");
        assert_eq!(format_uuid(&[1, 2, 3]), "");
    }
}
