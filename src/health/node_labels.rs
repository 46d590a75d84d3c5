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

//! Minimal Kubernetes API client for node labels and pod metadata.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::common::config::ExporterConfig;
use crate::error::{Error, Result};
use crate::traits::{NodeLabeler, PodLabels};

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ObjectMeta {
    name: String,
    namespace: String,
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct Object {
    #[serde(default)]
    metadata: ObjectMeta,
}

#[derive(Debug, Deserialize)]
struct ObjectList {
    #[serde(default)]
    items: Vec<Object>,
}

/// Escape a label key for use in a JSON pointer.
fn pointer_escape(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

/// JSON patch document for the given label changes.
pub fn label_patch_ops(add: &BTreeMap<String, String>, remove: &[String]) -> Value {
    let mut ops = Vec::new();
    for (key, value) in add {
        ops.push(json!({
            "op": "add",
            "path": format!("/metadata/labels/{}", pointer_escape(key)),
            "value": value,
        }));
    }
    for key in remove {
        ops.push(json!({
            "op": "remove",
            "path": format!("/metadata/labels/{}", pointer_escape(key)),
        }));
    }
    Value::Array(ops)
}

/// Talks to the API server with the pod's service account.
#[derive(Debug)]
pub struct KubeNodeLabeler {
    api_base: String,
    token_path: Option<PathBuf>,
    ca_path: Option<PathBuf>,
    client: Mutex<Option<reqwest::Client>>,
}

impl KubeNodeLabeler {
    pub fn new(
        api_base: impl Into<String>,
        token_path: Option<PathBuf>,
        ca_path: Option<PathBuf>,
    ) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token_path,
            ca_path,
            client: Mutex::new(None),
        }
    }

    /// In-cluster client from `KUBERNETES_SERVICE_HOST`/`_PORT`.
    pub fn in_cluster() -> Result<Self> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .map_err(|_| Error::Orchestrator("KUBERNETES_SERVICE_HOST not set".to_string()))?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
        let host = if host.contains(':') {
            format!("[{host}]")
        } else {
            host
        };
        let dir = PathBuf::from(SERVICE_ACCOUNT_DIR);
        Ok(Self::new(
            format!("https://{host}:{port}"),
            Some(dir.join("token")),
            Some(dir.join("ca.crt")),
        ))
    }

    async fn client(&self) -> Result<reqwest::Client> {
        let mut guard = self.client.lock().await;
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(ExporterConfig::QUERY_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(ExporterConfig::CONNECT_TIMEOUT_SECS));
        if let Some(ca) = &self.ca_path {
            let pem = tokio::fs::read(ca).await?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
        }
        let client = builder.build()?;
        info!("kubernetes client created for {}", self.api_base);
        *guard = Some(client.clone());
        Ok(client)
    }

    /// Drop the cached client; the next call builds a new one.
    async fn discard(&self) {
        *self.client.lock().await = None;
    }

    async fn request(&self, method: reqwest::Method, path: &str) -> Result<reqwest::RequestBuilder> {
        let client = self.client().await?;
        let mut req = client.request(method, format!("{}{path}", self.api_base));
        if let Some(token_path) = &self.token_path {
            // tokens are rotated by the kubelet, read per request
            let token = tokio::fs::read_to_string(token_path).await?;
            req = req.bearer_auth(token.trim());
        }
        Ok(req)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let result = match req.send().await {
            Ok(resp) if resp.status().is_success() => Ok(resp),
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                Err(Error::Orchestrator(format!("{status}: {body}")))
            }
            Err(e) => Err(Error::Http(e)),
        };
        if result.is_err() {
            self.discard().await;
        }
        result
    }
}

#[async_trait]
impl NodeLabeler for KubeNodeLabeler {
    async fn node_labels(&self, node: &str) -> Result<BTreeMap<String, String>> {
        let req = self
            .request(reqwest::Method::GET, &format!("/api/v1/nodes/{node}"))
            .await?;
        let obj: Object = self.send(req).await?.json().await?;
        Ok(obj.metadata.labels)
    }

    async fn patch_node_labels(
        &self,
        node: &str,
        add: &BTreeMap<String, String>,
        remove: &[String],
    ) -> Result<()> {
        let body = label_patch_ops(add, remove);
        debug!("node {node} patch {body}");
        let req = self
            .request(reqwest::Method::PATCH, &format!("/api/v1/nodes/{node}"))
            .await?
            .header(reqwest::header::CONTENT_TYPE, "application/json-patch+json")
            .body(body.to_string());
        if let Err(e) = self.send(req).await {
            warn!("failed to patch labels on node {node}: {e}");
            return Err(e);
        }
        Ok(())
    }

    async fn pod_labels(&self, node: &str) -> Result<PodLabels> {
        let req = self
            .request(reqwest::Method::GET, "/api/v1/pods")
            .await?
            .query(&[("fieldSelector", format!("spec.nodeName={node}"))]);
        let list: ObjectList = self.send(req).await?.json().await?;
        Ok(list
            .items
            .into_iter()
            .map(|pod| {
                let meta = pod.metadata;
                ((meta.namespace, meta.name), meta.labels)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_ops() {
        let mut add = BTreeMap::new();
        add.insert(
            "metricsexporter.amd.com.gpu.0.state".to_string(),
            "unhealthy".to_string(),
        );
        let remove = vec!["metricsexporter.amd.com.gpu.3.state".to_string()];
        let ops = label_patch_ops(&add, &remove);
        assert_eq!(
            ops,
            json!([
                {"op": "add", "path": "/metadata/labels/metricsexporter.amd.com.gpu.0.state", "value": "unhealthy"},
                {"op": "remove", "path": "/metadata/labels/metricsexporter.amd.com.gpu.3.state"}
            ])
        );
    }

    #[test]
    fn test_pointer_escape() {
        assert_eq!(pointer_escape("example.com/role"), "example.com~1role");
        assert_eq!(pointer_escape("a~b"), "a~0b");
    }

    #[test]
    fn test_pod_list_parse() {
        let list: ObjectList = serde_json::from_str(
            r#"{"items": [{"metadata": {"name": "p", "namespace": "ns", "labels": {"app": "train"}}},
                          {"metadata": {"name": "q", "namespace": "ns"}}]}"#,
        )
        .unwrap();
        assert_eq!(list.items.len(), 2);
        assert_eq!(list.items[0].metadata.labels["app"], "train");
        assert!(list.items[1].metadata.labels.is_empty());
    }

    #[test]
    fn test_new_trims_base() {
        let labeler = KubeNodeLabeler::new("http://127.0.0.1:8080/", None, None);
        assert_eq!(labeler.api_base, "http://127.0.0.1:8080");
    }
}
