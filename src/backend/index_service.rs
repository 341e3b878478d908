//! Index-service vector backend (OpenSearch-style REST API).
//!
//! Documents are written one at a time: the service's `_bulk` path does not
//! return generated ids, and the synchronizer must persist every id into
//! the metadata store. Deletes and ACL updates do go through `_bulk`, with
//! per-item results inspected so an already-absent document never fails the
//! batch.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::IndexServiceConfig;
use crate::models::VectorDocument;

use super::VectorBackend;

/// Wait after index creation for the configuration to propagate.
const PROPAGATION_WAIT: Duration = Duration::from_secs(10);

pub struct IndexServiceBackend {
    client: reqwest::Client,
    endpoint: String,
    index: String,
    dims: usize,
    max_retries: u32,
}

impl IndexServiceBackend {
    pub fn new(config: &IndexServiceConfig, dims: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            index: config.index.clone(),
            dims,
            max_retries: config.max_retries,
        })
    }

    /// Send a request, retrying 429/5xx/network errors with exponential
    /// backoff. Other 4xx responses fail immediately.
    async fn send_with_retry(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let req = request
                .try_clone()
                .ok_or_else(|| anyhow::anyhow!("request body not cloneable for retry"))?;

            match req.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "Index service error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Index service error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Index service request failed after retries")))
    }

    /// Inspect a `_bulk` response: absent documents are tolerated, other
    /// item failures are logged and the batch continues.
    fn check_bulk_items(&self, json: &serde_json::Value, action: &str) {
        let Some(items) = json.get("items").and_then(|i| i.as_array()) else {
            return;
        };

        for item in items {
            let Some(result) = item.get(action) else {
                continue;
            };
            let status = result.get("status").and_then(|s| s.as_u64()).unwrap_or(200);
            let id = result.get("_id").and_then(|i| i.as_str()).unwrap_or("?");

            if status == 404 {
                debug!(id, "document already absent");
            } else if status >= 300 {
                warn!(id, status, %result, "bulk {} item failed", action);
            }
        }
    }
}

#[async_trait]
impl VectorBackend for IndexServiceBackend {
    fn name(&self) -> &str {
        "index-service"
    }

    async fn ensure_ready(&self) -> Result<()> {
        let url = format!("{}/{}", self.endpoint, self.index);
        let head = self.client.head(&url).send().await.with_context(|| {
            format!("Index service unreachable at {}", self.endpoint)
        })?;

        if head.status().is_success() {
            debug!(index = %self.index, "index exists");
            return Ok(());
        }
        if head.status().as_u16() != 404 {
            bail!("Index service error {} checking index", head.status());
        }

        info!(index = %self.index, "index does not exist - creating");
        let mapping = serde_json::json!({
            "settings": { "index.knn": true },
            "mappings": {
                "properties": {
                    "vector_field": { "type": "knn_vector", "dimension": self.dims },
                    "text": { "type": "text" },
                    "metadata": { "type": "object" }
                }
            }
        });
        self.send_with_retry(self.client.put(&url).json(&mapping))
            .await?;

        // wait until the configuration propagates
        tokio::time::sleep(PROPAGATION_WAIT).await;
        Ok(())
    }

    async fn index(&self, document: &VectorDocument) -> Result<String> {
        let url = format!("{}/{}/_doc", self.endpoint, self.index);
        let body = serde_json::json!({
            "text": document.text,
            "vector_field": document.vector,
            "metadata": document.metadata,
        });

        let response = self.send_with_retry(self.client.post(&url).json(&body)).await?;
        let json: serde_json::Value = response.json().await?;

        json.get("_id")
            .and_then(|i| i.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Index response missing _id"))
    }

    async fn bulk_delete(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut body = String::new();
        for id in ids {
            body.push_str(&serde_json::json!({ "delete": { "_index": self.index, "_id": id } }).to_string());
            body.push('\n');
        }

        let url = format!("{}/_bulk", self.endpoint);
        let response = self
            .send_with_retry(
                self.client
                    .post(&url)
                    .header("Content-Type", "application/x-ndjson")
                    .body(body),
            )
            .await?;

        let json: serde_json::Value = response.json().await?;
        self.check_bulk_items(&json, "delete");
        Ok(())
    }

    async fn bulk_update_acl(&self, ids: &[String], acl: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let fragment = serde_json::json!({ "doc": { "metadata": { "acl": acl } } });
        let mut body = String::new();
        for id in ids {
            body.push_str(&serde_json::json!({ "update": { "_index": self.index, "_id": id } }).to_string());
            body.push('\n');
            body.push_str(&fragment.to_string());
            body.push('\n');
        }

        let url = format!("{}/_bulk", self.endpoint);
        let response = self
            .send_with_retry(
                self.client
                    .post(&url)
                    .header("Content-Type", "application/x-ndjson")
                    .body(body),
            )
            .await?;

        let json: serde_json::Value = response.json().await?;
        self.check_bulk_items(&json, "update");
        Ok(())
    }
}
