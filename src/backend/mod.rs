//! Vector backend abstraction and implementations.
//!
//! One capability interface over two interchangeable stores, selected once
//! at startup by the `[backend] kind` config switch:
//! - **[`index_service`]** — an OpenSearch-style REST index service.
//! - **[`relational`]** — Postgres with the pgvector extension.
//!
//! The synchronizer holds `Arc<dyn VectorBackend>` and never branches on
//! which concrete store it talks to. The two differ in id generation (the
//! index service assigns ids, the relational store accepts caller-minted
//! ones) and in batching (the relational store updates and deletes in one
//! round trip); the interface masks that asymmetry.

pub mod index_service;
pub mod relational;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::BackendConfig;
use crate::models::VectorDocument;

/// Uniform interface over the concrete vector stores.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Prepare the backend for writes: create the index or install the
    /// schema if absent. Idempotent; called once at startup. An unreachable
    /// backend here is a fatal configuration error.
    async fn ensure_ready(&self) -> Result<()>;

    /// Insert one document and return its backend-side id.
    async fn index(&self, document: &VectorDocument) -> Result<String>;

    /// Remove a batch of documents. Ids that are already absent are logged
    /// and tolerated; the batch as a whole still succeeds.
    async fn bulk_delete(&self, ids: &[String]) -> Result<()>;

    /// Partial metadata update: replace the ACL field of each document,
    /// leaving text and vector untouched.
    async fn bulk_update_acl(&self, ids: &[String], acl: &[String]) -> Result<()>;
}

/// Instantiate the backend selected by configuration.
pub async fn create_backend(
    config: &BackendConfig,
    dims: usize,
) -> Result<Arc<dyn VectorBackend>> {
    match config.kind.as_str() {
        "index-service" => {
            let cfg = config
                .index_service
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("[backend.index_service] section missing"))?;
            Ok(Arc::new(index_service::IndexServiceBackend::new(
                cfg, dims,
            )?))
        }
        "relational" => {
            let cfg = config
                .relational
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("[backend.relational] section missing"))?;
            Ok(Arc::new(
                relational::RelationalBackend::connect(cfg, dims).await?,
            ))
        }
        other => bail!("Unknown backend kind: {}", other),
    }
}
