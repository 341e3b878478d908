//! Relational vector backend (Postgres + pgvector).
//!
//! This store accepts caller-supplied primary keys, so document ids are
//! minted client-side before insert. Deletes and ACL updates are true
//! batched statements: one round trip per batch. Provisioning (vector
//! extension, documents table, HNSW index) is an idempotent one-time step
//! outside the per-cycle hot path.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::debug;
use uuid::Uuid;

use crate::config::RelationalConfig;
use crate::models::VectorDocument;

use super::VectorBackend;

pub struct RelationalBackend {
    pool: PgPool,
    dims: usize,
}

impl RelationalBackend {
    pub async fn connect(config: &RelationalConfig, dims: usize) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&config.url)
            .await
            .with_context(|| "Failed to connect to relational vector store")?;

        Ok(Self { pool, dims })
    }

    /// Parse stored vector ids back into UUIDs, skipping (and logging)
    /// anything malformed rather than failing the batch.
    fn parse_ids(ids: &[String]) -> Vec<Uuid> {
        ids.iter()
            .filter_map(|id| match Uuid::parse_str(id) {
                Ok(uuid) => Some(uuid),
                Err(_) => {
                    debug!(id, "skipping malformed vector id");
                    None
                }
            })
            .collect()
    }
}

#[async_trait]
impl VectorBackend for RelationalBackend {
    fn name(&self) -> &str {
        "relational"
    }

    async fn ensure_ready(&self) -> Result<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id UUID PRIMARY KEY,
                content TEXT NOT NULL,
                embedding vector({}) NOT NULL,
                metadata JSONB NOT NULL
            )
            "#,
            self.dims
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS documents_embedding_idx \
             ON documents USING hnsw (embedding vector_cosine_ops)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn index(&self, document: &VectorDocument) -> Result<String> {
        let id = Uuid::new_v4();
        let embedding = vector_literal(&document.vector);
        let metadata = serde_json::to_value(&document.metadata)?;

        sqlx::query(
            "INSERT INTO documents (id, content, embedding, metadata) \
             VALUES ($1, $2, $3::vector, $4)",
        )
        .bind(id)
        .bind(&document.text)
        .bind(embedding)
        .bind(metadata)
        .execute(&self.pool)
        .await?;

        Ok(id.to_string())
    }

    async fn bulk_delete(&self, ids: &[String]) -> Result<()> {
        let uuids = Self::parse_ids(ids);
        if uuids.is_empty() {
            return Ok(());
        }

        let result = sqlx::query("DELETE FROM documents WHERE id = ANY($1)")
            .bind(&uuids)
            .execute(&self.pool)
            .await?;

        let missing = uuids.len() as u64 - result.rows_affected();
        if missing > 0 {
            debug!(missing, "some documents were already absent");
        }
        Ok(())
    }

    async fn bulk_update_acl(&self, ids: &[String], acl: &[String]) -> Result<()> {
        let uuids = Self::parse_ids(ids);
        if uuids.is_empty() {
            return Ok(());
        }

        let fragment = serde_json::to_value(acl)?;
        sqlx::query(
            "UPDATE documents SET metadata = jsonb_set(metadata, '{acl}', $1) \
             WHERE id = ANY($2)",
        )
        .bind(fragment)
        .bind(&uuids)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Render a pgvector literal: `[0.1,0.2,...]`.
fn vector_literal(vector: &[f32]) -> String {
    let mut out = String::with_capacity(vector.len() * 10 + 2);
    out.push('[');
    for (i, v) in vector.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&v.to_string());
    }
    out.push(']');
    out
}
