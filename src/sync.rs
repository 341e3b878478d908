//! Synchronizer core: per-file change detection and cycle orchestration.
//!
//! One cycle walks the filesystem listing, decides per file whether it is
//! new, unchanged, attribute-changed, or content-changed, applies the
//! matching actions against the vector backend and the metadata store, and
//! finally removes every file not confirmed by this cycle's scan
//! generation.
//!
//! Side-effect order for newly indexed content is load-bearing: documents
//! are written to the vector backend first, the FileRecord second, the
//! DocumentRecord links last. A crash in between leaves no FileRecord, so
//! the next cycle re-indexes the file from scratch; the stale vector
//! documents from the interrupted attempt are an accepted at-least-once
//! duplication window.
//!
//! Concurrency is throttled at three independent levels: files processed
//! end-to-end, embedding calls, and vector-store writes. The embedding and
//! indexing ceilings are global semaphores shared by all in-flight files;
//! within one file, chunk order is preserved so chunk `i` always pairs with
//! vector `i`.

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt, TryStreamExt};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::VectorBackend;
use crate::chunk;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::loader;
use crate::metadata;
use crate::models::{DocMetadata, DocumentRecord, ScannedFile, VectorDocument};
use crate::scanner;

fn vector_ids(documents: Vec<DocumentRecord>) -> Vec<String> {
    documents.into_iter().map(|d| d.vector_id).collect()
}

/// Counters for one scan cycle, logged as the per-cycle summary.
#[derive(Debug, Default, Clone)]
pub struct CycleStats {
    pub scanned: usize,
    pub indexed: usize,
    pub reindexed: usize,
    pub unchanged: usize,
    pub acl_updated: usize,
    pub skipped_empty: usize,
    pub failed: usize,
    pub deleted_files: usize,
    pub deleted_documents: usize,
}

enum FileOutcome {
    Indexed,
    Reindexed,
    Unchanged,
    AclUpdated,
    SkippedEmpty,
    Failed,
}

pub struct Synchronizer {
    config: Config,
    pool: SqlitePool,
    backend: Arc<dyn VectorBackend>,
    embedder: Arc<dyn Embedder>,
    embed_slots: Arc<Semaphore>,
    index_slots: Arc<Semaphore>,
}

impl Synchronizer {
    pub fn new(
        config: Config,
        pool: SqlitePool,
        backend: Arc<dyn VectorBackend>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        let embed_slots = Arc::new(Semaphore::new(config.concurrency.embedding));
        let index_slots = Arc::new(Semaphore::new(config.concurrency.indexing));
        Self {
            config,
            pool,
            backend,
            embedder,
            embed_slots,
            index_slots,
        }
    }

    /// Scan the configured root and run one full cycle.
    pub async fn run_cycle(&self) -> Result<CycleStats> {
        let files = scanner::scan(&self.config.scanner)?;
        self.run_cycle_with(files).await
    }

    /// Run one full cycle over a prepared listing.
    pub async fn run_cycle_with(&self, files: Vec<ScannedFile>) -> Result<CycleStats> {
        let scan_id = Uuid::new_v4().to_string();
        info!(scan_id = %scan_id, files = files.len(), "scan cycle started");

        let mut stats = CycleStats {
            scanned: files.len(),
            ..Default::default()
        };

        let scan_id_ref = scan_id.as_str();
        let outcomes: Vec<FileOutcome> = stream::iter(files)
            .map(|file| {
                async move {
                    match self.process_file(&file, scan_id_ref).await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            warn!(
                                path = %file.path.display(),
                                error = %e,
                                "file processing failed; will retry next cycle"
                            );
                            FileOutcome::Failed
                        }
                    }
                }
            })
            .buffer_unordered(self.config.concurrency.files)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                FileOutcome::Indexed => stats.indexed += 1,
                FileOutcome::Reindexed => stats.reindexed += 1,
                FileOutcome::Unchanged => stats.unchanged += 1,
                FileOutcome::AclUpdated => stats.acl_updated += 1,
                FileOutcome::SkippedEmpty => stats.skipped_empty += 1,
                FileOutcome::Failed => stats.failed += 1,
            }
        }

        // Tombstone GC: anything not confirmed by this generation is gone
        // from the filesystem. A metadata store failure here aborts the
        // rest of the cycle.
        let (deleted_files, deleted_documents) = self
            .cleanup(&scan_id)
            .await
            .with_context(|| "cleanup failed; stale entries remain until next cycle")?;
        stats.deleted_files = deleted_files;
        stats.deleted_documents = deleted_documents;

        info!(
            scan_id = %scan_id,
            scanned = stats.scanned,
            indexed = stats.indexed,
            reindexed = stats.reindexed,
            unchanged = stats.unchanged,
            acl_updated = stats.acl_updated,
            skipped_empty = stats.skipped_empty,
            failed = stats.failed,
            deleted_files = stats.deleted_files,
            deleted_documents = stats.deleted_documents,
            "scan cycle complete"
        );

        Ok(stats)
    }

    /// Per-file change detection.
    async fn process_file(&self, file: &ScannedFile, scan_id: &str) -> Result<FileOutcome> {
        if file.size == 0 {
            debug!(path = %file.path.display(), "empty file");
            return Ok(FileOutcome::SkippedEmpty);
        }

        let existing = metadata::find_file_by_ino(&self.pool, file.ino).await?;

        match existing {
            Some(record) if record.mtime_ms == file.mtime_ms => {
                if record.ctime_ms != file.ctime_ms {
                    info!(path = %file.path.display(), "file attributes changed - updating acl");
                    let ids = vector_ids(metadata::documents_for_file(&self.pool, &record.id).await?);
                    self.backend.bulk_update_acl(&ids, &file.acl).await?;
                    metadata::update_ctime(&self.pool, &record.id, file.ctime_ms).await?;
                    metadata::update_scan_id(&self.pool, &record.id, scan_id).await?;
                    return Ok(FileOutcome::AclUpdated);
                }

                debug!(path = %file.path.display(), "existing file - no changes");
                metadata::update_scan_id(&self.pool, &record.id, scan_id).await?;
                Ok(FileOutcome::Unchanged)
            }
            Some(record) => {
                info!(path = %file.path.display(), "file content changed - reindexing");
                let ids = vector_ids(metadata::documents_for_file(&self.pool, &record.id).await?);
                self.backend.bulk_delete(&ids).await?;
                metadata::delete_file(&self.pool, &record.id).await?;

                self.index_file(file, scan_id).await?;
                Ok(FileOutcome::Reindexed)
            }
            None => {
                debug!(path = %file.path.display(), "new file");
                self.index_file(file, scan_id).await?;
                Ok(FileOutcome::Indexed)
            }
        }
    }

    /// Full index path: chunk, embed, write to the vector backend, then
    /// persist the FileRecord and its document links.
    async fn index_file(&self, file: &ScannedFile, scan_id: &str) -> Result<usize> {
        let sections = loader::load(&file.path)?;
        let chunks = chunk::split_sections(
            &sections,
            self.config.chunking.chunk_size,
            self.config.chunking.chunk_overlap,
        );
        debug!(path = %file.path.display(), chunks = chunks.len(), "file chunked");

        // One embedding call per chunk under the global ceiling; `buffered`
        // keeps output order aligned with chunk order.
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors: Vec<Vec<f32>> = stream::iter(texts)
            .map(|text| async move {
                let _permit = self.embed_slots.acquire().await?;
                let mut vectors = self.embedder.embed(&[text]).await?;
                vectors
                    .pop()
                    .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
            })
            .buffered(self.config.concurrency.embedding)
            .try_collect()
            .await?;

        let documents: Vec<VectorDocument> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorDocument {
                text: chunk.text.clone(),
                vector,
                metadata: DocMetadata::merge(chunk, file),
            })
            .collect();

        let vector_ids: Vec<String> = stream::iter(documents)
            .map(|document| async move {
                let _permit = self.index_slots.acquire().await?;
                self.backend.index(&document).await
            })
            .buffered(self.config.concurrency.indexing)
            .try_collect()
            .await?;

        let file_id = metadata::insert_file(&self.pool, file, scan_id).await?;
        metadata::insert_documents(&self.pool, &file_id, &vector_ids).await?;

        debug!(
            path = %file.path.display(),
            documents = vector_ids.len(),
            "file indexed"
        );
        Ok(vector_ids.len())
    }

    /// Delete every file (and its documents) absent from this scan
    /// generation, from the vector backend first and the metadata store
    /// second.
    async fn cleanup(&self, scan_id: &str) -> Result<(usize, usize)> {
        let stale = metadata::stale_files(&self.pool, scan_id).await?;
        if stale.is_empty() {
            debug!("no deleted files identified");
            return Ok((0, 0));
        }

        let ids: Vec<String> = stale
            .iter()
            .flat_map(|f| f.vector_ids.iter().cloned())
            .collect();
        info!(
            files = stale.len(),
            documents = ids.len(),
            "removing entries for files absent from this scan"
        );

        self.backend.bulk_delete(&ids).await?;
        metadata::delete_stale(&self.pool, scan_id).await?;

        Ok((stale.len(), ids.len()))
    }
}
