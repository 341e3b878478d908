//! End-to-end scan cycle tests against a temp directory, a temp metadata
//! store, a recording in-memory vector backend, and a deterministic
//! embedder.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use embedsync::backend::VectorBackend;
use embedsync::config::{
    BackendConfig, ChunkingConfig, ConcurrencyConfig, Config, EmbeddingConfig, IndexServiceConfig,
    ScannerConfig, StoreConfig,
};
use embedsync::embedding::Embedder;
use embedsync::metadata;
use embedsync::models::VectorDocument;
use embedsync::scanner;
use embedsync::sync::Synchronizer;

#[derive(Debug, Clone)]
struct StoredDoc {
    text: String,
    vector: Vec<f32>,
    metadata: serde_json::Value,
}

/// In-memory vector backend that records every call.
#[derive(Default)]
struct MockBackend {
    docs: Mutex<HashMap<String, StoredDoc>>,
    next_id: AtomicUsize,
    deleted: Mutex<Vec<String>>,
    acl_calls: Mutex<Vec<(Vec<String>, Vec<String>)>>,
}

impl MockBackend {
    fn ids(&self) -> HashSet<String> {
        self.docs.lock().unwrap().keys().cloned().collect()
    }

    fn deleted_ids(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl VectorBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }

    async fn index(&self, document: &VectorDocument) -> Result<String> {
        let id = format!("vec-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.docs.lock().unwrap().insert(
            id.clone(),
            StoredDoc {
                text: document.text.clone(),
                vector: document.vector.clone(),
                metadata: serde_json::to_value(&document.metadata)?,
            },
        );
        Ok(id)
    }

    async fn bulk_delete(&self, ids: &[String]) -> Result<()> {
        let mut docs = self.docs.lock().unwrap();
        for id in ids {
            docs.remove(id);
        }
        self.deleted.lock().unwrap().extend(ids.iter().cloned());
        Ok(())
    }

    async fn bulk_update_acl(&self, ids: &[String], acl: &[String]) -> Result<()> {
        let mut docs = self.docs.lock().unwrap();
        for id in ids {
            if let Some(doc) = docs.get_mut(id) {
                doc.metadata["acl"] = serde_json::json!(acl);
            }
        }
        self.acl_calls
            .lock()
            .unwrap()
            .push((ids.to_vec(), acl.to_vec()));
        Ok(())
    }
}

/// Backend wrapper that fails `index` for documents containing a marker.
struct PoisonBackend(Arc<MockBackend>);

#[async_trait]
impl VectorBackend for PoisonBackend {
    fn name(&self) -> &str {
        "poison"
    }

    async fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }

    async fn index(&self, document: &VectorDocument) -> Result<String> {
        if document.text.contains("poison") {
            anyhow::bail!("simulated write failure");
        }
        self.0.index(document).await
    }

    async fn bulk_delete(&self, ids: &[String]) -> Result<()> {
        self.0.bulk_delete(ids).await
    }

    async fn bulk_update_acl(&self, ids: &[String], acl: &[String]) -> Result<()> {
        self.0.bulk_update_acl(ids, acl).await
    }
}

/// Deterministic embedder: the vector encodes the text length.
struct MockEmbedder;

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| vec![t.chars().count() as f32, 1.0, 2.0, 3.0])
            .collect())
    }

    fn dims(&self) -> usize {
        4
    }
}

fn test_config(root: &Path, store: &Path, chunk_size: usize, chunk_overlap: usize) -> Config {
    Config {
        store: StoreConfig {
            path: store.to_path_buf(),
        },
        scanner: ScannerConfig {
            root: root.to_path_buf(),
            interval_secs: 300,
            exclude_globs: vec![],
            follow_symlinks: false,
        },
        chunking: ChunkingConfig {
            chunk_size,
            chunk_overlap,
        },
        concurrency: ConcurrencyConfig {
            files: 2,
            embedding: 4,
            indexing: 4,
        },
        embedding: EmbeddingConfig {
            provider: "ollama".to_string(),
            model: "test".to_string(),
            dims: 4,
            url: None,
            timeout_secs: 30,
            max_retries: 0,
        },
        backend: BackendConfig {
            kind: "index-service".to_string(),
            index_service: Some(IndexServiceConfig {
                endpoint: "http://localhost:9200".to_string(),
                index: "test".to_string(),
                timeout_secs: 30,
                max_retries: 0,
            }),
            relational: None,
        },
    }
}

struct Harness {
    _tmp: tempfile::TempDir,
    root: std::path::PathBuf,
    config: Config,
    pool: sqlx::SqlitePool,
    backend: Arc<MockBackend>,
    sync: Synchronizer,
}

async fn harness(chunk_size: usize, chunk_overlap: usize) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("data");
    fs::create_dir(&root).unwrap();

    let config = test_config(
        &root,
        &tmp.path().join("meta.sqlite"),
        chunk_size,
        chunk_overlap,
    );
    let pool = metadata::connect(&config.store.path).await.unwrap();
    metadata::migrate(&pool).await.unwrap();

    let backend = Arc::new(MockBackend::default());
    let sync = Synchronizer::new(
        config.clone(),
        pool.clone(),
        backend.clone(),
        Arc::new(MockEmbedder),
    );

    Harness {
        _tmp: tmp,
        root,
        config,
        pool,
        backend,
        sync,
    }
}

#[tokio::test]
async fn new_file_lifecycle_index_confirm_delete() {
    let h = harness(256, 32).await;
    let content = "a".repeat(120);
    fs::write(h.root.join("a.txt"), &content).unwrap();

    // cycle 1: new file -> one chunk -> one document
    let stats = h.sync.run_cycle().await.unwrap();
    assert_eq!(stats.indexed, 1);
    assert_eq!(metadata::count_files(&h.pool).await.unwrap(), 1);
    assert_eq!(metadata::count_documents(&h.pool).await.unwrap(), 1);
    assert_eq!(h.backend.ids().len(), 1);

    let ino = scanner::scan(&h.config.scanner).unwrap()[0].ino;
    let first = metadata::find_file_by_ino(&h.pool, ino)
        .await
        .unwrap()
        .unwrap();

    // cycle 2: no change -> scan generation advances, nothing else moves
    let stats = h.sync.run_cycle().await.unwrap();
    assert_eq!(stats.unchanged, 1);
    assert_eq!(stats.indexed, 0);
    assert_eq!(metadata::count_documents(&h.pool).await.unwrap(), 1);

    let second = metadata::find_file_by_ino(&h.pool, ino)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(first.scan_id, second.scan_id);
    assert_eq!(first.mtime_ms, second.mtime_ms);

    // cycle 3: file deleted -> cleanup removes document and record
    fs::remove_file(h.root.join("a.txt")).unwrap();
    let stats = h.sync.run_cycle().await.unwrap();
    assert_eq!(stats.deleted_files, 1);
    assert_eq!(stats.deleted_documents, 1);
    assert_eq!(metadata::count_files(&h.pool).await.unwrap(), 0);
    assert_eq!(metadata::count_documents(&h.pool).await.unwrap(), 0);
    assert!(h.backend.ids().is_empty());
}

#[tokio::test]
async fn unchanged_cycles_are_idempotent() {
    let h = harness(64, 16).await;
    fs::write(h.root.join("a.txt"), "alpha beta gamma delta epsilon").unwrap();
    fs::write(h.root.join("b.md"), "# Notes\n\nSome markdown body text.").unwrap();

    h.sync.run_cycle().await.unwrap();
    let ids_after_first = h.backend.ids();
    let docs_after_first = metadata::count_documents(&h.pool).await.unwrap();

    for _ in 0..3 {
        let stats = h.sync.run_cycle().await.unwrap();
        assert_eq!(stats.unchanged, 2);
        assert_eq!(stats.indexed + stats.reindexed + stats.failed, 0);
        assert_eq!(h.backend.ids(), ids_after_first);
        assert_eq!(
            metadata::count_documents(&h.pool).await.unwrap(),
            docs_after_first
        );
    }
}

#[tokio::test]
async fn content_change_replaces_documents_with_disjoint_ids() {
    let h = harness(64, 16).await;
    let path = h.root.join("b.txt");
    fs::write(&path, "short body").unwrap();

    h.sync.run_cycle().await.unwrap();
    let old_ids = h.backend.ids();
    assert_eq!(old_ids.len(), 1);

    // rewrite with enough text to produce several chunks, then present the
    // file with a bumped mtime
    let longer = "many words here ".repeat(12);
    fs::write(&path, &longer).unwrap();
    let mut files = scanner::scan(&h.config.scanner).unwrap();
    let record = metadata::find_file_by_ino(&h.pool, files[0].ino)
        .await
        .unwrap()
        .unwrap();
    files[0].mtime_ms = record.mtime_ms + 10;
    files[0].ctime_ms = record.ctime_ms + 10;

    let stats = h.sync.run_cycle_with(files.clone()).await.unwrap();
    assert_eq!(stats.reindexed, 1);

    let new_ids = h.backend.ids();
    assert!(new_ids.len() > 1);
    assert!(new_ids.is_disjoint(&old_ids));
    for old in &old_ids {
        assert!(h.backend.deleted_ids().contains(old));
    }
    assert_eq!(
        metadata::count_documents(&h.pool).await.unwrap() as usize,
        new_ids.len()
    );

    // record reflects the newly observed timestamps
    let updated = metadata::find_file_by_ino(&h.pool, files[0].ino)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.mtime_ms, files[0].mtime_ms);
    assert_eq!(updated.ctime_ms, files[0].ctime_ms);
}

#[tokio::test]
async fn ctime_only_change_updates_acl_in_place() {
    let h = harness(256, 32).await;
    fs::write(h.root.join("c.txt"), "stable content, shifting acl").unwrap();

    h.sync.run_cycle().await.unwrap();
    let ids_before = h.backend.ids();
    let vector_before = {
        let docs = h.backend.docs.lock().unwrap();
        docs.values().next().unwrap().vector.clone()
    };

    let mut files = scanner::scan(&h.config.scanner).unwrap();
    files[0].ctime_ms += 5_000;
    files[0].acl = vec!["uid:42".to_string(), "gid:42".to_string()];

    let stats = h.sync.run_cycle_with(files.clone()).await.unwrap();
    assert_eq!(stats.acl_updated, 1);
    assert_eq!(stats.reindexed, 0);

    // same documents, same vectors, new acl
    assert_eq!(h.backend.ids(), ids_before);
    let docs = h.backend.docs.lock().unwrap();
    let doc = docs.values().next().unwrap();
    assert_eq!(doc.vector, vector_before);
    assert_eq!(doc.metadata["acl"], serde_json::json!(["uid:42", "gid:42"]));
    drop(docs);

    let calls = h.backend.acl_calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, vec!["uid:42", "gid:42"]);

    let record = metadata::find_file_by_ino(&h.pool, files[0].ino)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.ctime_ms, files[0].ctime_ms);
}

#[tokio::test]
async fn empty_file_is_skipped_entirely() {
    let h = harness(64, 16).await;
    fs::write(h.root.join("empty.txt"), "").unwrap();

    let stats = h.sync.run_cycle().await.unwrap();
    assert_eq!(stats.skipped_empty, 1);
    assert_eq!(metadata::count_files(&h.pool).await.unwrap(), 0);
    assert!(h.backend.ids().is_empty());
}

#[tokio::test]
async fn unsupported_file_is_skipped_and_retried() {
    let h = harness(64, 16).await;
    fs::write(h.root.join("blob.bin"), "binary-ish").unwrap();
    fs::write(h.root.join("ok.txt"), "plain text body").unwrap();

    let stats = h.sync.run_cycle().await.unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.indexed, 1);
    assert_eq!(metadata::count_files(&h.pool).await.unwrap(), 1);

    // retried unconditionally on the next cycle, same outcome
    let stats = h.sync.run_cycle().await.unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.unchanged, 1);
}

#[tokio::test]
async fn backend_failure_scoped_to_one_file() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("data");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("good.txt"), "wholesome content").unwrap();
    fs::write(root.join("bad.txt"), "this one is poison").unwrap();

    let config = test_config(&root, &tmp.path().join("meta.sqlite"), 256, 32);
    let pool = metadata::connect(&config.store.path).await.unwrap();
    metadata::migrate(&pool).await.unwrap();

    let inner = Arc::new(MockBackend::default());
    let sync = Synchronizer::new(
        config,
        pool.clone(),
        Arc::new(PoisonBackend(inner.clone())),
        Arc::new(MockEmbedder),
    );

    let stats = sync.run_cycle().await.unwrap();
    assert_eq!(stats.indexed, 1);
    assert_eq!(stats.failed, 1);

    // the failed file left no metadata behind, so it is NEW next cycle
    assert_eq!(metadata::count_files(&pool).await.unwrap(), 1);
    assert_eq!(inner.ids().len(), 1);
}

#[tokio::test]
async fn csv_rows_become_separate_documents() {
    let h = harness(256, 32).await;
    fs::write(
        h.root.join("people.csv"),
        "name,role\nada,engineer\ngrace,admiral\n",
    )
    .unwrap();

    let stats = h.sync.run_cycle().await.unwrap();
    assert_eq!(stats.indexed, 1);
    assert_eq!(metadata::count_documents(&h.pool).await.unwrap(), 2);

    let docs = h.backend.docs.lock().unwrap();
    assert!(docs.values().any(|d| d.text.contains("name: ada")));
    assert!(docs.values().any(|d| d.text.contains("role: admiral")));
}

#[tokio::test]
async fn document_metadata_merges_file_attributes() {
    let h = harness(256, 32).await;
    fs::write(h.root.join("meta.txt"), "payload with attributes").unwrap();

    h.sync.run_cycle().await.unwrap();

    let files = scanner::scan(&h.config.scanner).unwrap();
    let docs = h.backend.docs.lock().unwrap();
    let doc = docs.values().next().unwrap();

    assert_eq!(doc.metadata["mtime_ms"], serde_json::json!(files[0].mtime_ms));
    assert_eq!(doc.metadata["size"], serde_json::json!(files[0].size));
    assert_eq!(doc.metadata["acl"], serde_json::json!(files[0].acl));
    assert!(doc.metadata["source"]
        .as_str()
        .unwrap()
        .ends_with("meta.txt"));
    assert_eq!(doc.metadata["loc"]["from_line"], serde_json::json!(1));
}
