//! Metadata store: the durable record of known files and the vector-store
//! document ids they produced.
//!
//! SQLite via sqlx. This store is the single source of truth for "is this
//! file already indexed" and connects the periodic scanner with the vector
//! backend. The synchronizer is its only writer.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::{DocumentRecord, FileRecord, ScannedFile, StaleFile};

pub async fn connect(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Create the schema. Idempotent.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY,
            ino INTEGER NOT NULL UNIQUE,
            mtime_ms INTEGER NOT NULL,
            ctime_ms INTEGER NOT NULL,
            scan_id TEXT NOT NULL,
            path TEXT NOT NULL,
            indexed_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            file_id TEXT NOT NULL,
            vector_id TEXT NOT NULL,
            FOREIGN KEY (file_id) REFERENCES files(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_file_id ON documents(file_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_scan_id ON files(scan_id)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn find_file_by_ino(pool: &SqlitePool, ino: u64) -> Result<Option<FileRecord>> {
    let row = sqlx::query(
        "SELECT id, ino, mtime_ms, ctime_ms, scan_id, path FROM files WHERE ino = ?",
    )
    .bind(ino as i64)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| FileRecord {
        id: row.get("id"),
        ino: row.get("ino"),
        mtime_ms: row.get("mtime_ms"),
        ctime_ms: row.get("ctime_ms"),
        scan_id: row.get("scan_id"),
        path: row.get("path"),
    }))
}

/// Persist a newly indexed file; returns the store-assigned id.
pub async fn insert_file(pool: &SqlitePool, file: &ScannedFile, scan_id: &str) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO files (id, ino, mtime_ms, ctime_ms, scan_id, path, indexed_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(file.ino as i64)
    .bind(file.mtime_ms)
    .bind(file.ctime_ms)
    .bind(scan_id)
    .bind(file.path.to_string_lossy().as_ref())
    .bind(now)
    .execute(pool)
    .await?;

    Ok(id)
}

/// Link the vector-store document ids produced for a file.
pub async fn insert_documents(
    pool: &SqlitePool,
    file_id: &str,
    vector_ids: &[String],
) -> Result<()> {
    let mut tx = pool.begin().await?;

    for vector_id in vector_ids {
        sqlx::query("INSERT INTO documents (id, file_id, vector_id) VALUES (?, ?, ?)")
            .bind(Uuid::new_v4().to_string())
            .bind(file_id)
            .bind(vector_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn documents_for_file(pool: &SqlitePool, file_id: &str) -> Result<Vec<DocumentRecord>> {
    let rows = sqlx::query("SELECT id, file_id, vector_id FROM documents WHERE file_id = ?")
        .bind(file_id)
        .fetch_all(pool)
        .await?;

    Ok(rows
        .iter()
        .map(|row| DocumentRecord {
            id: row.get("id"),
            file_id: row.get("file_id"),
            vector_id: row.get("vector_id"),
        })
        .collect())
}

/// Confirm a file as present in the given scan generation.
pub async fn update_scan_id(pool: &SqlitePool, file_id: &str, scan_id: &str) -> Result<()> {
    sqlx::query("UPDATE files SET scan_id = ? WHERE id = ?")
        .bind(scan_id)
        .bind(file_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Record an attribute-only change after the backend ACL update succeeded.
pub async fn update_ctime(pool: &SqlitePool, file_id: &str, ctime_ms: i64) -> Result<()> {
    sqlx::query("UPDATE files SET ctime_ms = ? WHERE id = ?")
        .bind(ctime_ms)
        .bind(file_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Remove a file and its owned document links.
pub async fn delete_file(pool: &SqlitePool, file_id: &str) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM documents WHERE file_id = ?")
        .bind(file_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM files WHERE id = ?")
        .bind(file_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Files not confirmed by the given scan generation, with the vector ids of
/// their owned documents. These are files deleted from (or unreadable on)
/// the filesystem since the previous cycle.
pub async fn stale_files(pool: &SqlitePool, scan_id: &str) -> Result<Vec<StaleFile>> {
    let rows = sqlx::query(
        r#"
        SELECT f.id, f.path, d.vector_id
        FROM files f
        LEFT JOIN documents d ON d.file_id = f.id
        WHERE f.scan_id != ?
        ORDER BY f.path
        "#,
    )
    .bind(scan_id)
    .fetch_all(pool)
    .await?;

    let mut stale: Vec<StaleFile> = Vec::new();
    for row in rows {
        let id: String = row.get("id");
        let vector_id: Option<String> = row.get("vector_id");
        match stale.last_mut() {
            Some(last) if last.id == id => {
                if let Some(v) = vector_id {
                    last.vector_ids.push(v);
                }
            }
            _ => stale.push(StaleFile {
                id,
                path: row.get("path"),
                vector_ids: vector_id.into_iter().collect(),
            }),
        }
    }

    Ok(stale)
}

/// Drop every file (and its document links) not confirmed by the given
/// scan generation.
pub async fn delete_stale(pool: &SqlitePool, scan_id: &str) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "DELETE FROM documents WHERE file_id IN (SELECT id FROM files WHERE scan_id != ?)",
    )
    .bind(scan_id)
    .execute(&mut *tx)
    .await?;
    sqlx::query("DELETE FROM files WHERE scan_id != ?")
        .bind(scan_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn count_files(pool: &SqlitePool) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM files")
        .fetch_one(pool)
        .await?)
}

pub async fn count_documents(pool: &SqlitePool) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(pool)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    async fn test_pool() -> (tempfile::TempDir, SqlitePool) {
        let tmp = tempfile::tempdir().unwrap();
        let pool = connect(&tmp.path().join("meta.sqlite")).await.unwrap();
        migrate(&pool).await.unwrap();
        (tmp, pool)
    }

    fn file(ino: u64) -> ScannedFile {
        ScannedFile {
            path: PathBuf::from(format!("/data/file-{}.txt", ino)),
            ino,
            mtime_ms: 1_000,
            ctime_ms: 1_000,
            size: 42,
            acl: vec!["uid:0".to_string()],
        }
    }

    #[tokio::test]
    async fn insert_and_find_by_ino() {
        let (_tmp, pool) = test_pool().await;

        let id = insert_file(&pool, &file(7), "scan-1").await.unwrap();
        let record = find_file_by_ino(&pool, 7).await.unwrap().unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.ino, 7);
        assert_eq!(record.scan_id, "scan-1");

        assert!(find_file_by_ino(&pool, 8).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_ino_rejected() {
        let (_tmp, pool) = test_pool().await;

        insert_file(&pool, &file(7), "scan-1").await.unwrap();
        assert!(insert_file(&pool, &file(7), "scan-1").await.is_err());
    }

    #[tokio::test]
    async fn documents_are_owned_and_deleted_with_file() {
        let (_tmp, pool) = test_pool().await;

        let id = insert_file(&pool, &file(1), "scan-1").await.unwrap();
        insert_documents(&pool, &id, &["v1".to_string(), "v2".to_string()])
            .await
            .unwrap();

        let docs = documents_for_file(&pool, &id).await.unwrap();
        let ids: Vec<String> = docs.into_iter().map(|d| d.vector_id).collect();
        assert_eq!(ids, vec!["v1", "v2"]);

        delete_file(&pool, &id).await.unwrap();
        assert_eq!(count_files(&pool).await.unwrap(), 0);
        assert_eq!(count_documents(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stale_files_groups_vector_ids() {
        let (_tmp, pool) = test_pool().await;

        let kept = insert_file(&pool, &file(1), "scan-2").await.unwrap();
        insert_documents(&pool, &kept, &["k1".to_string()]).await.unwrap();

        let gone = insert_file(&pool, &file(2), "scan-1").await.unwrap();
        insert_documents(&pool, &gone, &["g1".to_string(), "g2".to_string()])
            .await
            .unwrap();

        let stale = stale_files(&pool, "scan-2").await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, gone);
        assert_eq!(stale[0].vector_ids, vec!["g1", "g2"]);

        delete_stale(&pool, "scan-2").await.unwrap();
        assert_eq!(count_files(&pool).await.unwrap(), 1);
        assert_eq!(count_documents(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn scan_id_and_ctime_updates() {
        let (_tmp, pool) = test_pool().await;

        let id = insert_file(&pool, &file(1), "scan-1").await.unwrap();
        update_scan_id(&pool, &id, "scan-2").await.unwrap();
        update_ctime(&pool, &id, 9_999).await.unwrap();

        let record = find_file_by_ino(&pool, 1).await.unwrap().unwrap();
        assert_eq!(record.scan_id, "scan-2");
        assert_eq!(record.ctime_ms, 9_999);
        // mtime untouched by attribute-only updates
        assert_eq!(record.mtime_ms, 1_000);
    }
}
