//! Core data types shared across the synchronization pipeline.
//!
//! These types flow between the scanner, the change detector, the chunking
//! pipeline, and the vector backend.

use serde::Serialize;
use std::path::PathBuf;

/// One file as observed by a filesystem scan.
///
/// `ino` is the stable identity used for change detection; `mtime_ms` and
/// `ctime_ms` are millisecond timestamps. `acl` is an opaque principal list
/// propagated into document metadata for retrieval-time filtering.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub ino: u64,
    pub mtime_ms: i64,
    pub ctime_ms: i64,
    pub size: u64,
    pub acl: Vec<String>,
}

/// Row in the `files` table: one file known to have been indexed at least
/// once. Timestamps reflect the last *indexed* state, not the live
/// filesystem.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: String,
    pub ino: i64,
    pub mtime_ms: i64,
    pub ctime_ms: i64,
    pub scan_id: String,
    pub path: String,
}

/// Row in the `documents` table: one vector-store document owned by a
/// [`FileRecord`]. `vector_id` is the backend-side identifier used for
/// targeted update and delete.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub id: String,
    pub file_id: String,
    pub vector_id: String,
}

/// A file scheduled for removal: it was not confirmed present by the
/// current scan generation. Carries the vector ids of its owned documents.
#[derive(Debug, Clone)]
pub struct StaleFile {
    pub id: String,
    pub path: String,
    pub vector_ids: Vec<String>,
}

/// A bounded span of a document's text, the unit of embedding and indexing.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub text: String,
    pub from_line: usize,
    pub to_line: usize,
}

/// Line range of a chunk within its source file.
#[derive(Debug, Clone, Serialize)]
pub struct Loc {
    pub from_line: usize,
    pub to_line: usize,
}

/// Metadata bag attached to every vector document: chunk provenance merged
/// with the owning file's filesystem attributes.
#[derive(Debug, Clone, Serialize)]
pub struct DocMetadata {
    pub source: String,
    pub loc: Loc,
    pub mtime_ms: i64,
    pub size: u64,
    pub acl: Vec<String>,
}

/// A fully prepared document ready to be written to the vector backend.
#[derive(Debug, Clone)]
pub struct VectorDocument {
    pub text: String,
    pub vector: Vec<f32>,
    pub metadata: DocMetadata,
}

impl DocMetadata {
    /// Merge chunk provenance with the owning file's attributes.
    pub fn merge(chunk: &Chunk, file: &ScannedFile) -> Self {
        Self {
            source: file.path.to_string_lossy().into_owned(),
            loc: Loc {
                from_line: chunk.from_line,
                to_line: chunk.to_line,
            },
            mtime_ms: file.mtime_ms,
            size: file.size,
            acl: file.acl.clone(),
        }
    }
}
