//! Filesystem enumeration.
//!
//! Walks the configured root and produces one [`ScannedFile`] per regular
//! file: stable identity (inode), modification/change timestamps in
//! milliseconds, size, and an opaque ACL principal list derived from
//! ownership. The synchronizer consumes this listing without touching the
//! filesystem again until chunking.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

use crate::config::ScannerConfig;
use crate::models::ScannedFile;

pub fn scan(config: &ScannerConfig) -> Result<Vec<ScannedFile>> {
    let root = &config.root;
    if !root.exists() {
        bail!("Scan root does not exist: {}", root.display());
    }

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();

    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        if exclude_set.is_match(relative) {
            continue;
        }

        match stat_file(path) {
            Ok(file) => files.push(file),
            Err(e) => {
                // unreadable file -> treated as absent; cleanup handles it
                warn!(path = %path.display(), error = %e, "failed to stat file");
            }
        }
    }

    // Deterministic enumeration order
    files.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(files)
}

fn stat_file(path: &Path) -> Result<ScannedFile> {
    let metadata = std::fs::metadata(path)?;

    Ok(ScannedFile {
        path: path.to_path_buf(),
        ino: metadata.ino(),
        mtime_ms: metadata.mtime() * 1000 + metadata.mtime_nsec() / 1_000_000,
        ctime_ms: metadata.ctime() * 1000 + metadata.ctime_nsec() / 1_000_000,
        size: metadata.len(),
        acl: vec![
            format!("uid:{}", metadata.uid()),
            format!("gid:{}", metadata.gid()),
        ],
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
