//! Format-specific document loading.
//!
//! Selects a parser by file extension and returns ordered text sections
//! with their line positions. An unsupported or unparsable file is a
//! per-file error: the caller skips the file for this cycle and retries on
//! the next one.
//!
//! Supported formats:
//! - `.txt` / `.md` — plain text, one section
//! - `.csv` — one section per record, rendered as `header: value` lines
//! - `.pdf` — extracted text, one section

use anyhow::{Context, Result};
use std::path::Path;

/// A contiguous span of source text with its position in the file.
/// Sections are split into chunks downstream; positions seed the chunk
/// `loc` metadata.
#[derive(Debug, Clone)]
pub struct Section {
    pub text: String,
    pub from_line: usize,
}

pub fn load(path: &Path) -> Result<Vec<Section>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "txt" | "md" => load_text(path),
        "csv" => load_csv(path),
        "pdf" => load_pdf(path),
        other => anyhow::bail!("Unsupported file type: '.{}' ({})", other, path.display()),
    }
}

fn load_text(path: &Path) -> Result<Vec<Section>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(vec![Section { text, from_line: 1 }])
}

/// Each CSV record becomes its own section, `header: value` per line.
fn load_csv(path: &Path) -> Result<Vec<Section>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let headers = reader.headers()?.clone();

    let mut sections = Vec::new();
    for result in reader.records() {
        let record = result?;
        let line = record.position().map(|p| p.line() as usize).unwrap_or(0);
        let text = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| format!("{}: {}", h, v))
            .collect::<Vec<_>>()
            .join("\n");
        sections.push(Section {
            text,
            from_line: line,
        });
    }

    Ok(sections)
}

fn load_pdf(path: &Path) -> Result<Vec<Section>> {
    let text = pdf_extract::extract_text(path)
        .with_context(|| format!("Failed to extract PDF text from {}", path.display()))?;
    Ok(vec![Section { text, from_line: 1 }])
}
