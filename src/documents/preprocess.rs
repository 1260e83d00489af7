//! Raw Document Preprocessing
//!
//! Walks the raw directory, extracts text from every PDF/HTML file, saves the
//! full text and writes its chunks. A document that fails never stops the
//! rest of the batch.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::chunker::{ChunkStore, ChunkerError};
use super::extract::{extract_text, DocumentFormat, ExtractError};

/// Outcome of one preprocessing run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreprocessReport {
    pub documents_processed: u32,
    pub chunks_written: u32,
    /// Documents that produced no text
    pub empty_documents: Vec<String>,
    /// Files with an unsupported extension
    pub skipped: Vec<String>,
    pub errors: Vec<String>,
}

/// Process every file directly under `raw_dir`.
///
/// Returns an error only when the raw directory itself cannot be read.
pub fn process_raw_dir(
    raw_dir: &Path,
    processed_dir: &Path,
    chunks: &ChunkStore,
    chunk_size: usize,
) -> Result<PreprocessReport, ChunkerError> {
    fs::create_dir_all(raw_dir)?;
    fs::create_dir_all(processed_dir)?;

    let mut paths: Vec<PathBuf> = fs::read_dir(raw_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    paths.sort();

    let mut report = PreprocessReport::default();
    for path in paths {
        let name = path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        if DocumentFormat::from_path(&path).is_err() {
            info!(file = %name, "Skipping unsupported format");
            report.skipped.push(name);
            continue;
        }

        match process_document(&path, processed_dir, chunks, chunk_size) {
            Ok(0) => {
                warn!(file = %name, "No extractable text");
                report.documents_processed += 1;
                report.empty_documents.push(name);
            }
            Ok(count) => {
                info!(file = %name, chunks = count, "Document processed");
                report.documents_processed += 1;
                report.chunks_written += count;
            }
            Err(e) => {
                warn!(file = %name, error = %e, "Document failed");
                report.errors.push(format!("{}: {}", name, e));
            }
        }
    }

    Ok(report)
}

#[derive(Debug, thiserror::Error)]
enum DocumentError {
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Chunker(#[from] ChunkerError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Extract, save and chunk one document. Returns the number of chunks.
fn process_document(
    path: &Path,
    processed_dir: &Path,
    chunks: &ChunkStore,
    chunk_size: usize,
) -> Result<u32, DocumentError> {
    let text = extract_text(path)?;
    let base = path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    fs::write(processed_dir.join(format!("{}.txt", base)), &text)?;
    let written = chunks.write_document(&base, &text, chunk_size)?;
    Ok(written.len() as u32)
}
