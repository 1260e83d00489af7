//! Index Building
//!
//! Embeds every stored chunk and persists the resulting index. Chunks that
//! cannot be read or embedded are left out and reported; the rest of the
//! build goes ahead.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::chunker::{ChunkStore, ChunkerError};
use super::embeddings::{Embedder, Embedding};
use crate::index::{IndexArtifacts, IndexStore, StoreError};

/// Chunks sent to the embedder per call
pub const EMBED_BATCH: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Chunker error: {0}")]
    Chunker(#[from] ChunkerError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Outcome of one index build
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexReport {
    pub model: String,
    pub dimension: usize,
    pub chunks_indexed: u32,
    /// Chunks whose text was blank
    pub skipped_empty: u32,
    pub errors: Vec<String>,
}

/// Embed all chunks in `chunks` and save the index to `store`.
pub fn build_index(
    chunks: &ChunkStore,
    store: &IndexStore,
    embedder: &dyn Embedder,
) -> Result<IndexReport, BuildError> {
    let mut report = IndexReport {
        model: embedder.model_id().to_string(),
        dimension: embedder.dimension(),
        ..Default::default()
    };

    let mut ids = Vec::new();
    let mut texts = Vec::new();
    for id in chunks.list()? {
        match chunks.read(&id) {
            Ok(chunk) => {
                let text = chunk.text.trim();
                if text.is_empty() {
                    report.skipped_empty += 1;
                    continue;
                }
                texts.push(text.to_string());
                ids.push(id);
            }
            Err(e) => {
                warn!(chunk = %id, error = %e, "Failed to read chunk");
                report.errors.push(format!("{}: {}", id, e));
            }
        }
    }
    info!(chunks = ids.len(), "Chunks loaded for embedding");

    let mut kept_ids = Vec::with_capacity(ids.len());
    let mut embeddings: Vec<Embedding> = Vec::with_capacity(ids.len());
    for (batch_ids, batch_texts) in ids.chunks(EMBED_BATCH).zip(texts.chunks(EMBED_BATCH)) {
        for (id, result) in embed_isolated(embedder, batch_ids, batch_texts) {
            match result {
                Ok(vector) => {
                    kept_ids.push(id.clone());
                    embeddings.push(vector);
                }
                Err(e) => {
                    warn!(chunk = %id, error = %e, "Failed to embed chunk");
                    report.errors.push(format!("{}: {}", id, e));
                }
            }
        }
    }

    if kept_ids.is_empty() {
        warn!("No chunks to index; saving an empty index");
    }

    let artifacts = IndexArtifacts::build(
        embedder.model_id(),
        embedder.dimension(),
        kept_ids,
        embeddings,
    )?;
    store.save(&artifacts)?;

    report.chunks_indexed = artifacts.len() as u32;
    info!(
        indexed = report.chunks_indexed,
        errors = report.errors.len(),
        model = %report.model,
        "Index built"
    );
    Ok(report)
}

/// Embed a batch in one call; if that fails, retry each text alone so a
/// single bad chunk only loses itself.
fn embed_isolated<'a>(
    embedder: &dyn Embedder,
    ids: &'a [String],
    texts: &[String],
) -> Vec<(&'a String, Result<Embedding, String>)> {
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    let expected = embedder.dimension();

    let check = |vector: Embedding| {
        if vector.len() == expected {
            Ok(vector)
        } else {
            Err(format!("embedding has dimension {}, expected {}", vector.len(), expected))
        }
    };

    match embedder.embed_batch(&refs) {
        Ok(vectors) if vectors.len() == refs.len() => {
            ids.iter().zip(vectors).map(|(id, v)| (id, check(v))).collect()
        }
        batch => {
            if let Err(e) = &batch {
                warn!(size = refs.len(), error = %e, "Batch embedding failed, embedding chunks one by one");
            }
            ids.iter()
                .zip(&refs)
                .map(|(id, text)| (id, embedder.embed(text).map_err(|e| e.to_string()).and_then(check)))
                .collect()
        }
    }
}
