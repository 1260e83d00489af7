//! Document Retrieval
//!
//! Embeds a query with the same model the index was built with, runs a
//! nearest-neighbor search and resolves positions back to chunk text.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use super::chunker::{ChunkStore, ChunkerError};
use super::embeddings::{Embedder, EmbeddingError};
use crate::index::{IndexArtifacts, IndexError, IndexStore, StoreError};

#[derive(Error, Debug)]
pub enum RetrieverError {
    #[error("Index not found in {0}; run the embedding step first")]
    IndexNotFound(String),
    #[error("Index store error: {0}")]
    Store(StoreError),
    #[error("Index built with model {indexed} ({indexed_dim}-d), query model is {query} ({query_dim}-d)")]
    ModelMismatch {
        indexed: String,
        indexed_dim: usize,
        query: String,
        query_dim: usize,
    },
    #[error("Chunk not found: {0}")]
    ChunkNotFound(String),
    #[error("Chunker error: {0}")]
    Chunker(ChunkerError),
    #[error("Embedding generation failed: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("Search failed: {0}")]
    Search(#[from] IndexError),
}

impl From<StoreError> for RetrieverError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::MissingArtifact(path) => RetrieverError::IndexNotFound(path.display().to_string()),
            other => RetrieverError::Store(other),
        }
    }
}

impl From<ChunkerError> for RetrieverError {
    fn from(e: ChunkerError) -> Self {
        match e {
            ChunkerError::ChunkNotFound(id) => RetrieverError::ChunkNotFound(id),
            other => RetrieverError::Chunker(other),
        }
    }
}

/// Search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    /// 1-based rank
    pub rank: usize,
    /// Squared L2 distance to the query
    pub distance: f32,
    pub chunk_id: String,
    pub text: String,
}

/// Read-only view over one persisted index build
pub struct Retriever {
    artifacts: IndexArtifacts,
    chunks: ChunkStore,
    embedder: Arc<dyn Embedder>,
}

impl Retriever {
    /// Load the index from `store`. The embedder must be the model the
    /// index was built with.
    pub fn open(
        store: &IndexStore,
        chunks: ChunkStore,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, RetrieverError> {
        let artifacts = store.load()?;
        let meta = &artifacts.meta;
        if meta.model != embedder.model_id() || meta.dimension != embedder.dimension() {
            return Err(RetrieverError::ModelMismatch {
                indexed: meta.model.clone(),
                indexed_dim: meta.dimension,
                query: embedder.model_id().to_string(),
                query_dim: embedder.dimension(),
            });
        }

        debug!(chunks = artifacts.len(), model = %meta.model, "Retriever ready");
        Ok(Self { artifacts, chunks, embedder })
    }

    /// Number of indexed chunks
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Up to `top_k` chunks closest to `query`, nearest first.
    ///
    /// Index positions with no manifest entry are dropped, so callers may
    /// get fewer than `top_k` results. `IndexStore::load` already refuses a
    /// manifest shorter than the index, so this only matters for artifacts
    /// assembled in memory. A manifest entry whose chunk file is gone is an
    /// error.
    pub fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>, RetrieverError> {
        let query_embedding = self.embedder.embed(query)?;
        let hits = self.artifacts.index.search(&query_embedding, top_k)?;

        let mut results = Vec::with_capacity(hits.len());
        for (position, distance) in hits {
            let Some(chunk_id) = self.artifacts.chunk_ids.get(position) else {
                debug!(position, manifest = self.artifacts.chunk_ids.len(), "Dropping hit beyond manifest");
                continue;
            };
            let chunk = self.chunks.read(chunk_id)?;
            results.push(SearchResult {
                rank: results.len() + 1,
                distance,
                chunk_id: chunk_id.clone(),
                text: chunk.text.trim().to_string(),
            });
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::embeddings::HashingEmbedder;
    use crate::documents::indexer::build_index;
    use std::fs;

    struct Fixture {
        _dir: tempfile::TempDir,
        chunks: ChunkStore,
        store: IndexStore,
        embedder: Arc<dyn Embedder>,
    }

    /// One single-chunk document per text, indexed in order.
    fn fixture(texts: &[&str]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let chunks = ChunkStore::new(dir.path().join("chunks"));
        let store = IndexStore::new(dir.path().join("embeddings"));
        for (i, text) in texts.iter().enumerate() {
            chunks.write_document(&format!("doc{}", i), text, 100).unwrap();
        }
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(256).unwrap());
        build_index(&chunks, &store, embedder.as_ref()).unwrap();
        Fixture { _dir: dir, chunks, store, embedder }
    }

    fn retriever(f: &Fixture) -> Retriever {
        Retriever::open(&f.store, f.chunks.clone(), f.embedder.clone()).unwrap()
    }

    #[test]
    fn test_near_duplicates_rank_first() {
        let f = fixture(&["alpha repeated text", "beta unrelated text", "alpha repeated text exactly"]);
        let results = retriever(&f).retrieve("alpha repeated text", 3).unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].chunk_id, "doc0_chunk1.txt");
        assert!(results[0].distance.abs() < 1e-6);
        assert_eq!(results[1].chunk_id, "doc2_chunk1.txt");
        assert_eq!(results[2].chunk_id, "doc1_chunk1.txt");
        assert_eq!(results.iter().map(|r| r.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn test_top_k_larger_than_manifest() {
        let f = fixture(&["first chunk", "second chunk"]);
        let results = retriever(&f).retrieve("chunk", 5).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].text, "first chunk");
    }

    #[test]
    fn test_hits_beyond_manifest_are_dropped() {
        let f = fixture(&["first chunk", "second chunk"]);
        let mut artifacts = f.store.load().unwrap();
        artifacts.chunk_ids.truncate(1);
        let r = Retriever { artifacts, chunks: f.chunks.clone(), embedder: f.embedder.clone() };

        let results = r.retrieve("second chunk", 2).unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "doc0_chunk1.txt");
        assert_eq!(results[0].rank, 1);
    }

    #[test]
    fn test_missing_index_is_index_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let result = Retriever::open(
            &IndexStore::new(dir.path()),
            ChunkStore::new(dir.path()),
            Arc::new(HashingEmbedder::new(8).unwrap()),
        );
        assert!(matches!(result, Err(RetrieverError::IndexNotFound(_))));
    }

    #[test]
    fn test_deleted_chunk_file_is_reported() {
        let f = fixture(&["only chunk here"]);
        let r = retriever(&f);
        fs::remove_file(f.chunks.dir().join("doc0_chunk1.txt")).unwrap();

        assert!(matches!(
            r.retrieve("only chunk", 1),
            Err(RetrieverError::ChunkNotFound(id)) if id == "doc0_chunk1.txt"
        ));
    }

    #[test]
    fn test_other_model_is_rejected() {
        let f = fixture(&["some text"]);
        let result = Retriever::open(&f.store, f.chunks.clone(), Arc::new(HashingEmbedder::new(128).unwrap()));
        assert!(matches!(result, Err(RetrieverError::ModelMismatch { indexed_dim: 256, query_dim: 128, .. })));
    }

    #[test]
    fn test_zero_top_k_returns_nothing() {
        let f = fixture(&["some text"]);
        assert!(retriever(&f).retrieve("some text", 0).unwrap().is_empty());
    }
}
