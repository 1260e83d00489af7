//! Document Management Module
//!
//! Handles text extraction, chunking, embedding, index building and retrieval
//! for the reference corpus.

pub mod chunker;
pub mod embeddings;
pub mod extract;
pub mod indexer;
pub mod preprocess;
pub mod retriever;

// Re-export key public types
pub use chunker::{chunk_id, chunk_words, parse_chunk_id, Chunk, ChunkStore, ChunkerError};
pub use embeddings::{
    load_embedder, Embedder, Embedding, EmbeddingError, HashingEmbedder, HttpEmbedder,
};
pub use extract::{extract_text, html_to_text, DocumentFormat, ExtractError};
pub use indexer::{build_index, BuildError, IndexReport};
pub use preprocess::{process_raw_dir, PreprocessReport};
pub use retriever::{Retriever, RetrieverError, SearchResult};
