// DocQA Library
// Exports core modules for use by the CLI binary

pub mod config;
pub mod documents;
pub mod index;
pub mod pipeline;
pub mod qa;
mod retry;

// Re-export commonly used types for CLI
pub use config::{ConfigError, DataLayout, EmbeddingProvider, PipelineConfig};

pub use documents::{
    build_index, load_embedder, process_raw_dir, ChunkStore, Embedder, IndexReport,
    PreprocessReport, Retriever, RetrieverError, SearchResult,
};

pub use index::{IndexStore, StoreError};

pub use qa::{Answer, AnswerLog, HttpGenerator, QaEngine, TextGenerator};

pub use pipeline::{run_pipeline, PipelineReport};
