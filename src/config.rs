//! Pipeline Configuration
//!
//! Directory layout and model settings shared by every stage. Loaded from a
//! TOML file when one is available, otherwise built from defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default words per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 500;
/// Default number of chunks retrieved per query.
pub const DEFAULT_TOP_K: usize = 5;
/// Default generation budget for a single answer.
pub const DEFAULT_MAX_NEW_TOKENS: usize = 2000;

/// Environment variable pointing at a config file.
pub const CONFIG_ENV: &str = "DOCQA_CONFIG";

/// Marker that precedes the answer in the generated text.
pub const DEFAULT_ANSWER_MARKER: &str = "Resposta:";

/// Prompt template. `{context}` and `{query}` are substituted.
pub const DEFAULT_PROMPT_TEMPLATE: &str = "\
Use o contexto abaixo para responder à pergunta de forma clara e objetiva.

Contexto:
{context}

Pergunta:
{query}

Resposta:
";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Where each stage reads and writes its files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DataLayout {
    /// Source PDF/HTML documents
    pub raw_dir: PathBuf,
    /// Full extracted text, one file per document
    pub processed_dir: PathBuf,
    /// One file per chunk
    pub chunks_dir: PathBuf,
    /// Embedding matrix, index, manifest and metadata
    pub embeddings_dir: PathBuf,
    /// Answer logs
    pub logs_dir: PathBuf,
}

impl DataLayout {
    /// Standard layout rooted at `data_dir`, with logs next to it.
    pub fn rooted_at(data_dir: &Path) -> Self {
        let logs_dir = data_dir
            .parent()
            .map(|p| p.join("logs"))
            .unwrap_or_else(|| PathBuf::from("logs"));
        Self {
            raw_dir: data_dir.join("raw"),
            processed_dir: data_dir.join("processed"),
            chunks_dir: data_dir.join("processed").join("chunks"),
            embeddings_dir: data_dir.join("embeddings"),
            logs_dir,
        }
    }

    /// Create every directory that does not exist yet. Never clears anything.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [
            &self.raw_dir,
            &self.processed_dir,
            &self.chunks_dir,
            &self.embeddings_dir,
            &self.logs_dir,
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

impl Default for DataLayout {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("data/raw"),
            processed_dir: PathBuf::from("data/processed"),
            chunks_dir: PathBuf::from("data/processed/chunks"),
            embeddings_dir: PathBuf::from("data/embeddings"),
            logs_dir: PathBuf::from("logs"),
        }
    }
}

/// Which embedding backend to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    /// Offline feature-hashing model
    Hashing,
    /// OpenAI-compatible `/embeddings` endpoint
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    /// Model name sent to the endpoint and recorded in the index metadata
    pub model: String,
    /// Vector size. Required for the hashing model, optional for HTTP.
    pub dimensions: Option<usize>,
    pub base_url: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub batch_size: usize,
    pub timeout_secs: u64,
    pub max_retries: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Hashing,
            model: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            dimensions: None,
            base_url: "http://127.0.0.1:8081/v1".to_string(),
            api_key_env: "DOCQA_EMBEDDING_API_KEY".to_string(),
            batch_size: 32,
            timeout_secs: 60,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub model: String,
    pub base_url: String,
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub max_retries: usize,
    pub prompt_template: String,
    pub answer_marker: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "mistralai/Mistral-7B-Instruct-v0.2".to_string(),
            base_url: "http://127.0.0.1:8000/v1".to_string(),
            api_key_env: "DOCQA_GENERATION_API_KEY".to_string(),
            timeout_secs: 300,
            max_retries: 2,
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
            answer_marker: DEFAULT_ANSWER_MARKER.to_string(),
        }
    }
}

/// Top-level configuration for every stage and the CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub layout: DataLayout,
    /// Words per chunk
    pub chunk_size: usize,
    pub top_k: usize,
    pub max_new_tokens: usize,
    /// Write an answer log for each question
    pub save_log: bool,
    /// Command run as the last pipeline step, e.g. `["bash", "run.sh"]`
    pub post_build_command: Option<Vec<String>>,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            layout: DataLayout::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            top_k: DEFAULT_TOP_K,
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            save_log: true,
            post_build_command: None,
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config: explicit path, then `$DOCQA_CONFIG`, then the user
    /// config directory, then defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::from_file(Path::new(&path));
        }
        if let Some(path) = default_config_path() {
            if path.is_file() {
                return Self::from_file(&path);
            }
        }
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be at least 1".to_string()));
        }
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::Invalid("embedding.batch_size must be at least 1".to_string()));
        }
        if self.embedding.dimensions == Some(0) {
            return Err(ConfigError::Invalid("embedding.dimensions must be at least 1".to_string()));
        }
        if self.generation.answer_marker.trim().is_empty() {
            return Err(ConfigError::Invalid("generation.answer_marker must not be empty".to_string()));
        }
        if let Some(cmd) = &self.post_build_command {
            if cmd.is_empty() {
                return Err(ConfigError::Invalid("post_build_command must name a program".to_string()));
            }
        }
        Ok(())
    }
}

/// `~/.config/docqa/config.toml` on Linux, platform equivalent elsewhere.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("docqa").join("config.toml"))
}
