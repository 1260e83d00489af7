//! Document Chunking
//!
//! Splits extracted document text into fixed-size word chunks and keeps them
//! as one file per chunk in the chunk store.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Suffix separating the document base name from the chunk number
const CHUNK_MARKER: &str = "_chunk";
const CHUNK_EXTENSION: &str = ".txt";

#[derive(Error, Debug)]
pub enum ChunkerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Chunk size must be at least 1 word")]
    InvalidChunkSize,
    #[error("Invalid chunk id: {0}")]
    InvalidChunkId(String),
    #[error("Chunk not found: {0}")]
    ChunkNotFound(String),
}

/// A chunk of a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// Chunk file name, `{document}_chunk{index}.txt`
    pub id: String,
    /// Base name of the source document
    pub document: String,
    /// 1-based position within the document
    pub index: u32,
    pub text: String,
}

/// Chunk file name for a document base name and 1-based index.
pub fn chunk_id(document: &str, index: u32) -> String {
    format!("{}{}{}{}", document, CHUNK_MARKER, index, CHUNK_EXTENSION)
}

/// Split a chunk id back into (document, index).
///
/// Uses the last `_chunk` occurrence so document names may contain it.
pub fn parse_chunk_id(id: &str) -> Option<(&str, u32)> {
    let stem = id.strip_suffix(CHUNK_EXTENSION)?;
    let pos = stem.rfind(CHUNK_MARKER)?;
    let index = stem[pos + CHUNK_MARKER.len()..].parse::<u32>().ok()?;
    if index == 0 {
        return None;
    }
    Some((&stem[..pos], index))
}

/// Partition text into consecutive groups of `chunk_size` whitespace-delimited
/// words, joined with single spaces. The last group may be shorter.
///
/// No overlap and no sentence awareness: a chunk may end mid-sentence.
pub fn chunk_words(text: &str, chunk_size: usize) -> Result<Vec<String>, ChunkerError> {
    if chunk_size == 0 {
        return Err(ChunkerError::InvalidChunkSize);
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    Ok(words.chunks(chunk_size).map(|group| group.join(" ")).collect())
}

/// Directory of chunk files
#[derive(Debug, Clone)]
pub struct ChunkStore {
    dir: PathBuf,
}

impl ChunkStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Chunk `text` and write each chunk as its own file.
    ///
    /// Chunk files left over from a longer previous version of the same
    /// document are removed. Empty text yields no chunks.
    pub fn write_document(
        &self,
        document: &str,
        text: &str,
        chunk_size: usize,
    ) -> Result<Vec<Chunk>, ChunkerError> {
        validate_document_name(document)?;
        let pieces = chunk_words(text, chunk_size)?;
        fs::create_dir_all(&self.dir)?;

        let mut chunks = Vec::with_capacity(pieces.len());
        for (i, piece) in pieces.into_iter().enumerate() {
            let index = i as u32 + 1;
            let id = chunk_id(document, index);
            fs::write(self.dir.join(&id), &piece)?;
            chunks.push(Chunk {
                id,
                document: document.to_string(),
                index,
                text: piece,
            });
        }

        self.remove_stale(document, chunks.len() as u32)?;
        Ok(chunks)
    }

    fn remove_stale(&self, document: &str, keep: u32) -> Result<(), ChunkerError> {
        for id in self.list()? {
            if let Some((doc, index)) = parse_chunk_id(&id) {
                if doc == document && index > keep {
                    debug!(chunk = %id, "Removing stale chunk");
                    fs::remove_file(self.dir.join(&id))?;
                }
            }
        }
        Ok(())
    }

    /// Read a chunk by id.
    pub fn read(&self, id: &str) -> Result<Chunk, ChunkerError> {
        let (document, index) = parse_chunk_id(id)
            .ok_or_else(|| ChunkerError::InvalidChunkId(id.to_string()))?;
        validate_document_name(document)?;

        let path = self.dir.join(id);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ChunkerError::ChunkNotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Chunk {
            id: id.to_string(),
            document: document.to_string(),
            index,
            text,
        })
    }

    /// All chunk ids, ordered by document name then chunk number.
    pub fn list(&self) -> Result<Vec<String>, ChunkerError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids: Vec<(String, u32, String)> = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some((document, index)) = parse_chunk_id(&name) {
                ids.push((document.to_string(), index, name.clone()));
            }
        }

        ids.sort();
        Ok(ids.into_iter().map(|(_, _, id)| id).collect())
    }
}

/// Reject names that would escape the store directory: path separators and
/// the `.`/`..` components. Dots inside a name are fine.
fn validate_document_name(document: &str) -> Result<(), ChunkerError> {
    if document.is_empty()
        || document == "."
        || document == ".."
        || document.contains('/')
        || document.contains('\\')
    {
        return Err(ChunkerError::InvalidChunkId(document.to_string()));
    }
    Ok(())
}
