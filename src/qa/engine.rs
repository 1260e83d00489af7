//! Question Answering
//!
//! Ties retrieval to generation: retrieve the closest chunks, build the
//! prompt, run the model and cut the answer out of its output.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::generator::{GenerationError, TextGenerator};
use super::log::AnswerLog;
use super::prompt::{build_context, extract_answer, render_prompt};
use crate::config::GenerationConfig;
use crate::documents::{Retriever, RetrieverError, SearchResult};

#[derive(Error, Debug)]
pub enum QaError {
    #[error("Retrieval failed: {0}")]
    Retrieval(#[from] RetrieverError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
}

/// An answered question with the chunks it was grounded on
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub query: String,
    pub answer: String,
    pub sources: Vec<SearchResult>,
}

pub struct QaEngine {
    retriever: Retriever,
    /// One generation in flight per model instance
    generator: Mutex<Box<dyn TextGenerator>>,
    prompt_template: String,
    answer_marker: String,
    log: AnswerLog,
}

impl QaEngine {
    pub fn new(
        retriever: Retriever,
        generator: Box<dyn TextGenerator>,
        config: &GenerationConfig,
        log: AnswerLog,
    ) -> Self {
        Self {
            retriever,
            generator: Mutex::new(generator),
            prompt_template: config.prompt_template.clone(),
            answer_marker: config.answer_marker.clone(),
            log,
        }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Answer `query` from the `top_k` closest chunks.
    ///
    /// When `save_log` is set a log file is written; failing to write it
    /// does not fail the answer.
    pub fn answer(
        &self,
        query: &str,
        top_k: usize,
        max_new_tokens: usize,
        save_log: bool,
    ) -> Result<Answer, QaError> {
        let sources = self.retriever.retrieve(query, top_k)?;
        debug!(retrieved = sources.len(), top_k, "Context retrieved");

        let context = build_context(&sources);
        let prompt = render_prompt(&self.prompt_template, query, &context);
        let generated = self.generator.lock().generate(&prompt, max_new_tokens)?;
        let answer = extract_answer(&generated, &self.answer_marker);
        info!(sources = sources.len(), chars = answer.len(), "Answer generated");

        if save_log {
            self.log.record(query, &answer);
        }

        Ok(Answer {
            query: query.to_string(),
            answer,
            sources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::{build_index, ChunkStore, Embedder, HashingEmbedder};
    use crate::index::IndexStore;
    use std::fs;
    use std::sync::Arc;

    /// Echoes the prompt back followed by a canned reply, like a local
    /// model that returns prompt and continuation together.
    struct EchoGenerator {
        reply: String,
        prompts: Arc<Mutex<Vec<(String, usize)>>>,
    }

    impl TextGenerator for EchoGenerator {
        fn generate(&self, prompt: &str, max_new_tokens: usize) -> Result<String, GenerationError> {
            self.prompts.lock().push((prompt.to_string(), max_new_tokens));
            Ok(format!("{}{}", prompt, self.reply))
        }
    }

    struct FailingGenerator;

    impl TextGenerator for FailingGenerator {
        fn generate(&self, _prompt: &str, _max_new_tokens: usize) -> Result<String, GenerationError> {
            Err(GenerationError::Failed("model offline".to_string()))
        }
    }

    fn retriever(root: &std::path::Path) -> Retriever {
        let chunks = ChunkStore::new(root.join("chunks"));
        let store = IndexStore::new(root.join("embeddings"));
        chunks.write_document("nr33", "confined space entry permit", 100).unwrap();
        chunks.write_document("nr10", "electrical installations safety", 100).unwrap();
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(128).unwrap());
        build_index(&chunks, &store, embedder.as_ref()).unwrap();
        Retriever::open(&store, chunks, embedder).unwrap()
    }

    #[test]
    fn test_answer_uses_retrieved_context() {
        let dir = tempfile::tempdir().unwrap();
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let generator = EchoGenerator { reply: "  Use a permit.\n".to_string(), prompts: prompts.clone() };
        let engine = QaEngine::new(
            retriever(dir.path()),
            Box::new(generator),
            &GenerationConfig::default(),
            AnswerLog::new(dir.path().join("logs")),
        );

        let answer = engine.answer("confined space entry", 1, 150, false).unwrap();

        assert_eq!(answer.answer, "Use a permit.");
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].chunk_id, "nr33_chunk1.txt");

        let seen = prompts.lock();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].0.contains("confined space entry permit"));
        assert!(!seen[0].0.contains("electrical"));
        assert_eq!(seen[0].1, 150);
        assert!(!dir.path().join("logs").exists());
    }

    #[test]
    fn test_answer_writes_log_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let generator = EchoGenerator { reply: "ok".to_string(), prompts: Arc::default() };
        let engine = QaEngine::new(
            retriever(dir.path()),
            Box::new(generator),
            &GenerationConfig::default(),
            AnswerLog::new(dir.path().join("logs")),
        );

        engine.answer("electrical safety", 2, 50, true).unwrap();

        let logs: Vec<_> = fs::read_dir(dir.path().join("logs")).unwrap().collect();
        assert_eq!(logs.len(), 1);
    }

    #[test]
    fn test_log_failure_does_not_fail_answer() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("logs");
        fs::write(&blocker, "not a directory").unwrap();
        let generator = EchoGenerator { reply: "still answered".to_string(), prompts: Arc::default() };
        let engine = QaEngine::new(
            retriever(dir.path()),
            Box::new(generator),
            &GenerationConfig::default(),
            AnswerLog::new(&blocker),
        );

        let answer = engine.answer("electrical safety", 1, 50, true).unwrap();
        assert_eq!(answer.answer, "still answered");
    }

    #[test]
    fn test_generation_error_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let engine = QaEngine::new(
            retriever(dir.path()),
            Box::new(FailingGenerator),
            &GenerationConfig::default(),
            AnswerLog::new(dir.path().join("logs")),
        );

        assert!(matches!(
            engine.answer("anything", 1, 10, false),
            Err(QaError::Generation(GenerationError::Failed(_)))
        ));
    }
}
