//! Pipeline Driver
//!
//! Runs the build stages in order: preprocessing, index build, then the
//! optional post-build command. A failed step is logged and recorded in the
//! report; the steps after it still run.

use serde::{Deserialize, Serialize};
use std::process::Command;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::documents::{
    build_index, process_raw_dir, ChunkStore, Embedder, EmbeddingError, IndexReport,
    PreprocessReport,
};
use crate::index::IndexStore;

/// Output of the post-build command
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandReport {
    pub command: Vec<String>,
    /// Exit code, `None` when killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    pub preprocess: Option<PreprocessReport>,
    pub index: Option<IndexReport>,
    pub command: Option<CommandReport>,
    /// `step: error` for every step that failed
    pub failures: Vec<String>,
}

impl PipelineReport {
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, step: &str, message: String) {
        error!(step, error = %message, "Pipeline step failed");
        self.failures.push(format!("{}: {}", step, message));
    }
}

/// Run every stage. `load_embedder` is only called when the index step runs,
/// so a model that fails to load does not block preprocessing.
pub fn run_pipeline<F>(config: &PipelineConfig, load_embedder: F) -> PipelineReport
where
    F: FnOnce() -> Result<Arc<dyn Embedder>, EmbeddingError>,
{
    let layout = &config.layout;
    let chunks = ChunkStore::new(&layout.chunks_dir);
    let mut report = PipelineReport::default();

    info!(step = "preprocess", raw = %layout.raw_dir.display(), "Running pipeline step");
    match process_raw_dir(&layout.raw_dir, &layout.processed_dir, &chunks, config.chunk_size) {
        Ok(r) => {
            info!(documents = r.documents_processed, chunks = r.chunks_written, "Preprocessing done");
            report.preprocess = Some(r);
        }
        Err(e) => report.fail("preprocess", e.to_string()),
    }

    info!(step = "index", dir = %layout.embeddings_dir.display(), "Running pipeline step");
    match load_embedder() {
        Ok(embedder) => {
            let store = IndexStore::new(&layout.embeddings_dir);
            match build_index(&chunks, &store, embedder.as_ref()) {
                Ok(r) => report.index = Some(r),
                Err(e) => report.fail("index", e.to_string()),
            }
        }
        Err(e) => report.fail("index", e.to_string()),
    }

    if let Some(command) = &config.post_build_command {
        info!(step = "post_build", command = ?command, "Running pipeline step");
        match run_command(command) {
            Ok(r) => {
                if r.status != Some(0) {
                    report.fail("post_build", format!("exited with status {:?}", r.status));
                }
                report.command = Some(r);
            }
            Err(e) => report.fail("post_build", e),
        }
    }

    if report.succeeded() {
        info!("Pipeline finished");
    } else {
        warn!(failed = report.failures.len(), "Pipeline finished with failures");
    }
    report
}

fn run_command(command: &[String]) -> Result<CommandReport, String> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| "empty command".to_string())?;

    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| format!("failed to spawn {}: {}", program, e))?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    if !stdout.trim().is_empty() {
        info!(output = %stdout.trim_end(), "Post-build stdout");
    }
    if !stderr.trim().is_empty() {
        warn!(output = %stderr.trim_end(), "Post-build stderr");
    }

    Ok(CommandReport {
        command: command.to_vec(),
        status: output.status.code(),
        stdout,
        stderr,
    })
}
