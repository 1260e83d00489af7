//! Answer Logs
//!
//! One plain-text file per answered question. Writing a log is best effort:
//! a failure is reported through `tracing` and never reaches the caller.

use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use ulid::Ulid;

#[derive(Debug, Clone)]
pub struct AnswerLog {
    dir: PathBuf,
}

impl AnswerLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a log for `query` and `answer`. Returns the file path when the
    /// write succeeded.
    pub fn record(&self, query: &str, answer: &str) -> Option<PathBuf> {
        let now = Local::now();
        let path = self.dir.join(log_file_name(&now));

        let result = fs::create_dir_all(&self.dir)
            .and_then(|_| fs::write(&path, render_entry(&now, query, answer)));

        match result {
            Ok(()) => {
                debug!(path = %path.display(), "Answer logged");
                Some(path)
            }
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "Failed to write answer log");
                None
            }
        }
    }
}

fn log_file_name(at: &DateTime<Local>) -> String {
    format!("answer_{}_{}.txt", at.format("%Y%m%d_%H%M%S"), Ulid::new())
}

fn render_entry(at: &DateTime<Local>, query: &str, answer: &str) -> String {
    format!(
        "Timestamp: {}\n\nQuery:\n{}\n\nAnswer:\n{}\n",
        at.format("%Y-%m-%d %H:%M:%S"),
        query,
        answer
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_writes_query_and_answer() {
        let dir = tempfile::tempdir().unwrap();
        let log = AnswerLog::new(dir.path().join("logs"));

        let path = log.record("What is NR-33?", "A safety standard.").unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        let content = fs::read_to_string(&path).unwrap();

        assert!(name.starts_with("answer_"));
        assert!(name.ends_with(".txt"));
        assert!(content.starts_with("Timestamp: "));
        assert!(content.contains("Query:\nWhat is NR-33?"));
        assert!(content.contains("Answer:\nA safety standard."));
    }

    #[test]
    fn test_same_second_records_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let log = AnswerLog::new(dir.path());

        let first = log.record("q", "a").unwrap();
        let second = log.record("q", "a").unwrap();

        assert_ne!(first, second);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_unwritable_dir_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, "file").unwrap();

        assert!(AnswerLog::new(&blocker).record("q", "a").is_none());
    }
}
