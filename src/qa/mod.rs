//! Answer Generation Module
//!
//! Grounded answers from retrieved chunks plus the optional answer log.

pub mod engine;
pub mod generator;
pub mod log;
pub mod prompt;

pub use engine::{Answer, QaEngine, QaError};
pub use generator::{GenerationError, HttpGenerator, TextGenerator};
pub use log::AnswerLog;
pub use prompt::{build_context, extract_answer, render_prompt};
