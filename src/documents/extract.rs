//! Document Text Extraction
//!
//! Turns source documents into plain text. PDF goes through `pdf-extract`,
//! HTML through `scraper` with script and style content dropped.

use scraper::node::Node;
use scraper::Html;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
}

/// Source formats the preprocessor understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Html,
}

impl DocumentFormat {
    /// Detect the format from the file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self, ExtractError> {
        let extension = path.extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "pdf" => Ok(DocumentFormat::Pdf),
            "html" | "htm" => Ok(DocumentFormat::Html),
            _ => Err(ExtractError::UnsupportedFormat(
                path.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| path.display().to_string()),
            )),
        }
    }
}

/// Extract plain text from a PDF or HTML file.
pub fn extract_text(path: &Path) -> Result<String, ExtractError> {
    match DocumentFormat::from_path(path)? {
        DocumentFormat::Pdf => extract_pdf(path),
        DocumentFormat::Html => {
            let html = fs::read_to_string(path)?;
            Ok(html_to_text(&html))
        }
    }
}

/// pdf-extract panics on some malformed files; those become errors for the
/// one document instead of taking down the batch.
fn extract_pdf(path: &Path) -> Result<String, ExtractError> {
    let bytes = fs::read(path)?;
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(&bytes)) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(ExtractError::Pdf(e.to_string())),
        Err(_) => Err(ExtractError::Pdf("parser panicked".to_string())),
    }
}

/// Visible text of an HTML document, whitespace collapsed to single spaces.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut raw = String::new();

    for node in document.tree.nodes() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| match ancestor.value() {
            Node::Element(element) => matches!(element.name(), "script" | "style"),
            _ => false,
        });
        if !hidden {
            raw.push_str(text);
            raw.push(' ');
        }
    }

    collapse_whitespace(&raw)
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}
