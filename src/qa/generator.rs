//! Text generation backends.

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::config::GenerationConfig;
use crate::retry::{retry_backoff, should_retry};

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Generation model failed to load: {0}")]
    ModelLoad(String),
    #[error("Generation failed: {0}")]
    Failed(String),
}

/// A causal language model: prompt in, continuation out.
///
/// Implementations decode greedily so the same prompt yields the same text.
pub trait TextGenerator: Send + Sync {
    fn generate(&self, prompt: &str, max_new_tokens: usize) -> Result<String, GenerationError>;
}

/// Blocking client for an OpenAI-compatible `/completions` endpoint
/// (vLLM, llama.cpp server, TGI and similar).
pub struct HttpGenerator {
    client: Client,
    endpoint: String,
    model: String,
    max_retries: usize,
}

impl HttpGenerator {
    pub fn from_config(config: &GenerationConfig) -> Result<Self, GenerationError> {
        if config.model.trim().is_empty() {
            return Err(GenerationError::ModelLoad("missing generation model name".to_string()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Ok(key) = std::env::var(&config.api_key_env) {
            let auth = format!("Bearer {}", key.trim());
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth)
                    .map_err(|_| GenerationError::ModelLoad("invalid generation API key".to_string()))?,
            );
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| GenerationError::ModelLoad(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            max_retries: config.max_retries.max(1),
        })
    }
}

impl TextGenerator for HttpGenerator {
    fn generate(&self, prompt: &str, max_new_tokens: usize) -> Result<String, GenerationError> {
        let body = CompletionRequest {
            model: &self.model,
            prompt,
            max_tokens: max_new_tokens,
            temperature: 0.0,
        };

        let mut attempt = 0usize;
        loop {
            let failure = match self.client.post(&self.endpoint).json(&body).send() {
                Ok(resp) if resp.status().is_success() => {
                    let parsed: CompletionResponse = resp
                        .json()
                        .map_err(|e| GenerationError::Failed(format!("bad response body: {}", e)))?;
                    return parsed
                        .choices
                        .into_iter()
                        .next()
                        .map(|choice| choice.text)
                        .ok_or_else(|| GenerationError::Failed("response had no choices".to_string()));
                }
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().unwrap_or_else(|_| "<body unavailable>".to_string());
                    if !should_retry(status) {
                        return Err(GenerationError::Failed(format!("{}: {}", status, text)));
                    }
                    format!("{}: {}", status, text)
                }
                Err(e) => {
                    if !(e.is_timeout() || e.is_connect()) {
                        return Err(GenerationError::Failed(e.to_string()));
                    }
                    e.to_string()
                }
            };

            attempt += 1;
            if attempt >= self.max_retries {
                return Err(GenerationError::Failed(failure));
            }
            warn!(attempt, error = %failure, "Generation request failed, retrying");
            thread::sleep(retry_backoff(attempt));
        }
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_model_fails_to_load() {
        let config = GenerationConfig { model: " ".to_string(), ..Default::default() };
        assert!(matches!(HttpGenerator::from_config(&config), Err(GenerationError::ModelLoad(_))));
    }

    #[test]
    fn test_endpoint_from_base_url() {
        let config = GenerationConfig { base_url: "http://localhost:8000/v1/".to_string(), ..Default::default() };
        let generator = HttpGenerator::from_config(&config).unwrap();
        assert_eq!(generator.endpoint, "http://localhost:8000/v1/completions");
    }

    #[test]
    fn test_request_is_greedy() {
        let body = CompletionRequest { model: "m", prompt: "p", max_tokens: 150, temperature: 0.0 };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["temperature"], 0.0);
        assert_eq!(json["max_tokens"], 150);
    }
}
