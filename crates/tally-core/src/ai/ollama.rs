//! Ollama backend implementation
//!
//! HTTP client for the Ollama generate API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::Category;

use super::parsing::parse_classification;
use super::types::AiClassification;
use super::AIBackend;

/// Ollama backend
#[derive(Clone)]
pub struct OllamaBackend {
    http_client: Client,
    base_url: String,
    model: String,
}

impl OllamaBackend {
    /// Create a new Ollama backend
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("OLLAMA_HOST").ok()?;
        let model = std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| "llama3.2".to_string());
        Some(Self::new(&host, &model))
    }
}

/// Request to Ollama API
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    format: &'static str,
}

/// Response from Ollama API
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

/// Marker the mock server keys on; keep in sync with `test_utils`
pub(crate) const PROMPT_MARKER: &str = "Transaction description: ";

/// Build the classification prompt for a cleaned description
pub(crate) fn build_prompt(description: &str) -> String {
    let labels = Category::all()
        .iter()
        .map(|c| format!("- {}", c.as_str()))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You categorize business bank transactions.\n\
         Pick exactly one category from this list:\n{labels}\n\n\
         Respond with JSON only, in the form \
         {{\"category\": \"<one label from the list>\", \"confidence\": <0.0-1.0>}}.\n\
         Use a low confidence when the description is ambiguous.\n\n\
         {PROMPT_MARKER}\"{description}\""
    )
}

#[async_trait]
impl AIBackend for OllamaBackend {
    async fn classify_merchant(&self, text: &str) -> Result<AiClassification> {
        let request = OllamaRequest {
            model: self.model.clone(),
            prompt: build_prompt(text),
            stream: false,
            format: "json",
        };

        let response = self
            .http_client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await?;

        let response = response.error_for_status().map_err(Error::Http)?;

        let ollama_response: OllamaResponse = response.json().await?;
        debug!("Ollama response: {}", ollama_response.response);

        parse_classification(&ollama_response.response)
    }

    async fn health_check(&self) -> bool {
        match self
            .http_client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn host(&self) -> &str {
        &self.base_url
    }
}
