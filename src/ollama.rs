// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Ollama API client for local AI inference

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::{AssistantError, Result};

/// Ollama API client
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<&'a str>>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Deserialize)]
struct ModelInfo {
    name: String,
}

/// Text shown when the local model server cannot be reached
pub fn install_instructions(base_url: &str, model: &str) -> String {
    format!(
        "Local model server not found at {}!\n\n\
         Please install Ollama (https://ollama.com) and run:\n\
         ollama serve\n\
         ollama pull {}\n\n\
         Then try again.",
        base_url, model
    )
}

impl OllamaClient {
    /// Create a new Ollama client
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        // Normalize URL
        let base_url = base_url
            .trim_end_matches('/')
            .replace("/api/generate", "")
            .replace("/api/chat", "");

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if Ollama is available
    pub async fn health_check(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.base_url);

        self.client
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| {
                AssistantError::OllamaUnavailable(format!(
                    "Cannot connect to Ollama at {}: {}",
                    self.base_url, e
                ))
            })?;

        Ok(())
    }

    /// List available models
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self.client
            .get(&url)
            .send()
            .await?;

        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Check if a specific model is available
    pub async fn model_available(&self, model: &str) -> Result<bool> {
        let models = self.list_models().await?;
        Ok(model_listed(&models, model))
    }

    /// Verify the server is up and the model is pulled
    ///
    /// Both failures are setup errors with remediation text.
    pub async fn ensure_model(&self, model: &str) -> Result<()> {
        if self.health_check().await.is_err() {
            return Err(AssistantError::Setup(install_instructions(&self.base_url, model)));
        }
        if !self.model_available(model).await? {
            return Err(AssistantError::Setup(format!(
                "Model '{}' is not available. Run: ollama pull {}",
                model, model
            )));
        }
        Ok(())
    }

    /// Generate text completion
    pub async fn generate(&self, model: &str, prompt: &str) -> Result<String> {
        debug!("Sending request to Ollama: model={}", model);
        self.send_generate(GenerateRequest {
            model,
            prompt,
            stream: false,
            images: None,
        })
        .await
    }

    /// Generate with image (for vision models)
    pub async fn generate_with_image(
        &self,
        model: &str,
        prompt: &str,
        image_base64: &str,
    ) -> Result<String> {
        debug!("Sending vision request to Ollama: model={}", model);
        self.send_generate(GenerateRequest {
            model,
            prompt,
            stream: false,
            images: Some(vec![image_base64]),
        })
        .await
    }

    async fn send_generate(&self, request: GenerateRequest<'_>) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);

        let response = self.client
            .post(&url)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AssistantError::OllamaUnavailable(format!(
                "Ollama returned status {}",
                response.status()
            )));
        }

        let result: GenerateResponse = response.json().await?;
        Ok(result.response)
    }
}

/// Ollama lists models with a tag suffix, so `moondream` matches `moondream:latest`
fn model_listed(models: &[String], model: &str) -> bool {
    models.iter().any(|m| {
        m == model || m.starts_with(&format!("{}:", model))
    })
}
