// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for rpa4you

use thiserror::Error;

/// Result type alias for assistant operations
pub type Result<T> = std::result::Result<T, AssistantError>;

/// Assistant error types
///
/// `Setup` is fatal to the requested operation and carries remediation text.
/// `Detection` and `Image` are per-item errors during a batch sort.
#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("API error: {0}")]
    Api(#[from] reqwest::Error),

    #[error("Ollama not available: {0}")]
    OllamaUnavailable(String),

    #[error("Setup error: {0}")]
    Setup(String),

    #[error("Invalid cascade definition: {0}")]
    Cascade(String),

    #[error("Detection error: {0}")]
    Detection(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Background task panicked: {0}")]
    WorkerPanicked(String),
}

impl AssistantError {
    /// True for errors that should abort a whole operation before it starts
    pub fn is_setup(&self) -> bool {
        matches!(self, AssistantError::Setup(_) | AssistantError::OllamaUnavailable(_))
    }
}

impl From<quick_xml::Error> for AssistantError {
    fn from(e: quick_xml::Error) -> Self {
        AssistantError::Cascade(e.to_string())
    }
}
