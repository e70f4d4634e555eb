// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for rpa4you

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::detection::DetectionMethod;

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// AI engine configuration
    pub ai_engine: EngineConfig,

    /// Chat tab settings
    #[serde(default)]
    pub chat: ChatConfig,

    /// Sort tab settings
    #[serde(default)]
    pub sort: SortConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EngineConfig {
    pub url: String,
    pub models: ModelConfig,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_chat_model")]
    pub chat: String,
    #[serde(default = "default_vision_model")]
    pub vision: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChatConfig {
    /// Number of utterances kept for the model prompt
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Appended after the joined history
    #[serde(default = "default_terminator")]
    pub terminator: String,
    /// Used when the model returns an empty reply
    #[serde(default = "default_fallback_reply")]
    pub fallback_reply: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SortConfig {
    #[serde(default)]
    pub method: DetectionMethod,
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,
    #[serde(default)]
    pub cascade: CascadeConfig,
    #[serde(default = "default_vision_prompt")]
    pub vision_prompt: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CascadeConfig {
    #[serde(default = "default_cascade_path")]
    pub path: String,
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f64,
    #[serde(default = "default_min_neighbors")]
    pub min_neighbors: usize,
    #[serde(default = "default_min_size")]
    pub min_size: u32,
    /// Images are downscaled so their longest side fits before scanning
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
}

// Default value functions
fn default_timeout() -> u64 { 120 }
fn default_chat_model() -> String { "llama3.2:3b".to_string() }
fn default_vision_model() -> String { "moondream".to_string() }
fn default_history_limit() -> usize { 10 }
fn default_terminator() -> String { "\nAssistant:".to_string() }
fn default_cascade_path() -> String { "models/haarcascade_frontalface_default.xml".to_string() }
fn default_scale_factor() -> f64 { 1.1 }
fn default_min_neighbors() -> usize { 5 }
fn default_min_size() -> u32 { 30 }
fn default_max_dimension() -> u32 { 1024 }

fn default_fallback_reply() -> String {
    "I'm not sure how to respond to that. Could you rephrase?".to_string()
}

fn default_vision_prompt() -> String {
    "How many people are visible in this image? \
     Answer with a single number only. Answer 0 if there are none.".to_string()
}

fn default_image_extensions() -> Vec<String> {
    vec!["jpg", "jpeg", "png", "bmp", "gif", "tiff", "heic"]
        .into_iter().map(String::from).collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ai_engine: EngineConfig {
                url: "http://localhost:11434".to_string(),
                models: ModelConfig {
                    chat: default_chat_model(),
                    vision: default_vision_model(),
                },
                timeout_secs: default_timeout(),
            },
            chat: ChatConfig::default(),
            sort: SortConfig::default(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            terminator: default_terminator(),
            fallback_reply: default_fallback_reply(),
        }
    }
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            method: DetectionMethod::default(),
            image_extensions: default_image_extensions(),
            cascade: CascadeConfig::default(),
            vision_prompt: default_vision_prompt(),
        }
    }
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            path: default_cascade_path(),
            scale_factor: default_scale_factor(),
            min_neighbors: default_min_neighbors(),
            min_size: default_min_size(),
            max_dimension: default_max_dimension(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| crate::AssistantError::Config(format!("Failed to parse config: {}", e)))?;
            config.validate()?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values that would make the chat or the cascade scan misbehave
    pub fn validate(&self) -> crate::Result<()> {
        if self.chat.history_limit == 0 {
            return Err(crate::AssistantError::Config(
                "chat.history_limit must be at least 1".to_string(),
            ));
        }
        if self.sort.cascade.scale_factor <= 1.0 {
            return Err(crate::AssistantError::Config(
                "sort.cascade.scale_factor must be greater than 1.0".to_string(),
            ));
        }
        if self.sort.image_extensions.is_empty() {
            return Err(crate::AssistantError::Config(
                "sort.image_extensions must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.chat.history_limit, 10);
        assert_eq!(config.sort.method, DetectionMethod::Accurate);
        assert_eq!(config.sort.cascade.min_neighbors, 5);
        assert!(config.sort.image_extensions.iter().any(|e| e == "heic"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let json = r#"{
            "ai_engine": { "url": "http://ollama:11434", "models": {} },
            "sort": { "method": "fast" }
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.ai_engine.models.chat, "llama3.2:3b");
        assert_eq!(config.sort.method, DetectionMethod::Fast);
        assert_eq!(config.sort.cascade.path, "models/haarcascade_frontalface_default.xml");
        assert_eq!(config.chat.terminator, "\nAssistant:");
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config.ai_engine.timeout_secs, 120);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = AppConfig::default();
        config.chat.history_limit = 4;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.chat.history_limit, 4);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = AppConfig::default();
        config.sort.cascade.scale_factor = 1.0;
        config.save(&path).unwrap();

        match AppConfig::load(&path) {
            Err(crate::AssistantError::Config(msg)) => assert!(msg.contains("scale_factor")),
            other => panic!("expected config error, got {:?}", other.map(|_| ())),
        }
    }
}
