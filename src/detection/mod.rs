// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! People detectors used by the photo sorter

pub mod cascade;
pub mod vision;

use async_trait::async_trait;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::ollama::OllamaClient;
use crate::{AppConfig, AssistantError, Result};

pub use cascade::{CascadeDetector, CascadeParams, HaarCascade};
pub use vision::VisionDetector;

/// Outcome of running a detector on one image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub found: bool,
    pub count: u32,
}

impl DetectionResult {
    pub fn from_count(count: u32) -> Self {
        Self { found: count > 0, count }
    }

}

/// Which backend a batch uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMethod {
    /// Haar cascade face detector (local, fast)
    #[serde(alias = "haar")]
    #[value(alias = "haar")]
    Fast,
    /// Vision model served by Ollama (slower, more accurate)
    #[default]
    #[serde(alias = "yolo")]
    #[value(alias = "yolo")]
    Accurate,
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionMethod::Fast => write!(f, "FAST"),
            DetectionMethod::Accurate => write!(f, "ACCURATE"),
        }
    }
}

/// Trait for people detectors
#[async_trait]
pub trait PeopleDetector: Send + Sync {
    /// Name of this detector
    fn name(&self) -> &'static str;

    /// Count the people (or faces) in an image
    async fn detect(&self, image: &DynamicImage) -> Result<DetectionResult>;
}

/// Build the detector for a batch
///
/// Any failure here is a setup error: the batch must not start.
pub async fn init_detector(
    method: DetectionMethod,
    config: &AppConfig,
) -> Result<Box<dyn PeopleDetector>> {
    let detector: Box<dyn PeopleDetector> = match method {
        DetectionMethod::Fast => {
            let cascade = &config.sort.cascade;
            let detector = CascadeDetector::load(
                Path::new(&cascade.path),
                CascadeParams::from_config(cascade),
            )
            .map_err(|e| {
                if e.is_setup() {
                    e
                } else {
                    AssistantError::Setup(format!(
                        "Could not load face detection model {}: {}",
                        cascade.path, e
                    ))
                }
            })?;
            Box::new(detector)
        }
        DetectionMethod::Accurate => {
            let client = OllamaClient::new(
                &config.ai_engine.url,
                Duration::from_secs(config.ai_engine.timeout_secs),
            )?;
            let detector = VisionDetector::connect(
                client,
                &config.ai_engine.models.vision,
                &config.sort.vision_prompt,
            )
            .await?;
            Box::new(detector)
        }
    };

    info!("Detector ready: {}", detector.name());
    Ok(detector)
}
