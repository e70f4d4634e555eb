// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! People counting with a vision model served by Ollama

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use tracing::{debug, info};

use super::{DetectionResult, PeopleDetector};
use crate::ollama::OllamaClient;
use crate::{AssistantError, Result};

/// Longest side sent to the model
const MAX_SIDE: u32 = 1024;

const NUMBER_WORDS: [(&str, u32); 14] = [
    ("zero", 0),
    ("no", 0),
    ("none", 0),
    ("nobody", 0),
    ("one", 1),
    ("two", 2),
    ("three", 3),
    ("four", 4),
    ("five", 5),
    ("six", 6),
    ("seven", 7),
    ("eight", 8),
    ("nine", 9),
    ("ten", 10),
];

/// Detector that asks a vision model how many people an image shows
pub struct VisionDetector {
    client: OllamaClient,
    model: String,
    prompt: String,
}

impl VisionDetector {
    /// Check the server and model, then build the detector
    pub async fn connect(client: OllamaClient, model: &str, prompt: &str) -> Result<Self> {
        client.ensure_model(model).await?;
        info!("Vision model {} ready at {}", model, client.base_url());
        Ok(Self {
            client,
            model: model.to_string(),
            prompt: prompt.to_string(),
        })
    }

    /// Resize large images and re-encode as JPEG
    fn prepare_image(image: &DynamicImage) -> Result<Vec<u8>> {
        let resized;
        let image = if image.width() > MAX_SIDE || image.height() > MAX_SIDE {
            resized = image.resize(MAX_SIDE, MAX_SIDE, FilterType::Triangle);
            &resized
        } else {
            image
        };

        // JPEG has no alpha channel
        let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
        let mut buffer = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut buffer);
        rgb.write_to(&mut cursor, ImageFormat::Jpeg)?;

        Ok(buffer)
    }
}

/// Pull a people count out of a free-form model answer
///
/// Takes the first integer in the text, then falls back to number words.
pub fn parse_people_count(answer: &str) -> Result<u32> {
    let digits: String = answer
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if !digits.is_empty() {
        return digits
            .parse()
            .map_err(|_| AssistantError::Detection(format!("count out of range: {}", digits)));
    }

    let lower = answer.to_lowercase();
    for word in lower.split(|c: char| !c.is_alphabetic()) {
        if let Some((_, n)) = NUMBER_WORDS.iter().find(|(w, _)| *w == word) {
            return Ok(*n);
        }
    }

    Err(AssistantError::Detection(format!(
        "could not read a people count from model answer: {:?}",
        answer.trim()
    )))
}

#[async_trait]
impl PeopleDetector for VisionDetector {
    fn name(&self) -> &'static str {
        "vision-model"
    }

    async fn detect(&self, image: &DynamicImage) -> Result<DetectionResult> {
        let encoded = general_purpose::STANDARD.encode(Self::prepare_image(image)?);
        let answer = self
            .client
            .generate_with_image(&self.model, &self.prompt, &encoded)
            .await?;
        debug!("Vision model answered: {}", answer.trim());
        Ok(DetectionResult::from_count(parse_people_count(&answer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    type Seen = Arc<Mutex<Vec<serde_json::Value>>>;

    /// Read one HTTP request: head line and body
    async fn read_request(stream: &mut TcpStream) -> (String, Vec<u8>) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let head_end = loop {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed mid-request");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(at) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break at + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
        let length = head
            .lines()
            .find_map(|l| {
                let (key, value) = l.split_once(':')?;
                key.eq_ignore_ascii_case("content-length").then(|| value.trim().parse::<usize>().ok())?
            })
            .unwrap_or(0);
        while buf.len() < head_end + length {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed mid-body");
            buf.extend_from_slice(&chunk[..n]);
        }

        let first_line = head.lines().next().unwrap_or_default().to_string();
        (first_line, buf[head_end..head_end + length].to_vec())
    }

    /// Local stand-in for Ollama that lists `moondream` and gives `answer` to every generate call
    async fn ollama_stand_in(answer: &'static str) -> (OllamaClient, Seen) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();

        tokio::spawn(async move {
            loop {
                let (mut stream, _) = listener.accept().await.unwrap();
                let (line, body) = read_request(&mut stream).await;
                let reply = if line.starts_with("POST /api/generate") {
                    log.lock().unwrap().push(serde_json::from_slice(&body).unwrap());
                    serde_json::json!({ "response": answer, "done": true })
                } else {
                    serde_json::json!({ "models": [{ "name": "moondream:latest" }] })
                }
                .to_string();
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    reply.len(),
                    reply
                );
                stream.write_all(response.as_bytes()).await.unwrap();
                let _ = stream.shutdown().await;
            }
        });

        let client = OllamaClient::new(&url, Duration::from_secs(5)).unwrap();
        (client, seen)
    }

    #[test]
    fn test_count_from_digits() {
        assert_eq!(parse_people_count("3").unwrap(), 3);
        assert_eq!(parse_people_count("There are 2 people here.").unwrap(), 2);
        assert_eq!(parse_people_count(" 0\n").unwrap(), 0);
        assert_eq!(parse_people_count("12 people, maybe 13").unwrap(), 12);
    }

    #[test]
    fn test_count_from_words() {
        assert_eq!(parse_people_count("Two people are standing.").unwrap(), 2);
        assert_eq!(parse_people_count("No people are visible.").unwrap(), 0);
        assert_eq!(parse_people_count("none").unwrap(), 0);
    }

    #[test]
    fn test_unreadable_answer_is_detection_error() {
        assert!(matches!(
            parse_people_count("A cat on a sofa."),
            Err(AssistantError::Detection(_))
        ));
    }

    #[test]
    fn test_prepare_image_shrinks_and_drops_alpha() {
        let wide = DynamicImage::ImageRgba8(RgbaImage::new(2048, 512));
        let jpeg = VisionDetector::prepare_image(&wide).unwrap();

        let decoded = image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (1024, 256));
    }

    #[test]
    fn test_connect_without_server_is_setup_error() {
        let client = OllamaClient::new("http://127.0.0.1:9", std::time::Duration::from_secs(2)).unwrap();
        let result = tokio_test::block_on(VisionDetector::connect(client, "moondream", "count"));
        assert!(matches!(result, Err(AssistantError::Setup(_))));
    }

    #[tokio::test]
    async fn test_detect_round_trip_through_server() {
        let (client, seen) = ollama_stand_in("I can see 2 people in this photo.").await;
        let detector = VisionDetector::connect(client, "moondream", "How many people?").await.unwrap();

        let photo = DynamicImage::ImageRgba8(RgbaImage::new(2048, 100));
        let result = detector.detect(&photo).await.unwrap();
        assert_eq!(result, DetectionResult { found: true, count: 2 });

        let requests = seen.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0]["model"], "moondream");
        assert_eq!(requests[0]["prompt"], "How many people?");
        assert_eq!(requests[0]["stream"], false);

        let encoded = requests[0]["images"][0].as_str().unwrap();
        let jpeg = general_purpose::STANDARD.decode(encoded).unwrap();
        let sent = image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg).unwrap();
        assert_eq!(sent.width(), 1024);
    }

    #[tokio::test]
    async fn test_unreadable_server_answer_is_detection_error() {
        let (client, _seen) = ollama_stand_in("A cat sleeping on a sofa.").await;
        let detector = VisionDetector::connect(client, "moondream", "How many people?").await.unwrap();

        let photo = DynamicImage::ImageRgba8(RgbaImage::new(16, 16));
        assert!(matches!(detector.detect(&photo).await, Err(AssistantError::Detection(_))));
    }
}
