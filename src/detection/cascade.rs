// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Haar cascade face detector
//!
//! Reads OpenCV's cascade XML format (`haarcascade_frontalface_default.xml`
//! and friends, new-style `<cascade>` layout) and evaluates it the way
//! `CascadeClassifier::detectMultiScale` does: a sliding window over an
//! image pyramid, variance-normalised Haar features, boosted stages, then
//! grouping of overlapping hits.

use async_trait::async_trait;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::path::Path;
use tracing::{debug, info};

use super::{DetectionResult, PeopleDetector};
use crate::config::CascadeConfig;
use crate::{AssistantError, Result};

/// Overlap tolerance used when grouping hits
const GROUP_EPS: f64 = 0.2;

/// A detected window in image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, Copy)]
struct WeightedRect {
    x: usize,
    y: usize,
    width: usize,
    height: usize,
    weight: f64,
}

#[derive(Debug, Clone, Default)]
struct HaarFeature {
    rects: Vec<WeightedRect>,
}

#[derive(Debug, Clone, Copy)]
struct Node {
    left: i32,
    right: i32,
    feature: usize,
    threshold: f64,
}

#[derive(Debug, Clone, Default)]
struct WeakClassifier {
    nodes: Vec<Node>,
    leaves: Vec<f64>,
}

#[derive(Debug, Clone, Default)]
struct Stage {
    threshold: f64,
    classifiers: Vec<WeakClassifier>,
}

/// Parsed boosted Haar cascade
#[derive(Debug, Clone)]
pub struct HaarCascade {
    window_width: usize,
    window_height: usize,
    stages: Vec<Stage>,
    features: Vec<HaarFeature>,
}

/// Scan parameters, mirroring `detectMultiScale`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadeParams {
    pub scale_factor: f64,
    pub min_neighbors: usize,
    pub min_size: u32,
    pub max_dimension: u32,
}

impl CascadeParams {
    pub fn from_config(config: &CascadeConfig) -> Self {
        Self {
            scale_factor: config.scale_factor,
            min_neighbors: config.min_neighbors,
            min_size: config.min_size,
            max_dimension: config.max_dimension,
        }
    }
}

impl Default for CascadeParams {
    fn default() -> Self {
        Self::from_config(&CascadeConfig::default())
    }
}

/// Summed-area tables for pixel values and their squares
struct IntegralImage {
    stride: usize,
    sum: Vec<f64>,
    sq_sum: Vec<f64>,
}

impl IntegralImage {
    fn new(image: &GrayImage) -> Self {
        let (width, height) = (image.width() as usize, image.height() as usize);
        let stride = width + 1;
        let mut sum = vec![0.0; stride * (height + 1)];
        let mut sq_sum = vec![0.0; stride * (height + 1)];
        let pixels = image.as_raw();

        for y in 0..height {
            let mut row = 0.0;
            let mut row_sq = 0.0;
            for x in 0..width {
                let v = f64::from(pixels[y * width + x]);
                row += v;
                row_sq += v * v;
                let at = (y + 1) * stride + x + 1;
                sum[at] = sum[at - stride] + row;
                sq_sum[at] = sq_sum[at - stride] + row_sq;
            }
        }

        Self { stride, sum, sq_sum }
    }

    fn rect(table: &[f64], stride: usize, x: usize, y: usize, w: usize, h: usize) -> f64 {
        let (x1, y1) = (x + w, y + h);
        table[y1 * stride + x1] - table[y * stride + x1] - table[y1 * stride + x] + table[y * stride + x]
    }

    fn sum(&self, x: usize, y: usize, w: usize, h: usize) -> f64 {
        Self::rect(&self.sum, self.stride, x, y, w, h)
    }

    fn sq_sum(&self, x: usize, y: usize, w: usize, h: usize) -> f64 {
        Self::rect(&self.sq_sum, self.stride, x, y, w, h)
    }
}

impl HaarFeature {
    fn value(&self, ii: &IntegralImage, x: usize, y: usize) -> f64 {
        self.rects
            .iter()
            .map(|r| r.weight * ii.sum(x + r.x, y + r.y, r.width, r.height))
            .sum()
    }
}

impl HaarCascade {
    /// Load a cascade definition from disk
    pub fn load(path: &Path) -> Result<Self> {
        let xml = std::fs::read_to_string(path)?;
        Self::from_xml(&xml)
    }

    /// Parse an OpenCV cascade XML document
    pub fn from_xml(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut parser = CascadeParser::default();
        let mut path: Vec<String> = Vec::new();

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    path.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                    parser.open(&path);
                }
                Event::End(_) => {
                    path.pop();
                }
                Event::Text(t) => {
                    let text = t.unescape()?;
                    parser.text(&path, &text)?;
                }
                Event::Eof => break,
                _ => {}
            }
        }

        parser.finish()
    }

    pub fn window_size(&self) -> (usize, usize) {
        (self.window_width, self.window_height)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    /// Run the cascade over every scale and return grouped detections
    pub fn detect(&self, image: &GrayImage, params: &CascadeParams) -> Vec<Rect> {
        let (img_w, img_h) = (image.width() as f64, image.height() as f64);
        let (win_w, win_h) = (self.window_width, self.window_height);
        let mut candidates = Vec::new();
        let mut factor = 1.0_f64;

        loop {
            let scaled_w = (img_w / factor).round() as usize;
            let scaled_h = (img_h / factor).round() as usize;
            if scaled_w < win_w || scaled_h < win_h {
                break;
            }

            let found_w = (win_w as f64 * factor).round() as u32;
            let found_h = (win_h as f64 * factor).round() as u32;

            if found_w >= params.min_size && found_h >= params.min_size {
                let resized;
                let level = if factor == 1.0 {
                    image
                } else {
                    resized = imageops::resize(image, scaled_w as u32, scaled_h as u32, FilterType::Triangle);
                    &resized
                };

                let ii = IntegralImage::new(level);
                let step = if factor > 2.0 { 1 } else { 2 };

                for y in (0..=scaled_h - win_h).step_by(step) {
                    for x in (0..=scaled_w - win_w).step_by(step) {
                        if self.classify_window(&ii, x, y) {
                            candidates.push(Rect {
                                x: (x as f64 * factor).round() as i32,
                                y: (y as f64 * factor).round() as i32,
                                width: found_w as i32,
                                height: found_h as i32,
                            });
                        }
                    }
                }
            }

            if params.scale_factor <= 1.0 {
                break;
            }
            factor *= params.scale_factor;
        }

        debug!("Cascade produced {} raw windows", candidates.len());
        group_rectangles(candidates, params.min_neighbors, GROUP_EPS)
    }

    fn classify_window(&self, ii: &IntegralImage, x: usize, y: usize) -> bool {
        // Normalisation uses the window shrunk by one pixel on each side
        let (w, h) = (self.window_width - 2, self.window_height - 2);
        let area = (w * h) as f64;
        let sum = ii.sum(x + 1, y + 1, w, h);
        let sq_sum = ii.sq_sum(x + 1, y + 1, w, h);
        let norm = area * sq_sum - sum * sum;
        let norm = if norm > 0.0 { norm.sqrt() } else { 1.0 };
        let inv_norm = 1.0 / norm;

        for stage in &self.stages {
            let mut stage_sum = 0.0;
            for weak in &stage.classifiers {
                let mut idx = 0_i32;
                loop {
                    let node = &weak.nodes[idx as usize];
                    let value = self.features[node.feature].value(ii, x, y) * inv_norm;
                    idx = if value < node.threshold { node.left } else { node.right };
                    if idx <= 0 {
                        break;
                    }
                }
                stage_sum += weak.leaves[idx.unsigned_abs() as usize];
            }
            if stage_sum < stage.threshold {
                return false;
            }
        }
        true
    }
}

/// Accumulates cascade pieces while walking the XML tree
#[derive(Default)]
struct CascadeParser {
    width: Option<usize>,
    height: Option<usize>,
    stages: Vec<Stage>,
    features: Vec<HaarFeature>,
}

fn ends_with(path: &[String], tail: &[&str]) -> bool {
    path.len() >= tail.len()
        && path[path.len() - tail.len()..].iter().zip(tail).all(|(a, b)| a == b)
}

fn parse_numbers<T: std::str::FromStr>(text: &str, what: &str) -> Result<Vec<T>> {
    text.split_whitespace()
        .map(|tok| {
            tok.parse::<T>()
                .map_err(|_| AssistantError::Cascade(format!("bad number '{}' in {}", tok, what)))
        })
        .collect()
}

/// Integral node field; `i32::MIN` is refused so every index can be negated
fn node_index(value: f64, what: &str) -> Result<i32> {
    if value.fract() != 0.0 || value <= f64::from(i32::MIN) || value > f64::from(i32::MAX) {
        return Err(AssistantError::Cascade(format!("bad {} index {} in internalNodes", what, value)));
    }
    Ok(value as i32)
}

impl CascadeParser {
    fn open(&mut self, path: &[String]) {
        if ends_with(path, &["stages", "_"]) {
            self.stages.push(Stage::default());
        } else if ends_with(path, &["weakClassifiers", "_"]) {
            if let Some(stage) = self.stages.last_mut() {
                stage.classifiers.push(WeakClassifier::default());
            }
        } else if ends_with(path, &["features", "_"]) {
            self.features.push(HaarFeature::default());
        }
    }

    fn current_classifier(&mut self) -> Result<&mut WeakClassifier> {
        self.stages
            .last_mut()
            .and_then(|s| s.classifiers.last_mut())
            .ok_or_else(|| AssistantError::Cascade("classifier data outside a stage".to_string()))
    }

    fn text(&mut self, path: &[String], text: &str) -> Result<()> {
        if ends_with(path, &["cascade", "featureType"]) {
            if text.trim() != "HAAR" {
                return Err(AssistantError::Cascade(format!(
                    "unsupported feature type {}",
                    text.trim()
                )));
            }
        } else if ends_with(path, &["cascade", "width"]) {
            self.width = parse_numbers::<usize>(text, "width")?.first().copied();
        } else if ends_with(path, &["cascade", "height"]) {
            self.height = parse_numbers::<usize>(text, "height")?.first().copied();
        } else if ends_with(path, &["stages", "_", "stageThreshold"]) {
            let stage = self
                .stages
                .last_mut()
                .ok_or_else(|| AssistantError::Cascade("threshold outside a stage".to_string()))?;
            stage.threshold = parse_numbers::<f64>(text, "stageThreshold")?
                .first()
                .copied()
                .unwrap_or_default();
        } else if ends_with(path, &["weakClassifiers", "_", "internalNodes"]) {
            let values = parse_numbers::<f64>(text, "internalNodes")?;
            if values.is_empty() || values.len() % 4 != 0 {
                return Err(AssistantError::Cascade(
                    "internalNodes must hold groups of four values".to_string(),
                ));
            }
            let nodes = values
                .chunks(4)
                .map(|c| {
                    Ok(Node {
                        left: node_index(c[0], "child")?,
                        right: node_index(c[1], "child")?,
                        feature: usize::try_from(node_index(c[2], "feature")?).map_err(|_| {
                            AssistantError::Cascade(format!("negative feature index {}", c[2]))
                        })?,
                        threshold: c[3],
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            self.current_classifier()?.nodes = nodes;
        } else if ends_with(path, &["weakClassifiers", "_", "leafValues"]) {
            self.current_classifier()?.leaves = parse_numbers::<f64>(text, "leafValues")?;
        } else if ends_with(path, &["features", "_", "rects", "_"]) {
            let values = parse_numbers::<f64>(text, "rects")?;
            if values.len() != 5 || values[..4].iter().any(|v| *v < 0.0) {
                return Err(AssistantError::Cascade(format!("bad feature rect '{}'", text.trim())));
            }
            let feature = self
                .features
                .last_mut()
                .ok_or_else(|| AssistantError::Cascade("rect outside a feature".to_string()))?;
            feature.rects.push(WeightedRect {
                x: values[0] as usize,
                y: values[1] as usize,
                width: values[2] as usize,
                height: values[3] as usize,
                weight: values[4],
            });
        } else if ends_with(path, &["features", "_", "tilted"]) && text.trim() != "0" {
            return Err(AssistantError::Cascade("tilted features are not supported".to_string()));
        }
        Ok(())
    }

    fn finish(self) -> Result<HaarCascade> {
        let (window_width, window_height) = match (self.width, self.height) {
            (Some(w), Some(h)) if w > 2 && h > 2 => (w, h),
            _ => return Err(AssistantError::Cascade("missing or too small window size".to_string())),
        };
        if self.stages.is_empty() {
            return Err(AssistantError::Cascade("no stages".to_string()));
        }

        for feature in &self.features {
            if feature.rects.is_empty() {
                return Err(AssistantError::Cascade("feature without rects".to_string()));
            }
            if feature
                .rects
                .iter()
                .any(|r| {
                    r.x.checked_add(r.width).map_or(true, |right| right > window_width)
                        || r.y.checked_add(r.height).map_or(true, |bottom| bottom > window_height)
                })
            {
                return Err(AssistantError::Cascade("feature rect outside the window".to_string()));
            }
        }

        for stage in &self.stages {
            if stage.classifiers.is_empty() {
                return Err(AssistantError::Cascade("stage without classifiers".to_string()));
            }
            for weak in &stage.classifiers {
                if weak.nodes.is_empty() {
                    return Err(AssistantError::Cascade("classifier without nodes".to_string()));
                }
                for (at, node) in weak.nodes.iter().enumerate() {
                    if node.feature >= self.features.len() {
                        return Err(AssistantError::Cascade(format!(
                            "feature index {} out of range",
                            node.feature
                        )));
                    }
                    for child in [node.left, node.right] {
                        // Children come after their parent, so walks always terminate
                        let valid = if child > 0 {
                            (child as usize) > at && (child as usize) < weak.nodes.len()
                        } else {
                            (child.unsigned_abs() as usize) < weak.leaves.len()
                        };
                        if !valid {
                            return Err(AssistantError::Cascade(format!(
                                "node child {} out of range",
                                child
                            )));
                        }
                    }
                }
            }
        }

        Ok(HaarCascade {
            window_width,
            window_height,
            stages: self.stages,
            features: self.features,
        })
    }
}

/// Cluster similar windows and keep clusters with more than `min_neighbors`
/// members, dropping clusters nested inside stronger ones
pub fn group_rectangles(rects: Vec<Rect>, min_neighbors: usize, eps: f64) -> Vec<Rect> {
    if min_neighbors == 0 || rects.is_empty() {
        return rects;
    }

    let n = rects.len();
    let mut parent: Vec<usize> = (0..n).collect();

    fn root(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..n {
        for j in (i + 1)..n {
            if similar(&rects[i], &rects[j], eps) {
                let (a, b) = (root(&mut parent, i), root(&mut parent, j));
                if a != b {
                    parent[b] = a;
                }
            }
        }
    }

    // Average each cluster
    let mut clusters: Vec<(usize, [f64; 4], usize)> = Vec::new();
    for (i, r) in rects.iter().enumerate() {
        let label = root(&mut parent, i);
        let at = match clusters.iter().position(|(l, _, _)| *l == label) {
            Some(at) => at,
            None => {
                clusters.push((label, [0.0; 4], 0));
                clusters.len() - 1
            }
        };
        let entry = &mut clusters[at];
        entry.1[0] += f64::from(r.x);
        entry.1[1] += f64::from(r.y);
        entry.1[2] += f64::from(r.width);
        entry.1[3] += f64::from(r.height);
        entry.2 += 1;
    }

    let averaged: Vec<(Rect, usize)> = clusters
        .into_iter()
        .map(|(_, s, count)| {
            let k = 1.0 / count as f64;
            (
                Rect {
                    x: (s[0] * k).round() as i32,
                    y: (s[1] * k).round() as i32,
                    width: (s[2] * k).round() as i32,
                    height: (s[3] * k).round() as i32,
                },
                count,
            )
        })
        .collect();

    let mut kept = Vec::new();
    for (i, (r1, n1)) in averaged.iter().enumerate() {
        if *n1 <= min_neighbors {
            continue;
        }
        let nested = averaged.iter().enumerate().any(|(j, (r2, n2))| {
            if i == j || *n2 <= min_neighbors {
                return false;
            }
            let dx = (f64::from(r2.width) * eps).round() as i32;
            let dy = (f64::from(r2.height) * eps).round() as i32;
            r1.x >= r2.x - dx
                && r1.y >= r2.y - dy
                && r1.x + r1.width <= r2.x + r2.width + dx
                && r1.y + r1.height <= r2.y + r2.height + dy
                && (*n2 > (*n1).max(3) || *n1 < 3)
        });
        if !nested {
            kept.push(*r1);
        }
    }
    kept
}

fn similar(a: &Rect, b: &Rect, eps: f64) -> bool {
    let delta = eps * f64::from(a.width.min(b.width) + a.height.min(b.height)) * 0.5;
    f64::from((a.x - b.x).abs()) <= delta
        && f64::from((a.y - b.y).abs()) <= delta
        && f64::from((a.x + a.width - b.x - b.width).abs()) <= delta
        && f64::from((a.y + a.height - b.y - b.height).abs()) <= delta
}

/// Face detector backed by a Haar cascade file
pub struct CascadeDetector {
    cascade: HaarCascade,
    params: CascadeParams,
}

impl CascadeDetector {
    pub fn new(cascade: HaarCascade, params: CascadeParams) -> Self {
        Self { cascade, params }
    }

    /// Load the cascade definition; a missing file is a setup error
    pub fn load(path: &Path, params: CascadeParams) -> Result<Self> {
        if !path.is_file() {
            return Err(AssistantError::Setup(format!(
                "Could not load face detection model: {} not found. \
                 Download haarcascade_frontalface_default.xml from the OpenCV \
                 repository (data/haarcascades) and place it there.",
                path.display()
            )));
        }
        let cascade = HaarCascade::load(path)?;
        info!(
            "Loaded cascade {:?}: {} stages, {} features",
            path,
            cascade.stage_count(),
            cascade.feature_count()
        );
        Ok(Self::new(cascade, params))
    }

    /// Detected face windows, in the coordinates of the scanned image
    pub fn detect_faces(&self, image: &DynamicImage) -> Vec<Rect> {
        let max = self.params.max_dimension;
        let gray = if max > 0 && (image.width() > max || image.height() > max) {
            image.resize(max, max, FilterType::Triangle).to_luma8()
        } else {
            image.to_luma8()
        };
        self.cascade.detect(&gray, &self.params)
    }
}

#[async_trait]
impl PeopleDetector for CascadeDetector {
    fn name(&self) -> &'static str {
        "haar-cascade"
    }

    async fn detect(&self, image: &DynamicImage) -> Result<DetectionResult> {
        let faces = self.detect_faces(image);
        Ok(DetectionResult::from_count(faces.len() as u32))
    }
}
