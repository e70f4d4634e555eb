// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Batch photo sorting by people detection
//!
//! Every image directly under the input folder is classified and copied into
//! the with-people or without-people folder. Originals are never moved.
//! Progress is reported as [`SortEvent`]s over a channel so the owner thread
//! can render a live log while the batch runs on a worker.

use chrono::{DateTime, Local};
use image::ImageReader;
use serde::Serialize;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use tracing::{debug, info, warn};

use crate::detection::{init_detector, DetectionMethod, DetectionResult, PeopleDetector};
use crate::task::CancelToken;
use crate::{AppConfig, AssistantError, Result};

const RULE: &str = "========================================";

/// Folders and backend for one batch
#[derive(Debug, Clone)]
pub struct SortJob {
    pub input: PathBuf,
    pub with_people: PathBuf,
    pub without_people: PathBuf,
    pub method: DetectionMethod,
}

impl SortJob {
    /// Reject jobs that must not start
    pub fn validate(&self) -> Result<()> {
        let required = [
            (&self.input, "Please select an input folder"),
            (&self.with_people, "Please select a folder for pictures with people"),
            (&self.without_people, "Please select a folder for pictures without people"),
        ];
        for (path, message) in required {
            if path.as_os_str().is_empty() {
                return Err(AssistantError::Validation(message.to_string()));
            }
        }
        if !self.input.is_dir() {
            return Err(AssistantError::Validation(format!(
                "Input folder does not exist: {}",
                self.input.display()
            )));
        }
        Ok(())
    }
}

/// Outcome counters for a batch
#[derive(Debug, Clone, Serialize)]
pub struct SortReport {
    pub method: DetectionMethod,
    pub total: usize,
    pub with_people: usize,
    pub without_people: usize,
    pub errors: usize,
    pub cancelled: bool,
    pub fatal: Option<String>,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

impl SortReport {
    fn new(method: DetectionMethod) -> Self {
        let now = Local::now();
        Self {
            method,
            total: 0,
            with_people: 0,
            without_people: 0,
            errors: 0,
            cancelled: false,
            fatal: None,
            started_at: now,
            finished_at: now,
        }
    }

    /// Items that reached a final state
    pub fn processed(&self) -> usize {
        self.with_people + self.without_people + self.errors
    }

    pub fn summary_line(&self) -> String {
        format!(
            "Summary: with={}, without={}, errors={}",
            self.with_people, self.without_people, self.errors
        )
    }
}

/// Progress messages emitted by a running batch
#[derive(Debug, Clone)]
pub enum SortEvent {
    Started { method: DetectionMethod },
    DetectorReady { name: &'static str },
    Found { total: usize },
    Sorted {
        index: usize,
        total: usize,
        name: String,
        result: DetectionResult,
        destination: PathBuf,
    },
    ItemFailed {
        index: usize,
        total: usize,
        name: String,
        error: String,
    },
    Cancelled { processed: usize, total: usize },
    Fatal(String),
    Finished(SortReport),
}

impl SortEvent {
    /// Lines this event adds to the user-visible log
    pub fn log_lines(&self) -> Vec<String> {
        match self {
            SortEvent::Started { method } => {
                vec![format!("Starting picture sorting using {} detection...", method)]
            }
            SortEvent::DetectorReady { name } => vec![format!("Detector ready: {}", name)],
            SortEvent::Found { total } => vec![format!("Found {} images to process", total)],
            SortEvent::Sorted { index, total, name, result, .. } => {
                if result.found {
                    vec![format!(
                        "✓ [{}/{}] {} → WITH people ({} detected)",
                        index, total, name, result.count
                    )]
                } else {
                    vec![format!("✓ [{}/{}] {} → WITHOUT people", index, total, name)]
                }
            }
            SortEvent::ItemFailed { index, total, name, error } => {
                vec![format!("❌ [{}/{}] Error processing {}: {}", index, total, name, error)]
            }
            SortEvent::Cancelled { processed, total } => {
                vec![format!("⚠ Sorting cancelled after {} of {} images", processed, total)]
            }
            SortEvent::Fatal(message) => vec![format!("❌ Fatal error: {}", message)],
            SortEvent::Finished(report) => {
                let status = if report.fatal.is_some() {
                    "Sorting aborted"
                } else if report.cancelled {
                    "Sorting stopped"
                } else {
                    "Sorting complete!"
                };
                let seconds = (report.finished_at - report.started_at).num_milliseconds() as f64 / 1000.0;
                vec![
                    RULE.to_string(),
                    format!("{} ({:.1}s)", status, seconds),
                    format!("With people: {}", report.with_people),
                    format!("Without people: {}", report.without_people),
                    format!("Errors: {}", report.errors),
                    report.summary_line(),
                ]
            }
        }
    }
}

/// Image files directly under `dir`, sorted by name
pub fn list_images(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false);
        if matches {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

/// First free path for `file_name` in `dir`, adding `_1`, `_2`, ... to the stem
pub fn unique_destination(dir: &Path, file_name: &OsStr) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let name = Path::new(file_name);
    let stem = name.file_stem().unwrap_or(file_name).to_string_lossy().into_owned();
    let ext = name.extension().map(|e| e.to_string_lossy().into_owned());

    let mut n = 1;
    loop {
        let next = match &ext {
            Some(ext) => dir.join(format!("{}_{}.{}", stem, n, ext)),
            None => dir.join(format!("{}_{}", stem, n)),
        };
        if !next.exists() {
            return next;
        }
        n += 1;
    }
}

async fn sort_one(
    path: &Path,
    job: &SortJob,
    detector: &dyn PeopleDetector,
) -> Result<(DetectionResult, PathBuf)> {
    let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    let result = detector.detect(&image).await?;

    let dir = if result.found { &job.with_people } else { &job.without_people };
    let file_name = path
        .file_name()
        .ok_or_else(|| AssistantError::Validation(format!("No file name: {}", path.display())))?;
    let destination = unique_destination(dir, file_name);
    copy_preserving_mtime(path, &destination)?;

    Ok((result, destination))
}

/// Copy a file and carry its modification time over to the copy
fn copy_preserving_mtime(from: &Path, to: &Path) -> Result<()> {
    fs::copy(from, to)?;
    let modified = fs::metadata(from)?.modified()?;
    fs::OpenOptions::new().write(true).open(to)?.set_modified(modified)?;
    Ok(())
}

fn emit(events: &Sender<SortEvent>, event: SortEvent) {
    // A closed receiver only means nobody is watching the log
    let _ = events.send(event);
}

fn abort(report: &mut SortReport, events: &Sender<SortEvent>, message: String) {
    warn!("Batch aborted: {}", message);
    emit(events, SortEvent::Fatal(message.clone()));
    report.fatal = Some(message);
}

/// Classify and copy every image of the job with an initialised detector
///
/// Item failures are counted and the batch goes on. Failing to create the
/// destinations or list the input aborts the batch; that is reported in the
/// returned [`SortReport`] rather than as an `Err`.
pub async fn run_batch(
    job: &SortJob,
    detector: &dyn PeopleDetector,
    extensions: &[String],
    cancel: &CancelToken,
    events: &Sender<SortEvent>,
) -> SortReport {
    let mut report = SortReport::new(job.method);

    let prepared = fs::create_dir_all(&job.with_people)
        .and_then(|_| fs::create_dir_all(&job.without_people))
        .map_err(|e| format!("Cannot create destination folders: {}", e))
        .and_then(|_| {
            list_images(&job.input, extensions)
                .map_err(|e| format!("Cannot list {}: {}", job.input.display(), e))
        });

    match prepared {
        Ok(images) => {
            report.total = images.len();
            info!("Sorting {} images from {:?}", images.len(), job.input);
            emit(events, SortEvent::Found { total: images.len() });

            for (i, path) in images.iter().enumerate() {
                if cancel.is_cancelled() {
                    report.cancelled = true;
                    info!("Batch cancelled at item {}", i + 1);
                    emit(events, SortEvent::Cancelled { processed: i, total: report.total });
                    break;
                }

                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();

                match sort_one(path, job, detector).await {
                    Ok((result, destination)) => {
                        if result.found {
                            report.with_people += 1;
                        } else {
                            report.without_people += 1;
                        }
                        debug!("{:?} -> {:?}", path, destination);
                        emit(
                            events,
                            SortEvent::Sorted {
                                index: i + 1,
                                total: report.total,
                                name,
                                result,
                                destination,
                            },
                        );
                    }
                    Err(e) => {
                        report.errors += 1;
                        warn!("Failed to sort {:?}: {}", path, e);
                        emit(
                            events,
                            SortEvent::ItemFailed {
                                index: i + 1,
                                total: report.total,
                                name,
                                error: e.to_string(),
                            },
                        );
                    }
                }
            }
        }
        Err(message) => abort(&mut report, events, message),
    }

    report.finished_at = Local::now();
    info!("{}", report.summary_line());
    emit(events, SortEvent::Finished(report.clone()));
    report
}

/// Validate the job, bring up its detector and run the batch
///
/// Validation and detector setup failures are returned as errors before any
/// file is touched.
pub async fn sort_pictures(
    job: &SortJob,
    config: &AppConfig,
    cancel: &CancelToken,
    events: &Sender<SortEvent>,
) -> Result<SortReport> {
    job.validate()?;
    emit(events, SortEvent::Started { method: job.method });

    let detector = init_detector(job.method, config).await?;
    emit(events, SortEvent::DetectorReady { name: detector.name() });

    Ok(run_batch(job, detector.as_ref(), &config.sort.image_extensions, cancel, events).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::{DynamicImage, GrayImage, Luma};
    use std::sync::mpsc::{channel, Receiver};
    use tempfile::TempDir;

    /// Sees people in any image containing a bright pixel
    struct BrightSpotDetector {
        trip: Option<CancelToken>,
    }

    #[async_trait]
    impl PeopleDetector for BrightSpotDetector {
        fn name(&self) -> &'static str {
            "bright-spot"
        }

        async fn detect(&self, image: &DynamicImage) -> Result<DetectionResult> {
            if let Some(token) = &self.trip {
                token.cancel();
            }
            let count = image.to_luma8().pixels().filter(|p| p[0] > 200).count();
            Ok(DetectionResult::from_count(count.min(2) as u32))
        }
    }

    struct Fixture {
        _root: TempDir,
        job: SortJob,
    }

    fn fixture() -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let input = root.path().join("in");
        fs::create_dir(&input).unwrap();
        let job = SortJob {
            input,
            with_people: root.path().join("with"),
            without_people: root.path().join("without"),
            method: DetectionMethod::Fast,
        };
        Fixture { _root: root, job }
    }

    fn write_image(dir: &Path, name: &str, bright: bool) {
        let mut img = GrayImage::from_pixel(8, 8, Luma([20]));
        if bright {
            img.put_pixel(3, 3, Luma([255]));
        }
        img.save(dir.join(name)).unwrap();
    }

    fn extensions() -> Vec<String> {
        AppConfig::default().sort.image_extensions
    }

    fn lines(rx: &Receiver<SortEvent>) -> Vec<String> {
        rx.try_iter().flat_map(|e| e.log_lines()).collect()
    }

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_three_image_scenario() {
        let fx = fixture();
        write_image(&fx.job.input, "a.png", true);
        write_image(&fx.job.input, "b.png", false);
        write_image(&fx.job.input, "c.png", true);
        let (tx, rx) = channel();

        let detector = BrightSpotDetector { trip: None };
        let report = run_batch(&fx.job, &detector, &extensions(), &CancelToken::new(), &tx).await;

        assert_eq!(names(&fx.job.with_people), vec!["a.png", "c.png"]);
        assert_eq!(names(&fx.job.without_people), vec!["b.png"]);
        assert_eq!(names(&fx.job.input).len(), 3, "originals stay in place");

        let log = lines(&rx);
        assert_eq!(log.iter().filter(|l| l.starts_with('✓')).count(), 3);
        assert!(log.contains(&"✓ [1/3] a.png → WITH people (1 detected)".to_string()));
        assert!(log.contains(&"✓ [2/3] b.png → WITHOUT people".to_string()));
        assert_eq!(log.last().unwrap(), "Summary: with=2, without=1, errors=0");
        assert_eq!(report.processed(), 3);
        assert!(report.fatal.is_none());
    }

    #[tokio::test]
    async fn test_unreadable_file_is_counted_not_fatal() {
        let fx = fixture();
        write_image(&fx.job.input, "good.png", false);
        fs::write(fx.job.input.join("broken.jpg"), b"not a jpeg").unwrap();
        fs::write(fx.job.input.join("notes.txt"), b"ignored").unwrap();
        let (tx, rx) = channel();

        let detector = BrightSpotDetector { trip: None };
        let report = run_batch(&fx.job, &detector, &extensions(), &CancelToken::new(), &tx).await;

        assert_eq!(report.total, 2);
        assert_eq!(report.errors, 1);
        assert_eq!(report.without_people, 1);
        assert_eq!(report.processed(), report.total);
        assert!(lines(&rx).iter().any(|l| l.contains("Error processing broken.jpg")));
    }

    #[tokio::test]
    async fn test_copy_keeps_modification_time() {
        let fx = fixture();
        write_image(&fx.job.input, "old.png", false);
        let taken = std::time::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000_000);
        fs::OpenOptions::new()
            .write(true)
            .open(fx.job.input.join("old.png"))
            .unwrap()
            .set_modified(taken)
            .unwrap();
        let (tx, _rx) = channel();

        let detector = BrightSpotDetector { trip: None };
        run_batch(&fx.job, &detector, &extensions(), &CancelToken::new(), &tx).await;

        let copied = fs::metadata(fx.job.without_people.join("old.png")).unwrap();
        assert_eq!(copied.modified().unwrap(), taken);
    }

    #[tokio::test]
    async fn test_format_follows_content_not_extension() {
        let fx = fixture();
        write_image(&fx.job.input, "real.png", true);
        fs::rename(fx.job.input.join("real.png"), fx.job.input.join("misnamed.jpg")).unwrap();
        let (tx, _rx) = channel();

        let detector = BrightSpotDetector { trip: None };
        let report = run_batch(&fx.job, &detector, &extensions(), &CancelToken::new(), &tx).await;

        assert_eq!(report.errors, 0);
        assert_eq!(names(&fx.job.with_people), vec!["misnamed.jpg"]);
    }

    #[tokio::test]
    async fn test_rerun_never_overwrites() {
        let fx = fixture();
        write_image(&fx.job.input, "a.png", true);
        let (tx, _rx) = channel();
        let detector = BrightSpotDetector { trip: None };

        run_batch(&fx.job, &detector, &extensions(), &CancelToken::new(), &tx).await;
        run_batch(&fx.job, &detector, &extensions(), &CancelToken::new(), &tx).await;

        assert_eq!(names(&fx.job.with_people), vec!["a.png", "a_1.png"]);
    }

    #[test]
    fn test_unique_destination_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(unique_destination(dir.path(), OsStr::new("x.jpg")), dir.path().join("x.jpg"));

        fs::write(dir.path().join("x.jpg"), b"1").unwrap();
        fs::write(dir.path().join("x_1.jpg"), b"2").unwrap();
        assert_eq!(unique_destination(dir.path(), OsStr::new("x.jpg")), dir.path().join("x_2.jpg"));

        fs::write(dir.path().join("README"), b"3").unwrap();
        assert_eq!(unique_destination(dir.path(), OsStr::new("README")), dir.path().join("README_1"));
    }

    #[test]
    fn test_listing_is_flat_and_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("A.JPG"), b"").unwrap();
        fs::write(dir.path().join("b.Png"), b"").unwrap();
        fs::write(dir.path().join("c.txt"), b"").unwrap();
        fs::create_dir(dir.path().join("nested.jpg")).unwrap();

        let found = list_images(dir.path(), &extensions()).unwrap();
        let found: Vec<_> = found.iter().map(|p| p.file_name().unwrap().to_owned()).collect();
        assert_eq!(found, vec![OsStr::new("A.JPG"), OsStr::new("b.Png")]);
    }

    #[tokio::test]
    async fn test_cancel_stops_before_next_item() {
        let fx = fixture();
        for name in ["a.png", "b.png", "c.png"] {
            write_image(&fx.job.input, name, false);
        }
        let (tx, rx) = channel();
        let cancel = CancelToken::new();

        let detector = BrightSpotDetector { trip: Some(cancel.clone()) };
        let report = run_batch(&fx.job, &detector, &extensions(), &cancel, &tx).await;

        assert!(report.cancelled);
        assert_eq!(report.processed(), 1);
        assert_eq!(names(&fx.job.without_people), vec!["a.png"]);
        assert!(lines(&rx).iter().any(|l| l.contains("cancelled after 1 of 3")));
    }

    #[tokio::test]
    async fn test_unlistable_input_is_fatal() {
        let fx = fixture();
        let file_input = fx.job.input.join("plain.png");
        fs::write(&file_input, b"").unwrap();
        let job = SortJob { input: file_input, ..fx.job.clone() };
        let (tx, rx) = channel();

        let detector = BrightSpotDetector { trip: None };
        let report = run_batch(&job, &detector, &extensions(), &CancelToken::new(), &tx).await;

        assert!(report.fatal.is_some());
        let log = lines(&rx);
        assert_eq!(log.iter().filter(|l| l.starts_with("❌ Fatal error")).count(), 1);
        assert_eq!(log.last().unwrap(), "Summary: with=0, without=0, errors=0");
    }

    #[tokio::test]
    async fn test_setup_failure_touches_nothing() {
        let fx = fixture();
        write_image(&fx.job.input, "a.png", true);
        let mut config = AppConfig::default();
        config.sort.cascade.path = fx.job.input.join("missing.xml").to_string_lossy().to_string();
        let (tx, rx) = channel();

        let result = sort_pictures(&fx.job, &config, &CancelToken::new(), &tx).await;

        assert!(matches!(result, Err(AssistantError::Setup(_))));
        assert!(!fx.job.with_people.exists());
        assert!(!fx.job.without_people.exists());
        let log = lines(&rx);
        assert_eq!(log, vec!["Starting picture sorting using FAST detection...".to_string()]);
    }

    #[test]
    fn test_validation() {
        let fx = fixture();
        assert!(fx.job.validate().is_ok());

        let empty = SortJob { with_people: PathBuf::new(), ..fx.job.clone() };
        assert!(matches!(empty.validate(), Err(AssistantError::Validation(_))));

        let missing = SortJob { input: fx.job.input.join("nope"), ..fx.job.clone() };
        match missing.validate() {
            Err(AssistantError::Validation(msg)) => assert!(msg.contains("does not exist")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }
}
