// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Sort tab: folder selection, start control and live status log

use std::sync::mpsc::{channel, Receiver};
use tokio::runtime::Handle;
use tracing::info;

use crate::detection::DetectionMethod;
use crate::sort::{sort_pictures, SortEvent, SortJob, SortReport};
use crate::task::{CancelToken, TaskRunner};
use crate::{AppConfig, AssistantError, Result};

pub const INTRO: &str = "📸 Sort Pictures by People Detection\n\n\
    This tool automatically sorts your pictures into two folders:\n\
    • Pictures WITH people detected\n\
    • Pictures WITHOUT people";
const READY: &str = "Ready to sort pictures...";

/// Outcomes delivered to the sort tab
#[derive(Debug)]
pub enum SortMsg {
    Event(SortEvent),
    Completed(SortReport),
    Failed(AssistantError),
}

/// Sort view model
pub struct SortTab {
    method: DetectionMethod,
    log: Vec<String>,
    rendered: usize,
    sorting: bool,
    last_report: Option<SortReport>,
}

impl SortTab {
    pub fn new(method: DetectionMethod) -> Self {
        Self {
            method,
            log: vec![READY.to_string()],
            rendered: 0,
            sorting: false,
            last_report: None,
        }
    }

    pub fn method(&self) -> DetectionMethod {
        self.method
    }

    pub fn set_method(&mut self, method: DetectionMethod) {
        self.method = method;
    }

    /// Validate the job and switch to the running state
    pub fn start(&mut self, job: &SortJob) -> Result<()> {
        if self.sorting {
            return Err(AssistantError::Validation("Sorting is already running".to_string()));
        }
        job.validate()?;
        self.log.clear();
        self.rendered = 0;
        self.last_report = None;
        self.sorting = true;
        Ok(())
    }

    pub fn update(&mut self, msg: SortMsg) {
        match msg {
            SortMsg::Event(event) => self.log.extend(event.log_lines()),
            SortMsg::Completed(report) => {
                self.sorting = false;
                self.last_report = Some(report);
            }
            SortMsg::Failed(e) => {
                self.sorting = false;
                self.log.push(render_failure(&e));
            }
        }
    }

    pub fn log(&self) -> &[String] {
        &self.log
    }

    /// Log lines added since the last call
    pub fn take_unrendered(&mut self) -> &[String] {
        let start = self.rendered.min(self.log.len());
        self.rendered = self.log.len();
        &self.log[start..]
    }

    pub fn is_sorting(&self) -> bool {
        self.sorting
    }

    pub fn start_enabled(&self) -> bool {
        !self.sorting
    }

    pub fn start_label(&self) -> &'static str {
        if self.sorting {
            "Sorting..."
        } else {
            "Start Sorting"
        }
    }

    pub fn last_report(&self) -> Option<&SortReport> {
        self.last_report.as_ref()
    }
}

/// A failed batch as a single log line
pub fn render_failure(error: &AssistantError) -> String {
    let text = match error {
        AssistantError::Setup(remedy) => remedy.clone(),
        other => other.to_string(),
    };
    let text = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect::<Vec<_>>().join(" ");
    format!("❌ {}", text)
}

/// Method selector as shown next to the start control
pub fn render_method(method: DetectionMethod) -> String {
    let mark = |m: DetectionMethod| if m == method { "(•)" } else { "( )" };
    format!(
        "Detection Method: {} Accurate (vision model)  {} Fast (Haar cascade)",
        mark(DetectionMethod::Accurate),
        mark(DetectionMethod::Fast)
    )
}

/// Sort tab wired to the batch routine through a [`TaskRunner`]
pub struct SortController {
    tab: SortTab,
    runner: TaskRunner<SortMsg>,
    events: Option<Receiver<SortEvent>>,
    config: AppConfig,
    runtime: Handle,
}

impl SortController {
    pub fn new(tab: SortTab, config: AppConfig, runtime: Handle) -> Self {
        Self {
            tab,
            runner: TaskRunner::new(),
            events: None,
            config,
            runtime,
        }
    }

    /// Validate and launch a batch on the worker
    pub fn start(&mut self, job: SortJob) -> Result<()> {
        self.tab.start(&job)?;

        let (tx, rx) = channel();
        let config = self.config.clone();
        let runtime = self.runtime.clone();
        info!("Starting batch: {:?} ({})", job.input, job.method);

        let submitted = self.runner.submit(
            "sort",
            move |cancel: CancelToken| runtime.block_on(sort_pictures(&job, &config, &cancel, &tx)),
            SortMsg::Completed,
            SortMsg::Failed,
        );
        if !submitted {
            self.tab.update(SortMsg::Failed(AssistantError::Validation(
                "another task is still running".to_string(),
            )));
            return Ok(());
        }
        self.events = Some(rx);
        Ok(())
    }

    fn drain_events(&mut self) {
        if let Some(rx) = &self.events {
            for event in rx.try_iter() {
                self.tab.update(SortMsg::Event(event));
            }
        }
    }

    /// Move pending progress into the tab; true once the batch has ended
    pub fn tick(&mut self) -> bool {
        self.drain_events();
        match self.runner.poll() {
            Some(msg) => {
                // Events sent just before the worker returned
                self.drain_events();
                self.events = None;
                self.tab.update(msg);
                true
            }
            None => false,
        }
    }

    /// Ask the running batch to stop before its next file
    pub fn cancel(&self) {
        self.runner.cancel();
    }

    pub fn cancel_token(&self) -> Option<CancelToken> {
        self.runner.cancel_token()
    }

    pub fn tab(&self) -> &SortTab {
        &self.tab
    }

    pub fn tab_mut(&mut self) -> &mut SortTab {
        &mut self.tab
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::POLL_INTERVAL;
    use image::{GrayImage, Luma};
    use std::fs;
    use std::path::Path;
    use std::thread;

    /// Fires on 6x6 windows whose right half is brighter than the left
    const EDGE_CASCADE: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade>
  <stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>6</height>
  <width>6</width>
  <stages>
    <_>
      <stageThreshold>0.</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>0 -1 0 0.5</internalNodes>
          <leafValues>-1. 1.</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>0 0 3 6 -1.</_>
        <_>3 0 3 6 1.</_></rects></_></features></cascade>
</opencv_storage>
"#;

    fn run_to_end(controller: &mut SortController) {
        for _ in 0..300 {
            if controller.tick() {
                return;
            }
            thread::sleep(POLL_INTERVAL);
        }
        panic!("batch did not finish");
    }

    fn save(dir: &Path, name: &str, person: bool) {
        let img = GrayImage::from_fn(6, 6, |x, _| {
            if person && x >= 3 {
                Luma([255])
            } else {
                Luma([0])
            }
        });
        img.save(dir.join(name)).unwrap();
    }

    fn job(root: &Path) -> SortJob {
        SortJob {
            input: root.join("in"),
            with_people: root.join("with"),
            without_people: root.join("without"),
            method: DetectionMethod::Fast,
        }
    }

    #[test]
    fn test_end_to_end_with_cascade() {
        let root = tempfile::tempdir().unwrap();
        let job = job(root.path());
        fs::create_dir(&job.input).unwrap();
        save(&job.input, "a.png", true);
        save(&job.input, "b.png", false);
        save(&job.input, "c.png", true);

        let cascade = root.path().join("edge.xml");
        fs::write(&cascade, EDGE_CASCADE).unwrap();
        let mut config = AppConfig::default();
        config.sort.cascade.path = cascade.to_string_lossy().to_string();
        config.sort.cascade.min_neighbors = 0;
        config.sort.cascade.min_size = 0;

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut controller = SortController::new(SortTab::new(DetectionMethod::Fast), config, runtime.handle().clone());
        controller.start(job.clone()).unwrap();
        assert!(!controller.tab().start_enabled());
        assert_eq!(controller.tab().start_label(), "Sorting...");

        run_to_end(&mut controller);

        let tab = controller.tab();
        assert!(tab.start_enabled());
        assert_eq!(tab.log().iter().filter(|l| l.starts_with('✓')).count(), 3);
        assert_eq!(tab.log().last().unwrap(), "Summary: with=2, without=1, errors=0");
        assert!(job.with_people.join("a.png").exists());
        assert!(job.with_people.join("c.png").exists());
        assert!(job.without_people.join("b.png").exists());
        assert_eq!(tab.last_report().unwrap().processed(), 3);
    }

    #[test]
    fn test_setup_error_is_one_line_and_reenables_start() {
        let root = tempfile::tempdir().unwrap();
        let job = job(root.path());
        fs::create_dir(&job.input).unwrap();
        save(&job.input, "a.png", true);

        let mut config = AppConfig::default();
        config.sort.cascade.path = root.path().join("absent.xml").to_string_lossy().to_string();

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut controller = SortController::new(SortTab::new(DetectionMethod::Fast), config, runtime.handle().clone());
        controller.start(job.clone()).unwrap();
        run_to_end(&mut controller);

        let tab = controller.tab();
        assert!(tab.start_enabled());
        assert_eq!(tab.log().iter().filter(|l| l.starts_with('❌')).count(), 1);
        assert!(tab.log().iter().all(|l| !l.starts_with('✓')));
        assert!(tab.last_report().is_none());
        assert!(!job.with_people.exists());
    }

    #[test]
    fn test_invalid_job_never_starts() {
        let root = tempfile::tempdir().unwrap();
        let mut tab = SortTab::new(DetectionMethod::Accurate);
        let result = tab.start(&job(root.path()));
        assert!(matches!(result, Err(AssistantError::Validation(_))));
        assert!(tab.start_enabled());
        assert_eq!(tab.log(), &[READY.to_string()]);
    }

    #[test]
    fn test_second_start_rejected_while_sorting() {
        let root = tempfile::tempdir().unwrap();
        let job = job(root.path());
        fs::create_dir(&job.input).unwrap();

        let mut tab = SortTab::new(DetectionMethod::Fast);
        tab.start(&job).unwrap();
        assert!(tab.start(&job).is_err());

        tab.update(SortMsg::Failed(AssistantError::Setup("line one\n\nline two".to_string())));
        assert_eq!(tab.log(), &["❌ line one line two".to_string()]);
        assert!(tab.start(&job).is_ok());
    }

    #[test]
    fn test_render_method_marks_selection() {
        assert!(render_method(DetectionMethod::Fast).contains("(•) Fast"));
        assert!(render_method(DetectionMethod::Accurate).contains("(•) Accurate"));
    }
}
