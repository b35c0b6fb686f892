use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use image::DynamicImage;

use crate::detector::DetectorAdapter;
use crate::error::{Result, VocError};
use crate::models::RawDetection;

/// Scripted detector for tests and dry runs
///
/// Answers come from a queue of per-call responses first, then from the
/// fallback response (empty unless set with [`StubDetector::always`])
pub struct StubDetector {
    classes: Vec<String>,
    script: Mutex<VecDeque<Result<Vec<RawDetection>>>>,
    fallback: Vec<RawDetection>,
    calls: AtomicUsize,
}

impl StubDetector {
    pub fn new<S: Into<String>>(classes: Vec<S>) -> Self {
        Self {
            classes: classes.into_iter().map(Into::into).collect(),
            script: Mutex::new(VecDeque::new()),
            fallback: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Answer every unscripted call with `detections`
    pub fn always(mut self, detections: Vec<RawDetection>) -> Self {
        self.fallback = detections;
        self
    }

    /// Queue the answer for the next unanswered call
    pub fn then(self, detections: Vec<RawDetection>) -> Self {
        self.push(Ok(detections));
        self
    }

    /// Queue a runtime failure for the next unanswered call
    pub fn then_fail(self, message: &str) -> Self {
        self.push(Err(VocError::Detector(message.to_string())));
        self
    }

    fn push(&self, answer: Result<Vec<RawDetection>>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(answer);
        }
    }

    /// Number of `detect` calls served so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DetectorAdapter for StubDetector {
    fn detect(&self, _image: &DynamicImage) -> Result<Vec<RawDetection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .script
            .lock()
            .map_err(|_| VocError::Detector("stub script lock poisoned".to_string()))?
            .pop_front();
        match scripted {
            Some(answer) => answer,
            None => Ok(self.fallback.clone()),
        }
    }

    fn class_name_for(&self, class_id: usize) -> Option<&str> {
        self.classes.get(class_id).map(String::as_str)
    }

    fn class_count(&self) -> usize {
        self.classes.len()
    }

    fn name(&self) -> &str {
        "stub"
    }
}
