pub mod stub;
#[cfg(feature = "rten")]
pub mod yolo;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use image::DynamicImage;

use crate::config::PipelineConfig;
use crate::error::{Result, VocError};
use crate::models::RawDetection;

pub use stub::StubDetector;

/// Uniform contract over one pretrained detection model
///
/// Implementations are shared between stages and, in parallel mode, between
/// threads. Runtimes that are not reentrant should be wrapped in [`SingleFlight`]
pub trait DetectorAdapter: Send + Sync {
    /// Run the model on one image
    fn detect(&self, image: &DynamicImage) -> Result<Vec<RawDetection>>;

    /// Name of class `class_id`, or `None` when it is outside the class table
    fn class_name_for(&self, class_id: usize) -> Option<&str>;

    fn class_count(&self) -> usize;

    /// Short human-readable name used in logs and debug output
    fn name(&self) -> &str;
}

pub type SharedDetector = Arc<dyn DetectorAdapter>;

/// Serializes `detect` calls on an adapter that cannot run concurrently
pub struct SingleFlight<D> {
    inner: D,
    gate: Mutex<()>,
}

impl<D: DetectorAdapter> SingleFlight<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            gate: Mutex::new(()),
        }
    }
}

impl<D: DetectorAdapter> DetectorAdapter for SingleFlight<D> {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<RawDetection>> {
        let _guard = self
            .gate
            .lock()
            .map_err(|_| VocError::Detector(format!("{} lock poisoned", self.inner.name())))?;
        self.inner.detect(image)
    }

    fn class_name_for(&self, class_id: usize) -> Option<&str> {
        self.inner.class_name_for(class_id)
    }

    fn class_count(&self) -> usize {
        self.inner.class_count()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Identity of a loaded model: its file plus the label table it was paired with
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelKey {
    pub weights: PathBuf,
    pub labels: Option<PathBuf>,
}

impl ModelKey {
    /// Build a key from possibly relative paths, canonicalizing when the file exists
    pub fn new(weights: &Path, labels: Option<&Path>) -> Self {
        let canonical = |p: &Path| p.canonicalize().unwrap_or_else(|_| p.to_path_buf());
        Self {
            weights: canonical(weights),
            labels: labels.map(canonical),
        }
    }
}

/// Caching factory: every distinct model is loaded once and shared afterwards
pub struct DetectorCache {
    loaded: Mutex<HashMap<ModelKey, SharedDetector>>,
}

impl DetectorCache {
    pub fn new() -> Self {
        Self {
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached adapter for `key`, loading it with `load` on first use
    pub fn get_or_load<F>(&self, key: ModelKey, load: F) -> Result<SharedDetector>
    where
        F: FnOnce(&ModelKey) -> Result<SharedDetector>,
    {
        let mut loaded = self
            .loaded
            .lock()
            .map_err(|_| VocError::Detector("detector cache lock poisoned".to_string()))?;
        if let Some(detector) = loaded.get(&key) {
            log::debug!("reusing loaded model {}", key.weights.display());
            return Ok(detector.clone());
        }
        let detector = load(&key)?;
        log::info!("loaded model {} ({} classes)", key.weights.display(), detector.class_count());
        loaded.insert(key, detector.clone());
        Ok(detector)
    }

    pub fn len(&self) -> usize {
        self.loaded.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DetectorCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Load the model named by `key` with the runtime compiled into this build
#[cfg(feature = "rten")]
pub fn load_detector(key: &ModelKey, config: &PipelineConfig) -> Result<SharedDetector> {
    let options = yolo::YoloOptions {
        device: config.device.clone(),
        input_size: config.input_size,
        min_confidence: config.min_confidence,
    };
    let detector = yolo::YoloDetector::load(&key.weights, key.labels.as_deref(), &options)?;
    if config.single_flight {
        Ok(Arc::new(SingleFlight::new(detector)))
    } else {
        Ok(Arc::new(detector))
    }
}

#[cfg(not(feature = "rten"))]
pub fn load_detector(key: &ModelKey, _config: &PipelineConfig) -> Result<SharedDetector> {
    Err(VocError::ModelLoad {
        path: key.weights.clone(),
        reason: "built without a detector runtime (enable the `rten` feature)".to_string(),
    })
}

/// Read a label table: one class name per line, blank lines ignored
pub fn read_labels(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path).map_err(|e| VocError::ModelLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}
