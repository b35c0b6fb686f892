use image::{DynamicImage, GenericImageView, Rgba};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::config::PipelineConfig;
use crate::detector::{DetectorCache, ModelKey, SharedDetector};
use crate::error::{Result, VocError};
use crate::geometry::{self, CropPolicy};
use crate::models::{Detection, RawDetection};
use crate::nms::Suppressor;

/// Data that flows through the pipeline
/// Each PipelineData is one image region plus how it was found
#[derive(Clone)]
pub struct PipelineData {
    pub image: DynamicImage,

    /// Detection in the parent image this crop was cut from (None for the input)
    pub detection: Option<Detection>,

    /// Lineage: 1-based crop indices from each stage that led to this item
    /// E.g., [1, 3, 2] means: crop 1 of the input → crop 3 of that → crop 2 of that
    pub lineage: Vec<usize>,
}

impl PipelineData {
    pub fn from_image(image: DynamicImage) -> Self {
        Self {
            image,
            detection: None,
            lineage: vec![],
        }
    }

    /// Generate filename from lineage (e.g., "01-03-02.png")
    pub fn lineage_filename(&self, extension: &str) -> String {
        lineage_filename(&self.lineage, extension)
    }
}

fn lineage_filename(lineage: &[usize], extension: &str) -> String {
    if lineage.is_empty() {
        format!("00.{}", extension)
    } else {
        let ids: Vec<String> = lineage.iter().map(|id| format!("{:02}", id)).collect();
        format!("{}.{}", ids.join("-"), extension)
    }
}

/// Shared flag that stops a run before further images enter a stage
#[derive(Clone, Default, Debug)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Debug configuration for pipeline execution
#[derive(Clone, Debug)]
pub struct DebugConfig {
    /// Directory for debug outputs
    /// On the pipeline this is the root; each run writes below `<root>/<run label>/`
    pub output_dir: PathBuf,
}

/// Context available to all pipeline steps
#[derive(Clone, Default)]
pub struct PipelineContext {
    pub debug: Option<DebugConfig>,
    /// Process the images of a stage on the rayon pool
    pub parallel: bool,
    pub cancel: CancelToken,
}

impl PipelineContext {
    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(VocError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Trait that all pipeline steps must implement
pub trait PipelineStep: Send + Sync {
    /// Turn the previous step's images into this step's images
    /// Every input may yield zero or more outputs; input order is preserved
    fn process(
        &self,
        data: Vec<PipelineData>,
        step_index: usize,
        context: &PipelineContext,
    ) -> Result<Vec<PipelineData>>;

    /// Human-readable name for this step (used in logs and debug output)
    fn name(&self) -> &str;
}

/// One detector plus its confidence threshold
pub struct DetectionStage {
    detector: SharedDetector,
    threshold: f32,
    allowed: Option<HashSet<String>>,
    suppressor: Suppressor,
    crop_policy: CropPolicy,
    name: String,
}

impl DetectionStage {
    pub fn new(detector: SharedDetector, threshold: f32) -> Self {
        let name = detector.name().to_string();
        Self {
            detector,
            threshold,
            allowed: None,
            suppressor: Suppressor::default(),
            crop_policy: CropPolicy::default(),
            name,
        }
    }

    /// Only let detections of these class names through
    pub fn with_allowed_classes<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = Some(classes.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_suppressor(mut self, suppressor: Suppressor) -> Self {
        self.suppressor = suppressor;
        self
    }

    pub fn with_crop_policy(mut self, policy: CropPolicy) -> Self {
        self.crop_policy = policy;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Detect, resolve, filter and suppress: the boxes this stage would crop
    pub fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>> {
        let (width, height) = image.dimensions();
        let raw = self.detector.detect(image)?;
        let raw_count = raw.len();

        let mut candidates = Vec::with_capacity(raw_count);
        for r in raw {
            let detection = self.resolve(r, width, height)?;
            if detection.confidence < self.threshold {
                continue;
            }
            if let Some(allowed) = &self.allowed {
                if !allowed.contains(&detection.class_name) {
                    continue;
                }
            }
            candidates.push(detection);
        }

        let filtered = candidates.len();
        let kept = self.suppressor.suppress(candidates);
        log::debug!(
            "{}: {} raw, {} above threshold, {} after suppression",
            self.name,
            raw_count,
            filtered,
            kept.len()
        );
        for d in &kept {
            log::trace!("{}: {}", self.name, d);
        }
        Ok(kept)
    }

    /// Crop every surviving detection out of `image`
    /// Detections whose region is empty or rejected are dropped
    pub fn extract(&self, image: &DynamicImage) -> Result<Vec<(Detection, DynamicImage)>> {
        let mut crops = Vec::new();
        for detection in self.detect(image)? {
            match geometry::crop(image, &detection.pixel_box, self.crop_policy) {
                Ok(sub) => crops.push((detection, sub)),
                Err(VocError::InvalidRegion { .. }) => {
                    log::warn!("{}: dropping detection with invalid region: {}", self.name, detection);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(crops)
    }

    /// Run on a batch of images and concatenate the crops in input order
    pub fn run(&self, images: Vec<DynamicImage>) -> Result<Vec<DynamicImage>> {
        let data = images.into_iter().map(PipelineData::from_image).collect();
        let out = self.process(data, 0, &PipelineContext::default())?;
        Ok(out.into_iter().map(|d| d.image).collect())
    }

    fn resolve(&self, raw: RawDetection, width: u32, height: u32) -> Result<Detection> {
        let class_name = self
            .detector
            .class_name_for(raw.class_id)
            .ok_or(VocError::UnknownClass {
                class_id: raw.class_id,
                class_count: self.detector.class_count(),
            })?
            .to_string();
        let corner_box = geometry::to_corner_box(&raw.norm_box, width, height);
        Ok(Detection {
            class_id: raw.class_id,
            class_name,
            confidence: raw.confidence,
            pixel_box: geometry::clamp_origin(&corner_box),
            corner_box,
        })
    }

    fn process_one(
        &self,
        item: PipelineData,
        step_index: usize,
        context: &PipelineContext,
    ) -> Result<Vec<PipelineData>> {
        context.check_cancelled()?;
        let crops = self.extract(&item.image)?;

        if let Some(debug) = &context.debug {
            save_debug_output(debug, step_index, &self.name, &item, &crops)?;
        }

        Ok(crops
            .into_iter()
            .enumerate()
            .map(|(idx, (detection, image))| {
                let mut lineage = item.lineage.clone();
                lineage.push(idx + 1); // 1-indexed for readability
                PipelineData {
                    image,
                    detection: Some(detection),
                    lineage,
                }
            })
            .collect())
    }
}

impl PipelineStep for DetectionStage {
    fn process(
        &self,
        data: Vec<PipelineData>,
        step_index: usize,
        context: &PipelineContext,
    ) -> Result<Vec<PipelineData>> {
        let per_image: Vec<Vec<PipelineData>> = if context.parallel {
            data.into_par_iter()
                .map(|item| self.process_one(item, step_index, context))
                .collect::<Result<_>>()?
        } else {
            data.into_iter()
                .map(|item| self.process_one(item, step_index, context))
                .collect::<Result<_>>()?
        };
        Ok(per_image.into_iter().flatten().collect())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn step_dir(debug: &DebugConfig, step_index: usize, step_name: &str) -> Result<PathBuf> {
    let dir_name = format!(
        "{:02}_{}",
        step_index + 1,
        step_name.to_lowercase().replace(' ', "_")
    );
    let dir = debug.output_dir.join(dir_name);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Save the stage input with its boxes drawn, and every crop it produced
fn save_debug_output(
    debug: &DebugConfig,
    step_index: usize,
    step_name: &str,
    input: &PipelineData,
    crops: &[(Detection, DynamicImage)],
) -> Result<()> {
    let dir = step_dir(debug, step_index, step_name)?;

    let mut annotated = input.image.to_rgba8();
    for (detection, _) in crops {
        let b = &detection.pixel_box;
        let w = b.w.round().max(1.0) as u32;
        let h = b.h.round().max(1.0) as u32;
        let rect = Rect::at(b.x.round() as i32, b.y.round() as i32).of_size(w, h);
        draw_hollow_rect_mut(&mut annotated, rect, Rgba([255, 0, 0, 255]));
    }
    annotated.save(dir.join(input.lineage_filename("boxes.png")))?;

    for (idx, (_, crop)) in crops.iter().enumerate() {
        let mut lineage = input.lineage.clone();
        lineage.push(idx + 1);
        crop.save(dir.join(lineage_filename(&lineage, "png")))?;
    }
    log::debug!("debug: saved {} crops to {}", crops.len(), dir.display());
    Ok(())
}

/// Ordered cascade of steps
pub struct Pipeline {
    steps: Vec<Arc<dyn PipelineStep>>,
    context: PipelineContext,
    /// Runs started so far, numbers unlabeled debug directories
    runs: AtomicUsize,
}

impl Pipeline {
    /// Create a new empty pipeline
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            context: PipelineContext::default(),
            runs: AtomicUsize::new(0),
        }
    }

    /// Build the cascade described by `config`, loading models through `cache`
    pub fn from_config(config: &PipelineConfig, cache: &DetectorCache) -> Result<Self> {
        Self::from_config_with(config, cache, |key| crate::detector::load_detector(key, config))
    }

    /// Like [`Pipeline::from_config`] with a custom model loader
    pub fn from_config_with<F>(config: &PipelineConfig, cache: &DetectorCache, load: F) -> Result<Self>
    where
        F: Fn(&ModelKey) -> Result<SharedDetector>,
    {
        let mut pipeline = Pipeline::new().with_parallel(config.parallel);
        for (idx, spec) in config.stages.iter().enumerate() {
            let key = ModelKey::new(&spec.weights, spec.labels.as_deref());
            let detector = cache.get_or_load(key, &load)?;
            let name = format!("stage{}_{}", idx + 1, detector.name());
            let mut stage = DetectionStage::new(detector, spec.threshold)
                .with_suppressor(config.nms)
                .with_crop_policy(config.crop_policy)
                .with_name(name);
            if let Some(classes) = &spec.classes {
                stage = stage.with_allowed_classes(classes.iter().cloned());
            }
            pipeline = pipeline.add_stage(stage);
        }
        Ok(pipeline)
    }

    /// Process a stage's images concurrently
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.context.parallel = parallel;
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.context.cancel = token;
        self
    }

    /// Enable debug mode with output directory
    /// The directory must be empty or non-existent
    /// Each run gets its own subdirectory: the label given to [`Pipeline::run_labeled`],
    /// otherwise the 1-based run number ("0001", "0002", ...)
    pub fn with_debug(mut self, output_dir: PathBuf) -> Result<Self> {
        if output_dir.exists() {
            let entries = std::fs::read_dir(&output_dir)?;
            if entries.count() > 0 {
                return Err(VocError::Config(format!(
                    "debug directory is not empty: {}",
                    output_dir.display()
                )));
            }
        } else {
            std::fs::create_dir_all(&output_dir)?;
        }

        self.context.debug = Some(DebugConfig { output_dir });
        Ok(self)
    }

    pub fn add_stage(self, stage: DetectionStage) -> Self {
        self.add_step(Arc::new(stage))
    }

    pub fn add_step(mut self, step: Arc<dyn PipelineStep>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.context.cancel.clone()
    }

    /// Feed `input` through every stage and return the final crops
    pub fn run(&self, input: DynamicImage) -> Result<Vec<DynamicImage>> {
        Ok(self.run_data(input)?.into_iter().map(|d| d.image).collect())
    }

    /// Like [`Pipeline::run`], naming this run's debug subdirectory `label`
    pub fn run_labeled(&self, input: DynamicImage, label: &str) -> Result<Vec<DynamicImage>> {
        let data = self.execute(input, self.steps.len(), Some(label))?;
        Ok(data.into_iter().map(|d| d.image).collect())
    }

    /// Like [`Pipeline::run`] but keeps each crop's lineage and detection
    pub fn run_data(&self, input: DynamicImage) -> Result<Vec<PipelineData>> {
        self.run_partial(input, self.steps.len())
    }

    /// Run the pipeline but stop after `num_steps` steps (useful for debugging)
    pub fn run_partial(&self, input: DynamicImage, num_steps: usize) -> Result<Vec<PipelineData>> {
        self.execute(input, num_steps, None)
    }

    fn execute(
        &self,
        input: DynamicImage,
        num_steps: usize,
        label: Option<&str>,
    ) -> Result<Vec<PipelineData>> {
        let context = self.run_context(label);
        let mut data = vec![PipelineData::from_image(input)];

        for (idx, step) in self.steps.iter().take(num_steps).enumerate() {
            if data.is_empty() {
                log::debug!("nothing left to process, skipping remaining steps");
                break;
            }
            context.check_cancelled()?;
            log::debug!("running step {}: {} ({} items)", idx + 1, step.name(), data.len());
            data = step.process(data, idx, &context)?;
            log::debug!("  → {} items", data.len());
        }

        Ok(data)
    }

    /// Context for one run, with debug output moved into the run's own directory
    fn run_context(&self, label: Option<&str>) -> PipelineContext {
        let mut context = self.context.clone();
        if let Some(debug) = &mut context.debug {
            let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            let dir_name = match label {
                Some(label) => label.to_string(),
                None => format!("{:04}", run),
            };
            debug.output_dir = debug.output_dir.join(dir_name);
        }
        context
    }

    pub fn debug_dir(&self) -> Option<&Path> {
        self.context.debug.as_ref().map(|d| d.output_dir.as_path())
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}
