//! Integration tests for building pipelines from configuration
//!
//! Tests cover:
//! - Stages sharing one loaded model through the cache
//! - Allow-lists and suppression settings carried from the config file
//! - Model load failures surfacing at construction time

mod common;

use std::cell::Cell;
use std::sync::Arc;

use common::*;
use voc::DetectorCache;
use voc::config::PipelineConfig;

const TWO_STAGE: &str = r#"
pipeline:
  - weights: models/vehicles.rten
    threshold: 0.5
    classes: [car]
  - weights: models/vehicles.rten
    threshold: 0.5
device: cpu
"#;

#[test]
fn test_stages_share_one_model() -> anyhow::Result<()> {
    let config = PipelineConfig::from_yaml_str(TWO_STAGE, None)?;
    let cache = DetectorCache::new();
    let loads = Cell::new(0);

    let pipeline = Pipeline::from_config_with(&config, &cache, |_| {
        loads.set(loads.get() + 1);
        Ok(Arc::new(vehicle_stub()) as SharedDetector)
    })?;

    assert_eq!(pipeline.len(), 2);
    assert_eq!(loads.get(), 1);
    assert_eq!(cache.len(), 1);
    Ok(())
}

#[test]
fn test_config_allow_list_is_enforced() -> anyhow::Result<()> {
    let config = PipelineConfig::from_yaml_str(TWO_STAGE, None)?;
    let cache = DetectorCache::new();

    // Every call reports a truck, which stage 1 does not allow
    let pipeline = Pipeline::from_config_with(&config, &cache, |_| {
        Ok(Arc::new(vehicle_stub().always(vec![raw(1, 0.9, 0.5, 0.5, 0.4, 0.4)])) as SharedDetector)
    })?;

    assert!(pipeline.run(gradient_image(100, 100))?.is_empty());
    Ok(())
}

#[test]
fn test_config_cascade_runs_end_to_end() -> anyhow::Result<()> {
    let yaml = r#"
pipeline:
  - weights: cars.rten
    threshold: 0.5
  - weights: plates.rten
    threshold: 0.5
nms:
  score_threshold: 0.5
  iou_threshold: 0.4
device: cpu
"#;
    let config = PipelineConfig::from_yaml_str(yaml, None)?;
    let cache = DetectorCache::new();

    let pipeline = Pipeline::from_config_with(&config, &cache, |key| {
        let stub = if key.weights.ends_with("cars.rten") {
            vehicle_stub().always(vec![raw(0, 0.9, 0.5, 0.5, 0.5, 0.5)])
        } else {
            vehicle_stub().always(vec![raw(2, 0.8, 0.5, 0.75, 0.5, 0.2)])
        };
        Ok(Arc::new(stub) as SharedDetector)
    })?;

    let out = pipeline.run(gradient_image(200, 200))?;

    // car: 100x100 at (50, 50); plate: 50x20 at (25, 65) inside it
    assert_eq!(out.len(), 1);
    assert_eq!(image::GenericImageView::dimensions(&out[0]), (50, 20));
    assert_eq!(pixel_at(&out[0], 0, 0), [75, 115, 0]);
    assert_eq!(cache.len(), 2);
    Ok(())
}

#[test]
fn test_missing_model_fails_at_construction() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let config_path = dir.path().join("voc.yaml");
    std::fs::write(
        &config_path,
        "pipeline:\n  - weights: missing.rten\n    threshold: 0.5\ndevice: cpu\n",
    )?;

    let config = PipelineConfig::load(&config_path)?;
    assert_eq!(config.stages[0].weights, dir.path().join("missing.rten"));

    let result = Pipeline::from_config(&config, &DetectorCache::new());
    assert!(matches!(result, Err(VocError::ModelLoad { .. })));
    Ok(())
}
