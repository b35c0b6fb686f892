//! YAML pipeline configuration
//!
//! ```yaml
//! pipeline:
//!   - weights: models/vehicles.rten
//!     threshold: 0.5
//!     classes: [car, truck]
//!   - weights: models/plates.rten
//!     threshold: 0.6
//! nms:
//!   score_threshold: 0.5
//!   iou_threshold: 0.4
//! crop_policy: clamp
//! ```
//!
//! Everything is validated here so a bad file fails before any model loads

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, VocError};
use crate::geometry::CropPolicy;
use crate::nms::Suppressor;

const DEFAULT_DEVICE: &str = "cpu";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_MIN_CONFIDENCE: f32 = 0.25;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    pipeline: Option<Vec<StageFile>>,
    nms: Option<Suppressor>,
    device: Option<String>,
    crop_policy: Option<CropPolicy>,
    parallel: Option<bool>,
    single_flight: Option<bool>,
    input_size: Option<u32>,
    min_confidence: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct StageFile {
    #[serde(alias = "model_path", alias = "modelPath")]
    weights: Option<PathBuf>,
    threshold: Option<f32>,
    classes: Option<Vec<String>>,
    labels: Option<PathBuf>,
}

/// One `(model, threshold)` step of the cascade
#[derive(Debug, Clone, PartialEq)]
pub struct StageSpec {
    pub weights: PathBuf,
    pub threshold: f32,
    /// Class names allowed through this stage; `None` allows all
    pub classes: Option<Vec<String>>,
    pub labels: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub stages: Vec<StageSpec>,
    pub nms: Suppressor,
    pub device: String,
    pub crop_policy: CropPolicy,
    pub parallel: bool,
    pub single_flight: bool,
    pub input_size: u32,
    pub min_confidence: f32,
}

impl PipelineConfig {
    /// Load and validate a config file. Relative model paths resolve against its directory
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| VocError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_yaml_str(&text, path.parent())
    }

    pub fn from_yaml_str(text: &str, base_dir: Option<&Path>) -> Result<Self> {
        let file: ConfigFile =
            serde_yaml::from_str(text).map_err(|e| VocError::Config(e.to_string()))?;
        Self::resolve(file, base_dir)
    }

    fn resolve(file: ConfigFile, base_dir: Option<&Path>) -> Result<Self> {
        let device = file
            .device
            .or_else(|| std::env::var("DEVICE").ok())
            .unwrap_or_else(|| DEFAULT_DEVICE.to_string());

        let stages_file = file
            .pipeline
            .ok_or_else(|| VocError::Config("missing key 'pipeline'".to_string()))?;

        let mut stages = Vec::with_capacity(stages_file.len());
        for (idx, stage) in stages_file.into_iter().enumerate() {
            stages.push(resolve_stage(idx, stage, base_dir)?);
        }

        let nms = file.nms.unwrap_or_default();
        check_unit("nms.score_threshold", nms.score_threshold)?;
        check_unit("nms.iou_threshold", nms.iou_threshold)?;

        let min_confidence = file.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE);
        check_unit("min_confidence", min_confidence)?;

        let input_size = file.input_size.unwrap_or(DEFAULT_INPUT_SIZE);
        if input_size == 0 {
            return Err(VocError::Config("input_size must be positive".to_string()));
        }

        Ok(Self {
            stages,
            nms,
            device,
            crop_policy: file.crop_policy.unwrap_or_default(),
            parallel: file.parallel.unwrap_or(false),
            single_flight: file.single_flight.unwrap_or(true),
            input_size,
            min_confidence,
        })
    }
}

fn resolve_stage(idx: usize, stage: StageFile, base_dir: Option<&Path>) -> Result<StageSpec> {
    let missing = |key: &str| VocError::Config(format!("pipeline[{idx}]: missing key '{key}'"));

    let weights = stage.weights.ok_or_else(|| missing("weights"))?;
    if weights.as_os_str().is_empty() {
        return Err(VocError::Config(format!("pipeline[{idx}]: empty 'weights'")));
    }
    let threshold = stage.threshold.ok_or_else(|| missing("threshold"))?;
    check_unit(&format!("pipeline[{idx}].threshold"), threshold)?;

    let rebase = |p: PathBuf| match base_dir {
        Some(dir) if p.is_relative() => dir.join(p),
        _ => p,
    };

    Ok(StageSpec {
        weights: rebase(weights),
        threshold,
        classes: stage.classes,
        labels: stage.labels.map(rebase),
    })
}

fn check_unit(key: &str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(VocError::Config(format!("{key} must be within [0, 1], got {value}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = PipelineConfig::from_yaml_str(
            "pipeline:\n  - weights: a.rten\n    threshold: 0.5\ndevice: cpu\n",
            None,
        )
        .unwrap();
        assert_eq!(cfg.stages.len(), 1);
        assert_eq!(cfg.stages[0].weights, PathBuf::from("a.rten"));
        assert_eq!(cfg.stages[0].classes, None);
        assert_eq!(cfg.nms, Suppressor::new(0.5, 0.4));
        assert_eq!(cfg.crop_policy, CropPolicy::Clamp);
        assert!(!cfg.parallel);
        assert!(cfg.single_flight);
        assert_eq!(cfg.input_size, 640);
    }

    #[test]
    fn device_from_file_is_kept_alongside_stages() {
        let cfg = PipelineConfig::from_yaml_str(
            "pipeline:\n  - weights: a.rten\n    threshold: 0.7\ndevice: CPU\nparallel: true\n",
            None,
        )
        .unwrap();
        assert_eq!(cfg.device, "CPU");
        assert_eq!(cfg.stages[0].threshold, 0.7);
        assert!(cfg.parallel);
    }

    #[test]
    fn full_config_is_parsed() {
        let yaml = r#"
pipeline:
  - weights: models/vehicles.rten
    threshold: 0.45
    classes: [car, truck]
    labels: models/vehicles.txt
  - model_path: /abs/plates.rten
    threshold: 0.6
nms:
  score_threshold: 0.3
  iou_threshold: 0.5
device: cpu
crop_policy: reject
parallel: true
single_flight: false
"#;
        let cfg = PipelineConfig::from_yaml_str(yaml, Some(Path::new("/etc/voc"))).unwrap();
        assert_eq!(cfg.stages[0].weights, PathBuf::from("/etc/voc/models/vehicles.rten"));
        assert_eq!(cfg.stages[0].labels, Some(PathBuf::from("/etc/voc/models/vehicles.txt")));
        assert_eq!(
            cfg.stages[0].classes,
            Some(vec!["car".to_string(), "truck".to_string()])
        );
        assert_eq!(cfg.stages[1].weights, PathBuf::from("/abs/plates.rten"));
        assert_eq!(cfg.nms, Suppressor::new(0.3, 0.5));
        assert_eq!(cfg.crop_policy, CropPolicy::Reject);
        assert!(cfg.parallel);
        assert!(!cfg.single_flight);
    }

    #[test]
    fn missing_keys_fail_fast() {
        let err = PipelineConfig::from_yaml_str("device: cpu\n", None).unwrap_err();
        assert!(err.to_string().contains("'pipeline'"));

        let err = PipelineConfig::from_yaml_str("pipeline:\n  - threshold: 0.5\n", None).unwrap_err();
        assert!(err.to_string().contains("'weights'"));

        let err = PipelineConfig::from_yaml_str("pipeline:\n  - weights: a.rten\n", None).unwrap_err();
        assert!(err.to_string().contains("'threshold'"));
    }

    #[test]
    fn out_of_range_thresholds_are_rejected() {
        for yaml in [
            "pipeline:\n  - weights: a.rten\n    threshold: 1.5\n",
            "pipeline:\n  - weights: a.rten\n    threshold: -0.1\n",
            "pipeline: []\nnms:\n  iou_threshold: 2.0\n",
        ] {
            assert!(matches!(
                PipelineConfig::from_yaml_str(yaml, None),
                Err(VocError::Config(_))
            ));
        }
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let yaml = "pipeline:\n  - weights: a.rten\n    threshold: 0.5\n    treshold: 0.2\n";
        assert!(matches!(
            PipelineConfig::from_yaml_str(yaml, None),
            Err(VocError::Config(_))
        ));
    }
}
