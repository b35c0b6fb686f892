//! YOLOv8-style detector running on the rten inference engine

use std::path::Path;

use image::DynamicImage;
use image::imageops::FilterType;
use rten::Model;
use rten_tensor::NdTensor;
use rten_tensor::prelude::*;

use crate::detector::{DetectorAdapter, read_labels};
use crate::error::{Result, VocError};
use crate::models::{NormBox, PixelBox, RawDetection};
use crate::nms::{Scored, Suppressor};

pub const DEFAULT_INPUT_SIZE: u32 = 640;
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.25;
const RAW_IOU_THRESHOLD: f32 = 0.7;

pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

/// Construction parameters for [`YoloDetector`]
#[derive(Debug, Clone)]
pub struct YoloOptions {
    pub device: String,
    pub input_size: u32,
    pub min_confidence: f32,
}

impl Default for YoloOptions {
    fn default() -> Self {
        Self {
            device: "cpu".to_string(),
            input_size: DEFAULT_INPUT_SIZE,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

pub struct YoloDetector {
    model: Model,
    classes: Vec<String>,
    input_size: u32,
    min_confidence: f32,
    name: String,
}

/// One decoded anchor, in model-input pixels
struct Candidate {
    class_id: usize,
    score: f32,
    bbox: PixelBox,
}

impl Scored for Candidate {
    fn score(&self) -> f32 {
        self.score
    }

    fn bbox(&self) -> &PixelBox {
        &self.bbox
    }

    fn class_id(&self) -> usize {
        self.class_id
    }
}

impl YoloDetector {
    /// Load `weights`, pairing it with the label file at `labels` or the COCO names
    pub fn load(weights: &Path, labels: Option<&Path>, options: &YoloOptions) -> Result<Self> {
        let load_error = |reason: String| VocError::ModelLoad {
            path: weights.to_path_buf(),
            reason,
        };

        if !options.device.eq_ignore_ascii_case("cpu") {
            return Err(load_error(format!(
                "device '{}' is not supported, rten runs on cpu only",
                options.device
            )));
        }
        if !weights.is_file() {
            return Err(load_error("no such model file".to_string()));
        }

        let model = Model::load_file(weights).map_err(|e| load_error(e.to_string()))?;
        let classes = match labels {
            Some(path) => read_labels(path)?,
            None => COCO_CLASSES.iter().map(|s| s.to_string()).collect(),
        };
        let name = weights
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "yolo".to_string());

        Ok(Self {
            model,
            classes,
            input_size: options.input_size,
            min_confidence: options.min_confidence,
            name,
        })
    }

    fn input_tensor(&self, image: &DynamicImage) -> NdTensor<f32, 4> {
        let size = self.input_size;
        let rgb = image::imageops::resize(&image.to_rgb8(), size, size, FilterType::Triangle);
        let plane = (size * size) as usize;
        let mut data = vec![0.0f32; 3 * plane];
        for (x, y, pixel) in rgb.enumerate_pixels() {
            let offset = (y * size + x) as usize;
            for c in 0..3 {
                data[c * plane + offset] = pixel[c] as f32 / 255.0;
            }
        }
        NdTensor::from_data([1, 3, size as usize, size as usize], data)
    }
}

/// Decode a `[batch, 4 + classes, anchors]` output; only the first batch entry is read
fn decode(output: &NdTensor<f32, 3>, min_confidence: f32) -> Result<Vec<Candidate>> {
    let [batch, attrs, anchors] = output.shape();
    if batch == 0 || attrs < 5 {
        return Err(VocError::Detector(format!(
            "unexpected model output shape [{batch}, {attrs}, {anchors}], expected [1, 4 + classes, anchors]"
        )));
    }
    let class_count = attrs - 4;
    let mut candidates = Vec::new();

    for a in 0..anchors {
        let mut best = (0usize, f32::MIN);
        for c in 0..class_count {
            let score = output[[0, 4 + c, a]];
            if score > best.1 {
                best = (c, score);
            }
        }
        if best.1 < min_confidence {
            continue;
        }
        let (cx, cy, w, h) = (
            output[[0, 0, a]],
            output[[0, 1, a]],
            output[[0, 2, a]],
            output[[0, 3, a]],
        );
        candidates.push(Candidate {
            class_id: best.0,
            score: best.1,
            bbox: PixelBox::new(cx - w / 2.0, cy - h / 2.0, w, h),
        });
    }
    Ok(candidates)
}

impl DetectorAdapter for YoloDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<RawDetection>> {
        let input = self.input_tensor(image);
        let output = self
            .model
            .run_one(input.view().into(), None)
            .map_err(|e| VocError::Detector(e.to_string()))?;
        let output: NdTensor<f32, 3> = output
            .try_into()
            .map_err(|e| VocError::Detector(format!("unexpected model output: {e:?}")))?;

        let raw = Suppressor::new(self.min_confidence, RAW_IOU_THRESHOLD)
            .suppress_by_class(decode(&output, self.min_confidence)?);

        // Stretch-resize means input-relative coordinates are image-relative too.
        let size = self.input_size as f32;
        Ok(raw
            .into_iter()
            .map(|c| {
                let (cx, cy) = c.bbox.center();
                RawDetection {
                    class_id: c.class_id,
                    confidence: c.score,
                    norm_box: NormBox::new(cx / size, cy / size, c.bbox.w / size, c.bbox.h / size),
                }
            })
            .collect())
    }

    fn class_name_for(&self, class_id: usize) -> Option<&str> {
        self.classes.get(class_id).map(String::as_str)
    }

    fn class_count(&self) -> usize {
        self.classes.len()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_rejects_outputs_without_class_scores() {
        let boxes_only = NdTensor::from_data([1, 4, 2], vec![0.0f32; 8]);
        assert!(matches!(decode(&boxes_only, 0.25), Err(VocError::Detector(_))));

        let too_narrow = NdTensor::from_data([1, 3, 5], vec![0.0f32; 15]);
        assert!(matches!(decode(&too_narrow, 0.25), Err(VocError::Detector(_))));

        let empty_batch = NdTensor::from_data([0, 6, 2], Vec::<f32>::new());
        assert!(matches!(decode(&empty_batch, 0.25), Err(VocError::Detector(_))));
    }

    #[test]
    fn decode_picks_best_class_per_anchor() {
        // Two anchors, two classes; rows are cx, cy, w, h, class0, class1
        let output = NdTensor::from_data(
            [1, 6, 2],
            vec![10.0, 0.0, 10.0, 0.0, 4.0, 0.0, 4.0, 0.0, 0.9, 0.1, 0.1, 0.2],
        );

        let candidates = decode(&output, 0.25).unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].class_id, 0);
        assert_eq!(candidates[0].score, 0.9);
        assert_eq!(candidates[0].bbox, PixelBox::new(8.0, 8.0, 4.0, 4.0));
    }
}
