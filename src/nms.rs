//! Greedy non-maximum suppression
//!
//! Candidates scoring at or below `score_threshold` are dropped first. The
//! rest are visited in descending score order (ties keep detection order); each
//! kept candidate removes every later one overlapping it by more than
//! `iou_threshold`. Survivors are returned in their original detection order

use serde::Deserialize;

use crate::geometry::iou;
use crate::models::{Detection, PixelBox};

pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.4;

/// Anything that can take part in suppression
pub trait Scored {
    fn score(&self) -> f32;
    fn bbox(&self) -> &PixelBox;
    fn class_id(&self) -> usize;
}

impl Scored for Detection {
    fn score(&self) -> f32 {
        self.confidence
    }

    fn bbox(&self) -> &PixelBox {
        &self.corner_box
    }

    fn class_id(&self) -> usize {
        self.class_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Suppressor {
    pub score_threshold: f32,
    pub iou_threshold: f32,
}

impl Default for Suppressor {
    fn default() -> Self {
        Self {
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        }
    }
}

impl Suppressor {
    pub fn new(score_threshold: f32, iou_threshold: f32) -> Self {
        Self {
            score_threshold,
            iou_threshold,
        }
    }

    /// Indices into `candidates` that survive suppression, ascending
    pub fn keep_indices<T: Scored>(&self, candidates: &[T]) -> Vec<usize> {
        self.keep_indices_where(candidates, |_, _| true)
    }

    /// Suppress across all classes at once
    pub fn suppress<T: Scored>(&self, candidates: Vec<T>) -> Vec<T> {
        let keep = self.keep_indices(&candidates);
        select(candidates, &keep)
    }

    /// Suppress only among candidates sharing a class id
    pub fn suppress_by_class<T: Scored>(&self, candidates: Vec<T>) -> Vec<T> {
        let keep = self.keep_indices_where(&candidates, |a, b| a.class_id() == b.class_id());
        select(candidates, &keep)
    }

    fn keep_indices_where<T, F>(&self, candidates: &[T], competes: F) -> Vec<usize>
    where
        T: Scored,
        F: Fn(&T, &T) -> bool,
    {
        let mut order: Vec<usize> = (0..candidates.len())
            .filter(|&i| candidates[i].score() > self.score_threshold)
            .collect();
        // `sort_by` is stable, so equal scores keep detection order.
        order.sort_by(|&a, &b| {
            candidates[b]
                .score()
                .partial_cmp(&candidates[a].score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut suppressed = vec![false; order.len()];
        let mut keep = Vec::new();

        for i in 0..order.len() {
            if suppressed[i] {
                continue;
            }
            let best = &candidates[order[i]];
            keep.push(order[i]);

            for j in (i + 1)..order.len() {
                if suppressed[j] {
                    continue;
                }
                let other = &candidates[order[j]];
                if competes(best, other) && iou(best.bbox(), other.bbox()) > self.iou_threshold {
                    suppressed[j] = true;
                }
            }
        }

        keep.sort_unstable();
        keep
    }
}

fn select<T>(candidates: Vec<T>, keep: &[usize]) -> Vec<T> {
    let mut keep = keep.iter().peekable();
    candidates
        .into_iter()
        .enumerate()
        .filter_map(|(i, c)| {
            if keep.peek() == Some(&&i) {
                keep.next();
                Some(c)
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class_id: usize, confidence: f32, x: f32, y: f32, w: f32, h: f32) -> Detection {
        Detection {
            class_id,
            class_name: format!("class{class_id}"),
            confidence,
            pixel_box: PixelBox::new(x.max(0.0), y.max(0.0), w, h),
            corner_box: PixelBox::new(x, y, w, h),
        }
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let kept = Suppressor::default().suppress(Vec::<Detection>::new());
        assert!(kept.is_empty());
    }

    #[test]
    fn single_detection_survives_unchanged() {
        let d = det(3, 0.77, 5.0, 6.0, 7.0, 8.0);
        let kept = Suppressor::default().suppress(vec![d.clone()]);
        assert_eq!(kept, vec![d]);
    }

    #[test]
    fn identical_boxes_keep_the_most_confident() {
        let kept = Suppressor::default().suppress(vec![
            det(0, 0.6, 10.0, 10.0, 20.0, 20.0),
            det(0, 0.9, 10.0, 10.0, 20.0, 20.0),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 0.9);
    }

    #[test]
    fn scores_at_or_below_threshold_are_dropped() {
        let kept = Suppressor::default().suppress(vec![
            det(0, 0.5, 0.0, 0.0, 10.0, 10.0),
            det(0, 0.3, 50.0, 50.0, 10.0, 10.0),
            det(0, 0.51, 100.0, 100.0, 10.0, 10.0),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 0.51);
    }

    #[test]
    fn moderate_overlap_is_kept() {
        // IoU = 50 / 150 = 0.33, below 0.4
        let kept = Suppressor::default().suppress(vec![
            det(0, 0.9, 0.0, 0.0, 10.0, 10.0),
            det(0, 0.8, 5.0, 0.0, 10.0, 10.0),
        ]);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn ties_resolve_to_first_detected() {
        let s = Suppressor::default();
        let candidates = vec![
            det(1, 0.7, 0.0, 0.0, 10.0, 10.0),
            det(2, 0.7, 1.0, 0.0, 10.0, 10.0),
        ];
        assert_eq!(s.keep_indices(&candidates), vec![0]);
    }

    #[test]
    fn survivors_keep_detection_order() {
        let kept = Suppressor::default().suppress(vec![
            det(0, 0.6, 0.0, 0.0, 10.0, 10.0),
            det(1, 0.95, 100.0, 0.0, 10.0, 10.0),
            det(2, 0.8, 200.0, 0.0, 10.0, 10.0),
        ]);
        let ids: Vec<usize> = kept.iter().map(|d| d.class_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn suppression_is_idempotent() {
        let s = Suppressor::default();
        let candidates = vec![
            det(0, 0.9, 0.0, 0.0, 20.0, 20.0),
            det(0, 0.85, 2.0, 2.0, 20.0, 20.0),
            det(0, 0.7, 30.0, 30.0, 20.0, 20.0),
            det(0, 0.65, 31.0, 29.0, 20.0, 20.0),
            det(0, 0.4, 60.0, 60.0, 5.0, 5.0),
        ];
        let once = s.suppress(candidates);
        let twice = s.suppress(once.clone());
        assert_eq!(once, twice);
        assert_eq!(once.len(), 2);
    }

    #[test]
    fn chained_overlaps_resolve_greedily() {
        // b overlaps a and c, but a and c do not overlap: a suppresses b, c survives.
        let kept = Suppressor::default().suppress(vec![
            det(0, 0.9, 0.0, 0.0, 10.0, 10.0),
            det(0, 0.8, 2.0, 0.0, 10.0, 10.0),
            det(0, 0.7, 9.0, 0.0, 10.0, 10.0),
        ]);
        let confidences: Vec<f32> = kept.iter().map(|d| d.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.7]);
    }

    #[test]
    fn overlap_uses_unclamped_boxes() {
        // Clamped, these would overlap by 0.6; as detected the overlap is 20 / 60
        let kept = Suppressor::default().suppress(vec![
            det(0, 0.9, -30.0, 0.0, 50.0, 40.0),
            det(0, 0.8, 0.0, 0.0, 30.0, 40.0),
        ]);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn class_aware_suppression_ignores_other_classes() {
        let candidates = vec![
            det(0, 0.9, 0.0, 0.0, 10.0, 10.0),
            det(1, 0.8, 0.0, 0.0, 10.0, 10.0),
            det(0, 0.7, 0.0, 0.0, 10.0, 10.0),
        ];
        let s = Suppressor::default();
        assert_eq!(s.suppress(candidates.clone()).len(), 1);
        let by_class = s.suppress_by_class(candidates);
        let ids: Vec<usize> = by_class.iter().map(|d| d.class_id).collect();
        assert_eq!(ids, vec![0, 1]);
    }
}
