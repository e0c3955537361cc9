//! Non-Maximum Suppression and Averaging.
//!
//! Anchor-based detectors produce duplicate detections for individual objects. Non-Maximum
//! Suppression (NMS) is an algorithm that filters these duplicates out, leaving only a single
//! detection with high confidence for each object.
//!
//! This module implements 2 variants of NMS, selected with [`SuppressionMode`]: The classic
//! Non-Maximum Suppression algorithm that removes any overlapping detections with lower confidence
//! ([`SuppressionMode::Remove`]), and the slightly smarter Non-Maximum Averaging
//! ([`SuppressionMode::Average`]) which instead computes a confidence-weighted average of each
//! cluster of overlapping detections. Since the latter reduces jitter between frames, and does not
//! seem to have any appreciable drawbacks (outside of a minor computational cost), it is used by
//! default.

use crate::iter::zip_exact;
use crate::num::TotalF32;
use crate::rect::Rect;

use super::{Detection, Keypoint};

/// A non-maximum suppression algorithm.
///
/// This type only holds configuration; [`NonMaxSuppression::process`] is a pure function over its
/// input and can be called concurrently from multiple threads.
#[derive(Debug, Clone)]
pub struct NonMaxSuppression {
    iou_thresh: f32,
    mode: SuppressionMode,
}

impl NonMaxSuppression {
    /// The default intersection-over-union threshold used to determine if two detections overlap.
    pub const DEFAULT_IOU_THRESH: f32 = 0.3;

    /// Creates a new non-maximum suppressor.
    ///
    /// The returned suppression algorithm will use [`SuppressionMode::Average`] and a default IOU
    /// threshold.
    pub fn new() -> Self {
        Self {
            iou_thresh: Self::DEFAULT_IOU_THRESH,
            mode: SuppressionMode::Average,
        }
    }

    /// Sets the intersection-over-union threshold to consider two detections as overlapping.
    ///
    /// By default, [`Self::DEFAULT_IOU_THRESH`] is used. The boundary values are valid: a
    /// threshold of 0.0 clusters every detection into one, a threshold of 1.0 only merges
    /// detections with identical bounding boxes.
    pub fn set_iou_thresh(&mut self, iou_thresh: f32) {
        self.iou_thresh = iou_thresh;
    }

    pub fn iou_thresh(&self) -> f32 {
        self.iou_thresh
    }

    /// Sets the suppression mode.
    pub fn set_mode(&mut self, mode: SuppressionMode) {
        self.mode = mode;
    }

    /// Performs non-maximum suppression on `detections`.
    ///
    /// The surviving detections are returned in descending order of their cluster seed's
    /// confidence. An empty input produces an empty output.
    pub fn process(&self, mut detections: Vec<Detection>) -> Vec<Detection> {
        let mut out = Vec::with_capacity(detections.len());

        // Sort by ascending confidence, process highest confidence first by starting at the back.
        detections.sort_by_key(|det| TotalF32(det.confidence()));

        while let Some(seed) = detections.pop() {
            match self.mode {
                SuppressionMode::Remove => {
                    detections.retain(|other| {
                        let iou = seed.bounding_rect().iou(&other.bounding_rect());
                        iou < self.iou_thresh
                    });
                    out.push(seed);
                }
                SuppressionMode::Average => {
                    let seed_rect = seed.bounding_rect();
                    let mut cluster = vec![seed];
                    detections.retain(|other| {
                        let iou = seed_rect.iou(&other.bounding_rect());
                        if iou >= self.iou_thresh {
                            cluster.push(other.clone());
                            false // remove from detection list
                        } else {
                            true
                        }
                    });
                    out.push(average_cluster(&cluster));
                }
            }
        }

        out
    }
}

impl Default for NonMaxSuppression {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes the confidence-weighted average of a cluster of overlapping detections.
///
/// `cluster[0]` is the seed; its confidence is carried over to the output unchanged.
fn average_cluster(cluster: &[Detection]) -> Detection {
    let mut acc_x = 0.0;
    let mut acc_y = 0.0;
    let mut acc_w = 0.0;
    let mut acc_h = 0.0;
    let mut acc_keypoints = vec![(0.0, 0.0); cluster[0].keypoints().len()];
    let mut divisor = 0.0;

    for det in cluster {
        let factor = det.confidence();
        divisor += factor;

        let rect = det.bounding_rect();
        acc_x += rect.x_center() * factor;
        acc_y += rect.y_center() * factor;
        acc_w += rect.width() * factor;
        acc_h += rect.height() * factor;

        // Panics if cluster members disagree on the keypoint count; the decoder emits a constant
        // number of keypoints per detection.
        for (acc, keypoint) in zip_exact(acc_keypoints.iter_mut(), det.keypoints()) {
            acc.0 += keypoint.x() * factor;
            acc.1 += keypoint.y() * factor;
        }
    }

    let keypoints = acc_keypoints
        .into_iter()
        .map(|(x, y)| Keypoint::new(x / divisor, y / divisor))
        .collect();
    Detection::with_keypoints(
        cluster[0].confidence(),
        Rect::from_center(
            acc_x / divisor,
            acc_y / divisor,
            acc_w / divisor,
            acc_h / divisor,
        ),
        keypoints,
    )
}

/// Describes how [`NonMaxSuppression`] should deal with overlapping detections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SuppressionMode {
    /// Remove overlapping detections, only retain the detection with highest confidence score.
    Remove,

    /// Compute a confidence-weighted average of overlapping detections.
    Average,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nms_suppresses_non_maximum() {
        let mut nms = NonMaxSuppression::new();
        nms.set_mode(SuppressionMode::Remove);

        let rect = Rect::from_center(0.0, 0.0, 1.0, 1.0);
        let a = Detection::new(0.6, rect);
        let b = Detection::new(0.55, rect.scale(1.5));
        let detections = nms.process(vec![a, b]);
        assert_eq!(detections.len(), 1);

        let d = &detections[0];
        let rect = d.bounding_rect();
        assert_eq!(d.confidence(), 0.6);
        assert_eq!(rect.x_center(), 0.0);
        assert_eq!(rect.y_center(), 0.0);
        assert_eq!(rect.width(), 1.0);
        assert_eq!(rect.height(), 1.0);
    }

    #[test]
    fn nms_ignores_nonoverlapping() {
        let mut nms = NonMaxSuppression::new();
        nms.set_mode(SuppressionMode::Remove);

        let a = Detection::new(1.0, Rect::from_center(0.0, 0.0, 1.0, 1.0));
        let b = Detection::new(0.5, Rect::from_center(5.0, 0.0, 1.0, 1.0));

        let detections = nms.process(vec![a, b]);
        assert_eq!(detections.len(), 2);
        // Output is ordered by descending confidence.
        assert_eq!(detections[0].confidence(), 1.0);
        assert_eq!(detections[1].confidence(), 0.5);
    }

    #[test]
    fn nma_averages_detections() {
        let mut nms = NonMaxSuppression::new();
        nms.set_iou_thresh(0.0);

        let rect = Rect::from_center(-1.0, 3.0, 1.0, 1.0);
        let a = Detection::new(1.0, rect);
        let b = Detection::new(0.5, rect.scale(4.0));
        let detections = nms.process(vec![a, b]);
        assert_eq!(detections.len(), 1);

        let d = &detections[0];
        let rect = d.bounding_rect();
        assert_eq!(d.confidence(), 1.0);
        assert_eq!(rect.x_center(), -1.0);
        assert_eq!(rect.y_center(), 3.0);
        assert_eq!(rect.width(), 2.0);
        assert_eq!(rect.height(), 2.0);
    }

    #[test]
    fn nma_averages_keypoints() {
        let nms = NonMaxSuppression::new();

        let rect = Rect::from_center(0.0, 0.0, 2.0, 2.0);
        let a = Detection::with_keypoints(0.75, rect, vec![Keypoint::new(1.0, 0.0)]);
        let b = Detection::with_keypoints(0.25, rect, vec![Keypoint::new(0.0, 1.0)]);
        let detections = nms.process(vec![a, b]);
        assert_eq!(detections.len(), 1);

        // The seed's confidence wins, keypoints are averaged with weights 0.75 / 0.25.
        let d = &detections[0];
        assert_eq!(d.confidence(), 0.75);
        assert_eq!(d.keypoint(0).x(), 0.75);
        assert_eq!(d.keypoint(0).y(), 0.25);
    }

    #[test]
    fn empty_input() {
        let nms = NonMaxSuppression::new();
        assert!(nms.process(Vec::new()).is_empty());
    }

    #[test]
    fn threshold_one_only_merges_identical() {
        let mut nms = NonMaxSuppression::new();
        nms.set_iou_thresh(1.0);

        let rect = Rect::from_center(0.0, 0.0, 1.0, 1.0);
        let a = Detection::new(0.9, rect);
        let b = Detection::new(0.8, rect);
        let c = Detection::new(0.7, Rect::from_center(0.25, 0.0, 1.0, 1.0));
        let detections = nms.process(vec![a, b, c]);
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].confidence(), 0.9);
        assert_eq!(detections[1].confidence(), 0.7);
    }

    #[test]
    fn threshold_zero_merges_everything() {
        let mut nms = NonMaxSuppression::new();
        nms.set_iou_thresh(0.0);

        let a = Detection::new(0.9, Rect::from_center(0.0, 0.0, 1.0, 1.0));
        let b = Detection::new(0.8, Rect::from_center(100.0, 100.0, 1.0, 1.0));
        let detections = nms.process(vec![a, b]);
        assert_eq!(detections.len(), 1);
    }

    #[test]
    fn random_inputs_only_shrink() {
        let mut rng = fastrand::Rng::with_seed(0x5eed);
        let nms = NonMaxSuppression::new();

        for _ in 0..100 {
            let detections = (0..rng.usize(0..20))
                .map(|_| {
                    Detection::new(
                        rng.f32(),
                        Rect::from_center(rng.f32(), rng.f32(), rng.f32(), rng.f32()),
                    )
                })
                .collect::<Vec<_>>();
            let len = detections.len();
            let out = nms.process(detections);
            assert!(out.len() <= len);
            // Output confidences are sorted descending.
            for pair in out.windows(2) {
                assert!(pair[0].confidence() >= pair[1].confidence());
            }
        }
    }
}
