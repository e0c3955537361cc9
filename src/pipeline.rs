//! Compile-time composition of the post-processing stages.
//!
//! A [`Pipeline`] owns the fixed per-detector state (anchor set, decoder layout, suppression and
//! ROI parameters) and runs the stages in data-dependency order: decode → suppress → project →
//! truncate → derive and expand ROIs. The stages themselves are plain functions; the pipeline
//! only validates their shared configuration once, at construction, so that per-call processing
//! cannot fail on configuration mistakes.

use anyhow::ensure;
use nalgebra::Matrix3;

use crate::detection::decode::{decode, DecodeConfig};
use crate::detection::nms::NonMaxSuppression;
use crate::detection::project::{project_detections, to_pixel_coords};
use crate::detection::ssd::{AnchorParams, Anchors};
use crate::detection::Detection;
use crate::rect::RotatedRect;
use crate::resolution::Resolution;
use crate::roi::{detections_to_rects, transform_rects, RectParams, RectTransform};
use crate::timer::Timer;

/// Complete configuration of a detector's post-processing.
///
/// All values are fixed per detector instance; nothing here changes between calls.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub anchors: AnchorParams,
    pub decode: DecodeConfig,
    pub nms: NonMaxSuppression,
    pub rect: RectParams,
    pub transform: RectTransform,
    /// Keep at most this many detections, truncating after projection without re-ranking.
    pub max_results: Option<usize>,
}

/// Post-processing pipeline of a single-class, anchor-based detector.
#[derive(Debug)]
pub struct Pipeline {
    anchors: Anchors,
    decode: DecodeConfig,
    nms: NonMaxSuppression,
    rect: RectParams,
    transform: RectTransform,
    max_results: Option<usize>,
    t_decode: Timer,
    t_nms: Timer,
    t_project: Timer,
}

impl Pipeline {
    /// Builds a pipeline, validating the configuration.
    ///
    /// All shape mismatches are caught here: an anchor layout whose count differs from the
    /// decoder's `num_boxes`, coordinate offsets that don't fit a tensor row, rotation keypoint
    /// indices the decoder never produces, and out-of-range thresholds. [`Pipeline::process`] can
    /// afterwards only fail on a raw tensor of the wrong length.
    pub fn new(config: PipelineConfig) -> anyhow::Result<Self> {
        let PipelineConfig {
            anchors,
            decode,
            nms,
            rect,
            transform,
            max_results,
        } = config;

        decode.validate()?;
        let anchors = Anchors::calculate(&anchors)?;
        ensure!(
            anchors.anchor_count() == decode.num_boxes,
            "anchor layout yields {} anchors but the decoder expects {}",
            anchors.anchor_count(),
            decode.num_boxes,
        );
        ensure!(
            (0.0..=1.0).contains(&nms.iou_thresh()),
            "suppression threshold {} outside of [0, 1]",
            nms.iou_thresh(),
        );
        ensure!(
            rect.rotation_start_keypoint < decode.num_keypoints
                && rect.rotation_end_keypoint < decode.num_keypoints,
            "rotation keypoints ({}, {}) out of range for {} keypoints per detection",
            rect.rotation_start_keypoint,
            rect.rotation_end_keypoint,
            decode.num_keypoints,
        );

        Ok(Self {
            anchors,
            decode,
            nms,
            rect,
            transform,
            max_results,
            t_decode: Timer::new("decode"),
            t_nms: Timer::new("nms"),
            t_project: Timer::new("project"),
        })
    }

    /// Runs post-processing over one inference result.
    ///
    /// `raw` is the model's output tensor (see [`DecodeConfig`] for its layout), `projection` the
    /// matrix reported by the preprocessing stage that produced the model input, and `image_size`
    /// the pixel size of the original image. The caller must pass the matrix belonging to the
    /// same preprocessing call that produced `raw`; the pipeline has no way to detect a
    /// mismatch.
    ///
    /// The call is deterministic and does not retain any state, so a pipeline can be shared
    /// between threads processing independent frames.
    pub fn process(
        &self,
        raw: &[f32],
        projection: &Matrix3<f32>,
        image_size: Resolution,
    ) -> anyhow::Result<Outputs> {
        let detections = self
            .t_decode
            .time(|| decode(&self.decode, &self.anchors, raw))?;
        let num_decoded = detections.len();

        let detections = self.t_nms.time(|| self.nms.process(detections));
        log::trace!(
            "decoded {num_decoded} candidates, {} after suppression",
            detections.len()
        );

        let mut detections = self
            .t_project
            .time(|| project_detections(projection, &detections));
        if let Some(max_results) = self.max_results {
            detections.truncate(max_results);
        }

        let rects = detections_to_rects(&self.rect, image_size, &detections);
        let expanded_rects = transform_rects(&self.transform, image_size, &rects);
        let pixel_detections = to_pixel_coords(image_size, &detections);

        Ok(Outputs {
            pixel_detections,
            rects,
            expanded_rects,
        })
    }

    /// Returns profiling timers for the pipeline stages.
    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        [&self.t_decode, &self.t_nms, &self.t_project].into_iter()
    }
}

/// Results of one [`Pipeline::process`] call.
///
/// The three sequences fan out from the same projected detections: `rects` and `expanded_rects`
/// stay in normalized image coordinates, `pixel_detections` has the image size multiplied out.
#[derive(Debug, Clone)]
pub struct Outputs {
    /// Surviving detections in pixel coordinates.
    pub pixel_detections: Vec<Detection>,
    /// One oriented rectangle per detection, in normalized coordinates (plus the zero-rect
    /// fallback, if configured).
    pub rects: Vec<RotatedRect>,
    /// The same rectangles grown/shifted into regions of interest for a downstream stage.
    pub expanded_rects: Vec<RotatedRect>,
}

#[cfg(test)]
mod tests {
    use crate::detection::nms::SuppressionMode;

    use super::*;

    fn config() -> PipelineConfig {
        PipelineConfig {
            anchors: AnchorParams {
                num_layers: 1,
                min_scale: 0.5,
                max_scale: 0.5,
                input_size: Resolution::new(4, 4),
                strides: vec![4],
                aspect_ratios: vec![1.0],
                fixed_anchor_size: true,
                interpolated_scale_aspect_ratio: 0.0,
                ..AnchorParams::default()
            },
            decode: DecodeConfig {
                num_classes: 1,
                num_boxes: 1,
                num_coords: 8,
                box_coord_offset: 0,
                keypoint_coord_offset: 4,
                num_keypoints: 2,
                num_values_per_keypoint: 2,
                sigmoid_score: true,
                score_clipping_thresh: Some(100.0),
                min_score_thresh: 0.5,
                reverse_output_order: true,
                apply_exponential_on_box_size: false,
                x_scale: 4.0,
                y_scale: 4.0,
                w_scale: 4.0,
                h_scale: 4.0,
            },
            nms: NonMaxSuppression::new(),
            rect: RectParams::default(),
            transform: RectTransform::default(),
            max_results: None,
        }
    }

    #[test]
    fn accepts_valid_config() {
        assert!(Pipeline::new(config()).is_ok());
    }

    #[test]
    fn rejects_anchor_count_mismatch() {
        let mut cfg = config();
        cfg.decode.num_boxes = 2;
        let err = Pipeline::new(cfg).unwrap_err().to_string();
        assert!(err.contains("anchor layout yields 1 anchors"), "{err}");
    }

    #[test]
    fn rejects_out_of_range_rotation_keypoint() {
        let mut cfg = config();
        cfg.rect.rotation_end_keypoint = 2;
        assert!(Pipeline::new(cfg).is_err());
    }

    #[test]
    fn rejects_invalid_suppression_threshold() {
        let mut cfg = config();
        cfg.nms.set_iou_thresh(1.5);
        assert!(Pipeline::new(cfg).is_err());

        let mut cfg = config();
        cfg.nms.set_mode(SuppressionMode::Remove);
        cfg.nms.set_iou_thresh(1.0);
        assert!(Pipeline::new(cfg).is_ok());
    }

    #[test]
    fn rejects_misaligned_coord_offsets() {
        let mut cfg = config();
        cfg.decode.keypoint_coord_offset = 6;
        assert!(Pipeline::new(cfg).is_err());
    }
}
