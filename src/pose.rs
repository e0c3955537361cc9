//! Human pose detection post-processing.
//!
//! Preset for the BlazePose-family pose detection network: a 224x224 single-class SSD with 2254
//! anchors that predicts one box and 4 keypoints per anchor. The derived region of interest is
//! rotated so that the hips-to-shoulders axis points up and grown to cover the whole body, which is
//! what the downstream pose landmark network expects as its input crop.

use std::f32::consts::FRAC_PI_2;

use crate::detection::decode::DecodeConfig;
use crate::detection::nms::NonMaxSuppression;
use crate::detection::ssd::AnchorParams;
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::resolution::Resolution;
use crate::roi::{RectParams, RectTransform};

/// Keypoints predicted by the detection network.
#[derive(Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Keypoint {
    /// Center of the hips.
    Hips = 0,
    /// Center of the shoulders; together with [`Keypoint::Hips`] it spans the torso's rotation
    /// axis.
    Shoulders = 2,
}

/// Tunable options of the pose detector.
///
/// Everything else about the pipeline (tensor layout, anchor layout, ROI derivation) is a fixed
/// property of the model family and not exposed.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseDetectionOptions {
    /// Minimum confidence for a detection to be considered at all.
    pub min_detection_confidence: f32,
    /// IOU above which two detections are merged by non-maximum suppression.
    pub min_suppression_threshold: f32,
    /// Maximum number of poses to report. `None` reports every surviving detection.
    pub max_poses: Option<usize>,
}

impl Default for PoseDetectionOptions {
    fn default() -> Self {
        Self {
            min_detection_confidence: 0.5,
            min_suppression_threshold: 0.3,
            max_poses: None,
        }
    }
}

/// Input resolution of the pose detection network.
pub const INPUT_SIZE: Resolution = Resolution::new(224, 224);

const NUM_BOXES: usize = 2254;
const NUM_KEYPOINTS: usize = 4;

/// Builds the post-processing [`Pipeline`] of the pose detection network.
pub fn pipeline(options: &PoseDetectionOptions) -> anyhow::Result<Pipeline> {
    let input_size = INPUT_SIZE.width() as f32;

    Pipeline::new(PipelineConfig {
        anchors: AnchorParams {
            num_layers: 5,
            min_scale: 0.1484375,
            max_scale: 0.75,
            input_size: INPUT_SIZE,
            anchor_offset_x: 0.5,
            anchor_offset_y: 0.5,
            strides: vec![8, 16, 32, 32, 32],
            aspect_ratios: vec![1.0],
            fixed_anchor_size: true,
            ..AnchorParams::default()
        },
        decode: DecodeConfig {
            num_classes: 1,
            num_boxes: NUM_BOXES,
            num_coords: 4 + NUM_KEYPOINTS * 2,
            box_coord_offset: 0,
            keypoint_coord_offset: 4,
            num_keypoints: NUM_KEYPOINTS,
            num_values_per_keypoint: 2,
            sigmoid_score: true,
            score_clipping_thresh: Some(100.0),
            min_score_thresh: options.min_detection_confidence,
            reverse_output_order: true,
            apply_exponential_on_box_size: false,
            x_scale: input_size,
            y_scale: input_size,
            w_scale: input_size,
            h_scale: input_size,
        },
        nms: {
            let mut nms = NonMaxSuppression::new();
            nms.set_iou_thresh(options.min_suppression_threshold);
            nms
        },
        rect: RectParams {
            rotation_start_keypoint: Keypoint::Hips as usize,
            rotation_end_keypoint: Keypoint::Shoulders as usize,
            target_angle: FRAC_PI_2,
            output_zero_rect_for_empty: true,
        },
        transform: RectTransform {
            scale_x: 2.6,
            scale_y: 2.6,
            shift_x: 0.0,
            shift_y: -0.5,
            square_long: true,
            square_short: false,
        },
        max_results: options.max_poses,
    })
}
