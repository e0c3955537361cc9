//! Decoding of raw SSD output tensors into [`Detection`]s.
//!
//! The raw tensor is a flat `f32` slice with one row per anchor. A row holds `num_coords`
//! anchor-relative regression values (box first, then keypoints) followed by one classification
//! logit per class. The layout knobs in [`DecodeConfig`] are fixed properties of a model family,
//! not tuning parameters; only [`DecodeConfig::min_score_thresh`] is meant to be adjusted per use
//! case.

use anyhow::ensure;

use crate::detection::ssd::{Anchor, Anchors};
use crate::detection::{Detection, Keypoint};
use crate::iter::zip_exact;
use crate::num::sigmoid;

/// Describes the output tensor layout and decoding rules of a detection model.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeConfig {
    /// Number of object classes the model scores per anchor.
    pub num_classes: usize,
    /// Number of anchors/boxes the model predicts. Must match the anchor set exactly.
    pub num_boxes: usize,
    /// Number of regression values per row (box coordinates plus keypoint coordinates).
    pub num_coords: usize,
    /// Offset of the 4 box coordinates within a row.
    pub box_coord_offset: usize,
    /// Offset of the first keypoint coordinate within a row.
    pub keypoint_coord_offset: usize,
    /// Number of keypoints per detection.
    pub num_keypoints: usize,
    /// Values stored per keypoint. Only the leading (x, y) pair is decoded.
    pub num_values_per_keypoint: usize,
    /// Map classification logits through a sigmoid. When unset, raw scores are used as-is.
    pub sigmoid_score: bool,
    /// Clamp logits to this magnitude before applying the sigmoid.
    pub score_clipping_thresh: Option<f32>,
    /// Detections scoring below this value are dropped. A detection exactly at the threshold is
    /// kept.
    pub min_score_thresh: f32,
    /// Raw rows store (x, y, w, h) instead of (y, x, h, w), and keypoints (x, y) instead of
    /// (y, x). A fixed convention of the model family.
    pub reverse_output_order: bool,
    /// Box width/height are decoded as `exp(raw / scale)` instead of linearly.
    pub apply_exponential_on_box_size: bool,
    /// Divisors applied to the raw regression values before scaling by the anchor size. Models
    /// with `fixed_anchor_size` anchors use their input resolution here, mapping raw pixel-scale
    /// offsets into normalized coordinates.
    pub x_scale: f32,
    pub y_scale: f32,
    pub w_scale: f32,
    pub h_scale: f32,
}

impl DecodeConfig {
    /// Number of `f32` values per tensor row.
    pub fn row_len(&self) -> usize {
        self.num_coords + self.num_classes
    }

    /// Total number of `f32` values the raw tensor must hold.
    pub fn tensor_len(&self) -> usize {
        self.num_boxes * self.row_len()
    }

    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.num_classes >= 1, "decoder needs at least 1 class");
        ensure!(self.num_boxes >= 1, "decoder needs at least 1 box");
        ensure!(
            self.box_coord_offset + 4 <= self.num_coords,
            "box coordinates (offset {}) do not fit into {} coords per row",
            self.box_coord_offset,
            self.num_coords,
        );
        if self.num_keypoints > 0 {
            ensure!(
                self.num_values_per_keypoint >= 2,
                "keypoints need at least 2 values each",
            );
            let keypoints_end = self.keypoint_coord_offset
                + self.num_keypoints * self.num_values_per_keypoint;
            ensure!(
                keypoints_end <= self.num_coords,
                "{} keypoints at offset {} do not fit into {} coords per row",
                self.num_keypoints,
                self.keypoint_coord_offset,
                self.num_coords,
            );
        }
        if let Some(thresh) = self.score_clipping_thresh {
            ensure!(thresh > 0.0, "score clipping threshold must be positive");
        }
        if self.sigmoid_score {
            ensure!(
                (0.0..=1.0).contains(&self.min_score_thresh),
                "sigmoid score threshold {} outside of [0, 1]",
                self.min_score_thresh,
            );
        }
        ensure!(
            self.x_scale != 0.0 && self.y_scale != 0.0 && self.w_scale != 0.0 && self.h_scale != 0.0,
            "coordinate scales must be non-zero",
        );
        Ok(())
    }
}

/// Decodes a raw output tensor into the detections that score at or above the configured
/// threshold.
///
/// `anchors` must be the anchor set the model was trained against, paired positionally with the
/// tensor rows. Surviving detections keep their anchor order. An empty result is valid and simply
/// means nothing scored high enough.
///
/// All emitted coordinates are normalized to the network input, the same space the anchors live
/// in.
pub fn decode(
    config: &DecodeConfig,
    anchors: &Anchors,
    raw: &[f32],
) -> anyhow::Result<Vec<Detection>> {
    ensure!(
        raw.len() == config.tensor_len(),
        "raw tensor holds {} values, expected {} ({} boxes x {} values)",
        raw.len(),
        config.tensor_len(),
        config.num_boxes,
        config.row_len(),
    );
    ensure!(
        anchors.anchor_count() == config.num_boxes,
        "anchor count {} does not match the configured {} boxes",
        anchors.anchor_count(),
        config.num_boxes,
    );

    let mut detections = Vec::new();
    for (anchor, row) in zip_exact(anchors.iter(), raw.chunks_exact(config.row_len())) {
        let score = best_score(config, &row[config.num_coords..]);
        if score < config.min_score_thresh {
            continue;
        }

        detections.push(decode_row(config, anchor, &row[..config.num_coords], score));
    }

    Ok(detections)
}

fn best_score(config: &DecodeConfig, logits: &[f32]) -> f32 {
    let mut best = f32::NEG_INFINITY;
    for &logit in logits {
        let score = if config.sigmoid_score {
            let logit = match config.score_clipping_thresh {
                Some(thresh) => logit.clamp(-thresh, thresh),
                None => logit,
            };
            sigmoid(logit)
        } else {
            logit
        };
        best = best.max(score);
    }
    best
}

fn decode_row(config: &DecodeConfig, anchor: &Anchor, coords: &[f32], score: f32) -> Detection {
    let b = &coords[config.box_coord_offset..config.box_coord_offset + 4];
    let (dx, dy, dw, dh) = if config.reverse_output_order {
        (b[0], b[1], b[2], b[3])
    } else {
        (b[1], b[0], b[3], b[2])
    };

    let x_center = dx / config.x_scale * anchor.width() + anchor.x_center();
    let y_center = dy / config.y_scale * anchor.height() + anchor.y_center();
    let (width, height) = if config.apply_exponential_on_box_size {
        (
            (dw / config.w_scale).exp() * anchor.width(),
            (dh / config.h_scale).exp() * anchor.height(),
        )
    } else {
        (
            dw / config.w_scale * anchor.width(),
            dh / config.h_scale * anchor.height(),
        )
    };

    let mut keypoints = Vec::with_capacity(config.num_keypoints);
    for i in 0..config.num_keypoints {
        let offset = config.keypoint_coord_offset + i * config.num_values_per_keypoint;
        let (kx, ky) = if config.reverse_output_order {
            (coords[offset], coords[offset + 1])
        } else {
            (coords[offset + 1], coords[offset])
        };
        keypoints.push(Keypoint::new(
            kx / config.x_scale * anchor.width() + anchor.x_center(),
            ky / config.y_scale * anchor.height() + anchor.y_center(),
        ));
    }

    Detection::with_keypoints(
        score,
        crate::rect::Rect::from_center(x_center, y_center, width, height),
        keypoints,
    )
}
