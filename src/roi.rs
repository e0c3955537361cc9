//! Deriving oriented regions of interest from detections.
//!
//! Detection-based trackers run a coarse detector first and a precise landmark network second.
//! The second stage wants a crop that is centered on the object and rotated so that the object
//! sits upright in it. This module derives that crop: [`detections_to_rects`] turns each detection
//! into an oriented rectangle whose rotation comes from two designated keypoints, and
//! [`transform_rects`] grows and shifts those rectangles so they are likely to cover the whole
//! object.

use nalgebra::{Rotation2, Vector2};

use crate::detection::Detection;
use crate::num::normalize_radians;
use crate::rect::{Rect, RotatedRect};
use crate::resolution::Resolution;

/// Controls how a [`Detection`] is converted into an oriented rectangle.
#[derive(Debug, Clone, PartialEq)]
pub struct RectParams {
    /// Index of the keypoint the rotation vector starts at.
    pub rotation_start_keypoint: usize,
    /// Index of the keypoint the rotation vector points to.
    pub rotation_end_keypoint: usize,
    /// The angle the keypoint vector is rotated *to*, in radians: the emitted rotation is the
    /// image-space angle that, applied to the derived rectangle, aligns the keypoint vector with
    /// this target.
    pub target_angle: f32,
    /// Emit a single all-zero rectangle when the detection list is empty, instead of an empty
    /// list. Downstream consumers that track "the" region of interest rely on this.
    pub output_zero_rect_for_empty: bool,
}

impl Default for RectParams {
    fn default() -> Self {
        Self {
            rotation_start_keypoint: 0,
            rotation_end_keypoint: 1,
            target_angle: 0.0,
            output_zero_rect_for_empty: false,
        }
    }
}

/// Derives one oriented rectangle per detection.
///
/// The rectangle reuses the detection's bounding box for its center and size; its rotation is
/// computed from the two configured keypoints in pixel space (`image_size` supplies the aspect
/// ratio; a normalized-coordinate angle would be distorted on non-square images).
///
/// If `detections` is empty and [`RectParams::output_zero_rect_for_empty`] is set, the output is a
/// single zero-valued rectangle. This is the only place in the pipeline where output cardinality
/// differs from input cardinality.
pub fn detections_to_rects(
    params: &RectParams,
    image_size: Resolution,
    detections: &[Detection],
) -> Vec<RotatedRect> {
    if detections.is_empty() && params.output_zero_rect_for_empty {
        return vec![RotatedRect::new(Rect::from_center(0.0, 0.0, 0.0, 0.0), 0.0)];
    }

    detections
        .iter()
        .map(|det| RotatedRect::new(det.bounding_rect(), rotation(params, image_size, det)))
        .collect()
}

fn rotation(params: &RectParams, image_size: Resolution, det: &Detection) -> f32 {
    let start = det.keypoint(params.rotation_start_keypoint);
    let end = det.keypoint(params.rotation_end_keypoint);

    // The y axis is flipped to compute the angle in the usual mathematical (y-up) orientation.
    let vec = Vector2::new(
        (end.x() - start.x()) * image_size.width() as f32,
        -(end.y() - start.y()) * image_size.height() as f32,
    );
    let angle = Rotation2::rotation_between(&Vector2::x(), &vec).angle();
    normalize_radians(params.target_angle - angle)
}

/// Controls how [`transform_rects`] reshapes a region of interest.
#[derive(Debug, Clone, PartialEq)]
pub struct RectTransform {
    /// Factors to scale the rectangle's width and height by, after shifting and squaring.
    pub scale_x: f32,
    pub scale_y: f32,
    /// Center shift as a fraction of the rectangle's width/height. The shift happens along the
    /// rectangle's own (rotated) axes, so a negative `shift_y` moves an upright object's crop
    /// towards the top of the object regardless of its rotation.
    pub shift_x: f32,
    pub shift_y: f32,
    /// Make the rectangle square by extending the short side to the long side, measured in
    /// pixels.
    pub square_long: bool,
    /// Make the rectangle square by shrinking the long side to the short side, measured in
    /// pixels. Ignored when `square_long` is set.
    pub square_short: bool,
}

impl Default for RectTransform {
    fn default() -> Self {
        Self {
            scale_x: 1.0,
            scale_y: 1.0,
            shift_x: 0.0,
            shift_y: 0.0,
            square_long: false,
            square_short: false,
        }
    }
}

/// Expands and shifts regions of interest in normalized coordinates.
///
/// With the default (identity) [`RectTransform`] this returns the input unchanged. Cardinality
/// and order are always preserved.
pub fn transform_rects(
    transform: &RectTransform,
    image_size: Resolution,
    rects: &[RotatedRect],
) -> Vec<RotatedRect> {
    let image_width = image_size.width() as f32;
    let image_height = image_size.height() as f32;

    rects
        .iter()
        .map(|roi| {
            let rect = roi.rect();
            let rotation = roi.rotation_radians();
            let width = rect.width();
            let height = rect.height();

            let mut x_center = rect.x_center();
            let mut y_center = rect.y_center();
            if rotation == 0.0 {
                x_center += width * transform.shift_x;
                y_center += height * transform.shift_y;
            } else {
                // Shift along the rotated axes. The shift is computed in pixels and mapped back,
                // since normalized units differ per axis on non-square images.
                let x_shift = (image_width * width * transform.shift_x * rotation.cos()
                    - image_height * height * transform.shift_y * rotation.sin())
                    / image_width;
                let y_shift = (image_width * width * transform.shift_x * rotation.sin()
                    + image_height * height * transform.shift_y * rotation.cos())
                    / image_height;
                x_center += x_shift;
                y_center += y_shift;
            }

            let (mut new_width, mut new_height) = (width, height);
            if transform.square_long {
                let long_side = (width * image_width).max(height * image_height);
                new_width = long_side / image_width;
                new_height = long_side / image_height;
            } else if transform.square_short {
                let short_side = (width * image_width).min(height * image_height);
                new_width = short_side / image_width;
                new_height = short_side / image_height;
            }

            RotatedRect::new(
                Rect::from_center(
                    x_center,
                    y_center,
                    new_width * transform.scale_x,
                    new_height * transform.scale_y,
                ),
                rotation,
            )
        })
        .collect()
}
