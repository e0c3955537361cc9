//! Mapping of detections between coordinate systems.
//!
//! The preprocessing stage that feeds a detector crops, rotates and letterboxes the input image
//! into the network's input tensor, and reports the transform it used as a 3x3 homogeneous matrix
//! mapping tensor coordinates back to (normalized) image coordinates. Applying that matrix to the
//! decoded detections is what makes their geometry line up with the original image again; a matrix
//! from a different preprocessing call yields silently wrong geometry.

use nalgebra::{Matrix3, Point2};

use crate::rect::Rect;
use crate::resolution::Resolution;

use super::{Detection, Keypoint};

/// Projects `detections` through `matrix`, mapping them into the coordinate system the matrix
/// targets.
///
/// Box corners are projected individually and re-boxed (the projection may rotate, so the result
/// is the axis-aligned bounding rectangle of the projected corners); keypoints are projected
/// point-wise. Cardinality and order of the input are preserved.
pub fn project_detections(matrix: &Matrix3<f32>, detections: &[Detection]) -> Vec<Detection> {
    detections
        .iter()
        .map(|det| {
            let corners = det
                .bounding_rect()
                .corners()
                .map(|corner| matrix.transform_point(&corner));
            let rect = Rect::bounding(corners).expect("4 corners always have a bounding rect");

            let keypoints = det
                .keypoints()
                .iter()
                .map(|keypoint| {
                    let pt = matrix.transform_point(&Point2::new(keypoint.x(), keypoint.y()));
                    Keypoint::new(pt.x, pt.y)
                })
                .collect();

            Detection::with_keypoints(det.confidence(), rect, keypoints)
        })
        .collect()
}

/// Converts detections from normalized image coordinates to pixel coordinates.
pub fn to_pixel_coords(image_size: Resolution, detections: &[Detection]) -> Vec<Detection> {
    let width = image_size.width() as f32;
    let height = image_size.height() as f32;
    detections
        .iter()
        .map(|det| {
            let rect = det.bounding_rect();
            let keypoints = det
                .keypoints()
                .iter()
                .map(|keypoint| Keypoint::new(keypoint.x() * width, keypoint.y() * height))
                .collect();
            Detection::with_keypoints(
                det.confidence(),
                Rect::from_center(
                    rect.x_center() * width,
                    rect.y_center() * height,
                    rect.width() * width,
                    rect.height() * height,
                ),
                keypoints,
            )
        })
        .collect()
}
