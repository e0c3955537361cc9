use approx::assert_relative_eq;
use nalgebra::Matrix3;

use posedet::detection::decode::DecodeConfig;
use posedet::detection::nms::NonMaxSuppression;
use posedet::detection::ssd::AnchorParams;
use posedet::pipeline::{Pipeline, PipelineConfig};
use posedet::pose::{self, PoseDetectionOptions};
use posedet::resolution::Resolution;
use posedet::roi::{RectParams, RectTransform};
use std::f32::consts::FRAC_PI_2;

/// A minimal detector: a single anchor covering the whole input, 2 keypoints, no scaling.
fn single_anchor_pipeline(max_results: Option<usize>) -> Pipeline {
    posedet::init_logger!();

    Pipeline::new(PipelineConfig {
        anchors: AnchorParams {
            num_layers: 1,
            min_scale: 0.5,
            max_scale: 0.5,
            input_size: Resolution::new(1, 1),
            strides: vec![1],
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
            min_score_thresh: 0.1,
            reverse_output_order: true,
            apply_exponential_on_box_size: false,
            x_scale: 1.0,
            y_scale: 1.0,
            w_scale: 1.0,
            h_scale: 1.0,
        },
        nms: NonMaxSuppression::new(),
        rect: RectParams {
            rotation_start_keypoint: 0,
            rotation_end_keypoint: 1,
            target_angle: FRAC_PI_2,
            output_zero_rect_for_empty: false,
        },
        transform: RectTransform::default(),
        max_results,
    })
    .unwrap()
}

#[test]
fn single_anchor_end_to_end() {
    let pipeline = single_anchor_pipeline(None);

    // Box centered on the anchor with zero size; keypoint 1 offset one unit to the right of
    // keypoint 0; a logit of 10.
    let raw = [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 10.0];
    let outputs = pipeline
        .process(&raw, &Matrix3::identity(), Resolution::new(100, 100))
        .unwrap();

    assert_eq!(outputs.pixel_detections.len(), 1);
    assert_eq!(outputs.rects.len(), 1);
    assert_eq!(outputs.expanded_rects.len(), 1);

    let detection = &outputs.pixel_detections[0];
    assert_relative_eq!(detection.confidence(), 0.99995, epsilon = 1e-4);
    assert_relative_eq!(detection.bounding_rect().x_center(), 50.0);
    assert_relative_eq!(detection.bounding_rect().y_center(), 50.0);

    // The keypoint vector points right, which is 90° away from the upright target.
    let rect = &outputs.rects[0];
    assert_relative_eq!(rect.rotation_degrees(), 90.0, epsilon = 1e-4);
    assert_relative_eq!(rect.rect().x_center(), 0.5);
    assert_relative_eq!(rect.rect().y_center(), 0.5);

    // The identity transform leaves the ROI untouched.
    assert_eq!(outputs.expanded_rects[0], outputs.rects[0]);
}

#[test]
fn projection_maps_back_into_the_image() {
    let pipeline = single_anchor_pipeline(None);

    // 0.4x0.4 box around the anchor center.
    let raw = [0.0, 0.0, 0.4, 0.4, 0.0, 0.0, 1.0, 0.0, 10.0];

    // The preprocessing stage cropped a region shifted by 0.1 along x.
    let matrix = Matrix3::new(1.0, 0.0, 0.1, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0);
    let outputs = pipeline
        .process(&raw, &matrix, Resolution::new(200, 100))
        .unwrap();

    let rect = outputs.pixel_detections[0].bounding_rect();
    assert_relative_eq!(rect.x_center(), 120.0, epsilon = 1e-3);
    assert_relative_eq!(rect.y_center(), 50.0, epsilon = 1e-3);
    assert_relative_eq!(rect.width(), 80.0, epsilon = 1e-3);
    assert_relative_eq!(rect.height(), 40.0, epsilon = 1e-3);

    // Normalized rects see the projected (not pixel) coordinates.
    assert_relative_eq!(outputs.rects[0].rect().x_center(), 0.6, epsilon = 1e-6);
}

#[test]
fn truncates_to_max_results_in_order() {
    let pipeline = Pipeline::new(PipelineConfig {
        anchors: AnchorParams {
            num_layers: 1,
            min_scale: 0.5,
            max_scale: 0.5,
            input_size: Resolution::new(5, 1),
            strides: vec![1],
            aspect_ratios: vec![1.0],
            fixed_anchor_size: true,
            interpolated_scale_aspect_ratio: 0.0,
            ..AnchorParams::default()
        },
        decode: DecodeConfig {
            num_classes: 1,
            num_boxes: 5,
            num_coords: 8,
            box_coord_offset: 0,
            keypoint_coord_offset: 4,
            num_keypoints: 2,
            num_values_per_keypoint: 2,
            sigmoid_score: true,
            score_clipping_thresh: Some(100.0),
            min_score_thresh: 0.1,
            reverse_output_order: true,
            apply_exponential_on_box_size: false,
            x_scale: 1.0,
            y_scale: 1.0,
            w_scale: 1.0,
            h_scale: 1.0,
        },
        nms: NonMaxSuppression::new(),
        rect: RectParams {
            rotation_start_keypoint: 0,
            rotation_end_keypoint: 1,
            target_angle: FRAC_PI_2,
            output_zero_rect_for_empty: false,
        },
        transform: RectTransform::default(),
        max_results: Some(3),
    })
    .unwrap();

    // 5 disjoint detections with descending logits; all pass the threshold and none overlap, so
    // suppression keeps all of them and truncation drops the trailing 2.
    let mut raw = vec![0.0; 5 * 9];
    for i in 0..5 {
        raw[i * 9 + 2] = 0.05; // width
        raw[i * 9 + 3] = 0.05; // height
        raw[i * 9 + 8] = 5.0 - i as f32;
    }

    let outputs = pipeline
        .process(&raw, &Matrix3::identity(), Resolution::new(100, 100))
        .unwrap();

    assert_eq!(outputs.pixel_detections.len(), 3);
    assert_eq!(outputs.rects.len(), 3);
    assert_eq!(outputs.expanded_rects.len(), 3);
    // Anchors sit at x = 0.1, 0.3, 0.5; the highest-scoring (leftmost) ones survive.
    for (i, detection) in outputs.pixel_detections.iter().enumerate() {
        assert_relative_eq!(
            detection.bounding_rect().x_center(),
            10.0 + 20.0 * i as f32,
            epsilon = 1e-3
        );
    }
}

#[test]
fn pose_preset_emits_zero_rect_when_nothing_is_found() {
    let pipeline = pose::pipeline(&PoseDetectionOptions {
        min_detection_confidence: 0.6,
        ..PoseDetectionOptions::default()
    })
    .unwrap();

    // All-zero logits decode to a score of 0.5, below the 0.6 threshold.
    let raw = vec![0.0; 2254 * 13];
    let outputs = pipeline
        .process(&raw, &Matrix3::identity(), Resolution::new(640, 480))
        .unwrap();

    assert!(outputs.pixel_detections.is_empty());
    assert_eq!(outputs.rects.len(), 1);
    let zero = &outputs.rects[0];
    assert_eq!(zero.rect().width(), 0.0);
    assert_eq!(zero.rect().height(), 0.0);
    assert_eq!(zero.rotation_radians(), 0.0);
    // The expansion stage maps the zero rect to itself.
    assert_eq!(outputs.expanded_rects[0], *zero);
}

#[test]
fn pose_preset_is_deterministic() {
    let pipeline = pose::pipeline(&PoseDetectionOptions::default()).unwrap();

    let mut rng = fastrand::Rng::with_seed(0x0123_4567);
    let raw = (0..2254 * 13)
        .map(|_| rng.f32() * 2.0 - 1.0)
        .collect::<Vec<_>>();

    let matrix = Matrix3::new(0.5, 0.0, 0.25, 0.0, 0.5, 0.25, 0.0, 0.0, 1.0);
    let a = pipeline
        .process(&raw, &matrix, Resolution::new(640, 480))
        .unwrap();
    let b = pipeline
        .process(&raw, &matrix, Resolution::new(640, 480))
        .unwrap();

    assert_eq!(a.pixel_detections, b.pixel_detections);
    assert_eq!(a.rects, b.rects);
    assert_eq!(a.expanded_rects, b.expanded_rects);
}

#[test]
fn pose_preset_rejects_malformed_tensors() {
    let pipeline = pose::pipeline(&PoseDetectionOptions::default()).unwrap();
    let raw = vec![0.0; 100];
    assert!(pipeline
        .process(&raw, &Matrix3::identity(), Resolution::new(640, 480))
        .is_err());
}
