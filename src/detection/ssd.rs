//! Anchor/Prior generation for Single Shot MultiBox Detectors (SSDs).
//!
//! An SSD-style network predicts box offsets relative to a fixed grid of reference boxes
//! ("anchors" or "priors") that is determined by the network architecture. The anchor layout is
//! computed once per detector configuration and reused for every inference call; the decoder pairs
//! anchor `i` with row `i` of the raw output tensor.

use std::ops::Index;

use anyhow::ensure;

use crate::iter::zip_exact;
use crate::resolution::Resolution;

/// An anchor of an SSD network.
///
/// All values are in normalized `[0, 1]` coordinates relative to the network's input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    x_center: f32,
    y_center: f32,
    width: f32,
    height: f32,
}

impl Anchor {
    pub fn x_center(&self) -> f32 {
        self.x_center
    }

    pub fn y_center(&self) -> f32 {
        self.y_center
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }
}

/// Anchor layout configuration of an SSD network.
///
/// These values mirror the network architecture and are fixed per model family; getting them wrong
/// produces an anchor count that no longer matches the model's output tensor, which
/// [`Anchors::calculate`] cannot detect by itself (the decoder configuration does, at pipeline
/// construction).
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorParams {
    /// Number of output feature map layers. Must equal the length of `strides`.
    pub num_layers: usize,
    /// Anchor scale of the lowest layer.
    pub min_scale: f32,
    /// Anchor scale of the highest layer.
    pub max_scale: f32,
    /// Resolution of the network's input tensor.
    pub input_size: Resolution,
    /// Offset of the anchor center within a grid cell, as a fraction of the cell size.
    pub anchor_offset_x: f32,
    pub anchor_offset_y: f32,
    /// Per-layer stride of the feature map relative to the input. Consecutive layers with the
    /// same stride share one grid, with their anchors interleaved per cell.
    pub strides: Vec<u32>,
    /// Aspect ratios (width / height) of the anchors of each layer.
    pub aspect_ratios: Vec<f32>,
    /// Use a fixed 1.0x1.0 anchor size instead of the per-layer scaled sizes. The decoder then
    /// interprets regression values at the scale of the input tensor.
    pub fixed_anchor_size: bool,
    /// Aspect ratio of the extra per-layer anchor placed at a scale interpolated between this
    /// layer's and the next layer's. Disabled when zero.
    pub interpolated_scale_aspect_ratio: f32,
    /// Replace the lowest layer's anchors with the reduced (0.1, scale, scale) /
    /// (1:1, 2:1, 1:2) set.
    pub reduce_boxes_in_lowest_layer: bool,
    /// Explicit feature map sizes, overriding the stride-derived ones. Either empty or one entry
    /// per layer.
    pub feature_map_width: Vec<u32>,
    pub feature_map_height: Vec<u32>,
}

impl Default for AnchorParams {
    fn default() -> Self {
        Self {
            num_layers: 0,
            min_scale: 0.0,
            max_scale: 0.0,
            input_size: Resolution::new(0, 0),
            anchor_offset_x: 0.5,
            anchor_offset_y: 0.5,
            strides: Vec::new(),
            aspect_ratios: Vec::new(),
            fixed_anchor_size: false,
            interpolated_scale_aspect_ratio: 1.0,
            reduce_boxes_in_lowest_layer: false,
            feature_map_width: Vec::new(),
            feature_map_height: Vec::new(),
        }
    }
}

/// The full, ordered anchor set of an SSD network.
#[derive(Debug)]
pub struct Anchors {
    anchors: Vec<Anchor>,
}

impl Anchors {
    /// Computes the anchor set described by `params`.
    ///
    /// Anchors are emitted grid by grid, raster-scanned row-major, with every grid cell holding
    /// one anchor per configured aspect-ratio slot, in layer order. The output is deterministic.
    pub fn calculate(params: &AnchorParams) -> anyhow::Result<Self> {
        ensure!(params.num_layers > 0, "anchor layout needs at least 1 layer");
        ensure!(
            params.strides.len() == params.num_layers,
            "anchor layout specifies {} layers but {} strides",
            params.num_layers,
            params.strides.len(),
        );
        let explicit_grid =
            !params.feature_map_width.is_empty() || !params.feature_map_height.is_empty();
        if explicit_grid {
            ensure!(
                params.feature_map_width.len() == params.num_layers
                    && params.feature_map_height.len() == params.num_layers,
                "explicit feature map sizes must cover every layer",
            );
        }
        ensure!(
            !params.aspect_ratios.is_empty()
                || params.interpolated_scale_aspect_ratio > 0.0
                || params.reduce_boxes_in_lowest_layer,
            "anchor layout produces no anchors per grid cell",
        );

        let mut anchors = Vec::new();
        let mut layer_id = 0;
        while layer_id < params.num_layers {
            let mut aspect_ratios = Vec::new();
            let mut scales = Vec::new();

            // Consecutive layers with the same stride share a grid; each cell carries the
            // concatenation of the merged layers' anchor slots.
            let mut last_same_stride_layer = layer_id;
            while last_same_stride_layer < params.num_layers
                && params.strides[last_same_stride_layer] == params.strides[layer_id]
            {
                let scale = layer_scale(params, last_same_stride_layer);
                if last_same_stride_layer == 0 && params.reduce_boxes_in_lowest_layer {
                    aspect_ratios.extend([1.0, 2.0, 0.5]);
                    scales.extend([0.1, scale, scale]);
                } else {
                    for &aspect_ratio in &params.aspect_ratios {
                        aspect_ratios.push(aspect_ratio);
                        scales.push(scale);
                    }
                    if params.interpolated_scale_aspect_ratio > 0.0 {
                        let scale_next = if last_same_stride_layer == params.num_layers - 1 {
                            1.0
                        } else {
                            layer_scale(params, last_same_stride_layer + 1)
                        };
                        scales.push((scale * scale_next).sqrt());
                        aspect_ratios.push(params.interpolated_scale_aspect_ratio);
                    }
                }
                last_same_stride_layer += 1;
            }

            let mut anchor_sizes = Vec::with_capacity(aspect_ratios.len());
            for (&aspect_ratio, &scale) in zip_exact(&aspect_ratios, &scales) {
                let ratio_sqrt = aspect_ratio.sqrt();
                anchor_sizes.push((scale * ratio_sqrt, scale / ratio_sqrt));
            }

            let (grid_width, grid_height) = if explicit_grid {
                (
                    params.feature_map_width[layer_id],
                    params.feature_map_height[layer_id],
                )
            } else {
                let stride = params.strides[layer_id];
                ensure!(stride > 0, "layer {layer_id} has a stride of 0");
                (
                    (params.input_size.width() + stride - 1) / stride,
                    (params.input_size.height() + stride - 1) / stride,
                )
            };

            for y in 0..grid_height {
                for x in 0..grid_width {
                    for &(width, height) in &anchor_sizes {
                        let x_center = (x as f32 + params.anchor_offset_x) / grid_width as f32;
                        let y_center = (y as f32 + params.anchor_offset_y) / grid_height as f32;
                        let (width, height) = if params.fixed_anchor_size {
                            (1.0, 1.0)
                        } else {
                            (width, height)
                        };
                        anchors.push(Anchor {
                            x_center,
                            y_center,
                            width,
                            height,
                        });
                    }
                }
            }

            layer_id = last_same_stride_layer;
        }

        Ok(Self { anchors })
    }

    /// Returns the total number of SSD anchors/priors.
    pub fn anchor_count(&self) -> usize {
        self.anchors.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Anchor> {
        self.anchors.iter()
    }
}

impl Index<usize> for Anchors {
    type Output = Anchor;

    fn index(&self, index: usize) -> &Anchor {
        &self.anchors[index]
    }
}

fn layer_scale(params: &AnchorParams, layer: usize) -> f32 {
    if params.num_layers == 1 {
        (params.min_scale + params.max_scale) * 0.5
    } else {
        params.min_scale
            + (params.max_scale - params.min_scale) * layer as f32 / (params.num_layers - 1) as f32
    }
}
