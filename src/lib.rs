//! Post-processing for anchor-based object detectors.
//!
//! This library turns the raw output tensor of an SSD-style detection network into calibrated,
//! deduplicated object regions: anchor-relative regression values are decoded into scored
//! detections, overlapping detections are merged by non-maximum suppression, the survivors are
//! projected back through the preprocessing transform into the original image, and oriented
//! regions of interest are derived for a downstream landmark stage. Preprocessing and inference
//! themselves are out of scope; callers bring their own and hand the resulting tensor to a
//! [`pipeline::Pipeline`].
//!
//! # Coordinates
//!
//! Image coordinates have X pointing right and Y pointing *down*, with normalized coordinates
//! covering the image with the `[0.0, 1.0]` range in both axes. Rotations are measured clockwise
//! in that (y-down) system; a detection of an upright object has a rotation of 0.
//!
//! [`pose`] contains a ready-made pipeline for the BlazePose-family pose detection network.

use log::LevelFilter;

pub mod detection;
pub mod iter;
pub mod num;
pub mod pipeline;
pub mod pose;
pub mod rect;
pub mod resolution;
pub mod roi;
pub mod timer;

/// macro-use only, not part of public API.
#[doc(hidden)]
pub fn init_logger(calling_crate: &'static str) {
    let log_level = if cfg!(debug_assertions) {
        LevelFilter::Trace
    } else {
        LevelFilter::Debug
    };
    env_logger::Builder::new()
        .filter(Some(calling_crate), log_level)
        .filter(Some(env!("CARGO_PKG_NAME")), log_level)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Initializes logging to *stderr*.
///
/// If `cfg!(debug_assertions)` is enabled, the calling crate and this library will log at *trace*
/// level. Otherwise, they will log at *debug* level.
///
/// If a global logger is already registered, this macro will do nothing.
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger(env!("CARGO_CRATE_NAME"))
    };
}
