//! Rectangle types.
//!
//! These are used throughout the library for detection bounding boxes and regions of interest.
//! Whether a rectangle is in normalized `[0, 1]` coordinates or in pixels depends on the pipeline
//! stage that produced it; the types themselves are unit-agnostic.

use std::{fmt, ops::RangeInclusive};

use approx::{AbsDiffEq, RelativeEq};
use nalgebra::{Point2, Vector2};

/// An axis-aligned rectangle.
///
/// Rectangles are allowed to have zero height and/or width. Negative dimensions are not allowed.
#[derive(Clone, Copy, PartialEq)]
pub struct Rect {
    center: Point2<f32>,
    size: Vector2<f32>,
}

impl Rect {
    /// Creates a rectangle extending outwards from a center point.
    #[inline]
    pub fn from_center(x_center: f32, y_center: f32, width: f32, height: f32) -> Self {
        Self {
            center: Point2::new(x_center, y_center),
            size: Vector2::new(width, height),
        }
    }

    /// Creates a rectangle extending downwards and right from a point.
    #[inline]
    pub fn from_top_left(top_left_x: f32, top_left_y: f32, width: f32, height: f32) -> Self {
        Self::from_center(
            top_left_x + width * 0.5,
            top_left_y + height * 0.5,
            width,
            height,
        )
    }

    /// Constructs a [`Rect`] that spans a range of X and Y coordinates.
    pub fn from_ranges(x: RangeInclusive<f32>, y: RangeInclusive<f32>) -> Self {
        Self::span_inner(*x.start(), *y.start(), *x.end(), *y.end())
    }

    /// Computes the (axis-aligned) bounding rectangle that encompasses `points`.
    ///
    /// Returns [`None`] if `points` is an empty iterator.
    pub fn bounding<I: IntoIterator<Item = T>, T: Into<Point2<f32>>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();

        let first: Point2<f32> = iter.next()?.into();
        let (mut min, mut max) = (first, first);

        for pt in iter {
            let pt = pt.into();
            min = Point2::new(min.x.min(pt.x), min.y.min(pt.y));
            max = Point2::new(max.x.max(pt.x), max.y.max(pt.y));
        }

        Some(Self::span_inner(min.x, min.y, max.x, max.y))
    }

    fn span_inner(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        assert!(x_min <= x_max, "x_min={}, x_max={}", x_min, x_max);
        assert!(y_min <= y_max, "y_min={}, y_max={}", y_min, y_max);
        Self::from_top_left(x_min, y_min, x_max - x_min, y_max - y_min)
    }

    /// Scales the width and height of this [`Rect`] by the given amount.
    ///
    /// The center position of the [`Rect`] remains the same.
    #[must_use]
    pub fn scale(&self, scale: f32) -> Self {
        Self {
            center: self.center,
            size: self.size * scale,
        }
    }

    /// Returns the X coordinate of the left side of the rectangle.
    #[inline]
    pub fn x(&self) -> f32 {
        self.center.x - self.size.x * 0.5
    }

    /// Returns the Y coordinate of the top side of the rectangle.
    #[inline]
    pub fn y(&self) -> f32 {
        self.center.y - self.size.y * 0.5
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.size.x
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.size.y
    }

    #[inline]
    pub fn x_center(&self) -> f32 {
        self.center.x
    }

    #[inline]
    pub fn y_center(&self) -> f32 {
        self.center.y
    }

    #[inline]
    pub fn center(&self) -> Point2<f32> {
        self.center
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.size.x * self.size.y
    }

    /// Computes the intersection of `self` and `other`.
    ///
    /// Returns [`None`] when the intersection is empty (ie. the rectangles do not overlap).
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let x_min = self.x().max(other.x());
        let y_min = self.y().max(other.y());
        let x_max = (self.x() + self.width()).min(other.x() + other.width());
        let y_max = (self.y() + self.height()).min(other.y() + other.height());
        if x_min > x_max || y_min > y_max {
            return None;
        }

        Some(Self::span_inner(x_min, y_min, x_max, y_max))
    }

    fn intersection_area(&self, other: &Self) -> f32 {
        self.intersection(other).map_or(0.0, |rect| rect.area())
    }

    fn union_area(&self, other: &Self) -> f32 {
        self.area() + other.area() - self.intersection_area(other)
    }

    /// Computes the Intersection over Union (IOU) of `self` and `other`.
    pub fn iou(&self, other: &Self) -> f32 {
        self.intersection_area(other) / self.union_area(other)
    }

    /// Returns the corners in top-left, top-right, bottom-right, bottom-left order.
    pub fn corners(&self) -> [Point2<f32>; 4] {
        let [x, y] = [self.x(), self.y()];
        let [w, h] = [self.width(), self.height()];
        [
            Point2::new(x, y),
            Point2::new(x + w, y),
            Point2::new(x + w, y + h),
            Point2::new(x, y + h),
        ]
    }
}

impl fmt::Debug for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rect @ ({},{})/{}x{}",
            self.center.x, self.center.y, self.size.x, self.size.y
        )
    }
}

impl AbsDiffEq for Rect {
    type Epsilon = f32;

    fn default_epsilon() -> f32 {
        f32::default_epsilon()
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: f32) -> bool {
        self.center.abs_diff_eq(&other.center, epsilon)
            && self.size.abs_diff_eq(&other.size, epsilon)
    }
}

impl RelativeEq for Rect {
    fn default_max_relative() -> f32 {
        f32::default_max_relative()
    }

    fn relative_eq(&self, other: &Self, epsilon: f32, max_relative: f32) -> bool {
        self.center.relative_eq(&other.center, epsilon, max_relative)
            && self.size.relative_eq(&other.size, epsilon, max_relative)
    }
}

/// A [`Rect`], rotated around its center.
///
/// `radians` is the clockwise rotation in the y-down image coordinate system. A detection of an
/// upright object comes out with a rotation of (close to) zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotatedRect {
    rect: Rect,
    radians: f32,
}

impl RotatedRect {
    /// Creates a new rotated rectangle.
    #[inline]
    pub fn new(rect: Rect, radians: f32) -> Self {
        Self { rect, radians }
    }

    /// Returns the rectangle's rotation in radians.
    #[inline]
    pub fn rotation_radians(&self) -> f32 {
        self.radians
    }

    /// Returns the rectangle's rotation in degrees.
    pub fn rotation_degrees(&self) -> f32 {
        self.radians.to_degrees()
    }

    /// Returns a reference to the underlying non-rotated rectangle.
    #[inline]
    pub fn rect(&self) -> &Rect {
        &self.rect
    }

    pub fn center(&self) -> Point2<f32> {
        self.rect.center()
    }
}

impl From<Rect> for RotatedRect {
    fn from(rect: Rect) -> Self {
        Self::new(rect, 0.0)
    }
}

impl AbsDiffEq for RotatedRect {
    type Epsilon = f32;

    fn default_epsilon() -> f32 {
        f32::default_epsilon()
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: f32) -> bool {
        self.rect.abs_diff_eq(&other.rect, epsilon)
            && self.radians.abs_diff_eq(&other.radians, epsilon)
    }
}

impl RelativeEq for RotatedRect {
    fn default_max_relative() -> f32 {
        f32::default_max_relative()
    }

    fn relative_eq(&self, other: &Self, epsilon: f32, max_relative: f32) -> bool {
        self.rect.relative_eq(&other.rect, epsilon, max_relative)
            && self.radians.relative_eq(&other.radians, epsilon, max_relative)
    }
}
