//! `geometry`
//!
//! Points, curves and the mapping from traced pixel space into the
//! millimetre space that the machine moves in.

use lyon_algorithms::geom::euclid::{Point2D, Size2D, Vector2D};

/// Marker for coordinates measured in pixels of the traced bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pixels;

/// Marker for coordinates measured in millimetres on the machine bed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Millimetres;

/// A point in bitmap pixel space.
pub type PixelPoint = Point2D<f64, Pixels>;
/// A point in machine space, in mm.
pub type MachinePoint = Point2D<f64, Millimetres>;
/// A displacement in machine space, in mm.
pub type MachineVector = Vector2D<f64, Millimetres>;
/// Dimensions of the bed, in mm.
pub type BedSize = Size2D<f64, Millimetres>;
/// Dimensions of the traced bitmap, in pixels.
pub type BitmapSize = Size2D<u32, Pixels>;

/// The number of parameter values sampled when estimating the length of a curve.
pub const ARC_LENGTH_SAMPLES: usize = 100;

/// A cubic bezier curve, always made of exactly four points.
///
/// A straight segment is stored as a degenerate curve where `control1 == start`
/// and `control2 == end`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BezierCurve<U> {
    /// Where the curve starts.
    pub start: Point2D<f64, U>,
    /// The control point pulling away from the start.
    pub control1: Point2D<f64, U>,
    /// The control point pulling into the end.
    pub control2: Point2D<f64, U>,
    /// Where the curve ends.
    pub end: Point2D<f64, U>,
}

/// A curve in bitmap pixel space.
pub type PixelCurve = BezierCurve<Pixels>;
/// A curve in machine space.
pub type MachineCurve = BezierCurve<Millimetres>;

/// Curves in drawing order. The order is the order the pen visits them in.
pub type CurveSequence = Vec<PixelCurve>;

impl<U> BezierCurve<U> {
    /// Creates a new [`BezierCurve`].
    ///
    /// # Arguments
    /// * `start`: Where the curve starts.
    /// * `control1`: First control point.
    /// * `control2`: Second control point.
    /// * `end`: Where the curve ends.
    ///
    /// # Returns
    /// A new [`BezierCurve`].
    pub fn new(
        start: Point2D<f64, U>,
        control1: Point2D<f64, U>,
        control2: Point2D<f64, U>,
        end: Point2D<f64, U>,
    ) -> Self {
        Self {
            start,
            control1,
            control2,
            end,
        }
    }

    /// Creates a degenerate curve tracing the straight line between two points.
    ///
    /// # Arguments
    /// * `from`: Start of the line.
    /// * `to`: End of the line.
    ///
    /// # Returns
    /// A curve `(from, from, to, to)`.
    pub fn line(from: Point2D<f64, U>, to: Point2D<f64, U>) -> Self {
        Self::new(from, from, to, to)
    }

    /// The same curve travelled from its end to its start.
    ///
    /// # Returns
    /// The reversed curve.
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self::new(self.end, self.control2, self.control1, self.start)
    }

    /// Whether the control points sit on the endpoints, i.e. the curve is a straight line.
    pub fn is_degenerate(&self) -> bool {
        self.control1 == self.start && self.control2 == self.end
    }

    /// Evaluates the cubic Bernstein position function.
    ///
    /// `t = 0` yields exactly [`Self::start`] and `t = 1` yields exactly [`Self::end`].
    ///
    /// # Arguments
    /// * `t`: Curve parameter, between 0 and 1.
    ///
    /// # Returns
    /// The position on the curve at `t`.
    pub fn point_at(&self, t: f64) -> Point2D<f64, U> {
        let one_t = 1.0 - t;
        let start_weight = one_t * one_t * one_t;
        let control1_weight = 3.0 * one_t * one_t * t;
        let control2_weight = 3.0 * one_t * t * t;
        let end_weight = t * t * t;

        Point2D::new(
            start_weight * self.start.x
                + control1_weight * self.control1.x
                + control2_weight * self.control2.x
                + end_weight * self.end.x,
            start_weight * self.start.y
                + control1_weight * self.control1.y
                + control2_weight * self.control2.y
                + end_weight * self.end.y,
        )
    }

    /// Approximates the arc length by summing the distances between evenly spaced samples.
    ///
    /// # Arguments
    /// * `samples`: How many parameter values to evaluate, including both ends.
    ///
    /// # Returns
    /// The approximate length, in the units of the curve.
    pub fn arc_length(&self, samples: usize) -> f64 {
        if samples < 2 {
            return self.start.distance_to(self.end);
        }

        let last = (samples - 1) as f64;
        let mut length = 0.0;
        let mut previous = self.start;
        for index in 1..samples {
            let current = self.point_at(index as f64 / last);
            length += previous.distance_to(current);
            previous = current;
        }

        length
    }
}

impl PixelCurve {
    /// Moves the curve into machine space.
    ///
    /// # Arguments
    /// * `scale`: The per-axis pixel to mm factor.
    ///
    /// # Returns
    /// The curve in mm.
    pub fn to_machine(&self, scale: &PlanScale) -> MachineCurve {
        MachineCurve::new(
            scale.apply(self.start),
            scale.apply(self.control1),
            scale.apply(self.control2),
            scale.apply(self.end),
        )
    }
}

/// Independent per-axis scale factors from bitmap pixels to bed mm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanScale {
    /// mm per pixel along the horizontal axis.
    pub x: f64,
    /// mm per pixel along the vertical axis.
    pub y: f64,
}

impl PlanScale {
    /// Works out the scale between a bitmap and the bed it covers.
    ///
    /// Bed and bitmap share the same orientation, so width maps onto width.
    ///
    /// # Arguments
    /// * `bed`: Size of the bed in mm.
    /// * `bitmap`: Size of the bitmap in pixels.
    ///
    /// # Returns
    /// `bed / bitmap` for each axis.
    pub fn between(bed: BedSize, bitmap: BitmapSize) -> Self {
        Self {
            x: bed.width / f64::from(bitmap.width),
            y: bed.height / f64::from(bitmap.height),
        }
    }

    /// Maps a pixel-space point into machine space.
    ///
    /// # Arguments
    /// * `point`: The point to map.
    ///
    /// # Returns
    /// The point in mm.
    pub fn apply(&self, point: PixelPoint) -> MachinePoint {
        MachinePoint::new(point.x * self.x, point.y * self.y)
    }
}
