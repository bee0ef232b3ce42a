//! `normalize`
//!
//! Turns the path segments produced by a vectorizer into a flat sequence of
//! cubic bezier curves.

use crate::geometry::{CurveSequence, PixelCurve, PixelPoint};

/// One segment of a traced path. The segment starts where the previous one ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawSegment {
    /// Two straight lines meeting at a sharp corner.
    ///
    /// The bundled vectorizers read SVG paths, which have no corner segments, so they
    /// only emit [`RawSegment::Smooth`]. Corners come from other
    /// [`Vectorizer`](crate::trace::Vectorizer) implementations.
    Corner {
        /// The corner point.
        control: PixelPoint,
        /// Where the segment ends.
        end: PixelPoint,
    },
    /// A smooth cubic segment.
    Smooth {
        /// First control point.
        control1: PixelPoint,
        /// Second control point.
        control2: PixelPoint,
        /// Where the segment ends.
        end: PixelPoint,
    },
}

impl RawSegment {
    /// A straight line to `end`, expressed as a smooth segment with controls on its endpoints.
    ///
    /// # Arguments
    /// * `from`: Where the line starts, i.e. the end of the previous segment.
    /// * `end`: Where the line ends.
    ///
    /// # Returns
    /// A segment that normalizes to a degenerate curve.
    pub fn line(from: PixelPoint, end: PixelPoint) -> Self {
        RawSegment::Smooth {
            control1: from,
            control2: end,
            end,
        }
    }

    /// Gets where the segment ends.
    ///
    /// # Returns
    /// The end point of the segment.
    pub fn end(&self) -> PixelPoint {
        match self {
            RawSegment::Corner { end, .. } | RawSegment::Smooth { end, .. } => *end,
        }
    }
}

/// A traced path: a start point followed by segments in drawing order.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPath {
    /// Where the path starts.
    pub start: PixelPoint,
    /// The segments of the path, in order.
    pub segments: Vec<RawSegment>,
}

impl RawPath {
    /// Creates an empty path starting at `start`.
    ///
    /// # Arguments
    /// * `start`: Where the path starts.
    ///
    /// # Returns
    /// A new [`RawPath`] with no segments.
    pub fn new(start: PixelPoint) -> Self {
        Self {
            start,
            segments: vec![],
        }
    }

    /// Gets where the last segment of the path ends.
    ///
    /// # Returns
    /// The current end of the path, which is the start if there are no segments.
    pub fn current_point(&self) -> PixelPoint {
        self.segments
            .last()
            .map_or(self.start, RawSegment::end)
    }
}

/// Normalizes traced paths into uniform cubic curves.
///
/// Corner segments become two straight (degenerate) curves meeting at the corner,
/// smooth segments are copied as they are. Paths and segments keep their order and
/// nothing is dropped.
///
/// # Arguments
/// * `paths`: The traced paths.
///
/// # Returns
/// The curves, in drawing order.
pub fn normalize(paths: &[RawPath]) -> CurveSequence {
    let mut curves = Vec::with_capacity(
        paths
            .iter()
            .map(|path| path.segments.len() * 2)
            .sum::<usize>(),
    );

    for path in paths {
        let mut previous = path.start;

        for segment in &path.segments {
            match *segment {
                RawSegment::Corner { control, end } => {
                    curves.push(PixelCurve::line(previous, control));
                    curves.push(PixelCurve::line(control, end));
                }
                RawSegment::Smooth {
                    control1,
                    control2,
                    end,
                } => {
                    curves.push(PixelCurve::new(previous, control1, control2, end));
                }
            }

            previous = segment.end();
        }
    }

    curves
}
