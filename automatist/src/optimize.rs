//! `optimize`
//!
//! Strategies for ordering curves so that the pen spends less time travelling
//! with the pen up.
//!
//! A strategy may reorder curves and may travel a curve backwards, it never
//! moves a control point.

use serde::{Deserialize, Serialize};

use crate::geometry::{CurveSequence, PixelCurve};

/// Something that can reorder a sequence of curves.
pub trait PathOptimizer {
    /// Reorders the curves.
    ///
    /// # Arguments
    /// * `curves`: The curves to reorder.
    ///
    /// # Returns
    /// The same set of curves, in the order they should be drawn.
    fn optimize(&self, curves: CurveSequence) -> CurveSequence;
}

/// Keeps the order the vectorizer produced.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl PathOptimizer for Identity {
    fn optimize(&self, curves: CurveSequence) -> CurveSequence {
        curves
    }
}

/// Greedy tour construction: always draw the curve whose start (or end, travelling it
/// backwards) is closest to where the pen currently is.
///
/// The first curve is kept as the starting point. Ties go to the curve that came first
/// in the input, then to travelling forwards.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestNeighbour;

impl PathOptimizer for NearestNeighbour {
    #[allow(clippy::float_cmp)]
    fn optimize(&self, curves: CurveSequence) -> CurveSequence {
        if curves.len() < 3 {
            return curves;
        }

        let mut remaining: Vec<Option<PixelCurve>> = curves.into_iter().map(Some).collect();
        let mut ordered = Vec::with_capacity(remaining.len());

        let Some(first) = remaining[0].take() else {
            return ordered;
        };
        let mut position = first.end;
        ordered.push(first);

        while ordered.len() < remaining.len() {
            // (index, reversed, distance)
            let mut best: Option<(usize, bool, f64)> = None;

            for (index, candidate) in remaining.iter().enumerate() {
                let Some(candidate) = candidate else {
                    continue;
                };

                let forwards = position.distance_to(candidate.start);
                let backwards = position.distance_to(candidate.end);
                let (reversed, distance) = if backwards < forwards {
                    (true, backwards)
                } else {
                    (false, forwards)
                };

                if best.map_or(true, |(_, _, best_distance)| distance < best_distance) {
                    best = Some((index, reversed, distance));
                    if distance == 0.0 {
                        break;
                    }
                }
            }

            let Some((index, reversed, _)) = best else {
                break;
            };
            let Some(curve) = remaining[index].take() else {
                break;
            };
            let curve = if reversed { curve.reversed() } else { curve };
            position = curve.end;
            ordered.push(curve);
        }

        ordered
    }
}

/// Selects which optimizer to use. This is a configuration value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    /// Draw curves in the order they were traced.
    #[default]
    Identity,
    /// Greedy nearest-neighbour ordering.
    NearestNeighbour,
}

impl OptimizerKind {
    /// Builds the optimizer this kind selects.
    ///
    /// # Returns
    /// The optimizer.
    pub fn optimizer(self) -> Box<dyn PathOptimizer> {
        match self {
            OptimizerKind::Identity => Box::new(Identity),
            OptimizerKind::NearestNeighbour => Box::new(NearestNeighbour),
        }
    }
}

/// Sums the distance travelled with the pen up between consecutive curves.
///
/// # Arguments
/// * `curves`: The curves, in drawing order.
///
/// # Returns
/// The total pen-up travel, in the units of the curves.
pub fn pen_up_travel(curves: &[PixelCurve]) -> f64 {
    curves
        .windows(2)
        .map(|pair| pair[0].end.distance_to(pair[1].start))
        .sum()
}
