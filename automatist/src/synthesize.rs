//! `synthesize`
//!
//! Generates the motion program for a sequence of curves.

use crate::{
    error::ConfigurationError,
    gcode::Instruction,
    geometry::{
        BedSize, BitmapSize, MachinePoint, MachineVector, PixelCurve, PlanScale,
        ARC_LENGTH_SAMPLES,
    },
    program::MotionProgram,
    settings::PlanSettings,
};

/// An immutable snapshot of everything needed to turn curves into motion.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanConfiguration {
    /// Size of the bed, in mm.
    pub bed: BedSize,
    /// Offset of the pen tip from the tool head, in mm. Subtracted from every position.
    pub pen_offset: MachineVector,
    /// Pen height while travelling, in mm.
    pub pen_up: f64,
    /// Pen height while drawing, in mm.
    pub pen_down: f64,
    /// Height of the parking position, in mm.
    pub park_height: f64,
    /// Distance covered per interpolation step, in mm.
    pub sampling_resolution: f64,
    /// Feed rate for pen-up moves, in mm/min.
    pub rapid_feed_rate: u32,
    /// Feed rate for pen-down moves, in mm/min.
    pub draw_feed_rate: u32,
    /// Size of the bitmap the curves were traced from, in pixels.
    pub bitmap_size: BitmapSize,
}

impl PlanConfiguration {
    /// Takes a snapshot of the plan settings for a traced bitmap.
    ///
    /// # Arguments
    /// * `settings`: The plan settings.
    /// * `bitmap_size`: Size of the traced bitmap.
    ///
    /// # Returns
    /// The configuration.
    ///
    /// # Errors
    /// If any setting is unusable, or the bitmap is empty.
    pub fn new(settings: &PlanSettings, bitmap_size: BitmapSize) -> Result<Self, ConfigurationError> {
        settings.validate()?;
        if bitmap_size.width == 0 || bitmap_size.height == 0 {
            return Err(ConfigurationError::EmptyPlacement {
                pixels_per_mm: settings.pixels_per_mm,
            });
        }

        Ok(Self {
            bed: settings.bed(),
            pen_offset: settings.pen_offset(),
            pen_up: settings.pen_up_mm,
            pen_down: settings.pen_down_mm,
            park_height: settings.park_height_mm,
            sampling_resolution: settings.sampling_resolution_mm,
            rapid_feed_rate: settings.rapid_feed_rate,
            draw_feed_rate: settings.draw_feed_rate,
            bitmap_size,
        })
    }

    /// Gets the scale from bitmap pixels to bed mm.
    pub fn scale(&self) -> PlanScale {
        PlanScale::between(self.bed, self.bitmap_size)
    }

    /// Gets the parking position: above the centre of the bed.
    pub fn park_position(&self) -> MachinePoint {
        MachinePoint::new(self.bed.width / 2.0, self.bed.height / 2.0)
    }
}

/// Works out how many interpolation steps to draw a curve of the given length with.
///
/// # Arguments
/// * `arc_length`: Length of the curve, in mm.
/// * `sampling_resolution`: Distance per step, in mm.
///
/// # Returns
/// `floor(arc_length / sampling_resolution)`, at least 1.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn step_count(arc_length: f64, sampling_resolution: f64) -> usize {
    // Float to int casts saturate, and NaN becomes 0.
    ((arc_length / sampling_resolution).floor() as usize).max(1)
}

/// Generates the motion program that draws the curves in order.
///
/// Consecutive curves that meet exactly (after scaling and pen offset) are drawn
/// without lifting the pen, and their shared point is drawn once.
///
/// # Arguments
/// * `curves`: The curves, in drawing order, in bitmap pixel space.
/// * `configuration`: The plan configuration.
///
/// # Returns
/// The motion program.
#[allow(clippy::float_cmp, clippy::cast_precision_loss)]
pub fn synthesize(curves: &[PixelCurve], configuration: &PlanConfiguration) -> MotionProgram {
    let scale = configuration.scale();
    let offset = configuration.pen_offset;
    let park = Instruction::Rapid {
        position: configuration.park_position(),
        z: configuration.park_height,
    };

    let mut instructions = vec![
        Instruction::Millimetres,
        Instruction::AbsolutePositioning,
        Instruction::Home,
        Instruction::RapidFeedRate(configuration.rapid_feed_rate),
        Instruction::DrawFeedRate(configuration.draw_feed_rate),
        park.clone(),
    ];

    let machine_curves: Vec<_> = curves.iter().map(|curve| curve.to_machine(&scale)).collect();

    // Whether the previous curve ended exactly where this one starts.
    let mut continuous = false;
    for (index, curve) in machine_curves.iter().enumerate() {
        let steps = step_count(
            curve.arc_length(ARC_LENGTH_SAMPLES),
            configuration.sampling_resolution,
        );
        let start = curve.start - offset;
        let end = curve.end - offset;

        if !continuous {
            instructions.push(Instruction::Rapid {
                position: start,
                z: configuration.pen_up,
            });
        }

        // The first sample of a continuation was the last sample of the previous curve.
        let first_step = usize::from(continuous);
        for step in first_step..=steps {
            instructions.push(Instruction::Draw {
                position: curve.point_at(step as f64 / steps as f64) - offset,
                z: configuration.pen_down,
            });
        }

        continuous = machine_curves
            .get(index + 1)
            .is_some_and(|next| next.start - offset == end);
        if !continuous {
            instructions.push(Instruction::Rapid {
                position: end,
                z: configuration.pen_up,
            });
        }
    }

    instructions.push(park);

    log::debug!(
        "synthesized {} instructions for {} curves",
        instructions.len(),
        curves.len()
    );

    MotionProgram::from_instructions(&instructions)
}
