//! `gcode`
//!
//! The motion instructions the plotter understands.

use std::fmt;

use crate::geometry::MachinePoint;

/// A single motion instruction, rendered as one line of G-code.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// `G21`: coordinates are in mm.
    Millimetres,
    /// `G90`: coordinates are absolute.
    AbsolutePositioning,
    /// `G28`: home (calibrate) all axes.
    Home,
    /// `G0 F..`: the feed rate used by rapid moves, in mm/min.
    RapidFeedRate(u32),
    /// `G1 F..`: the feed rate used by draw moves, in mm/min.
    DrawFeedRate(u32),
    /// `G0 X.. Y.. Z..`: move without drawing.
    Rapid {
        /// Where to move to on the bed.
        position: MachinePoint,
        /// Pen height, in mm.
        z: f64,
    },
    /// `G1 X.. Y.. Z..`: move while drawing.
    Draw {
        /// Where to move to on the bed.
        position: MachinePoint,
        /// Pen height, in mm.
        z: f64,
    },
    /// `M112`: stop everything, now.
    EmergencyStop,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Millimetres => write!(f, "G21"),
            Instruction::AbsolutePositioning => write!(f, "G90"),
            Instruction::Home => write!(f, "G28"),
            Instruction::RapidFeedRate(feed) => write!(f, "G0 F{feed}"),
            Instruction::DrawFeedRate(feed) => write!(f, "G1 F{feed}"),
            Instruction::Rapid { position, z } => write!(
                f,
                "G0 X{} Y{} Z{}",
                Coordinate(position.x),
                Coordinate(position.y),
                Coordinate(*z)
            ),
            Instruction::Draw { position, z } => write!(
                f,
                "G1 X{} Y{} Z{}",
                Coordinate(position.x),
                Coordinate(position.y),
                Coordinate(*z)
            ),
            Instruction::EmergencyStop => write!(f, "M112"),
        }
    }
}

/// Formats a coordinate without quantizing it.
///
/// Uses the shortest representation that reads back as the same value and never
/// prints a negative zero.
struct Coordinate(f64);

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // -0.0 + 0.0 == +0.0
        write!(f, "{}", self.0 + 0.0)
    }
}
