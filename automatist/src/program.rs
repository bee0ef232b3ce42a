//! `program`
//!
//! A motion program: the ordered instruction lines sent to the device.

use std::{fmt, fs, io, path::Path};

use crate::gcode::Instruction;

/// An ordered, immutable list of instruction lines.
///
/// A program is stored as text because that is what goes over the wire, and because
/// programs can be loaded back from `.gcode` files that were not produced here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MotionProgram {
    /// One instruction per entry, without line terminators.
    lines: Vec<String>,
}

impl MotionProgram {
    /// Builds a program from instructions.
    ///
    /// # Arguments
    /// * `instructions`: The instructions, in order.
    ///
    /// # Returns
    /// A new [`MotionProgram`].
    pub fn from_instructions(instructions: &[Instruction]) -> Self {
        Self {
            lines: instructions.iter().map(ToString::to_string).collect(),
        }
    }

    /// Parses a program from text, one instruction per line. Blank lines are skipped.
    ///
    /// # Arguments
    /// * `text`: The program text.
    ///
    /// # Returns
    /// A new [`MotionProgram`].
    pub fn parse(text: &str) -> Self {
        Self {
            lines: text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(ToString::to_string)
                .collect(),
        }
    }

    /// Gets the instruction lines.
    ///
    /// # Returns
    /// The lines, in order.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Gets the number of instructions.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether the program has no instructions.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Writes the program to a file.
    ///
    /// # Arguments
    /// * `path`: Where to write the program.
    ///
    /// # Errors
    /// Any I/O error from writing the file.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        fs::write(path, self.to_string())
    }

    /// Reads a program from a file.
    ///
    /// # Arguments
    /// * `path`: The file to read.
    ///
    /// # Returns
    /// The program in the file.
    ///
    /// # Errors
    /// Any I/O error from reading the file.
    pub fn load(path: &Path) -> io::Result<Self> {
        Ok(Self::parse(&fs::read_to_string(path)?))
    }
}

impl fmt::Display for MotionProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_has_one_instruction_per_line() {
        let program = MotionProgram::from_instructions(&[
            Instruction::Millimetres,
            Instruction::AbsolutePositioning,
            Instruction::Home,
        ]);
        assert_eq!(program.to_string(), "G21\nG90\nG28\n");
        assert_eq!(program.len(), 3);
    }

    #[test]
    fn test_parse_skips_blank_lines() {
        let program = MotionProgram::parse("G21\r\n\n  G90  \n\nG28");
        assert_eq!(program.lines(), ["G21", "G90", "G28"]);
        assert!(MotionProgram::parse("\n\n").is_empty(), "only blank lines");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().expect("could not create temp dir");
        let path = dir.path().join("plan.gcode");
        let program = MotionProgram::parse("G21\nG1 X1.5 Y2 Z1\n");

        program.save(&path).expect("could not save program");
        assert_eq!(
            std::fs::read_to_string(&path).expect("could not read program back"),
            "G21\nG1 X1.5 Y2 Z1\n"
        );
        assert_eq!(MotionProgram::load(&path).expect("could not load"), program);
    }
}
