//! `potrace`
//!
//! Raster tracing with the `potrace` executable.

use std::{ffi::OsString, io::Write, path::Path};

use serde::{Deserialize, Serialize};

use super::{run, svg_to_raw_paths, InkFilter, Vectorizer};
use crate::{bitmap::Bitmap, error::TraceError, normalize::RawPath};

/// Options for the potrace backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Potrace {
    /// The executable to run.
    pub program: String,
    /// Specks of ink up to this many pixels are ignored.
    pub turd_size: u32,
    /// How round corners may be. 0 gives a polygon, above 1.33 there are no corners.
    pub alpha_max: f64,
    /// How far simplified curves may stray from the original.
    pub opt_tolerance: f64,
}

impl Default for Potrace {
    fn default() -> Self {
        Self {
            program: "potrace".to_string(),
            turd_size: 2,
            alpha_max: 1.0,
            opt_tolerance: 0.2,
        }
    }
}

impl Potrace {
    /// Builds the command line that traces `input` to SVG on stdout.
    fn arguments(&self, input: &Path) -> Vec<OsString> {
        let mut arguments: Vec<OsString> = [
            "--svg".to_string(),
            "--output".to_string(),
            "-".to_string(),
            "--turdsize".to_string(),
            self.turd_size.to_string(),
            "--alphamax".to_string(),
            self.alpha_max.to_string(),
            "--opttolerance".to_string(),
            self.opt_tolerance.to_string(),
        ]
        .into_iter()
        .map(OsString::from)
        .collect();
        arguments.push(input.as_os_str().to_owned());
        arguments
    }
}

impl Vectorizer for Potrace {
    fn vectorize(&self, bitmap: &Bitmap) -> Result<Vec<RawPath>, TraceError> {
        let mut input = tempfile::Builder::new()
            .prefix("automatist")
            .suffix(".pbm")
            .tempfile()?;
        bitmap.write_pbm(&mut input)?;
        input.flush()?;

        let svg = run(&self.program, self.arguments(input.path()))?;
        svg_to_raw_paths(&svg, bitmap.size(), InkFilter::AnyFill)
    }
}

#[cfg(test)]
mod tests {
    use image::GrayImage;

    use super::*;

    #[test]
    fn test_arguments() {
        let potrace = Potrace {
            turd_size: 5,
            ..Potrace::default()
        };
        let arguments = potrace.arguments(Path::new("/tmp/in.pbm"));
        assert_eq!(
            arguments,
            [
                "--svg",
                "--output",
                "-",
                "--turdsize",
                "5",
                "--alphamax",
                "1",
                "--opttolerance",
                "0.2",
                "/tmp/in.pbm"
            ]
            .map(OsString::from)
        );
    }

    #[test]
    fn test_missing_executable() {
        let potrace = Potrace {
            program: "automatist-missing-potrace".to_string(),
            ..Potrace::default()
        };
        let bitmap = Bitmap::from_luma(GrayImage::new(4, 4), 127);

        assert!(matches!(
            potrace.vectorize(&bitmap),
            Err(TraceError::Spawn { program, .. }) if program == "automatist-missing-potrace"
        ));
    }
}
