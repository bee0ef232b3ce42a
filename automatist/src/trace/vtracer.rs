//! `vtracer`
//!
//! Colour layer tracing with the `vtracer` executable.

use std::{ffi::OsString, fs, path::Path};

use serde::{Deserialize, Serialize};

use super::{run, svg_to_raw_paths, InkFilter, Vectorizer};
use crate::{
    bitmap::{Bitmap, INK},
    error::TraceError,
    normalize::RawPath,
};

/// How vtracer fits curves to the outlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurveFitting {
    /// Straight lines only.
    Polygon,
    /// Smooth splines.
    #[default]
    Spline,
}

impl CurveFitting {
    /// The value vtracer expects on its command line.
    fn as_arg(self) -> &'static str {
        match self {
            CurveFitting::Polygon => "polygon",
            CurveFitting::Spline => "spline",
        }
    }
}

/// Options for the vtracer backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VTracer {
    /// The executable to run.
    pub program: String,
    /// Patches of ink up to this many pixels are ignored.
    pub filter_speckle: u32,
    /// Smallest angle, in degrees, that is kept as a corner.
    pub corner_threshold: u32,
    /// How curves are fitted.
    pub mode: CurveFitting,
}

impl Default for VTracer {
    fn default() -> Self {
        Self {
            program: "vtracer".to_string(),
            filter_speckle: 4,
            corner_threshold: 60,
            mode: CurveFitting::default(),
        }
    }
}

impl VTracer {
    /// Builds the command line that traces `input` into `output`.
    fn arguments(&self, input: &Path, output: &Path) -> Vec<OsString> {
        vec![
            "--input".into(),
            input.as_os_str().to_owned(),
            "--output".into(),
            output.as_os_str().to_owned(),
            "--colormode".into(),
            "bw".into(),
            "--filter_speckle".into(),
            self.filter_speckle.to_string().into(),
            "--corner_threshold".into(),
            self.corner_threshold.to_string().into(),
            "--mode".into(),
            self.mode.as_arg().into(),
        ]
    }
}

impl Vectorizer for VTracer {
    fn vectorize(&self, bitmap: &Bitmap) -> Result<Vec<RawPath>, TraceError> {
        let directory = tempfile::Builder::new().prefix("automatist").tempdir()?;
        let input = directory.path().join("bitmap.png");
        let output = directory.path().join("traced.svg");
        bitmap.image().save(&input)?;

        run(&self.program, self.arguments(&input, &output))?;

        let svg = fs::read(&output)?;
        svg_to_raw_paths(&svg, bitmap.size(), InkFilter::FillColour([INK; 3]))
    }
}

#[cfg(test)]
mod tests {
    use image::GrayImage;

    use super::*;

    #[test]
    fn test_arguments() {
        let vtracer = VTracer {
            mode: CurveFitting::Polygon,
            ..VTracer::default()
        };
        let arguments = vtracer.arguments(Path::new("in.png"), Path::new("out.svg"));
        assert_eq!(
            arguments,
            [
                "--input",
                "in.png",
                "--output",
                "out.svg",
                "--colormode",
                "bw",
                "--filter_speckle",
                "4",
                "--corner_threshold",
                "60",
                "--mode",
                "polygon"
            ]
            .map(OsString::from)
        );
    }

    #[test]
    fn test_missing_executable() {
        let vtracer = VTracer {
            program: "automatist-missing-vtracer".to_string(),
            ..VTracer::default()
        };
        let bitmap = Bitmap::from_luma(GrayImage::new(4, 4), 127);

        assert!(matches!(
            vtracer.vectorize(&bitmap),
            Err(TraceError::Spawn { .. })
        ));
    }
}
