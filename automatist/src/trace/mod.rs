//! `trace`
//!
//! Turning a bitmap into raw paths by handing it to an external vectorizer.
//!
//! Every backend produces SVG, which is read back with `usvg` so that the
//! normalizer always sees the same kind of [`RawPath`] whichever backend ran.

use std::{
    ffi::OsStr,
    process::{Command, Stdio},
};

use lyon_algorithms::geom::{euclid::Point2D, QuadraticBezierSegment};
use resvg::usvg;
use serde::{Deserialize, Serialize};

use crate::{
    bitmap::Bitmap,
    error::TraceError,
    geometry::{BitmapSize, PixelPoint},
    normalize::{RawPath, RawSegment},
};

mod potrace;
mod vtracer;

pub use potrace::Potrace;
pub use vtracer::VTracer;

/// Turns a bitmap into paths.
pub trait Vectorizer {
    /// Traces the ink in a bitmap.
    ///
    /// # Arguments
    /// * `bitmap`: The bitmap to trace.
    ///
    /// # Returns
    /// The outlines of the ink, in bitmap pixel space.
    ///
    /// # Errors
    /// [`TraceError`] if the backend could not be run or its output could not be read.
    fn vectorize(&self, bitmap: &Bitmap) -> Result<Vec<RawPath>, TraceError>;
}

/// The available vectorizer backends, with their options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TracerKind {
    /// Raster tracing with potrace.
    Potrace(Potrace),
    /// Colour layer tracing with vtracer.
    #[serde(rename = "vtracer")]
    VTracer(VTracer),
}

impl Default for TracerKind {
    fn default() -> Self {
        TracerKind::Potrace(Potrace::default())
    }
}

impl TracerKind {
    /// Gets the vectorizer for this backend.
    pub fn vectorizer(&self) -> &dyn Vectorizer {
        match self {
            TracerKind::Potrace(potrace) => potrace,
            TracerKind::VTracer(vtracer) => vtracer,
        }
    }
}

/// Which SVG paths count as ink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InkFilter {
    /// Every visible filled path.
    AnyFill,
    /// Visible paths filled with exactly this colour.
    FillColour([u8; 3]),
}

impl InkFilter {
    /// Whether a path is ink.
    fn matches(self, path: &usvg::Path) -> bool {
        if !path.is_visible() {
            return false;
        }

        match (self, path.fill().map(usvg::Fill::paint)) {
            (InkFilter::AnyFill, Some(_)) => true,
            (InkFilter::FillColour(colour), Some(usvg::Paint::Color(fill))) => {
                [fill.red, fill.green, fill.blue] == colour
            }
            _ => false,
        }
    }
}

/// Runs a vectorizer executable to completion.
///
/// # Arguments
/// * `program`: The executable.
/// * `args`: Its arguments.
///
/// # Returns
/// What it wrote to stdout.
///
/// # Errors
/// [`TraceError::Spawn`] if it could not be started, [`TraceError::Failed`] if it
/// exited unsuccessfully.
pub(crate) fn run<I, S>(program: &str, args: I) -> Result<Vec<u8>, TraceError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command.args(args).stdin(Stdio::null());
    log::debug!("running {command:?}");

    let output = command.output().map_err(|source| TraceError::Spawn {
        program: program.to_string(),
        source,
    })?;

    if !output.status.success() {
        return Err(TraceError::Failed {
            program: program.to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output.stdout)
}

/// Reads the ink paths out of an SVG document.
///
/// # Arguments
/// * `bytes`: The SVG document.
/// * `bitmap_size`: Size of the bitmap that was traced. The document is scaled so its
///   width matches.
/// * `filter`: Which paths are ink.
///
/// # Returns
/// The ink paths, in bitmap pixel space, in document order.
///
/// # Errors
/// [`TraceError::Svg`] if the document cannot be parsed.
pub fn svg_to_raw_paths(
    bytes: &[u8],
    bitmap_size: BitmapSize,
    filter: InkFilter,
) -> Result<Vec<RawPath>, TraceError> {
    let tree = usvg::Tree::from_data(bytes, &usvg::Options::default())?;
    let scale = f64::from(bitmap_size.width) / f64::from(tree.size().width());

    let mut paths = vec![];
    collect_paths(tree.root(), filter, scale, &mut paths);
    log::debug!("read {} paths from vectorizer output", paths.len());

    Ok(paths)
}

/// Collects the ink paths of a group and everything inside it.
fn collect_paths(group: &usvg::Group, filter: InkFilter, scale: f64, paths: &mut Vec<RawPath>) {
    for child in group.children() {
        match child {
            usvg::Node::Group(child_group) => collect_paths(child_group, filter, scale, paths),
            usvg::Node::Path(path) if filter.matches(path) => {
                if let Some(data) = path.data().clone().transform(path.abs_transform()) {
                    convert_path_data(&data, scale, paths);
                }
            }
            usvg::Node::Path(_) | usvg::Node::Image(_) | usvg::Node::Text(_) => {}
        }
    }
}

/// Converts path data into raw paths, one per subpath.
fn convert_path_data(data: &usvg::tiny_skia_path::Path, scale: f64, paths: &mut Vec<RawPath>) {
    use usvg::tiny_skia_path::PathSegment;

    let to_pixels = |point: usvg::tiny_skia_path::Point| {
        PixelPoint::new(f64::from(point.x) * scale, f64::from(point.y) * scale)
    };

    let mut current: Option<RawPath> = None;
    for segment in data.segments() {
        match segment {
            PathSegment::MoveTo(point) => {
                finish_path(current.take(), paths);
                current = Some(RawPath::new(to_pixels(point)));
            }
            PathSegment::LineTo(point) => {
                if let Some(path) = current.as_mut() {
                    let from = path.current_point();
                    path.segments.push(RawSegment::line(from, to_pixels(point)));
                }
            }
            PathSegment::QuadTo(control, end) => {
                if let Some(path) = current.as_mut() {
                    let cubic = QuadraticBezierSegment {
                        from: path.current_point().to_untyped(),
                        ctrl: to_pixels(control).to_untyped(),
                        to: to_pixels(end).to_untyped(),
                    }
                    .to_cubic();
                    path.segments.push(RawSegment::Smooth {
                        control1: Point2D::from_untyped(cubic.ctrl1),
                        control2: Point2D::from_untyped(cubic.ctrl2),
                        end: Point2D::from_untyped(cubic.to),
                    });
                }
            }
            PathSegment::CubicTo(control1, control2, end) => {
                if let Some(path) = current.as_mut() {
                    path.segments.push(RawSegment::Smooth {
                        control1: to_pixels(control1),
                        control2: to_pixels(control2),
                        end: to_pixels(end),
                    });
                }
            }
            PathSegment::Close => {
                if let Some(path) = current.as_mut() {
                    let from = path.current_point();
                    if from != path.start {
                        path.segments.push(RawSegment::line(from, path.start));
                    }
                }
            }
        }
    }
    finish_path(current, paths);
}

/// Keeps a finished subpath, unless it has nothing to draw.
fn finish_path(path: Option<RawPath>, paths: &mut Vec<RawPath>) {
    if let Some(path) = path.filter(|path| !path.segments.is_empty()) {
        paths.push(path);
    }
}
