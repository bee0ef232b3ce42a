//! `preview`
//!
//! Draws planned curves the way the pen will, so the operator can check a plan
//! before sending it.

use image::RgbaImage;
use resvg::tiny_skia::{Color, LineCap, Paint, PathBuilder, Pixmap, Stroke, Transform};

use crate::geometry::{BitmapSize, PixelCurve};

/// Renders curves as black pen strokes on a white page.
///
/// # Arguments
/// * `curves`: The curves, in bitmap pixel space.
/// * `size`: Size of the page, in pixels.
/// * `thickness_px`: Width of the pen stroke, in pixels.
///
/// # Returns
/// The preview, or `None` if a page of that size cannot be drawn.
#[allow(clippy::cast_possible_truncation)]
pub fn render_preview(
    curves: &[PixelCurve],
    size: BitmapSize,
    thickness_px: f64,
) -> Option<RgbaImage> {
    let Some(mut pixmap) = Pixmap::new(size.width, size.height) else {
        log::warn!("cannot draw a {}x{} preview", size.width, size.height);
        return None;
    };
    pixmap.fill(Color::WHITE);

    let mut builder = PathBuilder::new();
    for curve in curves {
        builder.move_to(curve.start.x as f32, curve.start.y as f32);
        builder.cubic_to(
            curve.control1.x as f32,
            curve.control1.y as f32,
            curve.control2.x as f32,
            curve.control2.y as f32,
            curve.end.x as f32,
            curve.end.y as f32,
        );
    }

    // An empty builder has nothing to stroke.
    if let Some(path) = builder.finish() {
        let mut paint = Paint::default();
        paint.set_color(Color::BLACK);
        paint.anti_alias = true;

        let stroke = Stroke {
            width: thickness_px as f32,
            line_cap: LineCap::Round,
            ..Stroke::default()
        };
        pixmap.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
    }

    // Every pixel is opaque, so premultiplied and straight alpha are the same.
    RgbaImage::from_raw(size.width, size.height, pixmap.take())
}
