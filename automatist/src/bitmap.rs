//! `bitmap`
//!
//! Placing an image on the bed and turning it into a two-colour bitmap for tracing.

use std::io::{self, Write};

use image::{imageops, imageops::FilterType, DynamicImage, GrayImage, Luma};

use crate::{
    error::ConfigurationError,
    geometry::{BedSize, BitmapSize},
    settings::PlanSettings,
};

/// Luma of an ink pixel.
pub const INK: u8 = 0;
/// Luma of a background pixel.
pub const BACKGROUND: u8 = 255;

/// The longest side an image is given when it is first placed, in mm.
const MAX_FIT_MM: f64 = 100.0;
/// The share of the bed an image may cover when it is first placed.
const MAX_FIT_SHARE: f64 = 0.8;

/// Where an image sits on the bed, in mm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    /// Horizontal offset of the image centre from the bed centre.
    pub x_mm: f64,
    /// Vertical offset of the image centre from the bed centre.
    pub y_mm: f64,
    /// Width of the image.
    pub width_mm: f64,
    /// Height of the image.
    pub height_mm: f64,
}

impl Placement {
    /// Places an image in the middle of the bed, keeping its aspect ratio.
    ///
    /// # Arguments
    /// * `width_px`: Width of the image.
    /// * `height_px`: Height of the image.
    /// * `bed`: Size of the bed.
    ///
    /// # Returns
    /// A centred placement whose longest side is `min(0.8 × bed, 100)` mm.
    pub fn fit(width_px: u32, height_px: u32, bed: BedSize) -> Self {
        let ratio = f64::from(width_px.max(1)) / f64::from(height_px.max(1));
        let (width_mm, height_mm) = if ratio > 1.0 {
            let width_mm = (bed.width * MAX_FIT_SHARE).min(MAX_FIT_MM);
            (width_mm, width_mm / ratio)
        } else {
            let height_mm = (bed.height * MAX_FIT_SHARE).min(MAX_FIT_MM);
            (height_mm * ratio, height_mm)
        };

        Self {
            x_mm: 0.0,
            y_mm: 0.0,
            width_mm,
            height_mm,
        }
    }

    /// Gets the top left corner of the placement, measured from the top left of the bed.
    pub fn origin(&self, bed: BedSize) -> (f64, f64) {
        (
            self.x_mm + bed.width / 2.0 - self.width_mm / 2.0,
            self.y_mm + bed.height / 2.0 - self.height_mm / 2.0,
        )
    }
}

/// A two-colour bitmap. Ink pixels are black.
#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    /// The pixels, each either [`INK`] or [`BACKGROUND`].
    pixels: GrayImage,
}

impl Bitmap {
    /// Creates a bitmap from greyscale pixels, treating anything darker than the threshold as ink.
    ///
    /// # Arguments
    /// * `image`: The greyscale image.
    /// * `threshold`: Pixels with luma below this are ink.
    ///
    /// # Returns
    /// A new [`Bitmap`].
    pub fn from_luma(mut image: GrayImage, threshold: u8) -> Self {
        for Luma([luma]) in image.pixels_mut() {
            *luma = if *luma < threshold { INK } else { BACKGROUND };
        }
        Self { pixels: image }
    }

    /// Gets the size of the bitmap.
    pub fn size(&self) -> BitmapSize {
        BitmapSize::new(self.pixels.width(), self.pixels.height())
    }

    /// Whether the pixel at `(x, y)` is ink. Pixels outside the bitmap are not.
    pub fn is_ink(&self, x: u32, y: u32) -> bool {
        self.pixels
            .get_pixel_checked(x, y)
            .is_some_and(|Luma([luma])| *luma == INK)
    }

    /// Counts the ink pixels.
    pub fn ink_count(&self) -> usize {
        self.pixels.pixels().filter(|Luma([luma])| *luma == INK).count()
    }

    /// Gets the pixels as an image.
    pub fn image(&self) -> &GrayImage {
        &self.pixels
    }

    /// Writes the bitmap as a binary PBM (`P4`), where a set bit is ink.
    ///
    /// # Arguments
    /// * `writer`: Where to write.
    ///
    /// # Errors
    /// Any error from the writer.
    pub fn write_pbm(&self, writer: &mut impl Write) -> io::Result<()> {
        let (width, height) = self.pixels.dimensions();
        write!(writer, "P4\n{width} {height}\n")?;

        for row in self.pixels.rows() {
            // Each row is padded to a whole byte.
            let mut packed = vec![0u8; (width as usize).div_ceil(8)];
            for (x, Luma([luma])) in row.enumerate() {
                if *luma == INK {
                    packed[x / 8] |= 0x80 >> (x % 8);
                }
            }
            writer.write_all(&packed)?;
        }

        Ok(())
    }

    /// Clears a border of the given width on every side.
    fn clear_margin(&mut self, margin: u32) {
        let (width, height) = self.pixels.dimensions();
        let right = width.saturating_sub(margin);
        let bottom = height.saturating_sub(margin);
        for (x, y, Luma([luma])) in self.pixels.enumerate_pixels_mut() {
            if x < margin || y < margin || x >= right || y >= bottom {
                *luma = BACKGROUND;
            }
        }
    }
}

/// Rasterises a placed image onto the bed, ready for tracing.
///
/// This is [`convert_image`] followed by [`place_on_bed`].
///
/// # Arguments
/// * `image`: The image selected by the operator.
/// * `placement`: Where the image sits on the bed.
/// * `settings`: The plan settings: bed size, resolution, threshold and safety margin.
///
/// # Returns
/// A bitmap the size of the bed at `pixels_per_mm`, with ink where the image is dark
/// and nothing within the safety margin.
///
/// # Errors
/// [`ConfigurationError`] if the settings are unusable or the placement covers no pixels.
pub fn prepare_bitmap(
    image: &DynamicImage,
    placement: &Placement,
    settings: &PlanSettings,
) -> Result<Bitmap, ConfigurationError> {
    let ink = convert_image(image, placement, settings)?;
    place_on_bed(&ink, placement, settings)
}

/// Resizes an image to its placement and thresholds it.
///
/// # Arguments
/// * `image`: The image selected by the operator.
/// * `placement`: Where the image sits on the bed. Only the size is used.
/// * `settings`: The plan settings.
///
/// # Returns
/// A bitmap of the image alone, at `pixels_per_mm`.
///
/// # Errors
/// [`ConfigurationError`] if the settings are unusable or the image would have no pixels.
pub fn convert_image(
    image: &DynamicImage,
    placement: &Placement,
    settings: &PlanSettings,
) -> Result<Bitmap, ConfigurationError> {
    settings.validate()?;
    let width = mm_to_px(placement.width_mm, settings.pixels_per_mm);
    let height = mm_to_px(placement.height_mm, settings.pixels_per_mm);
    if width == 0 || height == 0 {
        return Err(ConfigurationError::EmptyPlacement {
            pixels_per_mm: settings.pixels_per_mm,
        });
    }

    let resized = imageops::resize(&image.to_luma8(), width, height, FilterType::CatmullRom);
    Ok(Bitmap::from_luma(resized, settings.threshold))
}

/// Pastes a converted image onto a blank bed and clears the safety margin.
///
/// # Arguments
/// * `ink`: The converted image.
/// * `placement`: Where the image sits on the bed.
/// * `settings`: The plan settings.
///
/// # Returns
/// A bitmap the size of the bed.
///
/// # Errors
/// [`ConfigurationError`] if the settings are unusable or the bed would have no pixels.
#[allow(clippy::cast_possible_truncation)]
pub fn place_on_bed(
    ink: &Bitmap,
    placement: &Placement,
    settings: &PlanSettings,
) -> Result<Bitmap, ConfigurationError> {
    settings.validate()?;
    let pixels_per_mm = settings.pixels_per_mm;
    let bed = settings.bed();
    let width = mm_to_px(bed.width, pixels_per_mm);
    let height = mm_to_px(bed.height, pixels_per_mm);
    if width == 0 || height == 0 {
        return Err(ConfigurationError::EmptyPlacement { pixels_per_mm });
    }

    let mut canvas = GrayImage::from_pixel(width, height, Luma([BACKGROUND]));
    let (left_mm, top_mm) = placement.origin(bed);
    imageops::overlay(
        &mut canvas,
        ink.image(),
        (left_mm * pixels_per_mm) as i64,
        (top_mm * pixels_per_mm) as i64,
    );

    let mut bitmap = Bitmap { pixels: canvas };
    bitmap.clear_margin(mm_to_px(settings.safety_margin_mm, pixels_per_mm));

    log::debug!(
        "placed {width}x{height} bitmap with {} ink pixels",
        bitmap.ink_count()
    );

    Ok(bitmap)
}

/// Converts a length in mm to whole pixels, rounding down. Negative lengths are 0.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn mm_to_px(mm: f64, pixels_per_mm: f64) -> u32 {
    (mm * pixels_per_mm) as u32
}
