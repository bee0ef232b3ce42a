//! `settings`
//!
//! Everything the operator can configure, persisted as JSON.

use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigurationError,
    geometry::{BedSize, MachineVector},
    optimize::OptimizerKind,
    trace::TracerKind,
};

/// All settings, as saved between uses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// How plans are made.
    pub plan: PlanSettings,
    /// How to talk to the device.
    pub device: DeviceSettings,
    /// How images are vectorized and ordered.
    pub tracer: TracerSettings,
}

impl Settings {
    /// Loads settings from a JSON file. Missing fields take their default values.
    ///
    /// # Arguments
    /// * `path`: The settings file.
    ///
    /// # Returns
    /// The loaded settings.
    ///
    /// # Errors
    /// If the file cannot be read or is not valid settings JSON.
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let json_string = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json_string)?)
    }

    /// Saves settings to a JSON file.
    ///
    /// # Arguments
    /// * `path`: Where to save the settings.
    ///
    /// # Errors
    /// If the settings cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), ConfigurationError> {
        let json_string = serde_json::to_string_pretty(self)?;
        fs::write(path, json_string)?;
        Ok(())
    }
}

/// The machine and pen, as far as planning is concerned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanSettings {
    /// Width of the drawable area, in mm.
    pub bed_width_mm: f64,
    /// Height of the drawable area, in mm.
    pub bed_height_mm: f64,
    /// How far the pen tip sits from the tool head origin along X, in mm.
    pub pen_offset_x_mm: f64,
    /// How far the pen tip sits from the tool head origin along Y, in mm.
    pub pen_offset_y_mm: f64,
    /// Pen height while travelling, in mm.
    pub pen_up_mm: f64,
    /// Pen height while drawing, in mm.
    pub pen_down_mm: f64,
    /// Width of the line the pen leaves, in mm. Used for previews.
    pub pen_thickness_mm: f64,
    /// Border around the bed that is never drawn on, in mm.
    pub safety_margin_mm: f64,
    /// Resolution the bed is rasterised at before tracing.
    pub pixels_per_mm: f64,
    /// Pixels darker than this are ink.
    pub threshold: u8,
    /// Height of the parking position above the bed centre, in mm.
    pub park_height_mm: f64,
    /// Feed rate for pen-up moves, in mm/min.
    pub rapid_feed_rate: u32,
    /// Feed rate for pen-down moves, in mm/min.
    pub draw_feed_rate: u32,
    /// Distance covered by each interpolation step while drawing, in mm.
    pub sampling_resolution_mm: f64,
}

impl Default for PlanSettings {
    fn default() -> Self {
        Self {
            bed_width_mm: 200.0,
            bed_height_mm: 150.0,
            pen_offset_x_mm: 0.0,
            pen_offset_y_mm: 0.0,
            pen_up_mm: 2.0,
            pen_down_mm: 1.0,
            pen_thickness_mm: 1.0,
            safety_margin_mm: 10.0,
            pixels_per_mm: 8.0,
            threshold: 127,
            park_height_mm: 150.0,
            rapid_feed_rate: 1200,
            draw_feed_rate: 1000,
            sampling_resolution_mm: 1.0,
        }
    }
}

impl PlanSettings {
    /// Checks that every value can be planned with.
    ///
    /// # Errors
    /// The first field that is not usable.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        require_positive("bed width", self.bed_width_mm)?;
        require_positive("bed height", self.bed_height_mm)?;
        require_finite("pen offset x", self.pen_offset_x_mm)?;
        require_finite("pen offset y", self.pen_offset_y_mm)?;
        require_positive("pen up height", self.pen_up_mm)?;
        require_positive("pen down height", self.pen_down_mm)?;
        require_positive("pen thickness", self.pen_thickness_mm)?;
        require_finite("safety margin", self.safety_margin_mm)?;
        require_positive("pixels per mm", self.pixels_per_mm)?;
        require_positive("park height", self.park_height_mm)?;
        require_positive("rapid feed rate", f64::from(self.rapid_feed_rate))?;
        require_positive("draw feed rate", f64::from(self.draw_feed_rate))?;
        require_positive("sampling resolution", self.sampling_resolution_mm)?;
        Ok(())
    }

    /// Gets the bed size.
    pub fn bed(&self) -> BedSize {
        BedSize::new(self.bed_width_mm, self.bed_height_mm)
    }

    /// Gets the pen offset.
    pub fn pen_offset(&self) -> MachineVector {
        MachineVector::new(self.pen_offset_x_mm, self.pen_offset_y_mm)
    }
}

/// How to reach the device and how it speaks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Path of the serial port.
    pub port: String,
    /// Baud rate of the serial port.
    pub baud_rate: u32,
    /// Sent to ask whether the firmware is ready.
    pub status_query: String,
    /// A status response containing this means ready.
    pub ready_token: String,
    /// The line the device sends for every accepted instruction.
    pub acknowledgment: String,
    /// Sent to stop the machine immediately.
    pub emergency_stop: String,
    /// How many chunks a program is split into.
    pub chunk_count: usize,
    /// How long to wait for the status response, in ms.
    pub handshake_timeout_ms: u64,
    /// How long to wait for each acknowledgment, in ms.
    pub acknowledgment_timeout_ms: u64,
    /// How often a blocked read wakes up to check for cancellation, in ms.
    pub poll_interval_ms: u64,
    /// How long to wait after an emergency stop before closing the link, in ms.
    pub settle_delay_ms: u64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_SERIAL_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            status_query: "G6 P100".to_string(),
            ready_token: "ok".to_string(),
            acknowledgment: "ok".to_string(),
            emergency_stop: "M112".to_string(),
            chunk_count: 100,
            handshake_timeout_ms: 3000,
            acknowledgment_timeout_ms: 3000,
            poll_interval_ms: 100,
            settle_delay_ms: 2000,
        }
    }
}

/// The serial port used when none is configured.
pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyUSB0";
/// The baud rate used when none is configured.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

impl DeviceSettings {
    /// Gets the handshake timeout.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Gets the acknowledgment timeout.
    pub fn acknowledgment_timeout(&self) -> Duration {
        Duration::from_millis(self.acknowledgment_timeout_ms)
    }

    /// Gets the poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Gets the settle delay.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Vectorizer and optimizer selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerSettings {
    /// The vectorizer backend.
    pub backend: TracerKind,
    /// The path optimizer.
    pub optimizer: OptimizerKind,
}

/// Parses a text field as a number.
///
/// # Arguments
/// * `field`: The name of the field, for error reporting.
/// * `value`: What was entered.
///
/// # Returns
/// The number.
///
/// # Errors
/// [`ConfigurationError::NonNumeric`] if the text is not a number.
pub fn parse_field(field: &'static str, value: &str) -> Result<f64, ConfigurationError> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| ConfigurationError::NonNumeric {
            field,
            value: value.to_string(),
        })
}

/// Parses a text field as a positive number.
///
/// # Arguments
/// * `field`: The name of the field, for error reporting.
/// * `value`: What was entered.
///
/// # Returns
/// The number.
///
/// # Errors
/// [`ConfigurationError::NonNumeric`] or [`ConfigurationError::NonPositive`].
pub fn parse_positive_field(field: &'static str, value: &str) -> Result<f64, ConfigurationError> {
    let number = parse_field(field, value)?;
    require_positive(field, number)?;
    Ok(number)
}

/// Checks a value is a finite number greater than zero.
fn require_positive(field: &'static str, value: f64) -> Result<(), ConfigurationError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigurationError::NonPositive { field, value })
    }
}

/// Checks a value is a finite number.
fn require_finite(field: &'static str, value: f64) -> Result<(), ConfigurationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigurationError::NotFinite { field, value })
    }
}
