//! `error`
//!
//! Errors for each stage of the pipeline. Each kind halts only its own stage.

use std::{io, time::Duration};

use thiserror::Error;

/// The plan inputs are missing or make no sense.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// There is no image to plan.
    #[error("no image selected")]
    NoImage,
    /// A field that should hold a number does not.
    #[error("{field} must be a number, got {value:?}")]
    NonNumeric {
        /// Name of the field.
        field: &'static str,
        /// What was entered.
        value: String,
    },
    /// A field that must be positive is zero, negative or not finite.
    #[error("{field} must be positive, got {value}")]
    NonPositive {
        /// Name of the field.
        field: &'static str,
        /// The offending value.
        value: f64,
    },
    /// A field that must be finite is not.
    #[error("{field} must be a finite number, got {value}")]
    NotFinite {
        /// Name of the field.
        field: &'static str,
        /// The offending value.
        value: f64,
    },
    /// The placed image does not cover a single pixel of the bed.
    #[error("the image placement is empty at {pixels_per_mm} pixels per mm")]
    EmptyPlacement {
        /// The resolution the bed is rasterised at.
        pixels_per_mm: f64,
    },
    /// The settings file could not be read or written.
    #[error("settings file: {0}")]
    SettingsIo(#[from] io::Error),
    /// The settings file is not valid.
    #[error("settings file is malformed: {0}")]
    SettingsFormat(#[from] serde_json::Error),
}

/// The external vectorizer failed.
#[derive(Error, Debug)]
pub enum TraceError {
    /// The bitmap could not be handed over to the vectorizer.
    #[error("could not write bitmap for the vectorizer: {0}")]
    Bitmap(#[from] image::ImageError),
    /// Files could not be created or read.
    #[error("vectorizer I/O: {0}")]
    Io(#[from] io::Error),
    /// The vectorizer executable could not be started.
    #[error("could not run {program}: {source}")]
    Spawn {
        /// The executable.
        program: String,
        /// Why it could not be started.
        source: io::Error,
    },
    /// The vectorizer ran but reported failure.
    #[error("{program} failed ({status}): {stderr}")]
    Failed {
        /// The executable.
        program: String,
        /// Its exit status.
        status: std::process::ExitStatus,
        /// What it printed to stderr.
        stderr: String,
    },
    /// The vectorizer output could not be parsed.
    #[error("vectorizer produced invalid SVG: {0}")]
    Svg(#[from] resvg::usvg::Error),
}

/// Creating a plan failed.
#[derive(Error, Debug)]
pub enum PlanError {
    /// The plan inputs are not usable.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// Tracing the image failed.
    #[error(transparent)]
    Trace(#[from] TraceError),
}

/// Opening the link to the device failed.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// The serial port could not be opened.
    #[error("could not open {port}: {source}")]
    Open {
        /// The port that was opened.
        port: String,
        /// Why it failed.
        source: io::Error,
    },
    /// The handshake response could not be read.
    #[error("no handshake response: {0}")]
    Handshake(#[source] ProtocolError),
    /// The device answered, but not like firmware we can drive.
    #[error("invalid device/firmware, status query answered {response:?}")]
    InvalidFirmware {
        /// What the device said.
        response: String,
    },
}

/// The device did not follow the streaming protocol.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The device is not ready to accept a job.
    #[error("device reported busy: {response:?}")]
    DeviceBusy {
        /// What the device said to the status query.
        response: String,
    },
    /// An instruction was answered with something other than the acknowledgment.
    #[error("device reported issue on instruction {instruction}: expected {expected:?}, got {received:?}")]
    UnexpectedResponse {
        /// Index of the instruction in the program.
        instruction: usize,
        /// The acknowledgment that was expected.
        expected: String,
        /// What arrived instead.
        received: String,
    },
    /// Nothing arrived before the timeout.
    #[error("device unresponsive: nothing received within {timeout:?}")]
    Unresponsive {
        /// How long we waited.
        timeout: Duration,
    },
    /// The link was closed by the other end.
    #[error("the device closed the link")]
    LinkClosed,
    /// Reading or writing the link failed.
    #[error("link I/O: {0}")]
    Io(#[from] io::Error),
}

/// A job did not complete.
#[derive(Error, Debug)]
pub enum JobError {
    /// The device broke protocol. The link is still open.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The operator pressed the emergency stop. The link has been closed.
    #[error("emergency stop")]
    UserAbort,
    /// The streaming task went away without reporting.
    #[error("the streaming task stopped unexpectedly")]
    WorkerLost,
}

/// A device session operation was refused or failed.
#[derive(Error, Debug)]
pub enum SessionError {
    /// A job is already streaming.
    #[error("a job is already streaming")]
    AlreadyStreaming,
    /// No job is streaming.
    #[error("no job is streaming")]
    NotStreaming,
    /// The link to the device is not open.
    #[error("connect to the device first")]
    NotConnected,
    /// There is nothing to send.
    #[error("create a plan first")]
    EmptyProgram,
    /// A line of the program cannot be sent over an ASCII link.
    #[error("instruction {instruction} is not ASCII: {line:?}")]
    NonAsciiInstruction {
        /// Index of the instruction in the program.
        instruction: usize,
        /// The offending line.
        line: String,
    },
    /// A device command in the settings cannot be sent over an ASCII link.
    #[error("the {setting} setting is not ASCII: {value:?}")]
    NonAsciiSetting {
        /// Name of the setting.
        setting: &'static str,
        /// The offending value.
        value: String,
    },
    /// The streaming task could not be started.
    #[error("could not start the streaming task: {0}")]
    Spawn(io::Error),
    /// Connecting failed.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}
