//! `automatist`
//!
//! Turns raster images into motion programs for a G-code pen plotter, and streams
//! them to the plotter over a serial link.
//!
//! The pipeline runs: image, [`bitmap`], [`trace`], [`normalize`], [`optimize`],
//! [`synthesize`]. [`plan::PlanningSession`] drives it, and [`device::DeviceSession`]
//! sends the result.

pub mod bitmap;
pub mod device;
pub mod error;
pub mod gcode;
pub mod geometry;
pub mod normalize;
pub mod optimize;
pub mod plan;
pub mod preview;
pub mod program;
pub mod settings;
pub mod status;
pub mod synthesize;
pub mod trace;

pub use device::{DeviceSession, SerialConnector, SessionState};
pub use error::{
    ConfigurationError, ConnectionError, JobError, PlanError, ProtocolError, SessionError,
    TraceError,
};
pub use geometry::{BezierCurve, CurveSequence, PixelCurve};
pub use optimize::{OptimizerKind, PathOptimizer};
pub use plan::{Plan, PlanningSession};
pub use program::MotionProgram;
pub use settings::Settings;
pub use status::{LogSink, Severity, StatusSink, StatusUpdate};
pub use trace::{TracerKind, Vectorizer};
