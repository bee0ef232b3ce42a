//! `status`
//!
//! Status updates for whoever is watching: a window, a terminal or a log.

use std::time::Duration;

/// How good or bad a status is. Each severity has a colour for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Everything is fine.
    Ok,
    /// Something is in progress or needs attention.
    Warn,
    /// Something failed.
    Error,
    /// Nothing to report either way.
    Neutral,
}

impl Severity {
    /// Gets the colour to display this severity in.
    ///
    /// # Returns
    /// An `[r, g, b]` colour.
    pub fn colour(self) -> [u8; 3] {
        match self {
            Severity::Ok => [0x27, 0xae, 0x60],
            Severity::Warn => [0xf1, 0xc4, 0x0f],
            Severity::Error => [0xe7, 0x4c, 0x3c],
            Severity::Neutral => [0x7f, 0x8c, 0x8d],
        }
    }
}

/// A single status change.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    /// Where plan creation has got to.
    Plan {
        /// e.g. `(4/7) Tracing...` or `Yes`.
        label: String,
        /// How it is going.
        severity: Severity,
    },
    /// The state of the link to the device.
    Link {
        /// e.g. `Connected`.
        label: String,
        /// How it is going.
        severity: Severity,
    },
    /// How far through a job we are.
    Progress {
        /// Completed fraction, 0 to 1.
        fraction: f64,
        /// Completed percentage, 0 to 100.
        percentage: u8,
        /// Time since the job started.
        elapsed: Duration,
        /// Completed fraction per second so far.
        rate: f64,
        /// Estimated time left, formatted for display.
        eta: String,
        /// How it is going.
        severity: Severity,
    },
}

impl StatusUpdate {
    /// Creates a plan status update.
    pub(crate) fn plan(label: impl Into<String>, severity: Severity) -> Self {
        StatusUpdate::Plan {
            label: label.into(),
            severity,
        }
    }

    /// Creates a link status update.
    pub(crate) fn link(label: impl Into<String>, severity: Severity) -> Self {
        StatusUpdate::Link {
            label: label.into(),
            severity,
        }
    }

    /// Gets the severity of the update.
    pub fn severity(&self) -> Severity {
        match self {
            StatusUpdate::Plan { severity, .. }
            | StatusUpdate::Link { severity, .. }
            | StatusUpdate::Progress { severity, .. } => *severity,
        }
    }
}

/// Receives status updates.
pub trait StatusSink {
    /// Handles a status update.
    ///
    /// # Arguments
    /// * `update`: The update.
    fn update(&mut self, update: StatusUpdate);
}

impl StatusSink for Vec<StatusUpdate> {
    fn update(&mut self, update: StatusUpdate) {
        self.push(update);
    }
}

/// Writes status updates to the log.
#[derive(Debug, Default)]
pub struct LogSink;

impl StatusSink for LogSink {
    fn update(&mut self, update: StatusUpdate) {
        let level = match update.severity() {
            Severity::Error => log::Level::Error,
            Severity::Warn => log::Level::Warn,
            Severity::Ok | Severity::Neutral => log::Level::Info,
        };

        match update {
            StatusUpdate::Plan { label, .. } => log::log!(level, "plan: {label}"),
            StatusUpdate::Link { label, .. } => log::log!(level, "device: {label}"),
            StatusUpdate::Progress {
                percentage,
                elapsed,
                eta,
                ..
            } => log::log!(
                level,
                "progress: {percentage}% after {} (eta {eta})",
                format_eta(elapsed)
            ),
        }
    }
}

/// Formats a duration as hours, minutes and seconds.
///
/// # Arguments
/// * `duration`: The duration to format.
///
/// # Returns
/// e.g. `1h 2m 3s`.
pub fn format_eta(duration: Duration) -> String {
    let seconds = duration.as_secs();
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    format!("{h}h {m}m {s}s")
}
