//! `job`
//!
//! Streaming a motion program to the device, chunk by chunk, on a background thread.

use std::{
    ops::Range,
    sync::mpsc::{self, TryRecvError},
    thread,
    time::{Duration, Instant},
};

use ascii::AsciiString;

use super::link::Link;
use crate::{
    error::{JobError, ProtocolError},
    status::{format_eta, Severity, StatusUpdate},
};

/// Instructions from the session to a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    /// Stop the machine now and close the link.
    EmergencyStop,
}

/// How far through a job we are, sent after every chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobProgress {
    /// Chunks done so far.
    pub completed_chunks: usize,
    /// Chunks in the job.
    pub total_chunks: usize,
    /// Time since the job started.
    pub elapsed: Duration,
    /// Completed fraction per second so far. 0 until it can be measured.
    pub rate: f64,
    /// Estimated time until the job finishes.
    pub eta: Duration,
}

impl JobProgress {
    /// Works out the progress after a number of chunks.
    ///
    /// # Arguments
    /// * `completed_chunks`: Chunks done so far.
    /// * `total_chunks`: Chunks in the job.
    /// * `elapsed`: Time since the job started.
    ///
    /// # Returns
    /// The progress, with the ETA extrapolated from the rate so far.
    #[allow(clippy::cast_precision_loss)]
    pub fn new(completed_chunks: usize, total_chunks: usize, elapsed: Duration) -> Self {
        let fraction = completed_chunks as f64 / total_chunks.max(1) as f64;
        let rate = fraction / elapsed.as_secs_f64();
        let eta = Duration::try_from_secs_f64((1.0 - fraction) / rate).unwrap_or_default();

        Self {
            completed_chunks,
            total_chunks,
            elapsed,
            rate: if rate.is_finite() { rate } else { 0.0 },
            eta,
        }
    }

    /// Gets the completed fraction, 0 to 1.
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> f64 {
        self.completed_chunks as f64 / self.total_chunks.max(1) as f64
    }

    /// Gets the completed percentage, 0 to 100, rounded down.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn percentage(&self) -> u8 {
        (self.fraction() * 100.0).floor().clamp(0.0, 100.0) as u8
    }

    /// Gets the progress as a status update.
    pub fn to_status(&self) -> StatusUpdate {
        let severity = if self.completed_chunks >= self.total_chunks {
            Severity::Ok
        } else {
            Severity::Warn
        };

        StatusUpdate::Progress {
            fraction: self.fraction(),
            percentage: self.percentage(),
            elapsed: self.elapsed,
            rate: self.rate,
            eta: format_eta(self.eta),
            severity,
        }
    }
}

/// What a finished job did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSummary {
    /// Instructions sent and acknowledged.
    pub instructions: usize,
    /// Chunks the program was split into.
    pub chunks: usize,
    /// How long the job took.
    pub elapsed: Duration,
}

/// Sent back by the job thread when it finishes.
#[derive(Debug)]
pub(crate) struct JobReport {
    /// The link, unless the job closed it.
    pub(crate) link: Option<Link>,
    /// How the job ended.
    pub(crate) outcome: Result<JobSummary, JobError>,
}

/// Everything the job thread needs, fixed when the job starts.
#[derive(Debug)]
pub(crate) struct MotionJob {
    /// The instruction lines.
    pub(crate) lines: Vec<AsciiString>,
    /// Ranges of `lines`, one per chunk.
    pub(crate) chunks: Vec<Range<usize>>,
    /// Asks whether the device is ready.
    pub(crate) status_query: AsciiString,
    /// Found in the status response when the device is ready.
    pub(crate) ready_token: String,
    /// Sent back for each accepted instruction.
    pub(crate) acknowledgment: String,
    /// Stops the machine.
    pub(crate) emergency_stop: AsciiString,
    /// How long to wait for the status response.
    pub(crate) handshake_timeout: Duration,
    /// How long to wait for each acknowledgment.
    pub(crate) acknowledgment_timeout: Duration,
    /// How long to wait after an emergency stop before closing the link.
    pub(crate) settle_delay: Duration,
}

/// Splits `count` lines into `chunk_count` contiguous chunks, as evenly as possible.
///
/// The first `count % chunk_count` chunks have one more line than the rest. When there
/// are fewer lines than chunks, the trailing chunks are empty.
///
/// # Arguments
/// * `count`: How many lines there are.
/// * `chunk_count`: How many chunks to make. 0 is treated as 1.
///
/// # Returns
/// One range of line indices per chunk, in order, together covering `0..count`.
pub fn partition_chunks(count: usize, chunk_count: usize) -> Vec<Range<usize>> {
    let chunk_count = chunk_count.max(1);
    let length = count / chunk_count;
    let longer = count % chunk_count;

    let mut start = 0;
    (0..chunk_count)
        .map(|index| {
            let end = start + length + usize::from(index < longer);
            let chunk = start..end;
            start = end;
            chunk
        })
        .collect()
}

/// Why the job stopped early.
enum Interrupted {
    /// The device broke protocol.
    Protocol(ProtocolError),
    /// An emergency stop was requested.
    Stop,
}

impl From<ProtocolError> for Interrupted {
    fn from(err: ProtocolError) -> Self {
        Interrupted::Protocol(err)
    }
}

impl From<std::io::Error> for Interrupted {
    fn from(err: std::io::Error) -> Self {
        Interrupted::Protocol(err.into())
    }
}

/// Runs a job to completion. This is the body of the job thread.
///
/// # Arguments
/// * `link`: The link to the device.
/// * `job`: What to send.
/// * `control`: Where emergency stops arrive. If the sender goes away, that is also
///   treated as an emergency stop.
/// * `progress`: Where progress is sent after each chunk.
///
/// # Returns
/// The report for the session: the link if it is still open, and the outcome.
pub(crate) fn run_job(
    mut link: Link,
    job: &MotionJob,
    control: &mpsc::Receiver<Control>,
    progress: &mpsc::Sender<JobProgress>,
) -> JobReport {
    let started = Instant::now();
    let stop_requested = || {
        matches!(
            control.try_recv(),
            Ok(Control::EmergencyStop) | Err(TryRecvError::Disconnected)
        )
    };

    match stream(&mut link, job, started, &stop_requested, progress) {
        Ok(summary) => {
            log::info!(
                "job finished: {} instructions in {:?}",
                summary.instructions,
                summary.elapsed
            );
            JobReport {
                link: Some(link),
                outcome: Ok(summary),
            }
        }
        Err(Interrupted::Protocol(err)) => {
            log::error!("job aborted: {err}");
            JobReport {
                link: recover_link(link, &err),
                outcome: Err(err.into()),
            }
        }
        Err(Interrupted::Stop) => {
            stop_machine(link, &job.emergency_stop, job.settle_delay);
            JobReport {
                link: None,
                outcome: Err(JobError::UserAbort),
            }
        }
    }
}

/// Gets the link ready for the next job after a protocol error, or closes it if it is dead.
///
/// # Arguments
/// * `link`: The link the job was using.
/// * `err`: Why the job stopped.
///
/// # Returns
/// The link with nothing left to read, or `None` if it has been closed.
fn recover_link(mut link: Link, err: &ProtocolError) -> Option<Link> {
    if matches!(err, ProtocolError::LinkClosed | ProtocolError::Io(_)) {
        log::warn!("closing the link");
        return None;
    }

    // Answers to the rest of the chunk may already be waiting.
    match link.discard_input() {
        Ok(()) => Some(link),
        Err(err) => {
            log::error!("could not clear the link, closing it: {err}");
            None
        }
    }
}

/// Sends the emergency stop, waits for the machine to settle, and closes the link.
///
/// # Arguments
/// * `link`: The link to close.
/// * `command`: The emergency stop command.
/// * `settle_delay`: How long to wait before closing.
pub(crate) fn stop_machine(mut link: Link, command: &AsciiString, settle_delay: Duration) {
    log::warn!("emergency stop");
    if let Err(err) = link.send_lines(&[command]) {
        log::error!("could not send emergency stop: {err}");
    }
    thread::sleep(settle_delay);
    drop(link);
}

/// Checks the device is ready, then sends every chunk and waits for it to be acknowledged.
fn stream(
    link: &mut Link,
    job: &MotionJob,
    started: Instant,
    stop_requested: &dyn Fn() -> bool,
    progress: &mpsc::Sender<JobProgress>,
) -> Result<JobSummary, Interrupted> {
    // Anything unread is left over from before, and would be taken as the answer.
    link.discard_input()?;
    link.send_lines(&[&job.status_query])?;
    let response = link
        .read_line(job.handshake_timeout, stop_requested)?
        .ok_or(Interrupted::Stop)?;
    if !response.contains(&job.ready_token) {
        return Err(ProtocolError::DeviceBusy { response }.into());
    }

    let total_chunks = job.chunks.len();
    for (index, chunk) in job.chunks.iter().enumerate() {
        if stop_requested() {
            return Err(Interrupted::Stop);
        }

        // Chunks are only empty when there are fewer lines than chunks.
        if !chunk.is_empty() {
            link.send_lines(&job.lines[chunk.clone()])?;

            for instruction in chunk.clone() {
                let received = link
                    .read_line(job.acknowledgment_timeout, stop_requested)?
                    .ok_or(Interrupted::Stop)?;
                if received != job.acknowledgment {
                    return Err(ProtocolError::UnexpectedResponse {
                        instruction,
                        expected: job.acknowledgment.clone(),
                        received,
                    }
                    .into());
                }
            }
        }

        // Nobody listening is not a reason to stop the machine.
        let _ = progress.send(JobProgress::new(index + 1, total_chunks, started.elapsed()));
    }

    Ok(JobSummary {
        instructions: job.lines.len(),
        chunks: total_chunks,
        elapsed: started.elapsed(),
    })
}
