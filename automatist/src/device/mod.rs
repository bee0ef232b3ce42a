//! `device`
//!
//! The session with the plotter: connecting, checking the firmware, and streaming
//! motion programs with acknowledgment counting and an emergency stop.

mod job;
mod link;

use std::{
    io::{self, Read, Write},
    sync::mpsc,
    thread,
};

use ascii::{AsciiString, IntoAsciiString};
use serialport::{ClearBuffer, SerialPort};

pub use job::{partition_chunks, JobProgress, JobSummary};
use job::{run_job, stop_machine, Control, JobReport, MotionJob};
use link::{ascii_setting, Link};

use crate::{
    error::{ConnectionError, JobError, ProtocolError, SessionError},
    program::MotionProgram,
    settings::DeviceSettings,
    status::{LogSink, Severity, StatusSink, StatusUpdate},
};

/// A byte channel to the device, usually a serial port.
///
/// Reads should give up with [`io::ErrorKind::TimedOut`] after a short while when there
/// is nothing to read, so a waiting job can notice an emergency stop.
pub trait DeviceChannel: Read + Write + Send {
    /// Throws away anything the device has sent that has not been read yet.
    ///
    /// # Errors
    /// If the channel could not be cleared.
    fn clear_input(&mut self) -> io::Result<()>;
}

impl DeviceChannel for Box<dyn SerialPort> {
    fn clear_input(&mut self) -> io::Result<()> {
        Ok((**self).clear(ClearBuffer::Input)?)
    }
}

/// Opens channels to the device.
pub trait Connector: Send {
    /// Opens a channel.
    ///
    /// # Arguments
    /// * `settings`: Where the device is and how fast it talks.
    ///
    /// # Returns
    /// The open channel.
    ///
    /// # Errors
    /// If the channel could not be opened.
    fn open(&self, settings: &DeviceSettings) -> io::Result<Box<dyn DeviceChannel>>;
}

/// Opens serial ports.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    fn open(&self, settings: &DeviceSettings) -> io::Result<Box<dyn DeviceChannel>> {
        let port = serialport::new(&settings.port, settings.baud_rate)
            .timeout(settings.poll_interval())
            .open()?;
        Ok(Box::new(port))
    }
}

/// Lists the serial ports on this machine.
///
/// # Returns
/// The names of the ports, which can be used as the `port` setting.
///
/// # Errors
/// If the ports could not be listed.
pub fn available_ports() -> io::Result<Vec<String>> {
    Ok(serialport::available_ports()?
        .into_iter()
        .map(|port| port.port_name)
        .collect())
}

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No link to the device.
    Disconnected,
    /// Opening the link and checking the firmware.
    Connecting,
    /// The link is open and the firmware answered as expected.
    Connected,
    /// The link is open but the firmware did not answer as expected.
    /// The link is left open so the operator can look into it.
    InvalidFirmware,
    /// A job is streaming. The link belongs to the job until it finishes.
    Streaming,
}

/// A job running on its own thread.
struct RunningJob {
    /// Where to send an emergency stop.
    control: mpsc::Sender<Control>,
    /// Where progress arrives.
    progress: mpsc::Receiver<JobProgress>,
    /// Where the report arrives when the job is over.
    report: oneshot::Receiver<JobReport>,
    /// The job thread.
    handle: thread::JoinHandle<()>,
    /// Stops the machine if the job finished before it saw an emergency stop.
    emergency_stop: AsciiString,
    /// Settings for [`RunningJob::emergency_stop`].
    settings: DeviceSettings,
}

/// Waits for the job thread to exit. The report has already arrived, or never will.
fn join_job_thread(handle: thread::JoinHandle<()>) {
    if handle.join().is_err() {
        log::error!("job thread panicked");
    }
}

/// The session with the device.
///
/// Owns the link to the device, and at most one running job.
pub struct DeviceSession {
    /// Opens links.
    connector: Box<dyn Connector>,
    /// How to reach and talk to the device.
    settings: DeviceSettings,
    /// Where the session is in its lifecycle.
    state: SessionState,
    /// The link, while connected and no job is running.
    link: Option<Link>,
    /// The running job, if any.
    job: Option<RunningJob>,
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("settings", &self.settings)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl DeviceSession {
    /// Creates a new, disconnected, [`DeviceSession`].
    ///
    /// # Arguments
    /// * `connector`: Opens links to the device.
    /// * `settings`: How to reach and talk to the device.
    ///
    /// # Returns
    /// A new [`DeviceSession`].
    pub fn new(connector: Box<dyn Connector>, settings: DeviceSettings) -> Self {
        Self {
            connector,
            settings,
            state: SessionState::Disconnected,
            link: None,
            job: None,
        }
    }

    /// Gets where the session is in its lifecycle.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Gets the device settings.
    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    /// Replaces the device settings. A running job keeps the settings it started with.
    pub fn set_settings(&mut self, settings: DeviceSettings) {
        self.settings = settings;
    }

    /// Opens the link and checks the firmware answers the status query.
    ///
    /// If the firmware answers with something unexpected the link stays open, in the
    /// [`SessionState::InvalidFirmware`] state.
    ///
    /// # Arguments
    /// * `status`: Receives the link state.
    ///
    /// # Errors
    /// [`SessionError::AlreadyStreaming`] while a job is running, otherwise
    /// [`SessionError::Connection`] if the link could not be opened or the firmware
    /// is not ready.
    pub fn connect(&mut self, status: &mut dyn StatusSink) -> Result<(), SessionError> {
        if self.job.is_some() {
            return Err(SessionError::AlreadyStreaming);
        }
        let status_query = ascii_setting("status query", &self.settings.status_query)?;

        self.link = None;
        self.state = SessionState::Connecting;
        status.update(StatusUpdate::link("Connecting", Severity::Neutral));
        log::info!(
            "connecting to {} at {} baud",
            self.settings.port,
            self.settings.baud_rate
        );

        let channel = match self.connector.open(&self.settings) {
            Ok(channel) => channel,
            Err(source) => {
                return Err(self.connection_failed(
                    ConnectionError::Open {
                        port: self.settings.port.clone(),
                        source,
                    },
                    status,
                ));
            }
        };

        let mut link = Link::new(channel);
        let response = match handshake(&mut link, &status_query, &self.settings) {
            Ok(response) => response,
            Err(err) => {
                return Err(self.connection_failed(ConnectionError::Handshake(err), status));
            }
        };

        self.link = Some(link);
        if response.contains(&self.settings.ready_token) {
            self.state = SessionState::Connected;
            status.update(StatusUpdate::link("Connected", Severity::Ok));
            Ok(())
        } else {
            log::error!("invalid device/firmware, status query answered {response:?}");
            self.state = SessionState::InvalidFirmware;
            status.update(StatusUpdate::link("Invalid", Severity::Error));
            Err(ConnectionError::InvalidFirmware { response }.into())
        }
    }

    /// Reports a failure to connect and leaves the session disconnected.
    fn connection_failed(
        &mut self,
        err: ConnectionError,
        status: &mut dyn StatusSink,
    ) -> SessionError {
        log::error!("{err}");
        self.link = None;
        self.state = SessionState::Disconnected;
        status.update(StatusUpdate::link("Error", Severity::Error));
        err.into()
    }

    /// Closes the link. Always allowed: a running job is emergency stopped first.
    ///
    /// # Arguments
    /// * `status`: Receives the link state.
    pub fn disconnect(&mut self, status: &mut dyn StatusSink) {
        if self.job.is_some() {
            self.stop_running_job(status);
        }

        if self.link.take().is_some() {
            log::info!("disconnected");
        }
        self.state = SessionState::Disconnected;
        status.update(StatusUpdate::link("Disconnected", Severity::Error));
    }

    /// Starts streaming a program to the device on a background thread.
    ///
    /// The job checks the device is ready, then sends the program in chunks, waiting
    /// for every line of a chunk to be acknowledged before sending the next. Use
    /// [`DeviceSession::poll`] or [`DeviceSession::wait`] to follow it.
    ///
    /// # Arguments
    /// * `program`: What to send. The job takes its own copy.
    /// * `status`: Receives the link state.
    ///
    /// # Errors
    /// [`SessionError`] if a job is already running, the program is empty or not ASCII,
    /// or the link is not open.
    pub fn begin_streaming(
        &mut self,
        program: &MotionProgram,
        status: &mut dyn StatusSink,
    ) -> Result<(), SessionError> {
        if self.job.is_some() {
            return Err(SessionError::AlreadyStreaming);
        }
        if program.is_empty() {
            return Err(SessionError::EmptyProgram);
        }
        if self.link.is_none() {
            return Err(SessionError::NotConnected);
        }

        let lines = program
            .lines()
            .iter()
            .enumerate()
            .map(|(instruction, line)| {
                line.clone()
                    .into_ascii_string()
                    .map_err(|_| SessionError::NonAsciiInstruction {
                        instruction,
                        line: line.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let job = MotionJob {
            chunks: partition_chunks(lines.len(), self.settings.chunk_count),
            lines,
            status_query: ascii_setting("status query", &self.settings.status_query)?,
            ready_token: self.settings.ready_token.clone(),
            acknowledgment: self.settings.acknowledgment.clone(),
            emergency_stop: ascii_setting("emergency stop", &self.settings.emergency_stop)?,
            handshake_timeout: self.settings.handshake_timeout(),
            acknowledgment_timeout: self.settings.acknowledgment_timeout(),
            settle_delay: self.settings.settle_delay(),
        };
        let emergency_stop = job.emergency_stop.clone();

        let Some(link) = self.link.take() else {
            return Err(SessionError::NotConnected);
        };
        let (control_tx, control_rx) = mpsc::channel();
        let (progress_tx, progress_rx) = mpsc::channel();
        let (report_tx, report_rx) = oneshot::channel();

        log::info!(
            "streaming {} instructions in {} chunks",
            job.lines.len(),
            job.chunks.len()
        );
        let handle = thread::Builder::new()
            .name("motion-job".to_string())
            .spawn(move || {
                let report = run_job(link, &job, &control_rx, &progress_tx);
                if report_tx.send(report).is_err() {
                    log::warn!("job finished but the session has gone");
                }
            })
            .map_err(|err| {
                // The link went with the closure.
                self.state = SessionState::Disconnected;
                status.update(StatusUpdate::link("Error", Severity::Error));
                SessionError::Spawn(err)
            })?;

        self.job = Some(RunningJob {
            control: control_tx,
            progress: progress_rx,
            report: report_rx,
            handle,
            emergency_stop,
            settings: self.settings.clone(),
        });
        self.state = SessionState::Streaming;
        status.update(StatusUpdate::link("Streaming", Severity::Warn));
        status.update(JobProgress::new(0, 1, std::time::Duration::ZERO).to_status());

        Ok(())
    }

    /// Passes on job progress and checks whether the job has finished. Never blocks.
    ///
    /// # Arguments
    /// * `status`: Receives progress and the link state.
    ///
    /// # Returns
    /// How the job ended, once it has. `None` while it is running, or if there is no job.
    pub fn poll(&mut self, status: &mut dyn StatusSink) -> Option<Result<JobSummary, JobError>> {
        let job = self.job.as_ref()?;
        for progress in job.progress.try_iter() {
            status.update(progress.to_status());
        }

        let report = match job.report.try_recv() {
            Ok(report) => Ok(report),
            Err(oneshot::TryRecvError::Empty) => return None,
            Err(oneshot::TryRecvError::Disconnected) => Err(JobError::WorkerLost),
        };

        let job = self.job.take()?;
        // Progress sent just before the report.
        for progress in job.progress.try_iter() {
            status.update(progress.to_status());
        }
        join_job_thread(job.handle);

        Some(self.finish(report, status))
    }

    /// Blocks until the running job finishes, passing on progress as it arrives.
    ///
    /// # Arguments
    /// * `status`: Receives progress and the link state.
    ///
    /// # Returns
    /// How the job ended, or `None` if there is no job.
    pub fn wait(&mut self, status: &mut dyn StatusSink) -> Option<Result<JobSummary, JobError>> {
        loop {
            self.job.as_ref()?;
            if let Some(outcome) = self.poll(status) {
                return Some(outcome);
            }
            thread::sleep(self.settings.poll_interval());
        }
    }

    /// Stops the machine immediately and closes the link.
    ///
    /// # Arguments
    /// * `status`: Receives the link state.
    ///
    /// # Errors
    /// [`SessionError::NotStreaming`] if no job is running.
    pub fn emergency_stop(&mut self, status: &mut dyn StatusSink) -> Result<(), SessionError> {
        if self.job.is_none() {
            return Err(SessionError::NotStreaming);
        }

        self.stop_running_job(status);
        self.state = SessionState::Disconnected;
        status.update(StatusUpdate::link("Disconnected", Severity::Error));
        Ok(())
    }

    /// Tells the running job to stop and waits for it to close the link.
    fn stop_running_job(&mut self, status: &mut dyn StatusSink) {
        let Some(job) = self.job.take() else {
            return;
        };
        let RunningJob {
            control,
            progress,
            report,
            handle,
            emergency_stop,
            settings,
        } = job;

        // The job may already have finished, in which case nobody is listening.
        let _ = control.send(Control::EmergencyStop);
        match report.recv() {
            Ok(JobReport {
                link: Some(link),
                outcome,
            }) => {
                log::warn!("job ended before the emergency stop arrived: {outcome:?}");
                stop_machine(link, &emergency_stop, settings.settle_delay());
            }
            Ok(JobReport { link: None, .. }) => {}
            Err(_) => log::error!("{}", JobError::WorkerLost),
        }
        for update in progress.try_iter() {
            status.update(update.to_status());
        }
        join_job_thread(handle);
        self.link = None;
    }

    /// Takes back the link from a finished job and reports how it went.
    fn finish(
        &mut self,
        report: Result<JobReport, JobError>,
        status: &mut dyn StatusSink,
    ) -> Result<JobSummary, JobError> {
        let outcome = match report {
            Ok(JobReport { link, outcome }) => {
                self.link = link;
                outcome
            }
            Err(err) => Err(err),
        };

        self.state = if self.link.is_some() {
            SessionState::Connected
        } else {
            SessionState::Disconnected
        };

        match &outcome {
            Ok(_) => status.update(StatusUpdate::link("Connected", Severity::Ok)),
            Err(JobError::Protocol(_)) if self.link.is_none() => {
                status.update(StatusUpdate::link("Disconnected", Severity::Error));
            }
            Err(JobError::Protocol(ProtocolError::DeviceBusy { .. })) => {
                status.update(StatusUpdate::link("Busy", Severity::Error));
            }
            Err(JobError::Protocol(_)) => {
                status.update(StatusUpdate::link("Invalid", Severity::Error));
            }
            Err(JobError::UserAbort | JobError::WorkerLost) => {
                status.update(StatusUpdate::link("Disconnected", Severity::Error));
            }
        }

        outcome
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if self.job.is_some() {
            log::warn!("device session dropped while streaming");
            self.stop_running_job(&mut LogSink);
        }
    }
}

/// Sends the status query and reads the answer.
fn handshake(
    link: &mut Link,
    status_query: &AsciiString,
    settings: &DeviceSettings,
) -> Result<String, ProtocolError> {
    let timeout = settings.handshake_timeout();
    link.send_lines(&[status_query])?;
    link.read_line(timeout, &|| false)?
        .ok_or(ProtocolError::Unresponsive { timeout })
}
