//! `link`
//!
//! Line-oriented text over a byte channel.

use std::{
    io::{self, ErrorKind, Read, Write},
    time::{Duration, Instant},
};

use ascii::{AsciiStr, AsciiString};

use super::DeviceChannel;
use crate::error::{ProtocolError, SessionError};

/// How many bytes to read from the channel at a time.
const READ_BUFFER_SIZE: usize = 256;

/// An open channel to the device, read and written a line at a time.
pub struct Link {
    /// The channel.
    channel: Box<dyn DeviceChannel>,
    /// Bytes read that do not yet make a whole line.
    pending: Vec<u8>,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("pending", &String::from_utf8_lossy(&self.pending))
            .finish_non_exhaustive()
    }
}

impl Link {
    /// Creates a new [`Link`] over an open channel.
    pub fn new(channel: Box<dyn DeviceChannel>) -> Self {
        Self {
            channel,
            pending: vec![],
        }
    }

    /// Writes lines to the device as one transmission. Every line is terminated with `\n`.
    ///
    /// # Arguments
    /// * `lines`: The lines to send.
    ///
    /// # Errors
    /// Any I/O error from the channel.
    pub fn send_lines<S: AsRef<AsciiStr>>(&mut self, lines: &[S]) -> io::Result<()> {
        let length = lines.iter().map(|line| line.as_ref().len() + 1).sum();
        let mut transmission = Vec::with_capacity(length);
        for line in lines {
            transmission.extend_from_slice(line.as_ref().as_bytes());
            transmission.push(b'\n');
        }

        log::debug!(
            "sending {} lines ({} bytes)",
            lines.len(),
            transmission.len()
        );
        self.channel.write_all(&transmission)?;
        self.channel.flush()
    }

    /// Reads one line from the device, without its terminator.
    ///
    /// # Arguments
    /// * `timeout`: How long to wait for the line.
    /// * `cancelled`: Checked every time the channel has nothing to read. Returning `true`
    ///   gives up waiting.
    ///
    /// # Returns
    /// The line, or `None` if waiting was cancelled.
    ///
    /// # Errors
    /// [`ProtocolError::Unresponsive`] if no line arrived in time, [`ProtocolError::LinkClosed`]
    /// if the device hung up, [`ProtocolError::Io`] if reading failed.
    pub fn read_line(
        &mut self,
        timeout: Duration,
        cancelled: &dyn Fn() -> bool,
    ) -> Result<Option<String>, ProtocolError> {
        let deadline = Instant::now() + timeout;
        let mut buffer = [0u8; READ_BUFFER_SIZE];

        loop {
            if let Some(line) = self.take_line() {
                log::debug!("received {line:?}");
                return Ok(Some(line));
            }

            if cancelled() {
                return Ok(None);
            }
            if Instant::now() >= deadline {
                return Err(ProtocolError::Unresponsive { timeout });
            }

            match self.channel.read(&mut buffer) {
                Ok(0) => return Err(ProtocolError::LinkClosed),
                Ok(read) => self.pending.extend_from_slice(&buffer[..read]),
                // The channel has a short read timeout, so this is how it says "nothing yet".
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) => {}
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Throws away everything received but not yet read, buffered or not.
    ///
    /// # Errors
    /// Any I/O error from clearing the channel.
    pub fn discard_input(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            log::debug!(
                "discarding {:?}",
                String::from_utf8_lossy(&self.pending)
            );
            self.pending.clear();
        }
        self.channel.clear_input()
    }

    /// Takes the first whole line out of the pending bytes, if there is one.
    fn take_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|byte| *byte == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=end).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

/// Checks that a device command from the settings can be sent.
///
/// # Arguments
/// * `setting`: Name of the setting, for error reporting.
/// * `value`: The command.
///
/// # Returns
/// The command as ASCII.
///
/// # Errors
/// [`SessionError::NonAsciiSetting`] if the command is not ASCII.
pub(crate) fn ascii_setting(
    setting: &'static str,
    value: &str,
) -> Result<AsciiString, SessionError> {
    AsciiString::from_ascii(value).map_err(|_| SessionError::NonAsciiSetting {
        setting,
        value: value.to_string(),
    })
}
