//! Device session tests against a fake plotter on the other end of the link.

use std::{
    collections::VecDeque,
    io::{self, ErrorKind, Read, Write},
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use automatist::{
    device::{Connector, DeviceChannel, DeviceSession, SessionState},
    error::{ConnectionError, JobError, ProtocolError, SessionError},
    program::MotionProgram,
    settings::DeviceSettings,
    status::{Severity, StatusUpdate},
};

/// Answers one line sent to the fake device, or stays quiet.
type Responder = Box<dyn FnMut(&str) -> Option<String> + Send>;

/// What the fake device has seen, shared between the test and the channel.
struct DeviceState {
    /// Every whole line written to the device, in order.
    received: Vec<String>,
    /// Written bytes that do not make a whole line yet.
    partial: Vec<u8>,
    /// Bytes waiting to be read.
    outgoing: VecDeque<u8>,
    /// Decides what to answer.
    responder: Responder,
    /// Whether the channel has been dropped.
    closed: bool,
    /// The device hangs up once it is sent a line starting with this.
    hang_up_on: Option<&'static str>,
    /// Whether the device has hung up.
    hung_up: bool,
}

type SharedState = Arc<Mutex<DeviceState>>;

/// One open channel to the fake device.
struct FakeChannel(SharedState);

impl Read for FakeChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = {
            let mut state = self.0.lock().expect("poisoned");
            let read = buf.len().min(state.outgoing.len());
            for (slot, byte) in buf.iter_mut().zip(state.outgoing.drain(..read)) {
                *slot = byte;
            }
            if read == 0 && state.hung_up {
                return Ok(0);
            }
            read
        };

        if read == 0 {
            // Like a serial port with a short timeout.
            thread::sleep(Duration::from_millis(1));
            return Err(ErrorKind::TimedOut.into());
        }
        Ok(read)
    }
}

impl Write for FakeChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.0.lock().expect("poisoned");
        state.partial.extend_from_slice(buf);
        while let Some(end) = state.partial.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = state.partial.drain(..=end).collect();
            let line = String::from_utf8_lossy(&line[..end]).into_owned();
            if state.hang_up_on.is_some_and(|prefix| line.starts_with(prefix)) {
                state.hung_up = true;
            }
            if state.hung_up {
                state.received.push(line);
                continue;
            }
            if let Some(reply) = (state.responder)(&line) {
                state.outgoing.extend(reply.bytes());
                state.outgoing.push_back(b'\n');
            }
            state.received.push(line);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl DeviceChannel for FakeChannel {
    fn clear_input(&mut self) -> io::Result<()> {
        self.0.lock().expect("poisoned").outgoing.clear();
        Ok(())
    }
}

impl Drop for FakeChannel {
    fn drop(&mut self) {
        if let Ok(mut state) = self.0.lock() {
            state.closed = true;
        }
    }
}

/// Opens channels to the fake device, or fails to.
struct FakeConnector(Option<SharedState>);

impl Connector for FakeConnector {
    fn open(&self, _settings: &DeviceSettings) -> io::Result<Box<dyn DeviceChannel>> {
        match &self.0 {
            Some(state) => Ok(Box::new(FakeChannel(state.clone()))),
            None => Err(ErrorKind::NotFound.into()),
        }
    }
}

fn fake_device(responder: impl FnMut(&str) -> Option<String> + Send + 'static) -> SharedState {
    Arc::new(Mutex::new(DeviceState {
        received: vec![],
        partial: vec![],
        outgoing: VecDeque::new(),
        responder: Box::new(responder),
        closed: false,
        hang_up_on: None,
        hung_up: false,
    }))
}

/// A device that answers everything except the emergency stop with `ok`.
fn cooperative(line: &str) -> Option<String> {
    (line != "M112").then(|| "ok".to_string())
}

fn settings() -> DeviceSettings {
    DeviceSettings {
        chunk_count: 4,
        handshake_timeout_ms: 1000,
        acknowledgment_timeout_ms: 1000,
        poll_interval_ms: 1,
        settle_delay_ms: 0,
        ..DeviceSettings::default()
    }
}

fn session(device: &SharedState) -> DeviceSession {
    DeviceSession::new(
        Box::new(FakeConnector(Some(device.clone()))),
        settings(),
    )
}

fn program(count: usize) -> MotionProgram {
    let text: Vec<String> = (0..count).map(|index| format!("G1 X{index} Y0 Z1")).collect();
    MotionProgram::parse(&text.join("\n"))
}

fn received(device: &SharedState) -> Vec<String> {
    device.lock().expect("poisoned").received.clone()
}

fn closed(device: &SharedState) -> bool {
    device.lock().expect("poisoned").closed
}

fn link_labels(updates: &[StatusUpdate]) -> Vec<&str> {
    updates
        .iter()
        .filter_map(|update| match update {
            StatusUpdate::Link { label, .. } => Some(label.as_str()),
            _ => None,
        })
        .collect()
}

#[test]
fn streams_every_chunk() {
    let device = fake_device(cooperative);
    let mut session = session(&device);
    let mut updates: Vec<StatusUpdate> = vec![];

    session.connect(&mut updates).expect("connect must succeed");
    assert_eq!(session.state(), SessionState::Connected);

    let program = program(10);
    session
        .begin_streaming(&program, &mut updates)
        .expect("streaming must start");
    assert_eq!(session.state(), SessionState::Streaming);

    let summary = session
        .wait(&mut updates)
        .expect("a job was running")
        .expect("job must succeed");
    assert_eq!(summary.instructions, 10);
    assert_eq!(summary.chunks, 4);
    assert_eq!(session.state(), SessionState::Connected);

    let mut expected = vec!["G6 P100".to_string(), "G6 P100".to_string()];
    expected.extend(program.lines().iter().cloned());
    assert_eq!(received(&device), expected);
    assert!(!closed(&device), "link stays open after a job");

    let percentages: Vec<u8> = updates
        .iter()
        .filter_map(|update| match update {
            StatusUpdate::Progress { percentage, .. } => Some(*percentage),
            _ => None,
        })
        .collect();
    assert_eq!(percentages, [0, 25, 50, 75, 100]);
    assert_eq!(
        link_labels(&updates),
        ["Connecting", "Connected", "Streaming", "Connected"]
    );
}

#[test]
fn bad_acknowledgment_stops_later_chunks() {
    let mut instructions = 0;
    let device = fake_device(move |line| {
        if line.starts_with("G1") {
            instructions += 1;
            if instructions == 4 {
                return Some("error: out of bounds".to_string());
            }
        }
        cooperative(line)
    });
    let mut session = session(&device);
    let mut updates: Vec<StatusUpdate> = vec![];
    session.connect(&mut updates).expect("connect must succeed");

    // Chunks of 3, 3, 2 and 2 lines. The fourth instruction is in the second chunk.
    session
        .begin_streaming(&program(10), &mut updates)
        .expect("streaming must start");
    let outcome = session.wait(&mut updates).expect("a job was running");

    assert!(matches!(
        outcome,
        Err(JobError::Protocol(ProtocolError::UnexpectedResponse {
            instruction: 3,
            ..
        }))
    ));
    let sent = received(&device);
    assert_eq!(sent.len(), 2 + 6, "only the first two chunks are sent");
    assert!(!sent.contains(&"G1 X6 Y0 Z1".to_string()));

    assert_eq!(session.state(), SessionState::Connected);
    assert!(!closed(&device), "a protocol error leaves the link open");
    assert_eq!(link_labels(&updates).last(), Some(&"Invalid"));
    assert_eq!(updates.last().map(StatusUpdate::severity), Some(Severity::Error));
}

#[test]
fn busy_device_is_sent_nothing() {
    let mut queries = 0;
    let device = fake_device(move |line| {
        if line == "G6 P100" {
            queries += 1;
            if queries > 1 {
                return Some("busy".to_string());
            }
        }
        cooperative(line)
    });
    let mut session = session(&device);
    let mut updates: Vec<StatusUpdate> = vec![];
    session.connect(&mut updates).expect("connect must succeed");

    session
        .begin_streaming(&program(5), &mut updates)
        .expect("streaming must start");
    let outcome = session.wait(&mut updates).expect("a job was running");

    assert!(matches!(
        outcome,
        Err(JobError::Protocol(ProtocolError::DeviceBusy { response })) if response == "busy"
    ));
    assert_eq!(received(&device), ["G6 P100", "G6 P100"]);
    assert_eq!(session.state(), SessionState::Connected);
}

#[test]
fn silent_device_times_out() {
    let device = fake_device(|line| (line == "G6 P100").then(|| "ok".to_string()));
    let mut session = DeviceSession::new(
        Box::new(FakeConnector(Some(device.clone()))),
        DeviceSettings {
            acknowledgment_timeout_ms: 20,
            ..settings()
        },
    );
    let mut updates: Vec<StatusUpdate> = vec![];
    session.connect(&mut updates).expect("connect must succeed");

    session
        .begin_streaming(&program(5), &mut updates)
        .expect("streaming must start");
    let outcome = session.wait(&mut updates).expect("a job was running");

    assert!(matches!(
        outcome,
        Err(JobError::Protocol(ProtocolError::Unresponsive { timeout }))
            if timeout == Duration::from_millis(20)
    ));
    assert_eq!(received(&device).len(), 2 + 2, "only the first chunk is sent");
}

#[test]
fn invalid_firmware_keeps_the_link_open() {
    let device = fake_device(|_| Some("Marlin 2.1".to_string()));
    let mut session = session(&device);
    let mut updates: Vec<StatusUpdate> = vec![];

    let result = session.connect(&mut updates);
    assert!(matches!(
        result,
        Err(SessionError::Connection(ConnectionError::InvalidFirmware { response }))
            if response == "Marlin 2.1"
    ));
    assert_eq!(session.state(), SessionState::InvalidFirmware);
    assert!(!closed(&device));
    assert_eq!(link_labels(&updates), ["Connecting", "Invalid"]);

    session.disconnect(&mut updates);
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(closed(&device));
}

#[test]
fn failure_to_open_leaves_the_session_disconnected() {
    let mut session = DeviceSession::new(Box::new(FakeConnector(None)), settings());
    let mut updates: Vec<StatusUpdate> = vec![];

    let result = session.connect(&mut updates);
    assert!(matches!(
        result,
        Err(SessionError::Connection(ConnectionError::Open { .. }))
    ));
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(link_labels(&updates), ["Connecting", "Error"]);
}

#[test]
fn silent_handshake_leaves_the_session_disconnected() {
    let device = fake_device(|_| None);
    let mut session = DeviceSession::new(
        Box::new(FakeConnector(Some(device.clone()))),
        DeviceSettings {
            handshake_timeout_ms: 20,
            ..settings()
        },
    );

    let result = session.connect(&mut Vec::<StatusUpdate>::new());
    assert!(matches!(
        result,
        Err(SessionError::Connection(ConnectionError::Handshake(
            ProtocolError::Unresponsive { .. }
        )))
    ));
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(closed(&device), "the channel is released");
}

#[test]
fn streaming_preconditions() {
    let device = fake_device(cooperative);
    let mut session = session(&device);
    let mut updates: Vec<StatusUpdate> = vec![];

    assert!(matches!(
        session.begin_streaming(&program(3), &mut updates),
        Err(SessionError::NotConnected)
    ));
    assert!(matches!(
        session.emergency_stop(&mut updates),
        Err(SessionError::NotStreaming)
    ));

    session.connect(&mut updates).expect("connect must succeed");
    assert!(matches!(
        session.begin_streaming(&MotionProgram::default(), &mut updates),
        Err(SessionError::EmptyProgram)
    ));
    assert!(matches!(
        session.begin_streaming(&MotionProgram::parse("G21\nG1 X1 Y2 Z1 ; café"), &mut updates),
        Err(SessionError::NonAsciiInstruction { instruction: 1, .. })
    ));
    assert_eq!(received(&device), ["G6 P100"], "nothing is sent after a refusal");
    assert_eq!(session.state(), SessionState::Connected);
}

#[test]
fn only_one_job_at_a_time() {
    // Never acknowledges instructions, so the job keeps running.
    let device = fake_device(|line| (line == "G6 P100").then(|| "ok".to_string()));
    let mut session = DeviceSession::new(
        Box::new(FakeConnector(Some(device.clone()))),
        DeviceSettings {
            acknowledgment_timeout_ms: 60_000,
            ..settings()
        },
    );
    let mut updates: Vec<StatusUpdate> = vec![];
    session.connect(&mut updates).expect("connect must succeed");
    session
        .begin_streaming(&program(5), &mut updates)
        .expect("streaming must start");

    assert!(matches!(
        session.begin_streaming(&program(5), &mut updates),
        Err(SessionError::AlreadyStreaming)
    ));
    assert!(matches!(
        session.connect(&mut updates),
        Err(SessionError::AlreadyStreaming)
    ));
    assert!(session.poll(&mut updates).is_none(), "the job is still running");

    session
        .emergency_stop(&mut updates)
        .expect("emergency stop must be accepted");
}

#[test]
fn emergency_stop_closes_the_link() {
    let device = fake_device(|line| (line == "G6 P100").then(|| "ok".to_string()));
    let mut session = DeviceSession::new(
        Box::new(FakeConnector(Some(device.clone()))),
        DeviceSettings {
            acknowledgment_timeout_ms: 60_000,
            ..settings()
        },
    );
    let mut updates: Vec<StatusUpdate> = vec![];
    session.connect(&mut updates).expect("connect must succeed");
    session
        .begin_streaming(&program(8), &mut updates)
        .expect("streaming must start");

    session
        .emergency_stop(&mut updates)
        .expect("emergency stop must be accepted");

    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(closed(&device));
    let sent = received(&device);
    assert_eq!(sent.last().map(String::as_str), Some("M112"));
    assert!(
        !sent.contains(&"G1 X2 Y0 Z1".to_string()),
        "the second chunk is never sent"
    );
    assert_eq!(link_labels(&updates).last(), Some(&"Disconnected"));
    assert!(session.poll(&mut updates).is_none(), "the job is gone");
}

#[test]
fn dropping_the_session_stops_the_machine() {
    let device = fake_device(|line| (line == "G6 P100").then(|| "ok".to_string()));
    let mut session = DeviceSession::new(
        Box::new(FakeConnector(Some(device.clone()))),
        DeviceSettings {
            acknowledgment_timeout_ms: 60_000,
            ..settings()
        },
    );
    let mut updates: Vec<StatusUpdate> = vec![];
    session.connect(&mut updates).expect("connect must succeed");
    session
        .begin_streaming(&program(8), &mut updates)
        .expect("streaming must start");

    drop(session);

    assert!(closed(&device));
    assert_eq!(received(&device).last().map(String::as_str), Some("M112"));
}

#[test]
fn a_failed_job_can_be_retried() {
    let mut failures = 1;
    let device = fake_device(move |line| {
        if line.starts_with("G1") && failures > 0 {
            failures -= 1;
            return Some("error".to_string());
        }
        cooperative(line)
    });
    let mut session = session(&device);
    let mut updates: Vec<StatusUpdate> = vec![];
    session.connect(&mut updates).expect("connect must succeed");

    let program = program(4);
    session
        .begin_streaming(&program, &mut updates)
        .expect("streaming must start");
    assert!(session
        .wait(&mut updates)
        .expect("a job was running")
        .is_err());

    session
        .begin_streaming(&program, &mut updates)
        .expect("streaming must restart");
    let summary = session
        .wait(&mut updates)
        .expect("a job was running")
        .expect("second attempt must succeed");
    assert_eq!(summary.instructions, 4);
}

#[test]
fn retry_after_an_aborted_chunk_checks_readiness_again() {
    let mut queries = 0;
    let mut failures = 1;
    let device = fake_device(move |line| {
        if line == "G6 P100" {
            queries += 1;
            // Connect and the first job see a ready device, the retry a busy one.
            if queries > 2 {
                return Some("busy".to_string());
            }
        }
        if line.starts_with("G1") && failures > 0 {
            failures -= 1;
            return Some("error".to_string());
        }
        cooperative(line)
    });
    let mut session = session(&device);
    let mut updates: Vec<StatusUpdate> = vec![];
    session.connect(&mut updates).expect("connect must succeed");

    // Chunks of two lines. The second line's `ok` is still unread when the job stops.
    let program = program(8);
    session
        .begin_streaming(&program, &mut updates)
        .expect("streaming must start");
    assert!(matches!(
        session.wait(&mut updates).expect("a job was running"),
        Err(JobError::Protocol(ProtocolError::UnexpectedResponse {
            instruction: 0,
            ..
        }))
    ));
    assert_eq!(session.state(), SessionState::Connected);

    session
        .begin_streaming(&program, &mut updates)
        .expect("streaming must restart");
    let outcome = session.wait(&mut updates).expect("a job was running");

    assert!(matches!(
        outcome,
        Err(JobError::Protocol(ProtocolError::DeviceBusy { response })) if response == "busy"
    ));
    assert_eq!(
        received(&device),
        ["G6 P100", "G6 P100", "G1 X0 Y0 Z1", "G1 X1 Y0 Z1", "G6 P100"],
        "nothing is sent to a busy device"
    );
    assert_eq!(link_labels(&updates).last(), Some(&"Busy"));
}

#[test]
fn device_hanging_up_disconnects_the_session() {
    let device = fake_device(cooperative);
    device.lock().expect("poisoned").hang_up_on = Some("G1 X1");
    let mut session = session(&device);
    let mut updates: Vec<StatusUpdate> = vec![];
    session.connect(&mut updates).expect("connect must succeed");

    session
        .begin_streaming(&program(8), &mut updates)
        .expect("streaming must start");
    let outcome = session.wait(&mut updates).expect("a job was running");

    assert!(matches!(
        outcome,
        Err(JobError::Protocol(ProtocolError::LinkClosed))
    ));
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(closed(&device), "the dead link is dropped");
    assert_eq!(link_labels(&updates).last(), Some(&"Disconnected"));
    assert!(matches!(
        session.begin_streaming(&program(8), &mut updates),
        Err(SessionError::NotConnected)
    ));
}
