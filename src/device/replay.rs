//! Replay of a recorded session file.
//!
//! The file is JSON lines: the first line is the subscribe reply, every
//! following line is one data message, both in the shapes described in
//! [`cortex`](crate::device::cortex). Playback starts on subscribe and the
//! event channel disconnects when the file is exhausted.

use crate::device::cortex::{parse_event, parse_subscription};
use crate::device::types::{
    SessionStatus, StreamEvent, StreamKind, SubscriptionAck, SubscriptionFailure,
};
use crate::device::{forward_event, DeviceError, DeviceSession};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Default longest pause honoured between two recorded events.
const MAX_REPLAY_GAP: Duration = Duration::from_secs(5);

/// Replay settings.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Recorded session file
    pub path: PathBuf,
    /// Sleep between events according to their recorded `time`
    pub realtime: bool,
    /// Playback speed multiplier used when `realtime` is set
    pub speed: f64,
    /// Longest pause between two events when `realtime` is set
    pub max_gap: Duration,
}

impl ReplayConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            realtime: false,
            speed: 1.0,
            max_gap: MAX_REPLAY_GAP,
        }
    }

    /// Reject playback settings the pacing cannot honour.
    pub fn validate(&self) -> Result<(), DeviceError> {
        if !(self.speed.is_finite() && self.speed > 0.0) {
            return Err(DeviceError::InvalidConfig(format!(
                "replay speed must be a positive number, got {}",
                self.speed
            )));
        }
        Ok(())
    }

    /// Pause before an event recorded `delta` seconds after the previous one.
    fn pause(&self, delta: f64) -> Duration {
        let secs = (delta / self.speed).clamp(0.0, self.max_gap.as_secs_f64());
        // NaN survives clamp
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
    }
}

/// A device that plays back a recorded session.
pub struct ReplayDevice {
    config: ReplayConfig,
    sender: Option<Sender<StreamEvent>>,
    receiver: Receiver<StreamEvent>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    /// Remaining lines of the open recording
    lines: Option<Lines<BufReader<File>>>,
    recorded: Option<SubscriptionAck>,
    status: Option<SessionStatus>,
}

impl ReplayDevice {
    pub fn new(config: ReplayConfig) -> Self {
        let (sender, receiver) = bounded(10_000);
        Self {
            config,
            sender: Some(sender),
            receiver,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            lines: None,
            recorded: None,
            status: None,
        }
    }

    /// Check if playback is in progress.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> Option<SessionStatus> {
        self.status
    }

    fn stop_playback(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl DeviceSession for ReplayDevice {
    fn create_session(&mut self) -> Result<(), DeviceError> {
        if self.status.is_some() {
            return Err(DeviceError::SessionAlreadyOpen);
        }
        self.config.validate()?;

        let file = File::open(&self.config.path)?;
        let mut lines = BufReader::new(file).lines();
        let header = lines
            .next()
            .transpose()?
            .ok_or_else(|| DeviceError::Malformed("recording is empty".to_string()))?;

        self.recorded = Some(parse_subscription(&header)?);
        self.lines = Some(lines);
        self.status = Some(SessionStatus::Open);
        tracing::debug!("Opened replay session from {:?}", self.config.path);
        Ok(())
    }

    fn subscribe(&mut self, streams: &[StreamKind]) -> Result<SubscriptionAck, DeviceError> {
        let recorded = self.recorded.as_ref().ok_or(DeviceError::NoSession)?;

        let mut ack = SubscriptionAck::default();
        for &stream in streams {
            match recorded.header(stream) {
                Some(header) => ack.success.push(header.clone()),
                None => ack.failure.push(
                    recorded
                        .failure
                        .iter()
                        .find(|f| f.stream == stream.key())
                        .cloned()
                        .unwrap_or_else(|| SubscriptionFailure {
                            stream: stream.key().to_string(),
                            code: -32016,
                            message: "stream not present in recording".to_string(),
                        }),
                ),
            }
        }

        let wanted: HashSet<StreamKind> = ack
            .success
            .iter()
            .filter_map(|h| StreamKind::from_key(&h.stream))
            .collect();

        // Playback starts once, on the first subscribe that yields a stream.
        if let (Some(lines), Some(sender)) = (self.lines.take(), self.sender.take()) {
            self.running.store(true, Ordering::SeqCst);
            let running = self.running.clone();
            let config = self.config.clone();
            self.thread_handle = Some(thread::spawn(move || {
                play(lines, sender, running.clone(), wanted, config);
                running.store(false, Ordering::SeqCst);
            }));
        }

        Ok(ack)
    }

    fn unsubscribe(&mut self, _streams: &[StreamKind]) -> Result<(), DeviceError> {
        if self.status.is_none() {
            return Err(DeviceError::NoSession);
        }
        self.stop_playback();
        Ok(())
    }

    fn update_session(&mut self, status: SessionStatus) -> Result<(), DeviceError> {
        if self.status.is_none() {
            return Err(DeviceError::NoSession);
        }
        if status == SessionStatus::Close {
            self.stop_playback();
            self.lines = None;
            self.recorded = None;
            self.status = None;
        } else {
            self.status = Some(status);
        }
        Ok(())
    }

    fn events(&self) -> &Receiver<StreamEvent> {
        &self.receiver
    }
}

impl Drop for ReplayDevice {
    fn drop(&mut self) {
        self.stop_playback();
    }
}

fn play(
    lines: Lines<BufReader<File>>,
    sender: Sender<StreamEvent>,
    running: Arc<AtomicBool>,
    wanted: HashSet<StreamKind>,
    config: ReplayConfig,
) {
    let mut last_time: Option<f64> = None;

    for (i, line) in lines.enumerate() {
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Replay read error: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let event = match parse_event(&line) {
            Ok(event) => event,
            Err(e) => {
                // Line numbers are 1-based and the header is line 1.
                tracing::warn!("Skipping replay line {}: {}", i + 2, e);
                continue;
            }
        };
        if !wanted.contains(&event.stream) {
            continue;
        }

        if config.realtime {
            if let (Some(prev), Some(now)) = (last_time, event.time) {
                thread::sleep(config.pause(now - prev));
            }
            last_time = event.time.or(last_time);
        }

        if !forward_event(&sender, &running, event) {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn recording(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file
    }

    #[test]
    fn test_replay_delivers_subscribed_streams_in_order() {
        let file = recording(&[
            r#"{"success":[{"streamName":"mot","cols":["IMD_ACCX"]},{"streamName":"met","cols":["eng"]}],"failure":[]}"#,
            r#"{"mot":[1.0],"time":0.0}"#,
            r#"garbage"#,
            r#"{"met":[0.5],"time":0.1}"#,
            r#"{"mot":[2.0],"time":0.2}"#,
        ]);
        let mut device = ReplayDevice::new(ReplayConfig::new(file.path()));

        device.create_session().unwrap();
        let ack = device.subscribe(&[StreamKind::Mot, StreamKind::Met]).unwrap();
        assert_eq!(ack.success.len(), 2);
        assert!(ack.failure.is_empty());

        let events: Vec<StreamEvent> = device.events().iter().collect();
        let kinds: Vec<StreamKind> = events.iter().map(|e| e.stream).collect();
        assert_eq!(kinds, vec![StreamKind::Mot, StreamKind::Met, StreamKind::Mot]);
        assert_eq!(events[2].values, vec![2.0]);
    }

    #[test]
    fn test_missing_stream_reported_as_failure() {
        let file = recording(&[
            r#"{"success":[{"streamName":"mot","cols":["IMD_ACCX"]}],"failure":[{"streamName":"pow","code":-32016,"message":"no license"}]}"#,
        ]);
        let mut device = ReplayDevice::new(ReplayConfig::new(file.path()));
        device.create_session().unwrap();

        let ack = device.subscribe(&StreamKind::ALL).unwrap();
        assert_eq!(ack.missing(&StreamKind::ALL), vec![StreamKind::Pow, StreamKind::Met]);
        assert_eq!(ack.failure[0].message, "no license");
        assert_eq!(ack.failure[1].stream, "met");
    }

    #[test]
    fn test_session_lifecycle() {
        let file = recording(&[r#"{"success":[],"failure":[]}"#]);
        let mut device = ReplayDevice::new(ReplayConfig::new(file.path()));

        assert!(matches!(
            device.subscribe(&StreamKind::ALL),
            Err(DeviceError::NoSession)
        ));
        device.create_session().unwrap();
        assert!(matches!(
            device.create_session(),
            Err(DeviceError::SessionAlreadyOpen)
        ));

        device.update_session(SessionStatus::Close).unwrap();
        assert_eq!(device.status(), None);
        assert!(matches!(
            device.unsubscribe(&StreamKind::ALL),
            Err(DeviceError::NoSession)
        ));
    }

    #[test]
    fn test_non_positive_speed_rejected() {
        let file = recording(&[r#"{"success":[],"failure":[]}"#]);
        for speed in [0.0, -1.0, f64::NAN] {
            let mut device = ReplayDevice::new(ReplayConfig {
                realtime: true,
                speed,
                ..ReplayConfig::new(file.path())
            });
            assert!(matches!(
                device.create_session(),
                Err(DeviceError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_pause_is_capped() {
        let config = ReplayConfig {
            speed: 1e-300,
            max_gap: Duration::from_millis(10),
            ..ReplayConfig::new("unused")
        };
        assert_eq!(config.pause(10_000.0), Duration::from_millis(10));
        assert_eq!(config.pause(-3.0), Duration::ZERO);
        assert_eq!(config.pause(f64::NAN), Duration::ZERO);
    }

    #[test]
    fn test_realtime_replay_survives_huge_gaps() {
        let file = recording(&[
            r#"{"success":[{"streamName":"mot","cols":["IMD_ACCX"]}],"failure":[]}"#,
            r#"{"mot":[1.0],"time":0.0}"#,
            r#"{"mot":[2.0],"time":10000.0}"#,
            r#"{"mot":[3.0],"time":10000.5}"#,
        ]);
        let mut device = ReplayDevice::new(ReplayConfig {
            realtime: true,
            speed: 1e-300,
            max_gap: Duration::from_millis(10),
            ..ReplayConfig::new(file.path())
        });
        device.create_session().unwrap();
        device.subscribe(&[StreamKind::Mot]).unwrap();

        let values: Vec<f64> = device.events().iter().map(|e| e.values[0]).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_empty_recording_rejected() {
        let file = recording(&[]);
        let mut device = ReplayDevice::new(ReplayConfig::new(file.path()));
        assert!(matches!(
            device.create_session(),
            Err(DeviceError::Malformed(_))
        ));
    }
}
