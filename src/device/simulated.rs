//! A synthetic headset for demos and testing.
//!
//! Emits band power, motion and metrics at independent rates from a
//! background thread, using the same column headers a real headset reports.

use crate::core::bands::CANONICAL_BANDS;
use crate::device::types::{
    SessionStatus, StreamEvent, StreamHeader, StreamKind, SubscriptionAck, SubscriptionFailure,
};
use crate::device::{forward_event, DeviceError, DeviceSession};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::collections::HashSet;
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Motion columns reported by the headset.
pub const MOTION_COLUMNS: [&str; 10] = [
    "IMD_COUNTER",
    "IMD_GYROX",
    "IMD_GYROY",
    "IMD_GYROZ",
    "IMD_ACCX",
    "IMD_ACCY",
    "IMD_ACCZ",
    "IMD_MAGX",
    "IMD_MAGY",
    "IMD_MAGZ",
];

/// Performance metric columns reported by the headset.
pub const METRIC_COLUMNS: [&str; 13] = [
    "eng.isActive",
    "eng",
    "exc.isActive",
    "exc",
    "lex",
    "str.isActive",
    "str",
    "rel.isActive",
    "rel",
    "int.isActive",
    "int",
    "foc.isActive",
    "foc",
];

/// Simulated device settings.
#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    /// Band power rate (Hz)
    pub pow_hz: f64,
    /// Motion rate (Hz)
    pub mot_hz: f64,
    /// Metrics rate (Hz)
    pub met_hz: f64,
    /// Stop emitting after this long; the event channel then disconnects
    pub duration: Option<Duration>,
    /// Streams the device refuses to subscribe
    pub fail_streams: Vec<StreamKind>,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            pow_hz: 8.0,
            mot_hz: 32.0,
            met_hz: 2.0,
            duration: None,
            fail_streams: Vec::new(),
        }
    }
}

/// Accepted sample rates (Hz); zero disables a stream.
const MIN_RATE_HZ: f64 = 0.01;
const MAX_RATE_HZ: f64 = 10_000.0;

impl SimulatedConfig {
    fn rate(&self, stream: StreamKind) -> f64 {
        match stream {
            StreamKind::Pow => self.pow_hz,
            StreamKind::Mot => self.mot_hz,
            StreamKind::Met => self.met_hz,
        }
    }

    /// Reject rates the generator cannot schedule.
    pub fn validate(&self) -> Result<(), DeviceError> {
        for stream in StreamKind::ALL {
            let rate = self.rate(stream);
            if rate != 0.0 && !(MIN_RATE_HZ..=MAX_RATE_HZ).contains(&rate) {
                return Err(DeviceError::InvalidConfig(format!(
                    "'{stream}' rate must be 0 or between {MIN_RATE_HZ} and {MAX_RATE_HZ} Hz, got {rate}"
                )));
            }
        }
        Ok(())
    }
}

/// Column header the simulated device reports for a stream.
pub fn simulated_header(stream: StreamKind) -> Vec<String> {
    let cols: &[&str] = match stream {
        StreamKind::Pow => &CANONICAL_BANDS,
        StreamKind::Mot => &MOTION_COLUMNS,
        StreamKind::Met => &METRIC_COLUMNS,
    };
    cols.iter().map(|c| c.to_string()).collect()
}

/// A headset that synthesizes its streams.
pub struct SimulatedDevice {
    config: SimulatedConfig,
    sender: Option<Sender<StreamEvent>>,
    receiver: Receiver<StreamEvent>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    status: Option<SessionStatus>,
    session_id: Option<uuid::Uuid>,
}

impl SimulatedDevice {
    pub fn new(config: SimulatedConfig) -> Self {
        let (sender, receiver) = bounded(10_000);
        Self {
            config,
            sender: Some(sender),
            receiver,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            status: None,
            session_id: None,
        }
    }

    pub fn session_id(&self) -> Option<uuid::Uuid> {
        self.session_id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn stop_streaming(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl DeviceSession for SimulatedDevice {
    fn create_session(&mut self) -> Result<(), DeviceError> {
        if self.status.is_some() {
            return Err(DeviceError::SessionAlreadyOpen);
        }
        self.config.validate()?;
        let id = uuid::Uuid::new_v4();
        tracing::debug!("Simulated session {} opened", id);
        self.session_id = Some(id);
        self.status = Some(SessionStatus::Open);
        Ok(())
    }

    fn subscribe(&mut self, streams: &[StreamKind]) -> Result<SubscriptionAck, DeviceError> {
        if self.status.is_none() {
            return Err(DeviceError::NoSession);
        }

        let mut ack = SubscriptionAck::default();
        let mut active = HashSet::new();
        for &stream in streams {
            if self.config.fail_streams.contains(&stream) {
                ack.failure.push(SubscriptionFailure {
                    stream: stream.key().to_string(),
                    code: -32016,
                    message: "subscription refused".to_string(),
                });
            } else if self.config.rate(stream) > 0.0 {
                ack.success
                    .push(StreamHeader::new(stream, simulated_header(stream)));
                active.insert(stream);
            }
        }

        if let Some(sender) = self.sender.take() {
            self.running.store(true, Ordering::SeqCst);
            let running = self.running.clone();
            let config = self.config.clone();
            self.thread_handle = Some(thread::spawn(move || {
                generate(sender, running.clone(), active, config);
                running.store(false, Ordering::SeqCst);
            }));
        }

        Ok(ack)
    }

    fn unsubscribe(&mut self, _streams: &[StreamKind]) -> Result<(), DeviceError> {
        if self.status.is_none() {
            return Err(DeviceError::NoSession);
        }
        self.stop_streaming();
        Ok(())
    }

    fn update_session(&mut self, status: SessionStatus) -> Result<(), DeviceError> {
        if self.status.is_none() {
            return Err(DeviceError::NoSession);
        }
        if status == SessionStatus::Close {
            self.stop_streaming();
            self.status = None;
            self.session_id = None;
        } else {
            self.status = Some(status);
        }
        Ok(())
    }

    fn events(&self) -> &Receiver<StreamEvent> {
        &self.receiver
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        self.stop_streaming();
    }
}

fn generate(
    sender: Sender<StreamEvent>,
    running: Arc<AtomicBool>,
    active: HashSet<StreamKind>,
    config: SimulatedConfig,
) {
    let start = Instant::now();
    let mut schedule: Vec<(StreamKind, Duration, Duration)> = StreamKind::ALL
        .iter()
        .filter(|s| active.contains(*s))
        .map(|&s| {
            let interval = Duration::from_secs_f64(1.0 / config.rate(s));
            (s, interval, interval)
        })
        .collect();
    if schedule.is_empty() {
        return;
    }
    let mut counter = 0u64;

    while running.load(Ordering::SeqCst) {
        // Earliest due stream; ties go to subscription order.
        let Some(next) = schedule.iter_mut().min_by_key(|(_, _, due)| *due) else {
            break;
        };
        let due = next.2;
        if config.duration.is_some_and(|d| due > d) {
            break;
        }
        next.2 += next.1;
        let stream = next.0;

        let elapsed = start.elapsed();
        if due > elapsed {
            thread::sleep(due - elapsed);
        }

        let t = due.as_secs_f64();
        let values = match stream {
            StreamKind::Pow => band_power(t),
            StreamKind::Mot => {
                counter += 1;
                motion(t, counter)
            }
            StreamKind::Met => metrics(t),
        };

        if !forward_event(&sender, &running, StreamEvent::new(stream, values).with_time(t)) {
            break;
        }
    }
}

fn band_power(t: f64) -> Vec<f64> {
    (0..CANONICAL_BANDS.len())
        .map(|i| 2.0 + (TAU * 0.1 * t + i as f64).sin())
        .collect()
}

fn motion(t: f64, counter: u64) -> Vec<f64> {
    let mut values = vec![(counter % 128) as f64];
    values.extend((0..MOTION_COLUMNS.len() - 1).map(|i| 100.0 * (TAU * 0.5 * t + i as f64).sin()));
    values
}

fn metrics(t: f64) -> Vec<f64> {
    METRIC_COLUMNS
        .iter()
        .enumerate()
        .map(|(i, col)| {
            if col.ends_with(".isActive") {
                1.0
            } else {
                0.5 + 0.4 * (TAU * 0.02 * t + i as f64).sin()
            }
        })
        .collect()
}
