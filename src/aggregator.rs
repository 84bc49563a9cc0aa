//! Session orchestration.
//!
//! The aggregator opens a device session, subscribes to band power, motion
//! and metrics, and routes every incoming sample through
//! reduction/normalization, rolling averaging and the stream synchronizer
//! before handing completed rows to the sink.
//!
//! All event handling happens on the thread that drives [`Aggregator::run`]
//! (or calls [`Aggregator::handle_event`] directly), one event at a time.

use crate::config::Config;
use crate::core::{BandReducer, ColumnNormalizer, RollingAverage, Row, RowLayout, StreamSynchronizer};
use crate::device::{DeviceSession, SessionStatus, StreamEvent, StreamKind, SubscriptionAck};
use crate::error::{SyncError, SyncResult};
use crate::sink::RowSink;
use crate::stats::{SessionStats, SharedSessionStats};
use crossbeam_channel::RecvTimeoutError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest the event loop blocks before re-checking shutdown and stalls.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Smoothing and merge settings for one session.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Rolling window for motion and band power
    pub window_size: usize,
    /// Rolling window for performance metrics
    pub met_window_size: usize,
    /// Emit the pending row after this long without an emission (zero disables)
    pub stall_timeout: Duration,
    /// Canonical band channels, in output order
    pub bands: Vec<String>,
    /// Device prefix stripped from motion column names
    pub motion_prefix: String,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for AggregatorConfig {
    fn from(config: &Config) -> Self {
        Self {
            window_size: config.window_size,
            met_window_size: config.met_window_size,
            stall_timeout: config.stall_timeout,
            bands: config.bands.clone(),
            motion_prefix: config.motion_prefix.clone(),
        }
    }
}

/// Processing applied to one stream before it reaches the synchronizer.
#[derive(Debug)]
struct StreamRoute {
    reducer: Option<BandReducer>,
    average: RollingAverage,
}

/// A running aggregation session.
pub struct Aggregator<D: DeviceSession, S: RowSink> {
    device: D,
    sink: S,
    /// Dispatch table: stream key -> route. Emptied on stop.
    routes: HashMap<StreamKind, StreamRoute>,
    sync: StreamSynchronizer,
    stats: SharedSessionStats,
    stall_timeout: Duration,
    last_emit: Instant,
    stopped: bool,
}

impl<D: DeviceSession, S: RowSink> Aggregator<D, S> {
    /// Open a session and subscribe to all three streams.
    ///
    /// Any failure aborts startup: the session is closed again and the error
    /// is returned. Subscriptions are not retried.
    pub fn start(device: D, config: &AggregatorConfig, sink: S) -> SyncResult<Self> {
        Self::start_with_stats(device, config, sink, Arc::new(SessionStats::new()))
    }

    /// Like [`start`](Self::start), recording into the given stats.
    pub fn start_with_stats(
        mut device: D,
        config: &AggregatorConfig,
        sink: S,
        stats: SharedSessionStats,
    ) -> SyncResult<Self> {
        device.create_session()?;

        let (routes, sync) = match build_routes(&mut device, config) {
            Ok(built) => built,
            Err(e) => {
                abort_session(&mut device);
                return Err(e);
            }
        };

        tracing::info!(
            "Aggregating {} channels (window {}, metrics window {})",
            sync.layout().len(),
            config.window_size,
            config.met_window_size
        );

        Ok(Self {
            device,
            sink,
            routes,
            sync,
            stats,
            stall_timeout: config.stall_timeout,
            last_emit: Instant::now(),
            stopped: false,
        })
    }

    /// Process one event synchronously.
    ///
    /// Returns whether a row was emitted. After [`stop`](Self::stop) every
    /// event is ignored.
    pub fn handle_event(&mut self, event: StreamEvent) -> SyncResult<bool> {
        if self.stopped {
            return Ok(false);
        }
        self.stats.record_event(event.stream);

        let Some(route) = self.routes.get_mut(&event.stream) else {
            tracing::debug!("No route for '{}' events", event.stream);
            return Ok(false);
        };

        let reduced;
        let values: &[f64] = match &route.reducer {
            Some(reducer) => {
                reduced = reducer.reduce(&event.values)?;
                &reduced
            }
            None => &event.values,
        };
        let means = route.average.update(values)?;

        match self.sync.offer(event.stream, means)? {
            Some(row) => {
                self.emit(row)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Emit the pending row if nothing has been emitted within the stall
    /// timeout and at least one stream has fresh values.
    pub fn flush_if_stalled(&mut self, now: Instant) -> SyncResult<bool> {
        if self.stopped
            || self.stall_timeout.is_zero()
            || now.saturating_duration_since(self.last_emit) < self.stall_timeout
        {
            return Ok(false);
        }

        match self.sync.flush() {
            Some(row) => {
                tracing::debug!(
                    "No row for {:?}; flushing pending values",
                    self.stall_timeout
                );
                self.stats.record_stall_flush();
                self.emit(row)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Consume device events until `running` is cleared, the device stream
    /// ends, or the session is stopped.
    ///
    /// Per-event failures are logged and the event is dropped; the session
    /// keeps going.
    pub fn run(&mut self, running: &AtomicBool) -> SyncResult<()> {
        let receiver = self.device.events().clone();
        let poll = if self.stall_timeout.is_zero() {
            POLL_INTERVAL
        } else {
            POLL_INTERVAL.min(self.stall_timeout)
        };

        while running.load(Ordering::SeqCst) && !self.stopped {
            match receiver.recv_timeout(poll) {
                Ok(event) => self.dispatch(event),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::info!("Device event stream ended");
                    break;
                }
            }

            if let Err(e) = self.flush_if_stalled(Instant::now()) {
                tracing::warn!("Stall flush failed: {}", e);
            }
        }

        Ok(())
    }

    /// Unsubscribe, close the session and release the sink.
    ///
    /// Safe to call more than once; later calls do nothing. Events still
    /// queued are discarded and no row is emitted afterwards.
    pub fn stop(&mut self) -> SyncResult<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        self.routes.clear();

        let unsubscribed = self.device.unsubscribe(&StreamKind::ALL);
        let closed = self.device.update_session(SessionStatus::Close);

        let discarded = self.device.events().try_iter().count();
        if discarded > 0 {
            tracing::debug!("Discarded {} queued events at shutdown", discarded);
        }

        let finished = self.sink.finish();
        tracing::info!("Session stopped after {} rows", self.stats.rows_emitted());

        unsubscribed?;
        closed?;
        finished?;
        Ok(())
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Row as it currently stands, without emitting it.
    pub fn current_row(&self) -> Row {
        self.sync.current()
    }

    /// Channel names of emitted rows, in order.
    pub fn channels(&self) -> &[String] {
        self.sync.layout().channels()
    }

    /// Rows written to the sink so far.
    pub fn rows_emitted(&self) -> u64 {
        self.stats.rows_emitted()
    }

    pub fn stats(&self) -> SharedSessionStats {
        Arc::clone(&self.stats)
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    fn dispatch(&mut self, event: StreamEvent) {
        let stream = event.stream;
        match self.handle_event(event) {
            Ok(_) => {}
            Err(SyncError::Sink(e)) => {
                tracing::error!("Failed to write row: {}", e);
            }
            Err(e) => {
                tracing::warn!("Dropping '{}' event: {}", stream, e);
                self.stats.record_dropped();
            }
        }
    }

    /// Hand a completed row to the sink. Only rows the sink accepts count
    /// as emitted.
    fn emit(&mut self, row: Row) -> SyncResult<()> {
        self.last_emit = Instant::now();
        if let Err(e) = self.sink.write_row(&row) {
            self.stats.record_sink_error();
            return Err(e.into());
        }
        self.stats.record_row();
        Ok(())
    }
}

impl<D: DeviceSession, S: RowSink> Drop for Aggregator<D, S> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!("Error stopping session: {}", e);
        }
    }
}

/// Subscribe and build the per-stream routes and synchronizer.
fn build_routes<D: DeviceSession>(
    device: &mut D,
    config: &AggregatorConfig,
) -> SyncResult<(HashMap<StreamKind, StreamRoute>, StreamSynchronizer)> {
    let ack = device.subscribe(&StreamKind::ALL)?;
    let [pow, mot, met] = required_headers(&ack)?;

    let reducer = BandReducer::new(&config.bands, &pow)?;
    let mot_cols = ColumnNormalizer::new(config.motion_prefix.as_str()).normalize_all(&mot);
    let band_cols = reducer.bands().to_vec();

    let layout = RowLayout::new(&[
        (StreamKind::Mot, mot_cols.clone()),
        (StreamKind::Met, met.clone()),
        (StreamKind::Pow, band_cols.clone()),
    ])?;

    let mut routes = HashMap::new();
    routes.insert(
        StreamKind::Mot,
        StreamRoute {
            reducer: None,
            average: RollingAverage::new(mot_cols, config.window_size)?.with_label("mot"),
        },
    );
    routes.insert(
        StreamKind::Met,
        StreamRoute {
            reducer: None,
            average: RollingAverage::new(met, config.met_window_size)?.with_label("met"),
        },
    );
    routes.insert(
        StreamKind::Pow,
        StreamRoute {
            reducer: Some(reducer),
            average: RollingAverage::new(band_cols, config.window_size)?.with_label("bands"),
        },
    );

    Ok((routes, StreamSynchronizer::new(layout)))
}

/// Column headers for pow, mot and met, or the streams that failed.
fn required_headers(ack: &SubscriptionAck) -> SyncResult<[Vec<String>; 3]> {
    for failure in &ack.failure {
        tracing::warn!(
            "Subscription to '{}' failed ({}): {}",
            failure.stream,
            failure.code,
            failure.message
        );
    }

    let missing = ack.missing(&StreamKind::ALL);
    if !missing.is_empty() {
        return Err(SyncError::Subscription {
            missing: missing.iter().map(|s| s.key().to_string()).collect(),
        });
    }

    for header in &ack.success {
        tracing::info!(
            "Subscribed to '{}' ({} columns)",
            header.stream,
            header.cols.len()
        );
        tracing::debug!("'{}' columns: {}", header.stream, header.cols.join(","));
    }

    let cols = |stream| {
        ack.header(stream)
            .map(|h| h.cols.clone())
            .unwrap_or_default()
    };
    Ok([cols(StreamKind::Pow), cols(StreamKind::Mot), cols(StreamKind::Met)])
}

/// Best-effort teardown after a failed start.
fn abort_session<D: DeviceSession>(device: &mut D) {
    if let Err(e) = device.unsubscribe(&StreamKind::ALL) {
        tracing::debug!("Unsubscribe during aborted start failed: {}", e);
    }
    if let Err(e) = device.update_session(SessionStatus::Close) {
        tracing::warn!("Could not close session after failed start: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceError, StreamHeader, SubscriptionFailure};
    use crate::sink::MemorySink;
    use crossbeam_channel::{unbounded, Receiver, Sender};
    use std::sync::Mutex;

    /// Scripted device that records the calls made to it.
    struct MockDevice {
        ack: SubscriptionAck,
        calls: Arc<Mutex<Vec<String>>>,
        sender: Option<Sender<StreamEvent>>,
        receiver: Receiver<StreamEvent>,
    }

    impl MockDevice {
        fn new(ack: SubscriptionAck) -> Self {
            let (sender, receiver) = unbounded();
            Self {
                ack,
                calls: Arc::new(Mutex::new(Vec::new())),
                sender: Some(sender),
                receiver,
            }
        }

        fn log(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
    }

    impl DeviceSession for MockDevice {
        fn create_session(&mut self) -> Result<(), DeviceError> {
            self.log("create");
            Ok(())
        }

        fn subscribe(&mut self, _streams: &[StreamKind]) -> Result<SubscriptionAck, DeviceError> {
            self.log("subscribe");
            Ok(self.ack.clone())
        }

        fn unsubscribe(&mut self, _streams: &[StreamKind]) -> Result<(), DeviceError> {
            self.log("unsubscribe");
            Ok(())
        }

        fn update_session(&mut self, status: SessionStatus) -> Result<(), DeviceError> {
            self.log(format!("status:{status:?}"));
            Ok(())
        }

        fn events(&self) -> &Receiver<StreamEvent> {
            &self.receiver
        }
    }

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn small_ack() -> SubscriptionAck {
        SubscriptionAck {
            success: vec![
                StreamHeader::new(
                    StreamKind::Pow,
                    strings(&["AF3/theta", "IED_AF3/theta", "AF3/alpha", "IED_AF3/alpha"]),
                ),
                StreamHeader::new(StreamKind::Mot, strings(&["IMD_GYROX", "IMD_ACCY"])),
                StreamHeader::new(StreamKind::Met, strings(&["eng", "foc"])),
            ],
            failure: vec![],
        }
    }

    fn small_config(window: usize) -> AggregatorConfig {
        AggregatorConfig {
            window_size: window,
            met_window_size: 1,
            stall_timeout: Duration::ZERO,
            bands: strings(&["AF3/theta", "AF3/alpha"]),
            motion_prefix: "IMD_".to_string(),
        }
    }

    fn start(window: usize) -> Aggregator<MockDevice, MemorySink> {
        Aggregator::start(
            MockDevice::new(small_ack()),
            &small_config(window),
            MemorySink::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_layout_is_motion_metrics_bands() {
        let agg = start(1);

        assert_eq!(
            agg.channels(),
            &["gyroX", "accY", "eng", "foc", "AF3/theta", "AF3/alpha"]
        );
        assert_eq!(*agg.device().calls.lock().unwrap(), vec!["create", "subscribe"]);
    }

    #[test]
    fn test_events_flow_to_sink() {
        let mut agg = start(1);

        let events = [
            StreamEvent::new(StreamKind::Pow, vec![1.0, 3.0, 2.0, 4.0]),
            StreamEvent::new(StreamKind::Met, vec![0.5, 0.7]),
            StreamEvent::new(StreamKind::Mot, vec![10.0, 20.0]),
            StreamEvent::new(StreamKind::Mot, vec![11.0, 21.0]),
        ];
        let emitted: Vec<bool> = events
            .into_iter()
            .map(|e| agg.handle_event(e).unwrap())
            .collect();
        assert_eq!(emitted, vec![false, false, false, true]);

        let row = &agg.sink().rows[0];
        assert_eq!(row.values(), &[10.0, 20.0, 0.5, 0.7, 2.0, 3.0]);
        assert_eq!(agg.current_row().get("gyroX"), Some(11.0));
    }

    #[test]
    fn test_shape_mismatch_is_dropped_not_fatal() {
        let mut agg = start(2);

        agg.dispatch(StreamEvent::new(StreamKind::Mot, vec![1.0]));
        agg.dispatch(StreamEvent::new(StreamKind::Pow, vec![1.0, 2.0]));
        agg.dispatch(StreamEvent::new(StreamKind::Mot, vec![1.0, 2.0]));

        let stats = agg.stats().snapshot();
        assert_eq!(stats.events_dropped, 2);
        assert_eq!(stats.mot_events, 2);
        assert_eq!(agg.current_row().get("accY"), Some(2.0));
    }

    #[test]
    fn test_failed_subscription_closes_session() {
        let mut ack = small_ack();
        ack.success.retain(|h| h.stream != "met");
        ack.failure.push(SubscriptionFailure {
            stream: "met".into(),
            code: -32016,
            message: "no license".into(),
        });

        let device = MockDevice::new(ack);
        let calls = Arc::clone(&device.calls);
        let err = Aggregator::start(device, &small_config(1), MemorySink::new())
            .err()
            .unwrap();

        assert!(matches!(err, SyncError::Subscription { ref missing } if missing == &["met"]));
        assert!(err.to_string().contains("met"));
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["create", "subscribe", "unsubscribe", "status:Close"]
        );
    }

    #[test]
    fn test_unknown_band_aborts_start() {
        let mut ack = small_ack();
        ack.success[0].cols.push("AF3/delta".into());

        let err = Aggregator::start(MockDevice::new(ack), &small_config(1), MemorySink::new())
            .err()
            .unwrap();
        assert!(matches!(err, SyncError::UnknownBand { column } if column == "AF3/delta"));
    }

    #[test]
    fn test_stall_flush_respects_timeout() {
        let mut config = small_config(1);
        config.stall_timeout = Duration::from_millis(50);
        let mut agg =
            Aggregator::start(MockDevice::new(small_ack()), &config, MemorySink::new()).unwrap();

        // Nothing fresh yet.
        assert!(!agg
            .flush_if_stalled(Instant::now() + Duration::from_secs(1))
            .unwrap());

        agg.handle_event(StreamEvent::new(StreamKind::Met, vec![0.1, 0.2]))
            .unwrap();
        assert!(agg
            .flush_if_stalled(Instant::now() + Duration::from_secs(1))
            .unwrap());

        assert_eq!(agg.sink().rows.len(), 1);
        assert_eq!(agg.stats().snapshot().stall_flushes, 1);
    }

    #[test]
    fn test_stall_flush_disabled_at_zero() {
        let mut agg = start(1);
        agg.handle_event(StreamEvent::new(StreamKind::Met, vec![0.1, 0.2]))
            .unwrap();
        assert!(!agg
            .flush_if_stalled(Instant::now() + Duration::from_secs(60))
            .unwrap());
    }

    #[test]
    fn test_stop_is_idempotent_and_final() {
        let mut agg = start(1);
        agg.handle_event(StreamEvent::new(StreamKind::Mot, vec![1.0, 1.0]))
            .unwrap();
        if let Some(sender) = &agg.device.sender {
            sender
                .send(StreamEvent::new(StreamKind::Mot, vec![2.0, 2.0]))
                .unwrap();
        }

        agg.stop().unwrap();
        agg.stop().unwrap();

        assert!(agg.is_stopped());
        assert!(agg.sink().finished);
        assert!(agg.device().receiver.is_empty());
        assert_eq!(
            *agg.device().calls.lock().unwrap(),
            vec!["create", "subscribe", "unsubscribe", "status:Close"]
        );

        // Would complete a round if the session were still live.
        let emitted = agg
            .handle_event(StreamEvent::new(StreamKind::Mot, vec![3.0, 3.0]))
            .unwrap();
        assert!(!emitted);
        assert!(agg.sink().rows.is_empty());
    }

    #[test]
    fn test_run_until_device_disconnects() {
        let mut device = MockDevice::new(small_ack());
        if let Some(sender) = device.sender.take() {
            for i in 0..4 {
                sender
                    .send(StreamEvent::new(StreamKind::Mot, vec![i as f64, 0.0]))
                    .unwrap();
            }
        }

        let mut agg = Aggregator::start(device, &small_config(1), MemorySink::new()).unwrap();
        let running = AtomicBool::new(true);
        agg.run(&running).unwrap();

        assert_eq!(agg.rows_emitted(), 3);
        assert_eq!(agg.stats().snapshot().mot_events, 4);
    }

    #[test]
    fn test_failed_writes_are_not_counted_as_rows() {
        let failing = crate::sink::CallbackSink(|row: &Row| -> std::io::Result<()> {
            if row.seq == 0 {
                Err(std::io::Error::other("disk full"))
            } else {
                Ok(())
            }
        });
        let mut agg =
            Aggregator::start(MockDevice::new(small_ack()), &small_config(1), failing).unwrap();

        for i in 0..3 {
            agg.dispatch(StreamEvent::new(StreamKind::Mot, vec![i as f64, 0.0]));
        }

        let stats = agg.stats().snapshot();
        assert_eq!(agg.rows_emitted(), 1);
        assert_eq!(stats.rows_emitted, 1);
        assert_eq!(stats.sink_errors, 1);
        assert_eq!(stats.events_dropped, 0);
    }

    #[test]
    fn test_drop_closes_session() {
        let agg = start(1);
        let calls = Arc::clone(&agg.device().calls);
        drop(agg);
        assert_eq!(calls.lock().unwrap().last().map(String::as_str), Some("status:Close"));
    }
}
