//! Connection controller.
//!
//! The [`Controller`] owns the frame source, the transport and the sender.
//! Each [`tick`](Controller::tick) it:
//!
//! 1. forwards sender outcomes to the event sink,
//! 2. drives the status indicator and the metrics window,
//! 3. paces capture to `max_fps`,
//! 4. (re)connects when the retry interval has elapsed,
//! 5. captures a frame and hands it to the sender.
//!
//! It never writes frame bytes itself. Connect failures back off
//! exponentially; after `max_send_failures` consecutive ones the controller
//! sets the recovery flag on the configuration store and asks for a
//! restart.

pub mod metrics;
pub mod recovery;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::StreamConfig;
use crate::error::UplinkError;
use crate::events::EventSink;
use crate::frame::{FrameFormat, FrameHandle, FrameSource, PoolStats};
use crate::sender::{FrameChunk, Sender, SenderEvent};
use crate::status::{IndicatorOutput, StatusIndicator};
use crate::transport::{Transport, part_header};

pub use metrics::{MetricsReport, MetricsWindow};
pub use recovery::{MemoryRecoveryStore, RecoveryStore};
pub use state::{Backoff, ConnectionState};

/// Sleep inside the capture gap.
const THROTTLE_SLEEP: Duration = Duration::from_millis(1);
/// Sleep between ticks that did no work.
const IDLE_SLEEP: Duration = Duration::from_millis(10);

// ── Outcomes ─────────────────────────────────────────────────────

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Inside the capture gap.
    Throttled,
    /// Not streaming and no connect attempt due.
    Waiting,
    /// A connect attempt succeeded.
    Connected,
    /// A connect attempt failed.
    ConnectFailed,
    /// The link went down or was rotated.
    Disconnected,
    /// A frame was handed to the sender.
    FrameQueued,
    /// A frame was captured and released without being sent.
    FrameDropped,
    /// The source produced no frame this cycle.
    CaptureFailed,
    /// Too many consecutive connect failures; restart the device.
    RestartRequested,
}

impl Tick {
    /// Whether the loop should pause before the next tick.
    fn is_idle(self) -> bool {
        !matches!(self, Self::Throttled | Self::FrameQueued | Self::Connected)
    }
}

/// Why [`Controller::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Cancelled by the caller.
    Stopped,
    /// Escalated; the recovery flag is set and the process should restart.
    Restart,
}

// ── Controller ───────────────────────────────────────────────────

pub struct Controller<'a> {
    config: StreamConfig,
    url: String,
    source: FrameSource,
    transport: Arc<Transport>,
    sender: Sender,
    sink: &'a dyn EventSink,
    store: &'a mut dyn RecoveryStore,

    state: ConnectionState,
    backoff: Backoff,
    connect_failures: u32,
    last_attempt: Option<Instant>,
    last_frame: Option<Instant>,
    awaiting_recovery: bool,
    frames_enqueued: u64,

    metrics: MetricsWindow,
    indicator: StatusIndicator,
}

impl<'a> Controller<'a> {
    pub fn new(
        config: StreamConfig,
        url: impl Into<String>,
        source: FrameSource,
        transport: Transport,
        sink: &'a dyn EventSink,
        store: &'a mut dyn RecoveryStore,
    ) -> Self {
        let transport = Arc::new(transport);
        Self {
            sender: Sender::new(config.clone(), Arc::clone(&transport)),
            backoff: Backoff::from_config(&config),
            metrics: MetricsWindow::new(config.metrics_interval()),
            indicator: StatusIndicator::new(IndicatorOutput::Disabled),
            config,
            url: url.into(),
            source,
            transport,
            sink,
            store,
            state: ConnectionState::Idle,
            connect_failures: 0,
            last_attempt: None,
            last_frame: None,
            awaiting_recovery: false,
            frames_enqueued: 0,
        }
    }

    /// Drive a status LED instead of only tracking the level.
    pub fn with_indicator(mut self, output: IndicatorOutput) -> Self {
        self.indicator = StatusIndicator::new(output);
        self
    }

    /// Start the sender and make the first connect attempt.
    pub async fn setup(&mut self) -> Result<Tick, UplinkError> {
        info!(
            "starting uplink to {} over {} ({} buffers, queue {})",
            self.url,
            self.transport.kind(),
            self.source.pool().capacity(),
            self.config.queue_capacity
        );
        self.sender.start()?;
        let now = Instant::now();
        self.metrics.poll(now);
        Ok(self.attempt_connect(now).await)
    }

    /// Run one controller cycle.
    pub async fn tick(&mut self) -> Tick {
        let now = Instant::now();
        self.forward_sender_events().await;
        self.indicator.update(self.state, self.awaiting_recovery, now);
        self.poll_metrics(now);

        if self.awaiting_recovery {
            return Tick::Waiting;
        }

        if let (Some(gap), Some(last)) = (self.config.frame_interval(), self.last_frame) {
            if now.saturating_duration_since(last) < gap {
                sleep(THROTTLE_SLEEP).await;
                return Tick::Throttled;
            }
        }

        if self.state.can_connect() {
            let due = self
                .last_attempt
                .is_none_or(|t| now.saturating_duration_since(t) >= self.backoff.interval());
            if !due {
                return Tick::Waiting;
            }
            return self.attempt_connect(now).await;
        }

        if !self.state.is_streaming() {
            return Tick::Waiting;
        }
        if !self.transport.is_connected() {
            warn!("stream connection lost");
            self.go_idle();
            return Tick::Disconnected;
        }

        match self.source.acquire() {
            Ok(frame) => self.deliver(frame, now).await,
            Err(e) => {
                warn!("frame capture failed: {e}");
                Tick::CaptureFailed
            }
        }
    }

    /// Tick until cancelled or until a restart is needed, then shut down.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<RunOutcome, UplinkError> {
        let mut tick = self.setup().await?;
        loop {
            if tick == Tick::RestartRequested {
                self.linger(self.config.restart_delay(), &cancel).await;
                self.shutdown().await;
                return Ok(RunOutcome::Restart);
            }
            if cancel.is_cancelled() {
                break;
            }
            if tick.is_idle() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(IDLE_SLEEP) => {}
                }
            }
            tick = self.tick().await;
        }

        info!("uplink cancelled");
        self.shutdown().await;
        Ok(RunOutcome::Stopped)
    }

    /// Stop the sender, release queued frames and close the stream.
    pub async fn shutdown(&mut self) {
        self.sender.stop().await;
        self.forward_sender_events().await;
        if let Err(e) = self.transport.disconnect().await {
            warn!("error closing stream: {e}");
        }
        self.state.reset();
        self.indicator.off();

        let pool = self.source.pool().stats();
        info!(
            "uplink stopped: {} frames / {} bytes sent, {} enqueued, {} buffers outstanding",
            self.sender.frames_sent(),
            self.sender.bytes_sent(),
            self.frames_enqueued,
            pool.outstanding
        );
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Frames enqueued during the last metrics window.
    pub fn current_fps(&self) -> u32 {
        self.metrics.last_fps()
    }

    pub fn bytes_sent(&self) -> u64 {
        self.sender.bytes_sent()
    }

    pub fn frames_sent(&self) -> u64 {
        self.sender.frames_sent()
    }

    pub fn frames_enqueued(&self) -> u64 {
        self.frames_enqueued
    }

    pub fn queue_len(&self) -> usize {
        self.sender.queue_len()
    }

    pub fn connect_failures(&self) -> u32 {
        self.connect_failures
    }

    /// Current reconnect delay.
    pub fn retry_interval(&self) -> Duration {
        self.backoff.interval()
    }

    pub fn is_awaiting_recovery(&self) -> bool {
        self.awaiting_recovery
    }

    pub fn indicator_on(&self) -> bool {
        self.indicator.is_on()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.source.pool().stats()
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    // ── Connection handling ──────────────────────────────────────

    async fn attempt_connect(&mut self, now: Instant) -> Tick {
        if let Err(e) = self.state.begin_connect() {
            debug!("connect skipped: {e}");
            return Tick::Waiting;
        }
        self.last_attempt = Some(now);
        self.indicator.update(self.state, self.awaiting_recovery, now);
        info!("connecting to {}", self.url);

        match self.transport.connect(&self.url).await {
            Ok(()) => {
                log_transition(self.state.connected());
                self.backoff.reset();
                self.connect_failures = 0;
                info!("streaming to {}", self.url);
                self.sink.on_connected();
                Tick::Connected
            }
            Err(e) => {
                log_transition(self.state.fail());
                self.teardown().await;
                self.sink.on_error(&e.to_string());

                self.connect_failures += 1;
                let next = self.backoff.record_failure();
                let max = self.config.max_send_failures;
                if self.connect_failures >= max {
                    return self.escalate();
                }
                warn!(
                    "reconnect failure {}/{max} ({} remaining), next attempt in {}ms",
                    self.connect_failures,
                    max - self.connect_failures,
                    next.as_millis()
                );
                Tick::ConnectFailed
            }
        }
    }

    fn escalate(&mut self) -> Tick {
        error!(
            "{} consecutive connect failures, entering recovery mode and requesting restart",
            self.config.max_send_failures
        );
        self.connect_failures = 0;
        if !self.awaiting_recovery {
            if let Err(e) = self.store.request_recovery() {
                error!("could not set recovery flag: {e}");
            }
            self.awaiting_recovery = true;
        }
        Tick::RestartRequested
    }

    /// Streaming → Idle after the link went away.
    fn go_idle(&mut self) {
        log_transition(self.state.link_down());
        self.sink.on_disconnected();
    }

    async fn teardown(&self) {
        if let Err(e) = self.transport.disconnect().await {
            debug!("disconnect after failure: {e}");
        }
    }

    async fn forward_sender_events(&mut self) {
        while let Some(event) = self.sender.try_next_event() {
            match event {
                SenderEvent::FrameSent(size) => self.sink.on_frame_sent(size),
                SenderEvent::SendError(message) => {
                    self.sink.on_send_error(&message);
                    if self.state.is_streaming() {
                        warn!("send failed while streaming: {message}");
                        log_transition(self.state.fail());
                        self.teardown().await;
                        self.sink.on_error(&message);
                    }
                }
            }
        }
    }

    // ── Frame delivery ───────────────────────────────────────────

    async fn deliver(&mut self, frame: FrameHandle, now: Instant) -> Tick {
        if frame.format() != FrameFormat::Jpeg {
            warn!("skipping {} frame, only jpeg is streamed", frame.format());
            self.source.release(frame);
            return Tick::FrameDropped;
        }

        let len = frame.len();
        let pending = self.sender.pending_bytes() as u64;
        let sent = self.transport.bytes_sent();
        let projected = sent + pending + 2 * len as u64;
        let fresh = sent == 0 && pending == 0;
        if projected > self.config.max_data_size && fresh {
            // Rotating would not make room; send it and rotate after.
            warn!(
                "{len} byte frame exceeds the {} byte connection budget",
                self.config.max_data_size
            );
        } else if projected > self.config.max_data_size {
            self.source.release(frame);
            if pending > 0 {
                // Let the queue drain into this connection first.
                return Tick::FrameDropped;
            }
            info!(
                "{} bytes sent on this connection, rotating stream",
                self.transport.bytes_sent()
            );
            self.teardown().await;
            self.go_idle();
            self.last_attempt = None;
            return Tick::Disconnected;
        }

        let header = part_header(&self.config.boundary, len, frame.timestamp());
        let chunk = match FrameChunk::new(frame, header) {
            Ok(chunk) => chunk,
            Err(rejected) => {
                warn!("dropping frame: {}", rejected.reason);
                self.source.release(rejected.item);
                return Tick::FrameDropped;
            }
        };

        match self.sender.enqueue(chunk).await {
            Ok(()) => {
                self.metrics.record_frame();
                self.frames_enqueued += 1;
                self.last_frame = Some(now);
                Tick::FrameQueued
            }
            Err(rejected) => {
                warn!("{}, dropping frame", rejected.reason);
                self.source.release(rejected.item.into_frame());
                Tick::FrameDropped
            }
        }
    }

    fn poll_metrics(&mut self, now: Instant) {
        if let Some(report) = self.metrics.poll(now) {
            let bytes = self.sender.bytes_sent();
            info!("FPS: {}, Bytes: {}", report.frames, bytes);
            self.sink.on_metrics_update(report.frames, bytes);
        }
    }

    /// Keep the indicator going for `delay` before a restart.
    async fn linger(&mut self, delay: Duration, cancel: &CancellationToken) {
        let deadline = Instant::now() + delay;
        while Instant::now() < deadline && !cancel.is_cancelled() {
            self.indicator
                .update(self.state, self.awaiting_recovery, Instant::now());
            sleep(IDLE_SLEEP).await;
        }
    }
}

fn log_transition(result: Result<(), UplinkError>) {
    if let Err(e) = result {
        debug!("{e}");
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CaptureParams;
    use crate::events::{Event, RecordingSink};
    use crate::frame::{PatternSource, pattern_sequence};
    use crate::transport::LoopbackTransport;

    const URL: &str = "http://10.0.0.2:8080/input";

    fn source(frame_len: usize) -> FrameSource {
        FrameSource::Pattern(PatternSource::with_frame_len(CaptureParams::default(), frame_len))
    }

    /// Tick for `span` of (paused) time, pausing the way `run` does.
    async fn drive(controller: &mut Controller<'_>, span: Duration) -> Vec<Tick> {
        let deadline = Instant::now() + span;
        let mut ticks = Vec::new();
        while Instant::now() < deadline {
            let tick = controller.tick().await;
            if tick.is_idle() {
                sleep(IDLE_SLEEP).await;
            }
            ticks.push(tick);
        }
        ticks
    }

    /// Split a recorded body into part payloads.
    fn parts(body: &[u8]) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let mut rest = body;
        while let Some(start) = find(rest, b"Content-Length: ") {
            let after = &rest[start + 16..];
            let eol = find(after, b"\r\n").unwrap();
            let len: usize = std::str::from_utf8(&after[..eol]).unwrap().parse().unwrap();
            let body_start = find(after, b"\r\n\r\n").unwrap() + 4;
            out.push(after[body_start..body_start + len].to_vec());
            rest = &after[body_start + len..];
        }
        out
    }

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    #[tokio::test(start_paused = true)]
    async fn streams_frames_in_order() {
        let loopback = LoopbackTransport::new();
        let sink = RecordingSink::new();
        let mut store = MemoryRecoveryStore::default();
        let mut controller = Controller::new(
            StreamConfig::default(),
            URL,
            source(300),
            Transport::Loopback(loopback.clone()),
            &sink,
            &mut store,
        );

        assert_eq!(controller.setup().await.unwrap(), Tick::Connected);
        assert_eq!(controller.state(), ConnectionState::Streaming);
        drive(&mut controller, Duration::from_millis(500)).await;
        controller.shutdown().await;

        let body = &loopback.connections()[0];
        assert!(body.starts_with(b"\r\n--wheelbot\r\nContent-Type: image/jpeg\r\nContent-Length: 300\r\n"));
        let seqs: Vec<u64> = parts(body)
            .iter()
            .map(|p| pattern_sequence(p).unwrap())
            .collect();
        assert!(seqs.len() >= 10);
        assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1));
        assert_eq!(controller.frames_sent(), seqs.len() as u64);
        assert_eq!(controller.bytes_sent(), 300 * seqs.len() as u64);

        let stats = controller.pool_stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.acquired, stats.released);
        assert_eq!(
            sink.count(|e| matches!(e, Event::FrameSent(300))),
            seqs.len()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn capture_is_paced_by_max_fps() {
        let loopback = LoopbackTransport::discarding();
        let sink = RecordingSink::new();
        let mut store = MemoryRecoveryStore::default();
        let config = StreamConfig {
            max_fps: 10,
            ..Default::default()
        };
        let mut controller = Controller::new(
            config,
            URL,
            source(100),
            Transport::Loopback(loopback),
            &sink,
            &mut store,
        );
        controller.setup().await.unwrap();
        drive(&mut controller, Duration::from_millis(1000)).await;
        let enqueued = controller.frames_enqueued();
        assert!((9..=11).contains(&enqueued), "enqueued {enqueued}");
        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_then_escalation() {
        let loopback = LoopbackTransport::new();
        loopback.fail_next_connects(10);
        let sink = RecordingSink::new();
        let mut store = MemoryRecoveryStore::default();
        {
            let mut controller = Controller::new(
                StreamConfig::default(),
                URL,
                source(100),
                Transport::Loopback(loopback.clone()),
                &sink,
                &mut store,
            );

            assert_eq!(controller.setup().await.unwrap(), Tick::ConnectFailed);
            assert_eq!(controller.state(), ConnectionState::Error);
            assert_eq!(controller.connect_failures(), 1);
            assert_eq!(controller.retry_interval(), Duration::from_millis(5000));

            // Nothing happens before the interval is up.
            let ticks = drive(&mut controller, Duration::from_millis(4900)).await;
            assert!(ticks.iter().all(|t| *t == Tick::Waiting));

            let ticks = drive(&mut controller, Duration::from_millis(200)).await;
            assert!(ticks.contains(&Tick::ConnectFailed));
            assert_eq!(controller.connect_failures(), 2);
            assert_eq!(controller.retry_interval(), Duration::from_millis(10000));

            let ticks = drive(&mut controller, Duration::from_millis(10100)).await;
            assert_eq!(
                ticks.iter().filter(|t| **t == Tick::RestartRequested).count(),
                1
            );
            assert_eq!(controller.connect_failures(), 0);
            assert!(controller.is_awaiting_recovery());

            // No further attempts once recovery is pending.
            let ticks = drive(&mut controller, Duration::from_secs(30)).await;
            assert!(ticks.iter().all(|t| *t == Tick::Waiting));
            controller.shutdown().await;
        }
        assert_eq!(store.requests, 1);
        assert_eq!(sink.count(|e| matches!(e, Event::Error(_))), 3);
        assert_eq!(loopback.connect_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_failure_counter() {
        let loopback = LoopbackTransport::new();
        loopback.fail_next_connects(2);
        let sink = RecordingSink::new();
        let mut store = MemoryRecoveryStore::default();
        let mut controller = Controller::new(
            StreamConfig::default(),
            URL,
            source(100),
            Transport::Loopback(loopback.clone()),
            &sink,
            &mut store,
        );

        controller.setup().await.unwrap();
        drive(&mut controller, Duration::from_millis(5050)).await;
        assert_eq!(controller.connect_failures(), 2);
        drive(&mut controller, Duration::from_millis(10050)).await;

        assert_eq!(controller.state(), ConnectionState::Streaming);
        assert_eq!(controller.connect_failures(), 0);
        assert_eq!(controller.retry_interval(), Duration::from_millis(5000));
        assert!(!controller.is_awaiting_recovery());
        assert_eq!(sink.count(|e| *e == Event::Connected), 1);
        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn send_error_moves_to_error_without_escalating() {
        let loopback = LoopbackTransport::new();
        let sink = RecordingSink::new();
        let mut store = MemoryRecoveryStore::default();
        let mut controller = Controller::new(
            StreamConfig::default(),
            URL,
            source(100),
            Transport::Loopback(loopback.clone()),
            &sink,
            &mut store,
        );
        controller.setup().await.unwrap();
        drive(&mut controller, Duration::from_millis(100)).await;

        loopback.drop_connection();
        let ticks = drive(&mut controller, Duration::from_millis(200)).await;
        assert!(!ticks.contains(&Tick::Disconnected));
        assert_eq!(controller.state(), ConnectionState::Error);
        assert_eq!(controller.connect_failures(), 0);
        assert_eq!(sink.count(|e| matches!(e, Event::SendError(_))), 1);
        assert_eq!(sink.count(|e| matches!(e, Event::Error(_))), 1);

        // Reconnects once the retry interval since the last attempt is up.
        drive(&mut controller, Duration::from_secs(5)).await;
        assert_eq!(controller.state(), ConnectionState::Streaming);
        assert_eq!(loopback.connect_count(), 2);
        controller.shutdown().await;

        let stats = controller.pool_stats();
        assert_eq!(stats.acquired, stats.released);
    }

    #[tokio::test(start_paused = true)]
    async fn rotates_connection_before_byte_cap() {
        let loopback = LoopbackTransport::new();
        let sink = RecordingSink::new();
        let mut store = MemoryRecoveryStore::default();
        let config = StreamConfig {
            max_data_size: 2_000,
            ..Default::default()
        };
        let mut controller = Controller::new(
            config,
            URL,
            source(200),
            Transport::Loopback(loopback.clone()),
            &sink,
            &mut store,
        );
        controller.setup().await.unwrap();
        drive(&mut controller, Duration::from_millis(1000)).await;
        controller.shutdown().await;

        let connections = loopback.connections();
        assert!(connections.len() >= 2);
        assert!(connections.iter().all(|c| c.len() <= 2_000));
        assert!(sink.count(|e| *e == Event::Disconnected) >= 1);
        assert_eq!(controller.connect_failures(), 0);

        // Every part on every connection is complete.
        let total: usize = connections.iter().map(|c| parts(c).len()).sum();
        assert_eq!(total as u64, controller.frames_sent());
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_frame_still_sent_on_fresh_connection() {
        let loopback = LoopbackTransport::new();
        let sink = RecordingSink::new();
        let mut store = MemoryRecoveryStore::default();
        let config = StreamConfig {
            max_data_size: 1_000,
            ..Default::default()
        };
        let mut controller = Controller::new(
            config,
            URL,
            source(600),
            Transport::Loopback(loopback.clone()),
            &sink,
            &mut store,
        );
        controller.setup().await.unwrap();
        drive(&mut controller, Duration::from_millis(1000)).await;
        controller.shutdown().await;

        let frames = controller.frames_sent();
        assert!(frames >= 5, "frames sent {frames}");

        // One frame per connection, then a rotation.
        let connections = loopback.connections();
        assert!(connections.iter().all(|c| parts(c).len() <= 1));
        let total: usize = connections.iter().map(|c| parts(c).len()).sum();
        assert_eq!(total as u64, frames);
        assert!(loopback.connect_count() as u64 <= frames + 1);
        assert_eq!(controller.pool_stats().outstanding, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn non_jpeg_frames_are_skipped() {
        let loopback = LoopbackTransport::new();
        let sink = RecordingSink::new();
        let mut store = MemoryRecoveryStore::default();
        let source = FrameSource::Pattern(
            PatternSource::with_frame_len(CaptureParams::default(), 100)
                .with_format(FrameFormat::Rgb565),
        );
        let mut controller = Controller::new(
            StreamConfig::default(),
            URL,
            source,
            Transport::Loopback(loopback.clone()),
            &sink,
            &mut store,
        );
        controller.setup().await.unwrap();
        let ticks = drive(&mut controller, Duration::from_millis(100)).await;
        assert!(ticks.contains(&Tick::FrameDropped));
        assert!(!ticks.contains(&Tick::FrameQueued));
        assert_eq!(controller.pool_stats().outstanding, 0);
        assert!(loopback.connections()[0].is_empty());
        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_pool_skips_cycle() {
        let loopback = LoopbackTransport::new();
        loopback.set_write_delay(Duration::from_secs(1));
        let sink = RecordingSink::new();
        let mut store = MemoryRecoveryStore::default();
        let params = CaptureParams {
            buffer_count: 2,
            ..Default::default()
        };
        let mut controller = Controller::new(
            StreamConfig::default(),
            URL,
            FrameSource::Pattern(PatternSource::with_frame_len(params, 100)),
            Transport::Loopback(loopback),
            &sink,
            &mut store,
        );
        controller.setup().await.unwrap();
        let ticks = drive(&mut controller, Duration::from_millis(200)).await;
        assert!(ticks.contains(&Tick::CaptureFailed));
        assert_eq!(controller.state(), ConnectionState::Streaming);
        controller.shutdown().await;
        assert_eq!(controller.pool_stats().outstanding, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn metrics_reported_each_interval() {
        let loopback = LoopbackTransport::discarding();
        let sink = RecordingSink::new();
        let mut store = MemoryRecoveryStore::default();
        let mut controller = Controller::new(
            StreamConfig::default(),
            URL,
            source(100),
            Transport::Loopback(loopback),
            &sink,
            &mut store,
        );
        controller.setup().await.unwrap();
        drive(&mut controller, Duration::from_millis(2500)).await;

        let metrics: Vec<(u32, u64)> = sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Metrics { fps, bytes } => Some((fps, bytes)),
                _ => None,
            })
            .collect();
        assert_eq!(metrics.len(), 2);
        assert!(metrics[0].0 >= 25 && metrics[0].0 <= 31, "fps {}", metrics[0].0);
        assert!(metrics[1].1 > metrics[0].1);
        assert_eq!(controller.current_fps(), metrics[1].0);
        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn run_returns_restart_after_escalation() {
        let loopback = LoopbackTransport::new();
        loopback.fail_next_connects(u32::MAX);
        let sink = RecordingSink::new();
        let mut store = MemoryRecoveryStore::default();
        let config = StreamConfig {
            max_send_failures: 1,
            ..Default::default()
        };
        let outcome = {
            let mut controller = Controller::new(
                config,
                URL,
                source(100),
                Transport::Loopback(loopback),
                &sink,
                &mut store,
            );
            let outcome = controller.run(CancellationToken::new()).await.unwrap();
            assert_eq!(controller.state(), ConnectionState::Idle);
            outcome
        };
        assert_eq!(outcome, RunOutcome::Restart);
        assert_eq!(store.requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_cancel() {
        let loopback = LoopbackTransport::new();
        let sink = RecordingSink::new();
        let mut store = MemoryRecoveryStore::default();
        let mut controller = Controller::new(
            StreamConfig::default(),
            URL,
            source(100),
            Transport::Loopback(loopback.clone()),
            &sink,
            &mut store,
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });
        let outcome = controller.run(cancel).await.unwrap();
        assert_eq!(outcome, RunOutcome::Stopped);
        assert!(controller.frames_sent() > 0);
        assert!(!controller.transport().is_connected());
        assert_eq!(controller.pool_stats().outstanding, 0);
    }
}
