//! Background sender worker.
//!
//! The controller hands [`FrameChunk`]s to a bounded queue; a single
//! spawned worker drains it and writes each chunk, header then payload,
//! through the shared [`Transport`]. Outcomes flow back to the controller
//! as [`SenderEvent`]s over an unbounded channel.
//!
//! ```text
//! Controller ──enqueue (10 ms)──► [ bounded queue ] ──recv (100 ms)──► worker ──► Transport
//!     ▲                                                                   │
//!     └──────────────────────── SenderEvent ◄─────────────────────────────┘
//! ```
//!
//! Every frame that enters the queue leaves it exactly once: written and
//! released by the worker, or released by the shutdown drain.

pub mod chunk;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::StreamConfig;
use crate::error::UplinkError;
use crate::transport::Transport;

pub use chunk::{FrameChunk, MAX_HEADER_LEN, Rejected};

/// Poll period while waiting for the worker to end.
const STOP_POLL: std::time::Duration = std::time::Duration::from_millis(100);

// ── Events ───────────────────────────────────────────────────────

/// Outcome of one transmitted chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderEvent {
    /// A frame was fully written; carries the payload length.
    FrameSent(usize),
    /// A frame could not be written; carries the transport's last error.
    SendError(String),
}

/// Point-in-time copy of the sender counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    pub bytes_sent: u64,
    pub frames_sent: u64,
    pub consecutive_failures: u32,
    pub queue_len: usize,
}

#[derive(Debug, Default)]
struct Counters {
    bytes_sent: AtomicU64,
    frames_sent: AtomicU64,
    consecutive_failures: AtomicU32,
    /// Wire bytes handed to the queue and not yet fully processed.
    pending_bytes: AtomicUsize,
}

// ── Sender ───────────────────────────────────────────────────────

/// Owns the frame queue and the worker that drains it.
pub struct Sender {
    config: StreamConfig,
    transport: Arc<Transport>,
    counters: Arc<Counters>,
    tx: Option<mpsc::Sender<FrameChunk>>,
    rx: Option<Arc<Mutex<mpsc::Receiver<FrameChunk>>>>,
    events_tx: mpsc::UnboundedSender<SenderEvent>,
    events_rx: mpsc::UnboundedReceiver<SenderEvent>,
    cancel: CancellationToken,
    ended: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Sender {
    pub fn new(config: StreamConfig, transport: Arc<Transport>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            transport,
            counters: Arc::new(Counters::default()),
            tx: None,
            rx: None,
            events_tx,
            events_rx,
            cancel: CancellationToken::new(),
            ended: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Create the queue and spawn the worker. Starting a running sender is a
    /// no-op.
    pub fn start(&mut self) -> Result<(), UplinkError> {
        if self.handle.is_some() {
            warn!("sender already running");
            return Ok(());
        }
        if self.config.queue_capacity == 0 {
            return Err(UplinkError::Config("queue_capacity must be at least 1".into()));
        }

        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        let rx = Arc::new(Mutex::new(rx));
        self.cancel = CancellationToken::new();
        self.ended = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            transport: Arc::clone(&self.transport),
            counters: Arc::clone(&self.counters),
            events: self.events_tx.clone(),
            cancel: self.cancel.clone(),
            ended: Arc::clone(&self.ended),
            config: self.config.clone(),
        };
        self.handle = Some(tokio::spawn(worker.run(Arc::clone(&rx))));
        self.tx = Some(tx);
        self.rx = Some(rx);

        info!(
            "sender started (queue capacity {}, transport {})",
            self.config.queue_capacity,
            self.transport.kind()
        );
        Ok(())
    }

    /// Hand a chunk to the worker, waiting briefly for queue space.
    ///
    /// On failure the chunk comes back and the caller must release its
    /// frame.
    pub async fn enqueue(&self, chunk: FrameChunk) -> Result<(), Rejected<FrameChunk>> {
        let Some(tx) = self.tx.as_ref().filter(|_| self.is_running()) else {
            return Err(Rejected {
                item: chunk,
                reason: UplinkError::SenderStopped,
            });
        };

        let wire_len = chunk.wire_len();
        self.counters.pending_bytes.fetch_add(wire_len, Ordering::AcqRel);
        match tx.send_timeout(chunk, self.config.enqueue_timeout()).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.counters.pending_bytes.fetch_sub(wire_len, Ordering::AcqRel);
                let (item, reason) = match err {
                    SendTimeoutError::Timeout(chunk) => (chunk, UplinkError::QueueFull),
                    SendTimeoutError::Closed(chunk) => (chunk, UplinkError::SenderStopped),
                };
                Err(Rejected { item, reason })
            }
        }
    }

    /// Stop the worker and release every frame still queued.
    ///
    /// Order: signal stop, grace period, wait for the worker to end, abort
    /// it if it did not, drain the queue, drop the queue.
    pub async fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        info!("stopping sender");
        self.cancel.cancel();
        sleep(self.config.shutdown_grace()).await;

        let deadline = Instant::now() + self.config.shutdown_timeout();
        while !self.ended.load(Ordering::Acquire) && Instant::now() < deadline {
            sleep(STOP_POLL).await;
        }
        if !self.ended.load(Ordering::Acquire) {
            warn!(
                "sender worker still busy after {:?}, aborting",
                self.config.shutdown_timeout()
            );
            handle.abort();
        }
        if let Err(e) = handle.await {
            if !e.is_cancelled() {
                error!("sender worker panicked: {e}");
            }
        }

        if let Some(rx) = self.rx.take() {
            let mut rx = rx.lock().await;
            let mut drained = 0usize;
            while let Ok(chunk) = rx.try_recv() {
                self.counters
                    .pending_bytes
                    .fetch_sub(chunk.wire_len(), Ordering::AcqRel);
                chunk.into_frame().release();
                drained += 1;
            }
            rx.close();
            if drained > 0 {
                debug!("released {drained} queued frames on shutdown");
            }
        }
        // An aborted worker drops its in-flight chunk without accounting.
        self.counters.pending_bytes.store(0, Ordering::Release);
        self.tx = None;
        info!("sender stopped");
    }

    /// Next outcome reported by the worker, if any.
    pub fn try_next_event(&mut self) -> Option<SenderEvent> {
        self.events_rx.try_recv().ok()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some() && !self.ended.load(Ordering::Acquire)
    }

    pub fn queue_len(&self) -> usize {
        self.tx
            .as_ref()
            .map_or(0, |tx| tx.max_capacity() - tx.capacity())
    }

    /// Wire bytes queued or in flight.
    pub fn pending_bytes(&self) -> usize {
        self.counters.pending_bytes.load(Ordering::Acquire)
    }

    /// Payload bytes written since the sender was created.
    pub fn bytes_sent(&self) -> u64 {
        self.counters.bytes_sent.load(Ordering::Acquire)
    }

    pub fn frames_sent(&self) -> u64 {
        self.counters.frames_sent.load(Ordering::Acquire)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.counters.consecutive_failures.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> SenderStats {
        SenderStats {
            bytes_sent: self.bytes_sent(),
            frames_sent: self.frames_sent(),
            consecutive_failures: self.consecutive_failures(),
            queue_len: self.queue_len(),
        }
    }
}

impl Drop for Sender {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

// ── Worker ───────────────────────────────────────────────────────

struct Worker {
    transport: Arc<Transport>,
    counters: Arc<Counters>,
    events: mpsc::UnboundedSender<SenderEvent>,
    cancel: CancellationToken,
    ended: Arc<AtomicBool>,
    config: StreamConfig,
}

impl Worker {
    async fn run(self, rx: Arc<Mutex<mpsc::Receiver<FrameChunk>>>) {
        // Held for the worker's lifetime; the drain in `stop` takes it back.
        let mut rx = rx.lock_owned().await;
        debug!("sender worker running");

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = timeout(self.config.dequeue_timeout(), rx.recv()) => next,
            };
            let chunk = match next {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(_) => continue,
            };
            if self.cancel.is_cancelled() {
                self.discard(chunk);
                break;
            }

            let pause = if self.transmit(chunk).await {
                self.config.task_delay()
            } else {
                self.config.send_error_delay()
            };
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(pause) => {}
            }
        }

        self.ended.store(true, Ordering::Release);
        debug!("sender worker ended");
    }

    /// Write one chunk and release its frame. Returns whether it was sent.
    async fn transmit(&self, chunk: FrameChunk) -> bool {
        let result = self.write(&chunk).await;
        let wire_len = chunk.wire_len();
        let payload_len = chunk.payload().len();
        chunk.into_frame().release();
        self.counters
            .pending_bytes
            .fetch_sub(wire_len, Ordering::AcqRel);

        match result {
            Ok(()) => {
                self.counters
                    .bytes_sent
                    .fetch_add(payload_len as u64, Ordering::AcqRel);
                self.counters.frames_sent.fetch_add(1, Ordering::AcqRel);
                self.counters.consecutive_failures.store(0, Ordering::Release);
                trace!(payload_len, "frame sent");
                let _ = self.events.send(SenderEvent::FrameSent(payload_len));
                true
            }
            Err(e) => {
                let attempt = self
                    .counters
                    .consecutive_failures
                    .fetch_add(1, Ordering::AcqRel)
                    + 1;
                let max = self.config.max_send_failures;
                if attempt == 1 {
                    error!("failed to send frame: {e}");
                } else {
                    warn!(
                        "failed to send frame: {e} (attempt {attempt}/{max}, {} remaining)",
                        max.saturating_sub(attempt)
                    );
                }
                let _ = self
                    .events
                    .send(SenderEvent::SendError(self.transport.last_error()));
                false
            }
        }
    }

    async fn write(&self, chunk: &FrameChunk) -> Result<(), UplinkError> {
        if !chunk.header().is_empty() {
            self.transport.send(chunk.header()).await?;
        }
        self.transport.send(chunk.payload()).await
    }

    fn discard(&self, chunk: FrameChunk) {
        self.counters
            .pending_bytes
            .fetch_sub(chunk.wire_len(), Ordering::AcqRel);
        chunk.into_frame().release();
        debug!("released frame dequeued during shutdown");
    }
}

// ── Tests ────────────────────────────────────────────────────────
