//! Lifecycle notifications.
//!
//! The controller reports to an [`EventSink`] it borrows from whoever
//! assembled the pipeline. Every method defaults to a no-op so observers
//! implement only what they care about.

use std::sync::Mutex;

use tracing::{debug, error, info, warn};

pub trait EventSink {
    fn on_connected(&self) {}
    fn on_disconnected(&self) {}
    fn on_error(&self, _message: &str) {}
    /// A frame of `size` payload bytes was written to the transport.
    fn on_frame_sent(&self, _size: usize) {}
    fn on_metrics_update(&self, _fps: u32, _bytes: u64) {}
    fn on_send_error(&self, _message: &str) {}
}

/// Ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {}

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_connected(&self) {
        info!("stream connected");
    }

    fn on_disconnected(&self) {
        info!("stream disconnected");
    }

    fn on_error(&self, message: &str) {
        error!("stream error: {message}");
    }

    fn on_frame_sent(&self, size: usize) {
        debug!(size, "frame sent");
    }

    fn on_metrics_update(&self, fps: u32, bytes: u64) {
        debug!(fps, bytes, "metrics update");
    }

    fn on_send_error(&self, message: &str) {
        warn!("send error: {message}");
    }
}

/// One recorded notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connected,
    Disconnected,
    Error(String),
    FrameSent(usize),
    Metrics { fps: u32, bytes: u64 },
    SendError(String),
}

/// Keeps every notification in order. Useful for assertions and for
/// replaying a session's history.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }

    fn push(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl EventSink for RecordingSink {
    fn on_connected(&self) {
        self.push(Event::Connected);
    }

    fn on_disconnected(&self) {
        self.push(Event::Disconnected);
    }

    fn on_error(&self, message: &str) {
        self.push(Event::Error(message.to_string()));
    }

    fn on_frame_sent(&self, size: usize) {
        self.push(Event::FrameSent(size));
    }

    fn on_metrics_update(&self, fps: u32, bytes: u64) {
        self.push(Event::Metrics { fps, bytes });
    }

    fn on_send_error(&self, message: &str) {
        self.push(Event::SendError(message.to_string()));
    }
}

// ── Tests ────────────────────────────────────────────────────────
