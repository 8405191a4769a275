//! Outbound stream transports.
//!
//! A [`Transport`] is one reliable, in-order byte connection with strict
//! failure semantics: any short write is a total failure and tears the
//! connection down. There is no partial-success state.
//!
//! | Variant         | Purpose                                          |
//! |-----------------|--------------------------------------------------|
//! | `HttpMultipart` | TCP socket carrying a multipart `POST` body      |
//! | `Loopback`      | In-memory recorder for dry runs and tests        |
//!
//! The controller and the sender worker share one transport behind an
//! `Arc`; each variant guards its connection handle with a mutex.

pub mod http;
pub mod loopback;
pub mod multipart;

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::UplinkError;

pub use http::HttpMultipartTransport;
pub use loopback::LoopbackTransport;
pub use multipart::{Endpoint, part_header, request_head};

// ── Transport ────────────────────────────────────────────────────

/// The stream transport, selected when the pipeline is assembled.
pub enum Transport {
    HttpMultipart(HttpMultipartTransport),
    Loopback(LoopbackTransport),
}

impl Transport {
    /// Open a new stream to `url`. An existing connection is closed first.
    pub async fn connect(&self, url: &str) -> Result<(), UplinkError> {
        match self {
            Self::HttpMultipart(t) => t.connect(url).await,
            Self::Loopback(t) => t.connect(url).await,
        }
    }

    /// Write all of `data` or fail and disconnect.
    pub async fn send(&self, data: &[u8]) -> Result<(), UplinkError> {
        match self {
            Self::HttpMultipart(t) => t.send(data).await,
            Self::Loopback(t) => t.send(data).await,
        }
    }

    /// Close the stream. A no-op when already disconnected.
    pub async fn disconnect(&self) -> Result<(), UplinkError> {
        match self {
            Self::HttpMultipart(t) => t.disconnect().await,
            Self::Loopback(t) => t.disconnect().await,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link().is_connected()
    }

    /// Body bytes written on the current connection.
    pub fn bytes_sent(&self) -> u64 {
        self.link().bytes_sent()
    }

    /// Message of the most recent failure, empty if none.
    pub fn last_error(&self) -> String {
        self.link().last_error()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::HttpMultipart(_) => "http-multipart",
            Self::Loopback(_) => "loopback",
        }
    }

    fn link(&self) -> &LinkState {
        match self {
            Self::HttpMultipart(t) => &t.link,
            Self::Loopback(t) => t.link(),
        }
    }
}

// ── LinkState ────────────────────────────────────────────────────

/// Connection bookkeeping shared by every transport variant.
///
/// The flag mirrors the guarded connection handle so readers never wait
/// behind an in-flight write.
#[derive(Debug, Default)]
pub(crate) struct LinkState {
    connected: AtomicBool,
    bytes_sent: AtomicU64,
    last_error: Mutex<String>,
}

impl LinkState {
    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Acquire)
    }

    pub(crate) fn last_error(&self) -> String {
        self.last_error
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    pub(crate) fn opened(&self) {
        self.bytes_sent.store(0, Ordering::Release);
        self.connected.store(true, Ordering::Release);
    }

    pub(crate) fn closed(&self) {
        self.connected.store(false, Ordering::Release);
    }

    pub(crate) fn add_sent(&self, n: usize) {
        self.bytes_sent.fetch_add(n as u64, Ordering::AcqRel);
    }

    /// Record `err` as the last error and hand it back.
    pub(crate) fn fail(&self, err: UplinkError) -> UplinkError {
        if let Ok(mut last) = self.last_error.lock() {
            *last = err.to_string();
        }
        err
    }
}

// ── Tests ────────────────────────────────────────────────────────
