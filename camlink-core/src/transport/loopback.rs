//! In-memory transport.
//!
//! Records the body of every connection instead of writing to a socket.
//! Used for `--dry-run` on the device and for deterministic pipeline
//! tests, which can inject connect failures, short writes, slow writes and
//! remote closes.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::UplinkError;
use crate::transport::LinkState;
use crate::transport::multipart::Endpoint;

/// Recording transport. Clones share the same recorder.
#[derive(Clone, Default)]
pub struct LoopbackTransport {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    link: LinkState,
    state: Mutex<Recorder>,
}

#[derive(Default)]
struct Recorder {
    discard: bool,
    connections: Vec<Vec<u8>>,
    connect_count: usize,
    fail_connects: u32,
    /// Bytes the current connection accepts before it is cut.
    budget: Option<usize>,
    severed: bool,
    write_delay: Duration,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count bytes without keeping them.
    pub fn discarding() -> Self {
        let transport = Self::default();
        transport.state().discard = true;
        transport
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.state().fail_connects = n;
    }

    /// Accept `bytes` more body bytes, then fail the write that crosses the
    /// limit with a short write and drop the connection.
    pub fn cut_after(&self, bytes: usize) {
        self.state().budget = Some(bytes);
    }

    /// Delay every send by `delay`.
    pub fn set_write_delay(&self, delay: Duration) {
        self.state().write_delay = delay;
    }

    /// Simulate the server closing the connection. The next write fails.
    pub fn drop_connection(&self) {
        self.state().severed = true;
    }

    /// Body bytes recorded per connection, oldest first.
    pub fn connections(&self) -> Vec<Vec<u8>> {
        self.state().connections.clone()
    }

    /// Successful connects so far.
    pub fn connect_count(&self) -> usize {
        self.state().connect_count
    }

    pub(crate) fn link(&self) -> &LinkState {
        &self.inner.link
    }

    pub(crate) async fn connect(&self, url: &str) -> Result<(), UplinkError> {
        let link = &self.inner.link;
        Endpoint::parse(url).map_err(|e| link.fail(e))?;

        let mut state = self.state();
        if link.is_connected() {
            debug!("loopback: closing previous connection before reconnect");
            link.closed();
        }
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(link.fail(UplinkError::Connect(format!(
                "failed to open connection: {url} refused"
            ))));
        }

        state.connect_count += 1;
        state.severed = false;
        if !state.discard {
            state.connections.push(Vec::new());
        }
        link.opened();
        info!("loopback: connection #{} open to {url}", state.connect_count);
        Ok(())
    }

    pub(crate) async fn send(&self, data: &[u8]) -> Result<(), UplinkError> {
        let delay = self.state().write_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let link = &self.inner.link;
        let mut state = self.state();
        if !link.is_connected() {
            return Err(link.fail(UplinkError::NotConnected));
        }

        let accepted = if state.severed {
            0
        } else {
            state.budget.map_or(data.len(), |left| left.min(data.len()))
        };
        if let Some(left) = state.budget.as_mut() {
            *left -= accepted;
        }
        if !state.discard {
            if let Some(current) = state.connections.last_mut() {
                current.extend_from_slice(&data[..accepted]);
            }
        }

        if accepted < data.len() {
            state.budget = None;
            link.closed();
            warn!("loopback: write incomplete: {accepted}/{} bytes", data.len());
            return Err(link.fail(UplinkError::WriteIncomplete {
                written: accepted,
                expected: data.len(),
            }));
        }

        link.add_sent(data.len());
        Ok(())
    }

    pub(crate) async fn disconnect(&self) -> Result<(), UplinkError> {
        let _state = self.state();
        if self.inner.link.is_connected() {
            self.inner.link.closed();
            debug!("loopback: connection closed");
        }
        Ok(())
    }

    fn state(&self) -> MutexGuard<'_, Recorder> {
        // The recorder holds plain data; a poisoned lock is still usable.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ── Tests ────────────────────────────────────────────────────────
