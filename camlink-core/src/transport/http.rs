//! HTTP multipart stream over a raw TCP socket.
//!
//! `connect` opens the socket and writes the request head; from then on
//! every `send` appends body bytes. The server's response is never read
//! while streaming: it only arrives once the body is complete or the
//! server gives up, either of which ends the connection.

use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream, lookup_host};
use tokio::sync::Mutex;
use tokio::time::{Instant, timeout};
use tracing::{debug, error, info, warn};

use crate::config::StreamConfig;
use crate::error::UplinkError;
use crate::transport::LinkState;
use crate::transport::multipart::{Endpoint, request_head};

/// Write half of an open stream.
pub(crate) type BoxedStream = Box<dyn AsyncWrite + Send + Unpin>;

/// Streams a multipart body to an HTTP server.
pub struct HttpMultipartTransport {
    config: StreamConfig,
    stream: Mutex<Option<BoxedStream>>,
    pub(crate) link: LinkState,
}

impl HttpMultipartTransport {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            stream: Mutex::new(None),
            link: LinkState::default(),
        }
    }

    pub(crate) async fn connect(&self, url: &str) -> Result<(), UplinkError> {
        let endpoint = Endpoint::parse(url).map_err(|e| self.link.fail(e))?;

        let mut guard = self.stream.lock().await;
        if guard.take().is_some() {
            debug!("closing previous stream before reconnect");
            self.link.closed();
        }

        info!(
            "HTTP: connecting to {url} with {} bytes body budget",
            self.config.max_data_size
        );
        debug!("HTTP: Content-Type: {}", self.config.content_type_header());

        let stream = match timeout(self.config.connect_timeout(), self.open(&endpoint)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                let err = UplinkError::Connect(format!("failed to open connection: {e}"));
                error!("HTTP: could not connect to server: {err}");
                return Err(self.link.fail(err));
            }
            Err(_) => {
                let err = UplinkError::Connect(format!(
                    "failed to open connection: timed out after {:?}",
                    self.config.connect_timeout()
                ));
                error!("HTTP: could not connect to server: {err}");
                return Err(self.link.fail(err));
            }
        };

        *guard = Some(Box::new(stream));
        self.link.opened();
        info!("HTTP: connection established, ready to send chunks");
        Ok(())
    }

    async fn open(&self, endpoint: &Endpoint) -> std::io::Result<TcpStream> {
        let authority = endpoint.authority();
        let addr = lookup_host(&authority).await?.next().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no address for {authority}"),
            )
        })?;
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        apply_buffer_sizes(&socket, &self.config)?;

        let mut stream = socket.connect(addr).await?;
        stream.set_nodelay(true)?;
        stream
            .write_all(request_head(endpoint, &self.config).as_bytes())
            .await?;
        Ok(stream)
    }

    pub(crate) async fn send(&self, data: &[u8]) -> Result<(), UplinkError> {
        let mut guard = self.stream.lock().await;
        let Some(stream) = guard.as_mut() else {
            return Err(self.link.fail(UplinkError::NotConnected));
        };

        let started = Instant::now();
        match write_fully(stream.as_mut(), data, self.config.write_timeout()).await {
            Ok(()) => {
                self.link.add_sent(data.len());
                let took = started.elapsed();
                if took > self.config.slow_chunk_threshold() {
                    warn!(
                        "HTTP: slow chunk send: {}ms for {} bytes",
                        took.as_millis(),
                        data.len()
                    );
                }
                Ok(())
            }
            Err(short) => {
                // Dropping the stream closes the socket.
                guard.take();
                self.link.closed();
                error!(
                    "HTTP: write incomplete: {}/{} bytes ({})",
                    short.written,
                    data.len(),
                    short.cause
                );
                Err(self.link.fail(UplinkError::WriteIncomplete {
                    written: short.written,
                    expected: data.len(),
                }))
            }
        }
    }

    pub(crate) async fn disconnect(&self) -> Result<(), UplinkError> {
        let mut guard = self.stream.lock().await;
        let Some(mut stream) = guard.take() else {
            return Ok(());
        };
        self.link.closed();

        match timeout(self.config.write_timeout(), stream.shutdown()).await {
            Ok(Ok(())) => {
                info!("HTTP: connection closed");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!("HTTP: could not close connection cleanly: {e}");
                Err(self.link.fail(UplinkError::Io(e)))
            }
            Err(_) => {
                warn!("HTTP: close timed out");
                Err(self.link.fail(UplinkError::Timeout(self.config.write_timeout())))
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn attach(&self, stream: BoxedStream) {
        *self.stream.lock().await = Some(stream);
        self.link.opened();
    }
}

// ── Incremental writes ───────────────────────────────────────────

struct ShortWrite {
    written: usize,
    cause: String,
}

/// Write `data` piecewise, giving up on the first error, zero-length write
/// or stalled write.
async fn write_fully<W>(writer: &mut W, data: &[u8], per_write: Duration) -> Result<(), ShortWrite>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut written = 0;
    while written < data.len() {
        match timeout(per_write, writer.write(&data[written..])).await {
            Ok(Ok(0)) => {
                return Err(ShortWrite {
                    written,
                    cause: "connection closed".into(),
                });
            }
            Ok(Ok(n)) => written += n,
            Ok(Err(e)) => {
                return Err(ShortWrite {
                    written,
                    cause: e.to_string(),
                });
            }
            Err(_) => {
                return Err(ShortWrite {
                    written,
                    cause: format!("write stalled for {per_write:?}"),
                });
            }
        }
    }
    writer.flush().await.map_err(|e| ShortWrite {
        written,
        cause: e.to_string(),
    })
}

/// Size the kernel socket buffers from the config. Zero keeps the OS default.
fn apply_buffer_sizes(socket: &TcpSocket, config: &StreamConfig) -> std::io::Result<()> {
    if config.buffer_size > 0 {
        socket.set_recv_buffer_size(clamp_u32(config.buffer_size))?;
    }
    if config.tx_buffer_size > 0 {
        socket.set_send_buffer_size(clamp_u32(config.tx_buffer_size))?;
    }
    Ok(())
}

fn clamp_u32(size: usize) -> u32 {
    u32::try_from(size).unwrap_or(u32::MAX)
}

// ── Tests ────────────────────────────────────────────────────────
