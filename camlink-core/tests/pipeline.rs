//! Integration tests: full pipeline against a real HTTP-ish server on
//! localhost. Covers the request head, part framing and ordering,
//! reconnection after the server drops the stream, and escalation when
//! nobody is listening.

use std::time::Duration;

use camlink_core::frame::pattern_sequence;
use camlink_core::{
    CaptureParams, ConnectionState, Controller, Event, FrameSource, HttpMultipartTransport,
    MemoryRecoveryStore, PatternSource, RecordingSink, RunOutcome, StreamConfig, Transport,
};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

// ── Helpers ──────────────────────────────────────────────────────

async fn ephemeral_listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, format!("http://{addr}/input"))
}

fn pattern(frame_len: usize) -> FrameSource {
    FrameSource::Pattern(PatternSource::with_frame_len(CaptureParams::default(), frame_len))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Split a request into its head and the complete parts of its body.
fn split_request(raw: &[u8]) -> (String, Vec<Vec<u8>>) {
    let head_end = find(raw, b"\r\n\r\n").expect("request head") + 4;
    let head = String::from_utf8(raw[..head_end].to_vec()).unwrap();

    let mut parts = Vec::new();
    let mut rest = &raw[head_end..];
    while let Some(start) = find(rest, b"\r\n--wheelbot\r\n") {
        let after = &rest[start..];
        let Some(len_at) = find(after, b"Content-Length: ") else {
            break;
        };
        let len_line = &after[len_at + 16..];
        let eol = find(len_line, b"\r\n").unwrap();
        let len: usize = std::str::from_utf8(&len_line[..eol]).unwrap().parse().unwrap();
        let body_start = len_at + find(&after[len_at..], b"\r\n\r\n").unwrap() + 4;
        if after.len() < body_start + len {
            break;
        }
        parts.push(after[body_start..body_start + len].to_vec());
        rest = &after[body_start + len..];
    }
    (head, parts)
}

fn fast_config() -> StreamConfig {
    StreamConfig {
        reconnect_interval_ms: 100,
        max_reconnect_interval_ms: 400,
        restart_delay_ms: 100,
        shutdown_grace_ms: 20,
        ..Default::default()
    }
}

// ── Streaming ────────────────────────────────────────────────────

#[tokio::test]
async fn test_stream_reaches_server_in_order() {
    let (listener, url) = ephemeral_listener().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await.unwrap();
        raw
    });

    let config = fast_config();
    let sink = RecordingSink::new();
    let mut store = MemoryRecoveryStore::default();
    let mut controller = Controller::new(
        config.clone(),
        url,
        pattern(2_000),
        Transport::HttpMultipart(HttpMultipartTransport::new(config)),
        &sink,
        &mut store,
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        trigger.cancel();
    });
    let outcome = controller.run(cancel).await.unwrap();
    assert_eq!(outcome, RunOutcome::Stopped);

    let raw = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server timed out")
        .unwrap();
    let (head, parts) = split_request(&raw);

    assert!(head.starts_with("POST /input HTTP/1.1\r\n"));
    assert!(head.contains("Content-Type: multipart/x-mixed-replace; boundary=wheelbot\r\n"));
    assert!(head.contains("X-Framerate: 60\r\n"));

    assert!(!parts.is_empty());
    assert_eq!(parts.len() as u64, controller.frames_sent());
    let seqs: Vec<u64> = parts.iter().map(|p| pattern_sequence(p).unwrap()).collect();
    assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1), "out of order: {seqs:?}");
    assert!(parts.iter().all(|p| p.len() == 2_000));

    let stats = controller.pool_stats();
    assert_eq!(stats.outstanding, 0);
    assert_eq!(stats.acquired, stats.released);
    assert_eq!(sink.count(|e| *e == Event::Connected), 1);
}

#[tokio::test]
async fn test_reconnects_after_server_drops_stream() {
    let (listener, url) = ephemeral_listener().await;
    let server = tokio::spawn(async move {
        // First connection: read a little, then hang up.
        let (mut first, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 512];
        let _ = first.read(&mut buf).await.unwrap();
        drop(first);

        // Second connection: a fresh POST.
        let (mut second, _) = listener.accept().await.unwrap();
        let mut head = vec![0u8; 64];
        second.read_exact(&mut head).await.unwrap();
        head
    });

    let config = fast_config();
    let sink = RecordingSink::new();
    let mut store = MemoryRecoveryStore::default();
    // Large frames keep writing after the hang-up and surface the reset.
    let mut controller = Controller::new(
        config.clone(),
        url,
        pattern(64 * 1024),
        Transport::HttpMultipart(HttpMultipartTransport::new(config)),
        &sink,
        &mut store,
    );

    let cancel = CancellationToken::new();
    let run = controller.run(cancel.clone());
    let reconnected = async {
        let head = tokio::time::timeout(Duration::from_secs(10), server)
            .await
            .expect("no reconnect within 10s")
            .unwrap();
        cancel.cancel();
        head
    };
    let (outcome, head) = tokio::join!(run, reconnected);

    assert_eq!(outcome.unwrap(), RunOutcome::Stopped);
    assert!(head.starts_with(b"POST /input HTTP/1.1\r\n"));
    assert_eq!(controller.connect_failures(), 0);
    assert!(sink.count(|e| matches!(e, Event::SendError(_))) >= 1);
    assert!(sink.count(|e| *e == Event::Connected) >= 2);
    assert_eq!(controller.pool_stats().outstanding, 0);
}

// ── Escalation ───────────────────────────────────────────────────

#[tokio::test]
async fn test_refused_connections_escalate_once() {
    // Bind then drop to get a port nobody listens on.
    let (listener, url) = ephemeral_listener().await;
    drop(listener);

    let config = StreamConfig {
        max_send_failures: 3,
        ..fast_config()
    };
    let sink = RecordingSink::new();
    let mut store = MemoryRecoveryStore::default();
    let outcome = {
        let mut controller = Controller::new(
            config.clone(),
            url,
            pattern(1_000),
            Transport::HttpMultipart(HttpMultipartTransport::new(config)),
            &sink,
            &mut store,
        );
        let outcome = tokio::time::timeout(
            Duration::from_secs(10),
            controller.run(CancellationToken::new()),
        )
        .await
        .expect("escalation timed out")
        .unwrap();
        assert_eq!(controller.state(), ConnectionState::Idle);
        assert_eq!(controller.connect_failures(), 0);
        assert!(controller.is_awaiting_recovery());
        outcome
    };

    assert_eq!(outcome, RunOutcome::Restart);
    assert_eq!(store.requests, 1);
    assert_eq!(sink.count(|e| matches!(e, Event::Error(_))), 3);
    assert_eq!(sink.count(|e| *e == Event::Connected), 0);
}
