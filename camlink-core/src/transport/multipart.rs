//! Wire format of the uplink stream.
//!
//! One `POST` per connection; the body is an endless
//! `multipart/x-mixed-replace` stream. Each frame is a part:
//!
//! ```text
//! \r\n--{boundary}\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: {n}\r\n
//! X-Timestamp: {sec}.{usec:06}\r\n
//! \r\n
//! <n raw JPEG bytes>
//! ```

use std::fmt::Write as _;

use bytes::{Bytes, BytesMut};

use crate::config::StreamConfig;
use crate::error::UplinkError;
use crate::frame::CaptureTime;

/// Media type of every part.
pub const PART_CONTENT_TYPE: &str = "image/jpeg";

/// Build the part header that precedes a frame of `len` bytes.
pub fn part_header(boundary: &str, len: usize, timestamp: CaptureTime) -> Bytes {
    let mut buf = BytesMut::with_capacity(96 + boundary.len());
    // Writing into BytesMut cannot fail.
    let _ = write!(
        buf,
        "\r\n--{boundary}\r\nContent-Type: {PART_CONTENT_TYPE}\r\nContent-Length: {len}\r\nX-Timestamp: {timestamp}\r\n\r\n"
    );
    buf.freeze()
}

// ── Endpoint ─────────────────────────────────────────────────────

/// A parsed `http://host[:port][/path]` stream URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Endpoint {
    pub fn parse(url: &str) -> Result<Self, UplinkError> {
        let rest = url
            .strip_prefix("http://")
            .ok_or_else(|| UplinkError::InvalidUrl(format!("{url}: only http:// is supported")))?;

        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };
        if authority.is_empty() {
            return Err(UplinkError::InvalidUrl(format!("{url}: missing host")));
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .ok()
                    .filter(|p| *p != 0)
                    .ok_or_else(|| UplinkError::InvalidUrl(format!("{url}: bad port")))?;
                (host, port)
            }
            None => (authority, 80),
        };
        if host.is_empty() {
            return Err(UplinkError::InvalidUrl(format!("{url}: missing host")));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    /// `host:port` for `TcpStream::connect`.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Value of the `Host` request header.
    pub fn host_header(&self) -> String {
        if self.port == 80 {
            self.host.clone()
        } else {
            self.authority()
        }
    }
}

/// The request line and headers that open a stream.
///
/// `Content-Length` announces the per-connection body budget; the
/// controller rotates the connection before the budget is used up.
pub fn request_head(endpoint: &Endpoint, config: &StreamConfig) -> String {
    format!(
        "POST {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         User-Agent: camlink/{version}\r\n\
         Content-Type: {content_type}\r\n\
         X-Framerate: {fps}\r\n\
         Content-Length: {len}\r\n\
         Connection: close\r\n\
         \r\n",
        path = endpoint.path,
        host = endpoint.host_header(),
        version = env!("CARGO_PKG_VERSION"),
        content_type = config.content_type_header(),
        fps = config.frame_rate,
        len = config.max_data_size,
    )
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_header_exact_bytes() {
        let header = part_header("wheelbot", 12345, CaptureTime::new(100, 500));
        assert_eq!(
            &header[..],
            b"\r\n--wheelbot\r\nContent-Type: image/jpeg\r\nContent-Length: 12345\r\nX-Timestamp: 100.000500\r\n\r\n"
        );

        let header = part_header("wheelbot", 12345, CaptureTime::new(100, 500_000));
        assert_eq!(
            &header[..],
            b"\r\n--wheelbot\r\nContent-Type: image/jpeg\r\nContent-Length: 12345\r\nX-Timestamp: 100.500000\r\n\r\n"
        );
    }

    #[test]
    fn endpoint_parse_variants() {
        let ep = Endpoint::parse("http://192.168.0.2:8080/input").unwrap();
        assert_eq!(ep.host, "192.168.0.2");
        assert_eq!(ep.port, 8080);
        assert_eq!(ep.path, "/input");
        assert_eq!(ep.host_header(), "192.168.0.2:8080");

        let ep = Endpoint::parse("http://camhub.local").unwrap();
        assert_eq!(ep.port, 80);
        assert_eq!(ep.path, "/");
        assert_eq!(ep.host_header(), "camhub.local");
    }

    #[test]
    fn endpoint_rejects_bad_urls() {
        assert!(Endpoint::parse("https://example.com/input").is_err());
        assert!(Endpoint::parse("ftp://example.com").is_err());
        assert!(Endpoint::parse("http://").is_err());
        assert!(Endpoint::parse("http://host:0/").is_err());
        assert!(Endpoint::parse("http://host:99999/").is_err());
        assert!(Endpoint::parse("http://:8080/").is_err());
    }

    #[test]
    fn request_head_headers() {
        let ep = Endpoint::parse("http://10.0.0.5:8080/input").unwrap();
        let head = request_head(&ep, &StreamConfig::default());
        assert!(head.starts_with("POST /input HTTP/1.1\r\n"));
        assert!(head.contains("Host: 10.0.0.5:8080\r\n"));
        assert!(head.contains("Content-Type: multipart/x-mixed-replace; boundary=wheelbot\r\n"));
        assert!(head.contains("X-Framerate: 60\r\n"));
        assert!(head.contains("Content-Length: 100000000\r\n"));
        assert!(head.ends_with("\r\n\r\n"));
    }
}
