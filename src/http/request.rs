//! HTTP/1.1 request head parsing.
//!
//! # Responsibilities
//! - Read the request line and headers from a raw socket
//! - Bound the head size before anything is allocated for it
//! - Leave bytes that follow the head in the buffer (pipelined frames)
//!
//! # Design Decisions
//! - Only the head is parsed; upgrade requests carry no body
//! - Header lookup is case-insensitive, values keep their original case

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Errors while reading a request head.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request head exceeds {0} bytes")]
    TooLarge(usize),

    #[error("malformed request line")]
    MalformedRequestLine,

    #[error("malformed header line")]
    MalformedHeader,

    #[error("request head is not valid UTF-8")]
    NotUtf8,

    #[error("connection closed before the request head was complete")]
    UnexpectedEof,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A parsed request head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    /// Request target as sent, e.g. `/?room=lobby`.
    pub target: String,
    pub version: String,
    headers: Vec<(String, String)>,
}

impl Request {
    /// First value of the named header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Path component of the target.
    pub fn path(&self) -> &str {
        match self.target.split_once('?') {
            Some((path, _)) => path,
            None => &self.target,
        }
    }

    /// Query string without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        self.target.split_once('?').map(|(_, query)| query)
    }
}

/// Try to parse a complete head from `buf`.
///
/// Returns `Ok(None)` while the terminating blank line has not arrived, and
/// otherwise the request plus the number of bytes it occupied.
pub fn parse_head(buf: &[u8]) -> Result<Option<(Request, usize)>, RequestError> {
    let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
        return Ok(None);
    };
    let head = std::str::from_utf8(&buf[..end]).map_err(|_| RequestError::NotUtf8)?;
    let mut lines = head.split("\r\n");

    let request_line = lines.next().ok_or(RequestError::MalformedRequestLine)?;
    let mut parts = request_line.split(' ');
    let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(v), None) if !m.is_empty() && t.starts_with('/') => (m, t, v),
        _ => return Err(RequestError::MalformedRequestLine),
    };
    if !version.starts_with("HTTP/1.") {
        return Err(RequestError::MalformedRequestLine);
    }

    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line.split_once(':').ok_or(RequestError::MalformedHeader)?;
        if name.is_empty() || name.contains(|c: char| c.is_ascii_whitespace()) {
            return Err(RequestError::MalformedHeader);
        }
        headers.push((name.to_string(), value.trim().to_string()));
    }

    Ok(Some((
        Request {
            method: method.to_string(),
            target: target.to_string(),
            version: version.to_string(),
            headers,
        },
        end + 4,
    )))
}

/// Read from `reader` until a full head is buffered, then parse it.
///
/// Anything after the head stays in `buf`.
pub async fn read_head<R>(
    reader: &mut R,
    buf: &mut BytesMut,
    max_bytes: usize,
) -> Result<Request, RequestError>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some((request, used)) = parse_head(buf)? {
            if used > max_bytes {
                return Err(RequestError::TooLarge(max_bytes));
            }
            buf.advance(used);
            return Ok(request);
        }
        if buf.len() >= max_bytes {
            return Err(RequestError::TooLarge(max_bytes));
        }
        buf.reserve(1024);
        if reader.read_buf(buf).await? == 0 {
            return Err(RequestError::UnexpectedEof);
        }
    }
}
