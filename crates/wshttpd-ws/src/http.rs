//! Minimal HTTP/1.1 head parsing and response rendering.
//!
//! Only what the upgrade exchange and plain status replies need: a request
//! or status line, a header block terminated by a blank line, and a reply
//! writer that fills in the default body and lengths.

use std::fmt::Write as _;

use bytes::{Bytes, BytesMut};

use crate::errors::HandshakeError;
use crate::transport::Transport;

/// Upper bound on a request/response header block.
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Content type used for the default status page.
pub const DEFAULT_CONTENT_TYPE: &str = "text/html;charset=utf-8";

/// Reason phrase for a supported status code.
pub fn reason_phrase(code: u16) -> Option<&'static str> {
    let phrase = match code {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        305 => "Use Proxy",
        307 => "Temporary Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Request Entity Too Large",
        414 => "Request-URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Requested Range Not Satisfiable",
        417 => "Expectation Failed",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => return None,
    };
    Some(phrase)
}

/// Ordered header list with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    /// Empty header list.
    pub fn new() -> Self {
        Self::default()
    }

    /// First value for `name`, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Whether the header is present.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Whether the comma-separated value of `name` contains `token`
    /// (case-insensitive).
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get(name).is_some_and(|value| {
            value
                .split(',')
                .any(|part| part.trim().eq_ignore_ascii_case(token))
        })
    }

    /// Append a header.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn parse_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Self, HandshakeError> {
        let mut headers = Self::new();
        for line in lines {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                break;
            }
            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| HandshakeError::MalformedHeader(line.to_owned()))?;
            headers.push(key.trim(), value.trim());
        }
        Ok(headers)
    }
}

/// Parsed request line and headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    /// Request method, e.g. `GET`.
    pub method: String,
    /// Request target as sent (path plus optional query).
    pub target: String,
    /// Protocol version, e.g. `HTTP/1.1`.
    pub version: String,
    /// Header fields.
    pub headers: Headers,
}

impl RequestHead {
    /// Parse a header block (without the terminating blank line).
    pub fn parse(head: &str) -> Result<Self, HandshakeError> {
        let mut lines = head.split('\n');
        let request_line = lines.next().unwrap_or_default().trim();
        let mut parts = request_line.split_whitespace();
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(HandshakeError::MalformedRequest(request_line.to_owned()));
        };
        Ok(Self {
            method: method.to_owned(),
            target: target.to_owned(),
            version: version.to_owned(),
            headers: Headers::parse_lines(lines)?,
        })
    }

    /// Target without the query string.
    pub fn path(&self) -> &str {
        self.target
            .split_once('?')
            .map_or(self.target.as_str(), |(path, _)| path)
    }

    /// Query string, if any.
    pub fn query(&self) -> Option<&str> {
        self.target.split_once('?').map(|(_, query)| query)
    }
}

/// Parsed status line and headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    /// Status code.
    pub status: u16,
    /// Reason phrase as sent.
    pub reason: String,
    /// Header fields.
    pub headers: Headers,
}

impl ResponseHead {
    /// Parse a header block (without the terminating blank line).
    pub fn parse(head: &str) -> Result<Self, HandshakeError> {
        let mut lines = head.split('\n');
        let status_line = lines.next().unwrap_or_default().trim();
        let mut parts = status_line.splitn(3, ' ');
        let _version = parts.next();
        let status = parts
            .next()
            .and_then(|code| code.parse().ok())
            .ok_or_else(|| HandshakeError::MalformedStatus(status_line.to_owned()))?;
        Ok(Self {
            status,
            reason: parts.next().unwrap_or_default().to_owned(),
            headers: Headers::parse_lines(lines)?,
        })
    }
}

/// Locate the blank line ending a header block.
///
/// Returns `(head_len, consumed)`: the length of the head text and the
/// length including the terminating blank line. Bare `\n` line endings are
/// accepted alongside `\r\n`.
pub fn find_head_end(buf: &[u8]) -> Option<(usize, usize)> {
    let mut line_start = 0;
    for (i, &byte) in buf.iter().enumerate() {
        if byte != b'\n' {
            continue;
        }
        let line = &buf[line_start..i];
        if line.is_empty() || line == b"\r" {
            return Some((line_start, i + 1));
        }
        line_start = i + 1;
    }
    None
}

/// Read a header block from `transport`.
///
/// Returns the head text and any bytes that arrived after it; those belong
/// to whatever protocol follows (request body or WebSocket frames).
pub async fn read_head(transport: &mut dyn Transport) -> Result<(String, Bytes), HandshakeError> {
    let mut buf = BytesMut::new();
    loop {
        if let Some((head_len, consumed)) = find_head_end(&buf) {
            let head = String::from_utf8_lossy(&buf[..head_len]).into_owned();
            let rest = buf.split_off(consumed).freeze();
            return Ok((head, rest));
        }
        if buf.len() > MAX_HEAD_SIZE {
            return Err(HandshakeError::HeadTooLarge(MAX_HEAD_SIZE));
        }
        match transport.read_chunk().await? {
            Some(chunk) => buf.extend_from_slice(&chunk),
            None => return Err(HandshakeError::UnexpectedEof),
        }
    }
}

/// An HTTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status code.
    pub status: u16,
    /// Extra header fields, in order.
    pub headers: Headers,
    /// Body and its content type. `None` selects the default status page
    /// (or nothing, for 101).
    pub body: Option<(String, Bytes)>,
}

impl Response {
    /// Bare status reply.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: None,
        }
    }

    /// Attach a body.
    #[must_use]
    pub fn with_body(mut self, content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        self.body = Some((content_type.into(), body.into()));
        self
    }

    /// Add a header field.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(name, value);
        self
    }

    /// Reason phrase for this status; unknown codes render as `Unknown`.
    pub fn reason(&self) -> &'static str {
        reason_phrase(self.status).unwrap_or("Unknown")
    }

    /// Serialize the status line, headers and body.
    ///
    /// `Content-Type` and `Content-Length` accompany every body. A 101 reply
    /// never carries either.
    pub fn to_bytes(&self) -> Bytes {
        let reason = self.reason();
        let mut head = format!("HTTP/1.1 {} {reason}\r\n", self.status);
        for (name, value) in self.headers.iter() {
            let _ = write!(head, "{name}: {value}\r\n");
        }

        let body = if self.status == 101 {
            None
        } else {
            Some(self.body.clone().unwrap_or_else(|| {
                let page = format!(
                    "<!DOCTYPE html><html><head><title>{code}: {reason}</title></head><body><h1>{code}: {reason}</h1></body></html>",
                    code = self.status
                );
                (DEFAULT_CONTENT_TYPE.to_owned(), Bytes::from(page))
            }))
        };

        let mut out = BytesMut::new();
        match body {
            Some((content_type, body)) => {
                let _ = write!(
                    head,
                    "Content-Type: {content_type}\r\nContent-Length: {}\r\n\r\n",
                    body.len()
                );
                out.extend_from_slice(head.as_bytes());
                out.extend_from_slice(&body);
            }
            None => {
                head.push_str("\r\n");
                out.extend_from_slice(head.as_bytes());
            }
        }
        out.freeze()
    }
}
