//! HTTP/1.1 request parsing.
//!
//! The head (request line and header block) is read line by line from a
//! buffered stream, every read bounded by an idle timeout. The body is left
//! on the stream and read on demand by [`Request::body`] / [`Request::read`].

use std::fmt;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tokio::time::timeout;
use tracing::debug;

use super::decode::{Params, unquote};
use super::{Headers, Method};

/// The read side of a connection, positioned after whatever has been consumed so far.
pub type BodyReader = Box<dyn AsyncBufRead + Send + Unpin>;

/// Longest request line or header line accepted, in bytes.
const MAX_LINE_LEN: usize = 8 * 1024;

/// Maximum number of header lines we accept per request.
const MAX_HEADERS: usize = 64;

/// Largest `Content-Length` [`Request::parse`] accepts.
pub const DEFAULT_MAX_BODY: usize = 64 * 1024;

/// Upper bound on the up-front allocation for a body, whatever `Content-Length` claims.
const MAX_BODY_PREALLOC: usize = 64 * 1024;

/// Errors that can occur while reading a request head.
///
/// Every variant is answered with `400 Bad Request`.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed request line: {0:?}")]
    InvalidRequestLine(String),

    #[error("malformed header line: {0:?}")]
    InvalidHeader(String),

    #[error("stream ended before the end of the request head")]
    Incomplete,

    #[error("request has no header fields")]
    NoHeaders,

    #[error("line exceeds {max} bytes")]
    LineTooLong { max: usize },

    #[error("more than {max} header lines")]
    TooManyHeaders { max: usize },

    #[error("declared body of {len} bytes exceeds {max}")]
    BodyTooLarge { len: usize, max: usize },

    #[error("request head is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("no data received within {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

enum Body {
    Pending(BodyReader),
    Ready(Bytes),
}

/// A parsed HTTP request.
///
/// Created by [`Request::parse`]. Everything up to the blank line after the
/// headers has been consumed; the body stays on the connection until
/// [`body`](Self::body) (or [`read`](Self::read)) pulls at most
/// `content_length` bytes of it, once.
///
/// # Examples
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use std::time::Duration;
/// use mhttpd::http::Request;
///
/// let raw: &'static [u8] = b"GET /hello%20world?name=ada HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let request = Request::parse(Box::new(raw), Duration::from_secs(2)).await.unwrap();
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.path(), "/hello world");
/// assert_eq!(request.param("name"), Some("ada"));
/// assert_eq!(request.header("host"), Some("localhost"));
/// # }
/// ```
pub struct Request {
    method: Method,
    version: String,
    path: String,
    params: Params,
    headers: Headers,
    content_type: Option<String>,
    content_length: usize,
    read_timeout: Duration,
    body: Body,
}

impl Request {
    /// Reads and parses a request head from `reader`.
    ///
    /// Each line read waits at most `read_timeout` for data.
    ///
    /// # Errors
    ///
    /// - [`ParseError::InvalidRequestLine`]: the first line is not exactly three tokens.
    /// - [`ParseError::InvalidHeader`]: a header line has no `:`.
    /// - [`ParseError::Incomplete`]: the stream ended before the blank line.
    /// - [`ParseError::NoHeaders`]: the header block is empty.
    /// - [`ParseError::BodyTooLarge`]: a POST or PUT declares more than
    ///   [`DEFAULT_MAX_BODY`] bytes.
    /// - [`ParseError::Timeout`], [`ParseError::Io`], [`ParseError::Utf8`],
    ///   [`ParseError::LineTooLong`], [`ParseError::TooManyHeaders`].
    pub async fn parse(reader: BodyReader, read_timeout: Duration) -> Result<Self, ParseError> {
        Self::parse_with_max_body(reader, read_timeout, DEFAULT_MAX_BODY).await
    }

    /// Like [`parse`](Self::parse), rejecting a declared body longer than `max_body`.
    pub async fn parse_with_max_body(
        mut reader: BodyReader,
        read_timeout: Duration,
        max_body: usize,
    ) -> Result<Self, ParseError> {
        let line = read_line(&mut reader, read_timeout)
            .await?
            .ok_or(ParseError::Incomplete)?;

        let tokens: Vec<&str> = line.split_whitespace().collect();
        let &[method, uri, version] = tokens.as_slice() else {
            return Err(ParseError::InvalidRequestLine(line.trim().to_owned()));
        };

        let method: Method = method.parse().unwrap_or_else(|never| match never {});
        let version = version.to_ascii_uppercase();

        let (raw_path, query) = match uri.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (uri, None),
        };
        let path = unquote(raw_path);
        let params = query.map(Params::parse).unwrap_or_default();

        let headers = read_headers(&mut reader, read_timeout).await?;

        let (content_type, content_length) = if method.carries_body() {
            (
                headers.get("content-type").map(str::to_owned),
                headers
                    .get("content-length")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0),
            )
        } else {
            (None, 0)
        };
        if content_length > max_body {
            return Err(ParseError::BodyTooLarge {
                len: content_length,
                max: max_body,
            });
        }

        Ok(Self {
            method,
            version,
            path,
            params,
            headers,
            content_type,
            content_length,
            read_timeout,
            body: Body::Pending(reader),
        })
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the version token of the request line, upper-cased (e.g. `HTTP/1.1`).
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the decoded request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the decoded query parameters.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Returns a decoded query parameter value by key (last occurrence wins).
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key)
    }

    /// Returns the request headers. Names are lower-cased.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns a header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Returns the `Content-Type` of a POST or PUT body.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Returns the declared body length of a POST or PUT request, 0 otherwise.
    pub fn content_length(&self) -> usize {
        self.content_length
    }

    /// Reads the body from the connection, at most `content_length` bytes.
    ///
    /// The first call reads; later calls return the same bytes. Reading stops
    /// early, keeping what arrived, when the peer goes quiet for the read
    /// timeout or closes its side.
    pub async fn body(&mut self) -> Bytes {
        match &mut self.body {
            Body::Ready(bytes) => bytes.clone(),
            Body::Pending(reader) => {
                let bytes = drain_body(reader, self.content_length, self.read_timeout).await;
                self.body = Body::Ready(bytes.clone());
                bytes
            }
        }
    }

    /// Reads the body and decodes it as JSON.
    ///
    /// Returns `None` when the body is empty or is not valid JSON.
    pub async fn read(&mut self) -> Option<serde_json::Value> {
        let body = self.body().await;
        if body.is_empty() {
            return None;
        }
        serde_json::from_slice(&body).ok()
    }

    /// Reads the body and decodes it into `T`.
    pub async fn json<T>(&mut self) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        let body = self.body().await;
        serde_json::from_slice(&body)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("version", &self.version)
            .field("path", &self.path)
            .field("params", &self.params)
            .field("headers", &self.headers)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Reads one line, including its terminator. `Ok(None)` means end of stream.
async fn read_line(reader: &mut BodyReader, idle: Duration) -> Result<Option<String>, ParseError> {
    let mut line = Vec::new();
    let mut limited = (&mut *reader).take(MAX_LINE_LEN as u64 + 1);

    let n = timeout(idle, limited.read_until(b'\n', &mut line))
        .await
        .map_err(|_| ParseError::Timeout(idle))??;

    if n == 0 {
        return Ok(None);
    }
    if line.len() > MAX_LINE_LEN {
        return Err(ParseError::LineTooLong { max: MAX_LINE_LEN });
    }
    Ok(Some(String::from_utf8(line)?))
}

async fn read_headers(reader: &mut BodyReader, idle: Duration) -> Result<Headers, ParseError> {
    let mut headers = Headers::new();
    let mut lines = 0;

    loop {
        let line = read_line(reader, idle).await?.ok_or(ParseError::Incomplete)?;
        let line = line.trim();
        if line.is_empty() {
            break;
        }

        lines += 1;
        if lines > MAX_HEADERS {
            return Err(ParseError::TooManyHeaders { max: MAX_HEADERS });
        }

        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| ParseError::InvalidHeader(line.to_owned()))?;
        headers.set(key.trim().to_ascii_lowercase(), value.trim());
    }

    if headers.is_empty() {
        return Err(ParseError::NoHeaders);
    }
    Ok(headers)
}

async fn drain_body(reader: &mut BodyReader, len: usize, idle: Duration) -> Bytes {
    let mut buf = BytesMut::with_capacity(len.min(MAX_BODY_PREALLOC));

    while buf.len() < len {
        let mut rest = (&mut *reader).take((len - buf.len()) as u64);
        match timeout(idle, rest.read_buf(&mut buf)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                debug!(error = %e, read = buf.len(), "request body read failed");
                break;
            }
            Err(_) => {
                debug!(read = buf.len(), expected = len, "request body read timed out");
                break;
            }
        }
    }

    buf.freeze()
}
