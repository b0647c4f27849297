//! HTTP/1.1 response serialization.
//!
//! [`ResponseWriter`] writes a status line, headers and body straight onto the
//! connection. Every response carries `Connection: close`; the connection is
//! never reused.

use std::io;
use std::path::Path;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

use super::{Headers, StatusCode};

/// Value of the `Server` header.
pub const SERVER_NAME: &str = "mhttpd";

/// Content type used when the caller gives none.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Size of the buffer files are streamed through.
const FILE_CHUNK: usize = 1024;

/// Writes responses onto a byte sink.
///
/// # Examples
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> std::io::Result<()> {
/// use mhttpd::http::{ResponseWriter, StatusCode};
///
/// let mut writer = ResponseWriter::new(Vec::new());
/// writer
///     .write_status(StatusCode::Ok, None, Some("text/plain"), Some("utf-8"), "hi")
///     .await?;
///
/// let text = String::from_utf8(writer.into_inner()).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Type: text/plain; charset=utf-8\r\n"));
/// assert!(text.ends_with("Connection: close\r\n\r\nhi"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ResponseWriter<W> {
    sink: W,
}

impl<W> ResponseWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Wraps a byte sink.
    pub fn new(sink: W) -> Self {
        Self { sink }
    }

    /// Writes a complete response with an in-memory body.
    ///
    /// Headers are written in this order: caller `headers`, `Content-Type`
    /// (defaulting to `application/octet-stream`, with `; charset=` appended
    /// when both a type and a charset are given), `Content-Length` when the
    /// body is non-empty, `Server`, `Connection: close`.
    pub async fn write_status(
        &mut self,
        status: StatusCode,
        headers: Option<&Headers>,
        content_type: Option<&str>,
        charset: Option<&str>,
        body: impl Into<Bytes>,
    ) -> io::Result<()> {
        let body = body.into();
        let head = preamble(status, headers, content_type, charset, None, body.len() as u64);
        self.sink.write_all(&head).await?;
        if !body.is_empty() {
            self.sink.write_all(&body).await?;
        }
        Ok(())
    }

    /// Streams a file as a `200 OK` response.
    ///
    /// A file of size 0, or anything that is not a regular file, is answered
    /// with `403 Forbidden` instead; a file that cannot be stat'ed with
    /// `404 Not Found`. If reading fails after the head and part of the body
    /// have gone out, a `500` error response is appended to the partial body.
    ///
    /// Returns the status the exchange ended with.
    pub async fn write_file(
        &mut self,
        path: &Path,
        content_type: &str,
        encoding: Option<&str>,
    ) -> io::Result<StatusCode> {
        let size = match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => 0,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "static file vanished before stat");
                self.error(StatusCode::NotFound).await?;
                return Ok(StatusCode::NotFound);
            }
        };
        if size == 0 {
            self.error(StatusCode::Forbidden).await?;
            return Ok(StatusCode::Forbidden);
        }

        let file = match File::open(path).await {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to open static file");
                self.error(StatusCode::InternalServerError).await?;
                return Ok(StatusCode::InternalServerError);
            }
        };

        let status = self.write_stream(file, size, content_type, encoding).await?;
        if status != StatusCode::Ok {
            warn!(path = %path.display(), "static file stream cut short");
        }
        Ok(status)
    }

    /// Streams `size` bytes from `reader` as a `200 OK` response.
    ///
    /// `Content-Length` announces `size` up front. If `reader` fails or ends
    /// before `size` bytes, a `500` error page follows the partial body and
    /// `InternalServerError` is returned.
    pub async fn write_stream<R>(
        &mut self,
        mut reader: R,
        size: u64,
        content_type: &str,
        encoding: Option<&str>,
    ) -> io::Result<StatusCode>
    where
        R: AsyncRead + Unpin,
    {
        let head = preamble(StatusCode::Ok, None, Some(content_type), None, encoding, size);
        self.sink.write_all(&head).await?;

        let mut buf = [0u8; FILE_CHUNK];
        let mut remaining = size;
        while remaining > 0 {
            let n = match reader.read(&mut buf).await {
                Ok(0) => Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
                other => other,
            };
            let n = match n {
                Ok(n) => n.min(usize::try_from(remaining).unwrap_or(usize::MAX)),
                Err(e) => {
                    warn!(
                        error = %e,
                        sent = size - remaining,
                        expected = size,
                        "read failed mid-stream, appending 500 after partial body"
                    );
                    self.error(StatusCode::InternalServerError).await?;
                    return Ok(StatusCode::InternalServerError);
                }
            };
            self.sink.write_all(&buf[..n]).await?;
            remaining -= n as u64;
        }

        Ok(StatusCode::Ok)
    }

    /// Writes an HTML error page for `status`.
    pub async fn error(&mut self, status: StatusCode) -> io::Result<()> {
        self.error_with_message(status, "").await
    }

    /// Writes an HTML error page for `status` with `message` under the code.
    pub async fn error_with_message(&mut self, status: StatusCode, message: &str) -> io::Result<()> {
        let body = format!(
            "<html><head><title>Error</title></head><body><h1>{}</h1><h2>{}</h2></body></html>",
            status.as_u16(),
            escape_html(message)
        );
        self.write_status(status, None, Some("text/html"), Some("utf-8"), body)
            .await
    }

    /// Flushes buffered output and shuts down the write side of the sink.
    pub async fn finish(&mut self) -> io::Result<()> {
        self.sink.flush().await?;
        self.sink.shutdown().await
    }

    /// Returns the underlying sink.
    pub fn into_inner(self) -> W {
        self.sink
    }
}

fn preamble(
    status: StatusCode,
    headers: Option<&Headers>,
    content_type: Option<&str>,
    charset: Option<&str>,
    encoding: Option<&str>,
    content_length: u64,
) -> BytesMut {
    let mut buf = BytesMut::with_capacity(256);

    buf.put(
        format!(
            "HTTP/1.1 {} {}\r\n",
            status.as_u16(),
            status.canonical_reason()
        )
        .as_bytes(),
    );

    if let Some(headers) = headers {
        buf.put(headers.to_string().as_bytes());
    }

    let content_type = match (content_type, charset) {
        (Some(ct), Some(charset)) => format!("{ct}; charset={charset}"),
        (Some(ct), None) => ct.to_owned(),
        (None, _) => DEFAULT_CONTENT_TYPE.to_owned(),
    };
    buf.put(format!("Content-Type: {content_type}\r\n").as_bytes());

    if let Some(encoding) = encoding {
        buf.put(format!("Content-Encoding: {encoding}\r\n").as_bytes());
    }
    if content_length > 0 {
        buf.put(format!("Content-Length: {content_length}\r\n").as_bytes());
    }
    buf.put(format!("Server: {SERVER_NAME}\r\n").as_bytes());
    buf.put(&b"Connection: close\r\n\r\n"[..]);

    buf
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};

    use tokio::io::ReadBuf;

    use super::*;

    static NEXT_DIR: AtomicUsize = AtomicUsize::new(0);

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "mhttpd-response-{}-{}",
            std::process::id(),
            NEXT_DIR.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn to_string(writer: ResponseWriter<Vec<u8>>) -> String {
        String::from_utf8(writer.into_inner()).unwrap()
    }

    #[tokio::test]
    async fn header_order() {
        let mut extra = Headers::new();
        extra.insert("X-Request-Id", "abc-123");

        let mut w = ResponseWriter::new(Vec::new());
        w.write_status(StatusCode::Ok, Some(&extra), Some("application/json"), Some("utf-8"), "{}")
            .await
            .unwrap();

        assert_eq!(
            to_string(w),
            "HTTP/1.1 200 OK\r\n\
             X-Request-Id: abc-123\r\n\
             Content-Type: application/json; charset=utf-8\r\n\
             Content-Length: 2\r\n\
             Server: mhttpd\r\n\
             Connection: close\r\n\
             \r\n\
             {}"
        );
    }

    #[tokio::test]
    async fn default_content_type_and_no_length_for_empty_body() {
        let mut w = ResponseWriter::new(Vec::new());
        w.write_status(StatusCode::Ok, None, None, Some("utf-8"), Bytes::new())
            .await
            .unwrap();
        let s = to_string(w);
        assert!(s.contains("Content-Type: application/octet-stream\r\n"));
        assert!(!s.contains("Content-Length"));
        assert!(s.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn error_page() {
        let mut w = ResponseWriter::new(Vec::new());
        w.error(StatusCode::MethodNotAllowed).await.unwrap();
        let s = to_string(w);
        assert!(s.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
        assert!(s.contains("Content-Type: text/html; charset=utf-8\r\n"));
        assert!(s.contains("<h1>405</h1>"));
    }

    #[tokio::test]
    async fn error_message_is_escaped() {
        let mut w = ResponseWriter::new(Vec::new());
        w.error_with_message(StatusCode::InternalServerError, "<b>boom</b> & co")
            .await
            .unwrap();
        assert!(to_string(w).contains("<h2>&lt;b&gt;boom&lt;/b&gt; &amp; co</h2>"));
    }

    #[tokio::test]
    async fn file_is_streamed_in_full() {
        let dir = scratch_dir();
        let path = dir.join("big.txt");
        let content: Vec<u8> = (0..2500u32).map(|i| b'a' + (i % 26) as u8).collect();
        std::fs::write(&path, &content).unwrap();

        let mut w = ResponseWriter::new(Vec::new());
        let status = w.write_file(&path, "text/plain", Some("gzip")).await.unwrap();
        assert_eq!(status, StatusCode::Ok);

        let out = w.into_inner();
        let split = out.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        let head = std::str::from_utf8(&out[..split]).unwrap();
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("Content-Type: text/plain\r\n"));
        assert!(head.contains("Content-Encoding: gzip\r\n"));
        assert!(head.contains("Content-Length: 2500\r\n"));
        assert_eq!(&out[split..], &content[..]);
        // exactly one response on the wire
        assert_eq!(out.windows(8).filter(|w| w == b"HTTP/1.1").count(), 1);
    }

    #[tokio::test]
    async fn empty_file_is_forbidden() {
        let dir = scratch_dir();
        let path = dir.join("empty.txt");
        std::fs::write(&path, b"").unwrap();

        let mut w = ResponseWriter::new(Vec::new());
        let status = w.write_file(&path, "text/plain", None).await.unwrap();
        assert_eq!(status, StatusCode::Forbidden);
        assert!(to_string(w).starts_with("HTTP/1.1 403 Forbidden\r\n"));
    }

    #[tokio::test]
    async fn directory_is_forbidden() {
        let dir = scratch_dir();
        let mut w = ResponseWriter::new(Vec::new());
        let status = w.write_file(&dir, "text/html", None).await.unwrap();
        assert_eq!(status, StatusCode::Forbidden);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = scratch_dir();
        let mut w = ResponseWriter::new(Vec::new());
        let status = w.write_file(&dir.join("nope.css"), "text/css", None).await.unwrap();
        assert_eq!(status, StatusCode::NotFound);
        assert!(to_string(w).starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    /// Reader whose every read fails.
    struct Broken;

    impl AsyncRead for Broken {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::other("disk gone")))
        }
    }

    fn split_head(out: &[u8]) -> (String, &[u8]) {
        let split = out.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        (String::from_utf8(out[..split].to_vec()).unwrap(), &out[split..])
    }

    #[tokio::test]
    async fn read_error_mid_stream_appends_500() {
        let reader = (&b"hello"[..]).chain(Broken);
        let mut w = ResponseWriter::new(Vec::new());
        let status = w.write_stream(reader, 12, "text/plain", None).await.unwrap();
        assert_eq!(status, StatusCode::InternalServerError);

        let out = w.into_inner();
        let (head, rest) = split_head(&out);
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("Content-Length: 12\r\n"));

        let rest = String::from_utf8_lossy(rest);
        assert!(rest.starts_with("helloHTTP/1.1 500 Internal Server Error\r\n"));
        assert_eq!(rest.matches("HTTP/1.1 500").count(), 1);
        assert!(rest.contains("<h1>500</h1>"));
    }

    #[tokio::test]
    async fn early_end_of_stream_appends_500() {
        let mut w = ResponseWriter::new(Vec::new());
        let status = w.write_stream(&b"short"[..], 2048, "text/css", None).await.unwrap();
        assert_eq!(status, StatusCode::InternalServerError);

        let out = w.into_inner();
        let (head, rest) = split_head(&out);
        assert!(head.contains("Content-Length: 2048\r\n"));
        assert!(String::from_utf8_lossy(rest).starts_with("shortHTTP/1.1 500 "));
    }

    #[tokio::test]
    async fn stream_stops_at_announced_size() {
        let mut w = ResponseWriter::new(Vec::new());
        let status = w.write_stream(&b"abcdef"[..], 4, "text/plain", None).await.unwrap();
        assert_eq!(status, StatusCode::Ok);

        let out = w.into_inner();
        let (head, rest) = split_head(&out);
        assert!(head.contains("Content-Length: 4\r\n"));
        assert_eq!(rest, b"abcd");
    }
}
