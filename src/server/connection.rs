//! Per-connection processing: parse → dispatch → respond → close.
//!
//! A [`Connection`] owns one accepted stream for its whole life. Each stage
//! hands the next an explicit value ([`Request`] or [`ParseError`], then an
//! [`Outcome`]), and the stream is shut down and dropped at the end whatever
//! happened before.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::http::request::BodyReader;
use crate::http::{Method, ParseError, Request, ResponseWriter, StatusCode, json};
use crate::router::{Reply, Router};
use crate::static_files::{StaticFile, StaticResolver};

/// Everything a connection needs to turn a request into a response.
///
/// Built once by the server and shared, read-only, by every connection.
#[derive(Debug)]
pub struct Dispatcher {
    router: Router,
    resolver: StaticResolver,
    read_timeout: Duration,
    max_body: usize,
    static_encoding: Option<String>,
}

impl Dispatcher {
    /// Takes ownership of the route table and copies the settings it needs.
    pub fn new(router: Router, config: &ServerConfig) -> Self {
        Self {
            router,
            resolver: StaticResolver::new(config.document_root.clone()),
            read_timeout: config.read_timeout,
            max_body: config.max_body,
            static_encoding: config.static_encoding.clone(),
        }
    }

    /// Returns the route table.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Decides how `request` is answered.
    ///
    /// A registered route always wins, even over an existing file with the
    /// same path. Unmatched GETs go to the document root; anything else is
    /// `405`.
    pub async fn dispatch(&self, request: Request) -> Outcome {
        if let Some(route) = self.router.find(request.method(), request.path()) {
            let content_type = route.content_type().to_owned();
            // Spawned so that a panicking handler only costs this request.
            let result = match tokio::spawn(route.invoke(request)).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(path = route.path(), error = %e, "handler panicked");
                    return Outcome::error(StatusCode::InternalServerError, "handler panicked");
                }
            };

            return match result.map(render) {
                Ok(Ok(body)) => Outcome::Reply { content_type, body },
                Ok(Err(e)) => {
                    warn!(path = route.path(), error = %e, "failed to serialize handler reply");
                    Outcome::error(StatusCode::InternalServerError, e.to_string())
                }
                Err(e) => {
                    warn!(path = route.path(), error = %e, "handler failed");
                    Outcome::error(StatusCode::InternalServerError, e.to_string())
                }
            };
        }

        if *request.method() != Method::Get {
            return Outcome::error(StatusCode::MethodNotAllowed, "");
        }

        let Some(file) = self.resolver.resolve(request.path()) else {
            return Outcome::error(StatusCode::NotFound, "");
        };
        if tokio::fs::metadata(&file.path).await.is_err() {
            return Outcome::error(StatusCode::NotFound, "");
        }
        Outcome::File(file)
    }
}

/// How a request is going to be answered.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// `200` with a handler's reply.
    Reply { content_type: String, body: Bytes },
    /// `200` streaming a static file (or `403`/`500` if the file disappoints).
    File(StaticFile),
    /// An HTML error page.
    Error { status: StatusCode, message: String },
}

impl Outcome {
    fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Error {
            status,
            message: message.into(),
        }
    }
}

fn render(reply: Reply) -> Result<Bytes, serde_json::Error> {
    match reply {
        Reply::Structured(value) => json::to_bytes(&value),
        Reply::Raw(body) => Ok(body),
    }
}

/// One accepted connection.
pub struct Connection<'a, S> {
    stream: S,
    peer: SocketAddr,
    dispatcher: &'a Dispatcher,
}

impl<'a, S> Connection<'a, S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wraps an accepted `stream` from `peer`.
    pub fn new(stream: S, peer: SocketAddr, dispatcher: &'a Dispatcher) -> Self {
        Self {
            stream,
            peer,
            dispatcher,
        }
    }

    /// Serves exactly one request and closes the connection.
    ///
    /// Returns the status the client was sent.
    pub async fn run(self) -> StatusCode {
        let started = Instant::now();
        let peer = self.peer;
        let (read_half, write_half) = tokio::io::split(self.stream);
        let reader: BodyReader = Box::new(BufReader::new(read_half));
        let mut writer = ResponseWriter::new(write_half);

        // Parsing
        let parsed: Result<Request, ParseError> = Request::parse_with_max_body(
            reader,
            self.dispatcher.read_timeout,
            self.dispatcher.max_body,
        )
        .await;

        // Dispatching
        let (method, path, outcome) = match parsed {
            Ok(request) => {
                let method = request.method().to_string();
                let path = request.path().to_owned();
                (method, path, self.dispatcher.dispatch(request).await)
            }
            Err(e) => {
                debug!(peer = %peer, error = %e, "bad request");
                (String::new(), String::new(), Outcome::error(StatusCode::BadRequest, ""))
            }
        };

        // Responding
        let encoding = self.dispatcher.static_encoding.as_deref();
        let status = match respond(&mut writer, outcome, encoding).await {
            Ok(status) => status,
            Err((status, e)) => {
                debug!(peer = %peer, error = %e, "failed to write response");
                status
            }
        };

        // Closed
        if let Err(e) = writer.finish().await {
            debug!(peer = %peer, error = %e, "failed to shut down connection");
        }
        drop(writer);

        info!(
            peer = %peer,
            method = %method,
            path = %path,
            status = status.as_u16(),
            elapsed = ?started.elapsed(),
            "request served"
        );
        status
    }
}

async fn respond<W>(
    writer: &mut ResponseWriter<W>,
    outcome: Outcome,
    encoding: Option<&str>,
) -> Result<StatusCode, (StatusCode, io::Error)>
where
    W: AsyncWrite + Unpin,
{
    match outcome {
        Outcome::Reply { content_type, body } => writer
            .write_status(StatusCode::Ok, None, Some(&content_type), Some("utf-8"), body)
            .await
            .map(|()| StatusCode::Ok)
            .map_err(|e| (StatusCode::Ok, e)),
        Outcome::File(file) => writer
            .write_file(&file.path, file.content_type, encoding)
            .await
            .map_err(|e| (StatusCode::Ok, e)),
        Outcome::Error { status, message } => writer
            .error_with_message(status, &message)
            .await
            .map(|()| status)
            .map_err(|e| (status, e)),
    }
}
