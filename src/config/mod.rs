//! Server configuration.

use std::time::Duration;

use crate::http::request::DEFAULT_MAX_BODY;

/// How the accept loop is driven once the listener is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcceptMode {
    /// [`Server::start`](crate::server::Server::start) runs the loop itself
    /// and only returns after the server is stopped.
    #[default]
    Foreground,
    /// The loop is handed to the async runtime, which wakes it whenever the
    /// listener has a pending connection; `start` returns right away.
    Background,
}

/// Settings fixed at [`Server`](crate::server::Server) construction.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use mhttpd::config::{AcceptMode, ServerConfig};
///
/// let config = ServerConfig::new("0.0.0.0", 80)
///     .document_root("/srv/www/")
///     .read_timeout(Duration::from_secs(5))
///     .accept_mode(AcceptMode::Background);
///
/// assert_eq!(config.addr(), "0.0.0.0:80");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory unmatched GET requests are served from.
    pub document_root: String,
    /// Longest a single socket read may wait for data.
    pub read_timeout: Duration,
    /// `Content-Encoding` sent with static files, for roots holding
    /// pre-compressed assets (e.g. `gzip`).
    pub static_encoding: Option<String>,
    /// Largest request body accepted; a longer `Content-Length` is a `400`.
    pub max_body: usize,
    pub accept_mode: AcceptMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8080,
            document_root: "./web/".to_owned(),
            read_timeout: Duration::from_secs(2),
            static_encoding: None,
            max_body: DEFAULT_MAX_BODY,
            accept_mode: AcceptMode::default(),
        }
    }
}

impl ServerConfig {
    /// Default settings listening on `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn document_root(mut self, root: impl Into<String>) -> Self {
        self.document_root = root.into();
        self
    }

    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    #[must_use]
    pub fn static_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.static_encoding = Some(encoding.into());
        self
    }

    #[must_use]
    pub fn max_body(mut self, bytes: usize) -> Self {
        self.max_body = bytes;
        self
    }

    #[must_use]
    pub fn accept_mode(mut self, mode: AcceptMode) -> Self {
        self.accept_mode = mode;
        self
    }

    /// `host:port`, for logging.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
