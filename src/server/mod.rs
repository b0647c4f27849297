//! Listener lifecycle.
//!
//! [`Server`] binds the configured address, then hands the listener to the
//! configured [`AcceptStrategy`](accept::AcceptStrategy). Connections are
//! served one at a time; there is no keep-alive and no per-connection task.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket, lookup_host};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::router::Router;

pub mod accept;
pub mod connection;

use accept::AcceptLoop;
use connection::Dispatcher;

/// Connections queued by the OS while one is being served.
const LISTEN_BACKLOG: u32 = 16;

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to resolve {addr}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("{addr} did not resolve to any address")]
    NoAddress { addr: String },

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

/// Stops a [`Server`] from anywhere, typically from inside a route handler.
///
/// The accept loop notices the request once the connection being served is
/// finished, then closes the listener.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    shutdown: Arc<watch::Sender<bool>>,
}

impl Default for ServerHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerHandle {
    /// Creates a handle not yet tied to a server; pass it to
    /// [`Server::with_handle`]. Useful when route handlers need to stop the
    /// server they are registered with.
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown: Arc::new(shutdown),
        }
    }

    /// Asks the accept loop to stop.
    ///
    /// The request stays pending until a loop has served it: called before
    /// [`Server::start`], it makes that `start` close the listener right
    /// after binding it.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }
}

/// The mhttpd HTTP server.
///
/// # Examples
///
/// ```rust,no_run
/// use mhttpd::config::ServerConfig;
/// use mhttpd::Request;
/// use mhttpd::router::{Reply, Router};
/// use mhttpd::server::Server;
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut router = Router::new();
///     router.get("/ping", "text/plain", |_req: Request| async { Ok(Reply::from("pong")) });
///
///     let mut server = Server::new(ServerConfig::new("0.0.0.0", 8080), router);
///     server.start().await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
    shutdown: Arc<watch::Sender<bool>>,
    running: bool,
    local_addr: Option<SocketAddr>,
    task: Option<JoinHandle<()>>,
}

impl Server {
    /// Creates a stopped server. The route table is fixed from here on.
    pub fn new(config: ServerConfig, router: Router) -> Self {
        Self::with_handle(config, router, ServerHandle::new())
    }

    /// Creates a stopped server controlled by an existing `handle`.
    pub fn with_handle(config: ServerConfig, router: Router, handle: ServerHandle) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(router, &config));
        Self {
            config,
            dispatcher,
            shutdown: handle.shutdown,
            running: false,
            local_addr: None,
            task: None,
        }
    }

    /// Returns a handle that can stop this server.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Returns the configuration the server was built with.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Returns `true` while the accept loop is live.
    pub fn is_running(&self) -> bool {
        self.running && self.task.as_ref().is_none_or(|task| !task.is_finished())
    }

    /// Binds the listener and starts accepting.
    ///
    /// Does nothing if the server is already running. With
    /// [`AcceptMode::Foreground`](crate::config::AcceptMode::Foreground) this
    /// returns only after the server has been stopped through a
    /// [`ServerHandle`].
    ///
    /// # Errors
    ///
    /// Fails if the address cannot be resolved or bound; nothing that happens
    /// on an individual connection is reported here.
    pub async fn start(&mut self) -> Result<(), ServerError> {
        if self.is_running() {
            debug!("start called on a running server, ignoring");
            return Ok(());
        }
        // A loop stopped through a handle leaves a finished task behind; its
        // stop request has been served.
        if self.task.take().is_some() {
            self.shutdown.send_replace(false);
        }

        let listener = bind(&self.config).await?;
        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);
        self.running = true;

        info!(
            address = %local_addr,
            root = %self.config.document_root,
            mode = ?self.config.accept_mode,
            "mhttpd listening"
        );

        let accept_loop = AcceptLoop::new(listener, Arc::clone(&self.dispatcher), self.shutdown.subscribe());
        let strategy = accept::strategy_for(self.config.accept_mode);
        self.task = strategy.run_accept_loop(accept_loop).await;

        if self.task.is_none() {
            self.shutdown.send_replace(false);
            self.running = false;
        }
        Ok(())
    }

    /// Stops accepting and closes the listener.
    ///
    /// Waits for the connection being served, if any, to finish. Does nothing
    /// when the server is not running.
    pub async fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.shutdown.send_replace(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "accept loop ended abnormally");
            }
        }
        self.shutdown.send_replace(false);
        self.running = false;
        info!("mhttpd stopped");
    }
}

/// Resolves `host:port` and opens a listening socket with `SO_REUSEADDR`.
async fn bind(config: &ServerConfig) -> Result<TcpListener, ServerError> {
    let addr = lookup_host((config.host.as_str(), config.port))
        .await
        .map_err(|source| ServerError::Resolve {
            addr: config.addr(),
            source,
        })?
        .next()
        .ok_or_else(|| ServerError::NoAddress { addr: config.addr() })?;

    let bind_err = |source: io::Error| ServerError::Bind {
        addr: addr.to_string(),
        source,
    };

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(bind_err)?;
    socket.set_reuseaddr(true).map_err(bind_err)?;
    socket.bind(addr).map_err(bind_err)?;
    socket.listen(LISTEN_BACKLOG).map_err(bind_err)
}
