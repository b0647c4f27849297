//! Accept strategies.
//!
//! Both strategies drive the same [`AcceptLoop`]; they differ only in who
//! owns it. [`Foreground`] runs it inside `Server::start`, which then returns
//! once the server stops. [`Background`] registers it with the async runtime,
//! which wakes it whenever the listener has a pending connection, and lets
//! `start` return immediately.

use std::pin::Pin;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::connection::{Connection, Dispatcher};
use crate::config::AcceptMode;

/// A bound listener plus everything needed to serve its connections.
///
/// Connections are served strictly one after another: the next `accept`
/// happens only after the previous connection has been closed. New clients
/// wait in the listen backlog meanwhile.
pub struct AcceptLoop {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    shutdown: watch::Receiver<bool>,
}

impl AcceptLoop {
    pub(crate) fn new(
        listener: TcpListener,
        dispatcher: Arc<Dispatcher>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            listener,
            dispatcher,
            shutdown,
        }
    }

    /// Accepts and serves connections until shutdown is signalled, then
    /// closes the listener.
    ///
    /// Shutdown is noticed between connections; a connection being served is
    /// always finished first.
    pub async fn run(mut self) {
        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.shutdown.wait_for(|stop| *stop) => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    Connection::new(stream, peer, &self.dispatcher).run().await;
                }
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                }
            }
        }

        info!("accept loop stopped, closing listener");
    }
}

/// Owns the execution of an [`AcceptLoop`].
pub trait AcceptStrategy: Send + Sync {
    /// Runs or schedules `accept_loop`.
    ///
    /// Returns the task handle when the loop keeps running after this call,
    /// `None` when the loop has already finished.
    fn run_accept_loop(
        &self,
        accept_loop: AcceptLoop,
    ) -> Pin<Box<dyn Future<Output = Option<JoinHandle<()>>> + Send>>;
}

/// Runs the loop to completion in the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct Foreground;

impl AcceptStrategy for Foreground {
    fn run_accept_loop(
        &self,
        accept_loop: AcceptLoop,
    ) -> Pin<Box<dyn Future<Output = Option<JoinHandle<()>>> + Send>> {
        Box::pin(async move {
            accept_loop.run().await;
            None
        })
    }
}

/// Hands the loop to the runtime as its own task.
#[derive(Debug, Clone, Copy, Default)]
pub struct Background;

impl AcceptStrategy for Background {
    fn run_accept_loop(
        &self,
        accept_loop: AcceptLoop,
    ) -> Pin<Box<dyn Future<Output = Option<JoinHandle<()>>> + Send>> {
        Box::pin(async move { Some(tokio::spawn(accept_loop.run())) })
    }
}

/// Picks the strategy for a configured [`AcceptMode`].
pub fn strategy_for(mode: AcceptMode) -> Box<dyn AcceptStrategy> {
    match mode {
        AcceptMode::Foreground => Box::new(Foreground),
        AcceptMode::Background => Box::new(Background),
    }
}
