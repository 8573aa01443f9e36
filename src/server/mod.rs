//! TCP server: accepts connections and hands each one to its own worker.
//!
//! The accept loop never waits on a worker. Workers are tracked in a
//! [`JoinSet`] so finished ones are reaped between accepts.

mod echo;
mod listener;
mod worker;

pub use echo::{echo, ECHO_FILE_NAME};
pub use listener::clamp_backlog;
pub use worker::{serve, Dispatch, Handler, ProcessWorker};

use std::io;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::error::{Error, Result};

/// Server instance
pub struct Server {
    listener: TcpListener,
    dispatch: Dispatch,
    workers: JoinSet<()>,
}

impl Server {
    /// Bind the listening socket. Must be called inside a Tokio runtime.
    pub fn bind(config: &ServerConfig, dispatch: Dispatch) -> Result<Self> {
        let listener = listener::bind(config.host, config.port, config.backlog)?;
        let listener = TcpListener::from_std(listener).map_err(|e| Error::io("listen()", e))?;

        info!(
            address = %listener.local_addr().map_err(|e| Error::io("getsockname()", e))?,
            dispatch = ?dispatch,
            "Server listening"
        );

        Ok(Server {
            listener,
            dispatch,
            workers: JoinSet::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| Error::io("getsockname()", e))
    }

    /// Accept connections until a fatal error occurs.
    ///
    /// On return the listener is closed; running process workers are left to
    /// finish on their own.
    pub async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "New connection");
                        self.dispatch.spawn(stream, peer, &mut self.workers)?;
                    }
                    Err(e) if is_transient(&e) => {
                        debug!(error = %e, "Accept interrupted, retrying");
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        return Err(Error::io("accept()", e));
                    }
                },
                Some(finished) = self.workers.join_next(), if !self.workers.is_empty() => {
                    if let Err(e) = finished {
                        error!(error = %e, "Worker task aborted");
                    }
                }
            }
        }
    }
}

/// Accept failures that only mean "try again".
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
    )
}
