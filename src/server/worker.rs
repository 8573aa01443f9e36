//! Per-connection workers.
//!
//! Every accepted connection is handed to exactly one worker that owns it
//! until the exchange ends. Two kinds exist:
//!
//! - `Process`: the connection becomes stdin and stdout of a freshly spawned
//!   collaborator executable. Strict OS-level isolation.
//! - `InProcess`: a task decodes the request, calls a [`Handler`] and writes
//!   the response back. Tasks share nothing mutable; a panicking handler only
//!   takes its own task down.
//!
//! Finished workers are collected by the acceptor's [`JoinSet`].

use std::io;
use std::net::SocketAddr;
use std::os::fd::OwnedFd;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::protocol::{decode_request, encode_response, Request, Response, CHUNK_SIZE};

/// Response-producing logic run inside an in-process worker.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, request: &Request) -> Response;
}

impl<F> Handler for F
where
    F: Fn(&Request) -> Response + Send + Sync + 'static,
{
    fn handle(&self, request: &Request) -> Response {
        self(request)
    }
}

/// An external collaborator executable.
#[derive(Debug, Clone)]
pub struct ProcessWorker {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessWorker {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        ProcessWorker {
            program: program.into(),
            args,
        }
    }

    /// Spawn the collaborator with the connection as its stdin and stdout.
    ///
    /// The `Command` holds this side's copies of the descriptor; they are
    /// closed when it goes out of scope right after the spawn.
    fn start(&self, stream: TcpStream) -> io::Result<Child> {
        let stream = stream.into_std()?;
        // The collaborator does plain blocking I/O on the descriptor
        stream.set_nonblocking(false)?;

        let output = OwnedFd::from(stream.try_clone()?);
        let input = OwnedFd::from(stream);

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::from(input))
            .stdout(Stdio::from(output))
            .stderr(Stdio::inherit());
        command.spawn()
    }
}

/// How accepted connections are served.
#[derive(Clone)]
pub enum Dispatch {
    Process(ProcessWorker),
    InProcess(Arc<dyn Handler>),
}

impl Dispatch {
    pub fn process(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Dispatch::Process(ProcessWorker::new(program, args))
    }

    pub fn in_process<H: Handler>(handler: H) -> Self {
        Dispatch::InProcess(Arc::new(handler))
    }

    /// Hand `stream` to a new worker tracked in `workers`.
    ///
    /// Only a non-recoverable spawn failure is returned; everything else is
    /// confined to the connection that caused it.
    pub(crate) fn spawn(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        workers: &mut JoinSet<()>,
    ) -> Result<()> {
        match self {
            Dispatch::Process(worker) => match worker.start(stream) {
                Ok(child) => {
                    debug!(peer = %peer, pid = ?child.id(), "Worker started");
                    workers.spawn(reap(child, peer));
                    Ok(())
                }
                Err(e) => spawn_failed(e, peer),
            },
            Dispatch::InProcess(handler) => {
                let handler = Arc::clone(handler);
                workers.spawn(async move {
                    match serve(handler.as_ref(), stream).await {
                        Ok(()) => debug!(peer = %peer, "Worker finished"),
                        Err(e) => warn!(peer = %peer, error = %e, "Worker failed"),
                    }
                });
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dispatch::Process(worker) => f.debug_tuple("Process").field(worker).finish(),
            Dispatch::InProcess(_) => f.write_str("InProcess"),
        }
    }
}

/// Serve one exchange in-process: request in, handler, response out.
pub async fn serve(handler: &dyn Handler, stream: TcpStream) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::with_capacity(CHUNK_SIZE, reader);

    let request = decode_request(&mut reader).await?;
    debug!(user = %request.user, "Request received");

    let response = handler.handle(&request);
    encode_response(&mut writer, &response).await?;
    writer
        .shutdown()
        .await
        .map_err(|e| Error::io("shutdown()", e))
}

/// Wait for a collaborator to exit so it does not linger as a zombie.
async fn reap(mut child: Child, peer: SocketAddr) {
    match child.wait().await {
        Ok(status) if status.success() => debug!(peer = %peer, "Worker finished"),
        Ok(status) => warn!(peer = %peer, %status, "Worker exited with failure"),
        Err(e) => error!(peer = %peer, error = %e, "Failed to reap worker"),
    }
}

/// The connection is already closed by the time this runs.
fn spawn_failed(e: io::Error, peer: SocketAddr) -> Result<()> {
    match e.raw_os_error() {
        Some(libc::EAGAIN) => {
            warn!(peer = %peer, error = %e, "Worker limit reached, connection dropped");
            Ok(())
        }
        Some(libc::ENOMEM) => {
            error!(peer = %peer, error = %e, "Out of memory starting worker");
            Err(Error::ProcessSpawn(e))
        }
        _ => {
            error!(peer = %peer, error = %e, "Worker failed to start, connection dropped");
            Ok(())
        }
    }
}
