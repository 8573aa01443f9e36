//! Client side of one exchange: connect, send, receive.
//!
//! Each step takes the connection by value and only hands it back on
//! success, so every failure path drops (and closes) it.

use std::future::Future;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{lookup_host, TcpStream};
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::protocol::{encode_request, Request, ResponseDecoder, CHUNK_SIZE};

/// Outcome of a successful exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub status: i32,
    /// Files written, in the order the server sent them.
    pub attachments: Vec<PathBuf>,
}

/// Resolve `host` (both address families) and connect to the first address
/// that accepts.
pub async fn connect(host: &str, port: u16) -> Result<TcpStream> {
    let addrs: Vec<_> = lookup_host((host, port))
        .await
        .map_err(|e| Error::AddressResolution {
            host: host.to_string(),
            port,
            source: Some(e),
        })?
        .collect();

    if addrs.is_empty() {
        return Err(Error::AddressResolution {
            host: host.to_string(),
            port,
            source: None,
        });
    }

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                debug!(peer = %addr, "Connected");
                return Ok(stream);
            }
            Err(e) => {
                debug!(peer = %addr, error = %e, "Connect failed");
                last_error = Some(e);
            }
        }
    }

    Err(Error::Connection {
        host: host.to_string(),
        source: last_error
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no address tried")),
    })
}

/// Write `request`, flush, and half-close the outbound direction.
///
/// The inbound direction stays open for the reply.
pub async fn send<S>(mut stream: S, request: &Request) -> Result<S>
where
    S: AsyncWrite + Unpin,
{
    encode_request(&mut stream, request).await?;
    stream
        .shutdown()
        .await
        .map_err(|e| Error::io("shutdown()", e))?;
    debug!(user = %request.user, image = ?request.image, "Request sent");
    Ok(stream)
}

/// Decode the response, writing each attachment to `output_dir/<name>`.
///
/// `idle` bounds every single read from the peer, not the whole transfer, so
/// a large download fails only when it stalls. A file that fails mid-write is
/// closed but keeps whatever part of the body arrived before the failure.
pub async fn receive<S>(stream: S, output_dir: &Path, idle: Option<Duration>) -> Result<Received>
where
    S: AsyncRead + Unpin,
{
    let mut decoder = ResponseDecoder::new(BufReader::with_capacity(CHUNK_SIZE, stream));
    let status = with_deadline("receive()", idle, decoder.read_status()).await?;
    debug!(status, "Received status");

    let mut attachments = Vec::new();
    let mut chunk = [0u8; CHUNK_SIZE];

    while let Some(header) = with_deadline("receive()", idle, decoder.next_attachment()).await? {
        let path = output_dir.join(safe_file_name(&header.name)?);
        let mut file = File::create(&path)
            .await
            .map_err(|e| filesystem(&path, e))?;

        // Flush even when the body failed so the partial file is settled
        // before the handle is dropped
        let written = write_body(&mut decoder, &mut file, &path, &mut chunk, idle).await;
        let flushed = file.flush().await.map_err(|e| filesystem(&path, e));
        written?;
        flushed?;

        debug!(file = %path.display(), len = header.len, "Attachment written");
        attachments.push(path);
    }

    Ok(Received {
        status,
        attachments,
    })
}

async fn write_body<R>(
    decoder: &mut ResponseDecoder<R>,
    file: &mut File,
    path: &Path,
    chunk: &mut [u8],
    idle: Option<Duration>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let n = with_deadline("receive()", idle, decoder.next_chunk(chunk)).await?;
        if n == 0 {
            return Ok(());
        }
        file.write_all(&chunk[..n])
            .await
            .map_err(|e| filesystem(path, e))?;
    }
}

/// Run one full exchange as configured.
///
/// Connect and send each run under one deadline; the receive timeout is an
/// idle limit per read.
pub async fn run(config: &ClientConfig) -> Result<Received> {
    let request = config.request();
    request.validate()?;

    let stream = with_deadline(
        "connect()",
        config.connect_timeout,
        connect(&config.server, config.port),
    )
    .await?;
    let stream = with_deadline("send()", config.send_timeout, send(stream, &request)).await?;
    let received = receive(stream, &config.output_dir, config.receive_timeout).await?;

    info!(
        status = received.status,
        attachments = received.attachments.len(),
        "Exchange complete"
    );
    Ok(received)
}

async fn with_deadline<T, F>(op: &'static str, deadline: Option<Duration>, step: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        Some(after) => tokio::time::timeout(after, step)
            .await
            .map_err(|_| Error::Timeout { op, after })?,
        None => step.await,
    }
}

/// Names come from the peer: only plain relative paths are accepted.
fn safe_file_name(name: &str) -> Result<&Path> {
    let path = Path::new(name);
    let plain = !name.is_empty()
        && !name.contains('\0')
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));

    if plain {
        Ok(path)
    } else {
        Err(Error::UnsafeFileName(name.to_string()))
    }
}

fn filesystem(path: &Path, source: io::Error) -> Error {
    Error::Filesystem {
        path: path.to_path_buf(),
        source,
    }
}
