//! Error type shared by the codec, the client pipelines and the server.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the client or server can report.
#[derive(Debug)]
pub enum Error {
    /// Host/port resolution failed or produced no addresses.
    AddressResolution {
        host: String,
        port: u16,
        source: Option<io::Error>,
    },
    /// Every resolved address refused the connection.
    Connection { host: String, source: io::Error },
    /// Read, write, flush or shutdown failure on a stream.
    StreamIo {
        op: &'static str,
        source: io::Error,
    },
    /// Malformed or out-of-order header line.
    ProtocolParse(String),
    /// A header line exceeded the maximum line length.
    LineTooLong { limit: usize },
    /// The stream ended before a required line or before all announced
    /// body bytes arrived.
    PrematureEof(String),
    /// An attachment file could not be created or written.
    Filesystem { path: PathBuf, source: io::Error },
    /// The server sent an attachment name that is unsafe to create locally.
    UnsafeFileName(String),
    /// The request cannot be expressed in the line grammar.
    InvalidRequest(String),
    /// A worker could not be created.
    ProcessSpawn(io::Error),
    /// A client step did not finish within its deadline.
    Timeout { op: &'static str, after: Duration },
}

impl Error {
    /// Wrap an I/O failure on a socket or collaborator stream.
    pub fn io(op: &'static str, source: io::Error) -> Self {
        Error::StreamIo { op, source }
    }

    /// Name of the operation that failed, used in the one-line diagnostic.
    pub fn operation(&self) -> &'static str {
        match self {
            Error::AddressResolution { .. } => "getaddrinfo()",
            Error::Connection { .. } => "connect()",
            Error::StreamIo { op, .. } => *op,
            Error::ProtocolParse(_) | Error::LineTooLong { .. } => "parse()",
            Error::PrematureEof(_) => "read()",
            Error::Filesystem { .. } | Error::UnsafeFileName(_) => "open()",
            Error::InvalidRequest(_) => "encode()",
            Error::ProcessSpawn(_) => "spawn()",
            Error::Timeout { op, .. } => *op,
        }
    }

    /// Process exit status: the OS error code when there is one, else 1.
    pub fn exit_code(&self) -> i32 {
        let os = match self {
            Error::AddressResolution { source, .. } => {
                source.as_ref().and_then(io::Error::raw_os_error)
            }
            Error::Connection { source, .. }
            | Error::StreamIo { source, .. }
            | Error::Filesystem { source, .. }
            | Error::ProcessSpawn(source) => source.raw_os_error(),
            _ => None,
        };
        match os {
            Some(code) if code != 0 => code,
            _ => 1,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::AddressResolution { host, port, source } => match source {
                Some(e) => write!(f, "cannot resolve {host}:{port}: {e}"),
                None => write!(f, "no addresses found for {host}:{port}"),
            },
            Error::Connection { host, source } => {
                write!(f, "no address of {host} accepted the connection: {source}")
            }
            Error::StreamIo { source, .. } => write!(f, "{source}"),
            Error::ProtocolParse(msg) => write!(f, "protocol error: {msg}"),
            Error::LineTooLong { limit } => {
                write!(f, "protocol error: line exceeds {limit} bytes")
            }
            Error::PrematureEof(what) => write!(f, "unexpected end of stream: {what}"),
            Error::Filesystem { path, source } => write!(f, "{}: {}", path.display(), source),
            Error::UnsafeFileName(name) => write!(f, "refusing unsafe file name {name:?}"),
            Error::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            Error::ProcessSpawn(e) => write!(f, "cannot start worker: {e}"),
            Error::Timeout { after, .. } => write!(f, "timed out after {after:?}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::AddressResolution {
                source: Some(e), ..
            } => Some(e),
            Error::Connection { source, .. }
            | Error::StreamIo { source, .. }
            | Error::Filesystem { source, .. }
            | Error::ProcessSpawn(source) => Some(source),
            _ => None,
        }
    }
}
