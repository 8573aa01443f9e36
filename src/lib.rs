//! simple-message: a bulletin-board client and spawning server.
//!
//! A client posts one request (user, optional image URL, message) over a
//! fresh TCP connection and receives one response: a status code followed
//! by named binary attachments, which it writes to local files.
//!
//! The server accepts connections and gives each one to an isolated worker,
//! either a collaborator process wired to the connection through
//! stdin/stdout or an in-process task running a [`server::Handler`].
//!
//! Features:
//! - Streaming codec: attachment bodies are never buffered whole
//! - Bounded header lines, strict header ordering
//! - Per-step client deadlines
//! - Configuration via CLI arguments or TOML file

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod server;

pub use error::{Error, Result};
