//! Listening socket construction.

use std::net::{IpAddr, SocketAddr};

use tracing::warn;

use crate::error::{Error, Result};

/// Clamp a configured backlog to what `listen(2)` accepts.
pub fn clamp_backlog(requested: u32) -> i32 {
    let max = libc::SOMAXCONN.max(1) as u32;
    requested.clamp(1, max) as i32
}

/// Create a listening TCP socket with address reuse enabled.
///
/// The socket is closed again if any step fails.
pub(crate) fn bind(host: IpAddr, port: u16, backlog: u32) -> Result<std::net::TcpListener> {
    let addr = SocketAddr::new(host, port);

    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )
    .map_err(|e| Error::io("socket()", e))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| Error::io("setsockopt()", e))?;
    socket
        .bind(&addr.into())
        .map_err(|e| Error::io("bind()", e))?;

    let effective = clamp_backlog(backlog);
    if effective as u32 != backlog {
        warn!(requested = backlog, effective, "Backlog clamped");
    }
    socket
        .listen(effective)
        .map_err(|e| Error::io("listen()", e))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| Error::io("fcntl()", e))?;

    Ok(socket.into())
}
