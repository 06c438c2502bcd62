//! Real-network entry points.
//!
//! These wrap [`Connection::connect`] / [`Connection::accept`] with what a
//! program actually has in hand: textual hosts and port numbers.  Hosts are
//! resolved with `tokio::net::lookup_host`, a UDP [`Socket`] is bound, and
//! initial sequence numbers come from an OS-seeded generator.

use std::net::SocketAddr;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::Config;
use crate::connection::Connection;
use crate::error::{HandshakeError, ResolveError};
use crate::events::{EventSink, LogSink};
use crate::socket::{Channel, Socket};
use crate::util;

/// Resolve `host` to the first address it maps to.
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr, ResolveError> {
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|source| ResolveError::Lookup {
            host: host.to_owned(),
            source,
        })?;
    addrs
        .next()
        .ok_or_else(|| ResolveError::NoAddress(host.to_owned()))
}

/// Bind `local_addr:local_port` and open a session to `remote_addr:remote_port`.
pub async fn connect(
    local_addr: &str,
    local_port: u16,
    remote_addr: &str,
    remote_port: u16,
    config: Config,
) -> Result<Connection<Socket>, HandshakeError> {
    connect_with_events(
        local_addr,
        local_port,
        remote_addr,
        remote_port,
        config,
        Arc::new(LogSink),
    )
    .await
}

/// [`connect`] reporting to a caller-supplied [`EventSink`].
pub async fn connect_with_events(
    local_addr: &str,
    local_port: u16,
    remote_addr: &str,
    remote_port: u16,
    config: Config,
    events: Arc<dyn EventSink>,
) -> Result<Connection<Socket>, HandshakeError> {
    let remote = resolve(remote_addr, remote_port).await?;
    let local = resolve(local_addr, local_port).await?;
    let socket = Socket::bind(local).await?;
    log::info!("connecting {} → {remote}", socket_label(&socket));
    let mut rng = StdRng::from_os_rng();
    Connection::connect(socket, remote, config, events, &mut rng).await
}

/// Bind `local_addr:local_port` and wait for one peer to connect.
pub async fn accept(
    local_addr: &str,
    local_port: u16,
    config: Config,
) -> Result<Connection<Socket>, HandshakeError> {
    accept_with_events(local_addr, local_port, config, Arc::new(LogSink)).await
}

/// [`accept`] reporting to a caller-supplied [`EventSink`].
pub async fn accept_with_events(
    local_addr: &str,
    local_port: u16,
    config: Config,
    events: Arc<dyn EventSink>,
) -> Result<Connection<Socket>, HandshakeError> {
    let local = resolve(local_addr, local_port).await?;
    let socket = Socket::bind(local).await?;
    log::info!("listening on {}", socket_label(&socket));
    let mut rng = StdRng::from_os_rng();
    Connection::accept(socket, config, events, &mut rng).await
}

fn socket_label(socket: &Socket) -> String {
    let addr = socket.local_addr();
    util::format_endpoint(addr.ip(), addr.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_literal_addresses() {
        let addr = resolve("127.0.0.1", 9000).await.unwrap();
        assert_eq!(addr, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
    }

    #[tokio::test]
    async fn resolves_localhost() {
        let addr = resolve("localhost", 80).await.unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 80);
    }

    #[tokio::test]
    async fn unresolvable_host_is_an_error() {
        let err = resolve("no such host.invalid", 1).await.unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Lookup { .. } | ResolveError::NoAddress(_)
        ));
    }
}
