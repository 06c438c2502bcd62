//! Datagram channel abstraction.
//!
//! [`Channel`] is the only thing the protocol engine needs from the network:
//! send one datagram, receive one datagram with an optional deadline.  The
//! transport is assumed lossy and unordered.  [`Socket`] is the production
//! implementation over `tokio::net::UdpSocket`; the in-process test links
//! live in [`crate::simulator`].

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;

use crate::error::ChannelError;

/// Maximum UDP payload size.
pub const MAX_DATAGRAM: usize = 65_535;

/// An unreliable datagram transport bound to one local address.
///
/// A receive that times out is `Ok(None)`, never an error: timeouts are the
/// normal signal to retry or conclude.  `timeout: None` blocks until a
/// datagram arrives.
pub trait Channel: Send + Sync {
    /// Address this channel is bound to.
    fn local_addr(&self) -> SocketAddr;

    /// Send `datagram` to `dest`.  Delivery is not guaranteed.
    fn send_to(
        &self,
        datagram: &[u8],
        dest: SocketAddr,
    ) -> impl Future<Output = Result<(), ChannelError>> + Send;

    /// Receive the next datagram and its origin.
    fn recv_from(
        &self,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<Option<(Vec<u8>, SocketAddr)>, ChannelError>> + Send;
}

/// A UDP socket speaking raw datagrams.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (after the OS assigns an ephemeral port).
    local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Port `0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, ChannelError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        log::debug!("bound UDP socket on {local_addr}");
        Ok(Self { local_addr, inner })
    }
}

impl Channel for Socket {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn send_to(&self, datagram: &[u8], dest: SocketAddr) -> Result<(), ChannelError> {
        if datagram.len() > MAX_DATAGRAM {
            return Err(ChannelError::Oversized(datagram.len()));
        }
        self.inner.send_to(datagram, dest).await?;
        Ok(())
    }

    async fn recv_from(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Option<(Vec<u8>, SocketAddr)>, ChannelError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, self.inner.recv_from(&mut buf)).await {
                Ok(result) => result,
                Err(_elapsed) => return Ok(None),
            },
            None => self.inner.recv_from(&mut buf).await,
        };
        match received {
            Ok((n, origin)) => {
                buf.truncate(n);
                Ok(Some((buf, origin)))
            }
            // ICMP port-unreachable from an earlier send surfaces here on some
            // platforms; for a datagram protocol it is just a lost reply.
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => Ok(None),
            Err(e) => Err(ChannelError::Io(e)),
        }
    }
}
