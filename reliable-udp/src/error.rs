//! Error taxonomy.
//!
//! Segment-level problems ([`DecodeError`], [`ChecksumMismatch`]) are recovered
//! locally by dropping the segment.  Only channel faults, an exhausted
//! handshake budget and misuse of a connection reach the caller.

use std::io;

use thiserror::Error;

use crate::state::ConnectionState;

/// A datagram that cannot be parsed as a segment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("buffer of {0} bytes is shorter than the fixed header")]
    BufferTooShort(usize),
    #[error("unsupported wire version {0}")]
    UnsupportedVersion(u8),
    #[error("length field says {declared} bytes but datagram has {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("source address runs past the end of the datagram")]
    AddressTruncated,
    #[error("source address is not valid UTF-8")]
    AddressNotUtf8,
    #[error("{0} trailing bytes cannot hold a checksum")]
    ChecksumTruncated(usize),
    #[error("flag byte {0} is neither 0 nor 1")]
    InvalidFlag(u8),
}

/// A segment that cannot be represented on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("source address of {0} bytes exceeds 255")]
    AddressTooLong(usize),
    #[error("encoded segment of {0} bytes exceeds the 16-bit length field")]
    TooLarge(usize),
}

/// Carried checksum disagrees with the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("checksum mismatch: carried {carried:#010x}, computed {computed:#010x}")]
pub struct ChecksumMismatch {
    pub carried: u32,
    pub computed: u32,
}

/// The datagram transport became unusable.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("datagram of {0} bytes exceeds the channel limit")]
    Oversized(usize),
    #[error("segment cannot be encoded: {0}")]
    Encode(#[from] EncodeError),
}

/// Textual host could not be turned into a routable address.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("lookup of {host} failed: {source}")]
    Lookup {
        host: String,
        #[source]
        source: io::Error,
    },
    #[error("{0} resolved to no addresses")]
    NoAddress(String),
}

/// Connection establishment failed for good.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("connection failed after {attempts} handshake attempts")]
    ConnectionFailed { attempts: u32 },
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// The data phase failed.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("connection is {0}, not Established")]
    BadState(ConnectionState),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("stream I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("gave up after {rounds} send rounds with {unacked} segments unacknowledged")]
    RetriesExhausted { rounds: u32, unacked: usize },
    #[error("peer closed with {unacked} segments unacknowledged")]
    PeerClosed { unacked: usize },
    #[error("chunk size {0} is zero or does not fit in one segment")]
    InvalidChunkSize(usize),
}

/// The closing exchange failed.
#[derive(Debug, Error)]
pub enum TeardownError {
    #[error("connection is {0}, not Established")]
    BadState(ConnectionState),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}
