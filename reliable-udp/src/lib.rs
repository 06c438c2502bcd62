//! `reliable-udp`: a reliable, ordered byte stream over UDP datagrams.
//!
//! # Architecture
//!
//! ```text
//!  ┌───────────────┐  DATA   ┌──────────────────┐
//!  │ send_stream   │────────▶│ receive_stream   │
//!  │ OutboundWindow│◀────────│ AssemblyMap      │
//!  └──────┬────────┘   ACK   └────────┬─────────┘
//!         │                           │
//!  ┌──────▼───────────────────────────▼─────────┐
//!  │                Connection                  │
//!  │  handshake · teardown · seq counters       │
//!  └──────┬─────────────────────────────────────┘
//!         │ Segment::encode / decode (CRC32 payload check)
//!  ┌──────▼──────┐        ┌──────────────────────┐
//!  │   Socket    │   or   │ simulator::Link/Lossy│
//!  └─────────────┘        └──────────────────────┘
//! ```
//!
//! A session runs `handshake → data transfer (one side sends, the other
//! receives) → teardown`, sequentially on one task.
//!
//! Modules:
//! - [`checksum`]: CRC32 over segment payloads
//! - [`segment`]: wire format (serialise / deserialise)
//! - [`state`]: finite-state-machine types and legal transitions
//! - [`socket`]: the [`socket::Channel`] seam and the UDP socket
//! - [`simulator`]: in-process links with fault injection, for testing
//! - [`config`]: timeouts, window and chunk sizes
//! - [`events`]: structured event sink
//! - [`connection`]: handshake, teardown and segment I/O
//! - [`window`]: sliding-window send bookkeeping
//! - [`assembler`]: out-of-order receive store
//! - [`transfer`]: `send_stream` / `receive_stream`
//! - [`endpoint`]: textual-address `connect` / `accept` over UDP
//! - [`util`]: address formatting, chunk splitting and joining
//! - [`error`]: error types

pub mod assembler;
pub mod checksum;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod segment;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod transfer;
pub mod util;
pub mod window;

pub use config::{Completion, Config, Timeouts};
pub use connection::Connection;
pub use transfer::{receive_stream, send_stream, TransferStats};
