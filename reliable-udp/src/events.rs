//! Structured protocol events.
//!
//! A [`crate::connection::Connection`] reports everything observable about a
//! session (state changes, every segment in or out, dropped input, failed
//! handshake attempts) to an [`EventSink`] it is given at construction.
//! [`LogSink`] forwards to the `log` facade and is the default; [`Recorder`]
//! keeps the events in memory so tests can assert on ordering and counts.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use crate::state::{ConnectionState, Role};

/// Why a single SYN attempt did not complete the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptFailure {
    /// No reply within the handshake timeout.
    Timeout,
    /// A reply arrived but was not the expected SYN+ACK.
    Rejected,
    /// The reply could not be decoded.
    Undecodable,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::Rejected => f.write_str("rejected"),
            Self::Undecodable => f.write_str("undecodable"),
        }
    }
}

/// Why an incoming datagram was discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    Undecodable(String),
    BadChecksum,
    /// Ports do not match this connection.
    WrongPorts { source_port: u16, dest_port: u16 },
    /// Well formed but meaningless in the current state.
    Unexpected,
    /// Data for a sequence number that was never delivered, arriving after
    /// the transfer concluded.
    LateData,
    /// Data further ahead than the advertised window allows.
    OutOfWindow,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undecodable(why) => write!(f, "undecodable: {why}"),
            Self::BadChecksum => f.write_str("bad checksum"),
            Self::WrongPorts {
                source_port,
                dest_port,
            } => write!(f, "wrong ports {source_port}->{dest_port}"),
            Self::Unexpected => f.write_str("unexpected"),
            Self::LateData => f.write_str("late data"),
            Self::OutOfWindow => f.write_str("outside the receive window"),
        }
    }
}

/// One observable step of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    StateChanged {
        role: Role,
        from: ConnectionState,
        to: ConnectionState,
    },
    /// A segment left for the first time.  `summary` is its `Display` form.
    SegmentSent { seq: u32, summary: String },
    Retransmitted { seq: u32, summary: String },
    SegmentReceived { seq: u32, summary: String },
    SegmentDropped { from: SocketAddr, reason: DropReason },
    HandshakeAttemptFailed { attempt: u32, reason: AttemptFailure },
    TransferComplete { segments: usize, bytes: usize },
}

/// Destination for [`Event`]s.
pub trait EventSink: Send + Sync {
    fn record(&self, event: &Event);
}

/// Writes every event to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn record(&self, event: &Event) {
        match event {
            Event::StateChanged { role, from, to } => log::info!("[{role}] {from} → {to}"),
            Event::SegmentSent { summary, .. } => log::debug!("→ {summary}"),
            Event::Retransmitted { summary, .. } => log::debug!("→ (rtx) {summary}"),
            Event::SegmentReceived { summary, .. } => log::debug!("← {summary}"),
            Event::SegmentDropped { from, reason } => {
                log::debug!("dropped datagram from {from}: {reason}")
            }
            Event::HandshakeAttemptFailed { attempt, reason } => {
                log::warn!("handshake attempt {attempt} failed: {reason}")
            }
            Event::TransferComplete { segments, bytes } => {
                log::info!("transfer complete: {segments} segments, {bytes} bytes")
            }
        }
    }
}

/// Keeps every event in memory.  Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// The sequence of states entered, in order.
    pub fn states(&self) -> Vec<ConnectionState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::StateChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for Recorder {
    fn record(&self, event: &Event) {
        LogSink.record(event);
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
