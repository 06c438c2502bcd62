//! Protocol timing and sizing parameters.
//!
//! Every wait in the protocol is bounded by one of the [`Timeouts`]; the
//! defaults are the values both peers expect to be using.  A [`Config`] is
//! handed to [`crate::connection::Connection`] at construction and stays
//! fixed for the life of the session.

use std::time::Duration;

/// Receive deadlines, one per protocol phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Wait for a handshake reply or the ACK of a FIN.
    pub handshake: Duration,
    /// Per-slot poll for data ACKs in the sender.
    pub ack_poll: Duration,
    /// Silence that ends a transfer on the receiving side.
    pub idle: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_millis(4000),
            ack_poll: Duration::from_millis(10),
            idle: Duration::from_millis(100),
        }
    }
}

/// How the receiver decides that the sender is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Completion {
    /// The transfer ends after [`Timeouts::idle`] of silence.
    #[default]
    IdleTimeout,
    /// The last data segment carries the FIN flag; the transfer ends once
    /// every segment up to it is held.  Both peers must agree on this mode.
    FinalMarker,
}

/// Session parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub timeouts: Timeouts,
    /// SYN attempts before the initiator gives up.
    pub max_handshake_attempts: u32,
    /// Window advertised by the responder in its SYN+ACK.
    pub window_size: u16,
    /// Payload bytes per data segment.
    pub chunk_size: usize,
    pub completion: Completion,
    /// Cap on sender passes over the window; `None` retries forever.
    pub max_send_rounds: Option<u32>,
    /// Handshake-length waits in LAST_ACK before the passive closer gives up
    /// on the final ACK; `None` waits forever.
    pub max_last_ack_waits: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeouts: Timeouts::default(),
            max_handshake_attempts: 3,
            window_size: 8,
            chunk_size: 1687,
            completion: Completion::default(),
            max_send_rounds: None,
            max_last_ack_waits: None,
        }
    }
}

impl Config {
    /// Stop-and-wait is a one-segment window.
    pub fn stop_and_wait() -> Self {
        Self {
            window_size: 1,
            ..Self::default()
        }
    }
}
