//! Connection finite-state machine (FSM) types.
//!
//! Every state a [`crate::connection::Connection`] can occupy, plus the
//! table of legal transitions.  The transitions themselves are driven by
//! `connection`; this module only answers "is `a -> b` allowed for this
//! role", so every state change can be checked in one place.
//!
//! ```text
//!  Initiator                               Responder
//!
//!  CLOSED ─SYN──▶ SYN_SENT                 CLOSED ──▶ LISTEN ◀─────┐
//!    ▲   ◀─timeout/reject─┘                  SYN rcvd │            │
//!    │            │ SYN+ACK rcvd                      ▼   timeout  │
//!    │            ▼                               SYN_RCVD ────────┘
//!    │       ESTABLISHED ◀──timeout──┐                │ ACK rcvd
//!    │            │ FIN sent         │                ▼
//!    │            ▼                  │           ESTABLISHED
//!    │       FIN_WAIT_1 ─────────────┘                │ FIN rcvd
//!    │            │ ACK of FIN                        ▼
//!    │            ▼                               CLOSE_WAIT
//!    │       FIN_WAIT_2                               │ FIN sent
//!    │            │ FIN rcvd                          ▼
//!    └────────────┘                               LAST_ACK ──▶ CLOSED
//! ```

use std::fmt;

/// All possible states of the connection FSM.
///
/// `Closed` is both the initial and the terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No connection exists.
    #[default]
    Closed,
    /// Waiting for a SYN (responder only).
    Listen,
    /// SYN sent; waiting for SYN+ACK.
    SynSent,
    /// SYN received and SYN+ACK sent; waiting for the final ACK.
    SynReceived,
    /// Handshake complete; data may flow.
    Established,
    /// FIN sent; waiting for its ACK.
    FinWait1,
    /// FIN acknowledged; waiting for the peer's FIN.
    FinWait2,
    /// Peer's FIN acknowledged; own FIN not yet sent.
    CloseWait,
    /// Own FIN sent after the peer's; waiting for the last ACK.
    LastAck,
}

/// Which end of the session a connection plays.
///
/// The closing discipline is fixed: the initiator always closes actively and
/// the responder always passively.  Simultaneous close is not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Initiator,
    Responder,
}

impl ConnectionState {
    /// `true` if `self -> next` is a legal step for `role`.
    pub fn can_transition(self, next: ConnectionState, role: Role) -> bool {
        use ConnectionState::*;
        match role {
            Role::Initiator => matches!(
                (self, next),
                (Closed, SynSent)
                    | (SynSent, Closed)
                    | (SynSent, Established)
                    | (Established, FinWait1)
                    | (FinWait1, Established)
                    | (FinWait1, FinWait2)
                    | (FinWait2, Closed)
            ),
            Role::Responder => matches!(
                (self, next),
                (Closed, Listen)
                    | (Listen, SynReceived)
                    | (SynReceived, Listen)
                    | (SynReceived, Established)
                    | (Established, CloseWait)
                    | (CloseWait, LastAck)
                    | (LastAck, Closed)
            ),
        }
    }

    /// States in which application data may be exchanged.
    pub fn is_synchronized(self) -> bool {
        self == ConnectionState::Established
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "CLOSED",
            Self::Listen => "LISTEN",
            Self::SynSent => "SYN_SENT",
            Self::SynReceived => "SYN_RCVD",
            Self::Established => "ESTABLISHED",
            Self::FinWait1 => "FIN_WAIT_1",
            Self::FinWait2 => "FIN_WAIT_2",
            Self::CloseWait => "CLOSE_WAIT",
            Self::LastAck => "LAST_ACK",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initiator => f.write_str("initiator"),
            Self::Responder => f.write_str("responder"),
        }
    }
}
