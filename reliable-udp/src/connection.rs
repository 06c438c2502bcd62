//! Per-connection lifecycle: handshake, segment I/O and teardown.
//!
//! A [`Connection`] owns everything about one peer-to-peer session: its
//! [`Channel`], its place in the state machine (see [`crate::state`]), and
//! the segment-granular sequence counters.  The data phase lives in
//! [`crate::transfer`], which drives the connection through the crate-private
//! helpers at the bottom of this file.
//!
//! # Sequence numbers
//!
//! ```text
//!  initiator                                 responder
//!  SYN       seq=x            ───▶
//!                             ◀───  SYN+ACK  seq=y  ack=x+1  win=W
//!  ACK       seq=x+1 ack=y+1  ───▶
//!
//!  local_seq     = x+2                       local_seq     = y+2
//!  peer_next_seq = y+2                       peer_next_seq = x+2
//! ```
//!
//! Every later segment, data or control, takes exactly one slot.
//!
//! # Closing
//!
//! The initiator always closes actively and the responder passively:
//!
//! ```text
//!  ESTABLISHED ─FIN─▶ FIN_WAIT_1 ─ACK─▶ FIN_WAIT_2 ─FIN/ACK─▶ CLOSED
//!  ESTABLISHED ─FIN/ACK─▶ CLOSE_WAIT ─FIN─▶ LAST_ACK ─ACK─▶ CLOSED
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::config::Config;
use crate::error::{ChannelError, HandshakeError, TeardownError};
use crate::events::{AttemptFailure, DropReason, Event, EventSink};
use crate::segment::Segment;
use crate::socket::Channel;
use crate::state::{ConnectionState, Role};
use crate::util;

/// Result of waiting for one segment.
#[derive(Debug)]
pub(crate) enum Inbound {
    /// A decoded, checksum-clean segment addressed to this connection.
    Segment(Segment, SocketAddr),
    /// Something arrived but was unusable; already reported as dropped.
    Malformed,
    /// The deadline passed.
    Silence,
}

/// One end of a reliable session over a datagram [`Channel`].
///
/// Obtained from [`Connection::connect`] or [`Connection::accept`], both of
/// which only return once the handshake is complete.  [`Connection::close`]
/// consumes it, releasing the channel.
pub struct Connection<C> {
    state: ConnectionState,
    role: Role,
    channel: C,
    local: SocketAddr,
    /// Remote endpoint; meaningless until the handshake has chosen it.
    peer: SocketAddr,
    /// Sequence number of the next segment this side sends.
    pub(crate) local_seq: u32,
    /// First sequence number expected in the peer's next data phase.
    pub(crate) peer_next_seq: u32,
    window_size: u16,
    pub(crate) config: Config,
    events: Arc<dyn EventSink>,
    /// Peer sequence numbers whose payload was written out.
    delivered: BTreeSet<u32>,
    /// A segment read during the data phase that belongs to teardown.
    pending: Option<Segment>,
}

impl<C> fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("role", &self.role)
            .field("local", &self.local)
            .field("peer", &self.peer)
            .field("local_seq", &self.local_seq)
            .field("peer_next_seq", &self.peer_next_seq)
            .field("window_size", &self.window_size)
            .finish_non_exhaustive()
    }
}

impl<C: Channel> Connection<C> {
    fn new(channel: C, role: Role, config: Config, events: Arc<dyn EventSink>) -> Self {
        let local = channel.local_addr();
        Self {
            state: ConnectionState::Closed,
            role,
            channel,
            local,
            peer: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            local_seq: 0,
            peer_next_seq: 0,
            window_size: config.window_size.max(1),
            config,
            events,
            delivered: BTreeSet::new(),
            pending: None,
        }
    }

    // -----------------------------------------------------------------------
    // Handshake
    // -----------------------------------------------------------------------

    /// Active open towards `remote`.
    ///
    /// Each attempt draws a fresh initial sequence number from `rng`, sends a
    /// SYN and waits [`crate::config::Timeouts::handshake`] for the matching
    /// SYN+ACK.  Timeouts, wrong replies and undecodable replies all use up
    /// one of [`Config::max_handshake_attempts`].
    pub async fn connect<R: Rng + Send>(
        channel: C,
        remote: SocketAddr,
        config: Config,
        events: Arc<dyn EventSink>,
        rng: &mut R,
    ) -> Result<Self, HandshakeError> {
        let mut conn = Self::new(channel, Role::Initiator, config, events);
        conn.peer = remote;

        let attempts = conn.config.max_handshake_attempts;
        for attempt in 1..=attempts {
            let isn: u32 = rng.random();
            match conn.open_attempt(isn).await? {
                Ok(()) => return Ok(conn),
                Err(reason) => {
                    conn.emit(Event::HandshakeAttemptFailed { attempt, reason });
                    conn.transition(ConnectionState::Closed);
                }
            }
        }
        Err(HandshakeError::ConnectionFailed { attempts })
    }

    async fn open_attempt(&mut self, isn: u32) -> Result<Result<(), AttemptFailure>, ChannelError> {
        let syn = self
            .segment(isn)
            .with_syn()
            .with_source_address(self.local.ip());
        self.send_segment(&syn, false).await?;
        self.transition(ConnectionState::SynSent);

        let deadline = Instant::now() + self.config.timeouts.handshake;
        let reply = match self.receive_until(Some(deadline)).await? {
            Inbound::Segment(seg, _) => seg,
            Inbound::Malformed => return Ok(Err(AttemptFailure::Undecodable)),
            Inbound::Silence => return Ok(Err(AttemptFailure::Timeout)),
        };
        if !(reply.syn && reply.ack && reply.ack_number == isn.wrapping_add(1)) {
            return Ok(Err(AttemptFailure::Rejected));
        }

        self.window_size = reply.window_size.max(1);
        let ack = self
            .segment(isn.wrapping_add(1))
            .with_ack(reply.seq.wrapping_add(1));
        self.send_segment(&ack, false).await?;
        self.local_seq = isn.wrapping_add(2);
        self.peer_next_seq = reply.seq.wrapping_add(2);
        self.transition(ConnectionState::Established);
        Ok(Ok(()))
    }

    /// Passive open: wait, without limit, for a peer to connect.
    ///
    /// The peer's address is taken from the SYN's embedded source fields,
    /// falling back to the datagram origin when the address text is missing
    /// or unspecified.  A missing or wrong final ACK sends the responder back
    /// to LISTEN; there is no retry cap on this side.
    pub async fn accept<R: Rng + Send>(
        channel: C,
        config: Config,
        events: Arc<dyn EventSink>,
        rng: &mut R,
    ) -> Result<Self, HandshakeError> {
        let mut conn = Self::new(channel, Role::Responder, config, events);
        let mut carried: Option<(Segment, SocketAddr)> = None;

        loop {
            conn.transition(ConnectionState::Listen);
            let isn: u32 = rng.random();
            let (syn, origin) = match carried.take() {
                Some(syn) => syn,
                None => conn.await_syn().await?,
            };

            let ip = util::parse_source_address(syn.source_address.as_deref())
                .unwrap_or_else(|| origin.ip());
            conn.peer = SocketAddr::new(ip, syn.source_port);

            let reply = conn
                .segment(isn)
                .with_syn()
                .with_ack(syn.seq.wrapping_add(1))
                .with_window(conn.config.window_size);
            conn.send_segment(&reply, false).await?;
            conn.transition(ConnectionState::SynReceived);

            let deadline = Instant::now() + conn.config.timeouts.handshake;
            match conn.receive_until(Some(deadline)).await? {
                Inbound::Segment(seg, _)
                    if seg.ack && !seg.syn && seg.ack_number == isn.wrapping_add(1) =>
                {
                    conn.window_size = conn.config.window_size.max(1);
                    conn.local_seq = isn.wrapping_add(2);
                    conn.peer_next_seq = syn.seq.wrapping_add(2);
                    conn.transition(ConnectionState::Established);
                    return Ok(conn);
                }
                // The initiator gave up on our SYN+ACK and is trying again.
                Inbound::Segment(seg, from) if seg.syn && !seg.ack => {
                    log::debug!("[responder] new SYN seq={} while in SYN_RCVD", seg.seq);
                    carried = Some((seg, from));
                }
                Inbound::Silence => log::debug!("[responder] no handshake ACK; back to LISTEN"),
                _ => log::debug!("[responder] unexpected handshake reply; back to LISTEN"),
            }
        }
    }

    async fn await_syn(&mut self) -> Result<(Segment, SocketAddr), ChannelError> {
        loop {
            if let Inbound::Segment(seg, from) = self.receive_until(None).await? {
                if seg.syn && !seg.ack {
                    return Ok((seg, from));
                }
                self.emit(Event::SegmentDropped {
                    from,
                    reason: DropReason::Unexpected,
                });
            }
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Run the closing exchange for this side's role and release the channel.
    pub async fn close(mut self) -> Result<(), TeardownError> {
        if self.state != ConnectionState::Established {
            return Err(TeardownError::BadState(self.state));
        }
        match self.role {
            Role::Initiator => self.active_close().await?,
            Role::Responder => self.passive_close().await?,
        }
        Ok(())
    }

    async fn active_close(&mut self) -> Result<(), ChannelError> {
        let fin_seq = self.next_seq();
        let fin = self.segment(fin_seq).with_fin();

        let mut retransmission = false;
        loop {
            self.send_segment(&fin, retransmission).await?;
            retransmission = true;
            self.transition(ConnectionState::FinWait1);
            if self.await_fin_ack(fin_seq).await? {
                break;
            }
            // Timed out or acked the wrong thing: try the FIN again.
            self.transition(ConnectionState::Established);
        }

        self.transition(ConnectionState::FinWait2);
        let peer_fin = self.await_peer_fin().await?;
        self.send_ack(peer_fin.seq).await?;
        self.transition(ConnectionState::Closed);
        Ok(())
    }

    async fn await_fin_ack(&mut self, fin_seq: u32) -> Result<bool, ChannelError> {
        let deadline = Instant::now() + self.config.timeouts.handshake;
        loop {
            match self.receive_until(Some(deadline)).await? {
                Inbound::Silence => return Ok(false),
                Inbound::Malformed => {}
                Inbound::Segment(seg, _) if seg.ack && seg.ack_number == fin_seq.wrapping_add(1) => {
                    return Ok(true)
                }
                Inbound::Segment(seg, from) if seg.is_data() => {
                    self.answer_late_data(&seg, from).await?;
                }
                Inbound::Segment(..) => return Ok(false),
            }
        }
    }

    async fn passive_close(&mut self) -> Result<(), ChannelError> {
        let peer_fin = self.await_peer_fin().await?;
        let ack_seq = self.next_seq();
        let fin_ack = self.segment(ack_seq).with_ack(peer_fin.seq.wrapping_add(1));
        self.send_segment(&fin_ack, false).await?;
        self.transition(ConnectionState::CloseWait);

        let fin_seq = self.next_seq();
        let fin = self.segment(fin_seq).with_fin();
        self.send_segment(&fin, false).await?;
        self.transition(ConnectionState::LastAck);

        let mut waits = 0u32;
        loop {
            let deadline = Instant::now() + self.config.timeouts.handshake;
            let acked = loop {
                match self.receive_until(Some(deadline)).await? {
                    Inbound::Silence => break false,
                    Inbound::Segment(seg, _) if seg.ack && seg.ack_number == fin_seq.wrapping_add(1) => {
                        break true
                    }
                    // Our ACK of the peer's FIN was lost.
                    Inbound::Segment(seg, _) if seg.fin && !seg.is_data() => {
                        self.send_segment(&fin_ack, true).await?;
                        self.send_segment(&fin, true).await?;
                    }
                    Inbound::Segment(seg, from) if seg.is_data() => {
                        self.answer_late_data(&seg, from).await?;
                    }
                    _ => {}
                }
            };
            if acked {
                break;
            }
            waits += 1;
            log::debug!("[responder] LAST_ACK wait {waits} timed out");
            if self.config.max_last_ack_waits.is_some_and(|max| waits >= max) {
                log::warn!("[responder] final ACK never arrived; closing anyway");
                break;
            }
        }

        self.transition(ConnectionState::Closed);
        Ok(())
    }

    /// Wait, without limit, for the peer's FIN.
    async fn await_peer_fin(&mut self) -> Result<Segment, ChannelError> {
        loop {
            match self.receive_until(None).await? {
                Inbound::Segment(seg, _) if seg.fin && !seg.is_data() => return Ok(seg),
                Inbound::Segment(seg, from) if seg.is_data() => {
                    self.answer_late_data(&seg, from).await?;
                }
                _ => {}
            }
        }
    }

    /// The peer is still retransmitting data whose ACK it never saw.
    async fn answer_late_data(&mut self, seg: &Segment, from: SocketAddr) -> Result<(), ChannelError> {
        if self.was_delivered(seg.seq) {
            self.send_ack(seg.seq).await
        } else {
            log::warn!("late data seq={} arrived after the transfer ended", seg.seq);
            self.emit(Event::SegmentDropped {
                from,
                reason: DropReason::LateData,
            });
            Ok(())
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Window negotiated during the handshake.
    pub fn window_size(&self) -> u16 {
        self.window_size
    }

    pub fn local_seq(&self) -> u32 {
        self.local_seq
    }

    pub fn peer_next_seq(&self) -> u32 {
        self.peer_next_seq
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Segment I/O (shared with the transfer layer)
    // -----------------------------------------------------------------------

    fn transition(&mut self, next: ConnectionState) {
        debug_assert!(
            self.state.can_transition(next, self.role),
            "illegal transition {} -> {next} for {}",
            self.state,
            self.role
        );
        self.emit(Event::StateChanged {
            role: self.role,
            from: self.state,
            to: next,
        });
        self.state = next;
    }

    pub(crate) fn emit(&self, event: Event) {
        self.events.record(&event);
    }

    /// Take the next sequence number for an outgoing segment.
    fn next_seq(&mut self) -> u32 {
        let seq = self.local_seq;
        self.local_seq = self.local_seq.wrapping_add(1);
        seq
    }

    /// A bare segment from this end to the peer.
    pub(crate) fn segment(&self, seq: u32) -> Segment {
        Segment::new(self.local.port(), self.peer.port(), seq)
    }

    pub(crate) async fn send_segment(
        &mut self,
        seg: &Segment,
        retransmission: bool,
    ) -> Result<(), ChannelError> {
        let bytes = seg.encode()?;
        self.channel.send_to(&bytes, self.peer).await?;
        let summary = seg.to_string();
        self.emit(if retransmission {
            Event::Retransmitted { seq: seg.seq, summary }
        } else {
            Event::SegmentSent { seq: seg.seq, summary }
        });
        Ok(())
    }

    /// Acknowledge the peer's segment `seq`, spending one of our own
    /// sequence numbers.
    pub(crate) async fn send_ack(&mut self, seq: u32) -> Result<(), ChannelError> {
        let own = self.next_seq();
        let ack = self.segment(own).with_ack(seq.wrapping_add(1));
        self.send_segment(&ack, false).await
    }

    pub(crate) async fn receive(&mut self, timeout: Option<Duration>) -> Result<Inbound, ChannelError> {
        self.receive_until(timeout.map(|t| Instant::now() + t)).await
    }

    /// Wait for the next usable segment until `deadline` (`None`: forever).
    ///
    /// Segments carrying someone else's ports are reported and skipped once
    /// a peer is known; undecodable and corrupt ones end the wait as
    /// [`Inbound::Malformed`].
    pub(crate) async fn receive_until(&mut self, deadline: Option<Instant>) -> Result<Inbound, ChannelError> {
        if let Some(seg) = self.pending.take() {
            return Ok(Inbound::Segment(seg, self.peer));
        }
        loop {
            let wait = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Ok(Inbound::Silence);
                    }
                    Some(left)
                }
                None => None,
            };
            let Some((bytes, from)) = self.channel.recv_from(wait).await? else {
                return Ok(Inbound::Silence);
            };

            let seg = match Segment::decode(&bytes) {
                Ok(seg) => seg,
                Err(e) => {
                    self.emit(Event::SegmentDropped {
                        from,
                        reason: DropReason::Undecodable(e.to_string()),
                    });
                    return Ok(Inbound::Malformed);
                }
            };
            if self.knows_peer()
                && (seg.source_port != self.peer.port() || seg.dest_port != self.local.port())
            {
                self.emit(Event::SegmentDropped {
                    from,
                    reason: DropReason::WrongPorts {
                        source_port: seg.source_port,
                        dest_port: seg.dest_port,
                    },
                });
                continue;
            }
            if seg.verify().is_err() {
                self.emit(Event::SegmentDropped {
                    from,
                    reason: DropReason::BadChecksum,
                });
                return Ok(Inbound::Malformed);
            }

            self.emit(Event::SegmentReceived {
                seq: seg.seq,
                summary: seg.to_string(),
            });
            return Ok(Inbound::Segment(seg, from));
        }
    }

    fn knows_peer(&self) -> bool {
        !matches!(self.state, ConnectionState::Closed | ConnectionState::Listen)
    }

    /// Put a teardown segment back for [`Connection::close`] to find.
    pub(crate) fn stash(&mut self, seg: Segment) {
        self.pending = Some(seg);
    }

    /// Close a data phase: `written` are the peer sequence numbers whose
    /// payload reached the sink, `span` how many positions the phase used.
    pub(crate) fn mark_delivered(&mut self, written: impl IntoIterator<Item = u32>, span: u32) {
        self.delivered.extend(written);
        self.peer_next_seq = self.peer_next_seq.wrapping_add(span);
    }

    /// `true` only for data that was actually written; gaps stay unacknowledged.
    pub(crate) fn was_delivered(&self, seq: u32) -> bool {
        self.delivered.contains(&seq)
    }
}
