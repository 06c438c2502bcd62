//! Data phase: sliding-window sender and reassembling receiver.
//!
//! Exactly one side of an established [`Connection`] calls [`send_stream`]
//! while the other calls [`receive_stream`].  Both run on the connection's
//! own task; transmit and ACK polling are interleaved in one loop.
//!
//! ```text
//!  sender                                    receiver
//!  ┌─ pass ─────────────────────┐
//!  │ send every unacked seg in  │  DATA seq=b+i ──▶  insert into AssemblyMap
//!  │ [head, tail]               │                    (duplicates ignored)
//!  │ poll ack_poll × span       │  ◀── ACK ack=b+i+1 (every valid segment)
//!  └─ repeat until all acked ───┘
//!                                            idle timeout / final marker
//!                                            ──▶ drain map in seq order
//! ```

use std::fmt;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

use crate::assembler::{AssemblyMap, Placement};
use crate::config::Completion;
use crate::connection::{Connection, Inbound};
use crate::error::TransferError;
use crate::events::{DropReason, Event};
use crate::segment::{Segment, CHECKSUM_LEN, FIXED_HEADER_LEN, MAX_SEGMENT_LEN};
use crate::socket::Channel;
use crate::util;
use crate::window::{AckOutcome, OutboundWindow};

/// Summary of one finished transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Data segments sent (sender) or delivered (receiver).
    pub segments: usize,
    pub bytes: usize,
    /// Resent data segments (sender only).
    pub retransmissions: u32,
    /// Duplicate ACKs (sender) or duplicate data segments (receiver).
    pub duplicates: usize,
    pub elapsed: Duration,
}

impl fmt::Display for TransferStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bytes in {} segments, {:.3}s ({} retransmitted, {} duplicates)",
            self.bytes,
            self.segments,
            self.elapsed.as_secs_f64(),
            self.retransmissions,
            self.duplicates
        )
    }
}

fn require_established<C>(conn: &Connection<C>) -> Result<(), TransferError>
where
    C: Channel,
{
    let state = conn.state();
    if state.is_synchronized() {
        Ok(())
    } else {
        Err(TransferError::BadState(state))
    }
}

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

/// Read `source` to the end and deliver it reliably to the peer.
///
/// Retries without limit unless [`crate::config::Config::max_send_rounds`]
/// is set.  A FIN from the peer means it has stopped receiving: the sender
/// keeps collecting ACKs for one handshake timeout, then fails with
/// [`TransferError::PeerClosed`].  Either way the FIN is kept for
/// [`Connection::close`].
pub async fn send_stream<C, R>(
    conn: &mut Connection<C>,
    mut source: R,
) -> Result<TransferStats, TransferError>
where
    C: Channel,
    R: AsyncRead + Unpin,
{
    require_established(conn)?;
    let chunk_size = conn.config.chunk_size;
    if chunk_size == 0 || FIXED_HEADER_LEN + CHECKSUM_LEN + chunk_size > MAX_SEGMENT_LEN {
        return Err(TransferError::InvalidChunkSize(chunk_size));
    }

    let started = Instant::now();
    let mut data = Vec::new();
    source.read_to_end(&mut data).await?;

    let marked = conn.config.completion == Completion::FinalMarker;
    let mut chunks = util::split_chunks(&data, chunk_size);
    if marked && chunks.is_empty() {
        // The receiver still needs something to carry the marker.
        chunks.push(Vec::new());
    }

    let base = conn.local_seq;
    let last = chunks.len().saturating_sub(1);
    let segments: Vec<Segment> = chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let seg = conn.segment(base.wrapping_add(i as u32)).with_payload(chunk);
            if marked && i == last {
                seg.with_fin()
            } else {
                seg
            }
        })
        .collect();

    let mut window = OutboundWindow::new(segments, base, usize::from(conn.window_size()));
    log::debug!(
        "[sender] {} bytes in {} segments, window {}",
        data.len(),
        window.len(),
        conn.window_size()
    );

    let mut rounds = 0u32;
    let mut duplicate_acks = 0usize;
    let mut peer_fin: Option<(Segment, Instant)> = None;
    while !window.is_complete() {
        if let Some((fin, give_up_at)) = &peer_fin {
            if Instant::now() >= *give_up_at {
                let unacked = window.unacked();
                log::warn!("[sender] peer closed with {unacked} segment(s) unacknowledged");
                conn.stash(fin.clone());
                return Err(TransferError::PeerClosed { unacked });
            }
        }
        if let Some(max) = conn.config.max_send_rounds {
            if rounds >= max {
                return Err(TransferError::RetriesExhausted {
                    rounds,
                    unacked: window.unacked(),
                });
            }
        }
        rounds += 1;

        let batch = window.pending();
        for &index in &batch {
            let resend = window.record_send(index);
            conn.send_segment(window.segment(index), resend).await?;
        }

        // Poll one slot per segment in the window, or until this pass is answered.
        let slots = u32::try_from(window.span()).unwrap_or(u32::MAX);
        let deadline = Instant::now() + conn.config.timeouts.ack_poll * slots;
        while !batch.iter().all(|&index| window.is_acked(index)) {
            match conn.receive_until(Some(deadline)).await? {
                Inbound::Silence => break,
                Inbound::Segment(seg, _) if seg.ack && !seg.syn && !seg.fin => {
                    match window.on_ack(seg.ack_number) {
                        AckOutcome::Accepted { slid, .. } if slid > 0 => {
                            log::debug!("[sender] window slid {slid} to head={}", window.head());
                        }
                        AckOutcome::Accepted { .. } => {}
                        AckOutcome::Duplicate { .. } | AckOutcome::OutsideWindow => {
                            duplicate_acks += 1;
                        }
                    }
                }
                Inbound::Segment(seg, _) if seg.fin && !seg.is_data() && peer_fin.is_none() => {
                    log::info!("[sender] peer sent FIN with {} segment(s) unacknowledged", window.unacked());
                    let give_up_at = Instant::now() + conn.config.timeouts.handshake;
                    peer_fin = Some((seg, give_up_at));
                }
                _ => {}
            }
        }
    }

    if let Some((fin, _)) = peer_fin {
        conn.stash(fin);
    }
    conn.local_seq = base.wrapping_add(window.len() as u32);
    let stats = TransferStats {
        segments: window.len(),
        bytes: data.len(),
        retransmissions: window.retransmissions(),
        duplicates: duplicate_acks,
        elapsed: started.elapsed(),
    };
    conn.emit(Event::TransferComplete {
        segments: stats.segments,
        bytes: stats.bytes,
    });
    Ok(stats)
}

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

/// Collect the peer's data and write it, in order, to `sink`.
///
/// With [`Completion::IdleTimeout`] the transfer ends after
/// [`crate::config::Timeouts::idle`] without a segment; with
/// [`Completion::FinalMarker`] it ends once every segment up to the marked
/// one is held.  Positions still missing at that point are logged and
/// skipped.
pub async fn receive_stream<C, W>(
    conn: &mut Connection<C>,
    mut sink: W,
) -> Result<TransferStats, TransferError>
where
    C: Channel,
    W: AsyncWrite + Unpin,
{
    require_established(conn)?;
    let started = Instant::now();
    let marked = conn.config.completion == Completion::FinalMarker;
    let idle = conn.config.timeouts.idle;
    let mut map = AssemblyMap::new(conn.peer_next_seq, conn.window_size());
    let mut duplicates = 0usize;

    loop {
        match conn.receive(Some(idle)).await? {
            Inbound::Silence if !marked => break,
            Inbound::Silence | Inbound::Malformed => {}
            Inbound::Segment(seg, from) if seg.is_data() => {
                let (seq, last) = (seg.seq, seg.fin);
                match map.insert(seq, seg.into_payload().unwrap_or_default()) {
                    Placement::New => {}
                    Placement::Duplicate => duplicates += 1,
                    Placement::OutOfWindow => {
                        conn.emit(Event::SegmentDropped {
                            from,
                            reason: DropReason::OutOfWindow,
                        });
                        continue;
                    }
                    Placement::Stale => {
                        if conn.was_delivered(seq) {
                            conn.send_ack(seq).await?;
                        } else {
                            conn.emit(Event::SegmentDropped {
                                from,
                                reason: DropReason::LateData,
                            });
                        }
                        continue;
                    }
                }
                conn.send_ack(seq).await?;
                if marked && last {
                    map.mark_last(seq);
                }
                if marked && map.is_complete() {
                    break;
                }
            }
            // The peer is already closing; leave its FIN for teardown.
            Inbound::Segment(seg, _) if seg.fin => {
                conn.stash(seg);
                break;
            }
            Inbound::Segment(_, from) => conn.emit(Event::SegmentDropped {
                from,
                reason: DropReason::Unexpected,
            }),
        }
    }

    let missing = map.missing();
    if missing > 0 {
        log::warn!(
            "[receiver] transfer ended with {missing} missing segment(s) at offsets {:?}",
            map.gaps()
        );
    }

    let span = map.span();
    let written: Vec<u32> = map.sequence_numbers().collect();
    let segments = map.len();
    let bytes = map.bytes();
    sink.write_all(&util::join_chunks(map.into_payloads())).await?;
    sink.flush().await?;
    conn.mark_delivered(written, span);

    conn.emit(Event::TransferComplete { segments, bytes });
    Ok(TransferStats {
        segments,
        bytes,
        retransmissions: 0,
        duplicates,
        elapsed: started.elapsed(),
    })
}
