//! Sliding-window send-side bookkeeping.
//!
//! [`OutboundWindow`] holds every pre-built data segment of one transfer plus
//! a per-segment acknowledged flag.  Unlike Go-Back-N the ACKs are
//! **selective**: each acknowledges exactly one segment (`ack_number = seq + 1`).
//!
//! ```text
//!            head           tail
//!             │               │
//!   [✓][✓][✓][ ][✓][ ][ ][ ][ ][ ][ ]
//!             └─── window ────┘
//! ```
//!
//! `tail - head + 1 == window_size` except near the end of the stream, where
//! `tail` is clamped to the last index.  The window slides once the segment
//! at `head` is acknowledged, past any later segments already acknowledged.
//!
//! This module only manages state; all channel I/O is the caller's job.

use crate::segment::Segment;

/// What an incoming ACK did to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// A new segment was acknowledged; `slid` is how far `head` moved.
    Accepted { index: usize, slid: usize },
    /// The segment was already acknowledged.
    Duplicate { index: usize },
    /// The ACK names a segment outside `[head, tail]`.
    OutsideWindow,
}

/// Send-side state for one transfer.
#[derive(Debug)]
pub struct OutboundWindow {
    segments: Vec<Segment>,
    acked: Vec<bool>,
    /// Transmissions per segment.
    sends: Vec<u32>,
    /// Sequence number of `segments[0]`.
    base: u32,
    head: usize,
    size: usize,
}

impl OutboundWindow {
    /// `segments[i]` must carry sequence number `base + i`.
    pub fn new(segments: Vec<Segment>, base: u32, window_size: usize) -> Self {
        debug_assert!(segments
            .iter()
            .enumerate()
            .all(|(i, seg)| seg.seq == base.wrapping_add(i as u32)));
        let n = segments.len();
        Self {
            segments,
            acked: vec![false; n],
            sends: vec![0; n],
            base,
            head: 0,
            size: window_size.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn head(&self) -> usize {
        self.head
    }

    /// Last index inside the window (inclusive).
    ///
    /// Meaningless once [`is_complete`](Self::is_complete) holds.
    pub fn tail(&self) -> usize {
        (self.head + self.size - 1).min(self.len().saturating_sub(1))
    }

    /// Number of slots currently inside the window.
    pub fn span(&self) -> usize {
        if self.is_complete() {
            0
        } else {
            self.tail() - self.head + 1
        }
    }

    /// `true` once every segment has been acknowledged.
    pub fn is_complete(&self) -> bool {
        self.head >= self.len()
    }

    pub fn unacked(&self) -> usize {
        self.acked.iter().filter(|a| !**a).count()
    }

    /// Indices inside the window still waiting for an ACK.
    pub fn pending(&self) -> Vec<usize> {
        if self.is_complete() {
            return Vec::new();
        }
        (self.head..=self.tail()).filter(|&i| !self.acked[i]).collect()
    }

    pub fn is_acked(&self, index: usize) -> bool {
        self.acked[index]
    }

    pub fn segment(&self, index: usize) -> &Segment {
        &self.segments[index]
    }

    /// Note a transmission of `index`; returns `true` if it was a resend.
    pub fn record_send(&mut self, index: usize) -> bool {
        self.sends[index] += 1;
        self.sends[index] > 1
    }

    /// Total resends so far.
    pub fn retransmissions(&self) -> u32 {
        self.sends.iter().map(|n| n.saturating_sub(1)).sum()
    }

    /// Apply the ACK whose `ack_number` is `seq + 1` of some segment.
    pub fn on_ack(&mut self, ack_number: u32) -> AckOutcome {
        let offset = ack_number.wrapping_sub(1).wrapping_sub(self.base) as usize;
        if self.is_complete() || offset < self.head || offset > self.tail() {
            return AckOutcome::OutsideWindow;
        }
        if self.acked[offset] {
            return AckOutcome::Duplicate { index: offset };
        }

        self.acked[offset] = true;
        let before = self.head;
        while self.head < self.len() && self.acked[self.head] {
            self.head += 1;
        }
        AckOutcome::Accepted {
            index: offset,
            slid: self.head - before,
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
