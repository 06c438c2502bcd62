//! Receive-side reassembly.
//!
//! [`AssemblyMap`] collects data segments in whatever order they arrive and
//! hands the payloads back in sequence order once the transfer is over.
//! Positions are relative to the first sequence number of the transfer, so
//! ordering survives `u32` wrap-around.
//!
//! The sender never has a segment in flight beyond `window` positions past
//! the first one this side is still missing, so anything further ahead is
//! refused rather than stored.
//!
//! A repeated sequence number never overwrites the stored payload.

use std::collections::BTreeMap;
use std::ops::Range;

/// Largest relative position treated as ahead of the base; anything further
/// is taken to be behind the transfer.
const MAX_OFFSET: u32 = u32::MAX / 2;

/// Where an incoming segment landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    New,
    Duplicate,
    /// Sequence number precedes the transfer (e.g. a stray from an earlier one).
    Stale,
    /// Further ahead than the sender's window can reach.
    OutOfWindow,
}

/// Out-of-order store for one transfer.
#[derive(Debug)]
pub struct AssemblyMap {
    /// Sequence number of the first segment of the transfer.
    base: u32,
    window: u32,
    entries: BTreeMap<u32, Vec<u8>>,
    /// First relative position not yet held.
    next_missing: u32,
    /// Relative position of the segment marked as last, if any.
    last: Option<u32>,
    bytes: usize,
}

impl AssemblyMap {
    pub fn new(base: u32, window: u16) -> Self {
        Self {
            base,
            window: u32::from(window.max(1)),
            entries: BTreeMap::new(),
            next_missing: 0,
            last: None,
            bytes: 0,
        }
    }

    fn offset(&self, seq: u32) -> Option<u32> {
        let offset = seq.wrapping_sub(self.base);
        (offset <= MAX_OFFSET).then_some(offset)
    }

    /// Store `payload` under `seq` unless that position is already filled.
    pub fn insert(&mut self, seq: u32, payload: Vec<u8>) -> Placement {
        let Some(offset) = self.offset(seq) else {
            return Placement::Stale;
        };
        if offset >= self.next_missing.saturating_add(self.window) {
            return Placement::OutOfWindow;
        }
        if self.entries.contains_key(&offset) {
            return Placement::Duplicate;
        }
        self.bytes += payload.len();
        self.entries.insert(offset, payload);
        while self.entries.contains_key(&self.next_missing) {
            self.next_missing += 1;
        }
        Placement::New
    }

    /// Record that `seq` is the final segment of the transfer.
    pub fn mark_last(&mut self, seq: u32) {
        if let Some(offset) = self.offset(seq) {
            self.last = Some(offset);
        }
    }

    /// `true` once the final segment is known and every position up to it is filled.
    pub fn is_complete(&self) -> bool {
        self.last.is_some_and(|last| self.next_missing > last)
    }

    /// Segments held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Payload bytes held.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Number of positions from the base through the highest one held.
    pub fn span(&self) -> u32 {
        self.entries
            .last_key_value()
            .map_or(0, |(offset, _)| offset + 1)
    }

    /// Positions below [`span`](Self::span) that never arrived.
    pub fn missing(&self) -> usize {
        self.span() as usize - self.entries.len()
    }

    /// Runs of missing relative positions below [`span`](Self::span).
    pub fn gaps(&self) -> Vec<Range<u32>> {
        let mut gaps = Vec::new();
        let mut expected = 0;
        for &offset in self.entries.keys() {
            if offset > expected {
                gaps.push(expected..offset);
            }
            expected = offset + 1;
        }
        gaps
    }

    /// Sequence numbers held, in ascending order.
    pub fn sequence_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries
            .keys()
            .map(|offset| self.base.wrapping_add(*offset))
    }

    /// Payloads in ascending sequence order.
    pub fn into_payloads(self) -> impl Iterator<Item = Vec<u8>> {
        self.entries.into_values()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::join_chunks;

    #[test]
    fn out_of_order_arrivals_drain_in_order() {
        let mut map = AssemblyMap::new(40, 8);
        assert_eq!(map.insert(42, b"GH".to_vec()), Placement::New);
        assert_eq!(map.insert(40, b"ABC".to_vec()), Placement::New);
        assert_eq!(map.insert(41, b"DEF".to_vec()), Placement::New);
        assert_eq!(map.bytes(), 8);
        assert_eq!(join_chunks(map.into_payloads()), b"ABCDEFGH");
    }

    #[test]
    fn duplicate_keeps_first_payload() {
        let mut map = AssemblyMap::new(0, 8);
        map.insert(0, b"first".to_vec());
        assert_eq!(map.insert(0, b"second".to_vec()), Placement::Duplicate);
        assert_eq!(map.len(), 1);
        assert_eq!(join_chunks(map.into_payloads()), b"first");
    }

    #[test]
    fn ordering_survives_wraparound() {
        let mut map = AssemblyMap::new(u32::MAX, 8);
        map.insert(0, b"B".to_vec());
        map.insert(u32::MAX, b"A".to_vec());
        assert_eq!(map.sequence_numbers().collect::<Vec<_>>(), vec![u32::MAX, 0]);
        assert_eq!(join_chunks(map.into_payloads()), b"AB");
    }

    #[test]
    fn sequence_before_base_is_stale() {
        let mut map = AssemblyMap::new(100, 8);
        assert_eq!(map.insert(99, b"old".to_vec()), Placement::Stale);
        assert!(map.is_empty());
    }

    #[test]
    fn positions_beyond_the_window_are_refused() {
        let mut map = AssemblyMap::new(0, 4);
        assert_eq!(map.insert(4, vec![0]), Placement::OutOfWindow);
        assert_eq!(map.insert(1 << 24, vec![0]), Placement::OutOfWindow);
        assert_eq!(map.insert(3, vec![3]), Placement::New);

        // The limit moves with the first missing position, not the highest held.
        map.insert(0, vec![0]);
        assert_eq!(map.insert(5, vec![5]), Placement::OutOfWindow);
        map.insert(1, vec![1]);
        assert_eq!(map.insert(5, vec![5]), Placement::New);
        assert_eq!(map.span(), 6);
    }

    #[test]
    fn gaps_are_reported_as_ranges() {
        let mut map = AssemblyMap::new(10, 8);
        map.insert(10, vec![1]);
        map.insert(13, vec![4]);
        map.insert(15, vec![6]);
        assert_eq!(map.span(), 6);
        assert_eq!(map.missing(), 3);
        assert_eq!(map.gaps(), vec![1..3, 4..5]);
        assert_eq!(map.sequence_numbers().collect::<Vec<_>>(), vec![10, 13, 15]);
    }

    #[test]
    fn completion_needs_marker_and_no_gaps() {
        let mut map = AssemblyMap::new(7, 8);
        map.insert(8, b"b".to_vec());
        map.mark_last(8);
        assert!(!map.is_complete());
        map.insert(7, b"a".to_vec());
        assert!(map.is_complete());
    }

    #[test]
    fn unmarked_map_is_never_complete() {
        let mut map = AssemblyMap::new(0, 8);
        map.insert(0, vec![0]);
        assert!(!map.is_complete());
    }
}
