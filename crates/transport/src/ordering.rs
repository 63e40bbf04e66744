//! Sequence ordering for inbound media
//!
//! Releases items strictly in sequence order. Out-of-order items are held
//! until the gap fills; if more than `window` items pile up behind a gap, the
//! gap is skipped so audio never stalls on a frame that will not arrive.

use std::collections::BTreeMap;

pub struct SequenceOrderer<T> {
    next: Option<u64>,
    pending: BTreeMap<u64, T>,
    window: usize,
    dropped: u64,
    skipped: u64,
}

impl<T> SequenceOrderer<T> {
    pub fn new(window: usize) -> Self {
        Self {
            next: None,
            pending: BTreeMap::new(),
            window: window.max(1),
            dropped: 0,
            skipped: 0,
        }
    }

    /// Expect `first` as the first sequence number instead of taking it from
    /// whichever item arrives first
    pub fn starting_at(mut self, first: u64) -> Self {
        self.next = Some(first);
        self
    }

    /// Offer one item, returning every item now releasable in order
    pub fn push(&mut self, sequence: u64, item: T) -> Vec<T> {
        let next = *self.next.get_or_insert(sequence);

        if sequence < next || self.pending.contains_key(&sequence) {
            self.dropped += 1;
            tracing::debug!(sequence, expected = next, "Dropping stale or duplicate frame");
            return Vec::new();
        }

        self.pending.insert(sequence, item);
        let mut released = self.release_contiguous();

        if self.pending.len() > self.window {
            if let Some(&first) = self.pending.keys().next() {
                let gap = first - self.next.unwrap_or(first);
                self.skipped += gap;
                tracing::warn!(
                    missing = gap,
                    resume_at = first,
                    "Skipping missing inbound frames"
                );
                self.next = Some(first);
                released.extend(self.release_contiguous());
            }
        }

        released
    }

    fn release_contiguous(&mut self) -> Vec<T> {
        let mut out = Vec::new();
        while let Some(next) = self.next {
            match self.pending.remove(&next) {
                Some(item) => {
                    out.push(item);
                    self.next = Some(next + 1);
                }
                None => break,
            }
        }
        out
    }

    /// Items held back behind a gap
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Stale or duplicate items rejected so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Sequence numbers given up on so far
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_order_passthrough() {
        let mut orderer = SequenceOrderer::new(4);
        assert_eq!(orderer.push(1, 'a'), vec!['a']);
        assert_eq!(orderer.push(2, 'b'), vec!['b']);
    }

    #[test]
    fn test_reorders_within_window() {
        let mut orderer = SequenceOrderer::new(4);
        assert_eq!(orderer.push(1, 1), vec![1]);
        assert!(orderer.push(3, 3).is_empty());
        assert!(orderer.push(4, 4).is_empty());
        assert_eq!(orderer.push(2, 2), vec![2, 3, 4]);
        assert_eq!(orderer.pending(), 0);
    }

    #[test]
    fn test_drops_duplicates_and_stale() {
        let mut orderer = SequenceOrderer::new(4);
        orderer.push(5, 5);
        assert!(orderer.push(5, 5).is_empty());
        assert!(orderer.push(3, 3).is_empty());
        assert!(orderer.push(7, 7).is_empty());
        assert!(orderer.push(7, 7).is_empty());
        assert_eq!(orderer.dropped(), 3);
    }

    #[test]
    fn test_skips_gap_when_window_full() {
        let mut orderer = SequenceOrderer::new(2);
        orderer.push(1, 1);
        assert!(orderer.push(3, 3).is_empty());
        assert!(orderer.push(4, 4).is_empty());
        // third item behind the gap exceeds the window
        assert_eq!(orderer.push(5, 5), vec![3, 4, 5]);
        assert_eq!(orderer.skipped(), 1);

        // the late frame is now stale
        assert!(orderer.push(2, 2).is_empty());
    }

    #[test]
    fn test_seeded_start_holds_early_arrivals() {
        let mut orderer = SequenceOrderer::new(4).starting_at(1);
        // chunk 2 beats chunk 1 and waits for it
        assert!(orderer.push(2, 'b').is_empty());
        assert_eq!(orderer.push(1, 'a'), vec!['a', 'b']);
        assert_eq!(orderer.dropped(), 0);
    }
}
