//! Captured segments and the fixed-capacity ring that holds them.
//!
//! The ring evicts strictly oldest-first once it reaches capacity, so memory
//! stays bounded by `capacity` segments regardless of how long capture runs.
//! Sequence numbers are assigned on append and never reused.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};

use crate::stream::MediaPacket;

/// One bounded-duration chunk of captured media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub sequence: u64,
    pub duration: Duration,
    pub packet_count: u32,
    /// Whether any packet in the segment was a keyframe.
    pub keyframe: bool,
    pub data: Bytes,
}

impl Segment {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Media gathered during the current capture interval, not yet sealed into a segment.
#[derive(Debug, Default)]
pub struct SegmentAccumulator {
    data: BytesMut,
    packet_count: u32,
    keyframe: bool,
}

/// Contents of a sealed interval, ready to be appended to a ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedChunk {
    pub duration: Duration,
    pub packet_count: u32,
    pub keyframe: bool,
    pub data: Bytes,
}

impl SegmentAccumulator {
    pub fn push(&mut self, packet: &MediaPacket) {
        if packet.payload.is_empty() {
            return;
        }
        self.data.extend_from_slice(&packet.payload);
        self.packet_count += 1;
        self.keyframe |= packet.keyframe;
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Take everything gathered so far. Returns `None` for an interval with no data.
    pub fn seal(&mut self, duration: Duration) -> Option<SealedChunk> {
        if self.data.is_empty() {
            return None;
        }
        let chunk = SealedChunk {
            duration,
            packet_count: self.packet_count,
            keyframe: self.keyframe,
            data: self.data.split().freeze(),
        };
        self.packet_count = 0;
        self.keyframe = false;
        Some(chunk)
    }
}

/// Counters about ring usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RingStats {
    pub held_segments: usize,
    pub held_bytes: usize,
    pub buffered_duration: Duration,
    pub total_captured: u64,
    pub total_evicted: u64,
}

/// Fixed-capacity FIFO of segments.
#[derive(Debug)]
pub struct SegmentRing {
    capacity: usize,
    segments: VecDeque<Arc<Segment>>,
    next_sequence: u64,
    held_bytes: usize,
    total_evicted: u64,
}

impl SegmentRing {
    /// Create a ring holding at most `capacity` segments (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            segments: VecDeque::with_capacity(capacity),
            next_sequence: 1,
            held_bytes: 0,
            total_evicted: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Append a sealed chunk as the next segment, evicting the oldest first if full.
    ///
    /// Returns the evicted segment, if any.
    pub fn push(&mut self, chunk: SealedChunk) -> Option<Arc<Segment>> {
        let evicted = if self.segments.len() >= self.capacity {
            let old = self.segments.pop_front();
            if let Some(old) = old.as_ref() {
                self.held_bytes = self.held_bytes.saturating_sub(old.len());
                self.total_evicted += 1;
            }
            old
        } else {
            None
        };

        let segment = Segment {
            sequence: self.next_sequence,
            duration: chunk.duration,
            packet_count: chunk.packet_count,
            keyframe: chunk.keyframe,
            data: chunk.data,
        };
        self.next_sequence += 1;
        self.held_bytes += segment.len();
        self.segments.push_back(Arc::new(segment));

        evicted
    }

    /// Point-in-time copy of the held segments. Later pushes never affect it.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            segments: self.segments.iter().cloned().collect(),
        }
    }

    pub fn stats(&self) -> RingStats {
        RingStats {
            held_segments: self.segments.len(),
            held_bytes: self.held_bytes,
            buffered_duration: self.segments.iter().map(|s| s.duration).sum(),
            total_captured: self.next_sequence - 1,
            total_evicted: self.total_evicted,
        }
    }
}

/// Immutable, ordered view of the segments held at one instant.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    segments: Arc<[Arc<Segment>]>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[Arc<Segment>] {
        &self.segments
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Segment>> {
        self.segments.iter()
    }

    pub fn sequences(&self) -> Vec<u64> {
        self.segments.iter().map(|s| s.sequence).collect()
    }

    pub fn duration(&self) -> Duration {
        self.segments.iter().map(|s| s.duration).sum()
    }

    pub fn total_bytes(&self) -> usize {
        self.segments.iter().map(|s| s.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(tag: u8) -> SealedChunk {
        SealedChunk {
            duration: Duration::from_millis(500),
            packet_count: 1,
            keyframe: false,
            data: Bytes::from(vec![tag; 4]),
        }
    }

    #[test]
    fn test_ring_evicts_oldest_at_capacity() {
        let mut ring = SegmentRing::new(4);
        for tag in 1..=4 {
            assert!(ring.push(chunk(tag)).is_none());
        }
        let evicted = ring.push(chunk(5)).expect("full ring evicts");
        assert_eq!(evicted.sequence, 1);

        let snapshot = ring.snapshot();
        assert_eq!(snapshot.sequences(), vec![2, 3, 4, 5]);
        let tags: Vec<u8> = snapshot.iter().map(|s| s.data[0]).collect();
        assert_eq!(tags, vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_ring_never_exceeds_capacity() {
        let mut ring = SegmentRing::new(3);
        for n in 0..50u8 {
            ring.push(chunk(n));
            assert!(ring.len() <= 3);
        }
        let stats = ring.stats();
        assert_eq!(stats.held_segments, 3);
        assert_eq!(stats.total_captured, 50);
        assert_eq!(stats.total_evicted, 47);
        assert_eq!(stats.held_bytes, 12);
        assert_eq!(stats.buffered_duration, Duration::from_millis(1500));
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let mut ring = SegmentRing::new(0);
        ring.push(chunk(1));
        ring.push(chunk(2));
        assert_eq!(ring.capacity(), 1);
        assert_eq!(ring.snapshot().sequences(), vec![2]);
    }

    #[test]
    fn test_snapshot_is_unaffected_by_later_pushes() {
        let mut ring = SegmentRing::new(2);
        ring.push(chunk(1));
        ring.push(chunk(2));
        let before = ring.snapshot();

        ring.push(chunk(3));
        ring.push(chunk(4));

        assert_eq!(before.sequences(), vec![1, 2]);
        assert_eq!(ring.snapshot().sequences(), vec![3, 4]);
    }

    #[test]
    fn test_accumulator_seals_concatenated_payloads() {
        let mut acc = SegmentAccumulator::default();
        acc.push(&MediaPacket::new(0, true, vec![1u8, 2]));
        acc.push(&MediaPacket::new(33, false, Vec::<u8>::new()));
        acc.push(&MediaPacket::new(66, false, vec![3u8]));

        let sealed = acc.seal(Duration::from_millis(500)).unwrap();
        assert_eq!(&sealed.data[..], &[1, 2, 3]);
        assert_eq!(sealed.packet_count, 2);
        assert!(sealed.keyframe);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_accumulator_empty_interval_yields_nothing() {
        let mut acc = SegmentAccumulator::default();
        assert!(acc.seal(Duration::from_millis(500)).is_none());

        acc.push(&MediaPacket::new(0, false, vec![9u8]));
        assert!(acc.seal(Duration::from_millis(500)).is_some());
        assert!(acc.seal(Duration::from_millis(500)).is_none());
    }
}
