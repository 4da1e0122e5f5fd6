use crate::ids::Seq;
use bytes::Bytes;
use std::collections::BTreeMap;

/// Per-group table of reliable messages that were sent but not yet acknowledged, keyed by
///  sequence number. Entries live here from first transmission until an ACK arrives or the
///  group is deleted; the retransmission tick re-emits a snapshot of the whole table.
///
/// Payloads are held as `Bytes` so snapshots share the allocation instead of copying.
#[derive(Default)]
pub struct ReliableSendBuffer {
    next_seq: Seq,
    unacked: BTreeMap<Seq, Bytes>,
}

impl ReliableSendBuffer {
    pub fn new() -> ReliableSendBuffer {
        ReliableSendBuffer::default()
    }

    /// Assigns the next sequence number to a payload and stores it until acknowledged.
    pub fn register(&mut self, payload: Bytes) -> Seq {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.next();
        self.unacked.insert(seq, payload);
        seq
    }

    /// Removes an acknowledged entry. Returns false for an unknown sequence number - a late
    ///  or duplicate ACK is harmless.
    pub fn ack(&mut self, seq: Seq) -> bool {
        self.unacked.remove(&seq).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.unacked.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.unacked.len()
    }

    pub fn next_seq(&self) -> Seq {
        self.next_seq
    }

    /// The current outstanding set, cheap to clone out so the caller can release any lock
    ///  before re-sending.
    pub fn snapshot(&self) -> Vec<(Seq, Bytes)> {
        self.unacked.iter()
            .map(|(&seq, payload)| (seq, payload.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_assigns_increasing_seqs() {
        let mut buffer = ReliableSendBuffer::new();

        assert_eq!(buffer.register(Bytes::from_static(b"a")), Seq::ZERO);
        assert_eq!(buffer.register(Bytes::from_static(b"b")), Seq::from_raw(1));
        assert_eq!(buffer.register(Bytes::from_static(b"c")), Seq::from_raw(2));
        assert_eq!(buffer.pending_count(), 3);
        assert_eq!(buffer.next_seq(), Seq::from_raw(3));

        // every stored seq was assigned before the current next_seq
        for (seq, _) in buffer.snapshot() {
            assert!(seq < buffer.next_seq());
        }
    }

    #[test]
    fn test_ack_removes_entry() {
        let mut buffer = ReliableSendBuffer::new();
        let seq_a = buffer.register(Bytes::from_static(b"a"));
        let seq_b = buffer.register(Bytes::from_static(b"b"));

        assert!(buffer.ack(seq_a));
        assert_eq!(buffer.pending_count(), 1);
        assert_eq!(buffer.snapshot(), vec![(seq_b, Bytes::from_static(b"b"))]);

        assert!(buffer.ack(seq_b));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_ack_unknown_seq_is_noop() {
        let mut buffer = ReliableSendBuffer::new();
        buffer.register(Bytes::from_static(b"a"));

        assert!(!buffer.ack(Seq::from_raw(17)));
        assert_eq!(buffer.pending_count(), 1);

        // a duplicate ACK is equally harmless
        assert!(buffer.ack(Seq::ZERO));
        assert!(!buffer.ack(Seq::ZERO));
    }

    #[test]
    fn test_snapshot_is_ordered_by_seq() {
        let mut buffer = ReliableSendBuffer::new();
        for payload in [&b"a"[..], b"b", b"c", b"d"] {
            buffer.register(Bytes::copy_from_slice(payload));
        }
        buffer.ack(Seq::from_raw(1));

        let seqs: Vec<u32> = buffer.snapshot().iter().map(|(seq, _)| seq.to_raw()).collect();
        assert_eq!(seqs, vec![0, 2, 3]);
    }

    #[test]
    fn test_seq_counter_wraps() {
        let mut buffer = ReliableSendBuffer {
            next_seq: Seq::from_raw(u32::MAX),
            unacked: BTreeMap::new(),
        };

        assert_eq!(buffer.register(Bytes::from_static(b"last")), Seq::from_raw(u32::MAX));
        assert_eq!(buffer.register(Bytes::from_static(b"wrapped")), Seq::ZERO);
        assert_eq!(buffer.pending_count(), 2);

        assert!(buffer.ack(Seq::from_raw(u32::MAX)));
        assert!(buffer.ack(Seq::ZERO));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_zero_length_payload() {
        let mut buffer = ReliableSendBuffer::new();
        let seq = buffer.register(Bytes::new());
        assert_eq!(buffer.snapshot(), vec![(seq, Bytes::new())]);
    }
}
