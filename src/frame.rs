use crate::ids::Seq;
use bytes::{BufMut, BytesMut};

/// How a receiver interprets data frames on a group. A group is dedicated to a single mode:
///  without a mode tag on the wire, an unreliable payload whose first four bytes happen to
///  look like a sequence number would otherwise be indistinguishable from a reliable frame.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum GroupMode {
    BestEffort,
    Reliable,
}

pub const ACK_PREFIX: &[u8; 4] = b"ACK:";
pub const RELIABLE_HEADER_LEN: usize = 4;

/// The three frame shapes sharing a group's UDP payload space:
/// * ACK: ASCII `ACK:` followed by the decimal sequence number, no terminator
/// * reliable data: 4-byte big-endian sequence number, then the payload
/// * unreliable data: the whole datagram body is the payload
#[derive(Debug, Eq, PartialEq)]
pub enum Frame<'a> {
    Ack(Seq),
    Reliable { seq: Seq, payload: &'a [u8] },
    Unreliable(&'a [u8]),
}

impl<'a> Frame<'a> {
    /// Parses a datagram body. Precedence: the `ACK:` prefix wins over everything, then the
    ///  group's mode decides between the reliable header and a raw payload. Returns `None`
    ///  for frames to be dropped: an `ACK:` frame without a decimal u32 suffix, or an
    ///  undersized frame in reliable mode.
    pub fn parse(buf: &'a [u8], mode: GroupMode) -> Option<Frame<'a>> {
        if buf.len() >= ACK_PREFIX.len() && &buf[..ACK_PREFIX.len()] == ACK_PREFIX {
            let seq = std::str::from_utf8(&buf[ACK_PREFIX.len()..]).ok()?
                .parse::<u32>().ok()?;
            return Some(Frame::Ack(Seq::from_raw(seq)));
        }

        match mode {
            GroupMode::Reliable => {
                if buf.len() < RELIABLE_HEADER_LEN {
                    return None;
                }
                let seq = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
                Some(Frame::Reliable {
                    seq: Seq::from_raw(seq),
                    payload: &buf[RELIABLE_HEADER_LEN..],
                })
            }
            GroupMode::BestEffort => Some(Frame::Unreliable(buf)),
        }
    }
}

pub fn encode_reliable(seq: Seq, payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(RELIABLE_HEADER_LEN + payload.len());
    buf.put_u32(seq.to_raw());
    buf.put_slice(payload);
    buf
}

pub fn encode_ack(seq: Seq) -> Vec<u8> {
    format!("ACK:{}", seq).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[rstest]
    #[case::reliable(GroupMode::Reliable)]
    #[case::best_effort(GroupMode::BestEffort)]
    fn test_parse_ack_wins_in_any_mode(#[case] mode: GroupMode) {
        assert_eq!(Frame::parse(b"ACK:17", mode), Some(Frame::Ack(Seq::from_raw(17))));
        assert_eq!(Frame::parse(b"ACK:0", mode), Some(Frame::Ack(Seq::ZERO)));
        assert_eq!(Frame::parse(b"ACK:4294967295", mode), Some(Frame::Ack(Seq::from_raw(u32::MAX))));
    }

    #[rstest]
    #[case::empty_suffix(b"ACK:".as_slice())]
    #[case::non_decimal(b"ACK:abc".as_slice())]
    #[case::trailing_whitespace(b"ACK:17 ".as_slice())]
    #[case::trailing_newline(b"ACK:17\n".as_slice())]
    #[case::overflow(b"ACK:4294967296".as_slice())]
    #[case::non_utf8(b"ACK:\xff\xfe".as_slice())]
    fn test_parse_malformed_ack_is_dropped(#[case] buf: &[u8]) {
        assert_eq!(Frame::parse(buf, GroupMode::Reliable), None);
    }

    #[rstest]
    #[case::with_payload(vec![0, 0, 0, 7, b'h', b'i'], 7, b"hi".as_slice())]
    #[case::zero_length_payload(vec![0, 0, 0, 0], 0, b"".as_slice())]
    #[case::high_seq(vec![0xff, 0xff, 0xff, 0xff, 1], u32::MAX, [1].as_slice())]
    fn test_parse_reliable(#[case] buf: Vec<u8>, #[case] seq: u32, #[case] payload: &[u8]) {
        assert_eq!(
            Frame::parse(&buf, GroupMode::Reliable),
            Some(Frame::Reliable { seq: Seq::from_raw(seq), payload }),
        );
    }

    #[rstest]
    #[case::empty(b"".as_slice())]
    #[case::one_byte(b"x".as_slice())]
    #[case::three_bytes(b"xyz".as_slice())]
    fn test_parse_undersized_reliable_is_dropped(#[case] buf: &[u8]) {
        assert_eq!(Frame::parse(buf, GroupMode::Reliable), None);
    }

    #[rstest]
    #[case::text(b"hello".as_slice())]
    #[case::exactly_four_bytes(b"ping".as_slice())]
    #[case::empty(b"".as_slice())]
    #[case::almost_ack(b"ACK".as_slice())]
    fn test_parse_best_effort_is_raw_payload(#[case] buf: &[u8]) {
        assert_eq!(Frame::parse(buf, GroupMode::BestEffort), Some(Frame::Unreliable(buf)));
    }

    #[test]
    fn test_encode_reliable() {
        assert_eq!(encode_reliable(Seq::from_raw(7), b"A").as_ref(), &[0, 0, 0, 7, b'A']);
        assert_eq!(encode_reliable(Seq::ZERO, b"").as_ref(), &[0, 0, 0, 0]);
        assert_eq!(
            encode_reliable(Seq::from_raw(0x01020304), b"xy").as_ref(),
            &[1, 2, 3, 4, b'x', b'y'],
        );
    }

    #[test]
    fn test_encode_ack() {
        assert_eq!(encode_ack(Seq::ZERO), b"ACK:0".to_vec());
        assert_eq!(encode_ack(Seq::from_raw(4711)), b"ACK:4711".to_vec());
    }

    #[test]
    fn test_reliable_roundtrip() {
        let frame = encode_reliable(Seq::from_raw(99), b"payload");
        assert_eq!(
            Frame::parse(&frame, GroupMode::Reliable),
            Some(Frame::Reliable { seq: Seq::from_raw(99), payload: b"payload" }),
        );
    }

    #[test]
    fn test_ack_roundtrip() {
        let frame = encode_ack(Seq::from_raw(12345));
        assert_eq!(Frame::parse(&frame, GroupMode::BestEffort), Some(Frame::Ack(Seq::from_raw(12345))));
    }
}
