use crate::ids::Seq;

const WINDOW_BITS: usize = 1024;
const WORDS: usize = WINDOW_BITS / 64;

/// Receiver-side duplicate suppression for reliable frames: the highest delivered sequence
///  number plus a sliding bitmap of the `WINDOW_BITS` numbers below it. Out-of-order arrivals
///  inside the window are delivered exactly once; anything older than the window is treated
///  as a duplicate. A single `last_seq` would re-deliver on any out-of-order arrival, and an
///  unbounded set would grow with the group's lifetime.
pub struct ReplayWindow {
    highest: Option<Seq>,
    /// bit k set = the sequence number `highest - k` was already delivered
    bitmap: [u64; WORDS],
}

impl Default for ReplayWindow {
    fn default() -> ReplayWindow {
        ReplayWindow {
            highest: None,
            bitmap: [0; WORDS],
        }
    }
}

impl ReplayWindow {
    pub fn new() -> ReplayWindow {
        ReplayWindow::default()
    }

    /// Records a received sequence number. Returns true iff it was not seen before, i.e. the
    ///  payload should be delivered to the application.
    pub fn observe(&mut self, seq: Seq) -> bool {
        let Some(highest) = self.highest else {
            self.highest = Some(seq);
            self.set_bit(0);
            return true;
        };

        let offset = seq.offset_from(highest);
        if offset > 0 {
            self.shift(offset as usize);
            self.highest = Some(seq);
            self.set_bit(0);
            return true;
        }

        let lag = -(offset as i64) as usize;
        if lag >= WINDOW_BITS {
            // too old to tell apart from a replay
            return false;
        }
        if self.get_bit(lag) {
            false
        }
        else {
            self.set_bit(lag);
            true
        }
    }

    fn get_bit(&self, k: usize) -> bool {
        self.bitmap[k / 64] & (1u64 << (k % 64)) != 0
    }

    fn set_bit(&mut self, k: usize) {
        self.bitmap[k / 64] |= 1u64 << (k % 64);
    }

    /// Moves the window up by `n`: every recorded distance-to-highest grows by `n`, bits
    ///  falling off the upper end are forgotten.
    fn shift(&mut self, n: usize) {
        if n >= WINDOW_BITS {
            self.bitmap = [0; WORDS];
            return;
        }

        let word_shift = n / 64;
        let bit_shift = n % 64;
        let mut next = [0u64; WORDS];
        for i in 0..WORDS {
            let target = i + word_shift;
            if target < WORDS {
                next[target] |= self.bitmap[i] << bit_shift;
            }
            if bit_shift > 0 && target + 1 < WORDS {
                next[target + 1] |= self.bitmap[i] >> (64 - bit_shift);
            }
        }
        self.bitmap = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    fn seq(raw: u32) -> Seq {
        Seq::from_raw(raw)
    }

    #[rstest]
    #[case::zero(0)]
    #[case::mid(4711)]
    #[case::max(u32::MAX)]
    fn test_first_observation_is_fresh(#[case] raw: u32) {
        let mut window = ReplayWindow::new();
        assert!(window.observe(seq(raw)));
        assert!(!window.observe(seq(raw)));
    }

    #[test]
    fn test_in_order_sequence() {
        let mut window = ReplayWindow::new();
        for raw in 0..100 {
            assert!(window.observe(seq(raw)));
        }
        for raw in 0..100 {
            assert!(!window.observe(seq(raw)));
        }
    }

    #[test]
    fn test_out_of_order_within_window() {
        let mut window = ReplayWindow::new();
        assert!(window.observe(seq(10)));
        assert!(window.observe(seq(12)));

        // the gap arrives late and is delivered exactly once
        assert!(window.observe(seq(11)));
        assert!(!window.observe(seq(11)));
        assert!(!window.observe(seq(12)));
    }

    #[test]
    fn test_older_than_window_is_duplicate() {
        let mut window = ReplayWindow::new();
        assert!(window.observe(seq(0)));
        assert!(window.observe(seq(WINDOW_BITS as u32 + 5)));

        // seq 2 was never seen, but it is beyond the window now - suppressed
        assert!(!window.observe(seq(2)));
    }

    #[test]
    fn test_window_boundary() {
        let mut window = ReplayWindow::new();
        assert!(window.observe(seq(0)));
        assert!(window.observe(seq(WINDOW_BITS as u32 - 1)));

        // distance to highest is exactly WINDOW_BITS - 1: still inside
        assert!(!window.observe(seq(0)));
        assert!(window.observe(seq(1)));
    }

    #[test]
    fn test_large_jump_forgets_old_bits_only() {
        let mut window = ReplayWindow::new();
        for raw in 0..8 {
            assert!(window.observe(seq(raw)));
        }
        assert!(window.observe(seq(1_000_000)));

        assert!(!window.observe(seq(1_000_000)));
        assert!(window.observe(seq(999_999)));
        assert!(!window.observe(seq(999_999)));
    }

    #[test]
    fn test_wrap_across_u32_max() {
        let mut window = ReplayWindow::new();
        assert!(window.observe(seq(u32::MAX - 1)));
        assert!(window.observe(seq(u32::MAX)));

        // 0 is "newer" than u32::MAX on the ring
        assert!(window.observe(seq(0)));
        assert!(window.observe(seq(1)));

        assert!(!window.observe(seq(u32::MAX)));
        assert!(!window.observe(seq(0)));
    }

    #[test]
    fn test_shift_across_word_boundaries() {
        let mut window = ReplayWindow::new();
        assert!(window.observe(seq(0)));

        // advance by more than one 64-bit word, less than the full window
        assert!(window.observe(seq(100)));
        assert!(!window.observe(seq(0)));
        assert!(!window.observe(seq(100)));
        assert!(window.observe(seq(50)));
    }
}
