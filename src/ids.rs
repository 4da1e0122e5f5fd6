use std::fmt::{Display, Formatter};

/// Identifies a multicast group for the lifetime of the server process. Ids are handed out
///  strictly increasing and are never reused, even after the group is deleted.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct GroupId(u32);

impl Display for GroupId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl GroupId {
    pub const FIRST: GroupId = GroupId(1);

    pub fn from_raw(value: u32) -> Self {
        Self(value)
    }

    pub fn to_raw(&self) -> u32 {
        self.0
    }

    pub fn next(&self) -> GroupId {
        GroupId(
            self.0.checked_add(1)
                .expect("group id space exhausted")
        )
    }
}

/// Per-group sequence number for reliable sends. The 32-bit space is treated as a ring: `next`
///  wraps at 2^32, and wrap ambiguity is not detected - a receiver's replay window is far
///  smaller than half the ring.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct Seq(u32);

impl Display for Seq {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Seq {
    pub const ZERO: Seq = Seq(0);

    pub fn from_raw(value: u32) -> Self {
        Self(value)
    }

    pub fn to_raw(&self) -> u32 {
        self.0
    }

    pub fn next(&self) -> Seq {
        Seq(self.0.wrapping_add(1))
    }

    /// Signed modular distance from `other` to `self`: positive iff `self` is newer than
    ///  `other` on the ring.
    pub fn offset_from(&self, other: Seq) -> i32 {
        self.0.wrapping_sub(other.0) as i32
    }
}
