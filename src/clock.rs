use std::fmt;

/// Timestamp is a reading of the node's logical clock, measured in ticks. Nodes never read a
/// wall clock; whoever drives `Node::tick()` decides what "now" is.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Default)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn new(ticks: i64) -> Self {
        Timestamp(ticks)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// Number of ticks between `earlier` and `self`. Negative if `earlier` is in the future.
    pub fn ticks_since(&self, earlier: Timestamp) -> i64 {
        self.0.saturating_sub(earlier.0)
    }

    pub fn plus(&self, ticks: i64) -> Timestamp {
        Timestamp(self.0.saturating_add(ticks))
    }

    pub(crate) fn incr(&mut self) {
        self.0 += 1;
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}
