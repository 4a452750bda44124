mod emulated;

pub use emulated::EmulatedNetwork;
pub use emulated::NetworkStats;

use crate::membership::NodeAddress;
use bytes::Bytes;

/// Transport moves opaque byte buffers between node addresses. Delivery may be lossy, delayed
/// or reordered; callers must not assume otherwise.
pub trait Transport {
    /// Fire-and-forget.
    fn send(&self, from: NodeAddress, to: NodeAddress, payload: Bytes);

    /// Everything queued for `me` right now, oldest first. Never blocks.
    fn receive(&self, me: NodeAddress) -> Vec<Bytes>;
}
