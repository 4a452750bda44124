mod hash_ring;

pub use hash_ring::ring_position;
pub use hash_ring::HashRing;
pub use hash_ring::InsufficientReplicas;
pub use hash_ring::ReplicaRole;
pub use hash_ring::ReplicaSet;
pub use hash_ring::RingNode;
pub use hash_ring::REPLICATION_FACTOR;
