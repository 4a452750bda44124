use crate::membership::NodeAddress;
use sha2::{Digest, Sha256};
use std::fmt;

/// Number of replicas kept for every key. Fixed; the ring refuses to place keys with fewer
/// members than this.
pub const REPLICATION_FACTOR: usize = 3;

/// ReplicaRole is the slot a replica occupies in a key's replica set, assigned by position.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum ReplicaRole {
    Primary,
    Secondary,
    Tertiary,
}

impl ReplicaRole {
    pub fn from_position(position: usize) -> Self {
        match position {
            0 => ReplicaRole::Primary,
            1 => ReplicaRole::Secondary,
            _ => ReplicaRole::Tertiary,
        }
    }
}

impl fmt::Display for ReplicaRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicaRole::Primary => write!(f, "PRIMARY"),
            ReplicaRole::Secondary => write!(f, "SECONDARY"),
            ReplicaRole::Tertiary => write!(f, "TERTIARY"),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("ring has {available} member(s) but {required} are needed to place replicas")]
pub struct InsufficientReplicas {
    pub available: usize,
    pub required: usize,
}

/// Position of `value` on a ring with `ring_size` slots: the first 8 bytes of its SHA-256,
/// big-endian, modulo the ring size. Every node must compute the same position for the same
/// string, whatever build it runs. A zero `ring_size` is treated as 1.
pub fn ring_position(value: &str, ring_size: u64) -> u64 {
    let digest = Sha256::digest(value.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix) % ring_size.max(1)
}

/// RingNode is a member projected onto the hash space.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RingNode {
    pub address: NodeAddress,
    pub hash_code: u64,
}

/// ReplicaSet is the ordered set of nodes responsible for one key: PRIMARY, SECONDARY, TERTIARY.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ReplicaSet {
    addresses: [NodeAddress; REPLICATION_FACTOR],
}

impl ReplicaSet {
    pub fn primary(&self) -> NodeAddress {
        self.addresses[0]
    }

    pub fn addresses(&self) -> &[NodeAddress] {
        &self.addresses
    }

    pub fn contains(&self, address: &NodeAddress) -> bool {
        self.addresses.contains(address)
    }

    pub fn role_of(&self, address: &NodeAddress) -> Option<ReplicaRole> {
        self.addresses
            .iter()
            .position(|a| a == address)
            .map(ReplicaRole::from_position)
    }

    pub fn with_roles(&self) -> impl Iterator<Item = (ReplicaRole, NodeAddress)> + '_ {
        self.addresses
            .iter()
            .enumerate()
            .map(|(position, address)| (ReplicaRole::from_position(position), *address))
    }
}

/// HashRing is the sorted-by-hash-code projection of a membership snapshot. Ties on hash code
/// are broken by address ordering so two nodes with the same member set always agree.
#[derive(Clone, Debug)]
pub struct HashRing {
    nodes: Vec<RingNode>,
    ring_size: u64,
}

impl HashRing {
    pub fn empty(ring_size: u64) -> Self {
        HashRing {
            nodes: Vec::new(),
            ring_size: ring_size.max(1),
        }
    }

    pub fn build<I>(addresses: I, ring_size: u64) -> Self
    where
        I: IntoIterator<Item = NodeAddress>,
    {
        let nodes = addresses
            .into_iter()
            .map(|address| RingNode {
                address,
                hash_code: ring_position(&address.to_string(), ring_size),
            })
            .collect();

        Self::from_nodes(nodes, ring_size)
    }

    pub(crate) fn from_nodes(mut nodes: Vec<RingNode>, ring_size: u64) -> Self {
        nodes.sort_by(|a, b| a.hash_code.cmp(&b.hash_code).then(a.address.cmp(&b.address)));
        nodes.dedup_by_key(|node| node.address);
        HashRing {
            nodes,
            ring_size: ring_size.max(1),
        }
    }

    pub fn nodes(&self) -> &[RingNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, address: &NodeAddress) -> bool {
        self.nodes.iter().any(|node| &node.address == address)
    }

    /// Element-by-element address comparison. This is how ring changes are detected; there is
    /// no version counter.
    pub fn same_members(&self, other: &HashRing) -> bool {
        self.nodes.len() == other.nodes.len()
            && self
                .nodes
                .iter()
                .zip(other.nodes.iter())
                .all(|(mine, theirs)| mine.address == theirs.address)
    }

    pub fn key_position(&self, key: &str) -> u64 {
        ring_position(key, self.ring_size)
    }

    pub fn replicas_for(&self, key: &str) -> Result<ReplicaSet, InsufficientReplicas> {
        self.replicas_for_position(self.key_position(key))
    }

    fn replicas_for_position(&self, position: u64) -> Result<ReplicaSet, InsufficientReplicas> {
        let n = self.nodes.len();
        if n < REPLICATION_FACTOR {
            return Err(InsufficientReplicas {
                available: n,
                required: REPLICATION_FACTOR,
            });
        }

        // The owner is the first node at or past the key. Past the last node, or at/below the
        // first one, ownership wraps to the start of the ring.
        let first = self.nodes[0].hash_code;
        let last = self.nodes[n - 1].hash_code;
        let start = if position <= first || position > last {
            0
        } else {
            self.nodes.partition_point(|node| node.hash_code < position)
        };

        Ok(ReplicaSet {
            addresses: [
                self.nodes[start].address,
                self.nodes[(start + 1) % n].address,
                self.nodes[(start + 2) % n].address,
            ],
        })
    }
}
