use crate::clock::Timestamp;
use crate::membership::address::{MemberId, NodeAddress};
use std::collections::BTreeMap;

/// MemberEntry is one known cluster member, as seen from the local node.
///
/// `timestamp` is the local clock reading when `heartbeat` last advanced. It is only meaningful
/// to the node that wrote it; receivers always replace it with their own receipt time.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MemberEntry {
    pub id: MemberId,
    pub port: i16,
    pub heartbeat: i64,
    pub timestamp: Timestamp,
}

impl MemberEntry {
    pub fn new(address: NodeAddress, heartbeat: i64, timestamp: Timestamp) -> Self {
        MemberEntry {
            id: address.id(),
            port: address.port(),
            heartbeat,
            timestamp,
        }
    }

    pub fn address(&self) -> NodeAddress {
        NodeAddress::new(self.id, self.port)
    }
}

/// Result of merging one gossiped entry into the local store.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum MergeOutcome {
    Inserted,
    Advanced,
    Unchanged,
    Tombstoned,
}

/// MembershipStore is the local view of the cluster. At most one entry per member id. The self
/// entry is held separately so it can never be evicted.
pub struct MembershipStore {
    self_entry: MemberEntry,
    members: BTreeMap<MemberId, MemberEntry>,
    // Recently evicted ids and when they were evicted. Gossip about these is ignored so a dead
    // member can't be re-added by peers that haven't evicted it yet.
    tombstones: BTreeMap<MemberId, Timestamp>,
}

impl MembershipStore {
    pub(crate) fn new(self_address: NodeAddress, now: Timestamp) -> Self {
        MembershipStore {
            self_entry: MemberEntry::new(self_address, 0, now),
            members: BTreeMap::new(),
            tombstones: BTreeMap::new(),
        }
    }

    pub fn self_entry(&self) -> &MemberEntry {
        &self.self_entry
    }

    /// Number of known members, including self.
    pub fn len(&self) -> usize {
        self.members.len() + 1
    }

    pub fn contains(&self, id: MemberId) -> bool {
        id == self.self_entry.id || self.members.contains_key(&id)
    }

    pub fn get(&self, id: MemberId) -> Option<&MemberEntry> {
        if id == self.self_entry.id {
            Some(&self.self_entry)
        } else {
            self.members.get(&id)
        }
    }

    /// Full copy of the store, self first. This is what JOIN_REPLY and HEARTBEAT carry.
    pub fn snapshot(&self) -> Vec<MemberEntry> {
        let mut snapshot = Vec::with_capacity(self.len());
        snapshot.push(self.self_entry);
        snapshot.extend(self.members.values().copied());
        snapshot
    }

    pub fn addresses(&self) -> Vec<NodeAddress> {
        self.snapshot().iter().map(MemberEntry::address).collect()
    }

    /// Peers whose heartbeat advanced no more than `suspect_threshold` ticks ago.
    pub fn trusted_peers(&self, now: Timestamp, suspect_threshold: i64) -> Vec<NodeAddress> {
        self.members
            .values()
            .filter(|entry| now.ticks_since(entry.timestamp) <= suspect_threshold)
            .map(MemberEntry::address)
            .collect()
    }

    /// Insert `entry` stamped with the local receipt time, iff its id is unknown.
    ///
    /// CAS: Return true if we successfully mutated state.
    pub(crate) fn insert_if_absent(&mut self, entry: &MemberEntry, now: Timestamp) -> bool {
        if self.contains(entry.id) {
            return false;
        }

        self.members.insert(
            entry.id,
            MemberEntry {
                timestamp: now,
                ..*entry
            },
        );
        true
    }

    /// Merge a gossiped entry. Unknown ids are inserted, known ids only move forward when the
    /// incoming heartbeat is strictly greater. Heartbeats never regress.
    pub(crate) fn merge_heartbeat(&mut self, incoming: &MemberEntry, now: Timestamp) -> MergeOutcome {
        if incoming.id == self.self_entry.id {
            return MergeOutcome::Unchanged;
        }
        if self.tombstones.contains_key(&incoming.id) {
            return MergeOutcome::Tombstoned;
        }

        if self.insert_if_absent(incoming, now) {
            return MergeOutcome::Inserted;
        }

        match self.members.get_mut(&incoming.id) {
            Some(existing) if incoming.heartbeat > existing.heartbeat => {
                existing.heartbeat = incoming.heartbeat;
                existing.timestamp = now;
                MergeOutcome::Advanced
            }
            _ => MergeOutcome::Unchanged,
        }
    }

    /// Return the new self heartbeat.
    pub(crate) fn advance_self(&mut self, now: Timestamp) -> i64 {
        self.self_entry.heartbeat += 1;
        self.self_entry.timestamp = now;
        self.self_entry.heartbeat
    }

    /// Remove every peer whose heartbeat hasn't advanced for more than `fail_remove_threshold`
    /// ticks, tombstoning each removed id. Returns the removed entries.
    pub(crate) fn evict_stale(&mut self, now: Timestamp, fail_remove_threshold: i64) -> Vec<MemberEntry> {
        let stale_ids: Vec<MemberId> = self
            .members
            .values()
            .filter(|entry| now.ticks_since(entry.timestamp) > fail_remove_threshold)
            .map(|entry| entry.id)
            .collect();

        let mut evicted = Vec::with_capacity(stale_ids.len());
        for id in stale_ids {
            if let Some(entry) = self.members.remove(&id) {
                self.tombstones.insert(id, now);
                evicted.push(entry);
            }
        }

        evicted
    }

    pub(crate) fn is_tombstoned(&self, id: MemberId) -> bool {
        self.tombstones.contains_key(&id)
    }

    pub(crate) fn clear_tombstone(&mut self, id: MemberId) {
        self.tombstones.remove(&id);
    }

    pub(crate) fn expire_tombstones(&mut self, now: Timestamp, retention: i64) {
        self.tombstones
            .retain(|_, evicted_at| now.ticks_since(*evicted_at) <= retention);
    }
}
