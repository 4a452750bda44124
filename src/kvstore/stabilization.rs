use crate::clock::Timestamp;
use crate::kvstore::local_store::{LocalStore, StoredEntry};
use crate::membership::NodeAddress;
use crate::ring::{HashRing, ReplicaRole};
use crate::wire::{Message, Outbox, ReplicateAck, ReplicatePush};
use std::collections::BTreeMap;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct StabilizationReport {
    pub(crate) pushed: usize,
    pub(crate) roles_refreshed: usize,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct PendingPush {
    role: ReplicaRole,
    last_sent: Timestamp,
}

/// PendingPushes tracks every (key, holder) copy we pushed that the holder hasn't acknowledged.
/// Each one is re-sent until acknowledged, or until the holder leaves the key's replica set.
#[derive(Debug, Default)]
pub(crate) struct PendingPushes {
    pending: BTreeMap<(String, NodeAddress), PendingPush>,
}

impl PendingPushes {
    pub(crate) fn new() -> Self {
        PendingPushes::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    /// Drop pushes to holders that aren't replicas of the key on `ring`. The rest take the role
    /// `ring` gives them.
    fn retarget(&mut self, ring: &HashRing) {
        self.pending.retain(|(key, holder), push| {
            match ring.replicas_for(key).ok().and_then(|set| set.role_of(holder)) {
                Some(role) => {
                    push.role = role;
                    true
                }
                None => false,
            }
        });
    }

    /// Forget a push once the holder has a copy at least as new as ours.
    ///
    /// CAS: Return true if we successfully mutated state.
    pub(crate) fn acknowledge<S: LocalStore>(&mut self, local: &S, ack: &ReplicateAck) -> bool {
        if let Some(entry) = local.get(&ack.key) {
            // Our copy changed since; the next re-send carries it.
            if ack.write_timestamp < entry.write_timestamp {
                return false;
            }
        }

        self.pending.remove(&(ack.key.clone(), ack.source)).is_some()
    }

    /// Re-send every push last sent at least `retry_interval` ticks ago. Returns how many went
    /// out.
    pub(crate) fn resend_due<S: LocalStore>(
        &mut self,
        self_address: NodeAddress,
        local: &S,
        now: Timestamp,
        retry_interval: i64,
        outbox: &mut Outbox,
    ) -> usize {
        let mut resent = 0;
        for ((key, holder), push) in self.pending.iter_mut() {
            if now.ticks_since(push.last_sent) < retry_interval {
                continue;
            }
            if let Some(entry) = local.get(key) {
                outbox.push(*holder, replicate(self_address, key, entry, push.role));
                push.last_sent = now;
                resent += 1;
            }
        }
        resent
    }
}

fn replicate(self_address: NodeAddress, key: &str, entry: &StoredEntry, role: ReplicaRole) -> Message {
    Message::Replicate(ReplicatePush {
        source: self_address,
        key: key.to_string(),
        value: entry.value.clone(),
        write_timestamp: entry.write_timestamp,
        role,
    })
}

/// Re-replicate after a ring change. For every locally held key, push our copy to each holder
/// in the new replica set that wasn't in the old one, and refresh our own recorded role. Every
/// push stays in `pending` until acknowledged.
///
/// Nothing is ever deleted here, even when we drop out of a key's replica set. Delete markers are
/// pushed like any other copy.
pub(crate) fn stabilize<S: LocalStore>(
    self_address: NodeAddress,
    local: &mut S,
    old_ring: &HashRing,
    new_ring: &HashRing,
    pending: &mut PendingPushes,
    now: Timestamp,
    outbox: &mut Outbox,
) -> StabilizationReport {
    let mut report = StabilizationReport::default();
    pending.retarget(new_ring);

    for (key, entry) in local.entries() {
        let new_set = match new_ring.replicas_for(&key) {
            Ok(set) => set,
            // Fewer than 3 members left. Nowhere to push to.
            Err(_) => continue,
        };
        // An old ring too small to place replicas means every new holder is new.
        let old_set = old_ring.replicas_for(&key).ok();

        if let Some(role) = new_set.role_of(&self_address) {
            if role != entry.role && local.set_role(&key, role) {
                report.roles_refreshed += 1;
            }
        }

        for (role, holder) in new_set.with_roles() {
            if holder == self_address {
                continue;
            }
            if old_set.map_or(false, |old| old.contains(&holder)) {
                continue;
            }

            outbox.push(holder, replicate(self_address, &key, &entry, role));
            pending
                .pending
                .insert((key.clone(), holder), PendingPush { role, last_sent: now });
            report.pushed += 1;
        }
    }

    report
}

/// Store a pushed copy if we don't have the key, or if ours is older. Delete markers win the
/// same way values do.
///
/// CAS: Return true if we successfully mutated state.
pub(crate) fn apply_replica_push<S: LocalStore>(local: &mut S, push: &ReplicatePush) -> bool {
    if let Some(existing) = local.get(&push.key) {
        if push.write_timestamp <= existing.write_timestamp {
            return false;
        }
    }

    local.put(
        push.key.clone(),
        StoredEntry {
            value: push.value.clone(),
            write_timestamp: push.write_timestamp,
            role: push.role,
        },
    );
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvstore::InMemoryStore;

    fn addr(id: i32) -> NodeAddress {
        NodeAddress::new(id, 0)
    }

    fn ring_of(ids: &[i32]) -> HashRing {
        HashRing::build(ids.iter().copied().map(addr), 512)
    }

    fn pushes(outbox: &mut Outbox) -> Vec<(NodeAddress, ReplicatePush)> {
        outbox
            .take()
            .into_iter()
            .filter_map(|(to, message)| match message {
                Message::Replicate(push) => Some((to, push)),
                _ => None,
            })
            .collect()
    }

    fn ack(from: NodeAddress, key: &str, ts: i64) -> ReplicateAck {
        ReplicateAck {
            source: from,
            key: key.into(),
            write_timestamp: Timestamp::new(ts),
        }
    }

    // A 4-node ring, the ring left after the primary of "foo" dies, a surviving holder and the
    // node that replaces the dead one.
    fn primary_loss() -> (HashRing, HashRing, NodeAddress, NodeAddress) {
        let old_ring = ring_of(&[1, 2, 3, 4]);
        let old_set = old_ring.replicas_for("foo").unwrap();
        let dead = old_set.primary();
        let survivor = old_set.addresses()[1];
        let new_ring = HashRing::build(old_ring.nodes().iter().map(|n| n.address).filter(|a| *a != dead), 512);
        let replacement = *new_ring
            .replicas_for("foo")
            .unwrap()
            .addresses()
            .iter()
            .find(|a| !old_set.contains(a))
            .unwrap();
        (old_ring, new_ring, survivor, replacement)
    }

    #[test]
    fn losing_a_holder_pushes_to_the_replacement_only() {
        let (old_ring, new_ring, survivor, replacement) = primary_loss();
        let new_set = new_ring.replicas_for("foo").unwrap();

        let mut local = InMemoryStore::new();
        local.put(
            "foo".into(),
            StoredEntry::new("bar".into(), Timestamp::new(3), ReplicaRole::Secondary),
        );
        let mut pending = PendingPushes::new();
        let mut outbox = Outbox::new();

        let report = stabilize(survivor, &mut local, &old_ring, &new_ring, &mut pending, Timestamp::new(20), &mut outbox);

        let sent = pushes(&mut outbox);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, replacement);
        assert_eq!(sent[0].1.value.as_deref(), Some("bar"));
        assert_eq!(sent[0].1.write_timestamp, Timestamp::new(3));
        assert_eq!(Some(sent[0].1.role), new_set.role_of(&replacement));
        assert_eq!(report.pushed, 1);
        assert_eq!(pending.len(), 1);

        assert_eq!(Some(local.read("foo").unwrap().role), new_set.role_of(&survivor));
    }

    #[test]
    fn unacknowledged_pushes_are_resent_until_acked() {
        let (old_ring, new_ring, survivor, replacement) = primary_loss();
        let mut local = InMemoryStore::new();
        local.put(
            "foo".into(),
            StoredEntry::new("bar".into(), Timestamp::new(3), ReplicaRole::Secondary),
        );
        let mut pending = PendingPushes::new();
        let mut outbox = Outbox::new();
        stabilize(survivor, &mut local, &old_ring, &new_ring, &mut pending, Timestamp::new(20), &mut outbox);
        // First push is lost.
        outbox.take();

        assert_eq!(pending.resend_due(survivor, &local, Timestamp::new(22), 3, &mut outbox), 0);
        assert_eq!(pending.resend_due(survivor, &local, Timestamp::new(23), 3, &mut outbox), 1);
        let sent = pushes(&mut outbox);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, replacement);

        // Not due again until another interval has passed.
        assert_eq!(pending.resend_due(survivor, &local, Timestamp::new(24), 3, &mut outbox), 0);

        // An ack from someone else, or for an older copy, doesn't clear it.
        assert!(!pending.acknowledge(&local, &ack(addr(99), "foo", 3)));
        assert!(!pending.acknowledge(&local, &ack(replacement, "foo", 2)));
        assert_eq!(pending.len(), 1);

        assert!(pending.acknowledge(&local, &ack(replacement, "foo", 3)));
        assert_eq!(pending.len(), 0);
        assert_eq!(pending.resend_due(survivor, &local, Timestamp::new(40), 3, &mut outbox), 0);
        assert!(outbox.take().is_empty());
    }

    #[test]
    fn resend_carries_the_current_copy() {
        let (old_ring, new_ring, survivor, replacement) = primary_loss();
        let mut local = InMemoryStore::new();
        local.put(
            "foo".into(),
            StoredEntry::new("bar".into(), Timestamp::new(3), ReplicaRole::Secondary),
        );
        let mut pending = PendingPushes::new();
        let mut outbox = Outbox::new();
        stabilize(survivor, &mut local, &old_ring, &new_ring, &mut pending, Timestamp::new(20), &mut outbox);
        outbox.take();

        local.delete("foo", Timestamp::new(21)).unwrap();
        pending.resend_due(survivor, &local, Timestamp::new(25), 3, &mut outbox);
        let sent = pushes(&mut outbox);
        assert_eq!(sent[0].0, replacement);
        assert_eq!(sent[0].1.value, None);
        assert_eq!(sent[0].1.write_timestamp, Timestamp::new(21));
    }

    #[test]
    fn ring_change_drops_pushes_to_holders_that_left() {
        let (old_ring, new_ring, survivor, replacement) = primary_loss();
        let mut local = InMemoryStore::new();
        local.put(
            "foo".into(),
            StoredEntry::new("bar".into(), Timestamp::new(3), ReplicaRole::Secondary),
        );
        let mut pending = PendingPushes::new();
        let mut outbox = Outbox::new();
        stabilize(survivor, &mut local, &old_ring, &new_ring, &mut pending, Timestamp::new(20), &mut outbox);
        assert_eq!(pending.len(), 1);

        // The replacement dies too before acknowledging.
        let smaller = HashRing::build(new_ring.nodes().iter().map(|n| n.address).filter(|a| *a != replacement), 512);
        stabilize(survivor, &mut local, &new_ring, &smaller, &mut pending, Timestamp::new(30), &mut outbox);
        assert_eq!(pending.len(), 0);
    }

    #[test]
    fn growing_from_a_tiny_ring_pushes_to_every_other_holder() {
        let old_ring = ring_of(&[1, 2]);
        let new_ring = ring_of(&[1, 2, 3]);
        let mut local = InMemoryStore::new();
        local.put(
            "k".into(),
            StoredEntry::new("v".into(), Timestamp::new(1), ReplicaRole::Primary),
        );
        let mut pending = PendingPushes::new();
        let mut outbox = Outbox::new();

        stabilize(addr(1), &mut local, &old_ring, &new_ring, &mut pending, Timestamp::ZERO, &mut outbox);

        let mut targets: Vec<NodeAddress> = pushes(&mut outbox).into_iter().map(|(to, _)| to).collect();
        targets.sort();
        assert_eq!(targets, vec![addr(2), addr(3)]);
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn shrinking_below_three_is_a_no_op() {
        let mut local = InMemoryStore::new();
        local.put(
            "k".into(),
            StoredEntry::new("v".into(), Timestamp::new(1), ReplicaRole::Primary),
        );
        let mut pending = PendingPushes::new();
        let mut outbox = Outbox::new();

        let report = stabilize(
            addr(1),
            &mut local,
            &ring_of(&[1, 2, 3]),
            &ring_of(&[1, 2]),
            &mut pending,
            Timestamp::ZERO,
            &mut outbox,
        );
        assert_eq!(report, StabilizationReport::default());
        assert_eq!(outbox.len(), 0);
        assert_eq!(local.len(), 1);
    }

    #[test]
    fn push_only_overwrites_older_copies() {
        let mut local = InMemoryStore::new();
        let push = |value: Option<&str>, ts: i64| ReplicatePush {
            source: addr(2),
            key: "k".into(),
            value: value.map(str::to_string),
            write_timestamp: Timestamp::new(ts),
            role: ReplicaRole::Tertiary,
        };

        assert!(apply_replica_push(&mut local, &push(Some("a"), 5)));
        assert!(!apply_replica_push(&mut local, &push(Some("b"), 5)));
        assert!(!apply_replica_push(&mut local, &push(Some("c"), 4)));
        assert_eq!(local.read("k").unwrap().value.as_deref(), Some("a"));

        assert!(apply_replica_push(&mut local, &push(Some("d"), 6)));
        assert_eq!(local.read("k").unwrap().to_string(), "d:6:TERTIARY");

        // A newer delete marker wins, and an older value can't undo it.
        assert!(apply_replica_push(&mut local, &push(None, 7)));
        assert!(local.read("k").is_err());
        assert!(!apply_replica_push(&mut local, &push(Some("d"), 6)));
        assert!(local.read("k").is_err());
    }
}
