use crate::api::{EventPublisher, NodeEvent};
use crate::clock::Timestamp;
use crate::membership::address::NodeAddress;
use crate::membership::member_list::{MemberEntry, MembershipStore, MergeOutcome};
use crate::wire::{Message, Outbox};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fmt;

/// Smallest gossip fanout used when the fanout is derived from the cluster size.
const MIN_GOSSIP_FANOUT: usize = 3;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MembershipState {
    Uninitialized,
    Joining,
    InGroup,
    Failed,
}

#[derive(Clone)]
pub(crate) struct MembershipConfig {
    pub(crate) logger: slog::Logger,
    pub(crate) self_address: NodeAddress,
    pub(crate) join_address: NodeAddress,
    pub(crate) round_interval: i64,
    pub(crate) suspect_threshold: i64,
    pub(crate) fail_remove_threshold: i64,
    // None means "scale with cluster size".
    pub(crate) gossip_fanout: Option<usize>,
    pub(crate) rng_seed: u64,
}

/// MembershipProtocol drives join, heartbeats, gossip and failure eviction over the local
/// MembershipStore. It is responsible for "what" to send; the node decides "when" by calling
/// `run_periodic_round()` every tick.
pub(crate) struct MembershipProtocol {
    logger: slog::Logger,
    config: MembershipConfig,
    state: MembershipState,
    store: MembershipStore,
    last_round: Option<Timestamp>,
    rng: StdRng,
    events: EventPublisher,
}

impl MembershipProtocol {
    pub(crate) fn new(config: MembershipConfig, now: Timestamp, events: EventPublisher) -> Self {
        MembershipProtocol {
            logger: config.logger.clone(),
            store: MembershipStore::new(config.self_address, now),
            rng: StdRng::seed_from_u64(config.rng_seed),
            state: MembershipState::Uninitialized,
            last_round: None,
            config,
            events,
        }
    }

    pub(crate) fn state(&self) -> MembershipState {
        self.state
    }

    pub(crate) fn store(&self) -> &MembershipStore {
        &self.store
    }

    pub(crate) fn is_in_group(&self) -> bool {
        self.state == MembershipState::InGroup
    }

    /// Either boot the group (we are the introducer) or ask the introducer to let us in.
    pub(crate) fn start(&mut self, outbox: &mut Outbox) {
        if self.state != MembershipState::Uninitialized {
            slog::warn!(self.logger, "Ignoring start() while {:?}", self.state);
            return;
        }

        if self.config.self_address == self.config.join_address {
            slog::info!(self.logger, "Starting up group...");
            self.state = MembershipState::InGroup;
        } else {
            slog::info!(self.logger, "Trying to join via {}...", self.config.join_address);
            outbox.push(
                self.config.join_address,
                Message::JoinRequest {
                    source: self.config.self_address,
                    heartbeat: self.store.self_entry().heartbeat,
                },
            );
            self.state = MembershipState::Joining;
        }
    }

    pub(crate) fn fail(&mut self) {
        slog::warn!(self.logger, "Marked as failed. Stopping all protocol activity.");
        self.state = MembershipState::Failed;
    }

    pub(crate) fn handle_join_request(
        &mut self,
        source: NodeAddress,
        heartbeat: i64,
        now: Timestamp,
        outbox: &mut Outbox,
    ) {
        if self.state == MembershipState::Failed {
            return;
        }

        // A join is the one way back in after eviction.
        self.store.clear_tombstone(source.id());

        let entry = MemberEntry::new(source, heartbeat, now);
        if !self.store.insert_if_absent(&entry, now) {
            slog::debug!(self.logger, "Duplicate JOIN_REQUEST from {}. Ignoring.", source);
            return;
        }

        self.log_member_added(source);
        outbox.push(
            source,
            Message::JoinReply {
                members: self.store.snapshot(),
            },
        );
    }

    pub(crate) fn handle_join_reply(&mut self, members: &[MemberEntry], now: Timestamp) {
        if self.state == MembershipState::Failed {
            return;
        }

        // Join reply is a one-time bootstrap, known entries are skipped rather than compared.
        for entry in members {
            if self.store.is_tombstoned(entry.id) {
                continue;
            }
            if self.store.insert_if_absent(entry, now) {
                self.log_member_added(entry.address());
            }
        }

        if self.state != MembershipState::InGroup {
            slog::info!(self.logger, "Joined group. Members: {}", self.store.len());
            self.state = MembershipState::InGroup;
        }
    }

    pub(crate) fn handle_heartbeat(&mut self, members: &[MemberEntry], now: Timestamp) {
        if self.state == MembershipState::Failed {
            return;
        }

        for entry in members {
            match self.store.merge_heartbeat(entry, now) {
                MergeOutcome::Inserted => self.log_member_added(entry.address()),
                MergeOutcome::Advanced => {
                    slog::trace!(self.logger, "Heartbeat of {} advanced to {}", entry.address(), entry.heartbeat)
                }
                MergeOutcome::Tombstoned => {
                    slog::trace!(self.logger, "Ignoring gossip about evicted member {}", entry.address())
                }
                MergeOutcome::Unchanged => {}
            }
        }
    }

    /// Evict, advance self, gossip. No-op unless in group and `round_interval` has elapsed since
    /// the last round.
    pub(crate) fn run_periodic_round(&mut self, now: Timestamp, outbox: &mut Outbox) {
        if !self.is_in_group() {
            return;
        }
        if let Some(last_round) = self.last_round {
            if now.ticks_since(last_round) < self.config.round_interval {
                return;
            }
        }
        self.last_round = Some(now);

        // 1. Evict members whose heartbeat stopped advancing.
        for evicted in self.store.evict_stale(now, self.config.fail_remove_threshold) {
            slog::info!(
                self.logger,
                "Removing {} (last heartbeat {} at {:?})",
                evicted.address(),
                evicted.heartbeat,
                evicted.timestamp
            );
            self.events.publish(NodeEvent::MemberRemoved {
                observer: self.config.self_address,
                member: evicted.address(),
            });
        }
        self.store
            .expire_tombstones(now, self.config.fail_remove_threshold.saturating_mul(2));

        // 2. Advance self.
        let heartbeat = self.store.advance_self(now);
        slog::trace!(self.logger, "Heartbeat: {}", heartbeat);

        // 3. Gossip the full store to a random subset of trusted members.
        let trusted = self.store.trusted_peers(now, self.config.suspect_threshold);
        let targets = self.choose_gossip_targets(trusted);
        if targets.is_empty() {
            return;
        }

        let snapshot = self.store.snapshot();
        for target in targets {
            outbox.push(
                target,
                Message::Heartbeat {
                    members: snapshot.clone(),
                },
            );
        }
    }

    fn choose_gossip_targets(&mut self, trusted: Vec<NodeAddress>) -> Vec<NodeAddress> {
        let fanout = self
            .config
            .gossip_fanout
            .unwrap_or_else(|| log_scaled_fanout(self.store.len()));
        if trusted.len() <= fanout {
            return trusted;
        }

        trusted.choose_multiple(&mut self.rng, fanout).copied().collect()
    }

    fn log_member_added(&self, member: NodeAddress) {
        slog::info!(self.logger, "Adding {}", member);
        self.events.publish(NodeEvent::MemberAdded {
            observer: self.config.self_address,
            member,
        });
    }
}

/// `max(MIN_GOSSIP_FANOUT, ceil(log2(n)))`
fn log_scaled_fanout(num_members: usize) -> usize {
    let log2 = (num_members.max(1) as f64).log2().ceil() as usize;
    log2.max(MIN_GOSSIP_FANOUT)
}

impl fmt::Debug for MembershipProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({} members)", self.state, self.store.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::event_bus;
    use crate::api::EventListener;

    fn addr(id: i32) -> NodeAddress {
        NodeAddress::new(id, 0)
    }

    fn config(id: i32) -> MembershipConfig {
        MembershipConfig {
            logger: slog::Logger::root(slog::Discard, slog::o!()),
            self_address: addr(id),
            join_address: addr(1),
            round_interval: 1,
            suspect_threshold: 5,
            fail_remove_threshold: 20,
            gossip_fanout: None,
            rng_seed: id as u64,
        }
    }

    fn started(id: i32, now: i64) -> (MembershipProtocol, EventListener, Outbox) {
        let (publisher, listener) = event_bus();
        let mut protocol = MembershipProtocol::new(config(id), Timestamp::new(now), publisher);
        let mut outbox = Outbox::new();
        protocol.start(&mut outbox);
        (protocol, listener, outbox)
    }

    fn heartbeats_in(outbox: &mut Outbox) -> Vec<NodeAddress> {
        outbox
            .take()
            .into_iter()
            .filter(|(_, m)| matches!(m, Message::Heartbeat { .. }))
            .map(|(to, _)| to)
            .collect()
    }

    #[test]
    fn introducer_boots_the_group_alone() {
        let (protocol, _, mut outbox) = started(1, 0);
        assert_eq!(protocol.state(), MembershipState::InGroup);
        assert_eq!(protocol.store().len(), 1);
        assert!(outbox.take().is_empty());
    }

    #[test]
    fn joiner_sends_join_request_and_waits() {
        let (mut protocol, _, mut outbox) = started(2, 0);
        assert_eq!(protocol.state(), MembershipState::Joining);
        assert_eq!(
            outbox.take(),
            vec![(
                addr(1),
                Message::JoinRequest {
                    source: addr(2),
                    heartbeat: 0
                }
            )]
        );

        // Not in group yet, so no gossip.
        protocol.run_periodic_round(Timestamp::new(1), &mut outbox);
        assert!(outbox.take().is_empty());

        protocol.handle_join_reply(
            &[
                MemberEntry::new(addr(1), 3, Timestamp::new(99)),
                MemberEntry::new(addr(2), 0, Timestamp::new(99)),
            ],
            Timestamp::new(2),
        );
        assert_eq!(protocol.state(), MembershipState::InGroup);
        assert_eq!(
            protocol.store().get(1),
            Some(&MemberEntry::new(addr(1), 3, Timestamp::new(2)))
        );
    }

    #[test]
    fn join_request_is_answered_once_with_a_snapshot() {
        let (mut protocol, mut listener, mut outbox) = started(1, 0);

        protocol.handle_join_request(addr(2), 0, Timestamp::new(1), &mut outbox);
        protocol.handle_join_request(addr(2), 0, Timestamp::new(1), &mut outbox);

        let sent = outbox.take();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            (to, Message::JoinReply { members }) => {
                assert_eq!(*to, addr(2));
                assert_eq!(members.len(), 2);
            }
            other => panic!("Unexpected message {:?}", other),
        }
        assert_eq!(
            listener.drain(),
            vec![NodeEvent::MemberAdded {
                observer: addr(1),
                member: addr(2)
            }]
        );
    }

    #[test]
    fn periodic_round_respects_round_interval() {
        let (publisher, _listener) = event_bus();
        let mut cfg = config(1);
        cfg.round_interval = 3;
        let mut protocol = MembershipProtocol::new(cfg, Timestamp::ZERO, publisher);
        let mut outbox = Outbox::new();
        protocol.start(&mut outbox);

        protocol.run_periodic_round(Timestamp::new(0), &mut outbox);
        assert_eq!(protocol.store().self_entry().heartbeat, 1);
        protocol.run_periodic_round(Timestamp::new(2), &mut outbox);
        assert_eq!(protocol.store().self_entry().heartbeat, 1);
        protocol.run_periodic_round(Timestamp::new(3), &mut outbox);
        assert_eq!(protocol.store().self_entry().heartbeat, 2);
    }

    #[test]
    fn gossip_skips_suspects_and_eviction_is_final() {
        let (mut protocol, mut listener, mut outbox) = started(1, 0);
        protocol.handle_join_request(addr(2), 0, Timestamp::new(0), &mut outbox);
        protocol.handle_join_request(addr(3), 0, Timestamp::new(0), &mut outbox);
        outbox.take();
        listener.drain();

        // Member 3 keeps advancing, member 2 goes silent.
        for t in 1..=6 {
            protocol.handle_heartbeat(&[MemberEntry::new(addr(3), t, Timestamp::ZERO)], Timestamp::new(t));
        }
        protocol.run_periodic_round(Timestamp::new(6), &mut outbox);
        assert_eq!(heartbeats_in(&mut outbox), vec![addr(3)]);
        assert!(protocol.store().contains(2));

        for t in 7..=20 {
            protocol.handle_heartbeat(&[MemberEntry::new(addr(3), t, Timestamp::ZERO)], Timestamp::new(t));
            protocol.run_periodic_round(Timestamp::new(t), &mut outbox);
        }
        assert!(protocol.store().contains(2));

        protocol.handle_heartbeat(&[MemberEntry::new(addr(3), 21, Timestamp::ZERO)], Timestamp::new(21));
        protocol.run_periodic_round(Timestamp::new(21), &mut outbox);
        assert!(!protocol.store().contains(2));
        assert!(protocol.store().contains(3));
        assert!(listener.drain().contains(&NodeEvent::MemberRemoved {
            observer: addr(1),
            member: addr(2)
        }));

        // Member 3 still gossips its stale view of 2. That must not resurrect it.
        protocol.handle_heartbeat(&[MemberEntry::new(addr(2), 0, Timestamp::ZERO)], Timestamp::new(23));
        assert!(!protocol.store().contains(2));

        // A fresh join does.
        protocol.handle_join_request(addr(2), 0, Timestamp::new(24), &mut outbox);
        assert!(protocol.store().contains(2));
    }

    #[test]
    fn fanout_is_bounded() {
        let (publisher, _listener) = event_bus();
        let mut cfg = config(1);
        cfg.gossip_fanout = Some(2);
        let mut protocol = MembershipProtocol::new(cfg, Timestamp::ZERO, publisher);
        let mut outbox = Outbox::new();
        protocol.start(&mut outbox);
        for id in 2..=9 {
            protocol.handle_join_request(addr(id), 0, Timestamp::ZERO, &mut outbox);
        }
        outbox.take();

        protocol.run_periodic_round(Timestamp::new(1), &mut outbox);
        let targets = heartbeats_in(&mut outbox);
        assert_eq!(targets.len(), 2);
        assert!(targets.iter().all(|t| *t != addr(1)));
    }

    #[test]
    fn log_scaled_fanout_has_a_floor() {
        assert_eq!(log_scaled_fanout(1), 3);
        assert_eq!(log_scaled_fanout(4), 3);
        assert_eq!(log_scaled_fanout(16), 4);
        assert_eq!(log_scaled_fanout(17), 5);
        assert_eq!(log_scaled_fanout(1000), 10);
    }

    #[test]
    fn failed_node_ignores_everything() {
        let (mut protocol, _, mut outbox) = started(1, 0);
        protocol.fail();
        protocol.handle_join_request(addr(2), 0, Timestamp::new(1), &mut outbox);
        protocol.run_periodic_round(Timestamp::new(1), &mut outbox);
        assert!(outbox.take().is_empty());
        assert_eq!(protocol.store().len(), 1);
        assert_eq!(protocol.store().self_entry().heartbeat, 0);
    }

    #[test]
    fn huge_thresholds_do_not_overflow() {
        let (publisher, _listener) = event_bus();
        let config = MembershipConfig {
            suspect_threshold: i64::MAX - 1,
            fail_remove_threshold: i64::MAX,
            ..config(1)
        };
        let mut protocol = MembershipProtocol::new(config, Timestamp::ZERO, publisher);
        let mut outbox = Outbox::new();
        protocol.start(&mut outbox);
        protocol.handle_join_request(addr(2), 0, Timestamp::new(1), &mut outbox);

        protocol.run_periodic_round(Timestamp::new(i64::MAX), &mut outbox);
        assert_eq!(protocol.store().len(), 2);
    }
}
