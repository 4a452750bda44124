use crate::api::{EventPublisher, NodeEvent, NodeOptionsValidated};
use crate::clock::Timestamp;
use crate::kvstore::{ClientOpError, InMemoryStore, LocalStore, OperationOutcome, ReplicatedStore, ReplicatedStoreConfig, TransactionId};
use crate::membership::{MembershipConfig, MembershipProtocol, MembershipState, MembershipStore, NodeAddress};
use crate::ring::HashRing;
use crate::transport::Transport;
use crate::wire::{Message, Outbox};
use bytes::Bytes;

/// Node is one cluster member: membership, ring and replicated store, glued to a transport.
///
/// Node never reads a clock. Whoever owns it calls `tick()` with the current logical time; all
/// periodic work and every inbound message is handled inside that call. Client operations
/// return a transaction id immediately and are decided on later ticks (see `take_outcomes()`).
pub struct Node<T: Transport, S: LocalStore = InMemoryStore> {
    logger: slog::Logger,
    address: NodeAddress,
    transport: T,
    membership: MembershipProtocol,
    ring: HashRing,
    ring_size: u64,
    store: ReplicatedStore<S>,
    events: EventPublisher,
    outbox: Outbox,
    now: Timestamp,
}

impl<T: Transport, S: LocalStore> Node<T, S> {
    pub(crate) fn new(
        logger: slog::Logger,
        address: NodeAddress,
        transport: T,
        options: NodeOptionsValidated,
        events: EventPublisher,
        local_store: S,
        now: Timestamp,
    ) -> Self {
        let logger = logger.new(slog::o!("Node" => address.to_string()));

        let membership = MembershipProtocol::new(
            MembershipConfig {
                logger: logger.clone(),
                self_address: address,
                join_address: options.join_address,
                round_interval: options.round_interval,
                suspect_threshold: options.suspect_threshold,
                fail_remove_threshold: options.fail_remove_threshold,
                gossip_fanout: options.gossip_fanout,
                rng_seed: options.rng_seed.unwrap_or(address.id() as u64),
            },
            now,
            events.clone(),
        );
        let store = ReplicatedStore::new(
            ReplicatedStoreConfig {
                logger: logger.clone(),
                self_address: address,
                transaction_timeout: options.transaction_timeout,
                read_policy: options.read_policy,
                replicate_retry_interval: options.replicate_retry_interval,
                events: events.clone(),
            },
            local_store,
        );

        Node {
            logger,
            address,
            transport,
            membership,
            ring: HashRing::empty(options.ring_size),
            ring_size: options.ring_size,
            store,
            events,
            outbox: Outbox::new(),
            now,
        }
    }

    pub fn address(&self) -> NodeAddress {
        self.address
    }

    pub fn now(&self) -> Timestamp {
        self.now
    }

    pub fn membership(&self) -> &MembershipStore {
        self.membership.store()
    }

    pub fn membership_state(&self) -> MembershipState {
        self.membership.state()
    }

    pub fn ring(&self) -> &HashRing {
        &self.ring
    }

    pub fn local_store(&self) -> &S {
        self.store.local()
    }

    pub fn pending_transactions(&self) -> usize {
        self.store.pending_transactions()
    }

    /// Stabilization pushes this node sent that the holder hasn't acknowledged yet.
    pub fn pending_replications(&self) -> usize {
        self.store.pending_replications()
    }

    pub fn is_failed(&self) -> bool {
        self.membership.state() == MembershipState::Failed
    }

    /// Boot the group, or ask the introducer to join it.
    pub fn start(&mut self) {
        self.membership.start(&mut self.outbox);
        self.flush();
    }

    /// Mark this node crashed. Everything after this is a no-op, and every in-flight client
    /// operation fails with NodeFailed.
    pub fn fail(&mut self) {
        self.membership.fail();
        self.store.abandon_transactions();
        self.outbox.drain().for_each(drop);
    }

    pub fn tick(&mut self, now: Timestamp) {
        if self.is_failed() {
            return;
        }
        self.now = now;

        // 1. Inbound
        for payload in self.transport.receive(self.address) {
            self.dispatch(payload);
        }

        // 2. Membership round
        self.membership.run_periodic_round(now, &mut self.outbox);

        // 3. Ring
        self.update_ring();
        self.store.retry_pushes(now, &mut self.outbox);

        // 4. Timeouts
        self.store.expire_transactions(now);

        self.flush();
    }

    pub fn create(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<TransactionId, ClientOpError> {
        self.check_alive()?;
        let result = self
            .store
            .client_create(&self.ring, key.into(), value.into(), self.now, &mut self.outbox);
        self.flush();
        result
    }

    pub fn read(&mut self, key: impl Into<String>) -> Result<TransactionId, ClientOpError> {
        self.check_alive()?;
        let result = self.store.client_read(&self.ring, key.into(), self.now, &mut self.outbox);
        self.flush();
        result
    }

    pub fn update(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<TransactionId, ClientOpError> {
        self.check_alive()?;
        let result = self
            .store
            .client_update(&self.ring, key.into(), value.into(), self.now, &mut self.outbox);
        self.flush();
        result
    }

    pub fn delete(&mut self, key: impl Into<String>) -> Result<TransactionId, ClientOpError> {
        self.check_alive()?;
        let result = self.store.client_delete(&self.ring, key.into(), self.now, &mut self.outbox);
        self.flush();
        result
    }

    /// Outcomes decided since the last call, in decision order.
    pub fn take_outcomes(&mut self) -> Vec<OperationOutcome> {
        self.store.take_outcomes()
    }

    fn check_alive(&self) -> Result<(), ClientOpError> {
        if self.is_failed() {
            Err(ClientOpError::NodeFailed)
        } else {
            Ok(())
        }
    }

    fn dispatch(&mut self, payload: Bytes) {
        let message = match Message::decode(&payload) {
            Ok(message) => message,
            Err(e) => {
                slog::warn!(self.logger, "Dropping undecodable message ({} bytes): {}", payload.len(), e);
                return;
            }
        };
        slog::trace!(self.logger, "Received {}", message.message_type());

        let now = self.now;
        match message {
            Message::JoinRequest { source, heartbeat } => {
                self.membership
                    .handle_join_request(source, heartbeat, now, &mut self.outbox)
            }
            Message::JoinReply { members } => self.membership.handle_join_reply(&members, now),
            Message::Heartbeat { members } => self.membership.handle_heartbeat(&members, now),
            Message::Create(request) => self.store.handle_create(request, &mut self.outbox),
            Message::Update(request) => self.store.handle_update(request, &mut self.outbox),
            Message::Read(request) => self.store.handle_read(request, &mut self.outbox),
            Message::Delete(request) => self.store.handle_delete(request, &mut self.outbox),
            Message::Reply(reply) => self.store.handle_reply(reply),
            Message::ReadReply(reply) => self.store.handle_read_reply(reply),
            Message::Replicate(push) => self.store.handle_replicate(push, &mut self.outbox),
            Message::ReplicateAck(ack) => self.store.handle_replicate_ack(ack),
        }
    }

    /// Rebuild the ring from the current membership. On any change, stabilize before the new ring
    /// takes effect.
    fn update_ring(&mut self) {
        let new_ring = HashRing::build(self.membership.store().addresses(), self.ring_size);
        if new_ring.same_members(&self.ring) {
            return;
        }

        let members: Vec<NodeAddress> = new_ring.nodes().iter().map(|node| node.address).collect();
        slog::info!(self.logger, "Ring changed: {} -> {} members", self.ring.len(), members.len());

        self.store.stabilize(&self.ring, &new_ring, self.now, &mut self.outbox);
        self.ring = new_ring;
        self.events.publish(NodeEvent::RingChanged {
            observer: self.address,
            members,
        });
    }

    fn flush(&mut self) {
        for (to, message) in self.outbox.drain() {
            match message.encode() {
                Ok(payload) => self.transport.send(self.address, to, payload),
                Err(e) => slog::error!(self.logger, "Dropping outbound message to {}: {}", to, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{event_bus, NodeOptions};
    use crate::transport::EmulatedNetwork;
    use std::convert::TryFrom;

    fn addr(id: i32) -> NodeAddress {
        NodeAddress::new(id, 0)
    }

    fn node(id: i32, network: &EmulatedNetwork) -> Node<EmulatedNetwork> {
        let options = NodeOptionsValidated::try_from(NodeOptions::default()).unwrap();
        Node::new(
            slog::Logger::root(slog::Discard, slog::o!()),
            addr(id),
            network.clone(),
            options,
            EventPublisher::disabled(),
            InMemoryStore::new(),
            Timestamp::ZERO,
        )
    }

    fn tick_all(nodes: &mut [Node<EmulatedNetwork>], from: i64, to: i64) {
        for t in from..=to {
            for node in nodes.iter_mut() {
                node.tick(Timestamp::new(t));
            }
        }
    }

    #[test]
    fn join_through_the_introducer() {
        let network = EmulatedNetwork::new();
        let mut nodes = vec![node(1, &network), node(2, &network), node(3, &network)];
        for node in nodes.iter_mut() {
            node.start();
        }
        assert_eq!(nodes[1].membership_state(), MembershipState::Joining);

        tick_all(&mut nodes, 1, 5);

        for node in &nodes {
            assert_eq!(node.membership_state(), MembershipState::InGroup);
            assert_eq!(node.membership().len(), 3, "{:?}", node.address());
            assert_eq!(node.ring().len(), 3);
        }
    }

    #[test]
    fn malformed_bytes_are_dropped() {
        let network = EmulatedNetwork::new();
        let mut node = node(1, &network);
        node.start();

        network.send(addr(9), addr(1), Bytes::from_static(&[0xff, 0x01, 0x02]));
        node.tick(Timestamp::new(1));

        assert_eq!(node.membership().len(), 1);
        assert!(!node.is_failed());
    }

    #[test]
    fn client_ops_need_three_members() {
        let network = EmulatedNetwork::new();
        let mut node = node(1, &network);
        node.start();
        node.tick(Timestamp::new(1));

        assert!(matches!(
            node.create("k", "v"),
            Err(ClientOpError::InsufficientReplicas(_))
        ));
    }

    #[test]
    fn create_then_read() {
        let network = EmulatedNetwork::new();
        let mut nodes = vec![node(1, &network), node(2, &network), node(3, &network)];
        for node in nodes.iter_mut() {
            node.start();
        }
        tick_all(&mut nodes, 1, 5);

        let created = nodes[1].create("foo", "bar").unwrap();
        tick_all(&mut nodes, 6, 8);
        assert_eq!(
            nodes[1].take_outcomes(),
            vec![OperationOutcome {
                transaction_id: created,
                kind: crate::kvstore::OperationKind::Create,
                key: "foo".into(),
                result: Ok(None),
            }]
        );
        assert!(nodes.iter().all(|n| n.local_store().read("foo").is_ok()));

        let read = nodes[2].read("foo").unwrap();
        tick_all(&mut nodes, 9, 11);
        let outcomes = nodes[2].take_outcomes();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].transaction_id, read);
        assert_eq!(outcomes[0].result, Ok(Some("bar".to_string())));
    }

    #[test]
    fn failed_node_is_inert() {
        let network = EmulatedNetwork::new();
        let (events, mut listener) = event_bus();
        let options = NodeOptionsValidated::try_from(NodeOptions::default()).unwrap();
        let mut node: Node<EmulatedNetwork> = Node::new(
            slog::Logger::root(slog::Discard, slog::o!()),
            addr(1),
            network.clone(),
            options,
            events,
            InMemoryStore::new(),
            Timestamp::ZERO,
        );
        node.start();
        node.fail();
        node.tick(Timestamp::new(1));

        assert!(node.is_failed());
        assert_eq!(node.membership().self_entry().heartbeat, 0);
        assert_eq!(node.create("k", "v"), Err(ClientOpError::NodeFailed));
        assert!(listener.drain().is_empty());
    }
}
