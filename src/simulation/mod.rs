use crate::api::{try_create_node, EventPublisher, NodeConfig, NodeCreationError, NodeOptions};
use crate::clock::Timestamp;
use crate::membership::NodeAddress;
use crate::node::Node;
use crate::transport::EmulatedNetwork;

/// Simulation runs `n` nodes in lockstep over one emulated network. Node `i` (1-based) has
/// address `i.0.0.0:0`, so node 1 is the default introducer.
pub struct Simulation {
    logger: slog::Logger,
    network: EmulatedNetwork,
    options: NodeOptions,
    events: EventPublisher,
    nodes: Vec<Node<EmulatedNetwork>>,
    now: Timestamp,
}

impl Simulation {
    pub fn new(logger: slog::Logger, num_nodes: usize, options: NodeOptions) -> Result<Self, NodeCreationError> {
        Self::with_network(logger, num_nodes, options, EmulatedNetwork::new(), EventPublisher::disabled())
    }

    pub fn with_network(
        logger: slog::Logger,
        num_nodes: usize,
        options: NodeOptions,
        network: EmulatedNetwork,
        events: EventPublisher,
    ) -> Result<Self, NodeCreationError> {
        let mut sim = Simulation {
            logger,
            network,
            options,
            events,
            nodes: Vec::with_capacity(num_nodes),
            now: Timestamp::ZERO,
        };
        for _ in 0..num_nodes {
            sim.create_next_node()?;
        }
        Ok(sim)
    }

    fn create_next_node(&mut self) -> Result<NodeAddress, NodeCreationError> {
        let config = NodeConfig {
            address: NodeAddress::new(self.nodes.len() as i32 + 1, 0),
            transport: self.network.clone(),
            logger: self.logger.clone(),
            options: self.options.clone(),
            events: self.events.clone(),
        };
        let node = try_create_node(config, self.now)?;
        let address = node.address();
        self.nodes.push(node);
        Ok(address)
    }

    /// Bring up one more node at the current time, with the next free id, and start it.
    pub fn add_node(&mut self) -> Result<NodeAddress, NodeCreationError> {
        let address = self.create_next_node()?;
        if let Some(node) = self.nodes.last_mut() {
            node.start();
        }
        slog::info!(self.logger, "Added {} at {:?}", address, self.now);
        Ok(address)
    }

    pub fn now(&self) -> Timestamp {
        self.now
    }

    pub fn network(&self) -> &EmulatedNetwork {
        &self.network
    }

    pub fn addresses(&self) -> Vec<NodeAddress> {
        self.nodes.iter().map(Node::address).collect()
    }

    pub fn nodes(&self) -> &[Node<EmulatedNetwork>] {
        &self.nodes
    }

    pub fn node(&self, address: NodeAddress) -> Option<&Node<EmulatedNetwork>> {
        self.nodes.iter().find(|node| node.address() == address)
    }

    pub fn node_mut(&mut self, address: NodeAddress) -> Option<&mut Node<EmulatedNetwork>> {
        self.nodes.iter_mut().find(|node| node.address() == address)
    }

    pub fn start_all(&mut self) {
        slog::info!(self.logger, "Starting {} nodes at {:?}", self.nodes.len(), self.now);
        for node in self.nodes.iter_mut() {
            node.start();
        }
    }

    /// Advance the global clock one tick at a time, ticking every node in address order.
    pub fn run_ticks(&mut self, num_ticks: usize) {
        for _ in 0..num_ticks {
            self.now.incr();
            for node in self.nodes.iter_mut() {
                node.tick(self.now);
            }
        }
    }

    /// Crash a node: it stops acting and the network stops carrying its traffic.
    ///
    /// Returns false if no such node.
    pub fn kill(&mut self, address: NodeAddress) -> bool {
        let now = self.now;
        match self.nodes.iter_mut().find(|node| node.address() == address) {
            Some(node) => {
                node.fail();
                self.network.disconnect(address);
                slog::info!(self.logger, "Killed {} at {:?}", address, now);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::MembershipState;

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    #[test]
    fn nodes_converge_and_kill_is_observed() {
        let mut sim = Simulation::new(logger(), 5, NodeOptions::default()).unwrap();
        sim.start_all();
        sim.run_ticks(10);
        assert_eq!(sim.now(), Timestamp::new(10));

        for node in sim.nodes() {
            assert_eq!(node.membership_state(), MembershipState::InGroup);
            assert_eq!(node.membership().len(), 5);
        }

        let victim = NodeAddress::new(3, 0);
        assert!(sim.kill(victim));
        assert!(!sim.kill(NodeAddress::new(42, 0)));
        sim.run_ticks(30);

        for node in sim.nodes().iter().filter(|n| n.address() != victim) {
            assert!(!node.membership().contains(3), "{:?} still has the victim", node.address());
            assert_eq!(node.ring().len(), 4);
        }
        assert!(sim.node(victim).map_or(false, Node::is_failed));
    }

    #[test]
    fn added_node_joins_the_running_group() {
        let mut sim = Simulation::new(logger(), 3, NodeOptions::default()).unwrap();
        sim.start_all();
        sim.run_ticks(5);

        let added = sim.add_node().unwrap();
        assert_eq!(added, NodeAddress::new(4, 0));
        assert_eq!(sim.node(added).unwrap().membership_state(), MembershipState::Joining);

        sim.run_ticks(5);
        for node in sim.nodes() {
            assert_eq!(node.membership_state(), MembershipState::InGroup);
            assert_eq!(node.ring().len(), 4, "{:?}", node.address());
        }
    }
}
