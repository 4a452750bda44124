use crate::actor;
use crate::actor::ActorClient;
use crate::api::event_bus::EventPublisher;
use crate::api::options::{NodeOptions, NodeOptionsValidated};
use crate::clock::Timestamp;
use crate::kvstore::{InMemoryStore, LocalStore};
use crate::membership::NodeAddress;
use crate::node::Node;
use crate::transport::Transport;
use std::convert::TryFrom;
use tokio::time::Duration;

pub struct NodeConfig<T: Transport> {
    pub address: NodeAddress,
    pub transport: T,
    pub logger: slog::Logger,
    pub options: NodeOptions,
    pub events: EventPublisher,
}

#[derive(Debug, thiserror::Error)]
pub enum NodeCreationError {
    #[error("Failed to acquire a local address")]
    NullAddress,
    #[error("Illegal options for configuring node: {0}")]
    IllegalOptions(String),
}

/// Create a node backed by an in-memory store. The node is not started.
pub fn try_create_node<T: Transport>(config: NodeConfig<T>, now: Timestamp) -> Result<Node<T>, NodeCreationError> {
    try_create_node_with_store(config, InMemoryStore::new(), now)
}

pub fn try_create_node_with_store<T: Transport, S: LocalStore>(
    config: NodeConfig<T>,
    local_store: S,
    now: Timestamp,
) -> Result<Node<T, S>, NodeCreationError> {
    if config.address.is_null() {
        return Err(NodeCreationError::NullAddress);
    }

    let options = NodeOptionsValidated::try_from(config.options)
        .map_err(|e| NodeCreationError::IllegalOptions(e.to_string()))?;

    Ok(Node::new(
        config.logger,
        config.address,
        config.transport,
        options,
        config.events,
        local_store,
        now,
    ))
}

/// Create and start a node, then hand it to an actor task that ticks it every `tick_duration`.
/// Must be called from within a tokio runtime.
pub fn try_spawn_node_actor<T>(config: NodeConfig<T>, tick_duration: Duration) -> Result<ActorClient, NodeCreationError>
where
    T: Transport + Send + 'static,
{
    let logger = config.logger.clone();
    let mut node = try_create_node(config, Timestamp::ZERO)?;
    node.start();

    let (client, node_actor) = actor::create(logger, 16, node, tick_duration);
    tokio::spawn(node_actor.run_event_loop());

    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::EmulatedNetwork;

    fn config(address: NodeAddress, options: NodeOptions) -> NodeConfig<EmulatedNetwork> {
        NodeConfig {
            address,
            transport: EmulatedNetwork::new(),
            logger: slog::Logger::root(slog::Discard, slog::o!()),
            options,
            events: EventPublisher::disabled(),
        }
    }

    #[test]
    fn null_address_is_fatal() {
        let result = try_create_node(config(NodeAddress::NULL, NodeOptions::default()), Timestamp::ZERO);
        assert!(matches!(result, Err(NodeCreationError::NullAddress)));
    }

    #[test]
    fn illegal_options_are_reported() {
        let options = NodeOptions {
            round_interval: Some(0),
            ..NodeOptions::default()
        };
        let result = try_create_node(config(NodeAddress::new(1, 0), options), Timestamp::ZERO);
        assert!(matches!(result, Err(NodeCreationError::IllegalOptions(_))));
    }

    #[test]
    fn creates_unstarted_node() {
        let node = try_create_node(config(NodeAddress::new(2, 0), NodeOptions::default()), Timestamp::new(3)).unwrap();
        assert_eq!(node.address(), NodeAddress::new(2, 0));
        assert_eq!(node.now(), Timestamp::new(3));
        assert_eq!(node.membership_state(), crate::membership::MembershipState::Uninitialized);
    }
}
