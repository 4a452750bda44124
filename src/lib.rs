mod actor;
mod api;
mod clock;
mod kvstore;
mod logging;
mod membership;
mod node;
mod ring;
mod simulation;
mod transport;
mod wire;

pub use actor::ActorClient;
pub use api::event_bus;
pub use api::try_create_node;
pub use api::try_create_node_with_store;
pub use api::try_spawn_node_actor;
pub use api::EventListener;
pub use api::EventPublisher;
pub use api::KeyValueClient;
pub use api::NodeConfig;
pub use api::NodeCreationError;
pub use api::NodeEvent;
pub use api::NodeOptions;
pub use api::OperationEvent;
pub use api::Perspective;
pub use clock::Timestamp;
pub use kvstore::ClientOpError;
pub use kvstore::InMemoryStore;
pub use kvstore::LocalStore;
pub use kvstore::OperationKind;
pub use kvstore::OperationOutcome;
pub use kvstore::ReadPolicy;
pub use kvstore::StoreError;
pub use kvstore::StoredEntry;
pub use kvstore::TransactionId;
pub use logging::create_root_logger_for_file;
pub use logging::create_root_logger_for_stdout;
pub use logging::discard_logger;
pub use membership::MemberEntry;
pub use membership::MemberId;
pub use membership::MembershipState;
pub use membership::MembershipStore;
pub use membership::NodeAddress;
pub use node::Node;
pub use ring::ring_position;
pub use ring::HashRing;
pub use ring::InsufficientReplicas;
pub use ring::ReplicaRole;
pub use ring::ReplicaSet;
pub use ring::RingNode;
pub use ring::REPLICATION_FACTOR;
pub use simulation::Simulation;
pub use transport::EmulatedNetwork;
pub use transport::NetworkStats;
pub use transport::Transport;
pub use wire::EncodeError;
pub use wire::KeyRequest;
pub use wire::KeyValueRequest;
pub use wire::Message;
pub use wire::MessageType;
pub use wire::ProtocolError;
pub use wire::ReadReply;
pub use wire::ReplicateAck;
pub use wire::ReplicatePush;
pub use wire::Reply;

// Learning 1: `create::{root_mod}` should not have any code. Just `mod` and `pub use` statements.
// Learning 2: All `mod` statements, anywhere, should not be `pub`. Only export `pub` via individual
//             use statements.
