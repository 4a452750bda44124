//! This mod is meant to hold most of the code for the library's client-facing API.
mod client;
mod event_bus;
mod options;
mod wiring;

pub use client::KeyValueClient;
pub use event_bus::event_bus;
pub use event_bus::EventListener;
pub use event_bus::EventPublisher;
pub use event_bus::NodeEvent;
pub use event_bus::OperationEvent;
pub use event_bus::Perspective;
pub use options::NodeOptions;
pub use wiring::try_create_node;
pub use wiring::try_create_node_with_store;
pub use wiring::try_spawn_node_actor;
pub use wiring::NodeConfig;
pub use wiring::NodeCreationError;

pub(crate) use options::NodeOptionsValidated;
