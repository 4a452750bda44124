use crate::api::KeyValueClient;
use crate::kvstore::{ClientOpError, LocalStore, TransactionId};
use crate::membership::MemberEntry;
use crate::node::Node;
use crate::transport::Transport;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Duration;

pub(crate) fn create<T, S>(
    logger: slog::Logger,
    buffer_size: usize,
    node: Node<T, S>,
    tick_duration: Duration,
) -> (ActorClient, NodeActor<T, S>)
where
    T: Transport,
    S: LocalStore,
{
    let (tx, rx) = mpsc::channel(buffer_size);
    let client = ActorClient { sender: tx };
    let actor = NodeActor {
        logger,
        receiver: rx,
        node,
        tick_duration,
        awaiting_outcome: HashMap::new(),
    };

    (client, actor)
}

#[derive(Debug)]
enum Event {
    // Start a client operation. Callback fires once the coordinator decides it.
    Operation(Operation, Callback),
    Members(oneshot::Sender<Vec<MemberEntry>>),
    Fail,
}

#[derive(Debug)]
enum Operation {
    Create { key: String, value: String },
    Read { key: String },
    Update { key: String, value: String },
    Delete { key: String },
}

#[derive(Debug)]
struct Callback(oneshot::Sender<Result<Option<String>, ClientOpError>>);

impl Callback {
    fn send(self, result: Result<Option<String>, ClientOpError>) {
        // Caller stopped waiting.
        let _ = self.0.send(result);
    }
}

/// ActorClient is a cheap handle to a node running in its own task.
#[derive(Clone)]
pub struct ActorClient {
    sender: mpsc::Sender<Event>,
}

impl ActorClient {
    /// The node's current membership view, self first.
    pub async fn members(&self) -> Result<Vec<MemberEntry>, ClientOpError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::Members(tx)).await?;

        rx.await.map_err(|_| ClientOpError::ActorExited)
    }

    /// Crash the node. It stops gossiping and answering; pending operations fail.
    pub async fn fail(&self) -> Result<(), ClientOpError> {
        self.send(Event::Fail).await
    }

    async fn operation(&self, operation: Operation) -> Result<Option<String>, ClientOpError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::Operation(operation, Callback(tx))).await?;

        rx.await.map_err(|_| ClientOpError::ActorExited)?
    }

    async fn send(&self, event: Event) -> Result<(), ClientOpError> {
        self.sender.send(event).await.map_err(|_| ClientOpError::ActorExited)
    }
}

#[async_trait::async_trait]
impl KeyValueClient for ActorClient {
    async fn create(&self, key: String, value: String) -> Result<(), ClientOpError> {
        self.operation(Operation::Create { key, value }).await.map(|_| ())
    }

    async fn read(&self, key: String) -> Result<String, ClientOpError> {
        let value = self.operation(Operation::Read { key: key.clone() }).await?;
        value.ok_or(ClientOpError::KeyNotFound(key))
    }

    async fn update(&self, key: String, value: String) -> Result<(), ClientOpError> {
        self.operation(Operation::Update { key, value }).await.map(|_| ())
    }

    async fn delete(&self, key: String) -> Result<(), ClientOpError> {
        self.operation(Operation::Delete { key }).await.map(|_| ())
    }
}

/// NodeActor is a node in actor model. One interval firing is one logical tick.
pub struct NodeActor<T: Transport, S: LocalStore> {
    logger: slog::Logger,
    receiver: mpsc::Receiver<Event>,
    node: Node<T, S>,
    tick_duration: Duration,
    awaiting_outcome: HashMap<TransactionId, Callback>,
}

impl<T: Transport, S: LocalStore> NodeActor<T, S> {
    pub async fn run_event_loop(mut self) {
        let mut interval = tokio::time::interval(self.tick_duration);

        loop {
            tokio::select! {
                _ = interval.tick() => self.handle_tick(),
                event = self.receiver.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
            }
        }

        slog::info!(self.logger, "Every client handle dropped. Node actor exiting.");
    }

    fn handle_tick(&mut self) {
        let now = self.node.now().plus(1);
        self.node.tick(now);
        self.resolve_outcomes();
    }

    // This must NOT be async. Quorum outcomes arrive on later ticks, so callbacks are parked in
    // `awaiting_outcome` until then.
    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Operation(operation, callback) => {
                let started = match operation {
                    Operation::Create { key, value } => self.node.create(key, value),
                    Operation::Read { key } => self.node.read(key),
                    Operation::Update { key, value } => self.node.update(key, value),
                    Operation::Delete { key } => self.node.delete(key),
                };
                match started {
                    Ok(transaction_id) => {
                        self.awaiting_outcome.insert(transaction_id, callback);
                    }
                    Err(e) => callback.send(Err(e)),
                }
            }
            Event::Members(tx) => {
                let _ = tx.send(self.node.membership().snapshot());
            }
            Event::Fail => {
                self.node.fail();
                self.resolve_outcomes();
            }
        }
    }

    fn resolve_outcomes(&mut self) {
        for outcome in self.node.take_outcomes() {
            match self.awaiting_outcome.remove(&outcome.transaction_id) {
                Some(callback) => callback.send(outcome.result),
                None => slog::warn!(self.logger, "No caller waiting on {:?}", outcome.transaction_id),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{EventPublisher, NodeConfig, NodeOptions};
    use crate::membership::NodeAddress;
    use crate::transport::EmulatedNetwork;

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    #[tokio::test]
    async fn single_node_answers_members_and_fails_fast_on_ops() {
        let config = NodeConfig {
            address: NodeAddress::new(1, 0),
            transport: EmulatedNetwork::new(),
            logger: logger(),
            options: NodeOptions::default(),
            events: EventPublisher::disabled(),
        };
        let client = crate::api::try_spawn_node_actor(config, Duration::from_millis(5)).unwrap();

        let members = client.members().await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].address(), NodeAddress::new(1, 0));

        let result = client.create("k".into(), "v".into()).await;
        assert!(matches!(result, Err(ClientOpError::InsufficientReplicas(_))));

        client.fail().await.unwrap();
        assert_eq!(client.read("k".into()).await, Err(ClientOpError::NodeFailed));
    }
}
