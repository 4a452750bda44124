use crate::kvstore::{OperationKind, TransactionId};
use crate::membership::NodeAddress;
use tokio::sync::mpsc;

// Observability sink for test harnesses. Every node may publish into the same bus, so each event
// names its `observer`: the node that saw it happen.

/// An event that happened, as observed by one node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NodeEvent {
    MemberAdded { observer: NodeAddress, member: NodeAddress },
    MemberRemoved { observer: NodeAddress, member: NodeAddress },
    RingChanged { observer: NodeAddress, members: Vec<NodeAddress> },
    Operation(OperationEvent),
}

/// Whether an operation outcome was decided by the coordinator (after quorum) or by a single
/// replica applying the request to its local store.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Perspective {
    Coordinator,
    Replica,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OperationEvent {
    pub observer: NodeAddress,
    pub perspective: Perspective,
    pub kind: OperationKind,
    pub transaction_id: TransactionId,
    pub key: String,
    pub value: Option<String>,
    pub success: bool,
}

pub fn event_bus() -> (EventPublisher, EventListener) {
    let (tx, rx) = mpsc::unbounded_channel();

    (EventPublisher { sender: Some(tx) }, EventListener { receiver: rx })
}

#[derive(Clone)]
pub struct EventPublisher {
    sender: Option<mpsc::UnboundedSender<NodeEvent>>,
}

impl EventPublisher {
    /// A publisher that drops everything. For nodes nobody is listening to.
    pub fn disabled() -> Self {
        EventPublisher { sender: None }
    }

    pub(crate) fn publish(&self, event: NodeEvent) {
        if let Some(sender) = &self.sender {
            // Listener went away. Events are best effort.
            let _ = sender.send(event);
        }
    }
}

pub struct EventListener {
    receiver: mpsc::UnboundedReceiver<NodeEvent>,
}

impl EventListener {
    /// Everything published so far, without waiting.
    pub fn drain(&mut self) -> Vec<NodeEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}
