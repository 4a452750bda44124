mod message;
mod proto;

pub use message::EncodeError;
pub use message::KeyRequest;
pub use message::KeyValueRequest;
pub use message::Message;
pub use message::MessageType;
pub use message::ProtocolError;
pub use message::ReadReply;
pub use message::Reply;
pub use message::ReplicateAck;
pub use message::ReplicatePush;

use crate::membership::NodeAddress;

/// Outbox collects messages produced while handling an event. The node flushes it to the
/// transport once the handler returns, so protocol code never touches the network directly.
#[derive(Debug, Default)]
pub(crate) struct Outbox {
    messages: Vec<(NodeAddress, Message)>,
}

impl Outbox {
    pub(crate) fn new() -> Self {
        Outbox { messages: Vec::new() }
    }

    pub(crate) fn push(&mut self, to: NodeAddress, message: Message) {
        self.messages.push((to, message));
    }

    pub(crate) fn drain(&mut self) -> impl Iterator<Item = (NodeAddress, Message)> + '_ {
        self.messages.drain(..)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.messages.len()
    }

    #[cfg(test)]
    pub(crate) fn take(&mut self) -> Vec<(NodeAddress, Message)> {
        std::mem::take(&mut self.messages)
    }
}
