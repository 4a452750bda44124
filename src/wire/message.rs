use crate::clock::Timestamp;
use crate::kvstore::TransactionId;
use crate::membership::{MemberEntry, NodeAddress};
use crate::ring::ReplicaRole;
use crate::wire::proto::{
    proto_envelope, ProtoAddress, ProtoEnvelope, ProtoJoinRequest, ProtoKeyRequest, ProtoKeyValueRequest,
    ProtoMemberEntry, ProtoMemberList, ProtoReadReply, ProtoReplicaRole, ProtoReplicate, ProtoReplicateAck,
    ProtoReply,
};
use bytes::{Bytes, BytesMut};
use prost::Message as _;
use std::convert::TryFrom;
use std::fmt;

/// Message is everything one node can say to another.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    JoinRequest { source: NodeAddress, heartbeat: i64 },
    JoinReply { members: Vec<MemberEntry> },
    Heartbeat { members: Vec<MemberEntry> },
    Create(KeyValueRequest),
    Read(KeyRequest),
    Update(KeyValueRequest),
    Delete(KeyRequest),
    Reply(Reply),
    ReadReply(ReadReply),
    Replicate(ReplicatePush),
    ReplicateAck(ReplicateAck),
}

#[derive(Clone, Debug, PartialEq)]
pub struct KeyValueRequest {
    pub transaction_id: TransactionId,
    pub source: NodeAddress,
    pub key: String,
    pub value: String,
    pub role: ReplicaRole,
    /// Coordinator clock when the operation was issued. Replicas stamp the write with it.
    pub timestamp: Timestamp,
}

#[derive(Clone, Debug, PartialEq)]
pub struct KeyRequest {
    pub transaction_id: TransactionId,
    pub source: NodeAddress,
    pub key: String,
    pub timestamp: Timestamp,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Reply {
    pub transaction_id: TransactionId,
    pub source: NodeAddress,
    pub success: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReadReply {
    pub transaction_id: TransactionId,
    pub source: NodeAddress,
    pub value: Option<String>,
}

/// A copy of a key pushed to a new replica holder after the ring changed. `value` is None when
/// the copy is a delete marker.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplicatePush {
    pub source: NodeAddress,
    pub key: String,
    pub value: Option<String>,
    pub write_timestamp: Timestamp,
    pub role: ReplicaRole,
}

/// Sent back for every REPLICATE. `write_timestamp` is the stamp of the copy the receiver holds
/// afterwards, which is never older than the one pushed.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplicateAck {
    pub source: NodeAddress,
    pub key: String,
    pub write_timestamp: Timestamp,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MessageType {
    JoinRequest,
    JoinReply,
    Heartbeat,
    Create,
    Read,
    Update,
    Delete,
    Reply,
    ReadReply,
    Replicate,
    ReplicateAck,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::JoinRequest => "JOIN_REQUEST",
            MessageType::JoinReply => "JOIN_REPLY",
            MessageType::Heartbeat => "HEARTBEAT",
            MessageType::Create => "CREATE",
            MessageType::Read => "READ",
            MessageType::Update => "UPDATE",
            MessageType::Delete => "DELETE",
            MessageType::Reply => "REPLY",
            MessageType::ReadReply => "READ_REPLY",
            MessageType::Replicate => "REPLICATE",
            MessageType::ReplicateAck => "REPLICATE_ACK",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed payload: {0}")]
    Malformed(#[from] prost::DecodeError),
    #[error("Message has no body")]
    MissingBody,
    #[error("{0} message is missing its source address")]
    MissingSource(MessageType),
    #[error("Port {0} does not fit in 16 bits")]
    PortOutOfRange(i32),
    #[error("Unknown replica role {0}")]
    UnknownRole(i32),
}

#[derive(Debug, thiserror::Error)]
#[error("Failed to encode {message_type} message: {source}")]
pub struct EncodeError {
    message_type: MessageType,
    source: prost::EncodeError,
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::JoinRequest { .. } => MessageType::JoinRequest,
            Message::JoinReply { .. } => MessageType::JoinReply,
            Message::Heartbeat { .. } => MessageType::Heartbeat,
            Message::Create(_) => MessageType::Create,
            Message::Read(_) => MessageType::Read,
            Message::Update(_) => MessageType::Update,
            Message::Delete(_) => MessageType::Delete,
            Message::Reply(_) => MessageType::Reply,
            Message::ReadReply(_) => MessageType::ReadReply,
            Message::Replicate(_) => MessageType::Replicate,
            Message::ReplicateAck(_) => MessageType::ReplicateAck,
        }
    }

    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        let envelope = self.to_proto();
        let mut buf = BytesMut::with_capacity(envelope.encoded_len());
        envelope.encode(&mut buf).map_err(|source| EncodeError {
            message_type: self.message_type(),
            source,
        })?;

        Ok(buf.freeze())
    }

    pub fn decode(bytes: &[u8]) -> Result<Message, ProtocolError> {
        let envelope = ProtoEnvelope::decode(bytes)?;
        Self::from_proto(envelope)
    }

    fn to_proto(&self) -> ProtoEnvelope {
        let body = match self {
            Message::JoinRequest { source, heartbeat } => proto_envelope::Body::JoinRequest(ProtoJoinRequest {
                source: Some(address_to_proto(source)),
                heartbeat: *heartbeat,
            }),
            Message::JoinReply { members } => proto_envelope::Body::JoinReply(members_to_proto(members)),
            Message::Heartbeat { members } => proto_envelope::Body::Heartbeat(members_to_proto(members)),
            Message::Create(req) => proto_envelope::Body::Create(key_value_request_to_proto(req)),
            Message::Update(req) => proto_envelope::Body::Update(key_value_request_to_proto(req)),
            Message::Read(req) => proto_envelope::Body::Read(key_request_to_proto(req)),
            Message::Delete(req) => proto_envelope::Body::Delete(key_request_to_proto(req)),
            Message::Reply(reply) => proto_envelope::Body::Reply(ProtoReply {
                transaction_id: reply.transaction_id.as_i64(),
                source: Some(address_to_proto(&reply.source)),
                success: reply.success,
            }),
            Message::ReadReply(reply) => proto_envelope::Body::ReadReply(ProtoReadReply {
                transaction_id: reply.transaction_id.as_i64(),
                source: Some(address_to_proto(&reply.source)),
                value: reply.value.clone(),
            }),
            Message::Replicate(push) => proto_envelope::Body::Replicate(ProtoReplicate {
                source: Some(address_to_proto(&push.source)),
                key: push.key.clone(),
                value: push.value.clone(),
                write_timestamp: push.write_timestamp.as_i64(),
                role: role_to_proto(push.role) as i32,
            }),
            Message::ReplicateAck(ack) => proto_envelope::Body::ReplicateAck(ProtoReplicateAck {
                source: Some(address_to_proto(&ack.source)),
                key: ack.key.clone(),
                write_timestamp: ack.write_timestamp.as_i64(),
            }),
        };

        ProtoEnvelope { body: Some(body) }
    }

    fn from_proto(envelope: ProtoEnvelope) -> Result<Message, ProtocolError> {
        let message = match envelope.body.ok_or(ProtocolError::MissingBody)? {
            proto_envelope::Body::JoinRequest(req) => Message::JoinRequest {
                source: address_from_proto(req.source, MessageType::JoinRequest)?,
                heartbeat: req.heartbeat,
            },
            proto_envelope::Body::JoinReply(list) => Message::JoinReply {
                members: members_from_proto(list)?,
            },
            proto_envelope::Body::Heartbeat(list) => Message::Heartbeat {
                members: members_from_proto(list)?,
            },
            proto_envelope::Body::Create(req) => {
                Message::Create(key_value_request_from_proto(req, MessageType::Create)?)
            }
            proto_envelope::Body::Update(req) => {
                Message::Update(key_value_request_from_proto(req, MessageType::Update)?)
            }
            proto_envelope::Body::Read(req) => Message::Read(key_request_from_proto(req, MessageType::Read)?),
            proto_envelope::Body::Delete(req) => Message::Delete(key_request_from_proto(req, MessageType::Delete)?),
            proto_envelope::Body::Reply(reply) => Message::Reply(Reply {
                transaction_id: TransactionId::new(reply.transaction_id),
                source: address_from_proto(reply.source, MessageType::Reply)?,
                success: reply.success,
            }),
            proto_envelope::Body::ReadReply(reply) => Message::ReadReply(ReadReply {
                transaction_id: TransactionId::new(reply.transaction_id),
                source: address_from_proto(reply.source, MessageType::ReadReply)?,
                value: reply.value,
            }),
            proto_envelope::Body::Replicate(push) => Message::Replicate(ReplicatePush {
                source: address_from_proto(push.source, MessageType::Replicate)?,
                key: push.key,
                value: push.value,
                write_timestamp: Timestamp::new(push.write_timestamp),
                role: role_from_proto(push.role)?,
            }),
            proto_envelope::Body::ReplicateAck(ack) => Message::ReplicateAck(ReplicateAck {
                source: address_from_proto(ack.source, MessageType::ReplicateAck)?,
                key: ack.key,
                write_timestamp: Timestamp::new(ack.write_timestamp),
            }),
        };

        Ok(message)
    }
}

// ------- Conversions --------

fn address_to_proto(address: &NodeAddress) -> ProtoAddress {
    ProtoAddress {
        id: address.id(),
        port: i32::from(address.port()),
    }
}

fn address_from_proto(address: Option<ProtoAddress>, message_type: MessageType) -> Result<NodeAddress, ProtocolError> {
    let address = address.ok_or(ProtocolError::MissingSource(message_type))?;
    Ok(NodeAddress::new(address.id, port_from_proto(address.port)?))
}

fn port_from_proto(port: i32) -> Result<i16, ProtocolError> {
    i16::try_from(port).map_err(|_| ProtocolError::PortOutOfRange(port))
}

fn role_to_proto(role: ReplicaRole) -> ProtoReplicaRole {
    match role {
        ReplicaRole::Primary => ProtoReplicaRole::Primary,
        ReplicaRole::Secondary => ProtoReplicaRole::Secondary,
        ReplicaRole::Tertiary => ProtoReplicaRole::Tertiary,
    }
}

fn role_from_proto(role: i32) -> Result<ReplicaRole, ProtocolError> {
    match ProtoReplicaRole::from_i32(role) {
        Some(ProtoReplicaRole::Primary) => Ok(ReplicaRole::Primary),
        Some(ProtoReplicaRole::Secondary) => Ok(ReplicaRole::Secondary),
        Some(ProtoReplicaRole::Tertiary) => Ok(ReplicaRole::Tertiary),
        None => Err(ProtocolError::UnknownRole(role)),
    }
}

fn members_to_proto(members: &[MemberEntry]) -> ProtoMemberList {
    ProtoMemberList {
        entries: members
            .iter()
            .map(|entry| ProtoMemberEntry {
                id: entry.id,
                port: i32::from(entry.port),
                heartbeat: entry.heartbeat,
                timestamp: entry.timestamp.as_i64(),
            })
            .collect(),
    }
}

fn members_from_proto(list: ProtoMemberList) -> Result<Vec<MemberEntry>, ProtocolError> {
    list.entries
        .into_iter()
        .map(|entry| {
            Ok(MemberEntry {
                id: entry.id,
                port: port_from_proto(entry.port)?,
                heartbeat: entry.heartbeat,
                timestamp: Timestamp::new(entry.timestamp),
            })
        })
        .collect()
}

fn key_value_request_to_proto(req: &KeyValueRequest) -> ProtoKeyValueRequest {
    ProtoKeyValueRequest {
        transaction_id: req.transaction_id.as_i64(),
        source: Some(address_to_proto(&req.source)),
        key: req.key.clone(),
        value: req.value.clone(),
        role: role_to_proto(req.role) as i32,
        timestamp: req.timestamp.as_i64(),
    }
}

fn key_value_request_from_proto(
    req: ProtoKeyValueRequest,
    message_type: MessageType,
) -> Result<KeyValueRequest, ProtocolError> {
    Ok(KeyValueRequest {
        transaction_id: TransactionId::new(req.transaction_id),
        source: address_from_proto(req.source, message_type)?,
        key: req.key,
        value: req.value,
        role: role_from_proto(req.role)?,
        timestamp: Timestamp::new(req.timestamp),
    })
}

fn key_request_to_proto(req: &KeyRequest) -> ProtoKeyRequest {
    ProtoKeyRequest {
        transaction_id: req.transaction_id.as_i64(),
        source: Some(address_to_proto(&req.source)),
        key: req.key.clone(),
        timestamp: req.timestamp.as_i64(),
    }
}

fn key_request_from_proto(req: ProtoKeyRequest, message_type: MessageType) -> Result<KeyRequest, ProtocolError> {
    Ok(KeyRequest {
        transaction_id: TransactionId::new(req.transaction_id),
        source: address_from_proto(req.source, message_type)?,
        key: req.key,
        timestamp: Timestamp::new(req.timestamp),
    })
}
