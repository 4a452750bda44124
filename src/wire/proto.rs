//! Protobuf schema for node-to-node messages, declared directly with prost's derive macros. The
//! equivalent `.proto` would be:
//!
//! ```text
//! message ProtoEnvelope {
//!   oneof body {
//!     ProtoJoinRequest join_request = 1;
//!     ProtoMemberList join_reply = 2;
//!     ProtoMemberList heartbeat = 3;
//!     ProtoKeyValueRequest create = 4;
//!     ProtoKeyRequest read = 5;
//!     ProtoKeyValueRequest update = 6;
//!     ProtoKeyRequest delete = 7;
//!     ProtoReply reply = 8;
//!     ProtoReadReply read_reply = 9;
//!     ProtoReplicate replicate = 10;
//!     ProtoReplicateAck replicate_ack = 11;
//!   }
//! }
//! ```

#[derive(Clone, PartialEq, prost::Message)]
pub struct ProtoAddress {
    #[prost(int32, tag = "1")]
    pub id: i32,
    // Wire has no 16 bit integers. Range is checked on decode.
    #[prost(int32, tag = "2")]
    pub port: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ProtoMemberEntry {
    #[prost(int32, tag = "1")]
    pub id: i32,
    #[prost(int32, tag = "2")]
    pub port: i32,
    #[prost(int64, tag = "3")]
    pub heartbeat: i64,
    #[prost(int64, tag = "4")]
    pub timestamp: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ProtoJoinRequest {
    #[prost(message, optional, tag = "1")]
    pub source: Option<ProtoAddress>,
    #[prost(int64, tag = "2")]
    pub heartbeat: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ProtoMemberList {
    #[prost(message, repeated, tag = "1")]
    pub entries: Vec<ProtoMemberEntry>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ProtoKeyValueRequest {
    #[prost(int64, tag = "1")]
    pub transaction_id: i64,
    #[prost(message, optional, tag = "2")]
    pub source: Option<ProtoAddress>,
    #[prost(string, tag = "3")]
    pub key: String,
    #[prost(string, tag = "4")]
    pub value: String,
    #[prost(enumeration = "ProtoReplicaRole", tag = "5")]
    pub role: i32,
    #[prost(int64, tag = "6")]
    pub timestamp: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ProtoKeyRequest {
    #[prost(int64, tag = "1")]
    pub transaction_id: i64,
    #[prost(message, optional, tag = "2")]
    pub source: Option<ProtoAddress>,
    #[prost(string, tag = "3")]
    pub key: String,
    #[prost(int64, tag = "4")]
    pub timestamp: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ProtoReply {
    #[prost(int64, tag = "1")]
    pub transaction_id: i64,
    #[prost(message, optional, tag = "2")]
    pub source: Option<ProtoAddress>,
    #[prost(bool, tag = "3")]
    pub success: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ProtoReadReply {
    #[prost(int64, tag = "1")]
    pub transaction_id: i64,
    #[prost(message, optional, tag = "2")]
    pub source: Option<ProtoAddress>,
    // Absent means the replica didn't have the key.
    #[prost(string, optional, tag = "3")]
    pub value: Option<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ProtoReplicate {
    #[prost(message, optional, tag = "1")]
    pub source: Option<ProtoAddress>,
    #[prost(string, tag = "2")]
    pub key: String,
    // Absent means the key was deleted.
    #[prost(string, optional, tag = "3")]
    pub value: Option<String>,
    #[prost(int64, tag = "4")]
    pub write_timestamp: i64,
    #[prost(enumeration = "ProtoReplicaRole", tag = "5")]
    pub role: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ProtoReplicateAck {
    #[prost(message, optional, tag = "1")]
    pub source: Option<ProtoAddress>,
    #[prost(string, tag = "2")]
    pub key: String,
    #[prost(int64, tag = "3")]
    pub write_timestamp: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ProtoEnvelope {
    #[prost(oneof = "proto_envelope::Body", tags = "1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11")]
    pub body: Option<proto_envelope::Body>,
}

pub mod proto_envelope {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Body {
        #[prost(message, tag = "1")]
        JoinRequest(super::ProtoJoinRequest),
        #[prost(message, tag = "2")]
        JoinReply(super::ProtoMemberList),
        #[prost(message, tag = "3")]
        Heartbeat(super::ProtoMemberList),
        #[prost(message, tag = "4")]
        Create(super::ProtoKeyValueRequest),
        #[prost(message, tag = "5")]
        Read(super::ProtoKeyRequest),
        #[prost(message, tag = "6")]
        Update(super::ProtoKeyValueRequest),
        #[prost(message, tag = "7")]
        Delete(super::ProtoKeyRequest),
        #[prost(message, tag = "8")]
        Reply(super::ProtoReply),
        #[prost(message, tag = "9")]
        ReadReply(super::ProtoReadReply),
        #[prost(message, tag = "10")]
        Replicate(super::ProtoReplicate),
        #[prost(message, tag = "11")]
        ReplicateAck(super::ProtoReplicateAck),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ProtoReplicaRole {
    Primary = 0,
    Secondary = 1,
    Tertiary = 2,
}
