//! The request/response envelope and its tagged content variants.
//!
//! The original source passes message content as an untyped string-keyed
//! mapping; this re-architects it as a tagged-variant payload per message
//! type, per the design notes on dynamic content payloads.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, SimError};
use crate::ids::{Address, FileId, NodeId};

/// Wire-level type tag. Serializes to the exact lowercase strings §6 names,
/// for scenario-file and report compatibility.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Ping,
    Pong,
    FindNode,
    FindNodeResponse,
    FindValue,
    FindValueResponse,
    Store,
    StoreResponse,
    Bootstrap,
    Announce,
}

/// A contact as it appears inside a `FIND_NODE`/`FIND_VALUE` response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeRef {
    pub id: NodeId,
    pub address: Address,
}

/// A provider record as it appears inside a `FIND_VALUE` response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderRef {
    pub address: Address,
    pub last_seen: u64,
}

/// Zero-sized marker that serializes to (and only accepts) the literal
/// string `"ping"`. §6 carries this as a self-describing field so `Ping`
/// and `Pong` content, which otherwise share the same `retry_count` shape,
/// can be told apart by an untagged enum.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct PingTag;

impl Serialize for PingTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str("ping")
    }
}

impl<'de> Deserialize<'de> for PingTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        if tag == "ping" {
            Ok(PingTag)
        } else {
            Err(serde::de::Error::custom(format!("expected tag \"ping\", found \"{tag}\"")))
        }
    }
}

/// Same as [`PingTag`], for the `"pong"` discriminator.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct PongTag;

impl Serialize for PongTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str("pong")
    }
}

impl<'de> Deserialize<'de> for PongTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        if tag == "pong" {
            Ok(PongTag)
        } else {
            Err(serde::de::Error::custom(format!("expected tag \"pong\", found \"{tag}\"")))
        }
    }
}

/// Tagged content payload, one variant per message type in §6.
///
/// Untagged enums resolve by trying each variant in declared order and
/// accepting the first whose fields all deserialize; without
/// `deny_unknown_fields`, extra fields on the input are silently ignored,
/// so a field-subset variant declared earlier can shadow a field-superset
/// variant declared later (`FindNodeResponse` shadowing
/// `FindValueNotFound`, which carries `nodes` too). `deny_unknown_fields`
/// makes every variant's field set exact, and `Ping`/`Pong` additionally
/// carry the `"ping"`/`"pong"` wire tag since `retry_count` alone doesn't
/// distinguish them.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    #[serde(deny_unknown_fields)]
    Ping { ping: PingTag, retry_count: u32 },
    #[serde(deny_unknown_fields)]
    Pong { pong: PongTag, retry_count: u32 },
    #[serde(deny_unknown_fields)]
    FindNodeRequest { target: NodeId },
    #[serde(deny_unknown_fields)]
    FindNodeResponse { nodes: Vec<NodeRef> },
    #[serde(deny_unknown_fields)]
    FindValueRequest { key: FileId },
    #[serde(deny_unknown_fields)]
    FindValueFound { key: FileId, found: bool, providers: Vec<ProviderRef> },
    #[serde(deny_unknown_fields)]
    FindValueNotFound { key: FileId, found: bool, nodes: Vec<NodeRef> },
    #[serde(deny_unknown_fields)]
    StoreRequest { key: FileId, provider: Address },
    #[serde(deny_unknown_fields)]
    StoreResponse { status: String },
}

impl Content {
    /// Build a `Ping` payload without spelling out the wire tag at every
    /// call site.
    pub fn ping(retry_count: u32) -> Content {
        Content::Ping { ping: PingTag, retry_count }
    }

    /// Build a `Pong` payload without spelling out the wire tag at every
    /// call site.
    pub fn pong(retry_count: u32) -> Content {
        Content::Pong { pong: PongTag, retry_count }
    }
}

/// A single in-flight message, owned by value as it transits the event
/// queue (never shared mutably, per the ownership model).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub source_id: NodeId,
    pub target_id: NodeId,
    pub content: Content,
    pub transaction_id: u64,
    pub send_time: Option<u64>,
    pub delivery_time: Option<u64>,
}

impl Message {
    /// Construct a new message. `transaction_id` must be unique across the
    /// sender's pending table; the simulator hands out globally unique IDs,
    /// which is the simplest correct choice.
    pub fn new(
        kind: MessageType,
        source_id: NodeId,
        target_id: NodeId,
        content: Content,
        transaction_id: u64,
    ) -> Self {
        Message {
            kind,
            source_id,
            target_id,
            content,
            transaction_id,
            send_time: None,
            delivery_time: None,
        }
    }

    /// Build the response to this message: swaps source/target, keeps the
    /// transaction id, and maps the request type to its response type
    /// unless the caller supplies one explicitly.
    pub fn create_response(
        &self,
        content: Content,
        response_type: Option<MessageType>,
    ) -> Result<Message> {
        let kind = match response_type {
            Some(t) => t,
            None => match self.kind {
                MessageType::Ping => MessageType::Pong,
                MessageType::FindNode => MessageType::FindNodeResponse,
                MessageType::FindValue => MessageType::FindValueResponse,
                MessageType::Store => MessageType::StoreResponse,
                other => return Err(SimError::UnmappableResponse(other)),
            },
        };

        Ok(Message {
            kind,
            source_id: self.target_id.clone(),
            target_id: self.source_id.clone(),
            content,
            transaction_id: self.transaction_id,
            send_time: None,
            delivery_time: None,
        })
    }
}
