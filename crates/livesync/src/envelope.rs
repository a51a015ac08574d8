use crate::error::{Result, SyncError};
use crate::types::{ChatMessage, ChildRef, EventRef, LiveEvent, Question, lenient_string};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// The unit of transport between server and client.
///
/// Wire format: `{ "id": ..., "clientId": ..., "type": ..., "data": {...} }`.
/// `id` and `clientId` form the resumption cursor and are taken verbatim
/// from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub client_id: String,
    #[serde(rename = "type", default, deserialize_with = "lenient_tag")]
    pub message_type: String,
    #[serde(default)]
    pub data: Value,
}

/// Any JSON value is accepted as a type tag; anything but a string simply
/// never matches a known kind.
fn lenient_tag<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Event,
    Question,
    Message,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Change {
    Created,
    Updated,
    Deleted,
}

/// A recognised `type` tag, `<entity>-<change>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageType {
    pub entity: EntityKind,
    pub change: Change,
}

impl MessageType {
    pub const fn new(entity: EntityKind, change: Change) -> Self {
        Self { entity, change }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        let (entity, change) = tag.split_once('-')?;
        let entity = match entity {
            "event" => EntityKind::Event,
            "question" => EntityKind::Question,
            "message" => EntityKind::Message,
            _ => return None,
        };
        let change = match change {
            "created" => Change::Created,
            "updated" => Change::Updated,
            "deleted" => Change::Deleted,
            _ => return None,
        };
        Some(Self { entity, change })
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entity = match self.entity {
            EntityKind::Event => "event",
            EntityKind::Question => "question",
            EntityKind::Message => "message",
        };
        let change = match self.change {
            Change::Created => "created",
            Change::Updated => "updated",
            Change::Deleted => "deleted",
        };
        write!(f, "{}-{}", entity, change)
    }
}

/// Typed content of an envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    EventCreated(LiveEvent),
    EventUpdated(LiveEvent),
    EventDeleted(EventRef),
    QuestionCreated(Question),
    QuestionUpdated(Question),
    QuestionDeleted(ChildRef),
    MessageCreated(ChatMessage),
    MessageUpdated(ChatMessage),
    MessageDeleted(ChildRef),
    Unknown(String),
}

impl Envelope {
    pub fn new(message_type: MessageType, data: Value) -> Self {
        Self {
            id: String::new(),
            client_id: String::new(),
            message_type: message_type.to_string(),
            data,
        }
    }

    /// Decode a raw text frame.
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(SyncError::MalformedFrame)
    }

    pub fn to_frame(&self) -> Result<String> {
        serde_json::to_string(self).map_err(SyncError::MalformedFrame)
    }

    pub fn kind(&self) -> Option<MessageType> {
        MessageType::from_tag(&self.message_type)
    }

    /// Decode `data` according to the envelope's type tag.
    pub fn delta(&self) -> Result<Delta> {
        let Some(kind) = self.kind() else {
            return Ok(Delta::Unknown(self.message_type.clone()));
        };

        let delta = match (kind.entity, kind.change) {
            (EntityKind::Event, Change::Created) => Delta::EventCreated(self.decode(kind)?),
            (EntityKind::Event, Change::Updated) => Delta::EventUpdated(self.decode(kind)?),
            (EntityKind::Event, Change::Deleted) => Delta::EventDeleted(self.decode(kind)?),
            (EntityKind::Question, Change::Created) => Delta::QuestionCreated(self.decode(kind)?),
            (EntityKind::Question, Change::Updated) => Delta::QuestionUpdated(self.decode(kind)?),
            (EntityKind::Question, Change::Deleted) => Delta::QuestionDeleted(self.decode(kind)?),
            (EntityKind::Message, Change::Created) => Delta::MessageCreated(self.decode(kind)?),
            (EntityKind::Message, Change::Updated) => Delta::MessageUpdated(self.decode(kind)?),
            (EntityKind::Message, Change::Deleted) => Delta::MessageDeleted(self.decode(kind)?),
        };
        Ok(delta)
    }

    fn decode<T: DeserializeOwned>(&self, message_type: MessageType) -> Result<T> {
        T::deserialize(&self.data).map_err(|source| SyncError::InvalidPayload {
            message_type,
            source,
        })
    }
}
