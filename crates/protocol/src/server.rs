//! Server → Client messages

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{payload_as, payload_value, DecodeError, Payload};
use crate::types::{Chat, Message, Template};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCreated {
    pub chat: Chat,
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageCreated {
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatContents {
    pub chat: Chat,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateList {
    pub templates: Vec<Template>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateRecord {
    pub template: Template,
}

/// Messages sent from the server to browser clients
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Pong,
    Error(ErrorPayload),
    ChatCreated(ChatCreated),
    MessageCreated(MessageCreated),
    ReadChat(ChatContents),
    ReadTemplates(TemplateList),
    ReadTemplate(TemplateRecord),
    TemplateChanged(TemplateRecord),
    TemplateCreated(TemplateRecord),
    TemplateDeleted(TemplateRecord),
    /// Tells a reconnecting tab to drop its in-memory state.
    Reload,
}

impl ServerMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorPayload {
            code: code.into(),
            message: message.into(),
        })
    }

    pub fn message_created(message: Message) -> Self {
        ServerMessage::MessageCreated(MessageCreated { message })
    }
}

impl Payload for ServerMessage {
    const REQUIRES_ID: bool = false;

    fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Pong => "pong",
            ServerMessage::Error(_) => "error",
            ServerMessage::ChatCreated(_) => "chat-created",
            ServerMessage::MessageCreated(_) => "message-created",
            ServerMessage::ReadChat(_) => "read-chat",
            ServerMessage::ReadTemplates(_) => "read-templates",
            ServerMessage::ReadTemplate(_) => "read-template",
            ServerMessage::TemplateChanged(_) => "template-changed",
            ServerMessage::TemplateCreated(_) => "template-created",
            ServerMessage::TemplateDeleted(_) => "template-deleted",
            ServerMessage::Reload => "reload",
        }
    }

    fn to_payload(&self) -> Result<Option<Value>, serde_json::Error> {
        match self {
            ServerMessage::Pong | ServerMessage::Reload => Ok(None),
            ServerMessage::Error(p) => payload_value(p),
            ServerMessage::ChatCreated(p) => payload_value(p),
            ServerMessage::MessageCreated(p) => payload_value(p),
            ServerMessage::ReadChat(p) => payload_value(p),
            ServerMessage::ReadTemplates(p) => payload_value(p),
            ServerMessage::ReadTemplate(p)
            | ServerMessage::TemplateChanged(p)
            | ServerMessage::TemplateCreated(p)
            | ServerMessage::TemplateDeleted(p) => payload_value(p),
        }
    }

    fn from_parts(kind: &str, payload: Value) -> Result<Self, DecodeError> {
        Ok(match kind {
            "pong" => ServerMessage::Pong,
            "reload" => ServerMessage::Reload,
            "error" => ServerMessage::Error(payload_as(kind, payload)?),
            "chat-created" => ServerMessage::ChatCreated(payload_as(kind, payload)?),
            "message-created" => ServerMessage::MessageCreated(payload_as(kind, payload)?),
            "read-chat" => ServerMessage::ReadChat(payload_as(kind, payload)?),
            "read-templates" => ServerMessage::ReadTemplates(payload_as(kind, payload)?),
            "read-template" => ServerMessage::ReadTemplate(payload_as(kind, payload)?),
            "template-changed" => ServerMessage::TemplateChanged(payload_as(kind, payload)?),
            "template-created" => ServerMessage::TemplateCreated(payload_as(kind, payload)?),
            "template-deleted" => ServerMessage::TemplateDeleted(payload_as(kind, payload)?),
            other => return Err(DecodeError::UnknownType(other.to_string())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;
    use crate::Envelope;
    use chrono::{TimeZone, Utc};

    #[test]
    fn pong_has_no_payload_field() {
        let json = Envelope::new("c1", ServerMessage::Pong).encode().unwrap();
        assert_eq!(json, r#"{"id":"c1","type":"pong"}"#);
    }

    #[test]
    fn reload_omits_the_id() {
        let json = Envelope::new("", ServerMessage::Reload).encode().unwrap();
        assert_eq!(json, r#"{"type":"reload"}"#);
    }

    #[test]
    fn chat_created_keeps_chat_and_first_message() {
        let created_at = Utc.with_ymd_and_hms(2024, 1, 15, 12, 30, 45).unwrap();
        let msg = ServerMessage::ChatCreated(ChatCreated {
            chat: Chat {
                id: 3,
                title: "hello".into(),
                created_at,
            },
            message: Message {
                id: 9,
                chat_id: 3,
                role: Role::User,
                content: "hello there".into(),
                provider: None,
                model: None,
                created_at: Some(created_at),
            },
        });
        let json = Envelope::new("r1", msg.clone()).encode().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "chat-created");
        assert_eq!(value["payload"]["chat"]["id"], 3);
        assert_eq!(value["payload"]["message"]["role"], "user");

        let decoded = Envelope::<ServerMessage>::decode(json.as_bytes()).unwrap();
        assert_eq!(decoded.id, "r1");
        assert_eq!(decoded.message, msg);
    }

    #[test]
    fn error_payload_requires_code_and_message() {
        let err = Envelope::<ServerMessage>::decode(
            br#"{"id":"x","type":"error","payload":{"message":"boom"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::InvalidPayload { .. }));
    }
}
