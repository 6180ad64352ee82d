//! Client → Server messages

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{payload_as, payload_value, DecodeError, Payload};
use crate::types::CompletionParams;

/// Ask a provider for the next assistant turn. Without `chat_id` a new chat
/// is started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateCompletion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default)]
    pub params: CompletionParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadChat {
    pub chat_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadTemplate {
    pub name: String,
}

/// Replace a template body, or copy it under a new name when `clone` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditTemplate {
    pub name: String,
    pub body: String,
    #[serde(default)]
    pub clone: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteTemplate {
    pub name: String,
}

/// Messages sent from a browser client to the server
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Ping,
    CreateCompletion(CreateCompletion),
    RequestReadChat(ReadChat),
    RequestReadTemplates,
    RequestReadTemplate(ReadTemplate),
    RequestEditTemplate(EditTemplate),
    DeleteTemplate(DeleteTemplate),
}

impl Payload for ClientMessage {
    const REQUIRES_ID: bool = true;

    fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Ping => "ping",
            ClientMessage::CreateCompletion(_) => "create-completion",
            ClientMessage::RequestReadChat(_) => "request-read-chat",
            ClientMessage::RequestReadTemplates => "request-read-templates",
            ClientMessage::RequestReadTemplate(_) => "request-read-template",
            ClientMessage::RequestEditTemplate(_) => "request-edit-template",
            ClientMessage::DeleteTemplate(_) => "delete-template",
        }
    }

    fn to_payload(&self) -> Result<Option<Value>, serde_json::Error> {
        match self {
            ClientMessage::Ping | ClientMessage::RequestReadTemplates => Ok(None),
            ClientMessage::CreateCompletion(p) => payload_value(p),
            ClientMessage::RequestReadChat(p) => payload_value(p),
            ClientMessage::RequestReadTemplate(p) => payload_value(p),
            ClientMessage::RequestEditTemplate(p) => payload_value(p),
            ClientMessage::DeleteTemplate(p) => payload_value(p),
        }
    }

    fn from_parts(kind: &str, payload: Value) -> Result<Self, DecodeError> {
        Ok(match kind {
            "ping" => ClientMessage::Ping,
            "create-completion" => ClientMessage::CreateCompletion(payload_as(kind, payload)?),
            "request-read-chat" => ClientMessage::RequestReadChat(payload_as(kind, payload)?),
            "request-read-templates" => ClientMessage::RequestReadTemplates,
            "request-read-template" => ClientMessage::RequestReadTemplate(payload_as(kind, payload)?),
            "request-edit-template" => ClientMessage::RequestEditTemplate(payload_as(kind, payload)?),
            "delete-template" => ClientMessage::DeleteTemplate(payload_as(kind, payload)?),
            other => return Err(DecodeError::UnknownType(other.to_string())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Envelope;

    #[test]
    fn decodes_ping_without_payload() {
        let env = Envelope::<ClientMessage>::decode(br#"{"id":"c1","type":"ping"}"#).unwrap();
        assert_eq!(env.id, "c1");
        assert_eq!(env.message, ClientMessage::Ping);
    }

    #[test]
    fn decodes_create_completion_for_existing_chat() {
        let json = r#"{
          "id":"c2",
          "type":"create-completion",
          "payload":{"chat_id":7,"content":"hello","params":{"provider":"echo","max_tokens":64}}
        }"#;
        let env = Envelope::<ClientMessage>::decode(json.as_bytes()).unwrap();
        match env.message {
            ClientMessage::CreateCompletion(p) => {
                assert_eq!(p.chat_id, Some(7));
                assert_eq!(p.content, "hello");
                assert_eq!(p.params.provider.as_deref(), Some("echo"));
                assert_eq!(p.params.max_tokens, Some(64));
                assert_eq!(p.template, None);
            }
            other => panic!("expected create-completion, got {:?}", other),
        }
    }

    #[test]
    fn edit_template_clone_defaults_to_false() {
        let json = r#"{"id":"c3","type":"request-edit-template","payload":{"name":"greet","body":"hi"}}"#;
        let env = Envelope::<ClientMessage>::decode(json.as_bytes()).unwrap();
        match env.message {
            ClientMessage::RequestEditTemplate(p) => {
                assert!(!p.clone);
                assert_eq!(p.new_name, None);
            }
            other => panic!("expected request-edit-template, got {:?}", other),
        }
    }

    #[test]
    fn rejects_unknown_discriminator() {
        let err = Envelope::<ClientMessage>::decode(br#"{"id":"c4","type":"subscribe"}"#)
            .unwrap_err();
        assert!(matches!(err, DecodeError::UnknownType(ref t) if t == "subscribe"));
    }

    #[test]
    fn missing_required_field_is_a_decode_error() {
        let err = Envelope::<ClientMessage>::decode(
            br#"{"id":"c5","type":"request-read-chat","payload":{}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::InvalidPayload { ref kind, .. } if kind == "request-read-chat"));

        let err = Envelope::<ClientMessage>::decode(br#"{"id":"c6","type":"delete-template"}"#)
            .unwrap_err();
        assert!(matches!(err, DecodeError::InvalidPayload { .. }));
    }

    #[test]
    fn missing_id_is_a_decode_error() {
        let err = Envelope::<ClientMessage>::decode(br#"{"type":"ping"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::MissingId));
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        let err = Envelope::<ClientMessage>::decode(b"{not json").unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }
}
