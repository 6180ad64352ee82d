//! Routes decoded client requests to actions and decides who hears the
//! result.
//!
//! | request                 | success goes to | error goes to |
//! |-------------------------|-----------------|---------------|
//! | ping                    | sender          | sender        |
//! | request-read-*          | sender          | sender        |
//! | create-completion       | all clients     | sender        |
//! | request-edit-template   | all clients     | sender        |
//! | delete-template         | all clients     | sender        |

use async_trait::async_trait;
use parley_core::{actions, ActionError, EventSink, Services};
use parley_protocol::client::{DeleteTemplate, ReadChat, ReadTemplate};
use parley_protocol::server::{ChatContents, TemplateList, TemplateRecord};
use parley_protocol::{peek_id, ClientMessage, DecodeError, Envelope, Payload, ServerMessage};
use parley_store::StoreError;
use thiserror::Error;
use tracing::{debug, warn};

use crate::hub::{ClientId, HubHandle, Target};

/// Code sent back for frames that never decoded into a request.
pub const DECODE_ERROR: &str = "decode_error";

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Action(#[from] ActionError),
}

impl From<StoreError> for DispatchError {
    fn from(err: StoreError) -> Self {
        DispatchError::Action(err.into())
    }
}

impl DispatchError {
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::Decode(_) => DECODE_ERROR,
            DispatchError::Action(err) => err.code(),
        }
    }
}

pub struct Dispatcher {
    hub: HubHandle,
    services: Services,
}

impl Dispatcher {
    pub fn new(hub: HubHandle, services: Services) -> Self {
        Self { hub, services }
    }

    /// Decode one inbound frame and act on it. Decode failures are answered
    /// with an `error` envelope to the sender only.
    pub async fn handle_frame(&self, origin: ClientId, frame: &[u8]) {
        match Envelope::<ClientMessage>::decode(frame) {
            Ok(envelope) => self.dispatch(origin, envelope).await,
            Err(e) => {
                warn!(
                    component = "dispatch",
                    event = "dispatch.decode_failed",
                    client_id = origin,
                    error = %e,
                    payload_bytes = frame.len(),
                    payload_preview = %truncate_for_log(&String::from_utf8_lossy(frame), 240),
                    "Failed to decode client message"
                );
                let responder = Responder {
                    hub: self.hub.clone(),
                    origin,
                    correlation_id: peek_id(frame).unwrap_or_default(),
                };
                responder.fail(&DispatchError::from(e)).await;
            }
        }
    }

    pub async fn dispatch(&self, origin: ClientId, envelope: Envelope<ClientMessage>) {
        let kind = envelope.message.kind();
        debug!(
            component = "dispatch",
            event = "dispatch.request",
            client_id = origin,
            correlation_id = %envelope.id,
            kind,
            "Dispatching client request"
        );
        let responder = Responder {
            hub: self.hub.clone(),
            origin,
            correlation_id: envelope.id,
        };
        if let Err(err) = self.process(envelope.message, &responder).await {
            warn!(
                component = "dispatch",
                event = "dispatch.failed",
                client_id = origin,
                correlation_id = %responder.correlation_id,
                kind,
                code = err.code(),
                error = %err,
                "Client request failed"
            );
            responder.fail(&err).await;
        }
    }

    async fn process(&self, message: ClientMessage, responder: &Responder) -> Result<(), DispatchError> {
        let store = &self.services.store;
        let everyone = responder.fan_out(Target::All);

        match message {
            ClientMessage::Ping => {
                responder.reply(ServerMessage::Pong).await;
            }

            ClientMessage::CreateCompletion(request) => {
                actions::create_completion(&self.services, &everyone, request).await?;
            }

            ClientMessage::RequestReadChat(ReadChat { chat_id }) => {
                let chat = store
                    .chat(chat_id)
                    .await?
                    .ok_or(ActionError::ChatNotFound(chat_id))?;
                let messages = store.messages(chat_id).await?;
                responder
                    .reply(ServerMessage::ReadChat(ChatContents { chat, messages }))
                    .await;
            }

            ClientMessage::RequestReadTemplates => {
                let templates = store.templates().await?;
                responder
                    .reply(ServerMessage::ReadTemplates(TemplateList { templates }))
                    .await;
            }

            ClientMessage::RequestReadTemplate(ReadTemplate { name }) => {
                let template = store
                    .template(&name)
                    .await?
                    .ok_or(ActionError::TemplateNotFound(name))?;
                responder
                    .reply(ServerMessage::ReadTemplate(TemplateRecord { template }))
                    .await;
            }

            ClientMessage::RequestEditTemplate(request) => {
                actions::edit_template(&self.services, &everyone, request).await?;
            }

            ClientMessage::DeleteTemplate(DeleteTemplate { name }) => {
                actions::delete_template(&self.services, &everyone, &name).await?;
            }
        }
        Ok(())
    }
}

/// Sends responses for one request, stamped with its correlation id.
struct Responder {
    hub: HubHandle,
    origin: ClientId,
    correlation_id: String,
}

impl Responder {
    async fn send(&self, target: Target, message: ServerMessage) {
        let envelope = Envelope::new(self.correlation_id.clone(), message);
        if self.hub.send(target, &envelope).await.is_err() {
            debug!(
                component = "dispatch",
                event = "dispatch.hub_closed",
                client_id = self.origin,
                correlation_id = %self.correlation_id,
                "Hub stopped before response was queued"
            );
        }
    }

    async fn reply(&self, message: ServerMessage) {
        self.send(Target::Single(self.origin), message).await;
    }

    /// Errors only ever go back to the requester.
    async fn fail(&self, err: &DispatchError) {
        self.reply(ServerMessage::error(err.code(), err.to_string()))
            .await;
    }

    fn fan_out(&self, target: Target) -> FanOut<'_> {
        FanOut {
            responder: self,
            target,
        }
    }
}

/// Action events routed through the hub to `target`.
struct FanOut<'a> {
    responder: &'a Responder,
    target: Target,
}

#[async_trait]
impl EventSink for FanOut<'_> {
    async fn emit(&self, event: ServerMessage) {
        self.responder.send(self.target, event).await;
    }
}

fn truncate_for_log(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}
