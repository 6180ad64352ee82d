//! State-changing actions. Each one persists first and then emits, in order,
//! exactly the server messages a browser needs to mirror the change.

use parley_protocol::client::{CreateCompletion, EditTemplate};
use parley_protocol::server::{ChatCreated, TemplateRecord};
use parley_protocol::{Chat, CompletionParams, Message, Role, ServerMessage, Template};
use tracing::info;

use crate::resolver::{is_template_name, resolve_template};
use crate::{title_from_first_prompt, ActionError, EventSink, Services};

/// The persisted result of one completion round trip.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub chat: Chat,
    pub user: Message,
    pub assistant: Message,
}

/// Run a completion, starting a new chat when `request.chat_id` is unset.
pub async fn create_completion(
    services: &Services,
    sink: &dyn EventSink,
    request: CreateCompletion,
) -> Result<CompletionOutcome, ActionError> {
    let content = compose_prompt(services, request.template.as_deref(), &request.content).await?;
    match request.chat_id {
        None => new_chat(services, sink, content, &request.params).await,
        Some(chat_id) => continue_chat(services, sink, chat_id, content, &request.params).await,
    }
}

/// Emits `chat-created` (chat plus its persisted first message), then
/// `message-created` for the completion.
pub async fn new_chat(
    services: &Services,
    sink: &dyn EventSink,
    content: String,
    params: &CompletionParams,
) -> Result<CompletionOutcome, ActionError> {
    let title = title_from_first_prompt(&content)
        .ok_or_else(|| ActionError::Invalid("message content is empty".into()))?;
    services.providers.provider_for(params)?;

    let (chat, user) = services
        .store
        .create_chat(title, Message::draft(0, Role::User, content))
        .await?;
    info!(
        component = "actions",
        event = "chat.created",
        chat_id = chat.id,
        "Chat created"
    );
    sink.emit(ServerMessage::ChatCreated(ChatCreated {
        chat: chat.clone(),
        message: user.clone(),
    }))
    .await;

    let assistant = complete_and_store(services, chat.id, params, vec![user.clone()]).await?;
    sink.emit(ServerMessage::message_created(assistant.clone()))
        .await;

    Ok(CompletionOutcome {
        chat,
        user,
        assistant,
    })
}

/// Persists the user turn and emits it as an optimistic `message-created`
/// (store-assigned fields cleared), then `message-created` for the
/// completion.
pub async fn continue_chat(
    services: &Services,
    sink: &dyn EventSink,
    chat_id: i64,
    content: String,
    params: &CompletionParams,
) -> Result<CompletionOutcome, ActionError> {
    if content.trim().is_empty() {
        return Err(ActionError::Invalid("message content is empty".into()));
    }
    let chat = services
        .store
        .chat(chat_id)
        .await?
        .ok_or(ActionError::ChatNotFound(chat_id))?;
    services.providers.provider_for(params)?;

    let user = services
        .store
        .append_messages(chat_id, vec![Message::draft(chat_id, Role::User, content)])
        .await?
        .pop()
        .ok_or_else(|| ActionError::Invalid("user turn was not stored".into()))?;
    sink.emit(ServerMessage::message_created(user.clone().into_optimistic()))
        .await;

    let history = services.store.messages(chat_id).await?;
    let assistant = complete_and_store(services, chat_id, params, history).await?;
    sink.emit(ServerMessage::message_created(assistant.clone()))
        .await;

    Ok(CompletionOutcome {
        chat,
        user,
        assistant,
    })
}

/// Ask the provider for the next turn and persist the reply.
async fn complete_and_store(
    services: &Services,
    chat_id: i64,
    params: &CompletionParams,
    history: Vec<Message>,
) -> Result<Message, ActionError> {
    let completion = services.providers.complete(params, history).await?;
    let mut reply = Message::draft(chat_id, Role::Assistant, completion.content);
    reply.provider = Some(completion.provider);
    reply.model = Some(completion.model);

    services
        .store
        .append_messages(chat_id, vec![reply])
        .await?
        .pop()
        .ok_or_else(|| ActionError::Invalid("completion was not stored".into()))
}

/// The user turn: the resolved template (if any), a blank line, then the
/// typed content.
async fn compose_prompt(
    services: &Services,
    template: Option<&str>,
    content: &str,
) -> Result<String, ActionError> {
    let Some(name) = template else {
        return Ok(content.to_string());
    };
    let resolved = resolve_template(&services.store, name).await?;
    if content.trim().is_empty() {
        Ok(resolved)
    } else {
        Ok(format!("{resolved}\n\n{content}"))
    }
}

/// Update a template body, or copy it under a new name when `clone` is set.
/// Emits `template-created` for a clone, `template-changed` otherwise.
pub async fn edit_template(
    services: &Services,
    sink: &dyn EventSink,
    request: EditTemplate,
) -> Result<Template, ActionError> {
    validate_name(&request.name)?;

    if request.clone {
        let source_exists = services.store.template(&request.name).await?.is_some();
        if !source_exists {
            return Err(ActionError::TemplateNotFound(request.name));
        }
        let new_name = request
            .new_name
            .unwrap_or_else(|| format!("{}-copy", request.name));
        validate_name(&new_name)?;

        let template = services
            .store
            .create_template(new_name, request.body)
            .await?;
        sink.emit(ServerMessage::TemplateCreated(TemplateRecord {
            template: template.clone(),
        }))
        .await;
        return Ok(template);
    }

    let template = services
        .store
        .update_template(request.name.clone(), request.body)
        .await?
        .ok_or(ActionError::TemplateNotFound(request.name))?;
    sink.emit(ServerMessage::TemplateChanged(TemplateRecord {
        template: template.clone(),
    }))
    .await;
    Ok(template)
}

/// Create or replace a template. Emits `template-created` or
/// `template-changed` accordingly.
pub async fn upsert_template(
    services: &Services,
    sink: &dyn EventSink,
    name: String,
    body: String,
) -> Result<(Template, bool), ActionError> {
    validate_name(&name)?;
    let (template, created) = services.store.upsert_template(name, body).await?;
    let record = TemplateRecord {
        template: template.clone(),
    };
    let event = if created {
        ServerMessage::TemplateCreated(record)
    } else {
        ServerMessage::TemplateChanged(record)
    };
    sink.emit(event).await;
    Ok((template, created))
}

/// Emits `template-deleted` with the removed record.
pub async fn delete_template(
    services: &Services,
    sink: &dyn EventSink,
    name: &str,
) -> Result<Template, ActionError> {
    let template = services
        .store
        .delete_template(name)
        .await?
        .ok_or_else(|| ActionError::TemplateNotFound(name.to_string()))?;
    sink.emit(ServerMessage::TemplateDeleted(TemplateRecord {
        template: template.clone(),
    }))
    .await;
    Ok(template)
}

fn validate_name(name: &str) -> Result<(), ActionError> {
    if is_template_name(name) {
        Ok(())
    } else {
        Err(ActionError::Invalid(format!(
            "`{name}` is not a valid template name (letters, digits, `-`, `_`, `.`)"
        )))
    }
}
