//! Command implementations. Each returns its result for the caller to
//! render; state-changing commands relay their events to a running server.

use std::sync::Arc;
use std::time::Duration;

use parley_core::actions::{self, CompletionOutcome};
use parley_core::Services;
use parley_protocol::client::{CreateCompletion, EditTemplate};
use parley_protocol::{Chat, CompletionParams, Message, Template};
use parley_provider::{ProviderRegistry, ProviderSettings};
use parley_store::{DataDir, Store};

use crate::relay::RelayNotifier;

/// Everything a command needs, opened once per process.
pub struct Context {
    pub services: Services,
    pub notifier: RelayNotifier,
}

impl Context {
    pub fn open(data_dir: &DataDir, relay_timeout: Duration) -> anyhow::Result<Self> {
        data_dir.ensure_dirs()?;
        let store = Store::open(data_dir.db_path())?;
        let settings = ProviderSettings::load(&data_dir.providers_path())?;
        let providers = Arc::new(ProviderRegistry::from_settings(&settings)?);
        let notifier = RelayNotifier::new(store.clone(), relay_timeout)?;
        Ok(Self {
            services: Services::new(store, providers),
            notifier,
        })
    }

    fn store(&self) -> &Store {
        &self.services.store
    }
}

pub async fn chat_new(
    ctx: &Context,
    content: String,
    template: Option<String>,
    params: CompletionParams,
) -> anyhow::Result<CompletionOutcome> {
    complete(ctx, None, content, template, params).await
}

pub async fn chat_continue(
    ctx: &Context,
    chat_id: i64,
    content: String,
    template: Option<String>,
    params: CompletionParams,
) -> anyhow::Result<CompletionOutcome> {
    complete(ctx, Some(chat_id), content, template, params).await
}

async fn complete(
    ctx: &Context,
    chat_id: Option<i64>,
    content: String,
    template: Option<String>,
    params: CompletionParams,
) -> anyhow::Result<CompletionOutcome> {
    let request = CreateCompletion {
        chat_id,
        content,
        template,
        params,
    };
    let sink = ctx.notifier.sink();
    Ok(actions::create_completion(&ctx.services, &sink, request).await?)
}

pub async fn chat_show(ctx: &Context, chat_id: i64) -> anyhow::Result<(Chat, Vec<Message>)> {
    let chat = ctx
        .store()
        .chat(chat_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("chat {chat_id} not found"))?;
    let messages = ctx.store().messages(chat_id).await?;
    Ok((chat, messages))
}

pub async fn chat_list(ctx: &Context) -> anyhow::Result<Vec<Chat>> {
    Ok(ctx.store().chats().await?)
}

pub async fn template_list(ctx: &Context) -> anyhow::Result<Vec<Template>> {
    Ok(ctx.store().templates().await?)
}

pub async fn template_show(ctx: &Context, name: &str) -> anyhow::Result<Template> {
    ctx.store()
        .template(name)
        .await?
        .ok_or_else(|| anyhow::anyhow!("template `{name}` not found"))
}

/// Returns the stored template and whether it was newly created.
pub async fn template_upsert(ctx: &Context, name: String, body: String) -> anyhow::Result<(Template, bool)> {
    let sink = ctx.notifier.sink();
    Ok(actions::upsert_template(&ctx.services, &sink, name, body).await?)
}

pub async fn template_edit(
    ctx: &Context,
    name: String,
    body: String,
    clone: bool,
    new_name: Option<String>,
) -> anyhow::Result<Template> {
    let sink = ctx.notifier.sink();
    let request = EditTemplate {
        name,
        body,
        clone,
        new_name,
    };
    Ok(actions::edit_template(&ctx.services, &sink, request).await?)
}

pub async fn template_delete(ctx: &Context, name: &str) -> anyhow::Result<Template> {
    let sink = ctx.notifier.sink();
    Ok(actions::delete_template(&ctx.services, &sink, name).await?)
}
