use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use parley_cli::{commands, output, Context, DEFAULT_RELAY_TIMEOUT};
use parley_protocol::CompletionParams;
use parley_store::DataDir;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "parley", version, about = "Chat with language models and manage prompt templates")]
struct Cli {
    /// Data directory (defaults to $PARLEY_DATA_DIR or ~/.parley)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Seconds to wait for a running server to accept a relayed change
    #[arg(long, global = true, default_value_t = DEFAULT_RELAY_TIMEOUT.as_secs())]
    relay_timeout: u64,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start, continue and read chats
    Chat {
        #[command(subcommand)]
        action: ChatAction,
    },

    /// Manage prompt templates
    Template {
        #[command(subcommand)]
        action: TemplateAction,
    },

    /// Print a shell completion script
    Completions {
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ChatAction {
    /// Start a new chat
    New {
        content: String,

        #[command(flatten)]
        options: CompletionOptions,
    },

    /// Add a turn to an existing chat
    Continue {
        chat_id: i64,

        content: String,

        #[command(flatten)]
        options: CompletionOptions,
    },

    /// Show a chat and its messages
    Show { chat_id: i64 },

    /// List chats, newest first
    List,
}

#[derive(Subcommand)]
enum TemplateAction {
    /// List templates
    List,

    /// Show one template
    Show { name: String },

    /// Create a template, or replace its body if it exists
    Upsert {
        name: String,

        #[command(flatten)]
        body: BodySource,
    },

    /// Change a template's body, or save it as a copy with --clone
    Edit {
        name: String,

        #[command(flatten)]
        body: BodySource,

        /// Save as a new template instead of changing this one
        #[arg(long)]
        clone: bool,

        /// Name of the copy (defaults to NAME-copy)
        #[arg(long, requires = "clone")]
        new_name: Option<String>,
    },

    /// Delete a template
    Delete { name: String },
}

#[derive(Args)]
struct CompletionOptions {
    /// Template to prefix the message with
    #[arg(long)]
    template: Option<String>,

    /// Provider name from providers.toml
    #[arg(long)]
    provider: Option<String>,

    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    temperature: Option<f32>,

    #[arg(long)]
    max_tokens: Option<u32>,
}

impl CompletionOptions {
    fn into_parts(self) -> (Option<String>, CompletionParams) {
        let params = CompletionParams {
            provider: self.provider,
            model: self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        (self.template, params)
    }
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct BodySource {
    /// Template body
    #[arg(long)]
    body: Option<String>,

    /// Read the template body from a file
    #[arg(long, value_name = "PATH")]
    file: Option<PathBuf>,
}

impl BodySource {
    fn read(self) -> anyhow::Result<String> {
        match (self.body, self.file) {
            (Some(body), _) => Ok(body),
            (None, Some(path)) => std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display())),
            (None, None) => anyhow::bail!("one of --body or --file is required"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .init();

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let relay_timeout = Duration::from_secs(cli.relay_timeout);
    let json = cli.json;

    match cli.command {
        Commands::Chat { action } => {
            let ctx = Context::open(&data_dir, relay_timeout)?;
            run_chat(&ctx, action, json).await?;
        }
        Commands::Template { action } => {
            let ctx = Context::open(&data_dir, relay_timeout)?;
            run_template(&ctx, action, json).await?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "parley", &mut std::io::stdout());
        }
    }

    Ok(())
}

async fn run_chat(ctx: &Context, action: ChatAction, json: bool) -> anyhow::Result<()> {
    match action {
        ChatAction::New { content, options } => {
            let (template, params) = options.into_parts();
            let outcome = commands::chat_new(ctx, content, template, params).await?;
            if json {
                output::print_json(&outcome.assistant)?;
            } else {
                output::print_completion(&outcome);
            }
        }
        ChatAction::Continue {
            chat_id,
            content,
            options,
        } => {
            let (template, params) = options.into_parts();
            let outcome = commands::chat_continue(ctx, chat_id, content, template, params).await?;
            if json {
                output::print_json(&outcome.assistant)?;
            } else {
                output::print_completion(&outcome);
            }
        }
        ChatAction::Show { chat_id } => {
            let (chat, messages) = commands::chat_show(ctx, chat_id).await?;
            if json {
                output::print_json(&serde_json::json!({ "chat": chat, "messages": messages }))?;
            } else {
                output::print_chat(&chat, &messages);
            }
        }
        ChatAction::List => {
            let chats = commands::chat_list(ctx).await?;
            if json {
                output::print_json(&chats)?;
            } else {
                output::print_chat_list(&chats);
            }
        }
    }
    Ok(())
}

async fn run_template(ctx: &Context, action: TemplateAction, json: bool) -> anyhow::Result<()> {
    match action {
        TemplateAction::List => {
            let templates = commands::template_list(ctx).await?;
            if json {
                output::print_json(&templates)?;
            } else {
                output::print_template_list(&templates);
            }
        }
        TemplateAction::Show { name } => {
            let template = commands::template_show(ctx, &name).await?;
            if json {
                output::print_json(&template)?;
            } else {
                output::print_template(&template);
            }
        }
        TemplateAction::Upsert { name, body } => {
            let (template, created) = commands::template_upsert(ctx, name, body.read()?).await?;
            if json {
                output::print_json(&template)?;
            } else {
                output::print_template_change(if created { "created" } else { "updated" }, &template);
            }
        }
        TemplateAction::Edit {
            name,
            body,
            clone,
            new_name,
        } => {
            let template = commands::template_edit(ctx, name, body.read()?, clone, new_name).await?;
            if json {
                output::print_json(&template)?;
            } else {
                output::print_template_change(if clone { "cloned" } else { "updated" }, &template);
            }
        }
        TemplateAction::Delete { name } => {
            let template = commands::template_delete(ctx, &name).await?;
            if json {
                output::print_json(&template)?;
            } else {
                output::print_template_change("deleted", &template);
            }
        }
    }
    Ok(())
}
