//! Parley Store
//!
//! SQLite persistence for chats, messages and templates, plus the
//! active-session registry that tells a CLI process which server (if any) is
//! currently bound to the same database.
//!
//! SQLite is not async, so every operation opens its own connection inside
//! `spawn_blocking`, with WAL and a busy timeout so a CLI process and a
//! server process can share the file.

mod active_session;
mod migrations;
mod paths;
mod store;

pub use active_session::ActiveSession;
pub use migrations::run_migrations;
pub use paths::{DataDir, DATA_DIR_ENV};
pub use store::Store;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("migration {version} ({name}) failed: {source}")]
    Migration {
        version: i64,
        name: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("template `{0}` already exists")]
    TemplateExists(String),

    #[error("chat {0} not found")]
    ChatNotFound(i64),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
