//! Chat, message and template queries.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use parley_protocol::{Chat, Message, Role, Template};

use crate::migrations::run_migrations;
use crate::StoreError;

/// Handle to one SQLite database (cheap to Clone).
#[derive(Debug, Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    db_path: PathBuf,
    identity: String,
}

impl Store {
    /// Open (creating if needed) the database at `db_path` and apply pending
    /// migrations.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut conn = open_connection(db_path)?;
        run_migrations(&mut conn)?;

        let canonical = std::fs::canonicalize(db_path)?;
        let identity = canonical.display().to_string();
        debug!(
            component = "store",
            event = "store.opened",
            identity = %identity,
            "Store opened"
        );

        Ok(Self {
            inner: Arc::new(StoreInner {
                db_path: canonical,
                identity,
            }),
        })
    }

    /// Name of the local data store, used as the active-session key.
    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    pub fn db_path(&self) -> &Path {
        &self.inner.db_path
    }

    /// Run `f` against a fresh connection on the blocking pool.
    pub(crate) async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let db_path = self.inner.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = open_connection(&db_path)?;
            f(&mut conn)
        })
        .await?
    }

    /// Create a chat together with its first message.
    pub async fn create_chat(&self, title: String, first: Message) -> Result<(Chat, Message), StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let now = Utc::now();
            let chat = tx.query_row(
                "INSERT INTO chats (title, created_at) VALUES (?1, ?2)
                 RETURNING id, title, created_at",
                params![title, now],
                chat_from_row,
            )?;
            let message = insert_message(&tx, chat.id, &first, now)?;
            tx.commit()?;
            Ok((chat, message))
        })
        .await
    }

    pub async fn chat(&self, chat_id: i64) -> Result<Option<Chat>, StoreError> {
        self.with_conn(move |conn| {
            let chat = conn
                .query_row(
                    "SELECT id, title, created_at FROM chats WHERE id = ?1",
                    params![chat_id],
                    chat_from_row,
                )
                .optional()?;
            Ok(chat)
        })
        .await
    }

    /// All chats, newest first.
    pub async fn chats(&self) -> Result<Vec<Chat>, StoreError> {
        self.with_conn(|conn| {
            let chats = conn
                .prepare("SELECT id, title, created_at FROM chats ORDER BY id DESC")?
                .query_map([], chat_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(chats)
        })
        .await
    }

    /// Messages of a chat in conversation order.
    pub async fn messages(&self, chat_id: i64) -> Result<Vec<Message>, StoreError> {
        self.with_conn(move |conn| {
            let messages = conn
                .prepare(
                    "SELECT id, chat_id, role, content, provider, model, created_at
                     FROM messages
                     WHERE chat_id = ?1
                     ORDER BY sequence",
                )?
                .query_map(params![chat_id], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(messages)
        })
        .await
    }

    /// Persist `drafts` at the end of a chat in one transaction. Store-assigned
    /// fields on the drafts are ignored.
    pub async fn append_messages(&self, chat_id: i64, drafts: Vec<Message>) -> Result<Vec<Message>, StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let exists: Option<i64> = tx
                .query_row("SELECT id FROM chats WHERE id = ?1", params![chat_id], |row| {
                    row.get(0)
                })
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::ChatNotFound(chat_id));
            }

            let now = Utc::now();
            let mut persisted = Vec::with_capacity(drafts.len());
            for draft in &drafts {
                persisted.push(insert_message(&tx, chat_id, draft, now)?);
            }
            tx.commit()?;
            Ok(persisted)
        })
        .await
    }

    /// All templates ordered by name.
    pub async fn templates(&self) -> Result<Vec<Template>, StoreError> {
        self.with_conn(|conn| {
            let templates = conn
                .prepare(
                    "SELECT id, name, body, created_at, updated_at FROM templates ORDER BY name",
                )?
                .query_map([], template_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(templates)
        })
        .await
    }

    pub async fn template(&self, name: &str) -> Result<Option<Template>, StoreError> {
        let name = name.to_string();
        self.with_conn(move |conn| select_template(conn, &name)).await
    }

    /// Insert a new template; fails if the name is taken.
    pub async fn create_template(&self, name: String, body: String) -> Result<Template, StoreError> {
        self.with_conn(move |conn| {
            if select_template(conn, &name)?.is_some() {
                return Err(StoreError::TemplateExists(name));
            }
            let now = Utc::now();
            let template = conn.query_row(
                "INSERT INTO templates (name, body, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)
                 RETURNING id, name, body, created_at, updated_at",
                params![name, body, now],
                template_from_row,
            )?;
            Ok(template)
        })
        .await
    }

    /// Replace the body of an existing template. `None` if it does not exist.
    pub async fn update_template(&self, name: String, body: String) -> Result<Option<Template>, StoreError> {
        self.with_conn(move |conn| {
            let template = conn
                .query_row(
                    "UPDATE templates SET body = ?2, updated_at = ?3 WHERE name = ?1
                     RETURNING id, name, body, created_at, updated_at",
                    params![name, body, Utc::now()],
                    template_from_row,
                )
                .optional()?;
            Ok(template)
        })
        .await
    }

    /// Create or update a template. The flag is `true` when it was created.
    pub async fn upsert_template(&self, name: String, body: String) -> Result<(Template, bool), StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let existed = select_template(&tx, &name)?.is_some();
            let now = Utc::now();
            let template = tx.query_row(
                "INSERT INTO templates (name, body, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(name) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at
                 RETURNING id, name, body, created_at, updated_at",
                params![name, body, now],
                template_from_row,
            )?;
            tx.commit()?;
            Ok((template, !existed))
        })
        .await
    }

    /// Delete a template, returning the removed record.
    pub async fn delete_template(&self, name: &str) -> Result<Option<Template>, StoreError> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let template = conn
                .query_row(
                    "DELETE FROM templates WHERE name = ?1
                     RETURNING id, name, body, created_at, updated_at",
                    params![name],
                    template_from_row,
                )
                .optional()?;
            Ok(template)
        })
        .await
    }
}

fn open_connection(db_path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;",
    )?;
    Ok(conn)
}

fn insert_message(
    conn: &Connection,
    chat_id: i64,
    draft: &Message,
    now: DateTime<Utc>,
) -> Result<Message, rusqlite::Error> {
    let seq: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sequence), -1) + 1 FROM messages WHERE chat_id = ?1",
        params![chat_id],
        |row| row.get(0),
    )?;
    conn.query_row(
        "INSERT INTO messages (chat_id, sequence, role, content, provider, model, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         RETURNING id, chat_id, role, content, provider, model, created_at",
        params![
            chat_id,
            seq,
            draft.role.as_str(),
            draft.content,
            draft.provider,
            draft.model,
            now
        ],
        message_from_row,
    )
}

fn select_template(conn: &Connection, name: &str) -> Result<Option<Template>, StoreError> {
    let template = conn
        .query_row(
            "SELECT id, name, body, created_at, updated_at FROM templates WHERE name = ?1",
            params![name],
            template_from_row,
        )
        .optional()?;
    Ok(template)
}

fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<Chat> {
    Ok(Chat {
        id: row.get(0)?,
        title: row.get(1)?,
        created_at: row.get(2)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let role: String = row.get(2)?;
    let role = Role::parse(&role).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown role `{role}`").into(),
        )
    })?;
    Ok(Message {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        role,
        content: row.get(3)?,
        provider: row.get(4)?,
        model: row.get(5)?,
        created_at: Some(row.get(6)?),
    })
}

fn template_from_row(row: &Row<'_>) -> rusqlite::Result<Template> {
    Ok(Template {
        id: row.get(0)?,
        name: row.get(1)?,
        body: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}
