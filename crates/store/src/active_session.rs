//! Active-session registry: which server address currently serves a given
//! local database.

use rusqlite::{params, OptionalExtension, Row};
use tracing::info;

use crate::{Store, StoreError};

/// At most one row exists per `database_identity`; the last server to start
/// overwrites the address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSession {
    pub id: i64,
    pub address: String,
    pub database_identity: String,
}

impl Store {
    /// Record `address` as the server bound to `identity` (last writer wins).
    pub async fn register_active_session(
        &self,
        identity: &str,
        address: &str,
    ) -> Result<ActiveSession, StoreError> {
        let identity = identity.to_string();
        let address = address.to_string();
        let session = self
            .with_conn(move |conn| {
                let session = conn.query_row(
                    "INSERT INTO active_sessions (address, database_identity) VALUES (?1, ?2)
                     ON CONFLICT(database_identity) DO UPDATE SET address = excluded.address
                     RETURNING id, address, database_identity",
                    params![address, identity],
                    session_from_row,
                )?;
                Ok(session)
            })
            .await?;

        info!(
            component = "active_session",
            event = "active_session.registered",
            address = %session.address,
            identity = %session.database_identity,
            "Registered active session"
        );
        Ok(session)
    }

    pub async fn lookup_active_session(&self, identity: &str) -> Result<Option<ActiveSession>, StoreError> {
        let identity = identity.to_string();
        self.with_conn(move |conn| {
            let session = conn
                .query_row(
                    "SELECT id, address, database_identity FROM active_sessions
                     WHERE database_identity = ?1",
                    params![identity],
                    session_from_row,
                )
                .optional()?;
            Ok(session)
        })
        .await
    }

    /// Remove `session`. A row that has since been re-registered with a
    /// different address is left alone. Returns whether a row was deleted.
    pub async fn remove_active_session(&self, session: &ActiveSession) -> Result<bool, StoreError> {
        let session = session.clone();
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM active_sessions WHERE id = ?1 AND address = ?2",
                params![session.id, session.address],
            )?;
            Ok(removed > 0)
        })
        .await
    }
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<ActiveSession> {
    Ok(ActiveSession {
        id: row.get(0)?,
        address: row.get(1)?,
        database_identity: row.get(2)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, Store) {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::open(tmp.path().join("parley.db")).unwrap();
        (tmp, store)
    }

    #[tokio::test]
    async fn lookup_without_registration_is_none() {
        let (_tmp, store) = temp_store();
        let found = store.lookup_active_session(store.identity()).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let (_tmp, store) = temp_store();
        let first = store
            .register_active_session(store.identity(), "http://127.0.0.1:4100")
            .await
            .unwrap();
        let second = store
            .register_active_session(store.identity(), "http://127.0.0.1:4200")
            .await
            .unwrap();
        assert_eq!(first.id, second.id);

        let found = store
            .lookup_active_session(store.identity())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.address, "http://127.0.0.1:4200");
    }

    #[tokio::test]
    async fn stale_removal_keeps_newer_registration() {
        let (_tmp, store) = temp_store();
        let stale = store
            .register_active_session(store.identity(), "http://127.0.0.1:4100")
            .await
            .unwrap();
        store
            .register_active_session(store.identity(), "http://127.0.0.1:4200")
            .await
            .unwrap();

        assert!(!store.remove_active_session(&stale).await.unwrap());
        assert!(store
            .lookup_active_session(store.identity())
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn remove_deletes_current_registration() {
        let (_tmp, store) = temp_store();
        let session = store
            .register_active_session(store.identity(), "http://127.0.0.1:4100")
            .await
            .unwrap();
        assert!(store.remove_active_session(&session).await.unwrap());
        assert!(store
            .lookup_active_session(store.identity())
            .await
            .unwrap()
            .is_none());
    }
}
