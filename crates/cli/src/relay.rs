//! Tells a running server about changes this process made, so the server
//! can forward them to connected browsers.
//!
//! Delivery is best effort: one POST per event, no retries. A peer that
//! cannot be reached is forgotten, and the command that produced the event
//! succeeds regardless.

use std::time::Duration;

use async_trait::async_trait;
use parley_core::EventSink;
use parley_protocol::{new_id, Envelope, ServerMessage, RELAY_ID_HEADER, RELAY_PATH};
use parley_store::{ActiveSession, Store};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_RELAY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to build relay client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("peer {address} unreachable: {source}")]
    Unreachable {
        address: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("peer {address} answered {status}")]
    Rejected { address: String, status: u16 },
}

/// What happened to one relayed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// No server is registered for this database.
    NoPeer,
    Delivered,
    /// Delivery failed and the registration was removed.
    PeerRemoved,
}

#[derive(Clone)]
pub struct RelayNotifier {
    store: Store,
    http: reqwest::Client,
}

impl RelayNotifier {
    pub fn new(store: Store, timeout: Duration) -> Result<Self, RelayError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(RelayError::Client)?;
        Ok(Self { store, http })
    }

    /// Forward `encoded` to the server registered for `store_identity`.
    pub async fn notify_peer(&self, store_identity: &str, correlation_id: &str, encoded: String) -> RelayOutcome {
        let peer = match self.store.lookup_active_session(store_identity).await {
            Ok(Some(peer)) => peer,
            Ok(None) => {
                debug!(
                    component = "relay",
                    event = "relay.no_peer",
                    correlation_id,
                    "No active server, skipping relay"
                );
                return RelayOutcome::NoPeer;
            }
            Err(e) => {
                warn!(
                    component = "relay",
                    event = "relay.lookup_failed",
                    correlation_id,
                    error = %e,
                    "Active session lookup failed, skipping relay"
                );
                return RelayOutcome::NoPeer;
            }
        };

        match self.deliver(&peer, correlation_id, encoded).await {
            Ok(()) => {
                debug!(
                    component = "relay",
                    event = "relay.delivered",
                    correlation_id,
                    address = %peer.address,
                    "Relayed event"
                );
                RelayOutcome::Delivered
            }
            Err(e) => {
                info!(
                    component = "relay",
                    event = "relay.peer_unreachable",
                    correlation_id,
                    address = %peer.address,
                    error = %e,
                    "Relay failed, removing active session"
                );
                if let Err(e) = self.store.remove_active_session(&peer).await {
                    warn!(
                        component = "relay",
                        event = "relay.remove_failed",
                        address = %peer.address,
                        error = %e,
                        "Failed to remove stale active session"
                    );
                }
                RelayOutcome::PeerRemoved
            }
        }
    }

    async fn deliver(&self, peer: &ActiveSession, correlation_id: &str, encoded: String) -> Result<(), RelayError> {
        let url = format!("{}{}", peer.address.trim_end_matches('/'), RELAY_PATH);
        let response = self
            .http
            .post(&url)
            .header(RELAY_ID_HEADER, correlation_id)
            .body(encoded)
            .send()
            .await
            .map_err(|source| RelayError::Unreachable {
                address: peer.address.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Rejected {
                address: peer.address.clone(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    /// An event sink that relays every event under a fresh correlation id.
    pub fn sink(&self) -> RelaySink {
        RelaySink {
            notifier: self.clone(),
            identity: self.store.identity().to_string(),
        }
    }
}

pub struct RelaySink {
    notifier: RelayNotifier,
    identity: String,
}

#[async_trait]
impl EventSink for RelaySink {
    async fn emit(&self, event: ServerMessage) {
        let envelope = Envelope::new(new_id(), event);
        let encoded = match envelope.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(
                    component = "relay",
                    event = "relay.encode_failed",
                    correlation_id = %envelope.id,
                    error = %e,
                    "Failed to encode event"
                );
                return;
            }
        };
        self.notifier
            .notify_peer(&self.identity, &envelope.id, encoded)
            .await;
    }
}
