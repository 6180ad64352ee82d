//! Receives server envelopes produced by CLI processes and fans them out.
//!
//! The body is an already-encoded server envelope; it is forwarded to every
//! connected client byte for byte, without being decoded. It must be compact
//! UTF-8 JSON on a single line, since outbound frames are joined with `\n`.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use parley_protocol::RELAY_ID_HEADER;
use tracing::{debug, warn};

use crate::hub::Target;
use crate::state::AppState;

pub async fn relay_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let correlation_id = headers
        .get(RELAY_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    if body.is_empty() {
        warn!(
            component = "relay",
            event = "relay.empty_body",
            correlation_id = %correlation_id,
            "Rejected relay with empty body"
        );
        return StatusCode::BAD_REQUEST;
    }

    if let Err(reason) = check_body(&body) {
        warn!(
            component = "relay",
            event = "relay.rejected",
            correlation_id = %correlation_id,
            reason,
            "Rejected relay body"
        );
        return StatusCode::BAD_REQUEST;
    }

    let bytes = body.len();
    match state.hub.broadcast(Target::All, body).await {
        Ok(()) => {
            debug!(
                component = "relay",
                event = "relay.forwarded",
                correlation_id = %correlation_id,
                bytes,
                "Relayed envelope to all clients"
            );
            StatusCode::OK
        }
        Err(e) => {
            warn!(
                component = "relay",
                event = "relay.hub_closed",
                correlation_id = %correlation_id,
                error = %e,
                "Hub stopped, relay not delivered"
            );
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

fn check_body(body: &[u8]) -> Result<(), &'static str> {
    if std::str::from_utf8(body).is_err() {
        return Err("body is not UTF-8");
    }
    if body.iter().any(|b| matches!(b, b'\n' | b'\r')) {
        return Err("body spans more than one line");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use parley_core::Services;
    use parley_provider::{ProviderRegistry, ProviderSettings};
    use parley_store::Store;

    use crate::client::ClientConfig;
    use crate::hub::HubHandle;

    fn state(hub: HubHandle) -> (tempfile::TempDir, Arc<AppState>) {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::open(tmp.path().join("parley.db")).unwrap();
        let providers =
            Arc::new(ProviderRegistry::from_settings(&ProviderSettings::default()).unwrap());
        let services = Services::new(store, providers);
        (tmp, Arc::new(AppState::new(hub, services, ClientConfig::default())))
    }

    fn headers(id: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(RELAY_ID_HEADER, id.parse().unwrap());
        headers
    }

    #[tokio::test]
    async fn forwards_body_verbatim_to_every_client() {
        let (hub, _join) = HubHandle::spawn(8);
        let (tx1, mut rx1) = hub.client_queue();
        let (tx2, mut rx2) = hub.client_queue();
        hub.register(1, tx1).await.unwrap();
        hub.register(2, tx2).await.unwrap();
        let (_tmp, state) = state(hub.clone());

        let body = Bytes::from_static(br#"{"id":"r1","type":"template-deleted","payload":{}}"#);
        let status = relay_handler(State(state), headers("r1"), body.clone()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(rx1.recv().await.unwrap(), body);
        assert_eq!(rx2.recv().await.unwrap(), body);
    }

    #[tokio::test]
    async fn empty_body_is_a_bad_request() {
        let (hub, _join) = HubHandle::spawn(8);
        let (tx, mut rx) = hub.client_queue();
        hub.register(1, tx).await.unwrap();
        let (_tmp, state) = state(hub.clone());

        let status = relay_handler(State(state), headers("r2"), Bytes::new()).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        hub.client_count().await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn multi_line_or_non_utf8_bodies_are_rejected() {
        let (hub, _join) = HubHandle::spawn(8);
        let (tx, mut rx) = hub.client_queue();
        hub.register(1, tx).await.unwrap();
        let (_tmp, state) = state(hub.clone());

        let pretty = Bytes::from_static(b"{\n  \"type\": \"reload\"\n}");
        let status = relay_handler(State(state.clone()), headers("r3"), pretty).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let binary = Bytes::from_static(&[0x7b, 0xff, 0xfe, 0x7d]);
        let status = relay_handler(State(state), headers("r4"), binary).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        hub.client_count().await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stopped_hub_is_unavailable() {
        let (hub, join) = HubHandle::spawn(8);
        join.abort();
        let _ = join.await;
        let (_tmp, state) = state(hub);

        let status = relay_handler(State(state), HeaderMap::new(), Bytes::from_static(b"{}")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
