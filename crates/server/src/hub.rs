//! Hub — the single owner of the set of connected browser clients.
//!
//! All membership changes and every fan-out decision go through one control
//! loop running on its own task. Callers hold a cheap `HubHandle` and talk to
//! the loop over an mpsc channel, so the membership map needs no lock: a
//! client present when a broadcast is processed gets the frame, a client
//! registered later never sees it.

use std::collections::HashMap;

use bytes::Bytes;
use parley_protocol::{Envelope, ServerMessage};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Identity of one websocket connection.
pub type ClientId = u64;

/// One encoded server envelope.
pub type Frame = Bytes;

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
const CONTROL_CAPACITY: usize = 1024;

/// Who receives a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Single(ClientId),
    All,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("hub is no longer running")]
pub struct HubClosed;

enum HubCommand {
    Register {
        client: ClientId,
        queue: mpsc::Sender<Frame>,
    },
    Unregister {
        client: ClientId,
    },
    Broadcast {
        target: Target,
        frame: Frame,
    },
    ClientCount {
        reply: oneshot::Sender<usize>,
    },
}

/// Handle to the running hub (cheap to Clone).
#[derive(Clone)]
pub struct HubHandle {
    command_tx: mpsc::Sender<HubCommand>,
    queue_capacity: usize,
}

impl HubHandle {
    /// Spawn the hub control loop. The loop ends once every handle is dropped.
    pub fn spawn(queue_capacity: usize) -> (HubHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(CONTROL_CAPACITY);
        let hub = Hub {
            clients: HashMap::new(),
            command_rx,
        };
        let join = tokio::spawn(hub.run());
        (
            HubHandle {
                command_tx,
                queue_capacity: queue_capacity.max(1),
            },
            join,
        )
    }

    /// A fresh bounded outbound queue for one client. The sender goes to
    /// `register`; the receiver belongs to the client's outbound pump.
    pub fn client_queue(&self) -> (mpsc::Sender<Frame>, mpsc::Receiver<Frame>) {
        mpsc::channel(self.queue_capacity)
    }

    /// Add a client. Each `ClientId` must be registered at most once.
    pub async fn register(&self, client: ClientId, queue: mpsc::Sender<Frame>) -> Result<(), HubClosed> {
        self.command(HubCommand::Register { client, queue }).await
    }

    /// Remove a client and close its queue. Unknown clients are ignored.
    pub async fn unregister(&self, client: ClientId) {
        if self
            .command(HubCommand::Unregister { client })
            .await
            .is_err()
        {
            debug!(
                component = "hub",
                event = "hub.unregister.closed",
                client_id = client,
                "Hub already stopped"
            );
        }
    }

    /// Queue a pre-encoded frame for fan-out.
    pub async fn broadcast(&self, target: Target, frame: Frame) -> Result<(), HubClosed> {
        self.command(HubCommand::Broadcast { target, frame }).await
    }

    /// Encode `envelope` and queue it for fan-out.
    pub async fn send(&self, target: Target, envelope: &Envelope<ServerMessage>) -> Result<(), HubClosed> {
        let json = match envelope.encode() {
            Ok(json) => json,
            Err(e) => {
                error!(
                    component = "hub",
                    event = "hub.encode_failed",
                    correlation_id = %envelope.id,
                    error = %e,
                    "Failed to encode server message"
                );
                return Ok(());
            }
        };
        self.broadcast(target, Bytes::from(json)).await
    }

    pub async fn client_count(&self) -> Result<usize, HubClosed> {
        let (reply, rx) = oneshot::channel();
        self.command(HubCommand::ClientCount { reply }).await?;
        rx.await.map_err(|_| HubClosed)
    }

    async fn command(&self, cmd: HubCommand) -> Result<(), HubClosed> {
        self.command_tx.send(cmd).await.map_err(|_| HubClosed)
    }
}

struct Hub {
    clients: HashMap<ClientId, mpsc::Sender<Frame>>,
    command_rx: mpsc::Receiver<HubCommand>,
}

impl Hub {
    async fn run(mut self) {
        info!(component = "hub", event = "hub.started", "Hub started");
        while let Some(cmd) = self.command_rx.recv().await {
            self.handle(cmd);
        }
        info!(
            component = "hub",
            event = "hub.stopped",
            clients = self.clients.len(),
            "Hub stopped"
        );
    }

    fn handle(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register { client, queue } => {
                if self.clients.insert(client, queue).is_some() {
                    warn!(
                        component = "hub",
                        event = "hub.register.duplicate",
                        client_id = client,
                        "Client registered twice, replacing queue"
                    );
                }
                debug!(
                    component = "hub",
                    event = "hub.client.registered",
                    client_id = client,
                    clients = self.clients.len(),
                    "Client registered"
                );
            }

            HubCommand::Unregister { client } => {
                // Dropping the hub's sender closes the queue and ends the
                // client's outbound pump.
                if self.clients.remove(&client).is_some() {
                    debug!(
                        component = "hub",
                        event = "hub.client.unregistered",
                        client_id = client,
                        clients = self.clients.len(),
                        "Client unregistered"
                    );
                }
            }

            HubCommand::Broadcast {
                target: Target::Single(client),
                frame,
            } => {
                let delivered = match self.clients.get(&client) {
                    Some(queue) => deliver(client, queue, frame),
                    None => {
                        debug!(
                            component = "hub",
                            event = "hub.single.dropped",
                            client_id = client,
                            "Target client not registered, dropping frame"
                        );
                        Delivery::Sent
                    }
                };
                if delivered == Delivery::Closed {
                    self.clients.remove(&client);
                }
            }

            HubCommand::Broadcast {
                target: Target::All,
                frame,
            } => {
                let closed: Vec<ClientId> = self
                    .clients
                    .iter()
                    .filter(|(client, queue)| deliver(**client, queue, frame.clone()) == Delivery::Closed)
                    .map(|(client, _)| *client)
                    .collect();
                for client in closed {
                    self.clients.remove(&client);
                }
            }

            HubCommand::ClientCount { reply } => {
                let _ = reply.send(self.clients.len());
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Delivery {
    Sent,
    Dropped,
    Closed,
}

/// Non-blocking enqueue. A full queue drops the frame being enqueued for
/// that client only; frames already queued are kept.
fn deliver(client: ClientId, queue: &mpsc::Sender<Frame>, frame: Frame) -> Delivery {
    match queue.try_send(frame) {
        Ok(()) => Delivery::Sent,
        Err(mpsc::error::TrySendError::Full(frame)) => {
            warn!(
                component = "hub",
                event = "hub.queue.full",
                client_id = client,
                frame_bytes = frame.len(),
                "Client queue full, dropping newest frame"
            );
            Delivery::Dropped
        }
        Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
    }
}
