//! Realtime fan-out of ride events to connected participants
//!
//! ## Model
//!
//! A user may hold several connections at once. Each connection gets a
//! bounded outbound queue; the hub never blocks on a slow consumer, it
//! evicts the connection instead. Rooms group users for scoped delivery
//! and only accept users with a live connection.
//!
//! Mutations (register, unregister, subscribe, evict, broadcast) are
//! serialized through a single hub task. Targeted sends read the
//! registry directly and only queue an eviction when a delivery fails,
//! so a caller never waits behind other connections.

mod messages;
mod registry;

pub use messages::{encode, ride_room, ClientMessage, Notification};

use bytes::Bytes;
use serde::Serialize;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use registry::{Evictions, Registry};

pub type ConnectionId = Uuid;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("notification hub is closed")]
    Closed,
}

/// Hub sizing
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Outbound frames buffered per connection before it is evicted
    pub connection_queue_size: usize,
    /// Pending registry mutations
    pub command_queue_size: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            connection_queue_size: 256,
            command_queue_size: 1024,
        }
    }
}

// ============================================================================
// Connections
// ============================================================================

/// Identifies a registered connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: String,
}

/// Receiving side of a registered connection.
///
/// The queue yields `None` once the hub has dropped the connection.
#[derive(Debug)]
pub struct Connection {
    handle: ConnectionHandle,
    receiver: mpsc::Receiver<Bytes>,
}

impl Connection {
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn id(&self) -> ConnectionId {
        self.handle.id
    }

    pub fn user_id(&self) -> &str {
        &self.handle.user_id
    }

    pub async fn recv(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }

    /// Next queued frame without waiting
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.receiver.try_recv().ok()
    }

    pub fn into_parts(self) -> (ConnectionHandle, mpsc::Receiver<Bytes>) {
        (self.handle, self.receiver)
    }
}

// ============================================================================
// Hub
// ============================================================================

enum HubCommand {
    Register {
        handle: ConnectionHandle,
        sender: mpsc::Sender<Bytes>,
        ack: oneshot::Sender<()>,
    },
    Unregister {
        handle: ConnectionHandle,
        ack: oneshot::Sender<bool>,
    },
    Subscribe {
        user_id: String,
        room_id: String,
        ack: oneshot::Sender<bool>,
    },
    Unsubscribe {
        user_id: String,
        room_id: String,
        ack: oneshot::Sender<bool>,
    },
    Broadcast {
        frame: Bytes,
        ack: oneshot::Sender<usize>,
    },
    Evict(Evictions),
}

/// Cloneable handle to the hub task.
///
/// The task stops and closes every connection once all handles are dropped.
#[derive(Clone)]
pub struct NotificationHub {
    commands: mpsc::Sender<HubCommand>,
    registry: Arc<RwLock<Registry>>,
    config: HubConfig,
}

impl NotificationHub {
    /// Start the hub task. Must be called inside a tokio runtime.
    pub fn spawn(config: HubConfig) -> Self {
        let (commands, rx) = mpsc::channel(config.command_queue_size.max(1));
        let registry = Arc::new(RwLock::new(Registry::default()));
        tokio::spawn(run(rx, registry.clone()));
        Self {
            commands,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Add a connection for `user_id`. It is live once this returns.
    pub async fn register(&self, user_id: &str) -> Result<Connection, HubError> {
        let (sender, receiver) = mpsc::channel(self.config.connection_queue_size.max(1));
        let handle = ConnectionHandle {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
        };
        let (ack, done) = oneshot::channel();
        self.command(HubCommand::Register {
            handle: handle.clone(),
            sender,
            ack,
        })
        .await?;
        done.await.map_err(|_| HubError::Closed)?;
        Ok(Connection { handle, receiver })
    }

    /// Remove a connection. Safe to call more than once; returns whether
    /// this call removed it.
    pub async fn unregister(&self, handle: &ConnectionHandle) -> Result<bool, HubError> {
        let (ack, done) = oneshot::channel();
        self.command(HubCommand::Unregister {
            handle: handle.clone(),
            ack,
        })
        .await?;
        done.await.map_err(|_| HubError::Closed)
    }

    /// Join a room. Returns false when the user has no live connection.
    pub async fn subscribe(&self, user_id: &str, room_id: &str) -> Result<bool, HubError> {
        let (ack, done) = oneshot::channel();
        self.command(HubCommand::Subscribe {
            user_id: user_id.to_string(),
            room_id: room_id.to_string(),
            ack,
        })
        .await?;
        done.await.map_err(|_| HubError::Closed)
    }

    pub async fn unsubscribe(&self, user_id: &str, room_id: &str) -> Result<bool, HubError> {
        let (ack, done) = oneshot::channel();
        self.command(HubCommand::Unsubscribe {
            user_id: user_id.to_string(),
            room_id: room_id.to_string(),
            ack,
        })
        .await?;
        done.await.map_err(|_| HubError::Closed)
    }

    /// Enqueue `msg` on every connection of `user_id`.
    ///
    /// Returns the number of connections that accepted the frame. Zero
    /// means the user is offline or every queue was full.
    pub async fn send_to_user<T: Serialize + ?Sized>(&self, user_id: &str, msg: &T) -> usize {
        let Some(frame) = encode(msg) else {
            return 0;
        };
        self.send_frame_to_user(user_id, frame).await
    }

    pub async fn send_frame_to_user(&self, user_id: &str, frame: Bytes) -> usize {
        let mut evictions = Evictions::new();
        let delivered = self
            .read_registry()
            .deliver_to_user(user_id, &frame, &mut evictions);
        self.evict(evictions).await;
        delivered
    }

    /// Enqueue `msg` for every member of `room_id`
    pub async fn send_to_room<T: Serialize + ?Sized>(&self, room_id: &str, msg: &T) -> usize {
        let Some(frame) = encode(msg) else {
            return 0;
        };
        let mut evictions = Evictions::new();
        let delivered = self
            .read_registry()
            .deliver_to_room(room_id, &frame, &mut evictions);
        self.evict(evictions).await;
        delivered
    }

    /// Enqueue `msg` on every connection. Returns once the hub task has
    /// offered the frame to each queue, with the number that accepted it.
    pub async fn broadcast<T: Serialize + ?Sized>(&self, msg: &T) -> Result<usize, HubError> {
        let Some(frame) = encode(msg) else {
            return Ok(0);
        };
        let (ack, done) = oneshot::channel();
        self.command(HubCommand::Broadcast { frame, ack }).await?;
        done.await.map_err(|_| HubError::Closed)
    }

    pub fn connection_count(&self) -> usize {
        self.read_registry().connection_count()
    }

    pub fn user_count(&self) -> usize {
        self.read_registry().user_count()
    }

    pub fn is_connected(&self, user_id: &str) -> bool {
        self.read_registry().is_connected(user_id)
    }

    pub fn room_members(&self, room_id: &str) -> Vec<String> {
        self.read_registry().room_members(room_id)
    }

    pub fn rooms_of(&self, user_id: &str) -> Vec<String> {
        self.read_registry().rooms_of(user_id)
    }

    async fn command(&self, cmd: HubCommand) -> Result<(), HubError> {
        self.commands.send(cmd).await.map_err(|_| HubError::Closed)
    }

    async fn evict(&self, evictions: Evictions) {
        if evictions.is_empty() {
            return;
        }
        if self.command(HubCommand::Evict(evictions)).await.is_err() {
            debug!("Hub stopped before eviction");
        }
    }

    fn read_registry(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(|e| e.into_inner())
    }
}

fn write_registry(registry: &RwLock<Registry>) -> RwLockWriteGuard<'_, Registry> {
    registry.write().unwrap_or_else(|e| e.into_inner())
}

/// Hub task: applies registry mutations in arrival order
async fn run(mut commands: mpsc::Receiver<HubCommand>, registry: Arc<RwLock<Registry>>) {
    debug!("Notification hub started");

    while let Some(cmd) = commands.recv().await {
        match cmd {
            HubCommand::Register {
                handle,
                sender,
                ack,
            } => {
                write_registry(&registry).insert(&handle.user_id, handle.id, sender);
                debug!(user_id = %handle.user_id, connection_id = %handle.id, "Connection registered");
                let _ = ack.send(());
            }
            HubCommand::Unregister { handle, ack } => {
                let removed = write_registry(&registry).remove(&handle.user_id, handle.id);
                if removed {
                    debug!(user_id = %handle.user_id, connection_id = %handle.id, "Connection unregistered");
                }
                let _ = ack.send(removed);
            }
            HubCommand::Subscribe {
                user_id,
                room_id,
                ack,
            } => {
                let joined = write_registry(&registry).subscribe(&user_id, &room_id);
                if !joined {
                    debug!(user_id = %user_id, room_id = %room_id, "Subscribe refused, user not connected");
                }
                let _ = ack.send(joined);
            }
            HubCommand::Unsubscribe {
                user_id,
                room_id,
                ack,
            } => {
                let left = write_registry(&registry).unsubscribe(&user_id, &room_id);
                let _ = ack.send(left);
            }
            HubCommand::Broadcast { frame, ack } => {
                let mut registry = write_registry(&registry);
                let mut evictions = Evictions::new();
                let delivered = registry.deliver_to_all(&frame, &mut evictions);
                for (user_id, id) in evictions {
                    registry.remove(&user_id, id);
                }
                drop(registry);
                debug!(delivered, "Broadcast delivered");
                let _ = ack.send(delivered);
            }
            HubCommand::Evict(evictions) => {
                let mut registry = write_registry(&registry);
                for (user_id, id) in evictions {
                    if registry.remove(&user_id, id) {
                        warn!(user_id = %user_id, connection_id = %id, "Connection evicted");
                    }
                }
            }
        }
    }

    write_registry(&registry).clear();
    info!("Notification hub stopped");
}
