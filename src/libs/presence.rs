//! Presence tracking and real-time event delivery.
//!
//! The rest of the crate only talks to [`NotificationChannel`]; the in-process
//! [`PresenceRegistry`] maps each online user to exactly one live connection and
//! hands the transport layer an mpsc receiver per connection to drain.

use crate::libs::core::models::{MessageId, UserId};
use crate::libs::storage::records::MessageRecord;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Events pushed to connected clients.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChatEvent {
    NewMessage(MessageRecord),
    #[serde(rename_all = "camelCase")]
    DeleteMessage {
        message_id: MessageId,
    },
    OnlineUsers(Vec<UserId>),
}

impl ChatEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            ChatEvent::NewMessage(_) => "newMessage",
            ChatEvent::DeleteMessage { .. } => "deleteMessage",
            ChatEvent::OnlineUsers(_) => "getOnlineUsers",
        }
    }

    /// The event payload as the transport sends it, without the event name.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Address of one live connection. A user reconnecting gets a new handle.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    pub user_id: UserId,
    pub connection_id: u64,
}

pub trait NotificationChannel: Send + Sync {
    fn address_of(&self, user_id: &UserId) -> Option<ConnectionHandle>;

    /// Fire-and-forget delivery. Undeliverable events are dropped.
    fn emit(&self, handle: &ConnectionHandle, event: ChatEvent);

    /// Emits `event` to the user's connection if they are online.
    fn notify(&self, user_id: &UserId, event: ChatEvent) -> bool {
        match self.address_of(user_id) {
            Some(handle) => {
                self.emit(&handle, event);
                true
            }
            None => {
                debug!(%user_id, event = event.event_name(), "User offline, event dropped");
                false
            }
        }
    }
}

/// What a transport receives when a user connects.
#[derive(Debug)]
pub struct Subscription {
    pub handle: ConnectionHandle,
    pub events: mpsc::UnboundedReceiver<ChatEvent>,
}

struct Connection {
    connection_id: u64,
    sender: mpsc::UnboundedSender<ChatEvent>,
}

#[derive(Default)]
pub struct PresenceRegistry {
    connections: RwLock<HashMap<UserId, Connection>>,
    next_connection_id: AtomicU64,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a live connection for `user_id`, replacing any previous one.
    pub fn connect(&self, user_id: UserId) -> Subscription {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let (sender, events) = mpsc::unbounded_channel();
        let handle = ConnectionHandle {
            user_id: user_id.clone(),
            connection_id,
        };

        {
            let mut connections = self
                .connections
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if connections
                .insert(user_id.clone(), Connection { connection_id, sender })
                .is_some()
            {
                debug!(%user_id, "Replaced previous connection");
            }
        }

        info!(%user_id, connection_id, "User connected");
        self.broadcast_online_users();
        Subscription { handle, events }
    }

    /// Removes the connection if it is still the one registered for its user.
    pub fn disconnect(&self, handle: &ConnectionHandle) -> bool {
        let removed = {
            let mut connections = self
                .connections
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            match connections.get(&handle.user_id) {
                Some(conn) if conn.connection_id == handle.connection_id => {
                    connections.remove(&handle.user_id);
                    true
                }
                _ => false,
            }
        };

        if removed {
            info!(user_id = %handle.user_id, connection_id = handle.connection_id, "User disconnected");
            self.broadcast_online_users();
        }
        removed
    }

    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(user_id)
    }

    pub fn online_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        users.sort();
        users
    }

    fn broadcast_online_users(&self) {
        let event = ChatEvent::OnlineUsers(self.online_users());
        let handles: Vec<ConnectionHandle> = self
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(user_id, conn)| ConnectionHandle {
                user_id: user_id.clone(),
                connection_id: conn.connection_id,
            })
            .collect();

        for handle in handles {
            self.emit(&handle, event.clone());
        }
    }
}

impl NotificationChannel for PresenceRegistry {
    fn address_of(&self, user_id: &UserId) -> Option<ConnectionHandle> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .map(|conn| ConnectionHandle {
                user_id: user_id.clone(),
                connection_id: conn.connection_id,
            })
    }

    fn emit(&self, handle: &ConnectionHandle, event: ChatEvent) {
        let delivered = {
            let connections = self
                .connections
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            match connections.get(&handle.user_id) {
                Some(conn) if conn.connection_id == handle.connection_id => {
                    conn.sender.send(event).is_ok()
                }
                _ => {
                    debug!(user_id = %handle.user_id, "Connection gone, event dropped");
                    return;
                }
            }
        };

        if !delivered {
            // Receiver was dropped without a disconnect; prune the stale entry.
            debug!(user_id = %handle.user_id, "Connection closed, event dropped");
            self.disconnect(handle);
        }
    }
}
