//! Connected editors and the users behind them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use super::event::SessionEvent;
use crate::domain::locking::LockEvent;
use crate::domain::notification::{Audience, Notification};

/// Outbound event channel of one connection, drained by the transport
pub type ConnectionSink = mpsc::UnboundedSender<LockEvent>;

/// Session errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Username '{0}' already exists")]
    UserExists(String),

    #[error("Unknown connection {0}")]
    UnknownConnection(ConnectionId),

    #[error("Connection {connection} is already logged in as '{user_name}'")]
    AlreadyLoggedIn {
        connection: ConnectionId,
        user_name: String,
    },
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UserExists(_) => "E400",
            Self::UnknownConnection(_) => "E401",
            Self::AlreadyLoggedIn { .. } => "E402",
        }
    }
}

/// Identity of one transport connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user name and where it is connected from
///
/// Survives disconnects until the grace period runs out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Owner {
    pub user_name: String,
    pub connection_id: Option<ConnectionId>,
    pub last_seen: DateTime<Utc>,
}

impl Owner {
    pub fn is_connected(&self) -> bool {
        self.connection_id.is_some()
    }
}

#[derive(Debug)]
struct Connection {
    sink: ConnectionSink,
    user_name: Option<String>,
}

#[derive(Debug, Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, Connection>,
    owners: HashMap<String, Owner>,
}

/// Registry of live connections and known users
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new transport connection, not yet bound to a user
    pub fn add_interface(&self, sink: ConnectionSink) -> ConnectionId {
        let id = ConnectionId::new();
        self.write().connections.insert(
            id,
            Connection {
                sink,
                user_name: None,
            },
        );
        debug!(connection = %id, "Registered new ui");
        id
    }

    /// Bind a user name to a connection
    pub fn login(&self, connection: ConnectionId, user_name: &str) -> Result<SessionEvent, SessionError> {
        let mut state = self.write();

        match state.connections.get(&connection) {
            None => return Err(SessionError::UnknownConnection(connection)),
            Some(Connection {
                user_name: Some(existing),
                ..
            }) => {
                return Err(SessionError::AlreadyLoggedIn {
                    connection,
                    user_name: existing.clone(),
                });
            }
            Some(_) => {}
        }

        let reconnect = match state.owners.get(user_name) {
            Some(owner) if owner.is_connected() => {
                return Err(SessionError::UserExists(user_name.to_string()));
            }
            Some(_) => true,
            None => false,
        };

        state.owners.insert(
            user_name.to_string(),
            Owner {
                user_name: user_name.to_string(),
                connection_id: Some(connection),
                last_seen: Utc::now(),
            },
        );
        if let Some(conn) = state.connections.get_mut(&connection) {
            conn.user_name = Some(user_name.to_string());
        }

        info!(user = %user_name, connection = %connection, reconnect, "User logged in");
        Ok(if reconnect {
            SessionEvent::reconnected(user_name, connection)
        } else {
            SessionEvent::connected(user_name, connection)
        })
    }

    /// Drop a connection; reports a disconnect when a user was bound to it
    pub fn logout(&self, connection: ConnectionId) -> Result<Option<SessionEvent>, SessionError> {
        let mut state = self.write();

        let conn = state
            .connections
            .remove(&connection)
            .ok_or(SessionError::UnknownConnection(connection))?;

        // login may have failed after the socket was registered
        let Some(user_name) = conn.user_name else {
            debug!(connection = %connection, "Unregistered anonymous ui");
            return Ok(None);
        };

        if let Some(owner) = state.owners.get_mut(&user_name) {
            owner.connection_id = None;
            owner.last_seen = Utc::now();
        }

        info!(user = %user_name, connection = %connection, "User disconnected");
        Ok(Some(SessionEvent::disconnected(&user_name)))
    }

    /// Destroy a disconnected user's session
    ///
    /// A user who reconnected in the meantime is kept.
    pub fn forget(&self, user_name: &str) -> bool {
        let mut state = self.write();
        match state.owners.get(user_name) {
            Some(owner) if !owner.is_connected() => {
                state.owners.remove(user_name);
                debug!(user = %user_name, "Session destroyed");
                true
            }
            _ => false,
        }
    }

    pub fn user_name(&self, connection: ConnectionId) -> Option<String> {
        self.read()
            .connections
            .get(&connection)
            .and_then(|c| c.user_name.clone())
    }

    pub fn owner(&self, user_name: &str) -> Option<Owner> {
        self.read().owners.get(user_name).cloned()
    }

    /// Names of users with a live connection
    pub fn user_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .read()
            .owners
            .values()
            .filter(|o| o.is_connected())
            .map(|o| o.user_name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn connection_count(&self) -> usize {
        self.read().connections.len()
    }

    /// Hand a notification to its audience; returns how many sinks took it
    ///
    /// Delivery is best effort: a connection whose receiver is gone is
    /// skipped.
    pub fn deliver(&self, notification: &Notification) -> usize {
        let state = self.read();
        let send = |id: &ConnectionId, conn: &Connection| match conn.sink.send(notification.event.clone()) {
            Ok(()) => true,
            Err(_) => {
                debug!(connection = %id, "Dropping event for closed connection");
                false
            }
        };

        match notification.audience {
            Audience::All => state
                .connections
                .iter()
                .filter(|(id, conn)| send(id, conn))
                .count(),
            Audience::Connection(id) => state
                .connections
                .get(&id)
                .map(|conn| usize::from(send(&id, conn)))
                .unwrap_or(0),
        }
    }
}
