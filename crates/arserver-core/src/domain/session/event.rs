//! Session lifecycle events
//!
//! Emitted by the session registry and consumed by the auto-unlock
//! supervisor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::registry::ConnectionId;

/// Type of session event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventType {
    /// First login of a user name
    Connected,
    /// Login of a user name still inside its grace period
    Reconnected,
    /// The user's connection went away
    Disconnected,
}

impl SessionEventType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Reconnected => "reconnected",
            Self::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for SessionEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A change in a user's connection state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub user_name: String,
    /// The new connection, `None` for disconnects
    pub connection_id: Option<ConnectionId>,
    pub event_type: SessionEventType,
    pub created_at: DateTime<Utc>,
}

impl SessionEvent {
    fn new(user_name: &str, connection_id: Option<ConnectionId>, event_type: SessionEventType) -> Self {
        Self {
            user_name: user_name.to_string(),
            connection_id,
            event_type,
            created_at: Utc::now(),
        }
    }

    pub fn connected(user_name: &str, connection_id: ConnectionId) -> Self {
        Self::new(user_name, Some(connection_id), SessionEventType::Connected)
    }

    pub fn reconnected(user_name: &str, connection_id: ConnectionId) -> Self {
        Self::new(user_name, Some(connection_id), SessionEventType::Reconnected)
    }

    pub fn disconnected(user_name: &str) -> Self {
        Self::new(user_name, None, SessionEventType::Disconnected)
    }
}
