//! Lock events sent to connected editors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::ResourceId;

/// Type of lock event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockEventKind {
    /// A resource became locked
    Locked,
    /// A resource became free
    Unlocked,
}

impl LockEventKind {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Locked => "locked",
            Self::Unlocked => "unlocked",
        }
    }
}

impl std::fmt::Display for LockEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A lock event concerning one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockEvent {
    /// Unique event identifier
    pub id: Uuid,
    /// The locked or unlocked resource
    pub resource_id: ResourceId,
    /// User owning the lock
    pub user_name: String,
    /// Type of event
    pub kind: LockEventKind,
    /// When the event was committed
    pub created_at: DateTime<Utc>,
}

impl LockEvent {
    /// Create a new lock event
    pub fn new(resource_id: ResourceId, user_name: &str, kind: LockEventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            resource_id,
            user_name: user_name.to_string(),
            kind,
            created_at: Utc::now(),
        }
    }

    /// Create a locked event
    pub fn locked(resource_id: ResourceId, user_name: &str) -> Self {
        Self::new(resource_id, user_name, LockEventKind::Locked)
    }

    /// Create an unlocked event
    pub fn unlocked(resource_id: ResourceId, user_name: &str) -> Self {
        Self::new(resource_id, user_name, LockEventKind::Unlocked)
    }

    /// JSON payload as handed to the transport layer
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "event": self.kind.as_str(),
            "resource_id": self.resource_id,
            "user_name": self.user_name,
        })
    }
}
