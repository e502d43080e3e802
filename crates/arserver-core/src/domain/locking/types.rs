//! Lock types and error definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for lock operations
pub type LockResult<T> = std::result::Result<T, LockError>;

/// Lock errors
///
/// None of these are fatal to the server; they are reported back to the
/// RPC caller with a human-readable reason.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// Resource is held incompatibly and the retry budget is exhausted
    #[error("Cannot lock '{resource}': {reason}")]
    CannotLock { resource: ResourceId, reason: String },

    /// The graph cache does not know this resource
    #[error("Unknown resource '{0}'")]
    UnknownResource(ResourceId),

    /// Release of a resource the caller does not hold
    #[error("Resource '{resource}' is not locked by '{owner}'")]
    NotLocked { resource: ResourceId, owner: String },

    /// Operation attempted by a non-holder of an exclusive entry
    #[error("Resource '{resource}' is held exclusively by '{holder}', not '{owner}'")]
    InvalidOwner {
        resource: ResourceId,
        owner: String,
        holder: String,
    },

    /// Tree upgrade of a tree lock, or downgrade of a plain lock
    #[error("Nothing to update on lock of '{resource}'")]
    NothingToUpdate { resource: ResourceId },

    /// The lock table guard was found in an inconsistent state
    #[error("Internal lock error: {0}")]
    Internal(String),
}

impl LockError {
    /// Get error code for this lock error
    pub fn code(&self) -> &'static str {
        match self {
            Self::CannotLock { .. } => "E300",
            Self::UnknownResource(_) => "E301",
            Self::NotLocked { .. } => "E302",
            Self::InvalidOwner { .. } => "E303",
            Self::NothingToUpdate { .. } => "E304",
            Self::Internal(_) => "E305",
        }
    }

    /// Whether waiting and trying again may succeed
    pub fn is_contention(&self) -> bool {
        matches!(self, Self::CannotLock { .. })
    }
}

/// Identifier of any lockable node in the scene/project graph
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Distinguished id standing for the whole opened scene
    pub const SCENE: &'static str = "SCENE";
    /// Distinguished id standing for the whole opened project
    pub const PROJECT: &'static str = "PROJECT";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn scene() -> Self {
        Self::new(Self::SCENE)
    }

    pub fn project() -> Self {
        Self::new(Self::PROJECT)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ResourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Lock mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// Single owner, read and write
    Exclusive,
    /// Many owners, read only
    Shared,
}

impl LockMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exclusive => "exclusive",
            Self::Shared => "shared",
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether clients are told about a lock
///
/// Locks requested through the user-facing lock operation are shown grayed
/// out in every editor. Short locks taken around a single mutation are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Ui,
    Internal,
}

/// Tree lock update requested by a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    /// Extend an object lock to its whole tree
    Tree,
    /// Shrink a tree lock back to the object
    Object,
}

/// One row of the lock table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockEntry {
    pub resource_id: ResourceId,
    pub mode: LockMode,
    /// owner -> number of grants held
    pub owners: BTreeMap<String, u32>,
    /// Conflict checks cover ancestors and descendants as well
    pub tree: bool,
    pub acquired_at: DateTime<Utc>,
}

impl LockEntry {
    pub(crate) fn new(resource_id: ResourceId, mode: LockMode, owner: &str, tree: bool) -> Self {
        Self {
            resource_id,
            mode,
            owners: BTreeMap::from([(owner.to_string(), 1)]),
            tree,
            acquired_at: Utc::now(),
        }
    }

    pub fn is_owned_by(&self, owner: &str) -> bool {
        self.owners.contains_key(owner)
    }

    /// How many times `owner` was granted this entry
    pub fn grants(&self, owner: &str) -> u32 {
        self.owners.get(owner).copied().unwrap_or(0)
    }

    /// The single owner of an exclusive entry
    pub fn holder(&self) -> Option<&str> {
        match self.mode {
            LockMode::Exclusive => self.owners.keys().next().map(String::as_str),
            LockMode::Shared => None,
        }
    }
}

/// A request for a lock
///
/// Retries and wait default to the process-wide locking configuration.
#[derive(Debug, Clone)]
pub struct LockRequest {
    pub resource: ResourceId,
    pub owner: String,
    pub mode: LockMode,
    pub tree: bool,
    pub visibility: Visibility,
    pub retries: Option<u32>,
    pub wait: Option<Duration>,
}

impl LockRequest {
    pub fn new(resource: impl Into<ResourceId>, owner: impl Into<String>, mode: LockMode) -> Self {
        Self {
            resource: resource.into(),
            owner: owner.into(),
            mode,
            tree: false,
            visibility: Visibility::Internal,
            retries: None,
            wait: None,
        }
    }

    pub fn exclusive(resource: impl Into<ResourceId>, owner: impl Into<String>) -> Self {
        Self::new(resource, owner, LockMode::Exclusive)
    }

    pub fn shared(resource: impl Into<ResourceId>, owner: impl Into<String>) -> Self {
        Self::new(resource, owner, LockMode::Shared)
    }

    /// Cover the resource's ancestors and descendants
    pub fn tree(mut self) -> Self {
        self.tree = true;
        self
    }

    /// Make the lock visible to every connected editor
    pub fn ui_visible(mut self) -> Self {
        self.visibility = Visibility::Ui;
        self
    }

    /// Number of retries after the first failed attempt
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Wait between attempts
    pub fn wait(mut self, wait: Duration) -> Self {
        self.wait = Some(wait);
        self
    }

    /// Single attempt, no waiting
    pub fn no_retry(self) -> Self {
        self.retries(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_error_codes() {
        let err = LockError::CannotLock {
            resource: "ap_1".into(),
            reason: "held".to_string(),
        };
        assert_eq!(err.code(), "E300");
        assert!(err.is_contention());

        let err = LockError::NotLocked {
            resource: "ap_1".into(),
            owner: "alice".to_string(),
        };
        assert_eq!(err.code(), "E302");
        assert!(!err.is_contention());
    }

    #[test]
    fn test_invalid_owner_message_names_holder() {
        let err = LockError::InvalidOwner {
            resource: "obj_1".into(),
            owner: "bob".to_string(),
            holder: "alice".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Resource 'obj_1' is held exclusively by 'alice', not 'bob'"
        );
    }

    #[test]
    fn test_entry_holder() {
        let entry = LockEntry::new("obj".into(), LockMode::Exclusive, "alice", false);
        assert_eq!(entry.holder(), Some("alice"));
        assert!(entry.is_owned_by("alice"));

        let shared = LockEntry::new("obj".into(), LockMode::Shared, "alice", false);
        assert_eq!(shared.holder(), None);
    }

    #[test]
    fn test_request_builder() {
        let req = LockRequest::exclusive("ap_1", "alice")
            .tree()
            .ui_visible()
            .retries(3)
            .wait(Duration::from_millis(100));

        assert_eq!(req.resource.as_str(), "ap_1");
        assert_eq!(req.mode, LockMode::Exclusive);
        assert!(req.tree);
        assert_eq!(req.visibility, Visibility::Ui);
        assert_eq!(req.retries, Some(3));
        assert_eq!(req.wait, Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_special_ids() {
        assert_eq!(ResourceId::scene().as_str(), "SCENE");
        assert_eq!(ResourceId::project().to_string(), "PROJECT");
    }
}
