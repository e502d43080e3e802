//! Lock handles
//!
//! [`ScopedLock`] releases its lock when dropped, so an error, a panic or a
//! cancelled task can never leave the lock behind. [`LockHandle`] is the
//! keep-alive form: the lock outlives the scope that acquired it and the
//! owner is responsible for releasing it explicitly.

use std::fmt;
use std::ops::Deref;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use super::manager::LockManager;
use super::types::{LockMode, LockRequest, ResourceId, Visibility};

/// A granted lock that stays held until released
#[must_use = "a dropped handle keeps its lock; release it or wrap it in a ScopedLock"]
#[derive(Debug)]
pub struct LockHandle {
    id: Uuid,
    resource: ResourceId,
    owner: String,
    mode: LockMode,
    tree: bool,
    visibility: Visibility,
    acquired_at: Instant,
    modified: bool,
    released: bool,
}

impl LockHandle {
    pub(crate) fn new(request: &LockRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            resource: request.resource.clone(),
            owner: request.owner.clone(),
            mode: request.mode,
            tree: request.tree,
            visibility: request.visibility,
            acquired_at: Instant::now(),
            modified: false,
            released: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn resource(&self) -> &ResourceId {
        &self.resource
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn is_tree(&self) -> bool {
        self.tree
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// Record that the holder changed the resource
    ///
    /// Releasing a modified exclusive lock invalidates the resource in the
    /// graph cache.
    pub fn mark_modified(&mut self) {
        self.modified = true;
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Give up the handle without releasing the lock
    ///
    /// Used for editor locks, whose lifetime is tracked by the lock table
    /// and ended by an explicit unlock or by reclamation.
    pub fn detach(mut self) {
        self.released = true;
        debug!(resource = %self.resource, owner = %self.owner, "Lock handle detached");
    }

    pub(crate) fn mark_released(&mut self) {
        self.released = true;
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                resource = %self.resource,
                owner = %self.owner,
                held_ms = self.held_for().as_millis() as u64,
                "Lock handle dropped without release; lock stays held"
            );
        }
    }
}

impl fmt::Display for LockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tree = if self.tree { "+tree" } else { "" };
        write!(f, "Lock[{}:{}{}:{}]", self.mode, self.resource, tree, self.owner)
    }
}

/// A lock released when it goes out of scope
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ScopedLock {
    handle: Option<LockHandle>,
    manager: LockManager,
}

impl ScopedLock {
    pub(crate) fn new(handle: LockHandle, manager: LockManager) -> Self {
        Self {
            handle: Some(handle),
            manager,
        }
    }

    pub fn mark_modified(&mut self) {
        if let Some(handle) = self.handle.as_mut() {
            handle.mark_modified();
        }
    }

    /// Release now instead of at the end of the scope
    pub fn release(mut self) -> super::types::LockResult<()> {
        match self.handle.take() {
            Some(handle) => self.manager.release(handle),
            None => Ok(()),
        }
    }

    /// Turn into a keep-alive handle; the caller takes over the release
    pub fn keep_alive(mut self) -> Option<LockHandle> {
        self.handle.take()
    }
}

impl Deref for ScopedLock {
    type Target = LockHandle;

    fn deref(&self) -> &LockHandle {
        // only empty after release() or keep_alive(), both of which consume self
        self.handle
            .as_ref()
            .unwrap_or_else(|| unreachable!("scoped lock used after release"))
    }
}

impl Drop for ScopedLock {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let resource = handle.resource().clone();
            if let Err(e) = self.manager.release(handle) {
                // reclamation may have taken the lock away already
                debug!(resource = %resource, error = %e, "Scoped lock was already gone");
            }
        }
    }
}
