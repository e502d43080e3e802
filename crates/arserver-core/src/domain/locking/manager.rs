//! Lock manager for coordinating resource locks
//!
//! The lock manager is the only component allowed to mutate the lock table.
//! It handles:
//! - Exclusive and shared locks, optionally covering a whole subtree
//! - Retried acquisition with a configurable budget
//! - Editor-visible locks and their `Locked`/`Unlocked` notifications
//! - Reclamation of everything a user holds
//!
//! Every mutation is a synchronous critical section inside
//! [`LockTable::with`]. Graph lookups happen before the section starts and
//! backoff sleeps happen between sections, never inside one.

use std::collections::{BTreeMap, BTreeSet};
use std::future::{Future, ready};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::event::LockEvent;
use super::guard::{LockHandle, ScopedLock};
use super::registry::{ConflictReason, ResourceRegistry, ResourceScope};
use super::retry::{RetryError, RetryPolicy, retry_if};
use super::table::{LockTable, TableState};
use super::types::{
    LockEntry, LockError, LockMode, LockRequest, LockResult, ResourceId, UpdateKind, Visibility,
};
use crate::config::LockingConfig;
use crate::domain::graph::GraphCache;
use crate::domain::notification::NotificationSender;
use crate::domain::session::ConnectionId;

/// Lock manager for coordinating resource locks
///
/// Cheap to clone; clones share the same table.
#[derive(Debug, Clone)]
pub struct LockManager {
    config: LockingConfig,
    table: Arc<LockTable>,
    registry: ResourceRegistry,
    notifier: NotificationSender,
}

impl LockManager {
    pub fn new(config: LockingConfig, graph: Arc<dyn GraphCache>, notifier: NotificationSender) -> Self {
        Self {
            config,
            table: Arc::new(LockTable::new()),
            registry: ResourceRegistry::new(graph),
            notifier,
        }
    }

    pub fn config(&self) -> &LockingConfig {
        &self.config
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    fn policy_for(&self, request: &LockRequest) -> RetryPolicy {
        let mut policy = self.config.retry_policy();
        if let Some(retries) = request.retries {
            policy.retries = retries;
        }
        if let Some(wait) = request.wait {
            policy.wait = wait;
        }
        policy
    }

    // ========== Acquisition ==========

    /// Acquire a lock, retrying while the resource is contended
    ///
    /// The returned handle keeps the lock until it is passed to
    /// [`release`](Self::release).
    pub async fn acquire(&self, request: LockRequest) -> LockResult<LockHandle> {
        let scope = self.registry.resolve(&request.resource).await?;
        self.acquire_resolved(&request, &scope, |_| None).await
    }

    /// Single attempt, no waiting
    pub async fn try_acquire(&self, request: LockRequest) -> LockResult<LockHandle> {
        self.acquire(request.no_retry()).await
    }

    /// Acquire a lock released when the returned guard is dropped
    pub async fn scoped_acquire(&self, request: LockRequest) -> LockResult<ScopedLock> {
        let handle = self.acquire(request).await?;
        Ok(ScopedLock::new(handle, self.clone()))
    }

    /// Acquire a lock that outlives the calling scope
    ///
    /// For background work started by a request that returns before the
    /// work is done. The caller must release the handle when the work ends,
    /// whatever the outcome.
    pub async fn keep_alive_acquire(&self, request: LockRequest) -> LockResult<LockHandle> {
        self.acquire(request).await
    }

    /// Run `f` while holding a scoped lock
    ///
    /// The lock is free again once this returns, whether `f` succeeded,
    /// failed or the calling task was cancelled.
    pub async fn with_lock<T, E, F, Fut>(&self, request: LockRequest, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        let _lock = self.scoped_acquire(request).await?;
        f().await
    }

    async fn acquire_resolved(
        &self,
        request: &LockRequest,
        scope: &ResourceScope,
        precheck: impl Fn(&TableState) -> Option<ConflictReason>,
    ) -> LockResult<LockHandle> {
        let policy = self.policy_for(request);
        let start = Instant::now();

        let outcome = retry_if(
            &policy,
            || ready(self.try_grant(request, scope, &precheck)),
            LockError::is_contention,
        )
        .await;

        match outcome {
            Ok(granted) => {
                if granted.was_delayed() && waited_long(granted.attempts, policy.retries) {
                    warn!(
                        resource = %request.resource,
                        owner = %request.owner,
                        attempts = granted.attempts,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Lock acquired after a long wait"
                    );
                }
                debug!(
                    resource = %request.resource,
                    owner = %request.owner,
                    mode = %request.mode,
                    tree = request.tree,
                    attempts = granted.attempts,
                    "Lock acquired"
                );
                Ok(granted.value)
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                warn!(
                    resource = %request.resource,
                    owner = %request.owner,
                    attempts,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    error = %last,
                    "Locking failed"
                );
                Err(last)
            }
            Err(RetryError::Permanent { error, .. }) => Err(error),
        }
    }

    fn try_grant(
        &self,
        request: &LockRequest,
        scope: &ResourceScope,
        precheck: &impl Fn(&TableState) -> Option<ConflictReason>,
    ) -> LockResult<LockHandle> {
        self.table.with(|state| {
            let conflict = precheck(state).or_else(|| {
                ResourceRegistry::conflicts(state, scope, request.mode, request.tree)
            });
            if let Some(reason) = conflict {
                return Err(reason.into_error(&request.resource));
            }

            state.grant(&request.resource, request.mode, &request.owner, request.tree);

            if request.visibility == Visibility::Ui {
                let covered = if request.tree {
                    scope.tree_coverage()
                } else {
                    BTreeSet::from([request.resource.clone()])
                };
                for id in &covered {
                    self.notifier.broadcast(LockEvent::locked(id.clone(), &request.owner));
                }
                state.set_ui_coverage(&request.owner, &request.resource, covered);
            }

            Ok(LockHandle::new(request))
        })?
    }

    // ========== Release ==========

    /// Release a held lock
    ///
    /// A modified exclusive lock invalidates the resource in the graph cache
    /// once the lock is free.
    pub fn release(&self, mut handle: LockHandle) -> LockResult<()> {
        handle.mark_released();
        self.release_entry(handle.resource(), handle.owner())?;

        if handle.mode() == LockMode::Exclusive && handle.is_modified() {
            self.registry.graph().invalidate(handle.resource());
        }
        Ok(())
    }

    /// Release an editor lock by resource and user
    pub fn unlock(&self, resource: &ResourceId, owner: &str) -> LockResult<()> {
        self.release_entry(resource, owner).map(|_| ())
    }

    fn release_entry(&self, resource: &ResourceId, owner: &str) -> LockResult<LockEntry> {
        let released = self.table.with(|state| {
            let not_locked = || LockError::NotLocked {
                resource: resource.clone(),
                owner: owner.to_string(),
            };

            let entry = state.entry(resource).ok_or_else(not_locked)?;
            if !entry.is_owned_by(owner) {
                return Err(match entry.holder() {
                    Some(holder) => LockError::InvalidOwner {
                        resource: resource.clone(),
                        owner: owner.to_string(),
                        holder: holder.to_string(),
                    },
                    None => not_locked(),
                });
            }

            let before = state.revoke(resource, owner).ok_or_else(not_locked)?;
            let still_owned = state.entry(resource).is_some_and(|e| e.is_owned_by(owner));
            if !still_owned {
                for id in state.take_ui_coverage(owner, resource).unwrap_or_default() {
                    self.notifier.broadcast(LockEvent::unlocked(id, owner));
                }
            }
            Ok(before)
        })??;

        debug!(resource = %resource, owner = %owner, mode = %released.mode, "Lock released");
        Ok(released)
    }

    /// Release every lock a user participates in
    ///
    /// Each editor-visible resource is announced as unlocked exactly once.
    /// Shared entries granted to the user several times are dropped in full.
    pub fn release_all_owned_by(&self, owner: &str) -> LockResult<usize> {
        let (released, announced) = self.table.with(|state| {
            let owned = state.owned_by(owner);
            for resource in &owned {
                state.revoke_all(resource, owner);
            }
            let covered = state.take_all_ui_coverage(owner);
            for id in &covered {
                self.notifier.broadcast(LockEvent::unlocked(id.clone(), owner));
            }
            (owned.len(), covered.len())
        })?;

        if released > 0 {
            warn!(
                user = %owner,
                released,
                announced,
                "{} lock(s) of user {} were just discarded",
                released,
                owner
            );
        }
        Ok(released)
    }

    // ========== Editor locks ==========

    /// Lock an object (or its whole tree) on behalf of an editor
    ///
    /// Makes a single attempt. Asking again for a lock the user already
    /// holds succeeds without a second entry or notification.
    pub async fn lock(&self, resource: impl Into<ResourceId>, owner: &str, tree: bool) -> LockResult<()> {
        let resource = resource.into();

        let already_held = self.table.read(|state| {
            state.entry(&resource).is_some_and(|entry| {
                entry.mode == LockMode::Exclusive && entry.is_owned_by(owner) && (entry.tree || !tree)
            })
        });
        if already_held {
            warn!(
                resource = %resource,
                user = %owner,
                "User attempted to re-acquire a held lock; treating as success"
            );
            return Ok(());
        }

        let mut request = LockRequest::exclusive(resource, owner).ui_visible().no_retry();
        if tree {
            request = request.tree();
        }
        self.acquire(request).await?.detach();
        Ok(())
    }

    /// Extend an editor lock to its tree, or shrink it back to the object
    pub async fn update_lock(&self, resource: &ResourceId, owner: &str, kind: UpdateKind) -> LockResult<()> {
        let scope = self.registry.resolve(resource).await?;

        self.table.with(|state| {
            let (mode, owned, holder, tree) = match state.entry(resource) {
                Some(entry) => (
                    entry.mode,
                    entry.is_owned_by(owner),
                    entry.holder().map(str::to_string),
                    entry.tree,
                ),
                None => {
                    return Err(LockError::NotLocked {
                        resource: resource.clone(),
                        owner: owner.to_string(),
                    });
                }
            };

            if mode != LockMode::Exclusive || !owned {
                return Err(match holder {
                    Some(holder) if holder != owner => LockError::InvalidOwner {
                        resource: resource.clone(),
                        owner: owner.to_string(),
                        holder,
                    },
                    _ => LockError::NotLocked {
                        resource: resource.clone(),
                        owner: owner.to_string(),
                    },
                });
            }

            match kind {
                UpdateKind::Tree => {
                    if tree {
                        return Err(LockError::NothingToUpdate {
                            resource: resource.clone(),
                        });
                    }
                    if let Some(blocking) = scope.related().find(|r| state.entry(r).is_some()) {
                        return Err(ConflictReason::TreeNotFree {
                            resource: resource.clone(),
                            blocking: blocking.clone(),
                        }
                        .into_error(resource));
                    }
                    set_tree(state, resource, true);

                    if let Some(previous) = state.ui_coverage(owner, resource).cloned() {
                        let covered = scope.tree_coverage();
                        for id in covered.difference(&previous) {
                            self.notifier.broadcast(LockEvent::locked(id.clone(), owner));
                        }
                        state.set_ui_coverage(owner, resource, covered);
                    }
                }
                UpdateKind::Object => {
                    if !tree {
                        return Err(LockError::NothingToUpdate {
                            resource: resource.clone(),
                        });
                    }
                    set_tree(state, resource, false);

                    if let Some(previous) = state.ui_coverage(owner, resource).cloned() {
                        let covered = BTreeSet::from([resource.clone()]);
                        for id in previous.difference(&covered) {
                            self.notifier.broadcast(LockEvent::unlocked(id.clone(), owner));
                        }
                        state.set_ui_coverage(owner, resource, covered);
                    }
                }
            }

            debug!(resource = %resource, owner = %owner, ?kind, "Lock updated");
            Ok(())
        })?
    }

    /// Exclusive tree lock on a root, refused while anything else is locked
    pub async fn lock_all(&self, root: impl Into<ResourceId>, owner: &str) -> LockResult<ScopedLock> {
        let request = LockRequest::exclusive(root, owner).tree();
        let scope = self.registry.resolve(&request.resource).await?;

        let handle = self
            .acquire_resolved(&request, &scope, |state| {
                (state.has_ui_locks() || state.exclusive_count() > 0)
                    .then_some(ConflictReason::SomethingLocked)
            })
            .await?;

        info!(root = %request.resource, owner = %owner, "Whole structure locked");
        Ok(ScopedLock::new(handle, self.clone()))
    }

    /// Tell a freshly logged-in connection what is currently locked
    ///
    /// Sends other users' editor locks and the user's own exclusive locks to
    /// that connection only. Returns the number of events queued.
    pub fn replay_to(&self, connection: ConnectionId, user_name: &str) -> usize {
        self.table.read(|state| {
            let mut sent = 0;

            for (other, resources) in state.ui_locks() {
                if other == user_name {
                    continue;
                }
                for id in resources {
                    self.notifier.send_to(connection, LockEvent::locked(id, &other));
                    sent += 1;
                }
            }

            for entry in state.entries() {
                if entry.mode == LockMode::Exclusive && entry.is_owned_by(user_name) {
                    self.notifier
                        .send_to(connection, LockEvent::locked(entry.resource_id.clone(), user_name));
                    sent += 1;
                }
            }

            sent
        })
    }

    // ========== Inspection ==========

    pub fn entry(&self, resource: &ResourceId) -> Option<LockEntry> {
        self.table.read(|state| state.entry(resource).cloned())
    }

    /// Whether `owner` holds `resource` in `mode`
    pub fn is_locked(&self, resource: &ResourceId, owner: &str, mode: LockMode) -> bool {
        self.table.read(|state| {
            state
                .entry(resource)
                .is_some_and(|e| e.mode == mode && e.is_owned_by(owner))
        })
    }

    /// The exclusive holder of a resource
    pub fn holder(&self, resource: &ResourceId) -> Option<String> {
        self.table
            .read(|state| state.entry(resource).and_then(|e| e.holder().map(str::to_string)))
    }

    /// Every entry the user participates in
    pub fn owner_locks(&self, owner: &str) -> Vec<LockEntry> {
        self.table.read(|state| {
            state
                .owned_by(owner)
                .iter()
                .filter_map(|r| state.entry(r).cloned())
                .collect()
        })
    }

    /// Copy of the whole table, sorted by resource
    pub fn snapshot(&self) -> Vec<LockEntry> {
        let mut entries: Vec<LockEntry> = self.table.read(|state| state.entries().cloned().collect());
        entries.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        entries
    }

    /// user -> resources shown as locked in editors
    pub fn ui_locks(&self) -> BTreeMap<String, BTreeSet<ResourceId>> {
        self.table.read(|state| state.ui_locks())
    }

    pub fn entry_count(&self) -> usize {
        self.table.read(|state| state.len())
    }

    pub fn write_lock_count(&self) -> usize {
        self.table.read(|state| state.exclusive_count())
    }
}

/// More than a quarter of the retry budget was spent waiting
fn waited_long(attempts: u32, retries: u32) -> bool {
    attempts.saturating_sub(1).saturating_mul(4) > retries
}

fn set_tree(state: &mut TableState, resource: &ResourceId, tree: bool) {
    if let Some(entry) = state.entry_mut(resource) {
        entry.tree = tree;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::InMemoryGraph;
    use crate::domain::locking::LockEventKind;
    use crate::domain::notification::{Notification, NotificationReceiver, notification_channel};
    use std::time::Duration;

    fn graph() -> Arc<InMemoryGraph> {
        let graph = InMemoryGraph::with_roots();
        graph.insert("ap_1", Some(ResourceId::project()));
        graph.insert("action_1", Some("ap_1".into()));
        graph.insert("ap_2", Some(ResourceId::project()));
        graph.insert("obj_1", Some(ResourceId::scene()));
        Arc::new(graph)
    }

    fn manager() -> (LockManager, NotificationReceiver) {
        let (sender, receiver) = notification_channel();
        let config = LockingConfig::default().with_retries(2).with_retry_wait(0.01);
        (LockManager::new(config, graph(), sender), receiver)
    }

    fn drain(rx: &mut NotificationReceiver) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = rx.try_recv() {
            out.push(n);
        }
        out
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let (locks, mut rx) = manager();

        let handle = locks.acquire(LockRequest::exclusive("ap_1", "alice")).await.unwrap();
        assert!(locks.is_locked(&"ap_1".into(), "alice", LockMode::Exclusive));
        assert_eq!(locks.holder(&"ap_1".into()).as_deref(), Some("alice"));

        locks.release(handle).unwrap();
        assert_eq!(locks.entry_count(), 0);
        // internal locks are not announced
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_resource_is_not_retried() {
        let (locks, _rx) = manager();
        let err = locks.acquire(LockRequest::exclusive("ghost", "alice")).await.unwrap_err();
        assert_eq!(err, LockError::UnknownResource("ghost".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_contention_exhausts_retries() {
        let (locks, _rx) = manager();
        let held = locks.acquire(LockRequest::exclusive("ap_1", "alice")).await.unwrap();

        let err = locks
            .acquire(LockRequest::exclusive("ap_1", "bob").retries(3).wait(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::CannotLock { .. }));
        assert!(err.to_string().contains("held exclusively by user alice"));

        locks.release(held).unwrap();
        let handle = locks.try_acquire(LockRequest::exclusive("ap_1", "bob")).await.unwrap();
        locks.release(handle).unwrap();
    }

    #[tokio::test]
    async fn test_release_validation() {
        let (locks, _rx) = manager();
        let handle = locks.acquire(LockRequest::exclusive("ap_1", "alice")).await.unwrap();

        assert!(matches!(
            locks.unlock(&"ap_1".into(), "bob"),
            Err(LockError::InvalidOwner { .. })
        ));
        assert!(matches!(
            locks.unlock(&"ap_2".into(), "bob"),
            Err(LockError::NotLocked { .. })
        ));
        assert_eq!(locks.entry_count(), 1);
        locks.release(handle).unwrap();
    }

    #[tokio::test]
    async fn test_ui_lock_is_idempotent_and_announced() {
        let (locks, mut rx) = manager();

        locks.lock("ap_1", "alice", false).await.unwrap();
        locks.lock("ap_1", "alice", false).await.unwrap();
        assert_eq!(locks.entry_count(), 1);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.kind, LockEventKind::Locked);

        locks.unlock(&"ap_1".into(), "alice").unwrap();
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.kind, LockEventKind::Unlocked);
        assert!(locks.ui_locks().is_empty());
    }

    #[tokio::test]
    async fn test_tree_upgrade_and_downgrade() {
        let (locks, mut rx) = manager();
        let ap = ResourceId::from("ap_1");

        locks.lock(ap.clone(), "alice", false).await.unwrap();
        drain(&mut rx);

        locks.update_lock(&ap, "alice", UpdateKind::Tree).await.unwrap();
        let locked: BTreeSet<_> = drain(&mut rx).into_iter().map(|n| n.event.resource_id).collect();
        assert_eq!(locked, BTreeSet::from(["action_1".into(), ResourceId::project()]));
        assert!(locks.entry(&ap).unwrap().tree);

        assert_eq!(
            locks.update_lock(&ap, "alice", UpdateKind::Tree).await.unwrap_err(),
            LockError::NothingToUpdate { resource: ap.clone() }
        );

        locks.update_lock(&ap, "alice", UpdateKind::Object).await.unwrap();
        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|n| n.event.kind == LockEventKind::Unlocked));
        assert!(!locks.entry(&ap).unwrap().tree);
    }

    #[tokio::test]
    async fn test_tree_upgrade_blocked_by_related_lock() {
        let (locks, _rx) = manager();
        locks.lock("ap_1", "alice", false).await.unwrap();
        let child = locks.acquire(LockRequest::shared("action_1", "bob")).await.unwrap();

        let err = locks.update_lock(&"ap_1".into(), "alice", UpdateKind::Tree).await.unwrap_err();
        assert!(matches!(err, LockError::CannotLock { .. }));

        locks.release(child).unwrap();
    }

    #[tokio::test]
    async fn test_lock_all_refused_while_objects_locked() {
        let (locks, _rx) = manager();
        locks.lock("obj_1", "alice", false).await.unwrap();

        let err = locks.lock_all(ResourceId::scene(), "bob").await.unwrap_err();
        assert!(err.to_string().contains("there are locked objects"));

        locks.unlock(&"obj_1".into(), "alice").unwrap();
        let all = locks.lock_all(ResourceId::scene(), "bob").await.unwrap();
        assert_eq!(locks.write_lock_count(), 1);
        drop(all);
        assert_eq!(locks.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_release_all_announces_each_resource_once() {
        let (locks, mut rx) = manager();
        locks.lock("ap_1", "alice", true).await.unwrap();
        let shared = locks.acquire(LockRequest::shared("obj_1", "alice")).await.unwrap();
        shared.detach();
        drain(&mut rx);

        assert_eq!(locks.release_all_owned_by("alice").unwrap(), 2);
        let events = drain(&mut rx);
        // ap_1, its child and its parent
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|n| n.event.kind == LockEventKind::Unlocked));
        assert_eq!(locks.entry_count(), 0);
        assert_eq!(locks.release_all_owned_by("alice").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_repeated_shared_grants_released_together_on_reclaim() {
        let (locks, _rx) = manager();
        let first = locks.acquire(LockRequest::shared("obj_1", "alice")).await.unwrap();
        let second = locks.acquire(LockRequest::shared("obj_1", "alice")).await.unwrap();
        assert_eq!(locks.entry(&"obj_1".into()).unwrap().grants("alice"), 2);

        assert_eq!(locks.release_all_owned_by("alice").unwrap(), 1);
        assert_eq!(locks.entry_count(), 0);

        // both handles were taken away by the reclamation
        assert!(matches!(locks.release(first), Err(LockError::NotLocked { .. })));
        assert!(matches!(locks.release(second), Err(LockError::NotLocked { .. })));
    }

    #[tokio::test]
    async fn test_replay_to_new_connection() {
        let (locks, mut rx) = manager();
        locks.lock("ap_1", "alice", false).await.unwrap();
        locks.lock("obj_1", "bob", false).await.unwrap();
        drain(&mut rx);

        let conn = ConnectionId::new();
        assert_eq!(locks.replay_to(conn, "bob"), 2);

        let events = drain(&mut rx);
        assert!(events.iter().all(|n| n.audience == crate::domain::notification::Audience::Connection(conn)));
        let users: BTreeSet<_> = events.iter().map(|n| n.event.user_name.as_str()).collect();
        assert_eq!(users, BTreeSet::from(["alice", "bob"]));
    }

    #[tokio::test]
    async fn test_modified_release_invalidates_cache() {
        let (sender, _rx) = notification_channel();
        let graph = graph();
        let locks = LockManager::new(LockingConfig::default(), graph.clone(), sender);

        let mut handle = locks.acquire(LockRequest::exclusive("ap_1", "alice")).await.unwrap();
        handle.mark_modified();
        locks.release(handle).unwrap();
        assert_eq!(graph.invalidation_count(), 1);

        let handle = locks.acquire(LockRequest::exclusive("ap_1", "alice")).await.unwrap();
        locks.release(handle).unwrap();
        assert_eq!(graph.invalidation_count(), 1);
    }

    #[test]
    fn test_waited_long_threshold() {
        assert!(!waited_long(1, 13));
        assert!(!waited_long(4, 13));
        assert!(waited_long(5, 13));
        // request-level budgets near u32::MAX must not overflow
        assert!(!waited_long(u32::MAX / 2, u32::MAX));
        assert!(waited_long(u32::MAX, u32::MAX - 1));
        assert!(!waited_long(0, 0));
    }

    #[tokio::test]
    async fn test_with_lock_releases_on_error() {
        let (locks, _rx) = manager();

        let result: Result<(), LockError> = locks
            .with_lock(LockRequest::exclusive("ap_1", "alice"), || async {
                Err(LockError::Internal("boom".into()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(locks.entry_count(), 0);
    }
}
