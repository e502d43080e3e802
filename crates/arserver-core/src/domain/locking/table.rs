//! The lock table
//!
//! Single source of truth for who holds what. The state is only reachable
//! through [`LockTable::with`] and [`LockTable::read`], whose closures are
//! synchronous: a critical section cannot contain an `.await`, so no task
//! can suspend while the guard is held.
//!
//! A mutating section is all or nothing. If it panics, the table is put
//! back the way it was before the section started and the caller gets
//! [`LockError::Internal`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Mutex, MutexGuard};
use tracing::error;

use super::types::{LockEntry, LockError, LockMode, LockResult, ResourceId};

/// Lock table guarded by one mutex
#[derive(Debug, Default)]
pub struct LockTable {
    state: Mutex<TableState>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            // only read-only sections can poison the guard; mutating ones
            // catch their own panics and roll back
            error!("Lock table guard poisoned by a panicking read; recovering");
            self.state.clear_poison();
            poisoned.into_inner()
        })
    }

    /// Run a mutating critical section against the table
    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut TableState) -> R) -> LockResult<R> {
        let mut state = self.guard();
        let before = state.clone();

        match catch_unwind(AssertUnwindSafe(|| f(&mut state))) {
            Ok(result) => Ok(result),
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!(
                    reason = %reason,
                    entries = before.len(),
                    "Lock table critical section panicked; changes rolled back"
                );
                *state = before;
                Err(LockError::Internal(format!(
                    "lock table operation aborted: {}",
                    reason
                )))
            }
        }
    }

    /// Run a read-only critical section against the table
    pub(crate) fn read<R>(&self, f: impl FnOnce(&TableState) -> R) -> R {
        f(&self.guard())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Contents of the lock table
#[derive(Debug, Default, Clone)]
pub(crate) struct TableState {
    entries: HashMap<ResourceId, LockEntry>,
    /// user -> lock root -> resources shown as locked in editors
    ui_locks: HashMap<String, BTreeMap<ResourceId, BTreeSet<ResourceId>>>,
}

impl TableState {
    pub fn entry(&self, resource: &ResourceId) -> Option<&LockEntry> {
        self.entries.get(resource)
    }

    pub fn entry_mut(&mut self, resource: &ResourceId) -> Option<&mut LockEntry> {
        self.entries.get_mut(resource)
    }

    pub fn entries(&self) -> impl Iterator<Item = &LockEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Add a grant for an owner, creating the entry on first acquire
    ///
    /// Callers have already checked compatibility. A shared entry counts
    /// every grant, so an owner holding it twice must release it twice.
    pub fn grant(&mut self, resource: &ResourceId, mode: LockMode, owner: &str, tree: bool) {
        match self.entries.get_mut(resource) {
            Some(entry) => {
                debug_assert_eq!(entry.mode, LockMode::Shared);
                *entry.owners.entry(owner.to_string()).or_insert(0) += 1;
            }
            None => {
                self.entries.insert(
                    resource.clone(),
                    LockEntry::new(resource.clone(), mode, owner, tree),
                );
            }
        }
    }

    /// Give back one grant; the owner leaves with its last grant and the
    /// entry disappears with its last owner
    ///
    /// Returns the entry as it was before, or `None` when the owner was not
    /// part of it.
    pub fn revoke(&mut self, resource: &ResourceId, owner: &str) -> Option<LockEntry> {
        let entry = self.entries.get_mut(resource)?;
        let before = entry.clone();
        let grants = entry.owners.get_mut(owner)?;
        *grants -= 1;
        if *grants == 0 {
            entry.owners.remove(owner);
        }
        if entry.owners.is_empty() {
            self.entries.remove(resource);
        }
        Some(before)
    }

    /// Drop every grant the owner has on a resource
    pub fn revoke_all(&mut self, resource: &ResourceId, owner: &str) -> Option<LockEntry> {
        let entry = self.entries.get_mut(resource)?;
        let before = entry.clone();
        entry.owners.remove(owner)?;
        if entry.owners.is_empty() {
            self.entries.remove(resource);
        }
        Some(before)
    }

    /// Resources the owner participates in
    pub fn owned_by(&self, owner: &str) -> Vec<ResourceId> {
        let mut owned: Vec<ResourceId> = self
            .entries
            .values()
            .filter(|e| e.is_owned_by(owner))
            .map(|e| e.resource_id.clone())
            .collect();
        owned.sort();
        owned
    }

    pub fn exclusive_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.mode == LockMode::Exclusive)
            .count()
    }

    // ========== UI lock index ==========

    pub fn set_ui_coverage(&mut self, owner: &str, root: &ResourceId, covered: BTreeSet<ResourceId>) {
        self.ui_locks
            .entry(owner.to_string())
            .or_default()
            .insert(root.clone(), covered);
    }

    pub fn ui_coverage(&self, owner: &str, root: &ResourceId) -> Option<&BTreeSet<ResourceId>> {
        self.ui_locks.get(owner).and_then(|roots| roots.get(root))
    }

    pub fn take_ui_coverage(&mut self, owner: &str, root: &ResourceId) -> Option<BTreeSet<ResourceId>> {
        let roots = self.ui_locks.get_mut(owner)?;
        let covered = roots.remove(root);
        if roots.is_empty() {
            self.ui_locks.remove(owner);
        }
        covered
    }

    pub fn take_all_ui_coverage(&mut self, owner: &str) -> BTreeSet<ResourceId> {
        self.ui_locks
            .remove(owner)
            .map(|roots| roots.into_values().flatten().collect())
            .unwrap_or_default()
    }

    /// user -> every resource shown as locked
    pub fn ui_locks(&self) -> BTreeMap<String, BTreeSet<ResourceId>> {
        self.ui_locks
            .iter()
            .map(|(user, roots)| (user.clone(), roots.values().flatten().cloned().collect()))
            .collect()
    }

    pub fn has_ui_locks(&self) -> bool {
        !self.ui_locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_and_revoke_removes_empty_entry() {
        let table = LockTable::new();
        let res = ResourceId::from("obj_1");

        table
            .with(|state| {
                state.grant(&res, LockMode::Shared, "alice", false);
                state.grant(&res, LockMode::Shared, "bob", false);
                assert_eq!(state.entry(&res).unwrap().owners.len(), 2);

                assert!(state.revoke(&res, "alice").is_some());
                assert!(state.entry(&res).is_some());

                assert!(state.revoke(&res, "bob").is_some());
                assert!(state.entry(&res).is_none());
                assert_eq!(state.len(), 0);
            })
            .unwrap();
    }

    #[test]
    fn test_repeated_shared_grants_are_counted() {
        let table = LockTable::new();
        let res = ResourceId::from("scene_1");

        table
            .with(|state| {
                state.grant(&res, LockMode::Shared, "alice", false);
                state.grant(&res, LockMode::Shared, "alice", false);
                assert_eq!(state.entry(&res).unwrap().grants("alice"), 2);

                assert!(state.revoke(&res, "alice").is_some());
                assert_eq!(state.entry(&res).unwrap().grants("alice"), 1);

                assert!(state.revoke(&res, "alice").is_some());
                assert!(state.entry(&res).is_none());
            })
            .unwrap();
    }

    #[test]
    fn test_revoke_all_drops_every_grant() {
        let table = LockTable::new();
        let res = ResourceId::from("scene_1");

        table
            .with(|state| {
                state.grant(&res, LockMode::Shared, "alice", false);
                state.grant(&res, LockMode::Shared, "alice", false);
                state.grant(&res, LockMode::Shared, "bob", false);

                assert!(state.revoke_all(&res, "alice").is_some());
                assert!(!state.entry(&res).unwrap().is_owned_by("alice"));
                assert!(state.revoke_all(&res, "alice").is_none());

                assert!(state.revoke_all(&res, "bob").is_some());
                assert_eq!(state.len(), 0);
            })
            .unwrap();
    }

    #[test]
    fn test_revoke_unknown_owner_is_noop() {
        let table = LockTable::new();
        let res = ResourceId::from("obj_1");

        table
            .with(|state| {
                state.grant(&res, LockMode::Exclusive, "alice", false);
                assert!(state.revoke(&res, "bob").is_none());
                assert!(state.revoke(&"other".into(), "alice").is_none());
                assert_eq!(state.entry(&res).unwrap().holder(), Some("alice"));
            })
            .unwrap();
    }

    #[test]
    fn test_ui_coverage_index() {
        let table = LockTable::new();
        let root = ResourceId::from("ap_1");

        table
            .with(|state| {
                state.set_ui_coverage(
                    "alice",
                    &root,
                    BTreeSet::from([root.clone(), "action_1".into()]),
                );
                assert!(state.has_ui_locks());
                assert_eq!(state.ui_locks()["alice"].len(), 2);

                let covered = state.take_ui_coverage("alice", &root).unwrap();
                assert_eq!(covered.len(), 2);
                assert!(!state.has_ui_locks());
            })
            .unwrap();
    }

    #[test]
    fn test_panicking_section_is_rolled_back() {
        let table = LockTable::new();
        let kept = ResourceId::from("obj_1");
        let half_done = ResourceId::from("obj_2");

        table
            .with(|state| state.grant(&kept, LockMode::Shared, "bob", false))
            .unwrap();

        let err = table
            .with(|state| {
                state.grant(&half_done, LockMode::Exclusive, "alice", false);
                state.revoke(&kept, "bob");
                panic!("boom");
            })
            .unwrap_err();
        assert_eq!(err, LockError::Internal("lock table operation aborted: boom".to_string()));

        // nothing from the aborted section survives and the table stays usable
        table.read(|state| {
            assert!(state.entry(&half_done).is_none());
            assert!(state.entry(&kept).unwrap().is_owned_by("bob"));
            assert_eq!(state.len(), 1);
        });
        assert!(table.with(|state| state.revoke(&kept, "bob")).unwrap().is_some());
    }

    #[test]
    fn test_panicking_read_does_not_wedge_table() {
        let table = std::sync::Arc::new(LockTable::new());
        let res = ResourceId::from("obj_1");
        table
            .with(|state| state.grant(&res, LockMode::Exclusive, "alice", false))
            .unwrap();

        let cloned = table.clone();
        // the assertion fails while the guard is held
        let _ = std::thread::spawn(move || cloned.read(|state| assert_eq!(state.len(), 0))).join();

        let holder = table.read(|state| state.entry(&res).and_then(|e| e.holder().map(String::from)));
        assert_eq!(holder.as_deref(), Some("alice"));
    }
}
