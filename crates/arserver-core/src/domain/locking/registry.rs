//! Resource registry: where a resource sits in the graph and what it
//! conflicts with
//!
//! Resolution talks to the graph cache and may suspend, so it happens before
//! the table guard is taken. The conflict check itself is a pure function of
//! the table state and the resolved scope and runs inside the guard.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use super::table::TableState;
use super::types::{LockError, LockMode, LockResult, ResourceId};
use crate::domain::graph::GraphCache;

/// A resource together with its tree relations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceScope {
    pub resource: ResourceId,
    pub ancestors: Vec<ResourceId>,
    pub descendants: Vec<ResourceId>,
}

impl ResourceScope {
    /// A resource with no known relations
    pub fn isolated(resource: ResourceId) -> Self {
        Self {
            resource,
            ancestors: Vec::new(),
            descendants: Vec::new(),
        }
    }

    /// Ancestors followed by descendants
    pub fn related(&self) -> impl Iterator<Item = &ResourceId> {
        self.ancestors.iter().chain(self.descendants.iter())
    }

    /// The resource and everything a tree lock on it covers
    pub fn tree_coverage(&self) -> BTreeSet<ResourceId> {
        std::iter::once(&self.resource)
            .chain(self.related())
            .cloned()
            .collect()
    }
}

/// Why a lock request cannot be granted right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    HeldExclusively { resource: ResourceId, holder: String },
    HeldShared { resource: ResourceId, owners: usize },
    InLockedTree { resource: ResourceId, root: ResourceId, holder: String },
    TreeNotFree { resource: ResourceId, blocking: ResourceId },
    /// Whole-graph lock requested while anything is locked
    SomethingLocked,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HeldExclusively { resource, holder } => {
                write!(f, "resource {} is held exclusively by user {}", resource, holder)
            }
            Self::HeldShared { resource, owners } => {
                write!(f, "resource {} is shared by {} owner(s)", resource, owners)
            }
            Self::InLockedTree {
                resource,
                root,
                holder,
            } => write!(
                f,
                "resource {} is part of a tree locked at {} by user {}",
                resource, root, holder
            ),
            Self::TreeNotFree { resource, blocking } => write!(
                f,
                "part of the tree of {} is locked ({})",
                resource, blocking
            ),
            Self::SomethingLocked => write!(f, "there are locked objects"),
        }
    }
}

impl ConflictReason {
    pub fn into_error(self, resource: &ResourceId) -> LockError {
        LockError::CannotLock {
            resource: resource.clone(),
            reason: self.to_string(),
        }
    }
}

/// Query surface over the graph cache and the lock table
#[derive(Clone)]
pub struct ResourceRegistry {
    graph: Arc<dyn GraphCache>,
}

impl fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRegistry").finish_non_exhaustive()
    }
}

impl ResourceRegistry {
    pub fn new(graph: Arc<dyn GraphCache>) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &Arc<dyn GraphCache> {
        &self.graph
    }

    /// Look the resource up in the graph cache
    pub async fn resolve(&self, resource: &ResourceId) -> LockResult<ResourceScope> {
        if !self.graph.resource_exists(resource).await {
            return Err(LockError::UnknownResource(resource.clone()));
        }

        Ok(ResourceScope {
            resource: resource.clone(),
            ancestors: self.graph.ancestors(resource).await,
            descendants: self.graph.descendants(resource).await,
        })
    }

    /// Whether granting `mode` (optionally as a tree lock) on the scope
    /// would violate mutual exclusion
    pub(crate) fn conflicts(
        state: &TableState,
        scope: &ResourceScope,
        mode: LockMode,
        tree: bool,
    ) -> Option<ConflictReason> {
        let resource = &scope.resource;

        if let Some(entry) = state.entry(resource) {
            match (entry.mode, mode) {
                (LockMode::Exclusive, _) => {
                    return Some(ConflictReason::HeldExclusively {
                        resource: resource.clone(),
                        holder: entry.holder().unwrap_or_default().to_string(),
                    });
                }
                (LockMode::Shared, LockMode::Exclusive) => {
                    return Some(ConflictReason::HeldShared {
                        resource: resource.clone(),
                        owners: entry.owners.len(),
                    });
                }
                (LockMode::Shared, LockMode::Shared) if tree || entry.tree => {
                    return Some(ConflictReason::HeldShared {
                        resource: resource.clone(),
                        owners: entry.owners.len(),
                    });
                }
                (LockMode::Shared, LockMode::Shared) => {}
            }
        }

        for related in scope.related() {
            let Some(entry) = state.entry(related) else {
                continue;
            };

            if entry.tree {
                return Some(ConflictReason::InLockedTree {
                    resource: resource.clone(),
                    root: related.clone(),
                    holder: entry
                        .owners
                        .keys()
                        .next()
                        .cloned()
                        .unwrap_or_default(),
                });
            }

            if tree {
                return Some(ConflictReason::TreeNotFree {
                    resource: resource.clone(),
                    blocking: related.clone(),
                });
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::InMemoryGraph;

    fn scope(resource: &str, ancestors: &[&str], descendants: &[&str]) -> ResourceScope {
        ResourceScope {
            resource: resource.into(),
            ancestors: ancestors.iter().map(|a| ResourceId::from(*a)).collect(),
            descendants: descendants.iter().map(|d| ResourceId::from(*d)).collect(),
        }
    }

    #[test]
    fn test_free_resource_has_no_conflict() {
        let state = TableState::default();
        let s = scope("ap_1", &["PROJECT"], &["action_1"]);
        assert!(ResourceRegistry::conflicts(&state, &s, LockMode::Exclusive, true).is_none());
    }

    #[test]
    fn test_exclusive_blocks_everything() {
        let mut state = TableState::default();
        state.grant(&"ap_1".into(), LockMode::Exclusive, "alice", false);
        let s = ResourceScope::isolated("ap_1".into());

        let reason = ResourceRegistry::conflicts(&state, &s, LockMode::Shared, false).unwrap();
        assert_eq!(
            reason.to_string(),
            "resource ap_1 is held exclusively by user alice"
        );
        assert!(ResourceRegistry::conflicts(&state, &s, LockMode::Exclusive, false).is_some());
    }

    #[test]
    fn test_shared_compatibility() {
        let mut state = TableState::default();
        state.grant(&"scene_1".into(), LockMode::Shared, "alice", false);
        let s = ResourceScope::isolated("scene_1".into());

        assert!(ResourceRegistry::conflicts(&state, &s, LockMode::Shared, false).is_none());
        assert!(matches!(
            ResourceRegistry::conflicts(&state, &s, LockMode::Exclusive, false),
            Some(ConflictReason::HeldShared { owners: 1, .. })
        ));
    }

    #[test]
    fn test_tree_lock_covers_relatives() {
        let mut state = TableState::default();
        state.grant(&"ap_1".into(), LockMode::Exclusive, "alice", true);

        // descendant of a tree-locked action point
        let child = scope("action_1", &["ap_1", "PROJECT"], &[]);
        assert!(matches!(
            ResourceRegistry::conflicts(&state, &child, LockMode::Shared, false),
            Some(ConflictReason::InLockedTree { .. })
        ));

        // ancestor of a tree-locked action point
        let parent = scope("PROJECT", &[], &["ap_1", "action_1"]);
        assert!(ResourceRegistry::conflicts(&state, &parent, LockMode::Exclusive, false).is_some());

        // unrelated sibling
        let sibling = scope("ap_2", &["PROJECT"], &[]);
        assert!(ResourceRegistry::conflicts(&state, &sibling, LockMode::Exclusive, false).is_none());
    }

    #[test]
    fn test_tree_request_needs_free_tree() {
        let mut state = TableState::default();
        state.grant(&"action_1".into(), LockMode::Shared, "bob", false);

        let s = scope("ap_1", &["PROJECT"], &["action_1"]);
        assert!(ResourceRegistry::conflicts(&state, &s, LockMode::Exclusive, false).is_none());
        assert!(matches!(
            ResourceRegistry::conflicts(&state, &s, LockMode::Exclusive, true),
            Some(ConflictReason::TreeNotFree { .. })
        ));
    }

    #[tokio::test]
    async fn test_resolve_unknown_resource() {
        let registry = ResourceRegistry::new(Arc::new(InMemoryGraph::with_roots()));
        let err = registry.resolve(&"nope".into()).await.unwrap_err();
        assert_eq!(err, LockError::UnknownResource("nope".into()));

        let scope = registry.resolve(&ResourceId::scene()).await.unwrap();
        assert!(scope.ancestors.is_empty());
    }
}
