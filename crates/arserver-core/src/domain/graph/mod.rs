//! Scene/project graph relationships
//!
//! The lock engine does not own the scene or project; it asks the graph
//! cache whether a resource exists and which resources sit above and below
//! it. `InMemoryGraph` is a parent-map implementation used by the server
//! binary and by tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

use crate::domain::locking::ResourceId;

/// Relationship queries supplied by the scene/project cache
#[async_trait]
pub trait GraphCache: Send + Sync {
    /// Whether the id names an existing node
    async fn resource_exists(&self, id: &ResourceId) -> bool;

    /// Parents up to the root, nearest first
    async fn ancestors(&self, id: &ResourceId) -> Vec<ResourceId>;

    /// All transitive children
    async fn descendants(&self, id: &ResourceId) -> Vec<ResourceId>;

    /// Drop cached data for a resource after an exclusive holder released it
    fn invalidate(&self, _id: &ResourceId) {}
}

/// Parent-map graph kept in memory
#[derive(Debug, Default)]
pub struct InMemoryGraph {
    /// child -> parent (None for roots)
    parents: RwLock<HashMap<ResourceId, Option<ResourceId>>>,
    invalidations: AtomicUsize,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph with the whole-scene and whole-project roots registered
    pub fn with_roots() -> Self {
        let graph = Self::new();
        graph.insert(ResourceId::scene(), None);
        graph.insert(ResourceId::project(), None);
        graph
    }

    /// Add or move a node
    pub fn insert(&self, id: impl Into<ResourceId>, parent: Option<ResourceId>) {
        let mut parents = self.parents.write().unwrap_or_else(|e| e.into_inner());
        parents.insert(id.into(), parent);
    }

    /// Remove a node and everything below it
    pub fn remove(&self, id: &ResourceId) -> usize {
        let doomed = {
            let parents = self.parents.read().unwrap_or_else(|e| e.into_inner());
            let mut doomed = collect_descendants(&parents, id);
            doomed.push(id.clone());
            doomed
        };

        let mut parents = self.parents.write().unwrap_or_else(|e| e.into_inner());
        doomed.iter().filter(|d| parents.remove(*d).is_some()).count()
    }

    pub fn len(&self) -> usize {
        self.parents.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many times `invalidate` was called
    pub fn invalidation_count(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }
}

fn collect_descendants(
    parents: &HashMap<ResourceId, Option<ResourceId>>,
    id: &ResourceId,
) -> Vec<ResourceId> {
    let mut children: HashMap<&ResourceId, Vec<&ResourceId>> = HashMap::new();
    for (child, parent) in parents {
        if let Some(parent) = parent {
            children.entry(parent).or_default().push(child);
        }
    }

    let mut found = Vec::new();
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([id]);
    while let Some(current) = queue.pop_front() {
        for child in children.get(current).into_iter().flatten() {
            if seen.insert(*child) {
                found.push((*child).clone());
                queue.push_back(*child);
            }
        }
    }
    found
}

#[async_trait]
impl GraphCache for InMemoryGraph {
    async fn resource_exists(&self, id: &ResourceId) -> bool {
        self.parents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(id)
    }

    async fn ancestors(&self, id: &ResourceId) -> Vec<ResourceId> {
        let parents = self.parents.read().unwrap_or_else(|e| e.into_inner());
        let mut found = Vec::new();
        let mut current = parents.get(id).cloned().flatten();
        while let Some(parent) = current {
            // cycles would only come from a corrupted cache
            if found.contains(&parent) || &parent == id {
                break;
            }
            current = parents.get(&parent).cloned().flatten();
            found.push(parent);
        }
        found
    }

    async fn descendants(&self, id: &ResourceId) -> Vec<ResourceId> {
        let parents = self.parents.read().unwrap_or_else(|e| e.into_inner());
        collect_descendants(&parents, id)
    }

    fn invalidate(&self, id: &ResourceId) {
        debug!(resource = %id, "Graph cache invalidated");
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> InMemoryGraph {
        let graph = InMemoryGraph::with_roots();
        graph.insert("ap_1", Some(ResourceId::project()));
        graph.insert("ap_1_child", Some("ap_1".into()));
        graph.insert("action_1", Some("ap_1_child".into()));
        graph.insert("ap_2", Some(ResourceId::project()));
        graph
    }

    #[tokio::test]
    async fn test_ancestors_nearest_first() {
        let graph = sample();
        let ancestors = graph.ancestors(&"action_1".into()).await;
        assert_eq!(
            ancestors,
            vec![
                ResourceId::from("ap_1_child"),
                ResourceId::from("ap_1"),
                ResourceId::project()
            ]
        );
    }

    #[tokio::test]
    async fn test_descendants() {
        let graph = sample();
        let mut descendants = graph.descendants(&"ap_1".into()).await;
        descendants.sort();
        assert_eq!(
            descendants,
            vec![ResourceId::from("action_1"), ResourceId::from("ap_1_child")]
        );
        assert!(graph.descendants(&"ap_2".into()).await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_subtree() {
        let graph = sample();
        assert_eq!(graph.remove(&"ap_1".into()), 3);
        assert!(!graph.resource_exists(&"action_1".into()).await);
        assert!(graph.resource_exists(&"ap_2".into()).await);
    }

    #[test]
    fn test_invalidation_counter() {
        let graph = sample();
        graph.invalidate(&"ap_1".into());
        assert_eq!(graph.invalidation_count(), 1);
    }
}
