//! Reclamation of locks held by users who went away
//!
//! A disconnect starts one delayed task for the user. Reconnecting inside
//! the grace period cancels it; otherwise the task releases everything the
//! user still holds.
//!
//! Each pending reclamation carries a generation number. The delayed task
//! only acts if its generation is still the registered one, and it checks
//! and releases while holding the pending map, so a cancellation either
//! happens entirely before the release or finds nothing left to cancel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info};

use super::event::{SessionEvent, SessionEventType};
use super::registry::SessionRegistry;
use crate::domain::locking::LockManager;

#[derive(Debug)]
struct Pending {
    generation: u64,
    deadline: Instant,
    task: AbortHandle,
}

#[derive(Debug, Default)]
struct PendingState {
    next_generation: u64,
    users: HashMap<String, Pending>,
}

/// Releases the locks of users whose grace period ran out
#[derive(Debug, Clone)]
pub struct AutoUnlockSupervisor {
    locks: LockManager,
    sessions: SessionRegistry,
    timeout: Duration,
    pending: Arc<Mutex<PendingState>>,
}

impl AutoUnlockSupervisor {
    pub fn new(locks: LockManager, sessions: SessionRegistry, timeout: Duration) -> Self {
        Self {
            locks,
            sessions,
            timeout,
            pending: Arc::new(Mutex::new(PendingState::default())),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn pending(&self) -> MutexGuard<'_, PendingState> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// React to a session lifecycle event
    pub fn handle(&self, event: &SessionEvent) {
        match event.event_type {
            SessionEventType::Disconnected => self.on_disconnect(&event.user_name),
            SessionEventType::Connected | SessionEventType::Reconnected => {
                self.on_connect(&event.user_name);
            }
        }
    }

    /// Start the grace period for a user
    ///
    /// A reclamation already pending for the user is replaced, so the
    /// deadline always counts from the latest disconnect.
    pub fn on_disconnect(&self, user_name: &str) {
        let mut pending = self.pending();

        pending.next_generation += 1;
        let generation = pending.next_generation;
        let deadline = Instant::now() + self.timeout;

        let supervisor = self.clone();
        let user = user_name.to_string();
        let task = tokio::spawn(async move {
            sleep(supervisor.timeout).await;
            supervisor.reclaim(&user, generation);
        })
        .abort_handle();

        if let Some(previous) = pending.users.insert(
            user_name.to_string(),
            Pending {
                generation,
                deadline,
                task,
            },
        ) {
            previous.task.abort();
        }

        info!(
            user = %user_name,
            timeout_secs = self.timeout.as_secs_f64(),
            "User disconnected; locks will be released unless they come back"
        );
    }

    /// Cancel a pending reclamation; the user keeps their locks
    pub fn on_connect(&self, user_name: &str) -> bool {
        let removed = self.pending().users.remove(user_name);
        match removed {
            Some(pending) => {
                pending.task.abort();
                info!(user = %user_name, "User came back; lock reclamation cancelled");
                true
            }
            None => false,
        }
    }

    /// Same as [`on_connect`](Self::on_connect)
    pub fn on_reconnect(&self, user_name: &str) -> bool {
        self.on_connect(user_name)
    }

    fn reclaim(&self, user_name: &str, generation: u64) {
        let mut pending = self.pending();

        match pending.users.get(user_name) {
            Some(p) if p.generation == generation => {
                pending.users.remove(user_name);
            }
            _ => {
                debug!(user = %user_name, generation, "Stale reclamation skipped");
                return;
            }
        }

        // the map stays locked until the release is done
        match self.locks.release_all_owned_by(user_name) {
            Ok(released) => {
                self.sessions.forget(user_name);
                debug!(user = %user_name, released, "Grace period over");
            }
            Err(e) => {
                error!(user = %user_name, error = %e, "Could not release locks of disconnected user");
            }
        }
    }

    /// Users with a reclamation pending, and when it fires
    pub fn pending_deadlines(&self) -> Vec<(String, Instant)> {
        let mut deadlines: Vec<(String, Instant)> = self
            .pending()
            .users
            .iter()
            .map(|(user, p)| (user.clone(), p.deadline))
            .collect();
        deadlines.sort();
        deadlines
    }

    pub fn pending_count(&self) -> usize {
        self.pending().users.len()
    }

    /// Cancel every pending reclamation; returns how many there were
    pub fn shutdown(&self) -> usize {
        let drained: Vec<Pending> = self.pending().users.drain().map(|(_, p)| p).collect();
        for pending in &drained {
            pending.task.abort();
        }
        drained.len()
    }
}
