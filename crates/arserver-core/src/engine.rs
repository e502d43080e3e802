//! Engine lifecycle: construction at startup, graceful teardown
//!
//! The engine owns the lock manager, the session registry, the auto-unlock
//! supervisor and the notification consumer task. RPC handlers get clones
//! of the manager and registry from it instead of reaching for globals.
//!
//! # Shutdown Order
//!
//! 1. Cancel pending reclamations (nobody will reconnect anymore)
//! 2. Record how many locks are still held
//! 3. Stop the broadcaster after it drained the queue
//!
//! # Example
//!
//! ```ignore
//! let engine = Engine::start(Config::load()?, Arc::new(InMemoryGraph::with_roots()))?;
//!
//! let conn = engine.connect(sink);
//! engine.login(conn, "alice")?;
//!
//! // On application exit
//! let report = engine.shutdown().await;
//! println!("Shutdown complete: {}", report.summary());
//! ```

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::domain::graph::GraphCache;
use crate::domain::locking::LockManager;
use crate::domain::notification::{BroadcastStats, NotificationBroadcaster, notification_channel};
use crate::domain::session::{
    AutoUnlockSupervisor, ConnectionId, ConnectionSink, SessionEvent, SessionRegistry,
};
use crate::error::Result;

/// Result of a shutdown
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Disconnected users whose locks were still in their grace period
    pub pending_reclamations_cancelled: usize,

    /// Lock table entries left at shutdown
    pub locks_held: usize,

    /// Events delivered after shutdown was requested
    pub events_flushed: u64,

    /// Any errors that occurred (non-fatal)
    pub warnings: Vec<String>,
}

impl ShutdownReport {
    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        if self.pending_reclamations_cancelled > 0 {
            parts.push(format!(
                "{} pending reclamation(s) cancelled",
                self.pending_reclamations_cancelled
            ));
        }

        if self.locks_held > 0 {
            parts.push(format!("{} lock(s) still held", self.locks_held));
        }

        if self.events_flushed > 0 {
            parts.push(format!("{} queued event(s) flushed", self.events_flushed));
        }

        if parts.is_empty() {
            "Shutdown completed (no actions needed)".to_string()
        } else {
            parts.join("; ")
        }
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// The running locking and session engine
#[derive(Debug)]
pub struct Engine {
    config: Config,
    locks: LockManager,
    sessions: SessionRegistry,
    supervisor: AutoUnlockSupervisor,
    shutdown: CancellationToken,
    broadcaster: JoinHandle<BroadcastStats>,
}

impl Engine {
    /// Build every component and spawn the notification consumer
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: Config, graph: Arc<dyn GraphCache>) -> Result<Self> {
        config.validate()?;

        let (notifier, queue) = notification_channel();
        let sessions = SessionRegistry::new();
        let locks = LockManager::new(config.locking.clone(), graph, notifier);
        let supervisor =
            AutoUnlockSupervisor::new(locks.clone(), sessions.clone(), config.locking.lock_timeout());

        let shutdown = CancellationToken::new();
        let broadcaster = NotificationBroadcaster::new(queue, sessions.clone(), shutdown.clone()).spawn();

        info!(
            lock_timeout_secs = config.locking.lock_timeout_seconds,
            lock_retries = config.locking.lock_retries,
            lock_retry_wait_secs = config.locking.lock_retry_wait_seconds,
            "Lock engine started"
        );

        Ok(Self {
            config,
            locks,
            sessions,
            supervisor,
            shutdown,
            broadcaster,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn supervisor(&self) -> &AutoUnlockSupervisor {
        &self.supervisor
    }

    /// Register a new transport connection
    pub fn connect(&self, sink: ConnectionSink) -> ConnectionId {
        self.sessions.add_interface(sink)
    }

    /// Bind a user to a connection and bring it up to date
    ///
    /// Cancels a pending reclamation for the user and replays the current
    /// lock state to the new connection.
    pub fn login(&self, connection: ConnectionId, user_name: &str) -> Result<SessionEvent> {
        let event = self.sessions.login(connection, user_name)?;
        self.supervisor.handle(&event);
        self.locks.replay_to(connection, user_name);
        Ok(event)
    }

    /// Drop a connection; its user enters the grace period
    pub fn disconnect(&self, connection: ConnectionId) -> Result<Option<SessionEvent>> {
        let event = self.sessions.logout(connection)?;
        if let Some(event) = &event {
            self.supervisor.handle(event);
        }
        Ok(event)
    }

    /// Stop background work and report what was left
    pub async fn shutdown(self) -> ShutdownReport {
        let mut report = ShutdownReport {
            pending_reclamations_cancelled: self.supervisor.shutdown(),
            locks_held: self.locks.entry_count(),
            ..ShutdownReport::default()
        };

        self.shutdown.cancel();
        match self.broadcaster.await {
            Ok(stats) => report.events_flushed = stats.flushed_on_shutdown,
            Err(e) => {
                warn!(error = %e, "Notification broadcaster did not stop cleanly");
                report.warnings.push(format!("Notification broadcaster failed: {}", e));
            }
        }

        info!(summary = %report.summary(), "Lock engine stopped");
        report
    }
}
