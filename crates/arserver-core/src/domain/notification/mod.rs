//! Lock notification broadcaster
//!
//! The lock manager enqueues events from inside its critical sections, so
//! the queue order is the commit order. A single consumer task drains the
//! queue and fans each event out to the live connections.
//!
//! The queue is unbounded. Sends happen while the lock table guard is held
//! and from `Drop`, where waiting for capacity would stall every other lock
//! operation and dropping an event would leave editors with a stale view.
//! Volume is bounded by lock traffic: at most one event per covered
//! resource per lock operation.
//!
//! # Example
//!
//! ```ignore
//! let (sender, receiver) = notification_channel();
//! let broadcaster = NotificationBroadcaster::new(receiver, sessions.clone(), shutdown.clone());
//! let handle = broadcaster.spawn();
//!
//! sender.broadcast(LockEvent::locked("ap_1".into(), "alice"));
//!
//! shutdown.cancel();
//! let stats = handle.await?;
//! ```

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::locking::LockEvent;
use crate::domain::session::{ConnectionId, SessionRegistry};

/// Who receives a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Every live connection
    All,
    /// One connection, used to replay lock state after login
    Connection(ConnectionId),
}

/// A queued lock event
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub event: LockEvent,
    pub audience: Audience,
}

impl Notification {
    pub fn broadcast(event: LockEvent) -> Self {
        Self {
            event,
            audience: Audience::All,
        }
    }

    pub fn to_connection(connection: ConnectionId, event: LockEvent) -> Self {
        Self {
            event,
            audience: Audience::Connection(connection),
        }
    }
}

/// Producer side of the notification queue
///
/// Sending never blocks, which is what allows it inside the lock table
/// guard.
#[derive(Debug, Clone)]
pub struct NotificationSender {
    tx: mpsc::UnboundedSender<Notification>,
}

/// Consumer side of the notification queue
pub type NotificationReceiver = mpsc::UnboundedReceiver<Notification>;

/// Create a connected sender/receiver pair
pub fn notification_channel() -> (NotificationSender, NotificationReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (NotificationSender { tx }, rx)
}

impl NotificationSender {
    pub fn send(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            debug!("Notification queue closed; dropping event");
        }
    }

    pub fn broadcast(&self, event: LockEvent) {
        self.send(Notification::broadcast(event));
    }

    pub fn send_to(&self, connection: ConnectionId, event: LockEvent) {
        self.send(Notification::to_connection(connection, event));
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Counters reported when the consumer task stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Events taken off the queue
    pub processed: u64,
    /// Of those, events drained after shutdown was requested
    pub flushed_on_shutdown: u64,
}

/// Single consumer of the notification queue
#[derive(Debug)]
pub struct NotificationBroadcaster {
    rx: NotificationReceiver,
    sessions: SessionRegistry,
    shutdown: CancellationToken,
}

impl NotificationBroadcaster {
    pub fn new(rx: NotificationReceiver, sessions: SessionRegistry, shutdown: CancellationToken) -> Self {
        Self {
            rx,
            sessions,
            shutdown,
        }
    }

    /// Run the consumer on the current runtime
    pub fn spawn(self) -> JoinHandle<BroadcastStats> {
        tokio::spawn(self.run())
    }

    /// Drain the queue until shutdown, then flush what is left
    pub async fn run(mut self) -> BroadcastStats {
        let mut stats = BroadcastStats::default();

        loop {
            tokio::select! {
                biased;
                notification = self.rx.recv() => match notification {
                    Some(notification) => {
                        self.dispatch(&notification);
                        stats.processed += 1;
                    }
                    None => break,
                },
                _ = self.shutdown.cancelled() => {
                    self.rx.close();
                    while let Ok(notification) = self.rx.try_recv() {
                        self.dispatch(&notification);
                        stats.processed += 1;
                        stats.flushed_on_shutdown += 1;
                    }
                    break;
                }
            }
        }

        info!(
            processed = stats.processed,
            flushed = stats.flushed_on_shutdown,
            "Lock notification broadcaster stopped"
        );
        stats
    }

    fn dispatch(&self, notification: &Notification) {
        let delivered = self.sessions.deliver(notification);
        debug!(
            resource = %notification.event.resource_id,
            user = %notification.event.user_name,
            kind = %notification.event.kind,
            delivered,
            "Lock notification sent"
        );
    }
}
