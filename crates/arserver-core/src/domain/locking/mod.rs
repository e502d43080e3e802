//! Resource locking for concurrent editors
//!
//! Users editing the same scene or project take locks on the objects they
//! touch. Locks can be exclusive or shared, can cover a whole subtree of the
//! graph, and can be shown to every connected editor.
//!
//! # Architecture
//!
//! - **Lock Table**: `LockTable`, one mutex around every entry
//! - **Resource Registry**: `ResourceRegistry`, graph lookups and conflict rules
//! - **Lock Manager**: `LockManager`, the only writer of the table
//! - **Handles**: `ScopedLock` for RAII release, `LockHandle` for keep-alive locks
//!
//! # Example
//!
//! ```ignore
//! use arserver_core::domain::locking::{LockManager, LockRequest};
//!
//! let lock = manager.scoped_acquire(LockRequest::exclusive("ap_1", "alice")).await?;
//!
//! // Mutate the action point...
//!
//! // Lock is released when `lock` is dropped
//! ```

pub mod event;
pub mod guard;
pub mod manager;
pub mod registry;
pub mod retry;
pub mod table;
pub mod types;

pub use event::{LockEvent, LockEventKind};
pub use guard::{LockHandle, ScopedLock};
pub use manager::LockManager;
pub use registry::{ConflictReason, ResourceRegistry, ResourceScope};
pub use retry::{Attempted, RetryError, RetryPolicy, retry, retry_if};
pub use table::LockTable;
pub use types::{
    LockEntry, LockError, LockMode, LockRequest, LockResult, ResourceId, UpdateKind, Visibility,
};
