//! arserver core library
//!
//! Locking and session coordination for a multi-user scene and project
//! editing server:
//! - Exclusive, shared and tree locks over the scene/project graph
//! - Retried acquisition with scoped and keep-alive lock handles
//! - Ordered lock notifications to every connected editor
//! - Reclamation of locks held by users who disconnected
//! - File and environment configuration

pub mod config;
pub mod domain;
pub mod engine;
pub mod error;

pub use engine::{Engine, ShutdownReport};
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, LockingConfig};
    pub use crate::domain::graph::{GraphCache, InMemoryGraph};
    pub use crate::domain::locking::{
        LockError, LockHandle, LockManager, LockMode, LockRequest, LockResult, ResourceId,
        ScopedLock, UpdateKind,
    };
    pub use crate::domain::session::{ConnectionId, SessionRegistry};
    pub use crate::engine::{Engine, ShutdownReport};
    pub use crate::error::{Error, Result};
}
