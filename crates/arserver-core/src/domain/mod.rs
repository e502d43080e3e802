//! Domain layer
//!
//! - `graph`: parent/child relations between lockable resources
//! - `locking`: the lock table and its manager
//! - `notification`: ordered delivery of lock events
//! - `session`: connections, users and lock reclamation

pub mod graph;
pub mod locking;
pub mod notification;
pub mod session;
