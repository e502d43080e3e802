//! Connected users and reclamation of the locks they abandon
//!
//! The session registry tracks which user sits behind which connection.
//! When a user disconnects, the auto-unlock supervisor gives them a grace
//! period to come back before their locks are released.

pub mod auto_unlock;
pub mod event;
pub mod registry;

pub use auto_unlock::AutoUnlockSupervisor;
pub use event::{SessionEvent, SessionEventType};
pub use registry::{ConnectionId, ConnectionSink, Owner, SessionError, SessionRegistry};
