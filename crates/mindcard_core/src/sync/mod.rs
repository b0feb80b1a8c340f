//! Optimistic write synchronization.
//!
//! # Responsibility
//! - Bridge local store mutations and repository writes.
//! - Keep transport out of the core: hosts execute [`RepoCommand`]s and feed
//!   outcomes back, or call [`SyncCoordinator::flush`] for a synchronous repo.

pub mod coordinator;
mod pending;

pub use coordinator::{RepoCommand, RepoReply, SyncCoordinator, SyncError, SyncEvent};
pub use pending::{OpKind, Ticket};
