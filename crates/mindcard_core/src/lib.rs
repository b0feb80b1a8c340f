//! Core domain logic for the MindCard workspace.
//! Hierarchical cards on a free-form canvas, kept in sync with a card repository.

pub mod config;
pub mod db;
pub mod layout;
pub mod logging;
pub mod model;
pub mod navigation;
pub mod repo;
pub mod search;
pub mod service;
pub mod store;
pub mod sync;

pub use config::WorkspaceConfig;
pub use layout::drag::{DragCommit, DragEngine, DragMove, DragState, PointerTarget};
pub use logging::{default_log_level, init_logging, logging_status, LogLevel, LoggingError};
pub use model::card::{Card, CardDraft, CardId, CardPatch, CardValidationError, Position, Size};
pub use navigation::breadcrumb::{BackTarget, Crumb, NavigationController, NavigationError};
pub use repo::card_repo::{CardRepository, RepoError, RepoResult};
pub use repo::sqlite_card_repo::SqliteCardRepository;
pub use search::filter::{filter, matches};
pub use service::workspace_service::{Notice, Workspace, WorkspaceError, WorkspaceResult};
pub use store::card_store::{CardStore, Locator};
pub use sync::{
    OpKind, RepoCommand, RepoReply, SyncCoordinator, SyncError, SyncEvent, Ticket,
};

/// Minimal health-check API for host integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
