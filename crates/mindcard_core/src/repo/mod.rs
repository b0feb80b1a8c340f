//! Repository contract and the bundled SQLite implementation.
//!
//! # Responsibility
//! - Define the CRUD contract the sync coordinator drives.
//! - Isolate SQLite query details from sync and workspace orchestration.
//!
//! # Invariants
//! - Repository writes validate card input before persistence.
//! - Repository APIs return semantic errors (`NotFound`) in addition to
//!   storage errors.

pub mod card_repo;
pub mod sqlite_card_repo;
