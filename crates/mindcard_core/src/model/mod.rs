//! Card domain model shared by store, sync and repository layers.
//!
//! # Responsibility
//! - Define the canonical card record and its create/patch shapes.
//! - Keep validation rules in one place for every write path.
//!
//! # Invariants
//! - Every card is identified by a stable `CardId`.
//! - Patches carry only the fields they change.

pub mod card;
