//! Core use-case services.
//!
//! # Responsibility
//! - Wire store, navigation, drag and sync into one host-facing workspace.
//! - Keep UI layers decoupled from repository and transport details.

pub mod workspace_service;
