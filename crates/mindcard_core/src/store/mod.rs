//! In-memory card cache used as the rendering source of truth.

pub mod card_store;
