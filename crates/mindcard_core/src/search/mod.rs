//! Search projections over the active bucket.
//!
//! # Responsibility
//! - Filter visible cards without touching the store.
//!
//! # Invariants
//! - Projections preserve bucket order.

pub mod filter;
