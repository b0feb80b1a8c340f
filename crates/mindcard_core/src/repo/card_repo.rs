//! Card repository contract consumed by the sync coordinator.
//!
//! # Responsibility
//! - Describe the CRUD surface of the card collection store.
//! - Give every failure one error type so callers can treat it uniformly.
//!
//! # Invariants
//! - Any `Err` means the operation was not applied; there is no partial success.
//! - `create` assigns the card id.

use crate::db::DbError;
use crate::model::card::{Card, CardDraft, CardId, CardPatch, CardValidationError};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug)]
pub enum RepoError {
    /// Input rejected before reaching storage.
    Validation(CardValidationError),
    /// Target card (or requested parent) does not exist.
    NotFound(CardId),
    /// Storage-level failure.
    Db(DbError),
    /// Persisted data cannot be converted into a valid card.
    InvalidData(String),
    /// Remote transport failure reported by a network-backed implementation.
    Transport(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "card not found: {id}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted card data: {message}"),
            Self::Transport(message) => write!(f, "card transport failed: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::NotFound(_) | Self::InvalidData(_) | Self::Transport(_) => None,
        }
    }
}

impl From<CardValidationError> for RepoError {
    fn from(value: CardValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// CRUD surface over the card collection.
pub trait CardRepository {
    /// Lists direct children of `parent_id`, or top-level cards for `None`.
    fn list(&self, parent_id: Option<&CardId>) -> RepoResult<Vec<Card>>;
    /// Persists a new card and returns it with its assigned id.
    fn create(&self, draft: &CardDraft) -> RepoResult<Card>;
    /// Applies a partial update and returns the stored card.
    fn update(&self, id: &CardId, patch: &CardPatch) -> RepoResult<Card>;
    /// Deletes one card.
    fn delete(&self, id: &CardId) -> RepoResult<()>;
}

impl<R: CardRepository + ?Sized> CardRepository for &R {
    fn list(&self, parent_id: Option<&CardId>) -> RepoResult<Vec<Card>> {
        (**self).list(parent_id)
    }

    fn create(&self, draft: &CardDraft) -> RepoResult<Card> {
        (**self).create(draft)
    }

    fn update(&self, id: &CardId, patch: &CardPatch) -> RepoResult<Card> {
        (**self).update(id, patch)
    }

    fn delete(&self, id: &CardId) -> RepoResult<()> {
        (**self).delete(id)
    }
}
