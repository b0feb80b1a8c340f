//! Breadcrumb navigation stack.
//!
//! # Responsibility
//! - Track the path of opened containers from root to the current card.
//! - Derive the active bucket locator from that path.
//!
//! # Invariants
//! - The path stores ids only; titles are resolved from the store on demand.
//! - Root is implicit and never appears in the path.
//! - `back` with an out-of-range index is a caller defect.

use crate::model::card::{Card, CardId};
use crate::store::card_store::{CardStore, Locator};
use log::warn;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Where [`NavigationController::back`] should land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackTarget {
    /// Clear the path and show the root bucket.
    Root,
    /// Keep the path prefix ending at this index, inclusive.
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationError {
    /// `back` was asked for an index past the end of the path.
    IndexOutOfRange { index: usize, depth: usize },
}

impl Display for NavigationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IndexOutOfRange { index, depth } => write!(
                f,
                "breadcrumb index {index} is out of range for path depth {depth}"
            ),
        }
    }
}

impl Error for NavigationError {}

/// One rendered breadcrumb entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crumb {
    pub index: usize,
    pub id: CardId,
    /// `None` when the card is no longer cached in its parent's bucket.
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationController {
    path: Vec<CardId>,
}

impl NavigationController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_locator(&self) -> Locator {
        match self.path.last() {
            Some(id) => Locator::Card(id.clone()),
            None => Locator::Root,
        }
    }

    /// Opens `card` as the new current container.
    pub fn enter(&mut self, card: &Card) {
        self.path.push(card.id.clone());
    }

    pub fn enter_id(&mut self, card_id: CardId) {
        self.path.push(card_id);
    }

    /// Truncates the path to `target`.
    ///
    /// # Errors
    /// - Debug builds panic on an out-of-range index.
    /// - Release builds leave the path unchanged and return
    ///   [`NavigationError::IndexOutOfRange`].
    pub fn back(&mut self, target: BackTarget) -> Result<(), NavigationError> {
        match target {
            BackTarget::Root => {
                self.path.clear();
                Ok(())
            }
            BackTarget::Index(index) => {
                let depth = self.path.len();
                debug_assert!(
                    index < depth,
                    "breadcrumb index {index} out of range for depth {depth}"
                );
                if index >= depth {
                    warn!(
                        "event=nav_back module=navigation status=error error_code=index_out_of_range index={index} depth={depth}"
                    );
                    return Err(NavigationError::IndexOutOfRange { index, depth });
                }
                self.path.truncate(index + 1);
                Ok(())
            }
        }
    }

    /// Resolves display titles from the live store.
    pub fn breadcrumbs(&self, store: &CardStore) -> Vec<Crumb> {
        let mut parent = Locator::Root;
        let mut crumbs = Vec::with_capacity(self.path.len());
        for (index, id) in self.path.iter().enumerate() {
            let title = store
                .get(&parent)
                .iter()
                .find(|card| &card.id == id)
                .or_else(|| store.find(id))
                .map(|card| card.title.clone());
            crumbs.push(Crumb {
                index,
                id: id.clone(),
                title,
            });
            parent = Locator::Card(id.clone());
        }
        crumbs
    }

    /// Replaces a provisional id after its create was confirmed.
    pub fn rekey(&mut self, old_id: &CardId, new_id: &CardId) {
        for id in self.path.iter_mut().filter(|id| **id == *old_id) {
            *id = new_id.clone();
        }
    }

    /// Cuts the path just before `card_id` when it is no longer reachable.
    pub fn forget(&mut self, card_id: &CardId) {
        if let Some(index) = self.path.iter().position(|id| id == card_id) {
            self.path.truncate(index);
        }
    }

    pub fn path(&self) -> &[CardId] {
        &self.path
    }

    pub fn depth(&self) -> usize {
        self.path.len()
    }

    pub fn is_at_root(&self) -> bool {
        self.path.is_empty()
    }

    pub fn reset(&mut self) {
        self.path.clear();
    }
}
