//! Tree-scoped in-memory card cache.
//!
//! # Responsibility
//! - Hold one ordered bucket of child cards per parent locator.
//! - Provide synchronous, side-effect-only edits for sync and drag flows.
//!
//! # Invariants
//! - The root bucket always exists, even when empty.
//! - Bucket order is insertion order; nothing sorts implicitly.
//! - Edits addressing an absent card are no-ops and never panic.

use crate::model::card::{now_epoch_ms, Card, CardId, CardPatch};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Key of one bucket: the root sentinel or the id of the containing card.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locator {
    Root,
    Card(CardId),
}

impl Locator {
    /// Normalizes a card's `parent_id` into its bucket key.
    pub fn for_parent(parent_id: Option<&CardId>) -> Self {
        match parent_id {
            Some(id) => Self::Card(id.clone()),
            None => Self::Root,
        }
    }

    /// Inverse of [`Locator::for_parent`].
    pub fn parent_id(&self) -> Option<&CardId> {
        match self {
            Self::Root => None,
            Self::Card(id) => Some(id),
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, Self::Root)
    }
}

impl Display for Locator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Root => f.write_str("root"),
            Self::Card(id) => write!(f, "{id}"),
        }
    }
}

/// Parent-keyed bucket table.
#[derive(Debug, Clone, PartialEq)]
pub struct CardStore {
    buckets: BTreeMap<Locator, Vec<Card>>,
}

impl Default for CardStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CardStore {
    pub fn new() -> Self {
        let mut buckets = BTreeMap::new();
        buckets.insert(Locator::Root, Vec::new());
        Self { buckets }
    }

    /// Replaces one bucket wholesale after a fetch.
    pub fn load(&mut self, locator: Locator, cards: Vec<Card>) {
        self.buckets.insert(locator, cards);
    }

    /// Rebuilds every bucket from a flat listing, grouping by `parent_id`.
    pub fn load_all(&mut self, cards: Vec<Card>) {
        self.clear();
        for card in cards {
            let locator = Locator::for_parent(card.parent_id.as_ref());
            self.add(locator, card);
        }
    }

    /// Appends to the end of the bucket, creating it when absent.
    pub fn add(&mut self, locator: Locator, card: Card) {
        self.buckets.entry(locator).or_default().push(card);
    }

    /// Inserts at `index` (clamped to the bucket length).
    pub fn insert_at(&mut self, locator: Locator, index: usize, card: Card) {
        let bucket = self.buckets.entry(locator).or_default();
        let index = index.min(bucket.len());
        bucket.insert(index, card);
    }

    /// Merges `patch` into the matching card and refreshes `updated_at`.
    ///
    /// Returns `false` when the card is not in the addressed bucket.
    pub fn update(&mut self, locator: &Locator, card_id: &CardId, patch: &CardPatch) -> bool {
        let Some(card) = self
            .buckets
            .get_mut(locator)
            .and_then(|bucket| bucket.iter_mut().find(|card| &card.id == card_id))
        else {
            debug!("event=store_update module=store status=skipped reason=absent locator={locator} card_id={card_id}");
            return false;
        };
        patch.apply_to(card);
        card.updated_at = now_epoch_ms();
        true
    }

    /// Filters the card out of the bucket, returning its former index and value.
    pub fn remove(&mut self, locator: &Locator, card_id: &CardId) -> Option<(usize, Card)> {
        let bucket = self.buckets.get_mut(locator)?;
        let index = bucket.iter().position(|card| &card.id == card_id)?;
        Some((index, bucket.remove(index)))
    }

    /// Returns the live bucket, or an empty slice for unknown locators.
    pub fn get(&self, locator: &Locator) -> &[Card] {
        self.buckets.get(locator).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains_bucket(&self, locator: &Locator) -> bool {
        self.buckets.contains_key(locator)
    }

    /// Finds the bucket currently holding `card_id`.
    pub fn locate(&self, card_id: &CardId) -> Option<Locator> {
        self.buckets
            .iter()
            .find(|(_, bucket)| bucket.iter().any(|card| &card.id == card_id))
            .map(|(locator, _)| locator.clone())
    }

    pub fn find(&self, card_id: &CardId) -> Option<&Card> {
        self.buckets
            .values()
            .flat_map(|bucket| bucket.iter())
            .find(|card| &card.id == card_id)
    }

    /// Swaps a provisional card for its confirmed record, keeping its slot.
    ///
    /// The bucket keyed by `old_id` moves to the new id and its children get
    /// their `parent_id` rewritten. Returns `false` when `old_id` is not cached.
    pub fn rekey(&mut self, old_id: &CardId, confirmed: Card) -> bool {
        let new_id = confirmed.id.clone();
        let mut replaced = false;
        if let Some(locator) = self.locate(old_id) {
            if let Some(bucket) = self.buckets.get_mut(&locator) {
                if let Some(slot) = bucket.iter_mut().find(|card| &card.id == old_id) {
                    *slot = confirmed;
                    replaced = true;
                }
            }
        }

        if let Some(mut children) = self.buckets.remove(&Locator::Card(old_id.clone())) {
            for child in &mut children {
                child.parent_id = Some(new_id.clone());
            }
            self.buckets
                .entry(Locator::Card(new_id))
                .or_default()
                .extend(children);
        }
        replaced
    }

    /// Drops cached buckets of `card_id` and all of its cached descendants.
    pub fn prune_subtree(&mut self, card_id: &CardId) {
        let mut pending = vec![card_id.clone()];
        while let Some(current) = pending.pop() {
            if let Some(children) = self.buckets.remove(&Locator::Card(current)) {
                pending.extend(children.into_iter().map(|child| child.id));
            }
        }
    }

    /// Resets to a single empty root bucket.
    pub fn clear(&mut self) {
        self.buckets.clear();
        self.buckets.insert(Locator::Root, Vec::new());
    }

    /// Total number of cached cards across buckets.
    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}
