//! Queued write records and their supersede rules.
//!
//! # Invariants
//! - Every update carries the undo patch that restores the last confirmed values.
//! - A delete snapshot holds the card as it should reappear on rollback.

use crate::model::card::{Card, CardDraft, CardId, CardPatch};
use crate::store::card_store::Locator;
use std::fmt::{Display, Formatter};

/// Identifies one dispatched repository command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(pub(crate) u64);

impl Display for Ticket {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Create,
    Update,
    Delete,
}

impl Display for OpKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Card removed by an optimistic delete, with where it used to sit.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RemovedCard {
    pub locator: Locator,
    pub index: usize,
    pub card: Card,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PendingOp {
    Create { draft: CardDraft },
    Update { patch: CardPatch, undo: CardPatch },
    Delete { removed: RemovedCard },
}

pub(crate) enum Merge {
    Queued(PendingOp),
    /// The queued create never reached the repository and the card is gone.
    Cancelled,
}

impl PendingOp {
    pub fn kind(&self) -> OpKind {
        match self {
            Self::Create { .. } => OpKind::Create,
            Self::Update { .. } => OpKind::Update,
            Self::Delete { .. } => OpKind::Delete,
        }
    }

    /// Whether the op still refers to `card_id` as the parent of its card.
    pub fn names_parent(&self, card_id: &CardId) -> bool {
        match self {
            Self::Create { draft } => draft.parent_id.as_ref() == Some(card_id),
            Self::Update { .. } => false,
            Self::Delete { removed } => removed.locator.parent_id() == Some(card_id),
        }
    }

    /// Folds a later write for the same card into this queued one.
    pub fn supersede(self, later: PendingOp) -> Merge {
        match (self, later) {
            (Self::Create { mut draft }, Self::Update { patch, .. }) => {
                draft.absorb(&patch);
                Merge::Queued(Self::Create { draft })
            }
            (Self::Create { .. }, Self::Delete { .. }) => Merge::Cancelled,
            (
                Self::Update {
                    mut patch,
                    mut undo,
                },
                Self::Update {
                    patch: later_patch,
                    undo: later_undo,
                },
            ) => {
                patch.overlay(&later_patch);
                undo.fill_missing(&later_undo);
                Merge::Queued(Self::Update { patch, undo })
            }
            (Self::Update { undo, .. }, Self::Delete { mut removed }) => {
                undo.apply_to(&mut removed.card);
                Merge::Queued(Self::Delete { removed })
            }
            (existing, _) => Merge::Queued(existing),
        }
    }
}

/// Single-flight slot: one write in flight, at most one waiting behind it.
#[derive(Debug, Default)]
pub(crate) struct WriteSlot {
    pub in_flight: Option<Ticket>,
    pub queued: Option<PendingOp>,
}

impl WriteSlot {
    pub fn is_empty(&self) -> bool {
        self.in_flight.is_none() && self.queued.is_none()
    }
}
