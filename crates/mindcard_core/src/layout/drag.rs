//! Pointer-driven drag state machine for the card canvas.
//!
//! # Responsibility
//! - Turn pointer gestures into live positions for the grabbed card.
//! - Emit exactly one commit per drag session.
//!
//! # Invariants
//! - Every emitted position lies in `[0, container - card]` per axis.
//! - The grab offset is frozen for the whole session.
//! - Pointer-down on an embedded control never starts a drag.

use crate::model::card::{CardId, Position, Size};

/// What the pointer landed on when a gesture started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointerTarget {
    /// The draggable body of a card.
    CardBody(CardId),
    /// A button or text input embedded in a card; passes through.
    EmbeddedControl(CardId),
    /// Empty canvas, not covered by any card.
    Canvas,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DragState {
    Idle,
    Dragging {
        card_id: CardId,
        /// Pointer minus card top-left at grab time.
        offset: Position,
        /// Card position when the session started.
        origin: Position,
        /// Last clamped position applied to the card.
        last: Position,
    },
}

/// Live position for the dragged card, produced on every pointer move.
#[derive(Debug, Clone, PartialEq)]
pub struct DragMove {
    pub card_id: CardId,
    pub position: Position,
}

/// Final position of a finished drag session.
#[derive(Debug, Clone, PartialEq)]
pub struct DragCommit {
    pub card_id: CardId,
    pub from: Position,
    pub to: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DragEngine {
    state: DragState,
    container: Size,
    card: Size,
}

impl DragEngine {
    pub fn new(container: Size, card: Size) -> Self {
        Self {
            state: DragState::Idle,
            container,
            card,
        }
    }

    pub fn state(&self) -> &DragState {
        &self.state
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.state, DragState::Dragging { .. })
    }

    pub fn dragged_card(&self) -> Option<&CardId> {
        match &self.state {
            DragState::Dragging { card_id, .. } => Some(card_id),
            DragState::Idle => None,
        }
    }

    pub fn container(&self) -> Size {
        self.container
    }

    pub fn card_size(&self) -> Size {
        self.card
    }

    pub fn resize(&mut self, container: Size) {
        self.container = container;
    }

    /// Starts a session when the pointer lands on a card body.
    ///
    /// Returns `false` for embedded controls, empty canvas, or when a
    /// session is already active.
    pub fn pointer_down(
        &mut self,
        target: &PointerTarget,
        pointer: Position,
        card_origin: Position,
    ) -> bool {
        let PointerTarget::CardBody(card_id) = target else {
            return false;
        };
        if self.is_dragging() {
            return false;
        }
        self.state = DragState::Dragging {
            card_id: card_id.clone(),
            offset: pointer.offset_from(card_origin),
            origin: card_origin,
            last: card_origin,
        };
        true
    }

    pub fn pointer_move(&mut self, pointer: Position) -> Option<DragMove> {
        let proposed = match &self.state {
            DragState::Dragging { offset, .. } => pointer.offset_from(*offset),
            DragState::Idle => return None,
        };
        let clamped = self.clamp(proposed);
        let DragState::Dragging { card_id, last, .. } = &mut self.state else {
            return None;
        };
        *last = clamped;
        Some(DragMove {
            card_id: card_id.clone(),
            position: clamped,
        })
    }

    /// Ends the session; returns the commit when the card actually moved.
    pub fn pointer_up(&mut self) -> Option<DragCommit> {
        match std::mem::replace(&mut self.state, DragState::Idle) {
            DragState::Dragging {
                card_id,
                origin,
                last,
                ..
            } if last != origin => Some(DragCommit {
                card_id,
                from: origin,
                to: last,
            }),
            _ => None,
        }
    }

    /// Leaving the container finishes the drag exactly like releasing it.
    pub fn pointer_leave(&mut self) -> Option<DragCommit> {
        self.pointer_up()
    }

    /// Abandons the session; returns the card id and the position to restore.
    pub fn cancel(&mut self) -> Option<DragMove> {
        match std::mem::replace(&mut self.state, DragState::Idle) {
            DragState::Dragging {
                card_id, origin, ..
            } => Some(DragMove {
                card_id,
                position: origin,
            }),
            DragState::Idle => None,
        }
    }

    /// Follows a provisional card id to its confirmed one mid-session.
    pub fn rekey(&mut self, old_id: &CardId, new_id: &CardId) {
        if let DragState::Dragging { card_id, .. } = &mut self.state {
            if card_id == old_id {
                *card_id = new_id.clone();
            }
        }
    }

    /// Spawn position for a card created by double-clicking empty canvas.
    ///
    /// The card is centered under the pointer and clamped to non-negative
    /// coordinates.
    pub fn double_click(&self, target: &PointerTarget, pointer: Position) -> Option<Position> {
        if *target != PointerTarget::Canvas {
            return None;
        }
        Some(Position::new(
            (pointer.x - self.card.width / 2.0).max(0.0),
            (pointer.y - self.card.height / 2.0).max(0.0),
        ))
    }

    /// Clamps a proposed top-left corner into the container.
    pub fn clamp(&self, proposed: Position) -> Position {
        let max_x = (self.container.width - self.card.width).max(0.0);
        let max_y = (self.container.height - self.card.height).max(0.0);
        Position::new(clamp_axis(proposed.x, max_x), clamp_axis(proposed.y, max_y))
    }
}

fn clamp_axis(value: f64, max: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, max)
}
