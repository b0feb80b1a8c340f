//! Optimistic write coordinator between the card store and the repository.
//!
//! # Responsibility
//! - Apply every mutation to the store first and remember how to undo it.
//! - Turn mutations into ticketed repository commands, at most one in flight
//!   per card id.
//! - Reconcile completions (in completion order) back into the store.
//!
//! # Invariants
//! - A failed write leaves the store at the last confirmed values.
//! - A later write for the same card supersedes the queued one.
//! - Completions for cards no longer cached are absorbed without error.

use crate::model::card::{Card, CardDraft, CardId, CardPatch, CardValidationError, Position};
use crate::repo::card_repo::{CardRepository, RepoError, RepoResult};
use crate::store::card_store::{CardStore, Locator};
use crate::sync::pending::{Merge, OpKind, PendingOp, RemovedCard, Ticket, WriteSlot};
use log::{debug, info, warn};
use std::collections::{HashMap, VecDeque};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Repository call the host must execute and report back via [`SyncCoordinator::complete`].
#[derive(Debug, Clone, PartialEq)]
pub enum RepoCommand {
    Create {
        ticket: Ticket,
        local_id: CardId,
        draft: CardDraft,
    },
    Update {
        ticket: Ticket,
        id: CardId,
        patch: CardPatch,
    },
    Delete {
        ticket: Ticket,
        id: CardId,
    },
}

impl RepoCommand {
    pub fn ticket(&self) -> Ticket {
        match self {
            Self::Create { ticket, .. } | Self::Update { ticket, .. } | Self::Delete { ticket, .. } => {
                *ticket
            }
        }
    }

    pub fn card_id(&self) -> &CardId {
        match self {
            Self::Create { local_id, .. } => local_id,
            Self::Update { id, .. } | Self::Delete { id, .. } => id,
        }
    }

    pub fn kind(&self) -> OpKind {
        match self {
            Self::Create { .. } => OpKind::Create,
            Self::Update { .. } => OpKind::Update,
            Self::Delete { .. } => OpKind::Delete,
        }
    }

    /// Runs the command against a repository.
    pub fn execute<R: CardRepository + ?Sized>(&self, repo: &R) -> RepoResult<RepoReply> {
        match self {
            Self::Create { draft, .. } => repo.create(draft).map(RepoReply::Created),
            Self::Update { id, patch, .. } => repo.update(id, patch).map(RepoReply::Updated),
            Self::Delete { id, .. } => repo.delete(id).map(|()| RepoReply::Deleted),
        }
    }
}

/// Successful repository outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum RepoReply {
    Created(Card),
    Updated(Card),
    Deleted,
}

/// What a completion did to local state.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Confirmed { id: CardId, kind: OpKind },
    /// A provisional id was replaced by the repository-assigned one.
    Rekeyed { local_id: CardId, server_id: CardId },
    /// The write failed and local state was restored.
    RolledBack {
        id: CardId,
        kind: OpKind,
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncError {
    /// Input rejected before any local mutation.
    Invalid(CardValidationError),
    /// The addressed bucket does not hold the card.
    CardNotFound { locator: Locator, card_id: CardId },
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid(err) => write!(f, "{err}"),
            Self::CardNotFound { locator, card_id } => {
                write!(f, "card {card_id} is not in bucket {locator}")
            }
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Invalid(err) => Some(err),
            Self::CardNotFound { .. } => None,
        }
    }
}

impl From<CardValidationError> for SyncError {
    fn from(value: CardValidationError) -> Self {
        Self::Invalid(value)
    }
}

#[derive(Debug)]
struct InFlight {
    key: CardId,
    op: PendingOp,
}

#[derive(Debug, Default)]
pub struct SyncCoordinator {
    slots: HashMap<CardId, WriteSlot>,
    in_flight: HashMap<Ticket, InFlight>,
    /// Keys with a queued write, in first-queued order.
    order: VecDeque<CardId>,
    /// Provisional id -> repository id, for children created before their parent was confirmed.
    resolved: HashMap<CardId, CardId>,
    next_ticket: u64,
}

impl SyncCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a provisional card under `locator` and queues its create.
    pub fn create_card(
        &mut self,
        store: &mut CardStore,
        locator: Locator,
        draft: CardDraft,
    ) -> Result<Card, SyncError> {
        let draft = draft.with_parent(locator.parent_id().cloned());
        draft.validate()?;

        let local_id = CardId::local();
        let card = Card::from_draft(local_id.clone(), &draft);
        store.add(locator.clone(), card.clone());
        info!("event=card_create module=sync status=queued card_id={local_id} parent={locator}");
        self.enqueue(local_id, PendingOp::Create { draft });
        Ok(card)
    }

    /// Applies `patch` locally and queues it for the repository.
    pub fn update_card(
        &mut self,
        store: &mut CardStore,
        locator: &Locator,
        card_id: &CardId,
        patch: CardPatch,
    ) -> Result<(), SyncError> {
        patch.validate()?;
        let Some(card) = store.get(locator).iter().find(|card| &card.id == card_id) else {
            return Err(card_missing(locator, card_id));
        };
        if patch.is_empty() {
            return Ok(());
        }
        let undo = patch.undo_for(card);
        store.update(locator, card_id, &patch);
        debug!("event=card_update module=sync status=queued card_id={card_id}");
        self.enqueue(card_id.clone(), PendingOp::Update { patch, undo });
        Ok(())
    }

    /// Queues the final position of a drag session.
    ///
    /// The store already shows `to` from live moves; a failure restores `from`.
    pub fn commit_position(
        &mut self,
        store: &mut CardStore,
        locator: &Locator,
        card_id: &CardId,
        to: Position,
        from: Position,
    ) -> Result<(), SyncError> {
        let patch = CardPatch::default().position(to);
        patch.validate()?;
        if !store.update(locator, card_id, &patch) {
            return Err(card_missing(locator, card_id));
        }
        debug!("event=card_move module=sync status=queued card_id={card_id}");
        let undo = CardPatch::default().position(from);
        self.enqueue(card_id.clone(), PendingOp::Update { patch, undo });
        Ok(())
    }

    /// Removes the card locally and queues its delete.
    pub fn delete_card(
        &mut self,
        store: &mut CardStore,
        locator: &Locator,
        card_id: &CardId,
    ) -> Result<(), SyncError> {
        let Some((index, card)) = store.remove(locator, card_id) else {
            return Err(card_missing(locator, card_id));
        };
        info!("event=card_delete module=sync status=queued card_id={card_id}");
        let removed = RemovedCard {
            locator: locator.clone(),
            index,
            card,
        };
        if self.enqueue(card_id.clone(), PendingOp::Delete { removed }) {
            store.prune_subtree(card_id);
            let mut dropped = Vec::new();
            self.abandon_children(store, card_id, "parent card was deleted", &mut dropped);
        }
        Ok(())
    }

    /// Moves every dispatchable queued write in flight.
    pub fn poll_commands(&mut self) -> Vec<RepoCommand> {
        let mut commands = Vec::new();
        let mut waiting = VecDeque::new();

        while let Some(key) = self.order.pop_front() {
            let Some(slot) = self.slots.get_mut(&key) else {
                continue;
            };
            if slot.queued.is_none() {
                continue;
            }
            if slot.in_flight.is_some() {
                waiting.push_back(key);
                continue;
            }

            if let Some(PendingOp::Create { draft }) = &mut slot.queued {
                match resolve_parent(&self.resolved, draft.parent_id.as_ref()) {
                    Some(parent_id) => draft.parent_id = parent_id,
                    None => {
                        waiting.push_back(key);
                        continue;
                    }
                }
            }

            let Some(op) = slot.queued.take() else {
                continue;
            };
            self.next_ticket += 1;
            let ticket = Ticket(self.next_ticket);
            slot.in_flight = Some(ticket);

            let command = match &op {
                PendingOp::Create { draft } => RepoCommand::Create {
                    ticket,
                    local_id: key.clone(),
                    draft: draft.clone(),
                },
                PendingOp::Update { patch, .. } => RepoCommand::Update {
                    ticket,
                    id: key.clone(),
                    patch: patch.clone(),
                },
                PendingOp::Delete { .. } => RepoCommand::Delete {
                    ticket,
                    id: key.clone(),
                },
            };
            info!(
                "event=sync_dispatch module=sync status=start op={} card_id={key} ticket={ticket}",
                op.kind()
            );
            self.in_flight.insert(ticket, InFlight { key, op });
            commands.push(command);
        }

        self.order = waiting;
        self.prune_resolved();
        commands
    }

    /// Reconciles one repository outcome into the store.
    pub fn complete(
        &mut self,
        store: &mut CardStore,
        ticket: Ticket,
        result: RepoResult<RepoReply>,
    ) -> Vec<SyncEvent> {
        let Some(InFlight { key, op }) = self.in_flight.remove(&ticket) else {
            warn!("event=sync_complete module=sync status=skipped reason=unknown_ticket ticket={ticket}");
            return Vec::new();
        };
        if let Some(slot) = self.slots.get_mut(&key) {
            slot.in_flight = None;
        }

        let mut events = Vec::new();
        let kind = op.kind();
        let settled_key = match (op, result) {
            (PendingOp::Create { .. }, Ok(RepoReply::Created(card))) => {
                self.confirm_create(store, &key, card, &mut events)
            }
            (PendingOp::Update { patch, .. }, Ok(RepoReply::Updated(card))) => {
                self.confirm_update(store, &key, &patch, &card);
                events.push(SyncEvent::Confirmed {
                    id: key.clone(),
                    kind,
                });
                key
            }
            (PendingOp::Delete { .. }, Ok(RepoReply::Deleted)) => {
                store.prune_subtree(&key);
                events.push(SyncEvent::Confirmed {
                    id: key.clone(),
                    kind,
                });
                key
            }
            (op, Ok(reply)) => {
                let error = RepoError::InvalidData(format!("unexpected {kind} reply: {reply:?}"));
                self.rollback(store, &key, op, &error, &mut events);
                key
            }
            (op, Err(error)) => {
                self.rollback(store, &key, op, &error, &mut events);
                key
            }
        };

        if events
            .iter()
            .any(|event| matches!(event, SyncEvent::RolledBack { .. }))
        {
            warn!("event=sync_complete module=sync status=error op={kind} card_id={settled_key} ticket={ticket}");
        } else {
            info!("event=sync_complete module=sync status=ok op={kind} card_id={settled_key} ticket={ticket}");
        }
        self.release(&settled_key);
        self.prune_resolved();
        events
    }

    /// Drains every command synchronously against `repo`.
    pub fn flush<R: CardRepository + ?Sized>(
        &mut self,
        store: &mut CardStore,
        repo: &R,
    ) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        loop {
            let commands = self.poll_commands();
            if commands.is_empty() {
                break;
            }
            for command in commands {
                let result = command.execute(repo);
                events.extend(self.complete(store, command.ticket(), result));
            }
        }
        events
    }

    /// Whether the card has a write queued or in flight.
    pub fn has_pending(&self, card_id: &CardId) -> bool {
        self.slots.contains_key(card_id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn queued_count(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| slot.queued.is_some())
            .count()
    }

    pub fn is_idle(&self) -> bool {
        self.slots.is_empty() && self.in_flight.is_empty()
    }

    /// Forgets every queued and in-flight write without touching the store.
    ///
    /// Tickets handed out before the call become unknown, so their
    /// completions are ignored. Ticket numbers keep increasing.
    pub fn discard_local_state(&mut self) {
        let dropped = self.slots.len() + self.in_flight.len();
        self.slots.clear();
        self.in_flight.clear();
        self.order.clear();
        self.resolved.clear();
        info!("event=sync_discard module=sync status=ok dropped={dropped}");
    }

    /// Queues `op` behind any in-flight write; returns true when it cancelled an unsent create.
    fn enqueue(&mut self, key: CardId, op: PendingOp) -> bool {
        let slot = self.slots.entry(key.clone()).or_default();
        let merged = match slot.queued.take() {
            Some(existing) => existing.supersede(op),
            None => Merge::Queued(op),
        };
        match merged {
            Merge::Queued(op) => {
                slot.queued = Some(op);
                if !self.order.contains(&key) {
                    self.order.push_back(key);
                }
                false
            }
            Merge::Cancelled => {
                if slot.is_empty() {
                    self.slots.remove(&key);
                }
                self.order.retain(|queued| queued != &key);
                info!("event=card_create module=sync status=cancelled card_id={key}");
                true
            }
        }
    }

    fn confirm_create(
        &mut self,
        store: &mut CardStore,
        local_id: &CardId,
        server_card: Card,
        events: &mut Vec<SyncEvent>,
    ) -> CardId {
        let server_id = server_card.id.clone();
        self.resolved.insert(local_id.clone(), server_id.clone());

        let mut shown = server_card.clone();
        let mut slot = self.slots.remove(local_id).unwrap_or_default();
        match &mut slot.queued {
            Some(PendingOp::Update { patch, undo }) => {
                *undo = patch.project(&server_card);
                patch.apply_to(&mut shown);
            }
            Some(PendingOp::Delete { removed }) => {
                removed.card = server_card;
                removed.locator = self.resolve_locator(&removed.locator);
            }
            _ => {}
        }
        if !store.rekey(local_id, shown) {
            debug!("event=card_create module=sync status=stale card_id={local_id}");
        }

        if !slot.is_empty() {
            self.slots.insert(server_id.clone(), slot);
            for queued in self.order.iter_mut().filter(|queued| *queued == local_id) {
                *queued = server_id.clone();
            }
        }
        events.push(SyncEvent::Rekeyed {
            local_id: local_id.clone(),
            server_id: server_id.clone(),
        });
        events.push(SyncEvent::Confirmed {
            id: server_id.clone(),
            kind: OpKind::Create,
        });
        server_id
    }

    fn confirm_update(
        &mut self,
        store: &mut CardStore,
        card_id: &CardId,
        sent: &CardPatch,
        server_card: &Card,
    ) {
        let mut confirmed = sent.project(server_card);
        if let Some(slot) = self.slots.get_mut(card_id) {
            match &mut slot.queued {
                Some(PendingOp::Update { patch, undo }) => {
                    undo.rebase_shared(&confirmed);
                    confirmed = confirmed.without_fields_of(patch);
                }
                Some(PendingOp::Delete { removed }) => {
                    confirmed.apply_to(&mut removed.card);
                    return;
                }
                _ => {}
            }
        }
        if confirmed.is_empty() {
            return;
        }
        match store.locate(card_id) {
            Some(locator) => {
                store.update(&locator, card_id, &confirmed);
            }
            None => debug!("event=card_update module=sync status=stale card_id={card_id}"),
        }
    }

    fn rollback(
        &mut self,
        store: &mut CardStore,
        card_id: &CardId,
        op: PendingOp,
        error: &RepoError,
        events: &mut Vec<SyncEvent>,
    ) {
        let kind = op.kind();
        warn!("event=card_{kind} module=sync status=error card_id={card_id} error={error}");
        events.push(SyncEvent::RolledBack {
            id: card_id.clone(),
            kind,
            error: error.to_string(),
        });
        match op {
            PendingOp::Create { .. } => {
                if let Some(locator) = store.locate(card_id) {
                    store.remove(&locator, card_id);
                }
                store.prune_subtree(card_id);
                self.slots.remove(card_id);
                self.order.retain(|queued| queued != card_id);
                self.abandon_children(store, card_id, "parent card was not created", events);
            }
            PendingOp::Update { undo, .. } => {
                let mut revert = undo;
                if let Some(slot) = self.slots.get_mut(card_id) {
                    match &mut slot.queued {
                        Some(PendingOp::Update {
                            patch,
                            undo: queued_undo,
                        }) => {
                            queued_undo.rebase_shared(&revert);
                            revert = revert.without_fields_of(patch);
                        }
                        Some(PendingOp::Delete { removed }) => {
                            revert.apply_to(&mut removed.card);
                            revert = CardPatch::default();
                        }
                        _ => {}
                    }
                }
                if !revert.is_empty() {
                    if let Some(locator) = store.locate(card_id) {
                        store.update(&locator, card_id, &revert);
                    }
                }
            }
            PendingOp::Delete { removed } => {
                let locator = self.resolve_locator(&removed.locator);
                store.insert_at(locator, removed.index, removed.card);
            }
        }
    }

    /// Drops queued creates whose parent will never get a repository id.
    fn abandon_children(
        &mut self,
        store: &mut CardStore,
        parent_id: &CardId,
        reason: &str,
        events: &mut Vec<SyncEvent>,
    ) {
        let orphans: Vec<CardId> = self
            .slots
            .iter()
            .filter(|(_, slot)| {
                matches!(
                    &slot.queued,
                    Some(PendingOp::Create { draft }) if draft.parent_id.as_ref() == Some(parent_id)
                )
            })
            .map(|(key, _)| key.clone())
            .collect();

        for orphan in orphans {
            self.slots.remove(&orphan);
            self.order.retain(|queued| queued != &orphan);
            if let Some(locator) = store.locate(&orphan) {
                store.remove(&locator, &orphan);
            }
            store.prune_subtree(&orphan);
            events.push(SyncEvent::RolledBack {
                id: orphan.clone(),
                kind: OpKind::Create,
                error: reason.to_string(),
            });
            self.abandon_children(store, &orphan, reason, events);
        }
    }

    fn resolve_locator(&self, locator: &Locator) -> Locator {
        match locator {
            Locator::Card(id) => match self.resolved.get(id) {
                Some(server_id) => Locator::Card(server_id.clone()),
                None => locator.clone(),
            },
            Locator::Root => Locator::Root,
        }
    }

    /// Drops provisional ids that no pending write still names as a parent.
    fn prune_resolved(&mut self) {
        if self.resolved.is_empty() {
            return;
        }
        let slots = &self.slots;
        let in_flight = &self.in_flight;
        self.resolved.retain(|local_id, _| {
            slots
                .values()
                .filter_map(|slot| slot.queued.as_ref())
                .chain(in_flight.values().map(|flight| &flight.op))
                .any(|op| op.names_parent(local_id))
        });
    }

    fn release(&mut self, key: &CardId) {
        if self.slots.get(key).is_some_and(WriteSlot::is_empty) {
            self.slots.remove(key);
            self.order.retain(|queued| queued != key);
        }
    }
}

/// Maps a provisional parent id to its repository id.
///
/// Returns `None` while the parent's own create is unconfirmed.
fn resolve_parent(
    resolved: &HashMap<CardId, CardId>,
    parent_id: Option<&CardId>,
) -> Option<Option<CardId>> {
    match parent_id {
        Some(parent_id) if parent_id.is_local() => resolved.get(parent_id).cloned().map(Some),
        other => Some(other.cloned()),
    }
}

fn card_missing(locator: &Locator, card_id: &CardId) -> SyncError {
    if cfg!(debug_assertions) {
        panic!("card {card_id} is not in bucket {locator}");
    }
    warn!("event=sync_precondition module=sync status=error error_code=card_not_found locator={locator} card_id={card_id}");
    SyncError::CardNotFound {
        locator: locator.clone(),
        card_id: card_id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::SyncCoordinator;
    use crate::db::open_db_in_memory;
    use crate::model::card::{CardDraft, Position};
    use crate::repo::sqlite_card_repo::SqliteCardRepository;
    use crate::store::card_store::{CardStore, Locator};

    #[test]
    fn provisional_parent_mapping_is_dropped_once_children_are_sent() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteCardRepository::try_new(&conn).unwrap();
        let mut store = CardStore::new();
        let mut sync = SyncCoordinator::new();

        let parent = sync
            .create_card(&mut store, Locator::Root, CardDraft::new("parent", Position::ORIGIN))
            .unwrap();
        sync.create_card(
            &mut store,
            Locator::Card(parent.id.clone()),
            CardDraft::new("child", Position::ORIGIN).with_parent(Some(parent.id.clone())),
        )
        .unwrap();

        let first = sync.poll_commands();
        assert_eq!(first.len(), 1);
        let result = first[0].execute(&repo);
        sync.complete(&mut store, first[0].ticket(), result);
        assert_eq!(sync.resolved.len(), 1);

        let second = sync.poll_commands();
        assert_eq!(second.len(), 1);
        assert!(sync.resolved.is_empty());
        let result = second[0].execute(&repo);
        sync.complete(&mut store, second[0].ticket(), result);
        assert!(sync.is_idle());
    }

    #[test]
    fn parentless_creates_leave_no_mapping_behind() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteCardRepository::try_new(&conn).unwrap();
        let mut store = CardStore::new();
        let mut sync = SyncCoordinator::new();

        for title in ["a", "b", "c"] {
            sync.create_card(&mut store, Locator::Root, CardDraft::new(title, Position::ORIGIN))
                .unwrap();
        }
        sync.flush(&mut store, &repo);

        assert!(sync.resolved.is_empty());
        assert_eq!(store.get(&Locator::Root).len(), 3);
    }
}
