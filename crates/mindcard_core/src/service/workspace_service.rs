//! Card workspace use-case service.
//!
//! # Responsibility
//! - Own the card store, breadcrumb path, drag engine and sync coordinator.
//! - Expose the gestures and commands a canvas host forwards from the UI.
//! - Turn rolled-back writes into transient notices.
//!
//! # Invariants
//! - All mutations target the bucket of the current locator.
//! - A drag session produces at most one repository write.
//! - The repository is injected; nothing here knows about transport.

use crate::config::WorkspaceConfig;
use crate::layout::drag::{DragEngine, PointerTarget};
use crate::model::card::{Card, CardDraft, CardId, CardPatch, Position, Size};
use crate::navigation::breadcrumb::{BackTarget, Crumb, NavigationController, NavigationError};
use crate::repo::card_repo::{CardRepository, RepoError, RepoResult};
use crate::search::filter::filter;
use crate::store::card_store::{CardStore, Locator};
use crate::sync::{OpKind, RepoCommand, RepoReply, SyncCoordinator, SyncError, SyncEvent, Ticket};
use log::{debug, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type WorkspaceResult<T> = Result<T, WorkspaceError>;

#[derive(Debug)]
pub enum WorkspaceError {
    Repo(RepoError),
    Navigation(NavigationError),
    Sync(SyncError),
    /// The card is not part of the currently shown bucket.
    CardNotInView(CardId),
    /// The repository rejected a write that was already shown locally.
    Rejected { card_id: CardId, message: String },
}

impl Display for WorkspaceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Repo(err) => write!(f, "{err}"),
            Self::Navigation(err) => write!(f, "{err}"),
            Self::Sync(err) => write!(f, "{err}"),
            Self::CardNotInView(id) => write!(f, "card {id} is not in the current view"),
            Self::Rejected { card_id, message } => {
                write!(f, "write for card {card_id} was rejected: {message}")
            }
        }
    }
}

impl Error for WorkspaceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::Navigation(err) => Some(err),
            Self::Sync(err) => Some(err),
            Self::CardNotInView(_) | Self::Rejected { .. } => None,
        }
    }
}

impl From<RepoError> for WorkspaceError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<NavigationError> for WorkspaceError {
    fn from(value: NavigationError) -> Self {
        Self::Navigation(value)
    }
}

impl From<SyncError> for WorkspaceError {
    fn from(value: SyncError) -> Self {
        Self::Sync(value)
    }
}

/// Transient error notification for the host to display once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// `None` for failures not tied to a single card, such as loading.
    pub card_id: Option<CardId>,
    pub message: String,
}

/// Host-facing card workspace over an injected repository.
pub struct Workspace<R: CardRepository> {
    repo: R,
    config: WorkspaceConfig,
    store: CardStore,
    navigation: NavigationController,
    drag: DragEngine,
    sync: SyncCoordinator,
    search_query: String,
    is_loading: bool,
    notices: Vec<Notice>,
    spawn_count: u32,
}

impl<R: CardRepository> Workspace<R> {
    pub fn new(repo: R, config: WorkspaceConfig) -> Self {
        let drag = DragEngine::new(config.container, config.card);
        Self {
            repo,
            config,
            store: CardStore::new(),
            navigation: NavigationController::new(),
            drag,
            sync: SyncCoordinator::new(),
            search_query: String::new(),
            is_loading: false,
            notices: Vec::new(),
            spawn_count: 0,
        }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    pub fn store(&self) -> &CardStore {
        &self.store
    }

    pub fn drag(&self) -> &DragEngine {
        &self.drag
    }

    pub fn sync(&self) -> &SyncCoordinator {
        &self.sync
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn current_locator(&self) -> Locator {
        self.navigation.current_locator()
    }

    pub fn path(&self) -> &[CardId] {
        self.navigation.path()
    }

    /// Fetches the children of the current locator into the store.
    ///
    /// Cards with writes still pending keep their local state. On failure
    /// the store is left untouched and a notice is queued.
    pub fn load_current(&mut self) -> WorkspaceResult<()> {
        let locator = self.current_locator();
        if locator.parent_id().is_some_and(CardId::is_local) {
            debug!("event=workspace_load module=service status=skipped reason=provisional_parent locator={locator}");
            return Ok(());
        }

        self.is_loading = true;
        let fetched = self.repo.list(locator.parent_id());
        self.is_loading = false;

        match fetched {
            Ok(cards) => {
                let cards = self.keep_pending(&locator, cards);
                info!(
                    "event=workspace_load module=service status=ok locator={locator} count={}",
                    cards.len()
                );
                self.store.load(locator, cards);
                Ok(())
            }
            Err(err) => {
                warn!("event=workspace_load module=service status=error locator={locator} error={err}");
                self.notices.push(Notice {
                    card_id: None,
                    message: format!("failed to load cards: {err}"),
                });
                Err(err.into())
            }
        }
    }

    pub fn current_cards(&self) -> &[Card] {
        self.store.get(&self.current_locator())
    }

    /// Current bucket narrowed by the search query, in bucket order.
    pub fn visible_cards(&self) -> Vec<&Card> {
        filter(self.current_cards(), &self.search_query)
    }

    pub fn breadcrumbs(&self) -> Vec<Crumb> {
        self.navigation.breadcrumbs(&self.store)
    }

    /// Label of the implicit root crumb preceding [`Self::breadcrumbs`].
    pub fn root_label(&self) -> &str {
        &self.config.root_label
    }

    /// Root label followed by each crumb's title, or its id once uncached.
    pub fn breadcrumb_labels(&self) -> Vec<String> {
        std::iter::once(self.config.root_label.clone())
            .chain(
                self.breadcrumbs()
                    .into_iter()
                    .map(|crumb| crumb.title.unwrap_or_else(|| crumb.id.to_string())),
            )
            .collect()
    }

    pub fn set_search_query(&mut self, query: impl Into<String>) {
        self.search_query = query.into();
    }

    pub fn search_query(&self) -> &str {
        &self.search_query
    }

    /// Opens a card of the current bucket as the new container.
    pub fn enter(&mut self, card_id: &CardId) -> WorkspaceResult<()> {
        self.locator_in_view(card_id)?;
        self.cancel_drag();
        self.navigation.enter_id(card_id.clone());
        info!(
            "event=nav_enter module=service status=ok card_id={card_id} depth={}",
            self.navigation.depth()
        );
        self.load_current()
    }

    pub fn back(&mut self, target: BackTarget) -> WorkspaceResult<()> {
        self.cancel_drag();
        self.navigation.back(target)?;
        info!(
            "event=nav_back module=service status=ok depth={}",
            self.navigation.depth()
        );
        self.load_current()
    }

    /// Creates a card in the current bucket.
    ///
    /// Without `position` the card lands on the next cascade point of the
    /// configured spawn area. Returns the confirmed card once flushed, or
    /// the provisional one when the host drives the transport.
    pub fn create_card(
        &mut self,
        title: impl Into<String>,
        content: Option<String>,
        position: Option<Position>,
    ) -> WorkspaceResult<Card> {
        let position = match position {
            Some(position) => position,
            None => self.next_spawn_point(),
        };
        let mut draft = CardDraft::new(title, position);
        draft.content = content;

        let locator = self.current_locator();
        let card = self.sync.create_card(&mut self.store, locator, draft)?;
        match self.settle(&card.id)? {
            Some(id) => Ok(self.store.find(&id).cloned().unwrap_or(card)),
            None => Ok(card),
        }
    }

    /// Creates a card titled with the configured default title.
    pub fn create_default_card(&mut self) -> WorkspaceResult<Card> {
        let title = self.config.default_title.clone();
        self.create_card(title, None, None)
    }

    pub fn update_card(&mut self, card_id: &CardId, patch: CardPatch) -> WorkspaceResult<()> {
        let locator = self.locator_in_view(card_id)?;
        self.sync
            .update_card(&mut self.store, &locator, card_id, patch)?;
        self.settle(card_id).map(|_| ())
    }

    pub fn delete_card(&mut self, card_id: &CardId) -> WorkspaceResult<()> {
        let locator = self.locator_in_view(card_id)?;
        if self.drag.dragged_card() == Some(card_id) {
            self.drag.cancel();
        }
        self.sync.delete_card(&mut self.store, &locator, card_id)?;
        self.settle(card_id).map(|_| ())
    }

    /// Starts a drag when the pointer lands on the body of a visible card.
    pub fn pointer_down(&mut self, target: &PointerTarget, pointer: Position) -> bool {
        let origin = match target {
            PointerTarget::CardBody(card_id) => {
                match self.current_cards().iter().find(|card| &card.id == card_id) {
                    Some(card) => card.position,
                    None => return false,
                }
            }
            PointerTarget::EmbeddedControl(_) | PointerTarget::Canvas => return false,
        };
        self.drag.pointer_down(target, pointer, origin)
    }

    /// Moves the dragged card locally; returns the applied position.
    pub fn pointer_move(&mut self, pointer: Position) -> Option<Position> {
        let moved = self.drag.pointer_move(pointer)?;
        let locator = self.current_locator();
        let patch = CardPatch::default().position(moved.position);
        self.store.update(&locator, &moved.card_id, &patch);
        Some(moved.position)
    }

    /// Ends the drag and persists the final position once.
    pub fn pointer_up(&mut self) -> WorkspaceResult<()> {
        let Some(commit) = self.drag.pointer_up() else {
            return Ok(());
        };
        let locator = self.current_locator();
        if !self
            .store
            .get(&locator)
            .iter()
            .any(|card| card.id == commit.card_id)
        {
            debug!(
                "event=drag_commit module=service status=skipped reason=card_gone card_id={}",
                commit.card_id
            );
            return Ok(());
        }
        self.sync.commit_position(
            &mut self.store,
            &locator,
            &commit.card_id,
            commit.to,
            commit.from,
        )?;
        self.settle(&commit.card_id).map(|_| ())
    }

    pub fn pointer_leave(&mut self) -> WorkspaceResult<()> {
        self.pointer_up()
    }

    /// Creates a default card centered on a double-click over empty canvas.
    pub fn double_click(
        &mut self,
        target: &PointerTarget,
        pointer: Position,
    ) -> WorkspaceResult<Option<Card>> {
        let Some(position) = self.drag.double_click(target, pointer) else {
            return Ok(None);
        };
        let title = self.config.default_title.clone();
        self.create_card(title, None, Some(position)).map(Some)
    }

    /// Abandons the drag and puts the card back where it started.
    pub fn cancel_drag(&mut self) {
        if let Some(restore) = self.drag.cancel() {
            let locator = self.current_locator();
            let patch = CardPatch::default().position(restore.position);
            self.store.update(&locator, &restore.card_id, &patch);
        }
    }

    pub fn resize_container(&mut self, container: Size) {
        self.drag.resize(container);
    }

    /// Runs every pending command against the injected repository.
    pub fn flush(&mut self) -> Vec<SyncEvent> {
        let events = self.sync.flush(&mut self.store, &self.repo);
        self.absorb(&events);
        events
    }

    /// Hands pending commands to a host-driven transport.
    pub fn poll_commands(&mut self) -> Vec<RepoCommand> {
        self.sync.poll_commands()
    }

    /// Feeds back the outcome of a command from [`Self::poll_commands`].
    pub fn complete(&mut self, ticket: Ticket, result: RepoResult<RepoReply>) -> Vec<SyncEvent> {
        let events = self.sync.complete(&mut self.store, ticket, result);
        self.absorb(&events);
        events
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Drops every cached card, the breadcrumb path and the search query.
    ///
    /// Pending writes are forgotten locally; completions for tickets handed
    /// out earlier are ignored.
    pub fn clear(&mut self) {
        self.drag.cancel();
        self.sync.discard_local_state();
        self.store.clear();
        self.navigation.reset();
        self.search_query.clear();
        self.spawn_count = 0;
        info!("event=workspace_clear module=service status=ok");
    }

    fn locator_in_view(&self, card_id: &CardId) -> WorkspaceResult<Locator> {
        let locator = self.current_locator();
        if self.store.get(&locator).iter().any(|card| &card.id == card_id) {
            Ok(locator)
        } else {
            Err(WorkspaceError::CardNotInView(card_id.clone()))
        }
    }

    /// Flushes when configured to; returns the card's id after any rekey.
    fn settle(&mut self, card_id: &CardId) -> WorkspaceResult<Option<CardId>> {
        if !self.config.auto_flush {
            return Ok(None);
        }
        let mut current = card_id.clone();
        for event in self.flush() {
            match event {
                SyncEvent::Rekeyed {
                    local_id,
                    server_id,
                } if local_id == current => current = server_id,
                SyncEvent::RolledBack { id, error, .. } if id == current => {
                    return Err(WorkspaceError::Rejected {
                        card_id: id,
                        message: error,
                    });
                }
                _ => {}
            }
        }
        Ok(Some(current))
    }

    fn absorb(&mut self, events: &[SyncEvent]) {
        for event in events {
            match event {
                SyncEvent::Rekeyed {
                    local_id,
                    server_id,
                } => {
                    self.navigation.rekey(local_id, server_id);
                    self.drag.rekey(local_id, server_id);
                }
                SyncEvent::RolledBack { id, kind, error } => {
                    if *kind == OpKind::Create {
                        self.navigation.forget(id);
                    }
                    self.notices.push(Notice {
                        card_id: Some(id.clone()),
                        message: format!("failed to {kind} card: {error}"),
                    });
                }
                SyncEvent::Confirmed { .. } => {}
            }
        }
    }

    /// Keeps local versions of cards whose writes are still pending.
    fn keep_pending(&self, locator: &Locator, fetched: Vec<Card>) -> Vec<Card> {
        let previous = self.store.get(locator);
        let mut cards: Vec<Card> = fetched
            .into_iter()
            .filter_map(|card| {
                if !self.sync.has_pending(&card.id) {
                    return Some(card);
                }
                // Pending delete: the card is already gone locally.
                previous.iter().find(|local| local.id == card.id).cloned()
            })
            .collect();
        for local in previous {
            if self.sync.has_pending(&local.id) && !cards.iter().any(|card| card.id == local.id) {
                cards.push(local.clone());
            }
        }
        cards
    }

    fn next_spawn_point(&mut self) -> Position {
        let offset = self.config.spawn_step * f64::from(self.spawn_count);
        self.spawn_count = self.spawn_count.wrapping_add(1);
        let area = self.config.spawn_area;
        let wrap = |extent: f64| if extent > 0.0 { offset % extent } else { 0.0 };
        self.drag
            .clamp(Position::new(wrap(area.width), wrap(area.height)))
    }
}
