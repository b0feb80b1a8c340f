use mindcard_core::{
    Card, CardDraft, CardId, CardPatch, CardRepository, CardStore, CardValidationError, Locator,
    OpKind, Position, RepoCommand, RepoError, RepoReply, RepoResult, SyncCoordinator, SyncError,
    SyncEvent,
};
use std::cell::{Cell, RefCell};

/// In-memory repository that can be switched into failing mode.
#[derive(Default)]
struct MemoryRepo {
    cards: RefCell<Vec<Card>>,
    next_id: Cell<u32>,
    failing: Cell<bool>,
    writes: Cell<usize>,
}

impl MemoryRepo {
    fn check(&self) -> RepoResult<()> {
        self.writes.set(self.writes.get() + 1);
        if self.failing.get() {
            return Err(RepoError::Transport("offline".to_string()));
        }
        Ok(())
    }
}

impl CardRepository for MemoryRepo {
    fn list(&self, parent_id: Option<&CardId>) -> RepoResult<Vec<Card>> {
        Ok(self
            .cards
            .borrow()
            .iter()
            .filter(|card| card.parent_id.as_ref() == parent_id)
            .cloned()
            .collect())
    }

    fn create(&self, draft: &CardDraft) -> RepoResult<Card> {
        self.check()?;
        self.next_id.set(self.next_id.get() + 1);
        let card = Card::from_draft(CardId::new(format!("srv-{}", self.next_id.get())), draft);
        self.cards.borrow_mut().push(card.clone());
        Ok(card)
    }

    fn update(&self, id: &CardId, patch: &CardPatch) -> RepoResult<Card> {
        self.check()?;
        let mut cards = self.cards.borrow_mut();
        let card = cards
            .iter_mut()
            .find(|card| &card.id == id)
            .ok_or_else(|| RepoError::NotFound(id.clone()))?;
        patch.apply_to(card);
        Ok(card.clone())
    }

    fn delete(&self, id: &CardId) -> RepoResult<()> {
        self.check()?;
        let mut cards = self.cards.borrow_mut();
        let before = cards.len();
        cards.retain(|card| &card.id != id);
        if cards.len() == before {
            return Err(RepoError::NotFound(id.clone()));
        }
        Ok(())
    }
}

fn card(id: &str, title: &str, position: Position) -> Card {
    Card::from_draft(CardId::from(id), &CardDraft::new(title, position))
}

fn store_with(cards: &[Card]) -> CardStore {
    let mut store = CardStore::new();
    for card in cards {
        store.add(Locator::Root, card.clone());
    }
    store
}

fn shown(store: &CardStore, id: &str) -> Card {
    store.find(&CardId::from(id)).cloned().unwrap()
}

fn server_version(base: &Card, patch: &CardPatch) -> Card {
    let mut card = base.clone();
    patch.apply_to(&mut card);
    card
}

fn moved_to(x: f64) -> CardPatch {
    CardPatch::default().position(Position::new(x, x))
}

fn offline() -> RepoResult<RepoReply> {
    Err(RepoError::Transport("offline".to_string()))
}

#[test]
fn update_is_visible_before_confirmation_and_mirrors_server_fields() {
    let base = card("a", "Draft", Position::ORIGIN);
    let mut store = store_with(&[base.clone()]);
    let mut sync = SyncCoordinator::new();
    let a = CardId::from("a");

    sync.update_card(&mut store, &Locator::Root, &a, CardPatch::default().title("Final"))
        .unwrap();
    assert_eq!(shown(&store, "a").title, "Final");

    let commands = sync.poll_commands();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].kind(), OpKind::Update);

    let mut confirmed = server_version(&base, &CardPatch::default().title("Final (server)"));
    confirmed.updated_at += 5;
    let events = sync.complete(&mut store, commands[0].ticket(), Ok(RepoReply::Updated(confirmed)));

    assert_eq!(events, vec![SyncEvent::Confirmed { id: a, kind: OpKind::Update }]);
    assert_eq!(shown(&store, "a").title, "Final (server)");
    assert!(sync.is_idle());
}

#[test]
fn failed_update_restores_pre_call_values() {
    let base = card("a", "Draft", Position::new(5.0, 5.0));
    let mut store = store_with(&[base]);
    let mut sync = SyncCoordinator::new();
    let a = CardId::from("a");

    let patch = CardPatch::default().title("Final").content("body");
    sync.update_card(&mut store, &Locator::Root, &a, patch).unwrap();
    let ticket = sync.poll_commands()[0].ticket();
    let events = sync.complete(&mut store, ticket, offline());

    let card = shown(&store, "a");
    assert_eq!(card.title, "Draft");
    assert_eq!(card.content, None);
    assert!(matches!(
        &events[..],
        [SyncEvent::RolledBack { id, kind: OpKind::Update, error }] if *id == a && error.contains("offline")
    ));
}

#[test]
fn writes_for_one_card_are_single_flight_and_last_intent_wins() {
    let base = card("a", "A", Position::ORIGIN);
    let mut store = store_with(&[base.clone()]);
    let mut sync = SyncCoordinator::new();
    let a = CardId::from("a");

    sync.update_card(&mut store, &Locator::Root, &a, moved_to(10.0)).unwrap();
    let first = sync.poll_commands();
    assert_eq!(first.len(), 1);

    sync.update_card(&mut store, &Locator::Root, &a, moved_to(20.0)).unwrap();
    sync.update_card(&mut store, &Locator::Root, &a, moved_to(30.0)).unwrap();
    assert!(sync.poll_commands().is_empty(), "second write must wait for the first");
    assert_eq!(sync.queued_count(), 1);

    sync.complete(
        &mut store,
        first[0].ticket(),
        Ok(RepoReply::Updated(server_version(&base, &moved_to(10.0)))),
    );
    assert_eq!(shown(&store, "a").position, Position::new(30.0, 30.0));

    let second = sync.poll_commands();
    let [RepoCommand::Update { ticket, patch, .. }] = &second[..] else {
        panic!("expected one merged update, got {second:?}");
    };
    assert_eq!(patch.position, Some(Position::new(30.0, 30.0)));

    sync.complete(
        &mut store,
        *ticket,
        Ok(RepoReply::Updated(server_version(&base, &moved_to(30.0)))),
    );
    assert_eq!(shown(&store, "a").position, Position::new(30.0, 30.0));
    assert!(sync.is_idle());
}

#[test]
fn completions_may_arrive_out_of_order_across_cards() {
    let a_base = card("a", "A", Position::ORIGIN);
    let b_base = card("b", "B", Position::ORIGIN);
    let mut store = store_with(&[a_base.clone(), b_base.clone()]);
    let mut sync = SyncCoordinator::new();

    sync.update_card(&mut store, &Locator::Root, &CardId::from("a"), CardPatch::default().title("A2"))
        .unwrap();
    sync.update_card(&mut store, &Locator::Root, &CardId::from("b"), CardPatch::default().title("B2"))
        .unwrap();
    let commands = sync.poll_commands();
    assert_eq!(commands.len(), 2);

    let by_id = |id: &str| {
        commands
            .iter()
            .find(|command| command.card_id().as_str() == id)
            .map(RepoCommand::ticket)
            .unwrap()
    };
    sync.complete(
        &mut store,
        by_id("b"),
        Ok(RepoReply::Updated(server_version(&b_base, &CardPatch::default().title("B2")))),
    );
    sync.complete(&mut store, by_id("a"), offline());

    assert_eq!(shown(&store, "a").title, "A");
    assert_eq!(shown(&store, "b").title, "B2");
}

#[test]
fn failed_first_write_keeps_queued_intent_and_rebases_its_undo() {
    let mut store = store_with(&[card("a", "A", Position::ORIGIN)]);
    let mut sync = SyncCoordinator::new();
    let a = CardId::from("a");

    sync.update_card(&mut store, &Locator::Root, &a, moved_to(10.0)).unwrap();
    let first = sync.poll_commands()[0].ticket();
    sync.update_card(&mut store, &Locator::Root, &a, moved_to(20.0)).unwrap();

    sync.complete(&mut store, first, offline());
    assert_eq!(shown(&store, "a").position, Position::new(20.0, 20.0));

    let second = sync.poll_commands()[0].ticket();
    sync.complete(&mut store, second, offline());
    assert_eq!(shown(&store, "a").position, Position::ORIGIN);
}

#[test]
fn created_card_is_rekeyed_to_repository_id() {
    let mut store = CardStore::new();
    let mut sync = SyncCoordinator::new();

    let provisional = sync
        .create_card(&mut store, Locator::Root, CardDraft::new("新卡片", Position::new(40.0, 40.0)))
        .unwrap();
    assert!(provisional.id.is_local());
    assert_eq!(store.get(&Locator::Root).len(), 1);

    let commands = sync.poll_commands();
    let [RepoCommand::Create { ticket, local_id, draft }] = &commands[..] else {
        panic!("expected one create, got {commands:?}");
    };
    assert_eq!(*local_id, provisional.id);

    let server = Card::from_draft(CardId::from("srv-1"), draft);
    let events = sync.complete(&mut store, *ticket, Ok(RepoReply::Created(server)));

    assert!(events.contains(&SyncEvent::Rekeyed {
        local_id: provisional.id.clone(),
        server_id: CardId::from("srv-1"),
    }));
    let root = store.get(&Locator::Root);
    assert_eq!(root.len(), 1);
    assert_eq!(root[0].id, CardId::from("srv-1"));
    assert_eq!(root[0].title, "新卡片");
}

#[test]
fn update_queued_behind_create_is_sent_with_server_id() {
    let mut store = CardStore::new();
    let mut sync = SyncCoordinator::new();
    let provisional = sync
        .create_card(&mut store, Locator::Root, CardDraft::new("draft", Position::ORIGIN))
        .unwrap();
    let create = sync.poll_commands().remove(0);

    sync.update_card(&mut store, &Locator::Root, &provisional.id, CardPatch::default().title("renamed"))
        .unwrap();
    let RepoCommand::Create { ticket, draft, .. } = create else {
        panic!("expected create");
    };
    sync.complete(
        &mut store,
        ticket,
        Ok(RepoReply::Created(Card::from_draft(CardId::from("srv-1"), &draft))),
    );

    assert_eq!(shown(&store, "srv-1").title, "renamed");
    let commands = sync.poll_commands();
    let [RepoCommand::Update { id, patch, .. }] = &commands[..] else {
        panic!("expected one update, got {commands:?}");
    };
    assert_eq!(*id, CardId::from("srv-1"));
    assert_eq!(patch.title.as_deref(), Some("renamed"));
}

#[test]
fn update_folds_into_unsent_create() {
    let mut store = CardStore::new();
    let mut sync = SyncCoordinator::new();
    let provisional = sync
        .create_card(&mut store, Locator::Root, CardDraft::new("draft", Position::ORIGIN))
        .unwrap();

    sync.update_card(&mut store, &Locator::Root, &provisional.id, moved_to(50.0))
        .unwrap();
    let commands = sync.poll_commands();

    let [RepoCommand::Create { draft, .. }] = &commands[..] else {
        panic!("expected one create, got {commands:?}");
    };
    assert_eq!(draft.position, Position::new(50.0, 50.0));
}

#[test]
fn delete_cancels_unsent_create_without_remote_calls() {
    let mut store = CardStore::new();
    let mut sync = SyncCoordinator::new();
    let provisional = sync
        .create_card(&mut store, Locator::Root, CardDraft::new("draft", Position::ORIGIN))
        .unwrap();

    sync.delete_card(&mut store, &Locator::Root, &provisional.id).unwrap();

    assert!(sync.poll_commands().is_empty());
    assert!(store.get(&Locator::Root).is_empty());
    assert!(sync.is_idle());
}

#[test]
fn failed_delete_reinserts_card_at_original_index() {
    let mut store = store_with(&[
        card("a", "A", Position::ORIGIN),
        card("b", "B", Position::ORIGIN),
        card("c", "C", Position::ORIGIN),
    ]);
    let mut sync = SyncCoordinator::new();

    sync.delete_card(&mut store, &Locator::Root, &CardId::from("b")).unwrap();
    assert_eq!(store.get(&Locator::Root).len(), 2);

    let ticket = sync.poll_commands()[0].ticket();
    sync.complete(&mut store, ticket, offline());

    let ids: Vec<&str> = store.get(&Locator::Root).iter().map(|card| card.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

#[test]
fn delete_after_queued_update_restores_confirmed_values_on_failure() {
    let mut store = store_with(&[card("a", "A", Position::ORIGIN)]);
    let mut sync = SyncCoordinator::new();
    let a = CardId::from("a");

    sync.update_card(&mut store, &Locator::Root, &a, moved_to(10.0)).unwrap();
    let first = sync.poll_commands()[0].ticket();
    sync.update_card(&mut store, &Locator::Root, &a, moved_to(20.0)).unwrap();
    sync.delete_card(&mut store, &Locator::Root, &a).unwrap();
    sync.complete(&mut store, first, offline());

    let delete = sync.poll_commands();
    assert_eq!(delete.len(), 1);
    assert_eq!(delete[0].kind(), OpKind::Delete);
    sync.complete(&mut store, delete[0].ticket(), offline());

    assert_eq!(shown(&store, "a").position, Position::ORIGIN);
}

#[test]
fn confirmed_delete_prunes_cached_subtree() {
    let mut store = store_with(&[card("a", "A", Position::ORIGIN)]);
    store.add(Locator::Card(CardId::from("a")), card("a1", "A1", Position::ORIGIN));
    let mut sync = SyncCoordinator::new();

    sync.delete_card(&mut store, &Locator::Root, &CardId::from("a")).unwrap();
    let ticket = sync.poll_commands()[0].ticket();
    sync.complete(&mut store, ticket, Ok(RepoReply::Deleted));

    assert!(!store.contains_bucket(&Locator::Card(CardId::from("a"))));
    assert!(store.is_empty());
}

#[test]
fn child_create_waits_for_parent_id() {
    let mut store = CardStore::new();
    let mut sync = SyncCoordinator::new();
    let parent = sync
        .create_card(&mut store, Locator::Root, CardDraft::new("parent", Position::ORIGIN))
        .unwrap();
    let child = sync
        .create_card(
            &mut store,
            Locator::Card(parent.id.clone()),
            CardDraft::new("child", Position::ORIGIN),
        )
        .unwrap();
    assert_eq!(child.parent_id.as_ref(), Some(&parent.id));

    let commands = sync.poll_commands();
    assert_eq!(commands.len(), 1, "child must wait for the parent");
    let RepoCommand::Create { ticket, draft, .. } = &commands[0] else {
        panic!("expected parent create");
    };
    sync.complete(
        &mut store,
        *ticket,
        Ok(RepoReply::Created(Card::from_draft(CardId::from("srv-p"), draft))),
    );

    let commands = sync.poll_commands();
    let [RepoCommand::Create { draft, .. }] = &commands[..] else {
        panic!("expected child create, got {commands:?}");
    };
    assert_eq!(draft.parent_id, Some(CardId::from("srv-p")));
    assert_eq!(store.get(&Locator::Card(CardId::from("srv-p"))).len(), 1);
}

#[test]
fn failed_parent_create_abandons_queued_children() {
    let mut store = CardStore::new();
    let mut sync = SyncCoordinator::new();
    let parent = sync
        .create_card(&mut store, Locator::Root, CardDraft::new("parent", Position::ORIGIN))
        .unwrap();
    let child = sync
        .create_card(
            &mut store,
            Locator::Card(parent.id.clone()),
            CardDraft::new("child", Position::ORIGIN),
        )
        .unwrap();

    let ticket = sync.poll_commands()[0].ticket();
    let events = sync.complete(&mut store, ticket, offline());

    let rolled_back: Vec<&CardId> = events
        .iter()
        .filter_map(|event| match event {
            SyncEvent::RolledBack { id, kind: OpKind::Create, .. } => Some(id),
            _ => None,
        })
        .collect();
    assert_eq!(rolled_back, vec![&parent.id, &child.id]);
    assert!(store.is_empty());
    assert!(sync.is_idle());
}

#[test]
fn repeated_completion_is_ignored() {
    let base = card("a", "A", Position::ORIGIN);
    let mut store = store_with(&[base.clone()]);
    let mut sync = SyncCoordinator::new();

    sync.update_card(&mut store, &Locator::Root, &CardId::from("a"), CardPatch::default().title("B"))
        .unwrap();
    let ticket = sync.poll_commands()[0].ticket();
    let reply = RepoReply::Updated(server_version(&base, &CardPatch::default().title("B")));

    assert_eq!(sync.complete(&mut store, ticket, Ok(reply.clone())).len(), 1);
    assert!(sync.complete(&mut store, ticket, Ok(reply)).is_empty());
}

#[test]
fn completion_for_card_no_longer_cached_is_absorbed() {
    let base = card("a", "A", Position::ORIGIN);
    let mut store = store_with(&[base.clone()]);
    let mut sync = SyncCoordinator::new();

    sync.update_card(&mut store, &Locator::Root, &CardId::from("a"), moved_to(10.0))
        .unwrap();
    let ticket = sync.poll_commands()[0].ticket();
    store.clear();

    let events = sync.complete(
        &mut store,
        ticket,
        Ok(RepoReply::Updated(server_version(&base, &moved_to(10.0)))),
    );

    assert_eq!(events.len(), 1);
    assert!(store.is_empty());
}

#[test]
fn commit_position_restores_drag_origin_on_failure() {
    let mut store = store_with(&[card("a", "A", Position::new(10.0, 10.0))]);
    let mut sync = SyncCoordinator::new();
    let a = CardId::from("a");
    store.update(&Locator::Root, &a, &moved_to(80.0));

    sync.commit_position(
        &mut store,
        &Locator::Root,
        &a,
        Position::new(80.0, 80.0),
        Position::new(10.0, 10.0),
    )
    .unwrap();
    let ticket = sync.poll_commands()[0].ticket();
    sync.complete(&mut store, ticket, offline());

    assert_eq!(shown(&store, "a").position, Position::new(10.0, 10.0));
}

#[test]
fn invalid_input_is_rejected_before_local_mutation() {
    let mut store = store_with(&[card("a", "A", Position::ORIGIN)]);
    let mut sync = SyncCoordinator::new();
    let before = store.clone();

    let update = sync.update_card(&mut store, &Locator::Root, &CardId::from("a"), CardPatch::default().title("  "));
    let create = sync.create_card(&mut store, Locator::Root, CardDraft::new("ok", Position::new(-1.0, 0.0)));

    assert_eq!(update, Err(SyncError::Invalid(CardValidationError::EmptyTitle)));
    assert!(matches!(create, Err(SyncError::Invalid(CardValidationError::InvalidPosition { .. }))));
    assert_eq!(store, before);
    assert!(sync.is_idle());
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "is not in bucket")]
fn updating_unknown_card_is_a_debug_assertion() {
    let mut store = CardStore::new();
    let mut sync = SyncCoordinator::new();
    let _ = sync.update_card(&mut store, &Locator::Root, &CardId::from("ghost"), moved_to(1.0));
}

#[cfg(not(debug_assertions))]
#[test]
fn updating_unknown_card_returns_error() {
    let mut store = CardStore::new();
    let mut sync = SyncCoordinator::new();

    let err = sync
        .update_card(&mut store, &Locator::Root, &CardId::from("ghost"), moved_to(1.0))
        .unwrap_err();

    assert!(matches!(err, SyncError::CardNotFound { .. }));
    assert!(sync.is_idle());
}

#[test]
fn flush_drains_everything_against_repository() {
    let repo = MemoryRepo::default();
    let mut store = CardStore::new();
    let mut sync = SyncCoordinator::new();

    let parent = sync
        .create_card(&mut store, Locator::Root, CardDraft::new("parent", Position::ORIGIN))
        .unwrap();
    sync.create_card(
        &mut store,
        Locator::Card(parent.id.clone()),
        CardDraft::new("child", Position::ORIGIN),
    )
    .unwrap();
    sync.update_card(&mut store, &Locator::Root, &parent.id, CardPatch::default().title("renamed"))
        .unwrap();

    let events = sync.flush(&mut store, &repo);

    assert!(sync.is_idle());
    assert_eq!(repo.writes.get(), 2, "the update folds into the parent create");
    assert_eq!(events.iter().filter(|event| matches!(event, SyncEvent::Rekeyed { .. })).count(), 2);
    let children = repo.list(Some(&CardId::from("srv-1"))).unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(repo.list(None).unwrap()[0].title, "renamed");
    assert_eq!(store.get(&Locator::Card(CardId::from("srv-1"))).len(), 1);
}

#[test]
fn flush_against_failing_repository_rolls_everything_back() {
    let repo = MemoryRepo::default();
    repo.failing.set(true);
    let mut store = store_with(&[card("a", "A", Position::ORIGIN)]);
    let mut sync = SyncCoordinator::new();

    sync.update_card(&mut store, &Locator::Root, &CardId::from("a"), CardPatch::default().title("B"))
        .unwrap();
    sync.create_card(&mut store, Locator::Root, CardDraft::new("new", Position::ORIGIN))
        .unwrap();

    let events = sync.flush(&mut store, &repo);

    assert_eq!(
        events.iter().filter(|event| matches!(event, SyncEvent::RolledBack { .. })).count(),
        2
    );
    let root = store.get(&Locator::Root);
    assert_eq!(root.len(), 1);
    assert_eq!(root[0].title, "A");
}
