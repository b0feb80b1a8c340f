//! SQLite-backed card repository.
//!
//! # Responsibility
//! - Persist cards and their tags behind the [`CardRepository`] contract.
//! - Keep SQL and ordering details inside the repository boundary.
//!
//! # Invariants
//! - Child listing is deterministic: `sort_order ASC, id ASC`.
//! - Deleting a card deletes its whole subtree (`ON DELETE CASCADE`).
//! - Write paths validate input before touching SQL.

use crate::db::ensure_schema;
use crate::model::card::{Card, CardDraft, CardId, CardPatch, Position};
use crate::repo::card_repo::{CardRepository, RepoError, RepoResult};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::collections::BTreeSet;
use uuid::Uuid;

const CARD_SELECT_SQL: &str = "SELECT
    id,
    parent_id,
    title,
    content,
    pos_x,
    pos_y,
    created_at,
    updated_at
FROM cards";

/// Card repository over a migrated SQLite connection.
pub struct SqliteCardRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteCardRepository<'conn> {
    /// Wraps a connection after checking it carries the current card schema.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_card_connection_ready(conn)?;
        Ok(Self { conn })
    }

    /// Loads one card by id.
    pub fn get(&self, id: &CardId) -> RepoResult<Option<Card>> {
        load_card(self.conn, id)
    }
}

impl CardRepository for SqliteCardRepository<'_> {
    fn list(&self, parent_id: Option<&CardId>) -> RepoResult<Vec<Card>> {
        let sql = format!(
            "{CARD_SELECT_SQL}
             WHERE parent_id IS ?1
             ORDER BY sort_order ASC, id ASC;"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([parent_id.map(CardId::as_str)])?;

        let mut cards = Vec::new();
        while let Some(row) = rows.next()? {
            cards.push(parse_card_row(row)?);
        }
        for card in &mut cards {
            card.tags = load_tags(self.conn, &card.id)?;
        }
        debug!(
            "event=card_list module=repo status=ok parent={} count={}",
            parent_id.map_or("root", CardId::as_str),
            cards.len()
        );
        Ok(cards)
    }

    fn create(&self, draft: &CardDraft) -> RepoResult<Card> {
        draft.validate()?;
        if let Some(parent_id) = &draft.parent_id {
            if !card_exists(self.conn, parent_id)? {
                return Err(RepoError::NotFound(parent_id.clone()));
            }
        }

        let id = CardId::new(Uuid::new_v4().to_string());
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let sort_order = next_sort_order(&tx, draft.parent_id.as_ref())?;
        tx.execute(
            "INSERT INTO cards (
                id,
                parent_id,
                title,
                content,
                pos_x,
                pos_y,
                sort_order
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                id.as_str(),
                draft.parent_id.as_ref().map(CardId::as_str),
                draft.title.trim(),
                draft.content.as_deref(),
                draft.position.x,
                draft.position.y,
                sort_order,
            ],
        )?;
        replace_tags(&tx, &id, &draft.tags)?;
        tx.commit()?;

        info!("event=card_create module=repo status=ok card_id={id}");
        load_required_card(self.conn, &id)
    }

    fn update(&self, id: &CardId, patch: &CardPatch) -> RepoResult<Card> {
        patch.validate()?;
        let mut card = load_required_card(self.conn, id)?;
        patch.apply_to(&mut card);

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "UPDATE cards
             SET title = ?2,
                 content = ?3,
                 pos_x = ?4,
                 pos_y = ?5,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![
                id.as_str(),
                card.title.trim(),
                card.content.as_deref(),
                card.position.x,
                card.position.y,
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(id.clone()));
        }
        if let Some(tags) = &patch.tags {
            replace_tags(&tx, id, tags)?;
        }
        tx.commit()?;

        load_required_card(self.conn, id)
    }

    fn delete(&self, id: &CardId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM cards WHERE id = ?1;", [id.as_str()])?;
        if changed == 0 {
            return Err(RepoError::NotFound(id.clone()));
        }
        info!("event=card_delete module=repo status=ok card_id={id}");
        Ok(())
    }
}

fn load_card(conn: &Connection, id: &CardId) -> RepoResult<Option<Card>> {
    let card = conn
        .query_row(
            &format!("{CARD_SELECT_SQL} WHERE id = ?1;"),
            [id.as_str()],
            |row| Ok(parse_card_row(row)),
        )
        .optional()?
        .transpose()?;
    match card {
        Some(mut card) => {
            card.tags = load_tags(conn, &card.id)?;
            Ok(Some(card))
        }
        None => Ok(None),
    }
}

fn load_required_card(conn: &Connection, id: &CardId) -> RepoResult<Card> {
    load_card(conn, id)?.ok_or_else(|| RepoError::NotFound(id.clone()))
}

fn card_exists(conn: &Connection, id: &CardId) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM cards WHERE id = ?1);",
        [id.as_str()],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn next_sort_order(conn: &Connection, parent_id: Option<&CardId>) -> RepoResult<i64> {
    let next = conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1
         FROM cards
         WHERE parent_id IS ?1;",
        [parent_id.map(CardId::as_str)],
        |row| row.get(0),
    )?;
    Ok(next)
}

fn load_tags(conn: &Connection, id: &CardId) -> RepoResult<BTreeSet<String>> {
    let mut stmt = conn.prepare("SELECT tag FROM card_tags WHERE card_id = ?1 ORDER BY tag ASC;")?;
    let mut rows = stmt.query([id.as_str()])?;
    let mut tags = BTreeSet::new();
    while let Some(row) = rows.next()? {
        tags.insert(row.get::<_, String>(0)?);
    }
    Ok(tags)
}

fn replace_tags(conn: &Connection, id: &CardId, tags: &BTreeSet<String>) -> RepoResult<()> {
    conn.execute("DELETE FROM card_tags WHERE card_id = ?1;", [id.as_str()])?;
    for tag in tags.iter().map(|tag| tag.trim()).filter(|tag| !tag.is_empty()) {
        conn.execute(
            "INSERT OR IGNORE INTO card_tags (card_id, tag) VALUES (?1, ?2);",
            params![id.as_str(), tag],
        )?;
    }
    Ok(())
}

fn parse_card_row(row: &Row<'_>) -> RepoResult<Card> {
    let position = Position::new(row.get("pos_x")?, row.get("pos_y")?);
    let card = Card {
        id: CardId::new(row.get::<_, String>("id")?),
        title: row.get("title")?,
        content: row.get("content")?,
        position,
        parent_id: row.get::<_, Option<String>>("parent_id")?.map(CardId::new),
        tags: BTreeSet::new(),
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    };
    card.validate().map_err(|err| {
        RepoError::InvalidData(format!("card `{}` failed validation: {err}", card.id))
    })?;
    Ok(card)
}

fn ensure_card_connection_ready(conn: &Connection) -> RepoResult<()> {
    ensure_schema(conn, &["cards", "card_tags"])?;
    Ok(())
}
