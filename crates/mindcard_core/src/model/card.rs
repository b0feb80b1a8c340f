//! Card domain model.
//!
//! # Responsibility
//! - Define the canonical card record rendered by the workspace canvas.
//! - Provide create/patch shapes for repository and store mutations.
//!
//! # Invariants
//! - `id` is stable; a local id is only ever replaced by its server id.
//! - `title` is non-empty after trim.
//! - `position` is container-local, finite and non-negative.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

const LOCAL_ID_PREFIX: &str = "local-";

/// Stable card identifier.
///
/// Server-assigned ids are opaque strings. Ids minted on the optimistic create
/// path carry the `local-` prefix until the repository confirms the card.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardId(String);

impl CardId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Mints a provisional id for a card not yet confirmed by the repository.
    pub fn local() -> Self {
        Self(format!("{LOCAL_ID_PREFIX}{}", Uuid::new_v4()))
    }

    pub fn is_local(&self) -> bool {
        self.0.starts_with(LOCAL_ID_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CardId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CardId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CardId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Container-local coordinates in canvas pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub const ORIGIN: Position = Position { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Returns `self - other` per axis.
    pub fn offset_from(self, other: Position) -> Position {
        Position::new(self.x - other.x, self.y - other.y)
    }

    pub fn is_valid(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.x >= 0.0 && self.y >= 0.0
    }
}

/// Width/height pair used for container and card footprints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Validation failures for card input.
#[derive(Debug, Clone, PartialEq)]
pub enum CardValidationError {
    /// Title is blank after trim.
    EmptyTitle,
    /// Position is negative or not finite.
    InvalidPosition { x: f64, y: f64 },
}

impl Display for CardValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyTitle => write!(f, "card title must not be blank"),
            Self::InvalidPosition { x, y } => {
                write!(f, "card position must be finite and non-negative, got ({x}, {y})")
            }
        }
    }
}

impl Error for CardValidationError {}

/// Canonical card record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: CardId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub position: Position,
    /// `None` means the card lives in the root bucket.
    #[serde(default)]
    pub parent_id: Option<CardId>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    /// Unix epoch milliseconds, refreshed on every applied mutation.
    pub updated_at: i64,
}

impl Card {
    /// Materializes a draft under the given id, stamping both timestamps with now.
    pub fn from_draft(id: CardId, draft: &CardDraft) -> Self {
        let now = now_epoch_ms();
        Self {
            id,
            title: draft.title.clone(),
            content: draft.content.clone(),
            position: draft.position,
            parent_id: draft.parent_id.clone(),
            tags: draft.tags.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), CardValidationError> {
        validate_title(&self.title)?;
        validate_position(self.position)
    }
}

/// Field set for creating a card. The repository assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardDraft {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<CardId>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl CardDraft {
    pub fn new(title: impl Into<String>, position: Position) -> Self {
        Self {
            title: title.into(),
            content: None,
            position,
            parent_id: None,
            tags: BTreeSet::new(),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_parent(mut self, parent_id: Option<CardId>) -> Self {
        self.parent_id = parent_id;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> Result<(), CardValidationError> {
        validate_title(&self.title)?;
        validate_position(self.position)
    }

    /// Folds a patch into a draft that has not been sent yet.
    pub fn absorb(&mut self, patch: &CardPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(content) = &patch.content {
            self.content = content.clone();
        }
        if let Some(position) = patch.position {
            self.position = position;
        }
        if let Some(tags) = &patch.tags {
            self.tags = tags.clone();
        }
    }
}

/// Partial card update. `None` fields are left untouched.
///
/// `content` is doubly optional: `Some(None)` clears the content, which undo
/// patches need when the card had no content before the edit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "explicit_null"
    )]
    pub content: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeSet<String>>,
}

/// Keeps a present `null` apart from an absent field: `null` becomes `Some(None)`.
fn explicit_null<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

impl CardPatch {
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(Some(content.into()));
        self
    }

    pub fn clear_content(mut self) -> Self {
        self.content = Some(None);
        self
    }

    pub fn position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none() && self.position.is_none() && self.tags.is_none()
    }

    pub fn validate(&self) -> Result<(), CardValidationError> {
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        if let Some(position) = self.position {
            validate_position(position)?;
        }
        Ok(())
    }

    /// Writes the touched fields into `card`. Timestamps are the caller's concern.
    pub fn apply_to(&self, card: &mut Card) {
        if let Some(title) = &self.title {
            card.title = title.clone();
        }
        if let Some(content) = &self.content {
            card.content = content.clone();
        }
        if let Some(position) = self.position {
            card.position = position;
        }
        if let Some(tags) = &self.tags {
            card.tags = tags.clone();
        }
    }

    /// Captures the current values of the fields this patch touches.
    pub fn undo_for(&self, card: &Card) -> CardPatch {
        self.project(card)
    }

    /// Reads the fields this patch touches out of `card`.
    pub fn project(&self, card: &Card) -> CardPatch {
        CardPatch {
            title: self.title.as_ref().map(|_| card.title.clone()),
            content: self.content.as_ref().map(|_| card.content.clone()),
            position: self.position.map(|_| card.position),
            tags: self.tags.as_ref().map(|_| card.tags.clone()),
        }
    }

    /// Overlays `later` on top of `self`; fields set in `later` win.
    pub fn overlay(&mut self, later: &CardPatch) {
        if later.title.is_some() {
            self.title.clone_from(&later.title);
        }
        if later.content.is_some() {
            self.content.clone_from(&later.content);
        }
        if later.position.is_some() {
            self.position = later.position;
        }
        if later.tags.is_some() {
            self.tags.clone_from(&later.tags);
        }
    }

    /// Fills fields that `self` leaves unset from `other`; fields already set win.
    pub fn fill_missing(&mut self, other: &CardPatch) {
        if self.title.is_none() {
            self.title.clone_from(&other.title);
        }
        if self.content.is_none() {
            self.content.clone_from(&other.content);
        }
        if self.position.is_none() {
            self.position = other.position;
        }
        if self.tags.is_none() {
            self.tags.clone_from(&other.tags);
        }
    }

    /// Returns the fields of `self` that `other` does not touch.
    pub fn without_fields_of(&self, other: &CardPatch) -> CardPatch {
        CardPatch {
            title: if other.title.is_some() { None } else { self.title.clone() },
            content: if other.content.is_some() { None } else { self.content.clone() },
            position: if other.position.is_some() { None } else { self.position },
            tags: if other.tags.is_some() { None } else { self.tags.clone() },
        }
    }

    /// Replaces values of fields both patches touch with the values from `other`.
    pub fn rebase_shared(&mut self, other: &CardPatch) {
        if self.title.is_some() && other.title.is_some() {
            self.title.clone_from(&other.title);
        }
        if self.content.is_some() && other.content.is_some() {
            self.content.clone_from(&other.content);
        }
        if self.position.is_some() && other.position.is_some() {
            self.position = other.position;
        }
        if self.tags.is_some() && other.tags.is_some() {
            self.tags.clone_from(&other.tags);
        }
    }
}

/// Current wall clock as Unix epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

fn validate_title(title: &str) -> Result<(), CardValidationError> {
    if title.trim().is_empty() {
        return Err(CardValidationError::EmptyTitle);
    }
    Ok(())
}

fn validate_position(position: Position) -> Result<(), CardValidationError> {
    if !position.is_valid() {
        return Err(CardValidationError::InvalidPosition {
            x: position.x,
            y: position.y,
        });
    }
    Ok(())
}
