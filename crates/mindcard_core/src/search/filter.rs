//! Case-insensitive substring filter over card title and content.

use crate::model::card::Card;

/// Returns the cards whose title or content contains `query`, ignoring case.
///
/// An empty query yields the whole bucket in its original order.
pub fn filter<'a>(bucket: &'a [Card], query: &str) -> Vec<&'a Card> {
    if query.is_empty() {
        return bucket.iter().collect();
    }
    let needle = query.to_lowercase();
    bucket
        .iter()
        .filter(|card| matches_lowercase(card, &needle))
        .collect()
}

/// Single-card form of [`filter`].
pub fn matches(card: &Card, query: &str) -> bool {
    query.is_empty() || matches_lowercase(card, &query.to_lowercase())
}

fn matches_lowercase(card: &Card, needle: &str) -> bool {
    card.title.to_lowercase().contains(needle)
        || card
            .content
            .as_deref()
            .is_some_and(|content| content.to_lowercase().contains(needle))
}

#[cfg(test)]
mod tests {
    use super::{filter, matches};
    use crate::model::card::{Card, CardDraft, CardId, Position};

    fn card(id: &str, title: &str, content: Option<&str>) -> Card {
        let mut draft = CardDraft::new(title, Position::ORIGIN);
        if let Some(content) = content {
            draft = draft.with_content(content);
        }
        Card::from_draft(CardId::from(id), &draft)
    }

    #[test]
    fn content_match_counts() {
        let bucket = vec![card("1", "Groceries", Some("buy MILK")), card("2", "Work", None)];
        let hits = filter(&bucket, "milk");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, CardId::from("1"));
    }

    #[test]
    fn non_ascii_queries_match() {
        let target = card("1", "新卡片", None);
        assert!(matches(&target, "卡片"));
        assert!(!matches(&target, "旧"));
        assert!(matches(&target, ""));
    }
}
