use serde::{Deserialize, Serialize};

/// A knowledge-base entry as handed to the search core.
///
/// `id` never changes once assigned and `last_updated` is owned by the
/// store: it advances on every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: u64,
    pub title: String,
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub votes: i64,
    #[serde(default)]
    pub recommendations: i64,
    /// Unix timestamp (seconds) of the last mutation.
    pub last_updated: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub category_id: u64,
    #[serde(default)]
    pub team_id: Option<u64>,
    #[serde(default)]
    pub order: Option<i64>,
}

impl Entry {
    /// Build a fully-specified entry from a draft.
    pub fn from_draft(id: u64, last_updated: u64, draft: EntryDraft) -> Self {
        Self {
            id,
            title: draft.title,
            question: draft.question,
            answer: draft.answer,
            votes: draft.votes,
            recommendations: draft.recommendations,
            last_updated,
            enabled: draft.enabled,
            category_id: draft.category_id,
            team_id: draft.team_id,
            order: draft.order,
        }
    }

    /// The text compared against a query phrase during semantic search.
    ///
    /// Built fresh on every call and never stored.
    ///
    /// ```
    /// use kbseek::{Entry, EntryDraft};
    ///
    /// let draft = EntryDraft::new("Billing", "Where is my invoice?", "Open the billing tab.", 1);
    /// let entry = Entry::from_draft(7, 0, draft);
    /// assert_eq!(
    ///     entry.searchable_text(),
    ///     "Billing Where is my invoice? Open the billing tab."
    /// );
    /// ```
    pub fn searchable_text(&self) -> String {
        let mut text = String::with_capacity(
            self.title.len() + self.question.len() + self.answer.len() + 2,
        );
        text.push_str(&self.title);
        text.push(' ');
        text.push_str(&self.question);
        text.push(' ');
        text.push_str(&self.answer);
        text
    }

    /// The caller-controlled fields of this entry.
    pub fn to_draft(&self) -> EntryDraft {
        EntryDraft {
            title: self.title.clone(),
            question: self.question.clone(),
            answer: self.answer.clone(),
            votes: self.votes,
            recommendations: self.recommendations,
            enabled: self.enabled,
            category_id: self.category_id,
            team_id: self.team_id,
            order: self.order,
        }
    }
}

/// The fields a caller supplies when creating or updating an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryDraft {
    pub title: String,
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub votes: i64,
    #[serde(default)]
    pub recommendations: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub category_id: u64,
    #[serde(default)]
    pub team_id: Option<u64>,
    #[serde(default)]
    pub order: Option<i64>,
}

impl EntryDraft {
    pub fn new(
        title: impl Into<String>,
        question: impl Into<String>,
        answer: impl Into<String>,
        category_id: u64,
    ) -> Self {
        Self {
            title: title.into(),
            question: question.into(),
            answer: answer.into(),
            votes: 0,
            recommendations: 0,
            enabled: true,
            category_id,
            team_id: None,
            order: None,
        }
    }
}

fn default_enabled() -> bool {
    true
}
