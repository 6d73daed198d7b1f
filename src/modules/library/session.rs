//! Transient per-conversation state, echoed back to the caller on every turn.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::manager::ListFilter;

/// Where the add-a-book flow stands.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DialogueState {
    #[default]
    Idle,
    AwaitingTitle,
    AwaitingAuthor {
        title: String,
    },
    AwaitingCategory {
        title: String,
        author: String,
    },
}

impl DialogueState {
    pub fn is_collecting(&self) -> bool {
        !matches!(self, DialogueState::Idle)
    }

    /// Name of the awaited field, for logs.
    pub fn awaiting(&self) -> Option<&'static str> {
        match self {
            DialogueState::Idle => None,
            DialogueState::AwaitingTitle => Some("title"),
            DialogueState::AwaitingAuthor { .. } => Some("author"),
            DialogueState::AwaitingCategory { .. } => Some("category"),
        }
    }
}

/// Resume point of a paged listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListingCursor {
    #[schema(value_type = Object)]
    pub filter: ListFilter,
    /// Index of the page to serve on the next "next page".
    pub next_page: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    #[serde(default)]
    pub dialogue: DialogueState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing: Option<ListingCursor>,
}

impl ConversationState {
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
