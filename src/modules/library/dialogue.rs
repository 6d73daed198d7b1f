//! Slot collection for the add-a-book flow.
//!
//! `Idle -> AwaitingTitle -> AwaitingAuthor -> AwaitingCategory -> Idle`.
//! The title is required and is asked for again until it arrives. Author and
//! category fall back to their sentinels when missing or not understood, so a
//! run of unrecognized answers can never stall the flow.

use super::models::{normalize_field, Field, UNCATEGORIZED, UNKNOWN_AUTHOR};
use super::session::DialogueState;

/// What to ask the user next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotPrompt {
    Title,
    Author { title: String },
    Category { title: String, author: String },
    /// The last answer was not understood; ask again with an example phrasing.
    Clarify(Field),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Prompt {
        state: DialogueState,
        prompt: SlotPrompt,
    },
    /// Every field is known; the book can be added.
    Complete {
        title: String,
        author: String,
        category: String,
    },
}

fn fresh(field: Field, value: Option<&str>) -> Option<String> {
    value.and_then(|raw| normalize_field(field, raw))
}

fn ask_author(title: String) -> Step {
    Step::Prompt {
        state: DialogueState::AwaitingAuthor {
            title: title.clone(),
        },
        prompt: SlotPrompt::Author { title },
    }
}

fn ask_category(title: String, author: String) -> Step {
    Step::Prompt {
        state: DialogueState::AwaitingCategory {
            title: title.clone(),
            author: author.clone(),
        },
        prompt: SlotPrompt::Category { title, author },
    }
}

/// Handle an add-a-book command carrying zero or more structured fields.
///
/// Values collected earlier in `current` fill the gaps, but a freshly supplied
/// value always replaces a stored one.
pub fn begin(
    current: &DialogueState,
    title: Option<&str>,
    author: Option<&str>,
    category: Option<&str>,
) -> Step {
    let (stored_title, stored_author) = match current {
        DialogueState::Idle | DialogueState::AwaitingTitle => (None, None),
        DialogueState::AwaitingAuthor { title } => (Some(title.clone()), None),
        DialogueState::AwaitingCategory { title, author } => {
            (Some(title.clone()), Some(author.clone()))
        }
    };

    let Some(title) = fresh(Field::Title, title).or(stored_title) else {
        return Step::Prompt {
            state: DialogueState::AwaitingTitle,
            prompt: SlotPrompt::Title,
        };
    };
    let Some(author) = fresh(Field::Author, author).or(stored_author) else {
        return ask_author(title);
    };
    match fresh(Field::Category, category) {
        Some(category) => Step::Complete {
            title,
            author,
            category,
        },
        None => ask_category(title, author),
    }
}

/// Ask again for the awaited field without touching collected values.
pub fn clarify(current: &DialogueState) -> Step {
    let field = match current {
        DialogueState::Idle | DialogueState::AwaitingTitle => Field::Title,
        DialogueState::AwaitingAuthor { .. } => Field::Author,
        DialogueState::AwaitingCategory { .. } => Field::Category,
    };
    let state = match current {
        DialogueState::Idle => DialogueState::AwaitingTitle,
        other => other.clone(),
    };
    Step::Prompt {
        state,
        prompt: SlotPrompt::Clarify(field),
    }
}

/// Feed one free-form (or missing) answer to the awaited field.
pub fn continue_with(current: &DialogueState, value: Option<&str>) -> Step {
    let step = match current {
        DialogueState::Idle => begin(current, value, None, None),
        DialogueState::AwaitingTitle => match fresh(Field::Title, value) {
            Some(title) => ask_author(title),
            None => Step::Prompt {
                state: DialogueState::AwaitingTitle,
                prompt: SlotPrompt::Clarify(Field::Title),
            },
        },
        DialogueState::AwaitingAuthor { title } => {
            let author =
                fresh(Field::Author, value).unwrap_or_else(|| UNKNOWN_AUTHOR.to_string());
            ask_category(title.clone(), author)
        }
        DialogueState::AwaitingCategory { title, author } => Step::Complete {
            title: title.clone(),
            author: author.clone(),
            category: fresh(Field::Category, value)
                .unwrap_or_else(|| UNCATEGORIZED.to_string()),
        },
    };

    tracing::debug!(
        from = current.awaiting().unwrap_or("idle"),
        answered = value.is_some(),
        complete = matches!(step, Step::Complete { .. }),
        "dialogue step"
    );
    step
}
