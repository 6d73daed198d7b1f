//! Interchangeable phrasings for the fixed parts of a reply.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const CONFIRMATIONS: &[&str] = &["Perfect!", "Excellent!", "Great!", "Very good!", "Wonderful!"];

const ANYTHING_ELSE: &[&str] = &[
    "Is there anything else I can help you with?",
    "Do you need anything else?",
    "What else can I do for you?",
    "Can I help you with something else?",
    "Is there anything else you'd like to do?",
];

const WHAT_NEXT: &[&str] = &[
    "What would you like to do today?",
    "How can I help you?",
    "What do you need?",
    "How can I help you with your library?",
    "What do you want to do?",
];

const GREETINGS: &[&str] = &[
    "Hello! Great to have you here!",
    "Welcome back!",
    "Hi! I'm glad you're here.",
    "Good to see you!",
    "Hello! I hope you're having a great day.",
];

const MENU_OPTIONS: &[&str] = &[
    "I can help you manage your personal library. You can add new books, hear your book list, lend books to your friends, register returns or check which books are on loan.",
    "I have several options for you: add books to your collection, list all your books, lend a book to someone, return a book you got back, or review your active loans.",
    "I can do a few things: add new books to your library, tell you which books you have, help you lend books, record when they come back, or tell you which books are lent out.",
];

const FAREWELLS: &[&str] = &[
    "See you later! Enjoy your reading.",
    "See you soon! I hope you enjoy your books.",
    "Goodbye! It was a pleasure helping with your library.",
    "Until next time! Happy reading.",
    "Have a great day! Enjoy your books.",
];

const FALLBACKS: &[&str] = &[
    "Sorry, I didn't get that. Could you say it another way?",
    "Hmm, I'm not sure what you meant. Can you put it differently?",
    "Sorry, I didn't understand. Can you try again?",
];

const APOLOGIES: &[&str] = &[
    "Oops, something didn't go as expected. Can we try again?",
    "Sorry, I had a small problem. Shall we try once more?",
    "Sorry, something went wrong. What did you want to do?",
];

/// Chooses one entry of a non-empty phrase table.
pub trait PhraseSelector: Send + Sync {
    fn pick<'a>(&self, options: &[&'a str]) -> &'a str;
}

/// Always the first entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstPhrase;

impl PhraseSelector for FirstPhrase {
    fn pick<'a>(&self, options: &[&'a str]) -> &'a str {
        options.first().copied().unwrap_or_default()
    }
}

/// Cycles through each table in order, shared across all tables.
#[derive(Debug, Default)]
pub struct RotatingPhrases {
    next: AtomicUsize,
}

impl PhraseSelector for RotatingPhrases {
    fn pick<'a>(&self, options: &[&'a str]) -> &'a str {
        if options.is_empty() {
            return "";
        }
        let turn = self.next.fetch_add(1, Ordering::Relaxed);
        options[turn % options.len()]
    }
}

#[derive(Clone)]
pub struct Phrases {
    selector: Arc<dyn PhraseSelector>,
}

impl Default for Phrases {
    fn default() -> Self {
        Self::new(Arc::new(RotatingPhrases::default()))
    }
}

impl Phrases {
    pub fn new(selector: Arc<dyn PhraseSelector>) -> Self {
        Self { selector }
    }

    pub fn confirmation(&self) -> &'static str {
        self.selector.pick(CONFIRMATIONS)
    }

    pub fn anything_else(&self) -> &'static str {
        self.selector.pick(ANYTHING_ELSE)
    }

    pub fn what_next(&self) -> &'static str {
        self.selector.pick(WHAT_NEXT)
    }

    pub fn greeting(&self) -> &'static str {
        self.selector.pick(GREETINGS)
    }

    pub fn menu_options(&self) -> &'static str {
        self.selector.pick(MENU_OPTIONS)
    }

    pub fn farewell(&self) -> &'static str {
        self.selector.pick(FAREWELLS)
    }

    pub fn fallback(&self) -> &'static str {
        self.selector.pick(FALLBACKS)
    }

    pub fn apology(&self) -> &'static str {
        self.selector.pick(APOLOGIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_phrase_is_stable() {
        let phrases = Phrases::new(Arc::new(FirstPhrase));
        assert_eq!(phrases.confirmation(), "Perfect!");
        assert_eq!(phrases.confirmation(), "Perfect!");
        assert_eq!(phrases.farewell(), FAREWELLS[0]);
    }

    #[test]
    fn rotating_phrases_wrap_around() {
        let selector = RotatingPhrases::default();
        let table = ["a", "b"];
        let picked: Vec<_> = (0..5).map(|_| selector.pick(&table)).collect();
        assert_eq!(picked, vec!["a", "b", "a", "b", "a"]);
        assert_eq!(selector.pick(&[]), "");
    }
}
