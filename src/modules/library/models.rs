use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::utils::{fold, strip_lead_in, title_case};

/// Author recorded when the user does not know it.
pub const UNKNOWN_AUTHOR: &str = "unknown";
/// Category recorded when the user does not know it.
pub const UNCATEGORIZED: &str = "uncategorized";
/// Borrower recorded when a loan names nobody.
pub const DEFAULT_BORROWER: &str = "a friend";
/// Days a loan runs unless configured otherwise.
pub const DEFAULT_LOAN_DAYS: i64 = 7;

const DONT_KNOW: &[&str] = &[
    "don't know",
    "dont know",
    "do not know",
    "i don't know",
    "i dont know",
    "i do not know",
    "no idea",
    "not sure",
    "unknown",
    "no clue",
];

/// The three fields collected when adding a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Title,
    Author,
    Category,
}

impl Field {
    pub fn as_str(self) -> &'static str {
        match self {
            Field::Title => "title",
            Field::Author => "author",
            Field::Category => "category",
        }
    }

    /// Value stored when the user declines to give this field.
    pub fn sentinel(self) -> Option<&'static str> {
        match self {
            Field::Title => None,
            Field::Author => Some(UNKNOWN_AUTHOR),
            Field::Category => Some(UNCATEGORIZED),
        }
    }

    fn lead_ins(self) -> &'static [&'static str] {
        match self {
            Field::Title => &["the title is ", "the book is ", "it's called ", "it is called "],
            Field::Author => &["the author is ", "the writer is ", "it's ", "it is "],
            Field::Category => &[
                "the category is ",
                "the genre is ",
                "the type is ",
                "it's ",
                "it is ",
            ],
        }
    }
}

/// Normalize a raw answer for `field`.
///
/// Returns `None` when nothing usable was said. "Don't know"-style answers map
/// to the field's sentinel. Titles have no sentinel and are taken literally.
pub fn normalize_field(field: Field, raw: &str) -> Option<String> {
    let folded = fold(raw);
    let folded = folded.trim_end_matches(['.', '!', '?']).trim();
    if folded.is_empty() {
        return None;
    }

    if let Some(sentinel) = field.sentinel() {
        let declined = folded == sentinel
            || DONT_KNOW.iter().any(|phrase| {
                folded == *phrase || folded == format!("{phrase} the {}", field.as_str())
            });
        if declined {
            return Some(sentinel.to_string());
        }
    }

    Some(title_case(strip_lead_in(folded, field.lead_ins())))
}

/// Book availability. Always derived from the active-loans set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BookStatus {
    #[default]
    Available,
    Loaned,
}

impl BookStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookStatus::Available => "available",
            BookStatus::Loaned => "on loan",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    /// Short opaque token, assigned once
    #[serde(default)]
    pub id: String,
    /// Natural key, unique case-insensitively per user
    #[serde(default)]
    pub title: String,
    #[serde(default = "unknown_author")]
    pub author: String,
    #[serde(default = "uncategorized")]
    pub category: String,
    #[serde(default = "epoch", with = "time::serde::rfc3339")]
    pub added_at: OffsetDateTime,
    #[serde(default)]
    pub loan_count: u32,
    #[serde(default)]
    pub status: BookStatus,
}

impl Book {
    pub fn new(title: &str, author: &str, category: &str, now: OffsetDateTime) -> Self {
        Self {
            id: new_book_id(),
            title: title.trim().to_string(),
            author: author.to_string(),
            category: category.to_string(),
            added_at: now,
            loan_count: 0,
            status: BookStatus::Available,
        }
    }

    pub fn has_known_author(&self) -> bool {
        self.author != UNKNOWN_AUTHOR
    }

    pub fn has_category(&self) -> bool {
        self.category != UNCATEGORIZED
    }

    pub fn title_matches(&self, title: &str) -> bool {
        fold(&self.title) == fold(title)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    #[default]
    Active,
    Returned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Loan {
    /// Date-prefixed token, e.g. `LOAN-20261017-1a2b3c4d`
    #[serde(default)]
    pub id: String,
    /// Reference to `Book::id`
    #[serde(default)]
    pub book_id: String,
    /// Title at the time of lending
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_borrower")]
    pub borrower: String,
    #[serde(default = "epoch", with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(default = "epoch", with = "time::serde::rfc3339")]
    pub due_at: OffsetDateTime,
    #[serde(default)]
    pub status: LoanStatus,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub returned_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_time: Option<bool>,
}

impl Loan {
    pub fn new(book: &Book, borrower: Option<&str>, now: OffsetDateTime, loan_days: i64) -> Self {
        let borrower = borrower
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_BORROWER);

        Self {
            id: new_loan_id(now),
            book_id: book.id.clone(),
            title: book.title.clone(),
            borrower: borrower.to_string(),
            started_at: now,
            due_at: now + Duration::days(loan_days),
            status: LoanStatus::Active,
            returned_at: None,
            on_time: None,
        }
    }

    /// Close the loan at `now`, recording whether it came back by the due date.
    pub fn close(mut self, now: OffsetDateTime) -> Self {
        self.status = LoanStatus::Returned;
        self.returned_at = Some(now);
        self.on_time = Some(now <= self.due_at);
        self
    }

    /// Whole days until the due date, rounded down (negative once overdue).
    pub fn days_until_due(&self, now: OffsetDateTime) -> i64 {
        (self.due_at - now).whole_seconds().div_euclid(86_400)
    }

    pub fn has_named_borrower(&self) -> bool {
        !matches!(
            fold(&self.borrower).as_str(),
            DEFAULT_BORROWER | "someone" | "unknown" | ""
        )
    }

    /// Due date for speech, e.g. "October 24".
    pub fn due_date_spoken(&self) -> String {
        format!("{} {}", self.due_at.month(), self.due_at.day())
    }
}

/// Aggregate counters kept alongside the lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    #[serde(default)]
    pub total_books: usize,
    #[serde(default)]
    pub total_loans: u64,
    #[serde(default)]
    pub total_returns: u64,
}

/// The durable per-user snapshot, read and written whole once per operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLibraryState {
    #[serde(default)]
    pub catalog: Vec<Book>,
    #[serde(default)]
    pub active_loans: Vec<Loan>,
    #[serde(default)]
    pub loan_history: Vec<Loan>,
    #[serde(default)]
    pub stats: Stats,
    #[serde(default)]
    pub seen_before: bool,
}

impl UserLibraryState {
    /// First book whose title equals `title`, ignoring case.
    pub fn book_by_title(&self, title: &str) -> Option<&Book> {
        self.catalog.iter().find(|book| book.title_matches(title))
    }

    pub fn active_loan_for(&self, book_id: &str) -> Option<&Loan> {
        self.active_loans.iter().find(|loan| loan.book_id == book_id)
    }

    pub fn available_books(&self) -> impl Iterator<Item = &Book> {
        self.catalog
            .iter()
            .filter(|book| self.active_loan_for(&book.id).is_none())
    }

    /// Recompute every book's status from the active loans. Returns how many changed.
    pub fn sync_status(&mut self) -> usize {
        let loaned: std::collections::HashSet<String> = self
            .active_loans
            .iter()
            .map(|loan| loan.book_id.clone())
            .collect();

        let mut changed = 0;
        for book in &mut self.catalog {
            let status = if loaned.contains(&book.id) {
                BookStatus::Loaned
            } else {
                BookStatus::Available
            };
            if book.status != status {
                book.status = status;
                changed += 1;
            }
        }
        changed
    }

    /// Repair records written by older versions. Returns how many fixes were applied.
    ///
    /// Loans missing their start are treated as starting `now`; loans missing
    /// their due date are due `loan_days` after the start.
    pub fn migrate(&mut self, now: OffsetDateTime, loan_days: i64) -> usize {
        let mut fixes = 0;

        for book in &mut self.catalog {
            if book.id.trim().is_empty() {
                book.id = new_book_id();
                fixes += 1;
            }
            if book.title.trim().is_empty() {
                book.title = format!("Untitled {}", book.id);
                fixes += 1;
            }
        }

        let catalog = &self.catalog;
        for loan in self
            .active_loans
            .iter_mut()
            .chain(self.loan_history.iter_mut())
        {
            if loan.started_at == epoch() {
                loan.started_at = now;
                fixes += 1;
            }
            if loan.due_at == epoch() {
                loan.due_at = loan.started_at + Duration::days(loan_days);
                fixes += 1;
            }
            if loan.id.trim().is_empty() {
                loan.id = new_loan_id(loan.started_at);
                fixes += 1;
            }
            if loan.book_id.trim().is_empty() {
                if let Some(book) = catalog.iter().find(|book| book.title_matches(&loan.title)) {
                    loan.book_id = book.id.clone();
                    fixes += 1;
                }
            }
            if loan.title.trim().is_empty() {
                if let Some(book) = catalog.iter().find(|book| book.id == loan.book_id) {
                    loan.title = book.title.clone();
                    fixes += 1;
                }
            }
        }

        for loan in &mut self.loan_history {
            if loan.status != LoanStatus::Returned {
                let returned_at = loan.returned_at.unwrap_or(now);
                *loan = loan.clone().close(returned_at);
                fixes += 1;
            }
        }

        if self.stats.total_books != self.catalog.len() {
            self.stats.total_books = self.catalog.len();
            fixes += 1;
        }
        let closed = self.loan_history.len() as u64;
        if self.stats.total_returns < closed {
            self.stats.total_returns = closed;
            fixes += 1;
        }
        let opened = closed + self.active_loans.len() as u64;
        if self.stats.total_loans < opened {
            self.stats.total_loans = opened;
            fixes += 1;
        }

        fixes
    }
}

fn short_token() -> String {
    let mut token = Uuid::new_v4().simple().to_string();
    token.truncate(8);
    token
}

pub fn new_book_id() -> String {
    short_token()
}

pub fn new_loan_id(now: OffsetDateTime) -> String {
    format!(
        "LOAN-{:04}{:02}{:02}-{}",
        now.year(),
        u8::from(now.month()),
        now.day(),
        short_token()
    )
}

fn unknown_author() -> String {
    UNKNOWN_AUTHOR.to_string()
}

fn uncategorized() -> String {
    UNCATEGORIZED.to_string()
}

fn default_borrower() -> String {
    DEFAULT_BORROWER.to_string()
}

fn epoch() -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2026-10-17 12:00 UTC);

    #[test]
    fn normalize_maps_dont_know_to_sentinels() {
        assert_eq!(normalize_field(Field::Author, "No idea"), Some("unknown".into()));
        assert_eq!(
            normalize_field(Field::Author, "I don't know the author."),
            Some("unknown".into())
        );
        assert_eq!(
            normalize_field(Field::Category, "dont know the category"),
            Some("uncategorized".into())
        );
        assert_eq!(normalize_field(Field::Category, "uncategorized"), Some("uncategorized".into()));
        assert_eq!(normalize_field(Field::Author, "unknown"), Some("unknown".into()));
    }

    #[test]
    fn titles_are_never_declined() {
        assert_eq!(normalize_field(Field::Title, "Unknown"), Some("Unknown".into()));
        assert_eq!(normalize_field(Field::Title, "no idea"), Some("No Idea".into()));
        assert_eq!(normalize_field(Field::Title, "not sure."), Some("Not Sure".into()));
    }

    #[test]
    fn normalize_strips_lead_ins_and_title_cases() {
        assert_eq!(
            normalize_field(Field::Author, "the author is frank herbert"),
            Some("Frank Herbert".into())
        );
        assert_eq!(
            normalize_field(Field::Category, "it's science fiction"),
            Some("Science Fiction".into())
        );
        assert_eq!(normalize_field(Field::Title, "  the title is dune "), Some("Dune".into()));
        assert_eq!(normalize_field(Field::Title, "   "), None);
    }

    #[test]
    fn new_loan_is_due_after_loan_days() {
        let book = Book::new("Dune", UNKNOWN_AUTHOR, UNCATEGORIZED, NOW);
        let loan = Loan::new(&book, Some("  "), NOW, 7);

        assert_eq!(loan.borrower, DEFAULT_BORROWER);
        assert_eq!(loan.due_at, datetime!(2026-10-24 12:00 UTC));
        assert!(loan.id.starts_with("LOAN-20261017-"));
        assert_eq!(loan.id.len(), "LOAN-20261017-".len() + 8);
        assert_eq!(loan.due_date_spoken(), "October 24");
    }

    #[test]
    fn close_records_on_time_flag() {
        let book = Book::new("Dune", UNKNOWN_AUTHOR, UNCATEGORIZED, NOW);
        let loan = Loan::new(&book, Some("Ana"), NOW, 7);

        let early = loan.clone().close(NOW + Duration::days(3));
        assert_eq!(early.status, LoanStatus::Returned);
        assert_eq!(early.on_time, Some(true));

        let exactly_due = loan.clone().close(loan.due_at);
        assert_eq!(exactly_due.on_time, Some(true));

        let late = loan.close(NOW + Duration::days(8));
        assert_eq!(late.on_time, Some(false));
    }

    #[test]
    fn days_until_due_rounds_down() {
        let book = Book::new("Dune", UNKNOWN_AUTHOR, UNCATEGORIZED, NOW);
        let loan = Loan::new(&book, None, NOW, 7);

        assert_eq!(loan.days_until_due(NOW), 7);
        assert_eq!(loan.days_until_due(NOW + Duration::hours(7 * 24 - 1)), 0);
        assert_eq!(loan.days_until_due(NOW + Duration::hours(7 * 24 + 1)), -1);
    }

    #[test]
    fn sync_status_follows_active_loans() {
        let mut state = UserLibraryState::default();
        state.catalog.push(Book::new("Dune", UNKNOWN_AUTHOR, UNCATEGORIZED, NOW));
        state.catalog.push(Book::new("Emma", UNKNOWN_AUTHOR, UNCATEGORIZED, NOW));
        state.catalog[1].status = BookStatus::Loaned;
        let loan = Loan::new(&state.catalog[0], None, NOW, 7);
        state.active_loans.push(loan);

        assert_eq!(state.sync_status(), 2);
        assert_eq!(state.catalog[0].status, BookStatus::Loaned);
        assert_eq!(state.catalog[1].status, BookStatus::Available);
        assert_eq!(state.sync_status(), 0);
    }

    #[test]
    fn snapshot_uses_camel_case_document_shape() {
        let mut state = UserLibraryState::default();
        state.catalog.push(Book::new("Dune", "Frank Herbert", UNCATEGORIZED, NOW));
        state.stats.total_books = 1;

        let document = serde_json::to_value(&state).unwrap();
        for key in ["catalog", "activeLoans", "loanHistory", "stats", "seenBefore"] {
            assert!(document.get(key).is_some(), "missing {key}");
        }
        assert_eq!(document["stats"]["totalBooks"], json!(1));
        assert_eq!(document["catalog"][0]["loanCount"], json!(0));
        assert_eq!(document["catalog"][0]["status"], json!("available"));
    }

    #[test]
    fn migrate_repairs_legacy_records() {
        let legacy = json!({
            "catalog": [{"title": "Dune"}],
            "activeLoans": [{
                "title": "Dune",
                "startedAt": "2026-10-10T09:00:00Z",
                "dueAt": "2026-10-17T09:00:00Z"
            }]
        });
        let mut state: UserLibraryState = serde_json::from_value(legacy).unwrap();
        assert_eq!(state.catalog[0].author, UNKNOWN_AUTHOR);
        assert_eq!(state.active_loans[0].borrower, DEFAULT_BORROWER);

        let fixes = state.migrate(NOW, 7);
        assert!(fixes >= 4);
        assert_eq!(state.catalog[0].id.len(), 8);
        assert!(state.active_loans[0].id.starts_with("LOAN-20261010-"));
        assert_eq!(state.active_loans[0].book_id, state.catalog[0].id);
        assert_eq!(state.stats.total_books, 1);
        assert_eq!(state.stats.total_loans, 1);
        assert_eq!(state.migrate(NOW, 7), 0);
    }

    #[test]
    fn migrate_fills_missing_loan_dates() {
        let legacy = json!({
            "catalog": [{"id": "b1", "title": "Dune", "status": "loaned"}],
            "activeLoans": [
                {"id": "LOAN-20261010-aaaaaaaa", "bookId": "b1", "startedAt": "2026-10-10T09:00:00Z"},
                {"title": "Emma", "borrower": "Luis"}
            ]
        });
        let mut state: UserLibraryState = serde_json::from_value(legacy).unwrap();

        assert!(state.migrate(NOW, 14) >= 3);
        let dune = &state.active_loans[0];
        assert_eq!(dune.title, "Dune");
        assert_eq!(dune.due_at, datetime!(2026-10-24 09:00 UTC));
        let emma = &state.active_loans[1];
        assert_eq!(emma.started_at, NOW);
        assert_eq!(emma.due_at, NOW + Duration::days(14));
        assert!(emma.id.starts_with("LOAN-20261017-"));
        assert_eq!(state.migrate(NOW, 14), 0);
    }

    #[test]
    fn migrate_names_untitled_books() {
        let legacy = json!({"catalog": [{"id": "b1"}]});
        let mut state: UserLibraryState = serde_json::from_value(legacy).unwrap();

        assert_eq!(state.migrate(NOW, 7), 2);
        assert_eq!(state.catalog[0].title, "Untitled b1");
    }
}
