//! Catalog and loan lifecycle over a user's snapshot.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::clock::Clock;
use super::error::Result;
use super::models::{
    normalize_field, Book, BookStatus, Field, Loan, UserLibraryState, UNCATEGORIZED, UNKNOWN_AUTHOR,
};
use super::store::{Change, LibraryStore};
use crate::utils::{count, fold};

/// Histories up to this size are read out in full.
const FULL_HISTORY_LIMIT: usize = 10;
/// Number of most recent returns read out for longer histories.
const RECENT_HISTORY: usize = 5;
/// Loans due within this many days count as "due soon".
const DUE_SOON_DAYS: i64 = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum AddBookOutcome {
    Added(Book),
    /// A book with the same title (ignoring case) is already catalogued.
    DuplicateTitle(Book),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoanOutcome {
    Loaned(Loan),
    NotFound,
    /// The book already has an active loan, returned here.
    AlreadyLoaned(Loan),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReturnOutcome {
    /// The closed loan, as appended to the history.
    Returned(Loan),
    NoActiveLoans,
    NotFound,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoveOutcome {
    Removed(Book),
    NotFound,
    CurrentlyLoaned(Loan),
}

/// How a listing narrows the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "by", content = "value", rename_all = "lowercase")]
pub enum ListFilter {
    #[default]
    All,
    Author(String),
    Category(String),
    Status(BookStatus),
}

impl ListFilter {
    /// Build a filter from optional slot values. The author wins over the category,
    /// and the categories "loaned"/"available" select by status.
    pub fn from_slots(category: Option<&str>, author: Option<&str>) -> Self {
        fn present(value: Option<&str>) -> Option<&str> {
            value.map(str::trim).filter(|v| !v.is_empty())
        }

        if let Some(author) = present(author) {
            return ListFilter::Author(author.to_string());
        }
        match present(category) {
            None => ListFilter::All,
            Some(category) => match fold(category).as_str() {
                "loaned" | "lent" | "on loan" | "lent out" | "borrowed" => {
                    ListFilter::Status(BookStatus::Loaned)
                }
                "available" => ListFilter::Status(BookStatus::Available),
                _ => ListFilter::Category(category.to_string()),
            },
        }
    }

    pub fn matches(&self, book: &Book) -> bool {
        match self {
            ListFilter::All => true,
            ListFilter::Author(author) => fold(&book.author) == fold(author),
            ListFilter::Category(category) => fold(&book.category) == fold(category),
            ListFilter::Status(status) => book.status == *status,
        }
    }

    /// Suffix for speech, e.g. " by Tolkien".
    pub fn describe(&self) -> String {
        match self {
            ListFilter::All => String::new(),
            ListFilter::Author(author) => format!(" by {author}"),
            ListFilter::Category(category) => format!(" in {category}"),
            ListFilter::Status(BookStatus::Loaned) => " on loan".to_string(),
            ListFilter::Status(BookStatus::Available) => " available".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilteredBooks {
    pub books: Vec<Book>,
    pub catalog_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveLoansSummary {
    pub total: usize,
    pub descriptions: Vec<String>,
    pub has_overdue: bool,
    pub has_due_soon: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistorySummary {
    pub total: usize,
    pub descriptions: Vec<String>,
    /// False when only the most recent returns are described.
    pub is_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableSummary {
    pub count: usize,
    /// Up to two available titles to suggest.
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryTotals {
    pub books: usize,
    pub active_loans: usize,
    /// Whether the user had visited before this session.
    pub returning: bool,
}

/// Every exact (case-insensitive) title match.
fn exact_matches<'a>(catalog: &'a [Book], title: &str) -> impl Iterator<Item = &'a Book> {
    let needle = fold(title);
    catalog.iter().filter(move |book| fold(&book.title) == needle)
}

/// Titles containing the query or contained by it, in catalog order.
pub fn fuzzy_matches(catalog: &[Book], query: &str) -> Vec<Book> {
    let needle = fold(query);
    if needle.is_empty() {
        return Vec::new();
    }
    catalog
        .iter()
        .filter(|book| {
            let title = fold(&book.title);
            title.contains(&needle) || (!title.is_empty() && needle.contains(&title))
        })
        .cloned()
        .collect()
}

/// Exact matches first, then titles containing the query.
pub fn loan_candidates(catalog: &[Book], query: &str) -> Vec<Book> {
    let needle = fold(query);
    if needle.is_empty() {
        return Vec::new();
    }
    let mut candidates: Vec<Book> = exact_matches(catalog, query).cloned().collect();
    candidates.extend(
        catalog
            .iter()
            .filter(|book| {
                let title = fold(&book.title);
                title != needle && title.contains(&needle)
            })
            .cloned(),
    );
    candidates
}

fn describe_active_loan(loan: &Loan, now: OffsetDateTime) -> (String, bool, bool) {
    let mut description = format!("'{}' is with {}", loan.title, loan.borrower);
    let days = loan.days_until_due(now);
    let (overdue, due_soon) = if days < 0 {
        description.push_str(" (overdue!)");
        (true, false)
    } else if days == 0 {
        description.push_str(" (due today)");
        (false, true)
    } else if days <= DUE_SOON_DAYS {
        description.push_str(&format!(" (due in {})", count(days as usize, "day", "days")));
        (false, true)
    } else {
        (false, false)
    };
    (description, overdue, due_soon)
}

fn describe_returned_loan(loan: &Loan) -> String {
    if loan.has_named_borrower() {
        format!("'{}' lent to {}", loan.title, loan.borrower)
    } else {
        format!("'{}'", loan.title)
    }
}

/// Library domain operations. Each call is one read-modify-write of the snapshot.
#[derive(Clone)]
pub struct LibraryManager {
    store: LibraryStore,
    clock: Arc<dyn Clock>,
    loan_days: i64,
}

impl LibraryManager {
    pub fn new(store: LibraryStore, clock: Arc<dyn Clock>, loan_days: i64) -> Self {
        Self {
            store: store.with_loan_days(loan_days),
            clock,
            loan_days,
        }
    }

    pub fn store(&self) -> &LibraryStore {
        &self.store
    }

    pub async fn add_book(
        &self,
        user_id: &str,
        title: &str,
        author: &str,
        category: &str,
    ) -> Result<AddBookOutcome> {
        let title = title.trim().to_string();
        let author = normalize_field(Field::Author, author)
            .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string());
        let category = normalize_field(Field::Category, category)
            .unwrap_or_else(|| UNCATEGORIZED.to_string());
        let now = self.clock.now();

        let outcome = self
            .store
            .update(user_id, |state| {
                if let Some(existing) = state.book_by_title(&title) {
                    return Change::Discard(AddBookOutcome::DuplicateTitle(existing.clone()));
                }
                let book = Book::new(&title, &author, &category, now);
                state.catalog.push(book.clone());
                state.stats.total_books = state.catalog.len();
                Change::Commit(AddBookOutcome::Added(book))
            })
            .await?;

        match &outcome {
            AddBookOutcome::Added(book) => {
                tracing::info!(user_id, book_id = %book.id, title = %book.title, "book added")
            }
            AddBookOutcome::DuplicateTitle(book) => {
                tracing::info!(user_id, book_id = %book.id, "duplicate title rejected")
            }
        }
        Ok(outcome)
    }

    pub async fn find_by_title_exact(&self, user_id: &str, title: &str) -> Result<Option<Book>> {
        self.store
            .read(user_id, |state| state.book_by_title(title).cloned())
            .await
    }

    pub async fn find_by_title_fuzzy(&self, user_id: &str, title: &str) -> Result<Vec<Book>> {
        self.store
            .update(user_id, |state| {
                let changed = state.sync_status();
                let matches = fuzzy_matches(&state.catalog, title);
                if changed > 0 {
                    Change::Commit(matches)
                } else {
                    Change::Discard(matches)
                }
            })
            .await
    }

    /// Candidate books for a loan request: exact title matches first, then partial ones.
    pub async fn search_for_loan(&self, user_id: &str, title: &str) -> Result<Vec<Book>> {
        self.store
            .read(user_id, |state| loan_candidates(&state.catalog, title))
            .await
    }

    pub async fn register_loan(
        &self,
        user_id: &str,
        title: &str,
        borrower: Option<&str>,
    ) -> Result<LoanOutcome> {
        let now = self.clock.now();
        let loan_days = self.loan_days;

        let outcome = self
            .store
            .update(user_id, |state| {
                let Some(index) = state.catalog.iter().position(|book| book.title_matches(title))
                else {
                    return Change::Discard(LoanOutcome::NotFound);
                };
                let book_id = state.catalog[index].id.clone();
                if let Some(existing) = state.active_loan_for(&book_id) {
                    return Change::Discard(LoanOutcome::AlreadyLoaned(existing.clone()));
                }

                let loan = Loan::new(&state.catalog[index], borrower, now, loan_days);
                state.active_loans.push(loan.clone());
                let book = &mut state.catalog[index];
                book.status = BookStatus::Loaned;
                book.loan_count += 1;
                state.stats.total_loans += 1;
                Change::Commit(LoanOutcome::Loaned(loan))
            })
            .await?;

        if let LoanOutcome::Loaned(loan) = &outcome {
            tracing::info!(
                user_id,
                loan_id = %loan.id,
                book_id = %loan.book_id,
                due_at = %loan.due_at,
                "loan registered"
            );
        }
        Ok(outcome)
    }

    pub async fn register_return(
        &self,
        user_id: &str,
        title: Option<&str>,
        loan_id: Option<&str>,
    ) -> Result<ReturnOutcome> {
        let now = self.clock.now();
        let title = title.map(fold).filter(|t| !t.is_empty());
        let loan_id = loan_id.map(str::trim).filter(|id| !id.is_empty());

        let outcome = self
            .store
            .update(user_id, |state| {
                if state.active_loans.is_empty() {
                    return Change::Discard(ReturnOutcome::NoActiveLoans);
                }

                let by_id = loan_id.and_then(|id| {
                    state
                        .active_loans
                        .iter()
                        .position(|loan| loan.id.eq_ignore_ascii_case(id))
                });
                let by_title = || {
                    title.as_ref().and_then(|needle| {
                        state
                            .active_loans
                            .iter()
                            .position(|loan| fold(&loan.title).contains(needle.as_str()))
                    })
                };
                let Some(index) = by_id.or_else(by_title) else {
                    return Change::Discard(ReturnOutcome::NotFound);
                };

                let closed = state.active_loans.remove(index).close(now);
                state.loan_history.push(closed.clone());
                if let Some(book) = state.catalog.iter_mut().find(|b| b.id == closed.book_id) {
                    book.status = BookStatus::Available;
                }
                state.stats.total_returns += 1;
                Change::Commit(ReturnOutcome::Returned(closed))
            })
            .await?;

        if let ReturnOutcome::Returned(loan) = &outcome {
            tracing::info!(
                user_id,
                loan_id = %loan.id,
                book_id = %loan.book_id,
                on_time = ?loan.on_time,
                "loan closed"
            );
        }
        Ok(outcome)
    }

    pub async fn remove_book(&self, user_id: &str, title: &str) -> Result<RemoveOutcome> {
        let outcome = self
            .store
            .update(user_id, |state| {
                let Some(index) = state.catalog.iter().position(|book| book.title_matches(title))
                else {
                    return Change::Discard(RemoveOutcome::NotFound);
                };
                if let Some(loan) = state.active_loan_for(&state.catalog[index].id) {
                    return Change::Discard(RemoveOutcome::CurrentlyLoaned(loan.clone()));
                }

                let removed = state.catalog.remove(index);
                state.stats.total_books = state.catalog.len();
                Change::Commit(RemoveOutcome::Removed(removed))
            })
            .await?;

        if let RemoveOutcome::Removed(book) = &outcome {
            tracing::info!(user_id, book_id = %book.id, "book removed");
        }
        Ok(outcome)
    }

    pub async fn summarize_active_loans(&self, user_id: &str) -> Result<ActiveLoansSummary> {
        let now = self.clock.now();
        self.store
            .read(user_id, |state| {
                let mut summary = ActiveLoansSummary {
                    total: state.active_loans.len(),
                    descriptions: Vec::with_capacity(state.active_loans.len()),
                    has_overdue: false,
                    has_due_soon: false,
                };
                for loan in &state.active_loans {
                    let (description, overdue, due_soon) = describe_active_loan(loan, now);
                    summary.descriptions.push(description);
                    summary.has_overdue |= overdue;
                    summary.has_due_soon |= due_soon;
                }
                summary
            })
            .await
    }

    pub async fn summarize_history(&self, user_id: &str) -> Result<HistorySummary> {
        self.store
            .read(user_id, |state| {
                let history = &state.loan_history;
                if history.len() <= FULL_HISTORY_LIMIT {
                    HistorySummary {
                        total: history.len(),
                        descriptions: history.iter().map(describe_returned_loan).collect(),
                        is_complete: true,
                    }
                } else {
                    HistorySummary {
                        total: history.len(),
                        descriptions: history
                            .iter()
                            .rev()
                            .take(RECENT_HISTORY)
                            .map(describe_returned_loan)
                            .collect(),
                        is_complete: false,
                    }
                }
            })
            .await
    }

    /// Reconcile derived status, persist the reconciliation, then filter.
    pub async fn list_filtered(&self, user_id: &str, filter: &ListFilter) -> Result<FilteredBooks> {
        self.store
            .update(user_id, |state| {
                let changed = state.sync_status();
                let filtered = FilteredBooks {
                    books: state
                        .catalog
                        .iter()
                        .filter(|book| filter.matches(book))
                        .cloned()
                        .collect(),
                    catalog_size: state.catalog.len(),
                };
                tracing::debug!(user_id, changed, matched = filtered.books.len(), "catalog filtered");
                Change::Commit(filtered)
            })
            .await
    }

    pub async fn available_summary(&self, user_id: &str) -> Result<AvailableSummary> {
        self.store
            .read(user_id, |state| AvailableSummary {
                count: state.available_books().count(),
                examples: state
                    .available_books()
                    .take(2)
                    .map(|book| book.title.clone())
                    .collect(),
            })
            .await
    }

    /// Count of active loans and up to three "'title' to borrower" examples.
    pub async fn active_loan_examples(&self, user_id: &str) -> Result<(usize, Vec<String>)> {
        self.store
            .read(user_id, |state| {
                let examples = state
                    .active_loans
                    .iter()
                    .take(3)
                    .map(|loan| format!("'{}' to {}", loan.title, loan.borrower))
                    .collect();
                (state.active_loans.len(), examples)
            })
            .await
    }

    pub async fn catalog_size(&self, user_id: &str) -> Result<usize> {
        self.store.read(user_id, |state| state.catalog.len()).await
    }

    /// Session start: sync status, mark the user as seen, report totals.
    pub async fn welcome(&self, user_id: &str) -> Result<LibraryTotals> {
        self.store
            .update(user_id, |state| {
                let changed = state.sync_status();
                let totals = totals_of(state);
                if !state.seen_before || changed > 0 {
                    state.seen_before = true;
                    Change::Commit(totals)
                } else {
                    Change::Discard(totals)
                }
            })
            .await
    }

    /// Drop cached state, re-read the durable snapshot, resync and persist it.
    pub async fn refresh(&self, user_id: &str) -> Result<LibraryTotals> {
        self.store.evict(user_id).await?;
        let totals = self
            .store
            .update(user_id, |state| {
                state.sync_status();
                Change::Commit(totals_of(state))
            })
            .await?;
        tracing::info!(
            user_id,
            books = totals.books,
            active_loans = totals.active_loans,
            "library refreshed from durable store"
        );
        Ok(totals)
    }
}

fn totals_of(state: &UserLibraryState) -> LibraryTotals {
    LibraryTotals {
        books: state.catalog.len(),
        active_loans: state.active_loans.len(),
        returning: state.seen_before,
    }
}
