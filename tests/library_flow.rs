use std::sync::Arc;
use std::time::Duration as StdDuration;

use serde_json::json;
use shelf_app::modules::library::clock::FixedClock;
use shelf_app::modules::library::manager::{LibraryManager, RemoveOutcome};
use shelf_app::modules::library::models::{BookStatus, UNCATEGORIZED, UNKNOWN_AUTHOR};
use shelf_app::modules::library::phrases::{FirstPhrase, Phrases};
use shelf_app::modules::library::store::LibraryStore;
use shelf_app::{ConversationState, Intent, TurnHandler, TurnRequest, TurnResponse};
use shelf_db::{InMemorySnapshotStore, SnapshotStore};
use time::macros::datetime;
use time::Duration;

const USER: &str = "amzn1.ask.account.FLOW";

struct Harness {
    handler: TurnHandler,
    backend: InMemorySnapshotStore,
    clock: Arc<FixedClock>,
    session: ConversationState,
}

impl Harness {
    fn new(page_size: usize) -> Self {
        let clock = Arc::new(FixedClock::new(datetime!(2026-10-17 09:00 UTC)));
        let backend = InMemorySnapshotStore::new();
        let store = LibraryStore::new(Arc::new(backend.clone()), StdDuration::from_secs(1));
        let manager = LibraryManager::new(store, clock.clone(), 7);
        Self {
            handler: TurnHandler::new(manager, Phrases::new(Arc::new(FirstPhrase)), page_size),
            backend,
            clock,
            session: ConversationState::default(),
        }
    }

    fn manager(&self) -> &LibraryManager {
        self.handler.manager()
    }

    async fn say(&mut self, input: Intent) -> TurnResponse {
        let response = self
            .handler
            .handle(TurnRequest {
                user_id: USER.to_string(),
                input,
                session: self.session.clone(),
            })
            .await;
        self.session = response.session.clone();
        response
    }
}

fn some(value: &str) -> Option<String> {
    Some(value.to_string())
}

fn add(title: &str) -> Intent {
    Intent::AddBook {
        title: some(title),
        author: some("someone"),
        category: some("misc"),
    }
}

#[tokio::test]
async fn add_lend_and_return_on_time() {
    let mut flow = Harness::new(10);

    flow.say(Intent::StartSession).await;
    let added = flow
        .say(Intent::AddBook {
            title: some("1984"),
            author: some("Orwell"),
            category: some("dystopia"),
        })
        .await;
    assert!(added
        .speech
        .starts_with("Perfect! I've added '1984' by Orwell, category Dystopia."));
    assert!(added.speech.contains("You now have 1 book in your library."));

    let lent = flow
        .say(Intent::LoanBook {
            title: some("1984"),
            borrower: some("Ana"),
        })
        .await;
    assert!(lent.speech.contains("I've recorded the loan of '1984' to Ana."));
    assert!(lent.speech.contains("The suggested return date is October 24."));
    assert!(lent.speech.contains("You have no books left to lend!"));

    let state = flow.manager().store().peek(USER).await.unwrap().unwrap();
    assert_eq!(state.active_loans.len(), 1);
    assert_eq!(state.active_loans[0].due_at, datetime!(2026-10-24 09:00 UTC));
    assert_eq!(state.catalog[0].status, BookStatus::Loaned);

    flow.clock.advance(Duration::days(3));
    let returned = flow
        .say(Intent::ReturnBook {
            title: some("1984"),
            loan_id: None,
        })
        .await;
    assert!(returned.speech.contains("It came back on time!"));

    let history = flow.manager().summarize_history(USER).await.unwrap();
    assert_eq!(history.total, 1);
    assert!(history.is_complete);

    let state = flow.manager().store().peek(USER).await.unwrap().unwrap();
    assert!(state.active_loans.is_empty());
    assert_eq!(state.loan_history[0].on_time, Some(true));
    assert_eq!(state.catalog[0].status, BookStatus::Available);
    assert_eq!(state.stats.total_loans, 1);
    assert_eq!(state.stats.total_returns, 1);
}

#[tokio::test]
async fn unrecognized_answers_fall_back_to_sentinels() {
    let mut flow = Harness::new(10);

    let asked = flow
        .say(Intent::AddBook {
            title: some("Dune"),
            author: None,
            category: None,
        })
        .await;
    assert_eq!(asked.reprompt.as_deref(), Some("Who is the author?"));

    let asked = flow.say(Intent::Unrecognized).await;
    assert_eq!(asked.reprompt.as_deref(), Some("What type of book is it?"));
    assert_eq!(
        serde_json::to_value(&flow.session.dialogue).unwrap(),
        json!({"state": "awaiting_category", "title": "Dune", "author": UNKNOWN_AUTHOR})
    );

    let done = flow.say(Intent::Unrecognized).await;
    assert!(done.speech.contains("I've added 'Dune'."));
    assert!(!flow.session.dialogue.is_collecting());

    let book = flow
        .manager()
        .find_by_title_exact(USER, "dune")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(book.author, UNKNOWN_AUTHOR);
    assert_eq!(book.category, UNCATEGORIZED);
}

#[tokio::test]
async fn duplicate_title_is_not_added_twice() {
    let mut flow = Harness::new(10);

    flow.say(add("Dune")).await;
    let again = flow.say(add("dune")).await;
    assert!(again.speech.starts_with("'Dune' is already in your library."));
    assert_eq!(flow.manager().catalog_size(USER).await.unwrap(), 1);
}

#[tokio::test]
async fn lent_books_cannot_be_lent_or_removed() {
    let mut flow = Harness::new(10);
    flow.say(add("Dune")).await;
    flow.say(add("Emma")).await;
    flow.say(Intent::LoanBook {
        title: some("Dune"),
        borrower: some("Ana"),
    })
    .await;

    let again = flow
        .say(Intent::LoanBook {
            title: some("Dune"),
            borrower: some("Luis"),
        })
        .await;
    assert!(again.speech.starts_with("'Dune' is already lent to Ana."));
    assert!(again.speech.contains("Available: 'Emma'."));

    let before = flow.manager().store().peek(USER).await.unwrap().unwrap();
    let outcome = flow.manager().remove_book(USER, "Dune").await.unwrap();
    assert!(matches!(outcome, RemoveOutcome::CurrentlyLoaned(loan) if loan.borrower == "Ana"));
    let after = flow.manager().store().peek(USER).await.unwrap().unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn late_return_is_reported() {
    let mut flow = Harness::new(10);
    flow.say(add("Dune")).await;
    flow.say(Intent::LoanBook {
        title: some("Dune"),
        borrower: None,
    })
    .await;

    flow.clock.advance(Duration::days(9));
    let loans = flow.say(Intent::ListActiveLoans).await;
    assert!(loans.speech.contains("Some books are overdue"));

    let returned = flow
        .say(Intent::ReturnBook {
            title: some("dune"),
            loan_id: None,
        })
        .await;
    assert!(returned.speech.contains("It came back a little late"));

    let state = flow.manager().store().peek(USER).await.unwrap().unwrap();
    assert_eq!(state.loan_history[0].on_time, Some(false));
}

#[tokio::test]
async fn paged_listing_reads_every_book_once() {
    let mut flow = Harness::new(2);
    let titles = ["Alpha", "Bravo", "Charlie", "Delta", "Echo"];
    for title in titles {
        flow.say(add(title)).await;
    }

    let mut heard = Vec::new();
    let mut response = flow
        .say(Intent::ListBooks {
            category: None,
            author: None,
        })
        .await;
    loop {
        heard.extend(
            titles
                .iter()
                .filter(|title| response.speech.contains(&format!("'{title}'")))
                .copied(),
        );
        if flow.session.listing.is_none() {
            break;
        }
        response = flow.say(Intent::NextPage).await;
    }

    assert_eq!(heard, titles);
    assert!(response.speech.contains("That's all your books."));
}

#[tokio::test]
async fn interrupting_command_abandons_the_flow() {
    let mut flow = Harness::new(10);

    flow.say(Intent::AddBook {
        title: None,
        author: None,
        category: None,
    })
    .await;
    assert!(flow.session.dialogue.is_collecting());

    flow.say(Intent::ListActiveLoans).await;
    assert!(!flow.session.dialogue.is_collecting());
    assert_eq!(flow.manager().catalog_size(USER).await.unwrap(), 0);
}

#[tokio::test]
async fn title_unknown_is_a_real_title() {
    let mut flow = Harness::new(10);

    let added = flow
        .say(Intent::AddBook {
            title: some("Unknown"),
            author: some("x"),
            category: some("y"),
        })
        .await;
    assert!(added.speech.contains("I've added 'Unknown'"));

    flow.say(Intent::AddBook {
        title: None,
        author: None,
        category: None,
    })
    .await;
    let asked = flow.say(Intent::Answer { value: some("no idea") }).await;
    assert_eq!(asked.reprompt.as_deref(), Some("Who is the author?"));
    assert_eq!(flow.manager().catalog_size(USER).await.unwrap(), 1);
}

#[tokio::test]
async fn legacy_loan_without_due_date_still_works() {
    let mut flow = Harness::new(10);
    flow.backend
        .put(
            USER,
            json!({
                "catalog": [{"id": "b1", "title": "Dune", "status": "loaned"}],
                "activeLoans": [{"bookId": "b1", "title": "Dune", "borrower": "Ana",
                                 "startedAt": "2026-10-12T09:00:00Z"}],
                "seenBefore": true
            }),
        )
        .await
        .unwrap();

    let loans = flow.say(Intent::ListActiveLoans).await;
    assert!(loans.speech.contains("'Dune' is with Ana (due in 2 days)"));

    let returned = flow
        .say(Intent::ReturnBook {
            title: some("Dune"),
            loan_id: None,
        })
        .await;
    assert!(returned.speech.contains("It came back on time!"));
}
