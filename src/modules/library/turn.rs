//! One conversational turn: intent in, speech and updated session out.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::dialogue::{self, SlotPrompt, Step};
use super::error::Result;
use super::manager::{
    AddBookOutcome, LibraryManager, ListFilter, LoanOutcome, RemoveOutcome, ReturnOutcome,
};
use super::models::{Book, Field, DEFAULT_BORROWER, UNKNOWN_AUTHOR};
use super::pagination::{needs_paging, page};
use super::phrases::Phrases;
use super::session::{ConversationState, DialogueState, ListingCursor};
use crate::utils::{count, quoted_list};

/// Active loans read out per turn.
const ACTIVE_LOANS_SPOKEN: usize = 5;
/// Search matches read out per turn.
const SEARCH_MATCHES_SPOKEN: usize = 3;
/// Loan candidates suggested when a title is not found.
const LOAN_SUGGESTIONS: usize = 3;

/// A classified utterance with its already-extracted slot values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Intent {
    StartSession,
    AddBook {
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        author: Option<String>,
        #[serde(default)]
        category: Option<String>,
    },
    ListBooks {
        #[serde(default)]
        category: Option<String>,
        #[serde(default)]
        author: Option<String>,
    },
    NextPage,
    ExitListing,
    SearchBook {
        #[serde(default)]
        title: Option<String>,
    },
    LoanBook {
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        borrower: Option<String>,
    },
    ReturnBook {
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        loan_id: Option<String>,
    },
    ListActiveLoans,
    ListHistory,
    RemoveBook {
        #[serde(default)]
        title: Option<String>,
    },
    ClearCache,
    Help,
    ShowOptions,
    Cancel,
    /// Free-form answer to the question asked on the previous turn.
    Answer {
        #[serde(default)]
        value: Option<String>,
    },
    /// The platform could not classify the utterance.
    Unrecognized,
    SessionEnded,
}

fn slot(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl Intent {
    pub fn name(&self) -> &'static str {
        match self {
            Intent::StartSession => "start_session",
            Intent::AddBook { .. } => "add_book",
            Intent::ListBooks { .. } => "list_books",
            Intent::NextPage => "next_page",
            Intent::ExitListing => "exit_listing",
            Intent::SearchBook { .. } => "search_book",
            Intent::LoanBook { .. } => "loan_book",
            Intent::ReturnBook { .. } => "return_book",
            Intent::ListActiveLoans => "list_active_loans",
            Intent::ListHistory => "list_history",
            Intent::RemoveBook { .. } => "remove_book",
            Intent::ClearCache => "clear_cache",
            Intent::Help => "help",
            Intent::ShowOptions => "show_options",
            Intent::Cancel => "cancel",
            Intent::Answer { .. } => "answer",
            Intent::Unrecognized => "unrecognized",
            Intent::SessionEnded => "session_ended",
        }
    }

    /// Commands that abandon an add-a-book flow instead of answering it.
    fn interrupts_collection(&self) -> bool {
        matches!(
            self,
            Intent::StartSession
                | Intent::Help
                | Intent::ShowOptions
                | Intent::Cancel
                | Intent::SessionEnded
                | Intent::ListActiveLoans
                | Intent::ListHistory
                | Intent::ExitListing
        )
    }

    /// First non-empty slot value, in declaration order.
    pub fn first_slot(&self) -> Option<&str> {
        let slots: Vec<&Option<String>> = match self {
            Intent::AddBook {
                title,
                author,
                category,
            } => vec![title, author, category],
            Intent::ListBooks { category, author } => vec![category, author],
            Intent::SearchBook { title } | Intent::RemoveBook { title } => vec![title],
            Intent::LoanBook { title, borrower } => vec![title, borrower],
            Intent::ReturnBook { title, loan_id } => vec![title, loan_id],
            Intent::Answer { value } => vec![value],
            _ => Vec::new(),
        };
        slots.into_iter().find_map(slot)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TurnRequest {
    pub user_id: String,
    pub input: Intent,
    #[serde(default)]
    pub session: ConversationState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TurnResponse {
    pub speech: String,
    /// Spoken if the user stays silent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reprompt: Option<String>,
    pub session: ConversationState,
    #[serde(default)]
    pub end_session: bool,
}

struct Reply {
    speech: String,
    reprompt: Option<String>,
    end_session: bool,
}

impl Reply {
    fn ask(speech: impl Into<String>, reprompt: impl Into<String>) -> Self {
        Self {
            speech: speech.into(),
            reprompt: Some(reprompt.into()),
            end_session: false,
        }
    }

    fn end(speech: impl Into<String>) -> Self {
        Self {
            speech: speech.into(),
            reprompt: None,
            end_session: true,
        }
    }

    fn into_response(self, session: ConversationState) -> TurnResponse {
        TurnResponse {
            speech: self.speech,
            reprompt: self.reprompt,
            session,
            end_session: self.end_session,
        }
    }
}

fn by_author(book: &Book) -> String {
    if book.has_known_author() {
        format!(" by {}", book.author)
    } else {
        String::new()
    }
}

#[derive(Clone)]
pub struct TurnHandler {
    manager: LibraryManager,
    phrases: Phrases,
    page_size: usize,
}

impl TurnHandler {
    pub fn new(manager: LibraryManager, phrases: Phrases, page_size: usize) -> Self {
        Self {
            manager,
            phrases,
            page_size: page_size.max(1),
        }
    }

    pub fn manager(&self) -> &LibraryManager {
        &self.manager
    }

    /// Run one turn. Storage failures become an apology and a reset session.
    pub async fn handle(&self, request: TurnRequest) -> TurnResponse {
        let TurnRequest {
            user_id,
            input,
            mut session,
        } = request;

        tracing::debug!(
            user_id = %user_id,
            command = input.name(),
            awaiting = session.dialogue.awaiting(),
            listing = session.listing.is_some(),
            "turn received"
        );

        match self.dispatch(&user_id, &input, &mut session).await {
            Ok(reply) => reply.into_response(session),
            Err(err) => {
                tracing::error!(
                    user_id = %user_id,
                    command = input.name(),
                    error = %err,
                    "turn failed"
                );
                self.apology().into_response(ConversationState::default())
            }
        }
    }

    /// Like [`handle`](Self::handle), but a panic inside the turn still yields a reply.
    pub async fn handle_guarded(&self, request: TurnRequest) -> TurnResponse {
        let handler = self.clone();
        match tokio::spawn(async move { handler.handle(request).await }).await {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(error = %err, "turn aborted");
                self.apology().into_response(ConversationState::default())
            }
        }
    }

    fn apology(&self) -> Reply {
        Reply::ask(self.phrases.apology(), "What can I help you with?")
    }

    async fn dispatch(
        &self,
        user_id: &str,
        input: &Intent,
        session: &mut ConversationState,
    ) -> Result<Reply> {
        if session.dialogue.is_collecting() {
            if let Some(step) = Self::continuation(input, session) {
                return self.apply_step(user_id, step, session).await;
            }
        }
        self.route(user_id, input, session).await
    }

    /// Decide whether `input` answers the open add-a-book question.
    ///
    /// Returns `None` when the turn should be routed as a normal command.
    fn continuation(input: &Intent, session: &mut ConversationState) -> Option<Step> {
        let current = &session.dialogue;
        match input {
            Intent::AddBook { .. } => None,
            other if other.interrupts_collection() => {
                tracing::debug!(
                    command = other.name(),
                    awaiting = current.awaiting(),
                    "add-book flow abandoned"
                );
                session.dialogue = DialogueState::Idle;
                None
            }
            Intent::Answer { value } => Some(dialogue::continue_with(current, slot(value))),
            Intent::Unrecognized => Some(dialogue::continue_with(current, None)),
            // Another command was heard; salvage any value it carried.
            other => Some(match other.first_slot() {
                Some(value) => dialogue::continue_with(current, Some(value)),
                None => dialogue::clarify(current),
            }),
        }
    }

    async fn apply_step(
        &self,
        user_id: &str,
        step: Step,
        session: &mut ConversationState,
    ) -> Result<Reply> {
        let (title, author, category) = match step {
            Step::Prompt { state, prompt } => {
                session.dialogue = state;
                return Ok(Self::slot_prompt(prompt));
            }
            Step::Complete {
                title,
                author,
                category,
            } => (title, author, category),
        };

        session.clear();
        let reply = match self
            .manager
            .add_book(user_id, &title, &author, &category)
            .await?
        {
            AddBookOutcome::Added(book) => {
                let total = self.manager.catalog_size(user_id).await?;
                let category = if book.has_category() {
                    format!(", category {}", book.category)
                } else {
                    String::new()
                };
                Reply::ask(
                    format!(
                        "{} I've added '{}'{}{}. You now have {} in your library. {}",
                        self.phrases.confirmation(),
                        book.title,
                        by_author(&book),
                        category,
                        count(total, "book", "books"),
                        self.phrases.anything_else()
                    ),
                    self.phrases.what_next(),
                )
            }
            AddBookOutcome::DuplicateTitle(existing) => Reply::ask(
                format!(
                    "'{}' is already in your library. {}",
                    existing.title,
                    self.phrases.anything_else()
                ),
                self.phrases.what_next(),
            ),
        };
        Ok(reply)
    }

    fn slot_prompt(prompt: SlotPrompt) -> Reply {
        match prompt {
            SlotPrompt::Title => Reply::ask(
                "Great! Let's add a book. What's the title?",
                "What's the title of the book?",
            ),
            SlotPrompt::Author { title } => Reply::ask(
                format!(
                    "'{title}' sounds interesting! Who is the author? If you don't know, say: I don't know the author."
                ),
                "Who is the author?",
            ),
            SlotPrompt::Category { title, author } => {
                let author = if author == UNKNOWN_AUTHOR {
                    String::new()
                } else {
                    format!(" by {author}")
                };
                Reply::ask(
                    format!(
                        "Almost done with '{title}'{author}. What type or genre is it? If you're not sure, say: I don't know the category."
                    ),
                    "What type of book is it?",
                )
            }
            SlotPrompt::Clarify(Field::Title) => Reply::ask(
                "I didn't catch the title. Please say: 'the title is' followed by the name of the book.",
                "What's the title? Say 'the title is' and the name.",
            ),
            SlotPrompt::Clarify(Field::Author) => Reply::ask(
                "I didn't quite get that. Please say: 'the author is' followed by the name. Or say: I don't know the author.",
                "Who is the author? Say 'the author is' and the name.",
            ),
            SlotPrompt::Clarify(Field::Category) => Reply::ask(
                "I didn't quite get that. Please say: 'the category is' followed by the genre. Or say: I don't know the category.",
                "What type is it? Say 'the category is' and the genre.",
            ),
        }
    }

    async fn route(
        &self,
        user_id: &str,
        input: &Intent,
        session: &mut ConversationState,
    ) -> Result<Reply> {
        match input {
            Intent::StartSession => {
                session.clear();
                self.welcome(user_id).await
            }
            Intent::AddBook {
                title,
                author,
                category,
            } => {
                let step =
                    dialogue::begin(&session.dialogue, slot(title), slot(author), slot(category));
                self.apply_step(user_id, step, session).await
            }
            Intent::ListBooks { category, author } => {
                let filter = ListFilter::from_slots(slot(category), slot(author));
                self.list_books(user_id, filter, session).await
            }
            Intent::NextPage => self.next_page(user_id, session).await,
            Intent::ExitListing => {
                session.listing = None;
                Ok(Reply::ask(
                    format!(
                        "All right, I've stopped listing your books. {}",
                        self.phrases.anything_else()
                    ),
                    self.phrases.what_next(),
                ))
            }
            Intent::SearchBook { title } => match slot(title) {
                Some(title) => self.search(user_id, title).await,
                None => Ok(Reply::ask(
                    "Which book do you want to look for?",
                    "Tell me the title of the book you're looking for.",
                )),
            },
            Intent::LoanBook { title, borrower } => match slot(title) {
                Some(title) => self.lend(user_id, title, slot(borrower)).await,
                None => Ok(Reply::ask(
                    "Sure! Which book do you want to lend?",
                    "What's the title of the book?",
                )),
            },
            Intent::ReturnBook { title, loan_id } => {
                if slot(title).is_none() && slot(loan_id).is_none() {
                    return Ok(Reply::ask(
                        "Great! Which book did you get back?",
                        "What's the title of the book?",
                    ));
                }
                self.give_back(user_id, slot(title), slot(loan_id)).await
            }
            Intent::ListActiveLoans => self.active_loans(user_id).await,
            Intent::ListHistory => self.history(user_id).await,
            Intent::RemoveBook { title } => match slot(title) {
                Some(title) => self.remove(user_id, title).await,
                None => Ok(Reply::ask(
                    "Which book do you want to remove from your library?",
                    "What's the title?",
                )),
            },
            Intent::ClearCache => {
                session.clear();
                let totals = self.manager.refresh(user_id).await?;
                Ok(Reply::ask(
                    format!(
                        "I've cleared the cache and synced your library. You have {} in total and {}. {}",
                        count(totals.books, "book", "books"),
                        count(totals.active_loans, "active loan", "active loans"),
                        self.phrases.anything_else()
                    ),
                    self.phrases.what_next(),
                ))
            }
            Intent::Help => Ok(Reply::ask(
                "Of course! Here's how your library works. You can add new books by saying 'add a book', \
                 hear all your books with 'list my books', look for a specific book with 'search' and the title, \
                 lend a book by saying 'lend' followed by the title, record returns with 'return' and the title, \
                 or check your active loans by asking 'which books are on loan'. What would you like to do first?",
                "What can I help you with?",
            )),
            Intent::ShowOptions => self.options(user_id).await,
            Intent::Cancel => {
                session.clear();
                Ok(Reply::end(self.phrases.farewell()))
            }
            Intent::SessionEnded => {
                session.clear();
                Ok(Reply::end(""))
            }
            Intent::Answer { .. } | Intent::Unrecognized => Ok(self.not_understood(session)),
        }
    }

    fn not_understood(&self, session: &ConversationState) -> Reply {
        if session.listing.is_some() {
            return Reply::ask(
                "I didn't get that. Do you want to hear more books? Say 'next' to continue or 'exit' to stop.",
                "Say 'next' or 'exit'.",
            );
        }
        Reply::ask(
            format!(
                "{} Remember that I can help you add books, list them, lend them or record returns.",
                self.phrases.fallback()
            ),
            "What would you like to do?",
        )
    }

    async fn welcome(&self, user_id: &str) -> Result<Reply> {
        let totals = self.manager.welcome(user_id).await?;
        let mut speech = if totals.returning && totals.books > 0 {
            let mut status = format!(
                "Hello again! Good to see you! I see you have {} in your library",
                count(totals.books, "book", "books")
            );
            if totals.active_loans > 0 {
                status.push_str(&format!(
                    " and {}.",
                    count(totals.active_loans, "active loan", "active loans")
                ));
            } else {
                status.push('.');
            }
            status
        } else if totals.books == 0 {
            format!(
                "{} Looks like it's your first time here. Let's start building your collection!",
                self.phrases.greeting()
            )
        } else {
            format!(
                "{} You have {} in your collection.",
                self.phrases.greeting(),
                count(totals.books, "book", "books")
            )
        };
        speech.push(' ');
        speech.push_str(self.phrases.menu_options());
        speech.push(' ');
        speech.push_str(self.phrases.what_next());

        Ok(Reply::ask(
            speech,
            "Would you like me to go over the main commands, or add a book?",
        ))
    }

    async fn options(&self, user_id: &str) -> Result<Reply> {
        let books = self.manager.catalog_size(user_id).await?;
        let (loans, _) = self.manager.active_loan_examples(user_id).await?;
        let context = if books == 0 {
            " Since you don't have any books yet, I suggest starting by adding a few."
        } else if loans > 0 {
            " Remember that some of your books are on loan."
        } else {
            ""
        };
        Ok(Reply::ask(
            format!(
                "Of course! {}{} {}",
                self.phrases.menu_options(),
                context,
                self.phrases.what_next()
            ),
            self.phrases.what_next(),
        ))
    }

    async fn list_books(
        &self,
        user_id: &str,
        filter: ListFilter,
        session: &mut ConversationState,
    ) -> Result<Reply> {
        session.listing = None;
        let listed = self.manager.list_filtered(user_id, &filter).await?;
        let described = filter.describe();

        if listed.catalog_size == 0 {
            return Ok(Reply::ask(
                "You don't have any books in your library yet. Would you like to add the first one? Just say: add a book.",
                "Do you want to add your first book?",
            ));
        }
        if listed.books.is_empty() {
            return Ok(Reply::ask(
                format!(
                    "I couldn't find any books{described}. {}",
                    self.phrases.anything_else()
                ),
                self.phrases.what_next(),
            ));
        }

        let total = listed.books.len();
        if !needs_paging(total, self.page_size) {
            let titles = quoted_list(listed.books.iter().map(|b| b.title.as_str()));
            return Ok(Reply::ask(
                format!(
                    "You have {}{described}: {titles}. {}",
                    count(total, "book", "books"),
                    self.phrases.anything_else()
                ),
                self.phrases.what_next(),
            ));
        }

        let first = page(&listed.books, 0, self.page_size);
        let titles = quoted_list(first.items.iter().map(|b| b.title.as_str()));
        let speech = format!(
            "You have {total} books{described}. I'll read them {size} at a time. \
             Books {} to {}: {titles}. There are {} more. Say 'next' to continue or 'exit' to stop.",
            first.start + 1,
            first.end,
            first.remaining(),
            size = self.page_size,
        );
        session.listing = Some(ListingCursor {
            filter,
            next_page: 1,
        });
        Ok(Reply::ask(
            speech,
            "Do you want to hear more books? Say 'next' or 'exit'.",
        ))
    }

    async fn next_page(&self, user_id: &str, session: &mut ConversationState) -> Result<Reply> {
        let Some(cursor) = session.listing.take() else {
            return Ok(Reply::ask(
                "I'm not reading a list right now. Do you want to hear your books?",
                "Should I list your books?",
            ));
        };

        let listed = self.manager.list_filtered(user_id, &cursor.filter).await?;
        let current = page(&listed.books, cursor.next_page, self.page_size);
        if current.items.is_empty() {
            return Ok(Reply::ask(
                format!(
                    "There are no more books to read. {}",
                    self.phrases.anything_else()
                ),
                self.phrases.what_next(),
            ));
        }

        let titles = quoted_list(current.items.iter().map(|b| b.title.as_str()));
        let mut speech = format!("Books {} to {}: {titles}. ", current.start + 1, current.end);
        if current.is_last() {
            speech.push_str(&format!(
                "That's all your books{}. {}",
                cursor.filter.describe(),
                self.phrases.anything_else()
            ));
            return Ok(Reply::ask(speech, self.phrases.what_next()));
        }

        speech.push_str(&format!(
            "There are {} more. Say 'next' to continue or 'exit' to stop.",
            current.remaining()
        ));
        session.listing = Some(ListingCursor {
            next_page: cursor.next_page + 1,
            ..cursor
        });
        Ok(Reply::ask(
            speech,
            "Do you want to hear more books? Say 'next' or 'exit'.",
        ))
    }

    async fn search(&self, user_id: &str, query: &str) -> Result<Reply> {
        let found = self.manager.find_by_title_fuzzy(user_id, query).await?;
        let speech = match found.as_slice() {
            [] => format!("I couldn't find any book with the title '{query}'. "),
            [book] => {
                let mut speech = format!(
                    "I found '{}'. Author: {}. Category: {}. Status: {}. ",
                    book.title,
                    book.author,
                    book.category,
                    book.status.as_str()
                );
                if book.loan_count > 0 {
                    speech.push_str(&format!(
                        "It has been lent {}. ",
                        count(book.loan_count as usize, "time", "times")
                    ));
                }
                speech
            }
            many => {
                let shown = many
                    .iter()
                    .take(SEARCH_MATCHES_SPOKEN)
                    .map(|b| format!("'{}' by {}", b.title, b.author))
                    .collect::<Vec<_>>()
                    .join(", ");
                let rest = many.len().saturating_sub(SEARCH_MATCHES_SPOKEN);
                if rest > 0 {
                    format!(
                        "I found {} books matching '{query}': {shown}, and {rest} more. ",
                        many.len()
                    )
                } else {
                    format!(
                        "I found {} books matching '{query}': {shown}. ",
                        many.len()
                    )
                }
            }
        };
        Ok(Reply::ask(
            speech + self.phrases.anything_else(),
            self.phrases.what_next(),
        ))
    }

    async fn lend(&self, user_id: &str, title: &str, borrower: Option<&str>) -> Result<Reply> {
        let outcome = self.manager.register_loan(user_id, title, borrower).await?;
        let available = self.manager.available_summary(user_id).await?;
        let examples = quoted_list(available.examples.iter().map(String::as_str));

        let reply = match outcome {
            LoanOutcome::Loaned(loan) => {
                let to = if loan.borrower == DEFAULT_BORROWER {
                    " to a friend".to_string()
                } else {
                    format!(" to {}", loan.borrower)
                };
                let mut speech = format!(
                    "{} I've recorded the loan of '{}'{to}. The suggested return date is {}. ",
                    self.phrases.confirmation(),
                    loan.title,
                    loan.due_date_spoken()
                );
                if available.count > 0 {
                    speech.push_str(&format!(
                        "You have {} available. ",
                        count(available.count, "book", "books")
                    ));
                } else {
                    speech.push_str("You have no books left to lend! ");
                }
                speech.push_str(self.phrases.anything_else());
                Reply::ask(speech, self.phrases.what_next())
            }
            LoanOutcome::AlreadyLoaned(loan) => {
                let mut speech = format!("'{}' is already lent to {}. ", loan.title, loan.borrower);
                if available.count > 0 {
                    speech.push_str(&format!(
                        "Do you want to lend another one? Available: {examples}."
                    ));
                } else {
                    speech.push_str("You don't have any other books available to lend.");
                }
                Reply::ask(speech, "Which other book do you want to lend?")
            }
            LoanOutcome::NotFound => {
                let mut speech = format!("Hmm, I can't find '{title}' in your library. ");
                let candidates = self.manager.search_for_loan(user_id, title).await?;
                if !candidates.is_empty() {
                    let titles = quoted_list(
                        candidates
                            .iter()
                            .take(LOAN_SUGGESTIONS)
                            .map(|b| b.title.as_str()),
                    );
                    speech.push_str(&format!("Did you mean {titles}? Say the exact title."));
                } else if available.count > 0 {
                    speech.push_str(&format!(
                        "Available books include {examples}. Which one do you want to lend?"
                    ));
                } else if self.manager.catalog_size(user_id).await? > 0 {
                    speech.push_str(
                        "All your books are on loan, or I didn't recognize the exact title.",
                    );
                } else {
                    speech.push_str(
                        "Actually, you don't have any books yet. Say 'add a book' to get started.",
                    );
                }
                Reply::ask(speech, "Which book do you want to lend?")
            }
        };
        Ok(reply)
    }

    async fn give_back(
        &self,
        user_id: &str,
        title: Option<&str>,
        loan_id: Option<&str>,
    ) -> Result<Reply> {
        let outcome = self.manager.register_return(user_id, title, loan_id).await?;
        let (on_loan, examples) = self.manager.active_loan_examples(user_id).await?;

        let reply = match outcome {
            ReturnOutcome::NoActiveLoans => Reply::ask(
                format!(
                    "You don't have any books on loan right now. All your books are on the shelf. {}",
                    self.phrases.anything_else()
                ),
                self.phrases.what_next(),
            ),
            ReturnOutcome::NotFound => {
                let asked = title.or(loan_id).unwrap_or_default();
                let mut speech = format!("Hmm, I couldn't find an active loan for '{asked}'. ");
                match examples.as_slice() {
                    [] => speech.push_str("Actually, you don't have any books on loan!"),
                    [only] => speech.push_str(&format!(
                        "You only have {only} on loan. Is that the one?"
                    )),
                    several => speech.push_str(&format!(
                        "You have on loan: {}. Which one is it?",
                        several.join(", ")
                    )),
                }
                Reply::ask(speech, "Which book do you want to return?")
            }
            ReturnOutcome::Returned(loan) => {
                let mut speech = format!(
                    "{} I've recorded the return of '{}'. ",
                    self.phrases.confirmation(),
                    loan.title
                );
                if loan.on_time.unwrap_or(true) {
                    speech.push_str("It came back on time! ");
                } else {
                    speech.push_str("It came back a little late, but no problem. ");
                }
                speech.push_str("I hope they enjoyed it. ");
                if on_loan > 0 {
                    speech.push_str(&format!(
                        "You still have {} on loan. ",
                        count(on_loan, "book", "books")
                    ));
                }
                speech.push_str(self.phrases.anything_else());
                Reply::ask(speech, self.phrases.what_next())
            }
        };
        Ok(reply)
    }

    async fn active_loans(&self, user_id: &str) -> Result<Reply> {
        let summary = self.manager.summarize_active_loans(user_id).await?;
        if summary.total == 0 {
            return Ok(Reply::ask(
                format!(
                    "Excellent! You don't have any books on loan right now. Everything is on the shelf. {}",
                    self.phrases.anything_else()
                ),
                self.phrases.what_next(),
            ));
        }

        let mut speech = if summary.total == 1 {
            "Let me see... You only have one book on loan: ".to_string()
        } else if summary.total > ACTIVE_LOANS_SPOKEN {
            format!(
                "Let me check... You have {} books on loan. Here are the first ones: ",
                summary.total
            )
        } else {
            format!("Let me check... You have {} books on loan: ", summary.total)
        };
        let shown = summary.descriptions.len().min(ACTIVE_LOANS_SPOKEN);
        speech.push_str(&summary.descriptions[..shown].join("; "));
        speech.push_str(". ");
        if summary.total > ACTIVE_LOANS_SPOKEN {
            speech.push_str(&format!("And {} more. ", summary.total - ACTIVE_LOANS_SPOKEN));
        }
        if summary.has_overdue {
            speech.push_str("Heads up! Some books are overdue. You might want to ask for them back. ");
        } else if summary.has_due_soon {
            speech.push_str("Some are due soon, don't forget! ");
        }
        speech.push_str(self.phrases.anything_else());
        Ok(Reply::ask(speech, self.phrases.what_next()))
    }

    async fn history(&self, user_id: &str) -> Result<Reply> {
        let summary = self.manager.summarize_history(user_id).await?;
        let mut speech = if summary.total == 0 {
            "You haven't recorded any returns yet. When you lend books and get them back, they will show up here. "
                .to_string()
        } else {
            let mut speech = format!(
                "You have recorded {} in total. ",
                count(summary.total, "return", "returns")
            );
            let listed = summary.descriptions.join(", ");
            if summary.is_complete {
                speech.push_str(&format!("The returned books are: {listed}. "));
            } else {
                speech.push_str(&format!(
                    "The {} most recent are: {listed}. You have {} more in your history. ",
                    summary.descriptions.len(),
                    count(
                        summary.total - summary.descriptions.len(),
                        "return",
                        "returns"
                    )
                ));
            }
            speech
        };
        speech.push_str(self.phrases.anything_else());
        Ok(Reply::ask(speech, self.phrases.what_next()))
    }

    async fn remove(&self, user_id: &str, title: &str) -> Result<Reply> {
        let reply = match self.manager.remove_book(user_id, title).await? {
            RemoveOutcome::Removed(book) => {
                let left = self.manager.catalog_size(user_id).await?;
                Reply::ask(
                    format!(
                        "{} I've removed '{}' from your library. You now have {}. {}",
                        self.phrases.confirmation(),
                        book.title,
                        count(left, "book", "books"),
                        self.phrases.anything_else()
                    ),
                    self.phrases.what_next(),
                )
            }
            RemoveOutcome::NotFound => Reply::ask(
                format!(
                    "I couldn't find the book '{title}' in your library. Make sure the title is exact. {}",
                    self.phrases.anything_else()
                ),
                self.phrases.what_next(),
            ),
            RemoveOutcome::CurrentlyLoaned(loan) => Reply::ask(
                format!(
                    "I can't remove '{}' because it's currently lent to {}. Ask for it back first, then say 'return book' when you have it.",
                    loan.title, loan.borrower
                ),
                self.phrases.what_next(),
            ),
        };
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::{json, Value};
    use shelf_db::{CachedSnapshotStore, InMemorySnapshotStore, SnapshotStore, StorageError};

    use super::*;
    use crate::modules::library::clock::SystemClock;
    use crate::modules::library::models::BookStatus;
    use crate::modules::library::phrases::FirstPhrase;
    use crate::modules::library::store::LibraryStore;

    const USER: &str = "amzn1.ask.account.TEST";

    fn handler(page_size: usize) -> TurnHandler {
        let store = LibraryStore::new(
            Arc::new(InMemorySnapshotStore::new()),
            Duration::from_secs(1),
        );
        let manager = LibraryManager::new(store, Arc::new(SystemClock), 7);
        TurnHandler::new(manager, Phrases::new(Arc::new(FirstPhrase)), page_size)
    }

    async fn turn(
        handler: &TurnHandler,
        input: Intent,
        session: ConversationState,
    ) -> TurnResponse {
        handler
            .handle(TurnRequest {
                user_id: USER.to_string(),
                input,
                session,
            })
            .await
    }

    fn answer(value: &str) -> Intent {
        Intent::Answer {
            value: Some(value.to_string()),
        }
    }

    fn add_book(title: &str) -> Intent {
        Intent::AddBook {
            title: Some(title.to_string()),
            author: Some("unknown".to_string()),
            category: Some("uncategorized".to_string()),
        }
    }

    #[test]
    fn intent_uses_command_tag() {
        let intent: Intent =
            serde_json::from_value(json!({"command": "loan_book", "title": "Dune"})).unwrap();
        assert_eq!(
            intent,
            Intent::LoanBook {
                title: Some("Dune".into()),
                borrower: None
            }
        );
        let intent: Intent = serde_json::from_value(json!({"command": "next_page"})).unwrap();
        assert_eq!(intent, Intent::NextPage);
        assert_eq!(intent.name(), "next_page");
    }

    #[test]
    fn first_slot_skips_blank_values() {
        let intent = Intent::ReturnBook {
            title: Some("  ".into()),
            loan_id: Some("LOAN-1".into()),
        };
        assert_eq!(intent.first_slot(), Some("LOAN-1"));
        assert_eq!(Intent::ClearCache.first_slot(), None);
    }

    #[tokio::test]
    async fn interrupt_abandons_collection() {
        let handler = handler(10);
        let add = Intent::AddBook {
            title: None,
            author: None,
            category: None,
        };
        let started = turn(&handler, add, ConversationState::default()).await;
        assert_eq!(started.session.dialogue, DialogueState::AwaitingTitle);

        let response = turn(&handler, Intent::ListActiveLoans, started.session).await;
        assert_eq!(response.session.dialogue, DialogueState::Idle);
        assert!(response.speech.contains("don't have any books on loan"));
    }

    #[tokio::test]
    async fn misheard_command_salvages_slot_value() {
        let handler = handler(10);
        let session = ConversationState {
            dialogue: DialogueState::AwaitingAuthor {
                title: "Dune".into(),
            },
            listing: None,
        };

        let response = turn(
            &handler,
            Intent::SearchBook {
                title: Some("frank herbert".into()),
            },
            session,
        )
        .await;
        assert_eq!(
            response.session.dialogue,
            DialogueState::AwaitingCategory {
                title: "Dune".into(),
                author: "Frank Herbert".into()
            }
        );
    }

    #[tokio::test]
    async fn misheard_command_without_value_asks_again() {
        let handler = handler(10);
        let session = ConversationState {
            dialogue: DialogueState::AwaitingAuthor {
                title: "Dune".into(),
            },
            listing: None,
        };

        let response = turn(&handler, Intent::ClearCache, session.clone()).await;
        assert_eq!(response.session, session);
        assert!(response.speech.contains("'the author is'"));
        assert_eq!(handler.manager().catalog_size(USER).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn completed_flow_clears_session_even_on_duplicate() {
        let handler = handler(10);
        turn(&handler, add_book("Dune"), ConversationState::default()).await;

        let session = ConversationState {
            dialogue: DialogueState::AwaitingCategory {
                title: "dune".into(),
                author: "unknown".into(),
            },
            listing: None,
        };
        let response = turn(&handler, answer("scifi"), session).await;
        assert_eq!(response.session, ConversationState::default());
        assert!(response.speech.starts_with("'Dune' is already in your library."));
    }

    #[tokio::test]
    async fn long_listing_pages_until_exhausted() {
        let handler = handler(2);
        for title in ["A", "B", "C", "D", "E"] {
            turn(&handler, add_book(title), ConversationState::default()).await;
        }

        let first = turn(
            &handler,
            Intent::ListBooks {
                category: None,
                author: None,
            },
            ConversationState::default(),
        )
        .await;
        assert!(first.speech.contains("Books 1 to 2: 'A', 'B'."));
        assert!(first.speech.contains("There are 3 more."));
        assert_eq!(first.session.listing.as_ref().map(|c| c.next_page), Some(1));

        let second = turn(&handler, Intent::NextPage, first.session).await;
        assert!(second.speech.starts_with("Books 3 to 4: 'C', 'D'."));

        let last = turn(&handler, Intent::NextPage, second.session).await;
        assert!(last.speech.starts_with("Books 5 to 5: 'E'. That's all your books."));
        assert!(last.session.listing.is_none());

        let idle = turn(&handler, Intent::NextPage, last.session).await;
        assert!(idle.speech.starts_with("I'm not reading a list right now."));
    }

    #[tokio::test]
    async fn short_listing_reads_everything_without_cursor() {
        let handler = handler(10);
        let empty = turn(
            &handler,
            Intent::ListBooks {
                category: None,
                author: None,
            },
            ConversationState::default(),
        )
        .await;
        assert!(empty.speech.starts_with("You don't have any books in your library yet."));

        turn(&handler, add_book("Dune"), ConversationState::default()).await;
        let listed = turn(
            &handler,
            Intent::ListBooks {
                category: Some("available".into()),
                author: None,
            },
            ConversationState::default(),
        )
        .await;
        assert!(listed.speech.starts_with("You have 1 book available: 'Dune'."));
        assert!(listed.session.listing.is_none());
    }

    #[tokio::test]
    async fn cancel_ends_session_with_farewell() {
        let handler = handler(10);
        let session = ConversationState {
            dialogue: DialogueState::AwaitingTitle,
            listing: None,
        };
        let response = turn(&handler, Intent::Cancel, session).await;
        assert!(response.end_session);
        assert_eq!(response.speech, "See you later! Enjoy your reading.");
        assert_eq!(response.session, ConversationState::default());
    }

    #[tokio::test]
    async fn search_summarizes_by_match_count() {
        let handler = handler(10);
        for title in ["Dune", "Dune Messiah", "Children of Dune", "Heretics of Dune"] {
            turn(&handler, add_book(title), ConversationState::default()).await;
        }

        let one = turn(
            &handler,
            Intent::SearchBook {
                title: Some("messiah".into()),
            },
            ConversationState::default(),
        )
        .await;
        assert!(one.speech.starts_with(
            "I found 'Dune Messiah'. Author: unknown. Category: uncategorized. Status: available."
        ));

        let many = turn(
            &handler,
            Intent::SearchBook {
                title: Some("dune".into()),
            },
            ConversationState::default(),
        )
        .await;
        assert!(many.speech.starts_with("I found 4 books matching 'dune':"));
        assert!(many.speech.contains(", and 1 more."));
    }

    struct FailingStore {
        panics: bool,
    }

    #[async_trait::async_trait]
    impl SnapshotStore for FailingStore {
        async fn get(&self, _user_id: &str) -> std::result::Result<Option<Value>, StorageError> {
            if self.panics {
                panic!("snapshot backend crashed");
            }
            Err(StorageError::LockPoisoned("read"))
        }

        async fn put(&self, _user_id: &str, _document: Value) -> std::result::Result<(), StorageError> {
            Err(StorageError::LockPoisoned("write"))
        }

        async fn delete(&self, _user_id: &str) -> std::result::Result<bool, StorageError> {
            Ok(false)
        }
    }

    fn handler_over(backend: Arc<dyn SnapshotStore>) -> TurnHandler {
        let store = LibraryStore::new(backend, Duration::from_secs(1));
        let manager = LibraryManager::new(store, Arc::new(SystemClock), 7);
        TurnHandler::new(manager, Phrases::new(Arc::new(FirstPhrase)), 10)
    }

    fn busy_session() -> ConversationState {
        ConversationState {
            dialogue: DialogueState::AwaitingAuthor {
                title: "Dune".into(),
            },
            listing: Some(ListingCursor {
                filter: ListFilter::All,
                next_page: 1,
            }),
        }
    }

    #[tokio::test]
    async fn storage_failure_apologizes_and_resets_session() {
        let handler = handler_over(Arc::new(FailingStore { panics: false }));

        let response = turn(&handler, Intent::ListActiveLoans, busy_session()).await;
        assert_eq!(
            response.speech,
            "Oops, something didn't go as expected. Can we try again?"
        );
        assert_eq!(response.session, ConversationState::default());
        assert!(!response.end_session);

        // Completing the add hits storage too and fails the same way.
        let response = turn(&handler, add_book("Dune"), busy_session()).await;
        assert_eq!(response.session, ConversationState::default());
    }

    #[tokio::test]
    async fn panicking_turn_still_gets_a_reply() {
        let handler = handler_over(Arc::new(FailingStore { panics: true }));

        let response = handler
            .handle_guarded(TurnRequest {
                user_id: USER.to_string(),
                input: Intent::StartSession,
                session: busy_session(),
            })
            .await;
        assert!(response.speech.starts_with("Oops"));
        assert_eq!(response.session, ConversationState::default());
        assert_eq!(response.reprompt.as_deref(), Some("What can I help you with?"));
    }

    #[tokio::test]
    async fn clear_cache_rereads_durable_snapshot_and_resyncs_status() {
        let durable = InMemorySnapshotStore::new();
        let cached = CachedSnapshotStore::new(Arc::new(durable.clone()), Duration::from_secs(3600));
        let handler = handler_over(Arc::new(cached));
        turn(&handler, add_book("Dune"), ConversationState::default()).await;

        // Another writer lends Dune and adds Emma without touching the cache.
        let mut document = durable.get(USER).await.unwrap().unwrap();
        let dune_id = document["catalog"][0]["id"].clone();
        document["catalog"]
            .as_array_mut()
            .unwrap()
            .push(json!({"id": "emma0001", "title": "Emma"}));
        document["activeLoans"] = json!([{
            "id": "LOAN-20261017-aaaaaaaa",
            "bookId": dune_id,
            "title": "Dune",
            "borrower": "Ana",
            "startedAt": "2026-10-17T09:00:00Z",
            "dueAt": "2026-10-24T09:00:00Z"
        }]);
        durable.put(USER, document).await.unwrap();

        assert_eq!(handler.manager().catalog_size(USER).await.unwrap(), 1);

        let listing = ConversationState {
            listing: busy_session().listing,
            ..ConversationState::default()
        };
        let response = turn(&handler, Intent::ClearCache, listing).await;
        assert!(response
            .speech
            .contains("You have 2 books in total and 1 active loan."));
        assert_eq!(response.session, ConversationState::default());

        let state = handler.manager().store().peek(USER).await.unwrap().unwrap();
        assert_eq!(state.catalog.len(), 2);
        assert_eq!(state.catalog[0].status, BookStatus::Loaned);
        assert_eq!(state.catalog[1].status, BookStatus::Available);
    }

    #[tokio::test]
    async fn short_loan_list_is_read_in_full() {
        let handler = handler(10);
        for title in ["Dune", "Emma"] {
            turn(&handler, add_book(title), ConversationState::default()).await;
            turn(
                &handler,
                Intent::LoanBook {
                    title: Some(title.into()),
                    borrower: Some("Ana".into()),
                },
                ConversationState::default(),
            )
            .await;
        }

        let response = turn(&handler, Intent::ListActiveLoans, ConversationState::default()).await;
        assert!(response
            .speech
            .starts_with("Let me check... You have 2 books on loan: 'Dune' is with Ana"));
        assert!(!response.speech.contains("first ones"));
    }
}
