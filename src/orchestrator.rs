//! Query state for an interactive lookup.
//!
//! [`SearchState`] is a plain state machine: every transition is a method and
//! staleness is decided by comparing generation numbers, so it can be tested
//! without any timers. [`SearchOrchestrator`] drives it from a tokio runtime,
//! debouncing query edits and publishing each state change on a `watch`
//! channel.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_DEBOUNCE;
use crate::models::Record;
use crate::source::{DataSource, DataSourceError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPhase {
    #[default]
    Idle,
    Searching,
    Success,
    Failed,
}

/// Identifies one started search. Only the ticket of the most recent
/// transition may still write results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ticket(u64);

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchState {
    pub query: String,
    pub results: Vec<Record>,
    pub loading: bool,
    pub error: Option<String>,
    pub phase: SearchPhase,
    #[serde(skip)]
    generation: u64,
}

impl SearchState {
    /// Records an edit of the query text. Any search started earlier becomes
    /// stale. Returns the ticket of this edit with the trimmed term to search
    /// for, or `None` for a blank query, in which case results and error are
    /// dropped immediately.
    pub fn set_query(&mut self, term: &str) -> Option<(Ticket, String)> {
        self.query = term.to_string();
        let trimmed = term.trim();
        if trimmed.is_empty() {
            self.reset_results();
            None
        } else {
            self.generation += 1;
            Some((Ticket(self.generation), trimmed.to_string()))
        }
    }

    /// Enters `Searching` and hands out the ticket that may complete it.
    pub fn begin(&mut self) -> Ticket {
        self.generation += 1;
        self.loading = true;
        self.error = None;
        self.phase = SearchPhase::Searching;
        Ticket(self.generation)
    }

    /// Like [`SearchState::begin`], but only while `edit` is still the latest
    /// transition. A debounced search whose query was edited or cleared in
    /// the meantime never starts.
    pub fn begin_after(&mut self, edit: Ticket) -> Option<Ticket> {
        self.is_current(edit).then(|| self.begin())
    }

    /// Applies the outcome of the search identified by `ticket`. Returns
    /// false, leaving the state untouched, when a newer transition happened
    /// since that search began.
    pub fn apply(&mut self, ticket: Ticket, outcome: Result<Vec<Record>, String>) -> bool {
        if ticket.0 != self.generation {
            return false;
        }

        self.loading = false;
        match outcome {
            Ok(records) => {
                self.results = records;
                self.error = None;
                self.phase = SearchPhase::Success;
            }
            Err(message) => {
                self.results.clear();
                self.error = Some(message);
                self.phase = SearchPhase::Failed;
            }
        }
        true
    }

    /// Back to the initial state, whatever is in flight.
    pub fn clear(&mut self) {
        self.query.clear();
        self.reset_results();
    }

    pub fn is_current(&self, ticket: Ticket) -> bool {
        ticket.0 == self.generation
    }

    fn reset_results(&mut self) {
        self.generation += 1;
        self.results.clear();
        self.error = None;
        self.loading = false;
        self.phase = SearchPhase::Idle;
    }
}

/// Debounced, last-write-wins search over a [`DataSource`].
///
/// Cloning is cheap and every clone drives the same state. Requires a tokio
/// runtime.
#[derive(Clone)]
pub struct SearchOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    source: Arc<dyn DataSource>,
    debounce: Duration,
    state: watch::Sender<SearchState>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self
            .pending
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

impl SearchOrchestrator {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self::with_debounce(source, DEFAULT_DEBOUNCE)
    }

    pub fn with_debounce(source: Arc<dyn DataSource>, debounce: Duration) -> Self {
        let (state, _) = watch::channel(SearchState::default());
        Self {
            inner: Arc::new(Inner {
                source,
                debounce,
                state,
                pending: Mutex::new(None),
            }),
        }
    }

    pub fn source(&self) -> &Arc<dyn DataSource> {
        &self.inner.source
    }

    pub fn snapshot(&self) -> SearchState {
        self.inner.state.borrow().clone()
    }

    /// Receives every published state change.
    pub fn subscribe(&self) -> watch::Receiver<SearchState> {
        self.inner.state.subscribe()
    }

    /// Updates the query. A blank query clears results at once; anything else
    /// (re)starts the debounce timer, and the search runs with whatever term
    /// is current when the timer fires.
    pub fn set_query(&self, term: &str) {
        let mut scheduled = None;
        self.inner
            .state
            .send_modify(|state| scheduled = state.set_query(term));

        self.cancel_pending();
        let Some((edit, term)) = scheduled else {
            debug!(
                stage = "search",
                event = "search.query.cleared",
                "blank query, results cleared"
            );
            return;
        };

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let debounce = self.inner.debounce;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            SearchOrchestrator { inner }.fire(edit, term);
        });

        *self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Debounce expiry for the edit identified by `edit`. The search is
    /// started in the same state update that checks `edit` is still current,
    /// then runs detached so a later abort of the timer task cannot cut an
    /// in-flight request short.
    fn fire(&self, edit: Ticket, term: String) {
        let mut started = None;
        self.inner
            .state
            .send_if_modified(|state| {
                started = state.begin_after(edit);
                started.is_some()
            });

        let Some(ticket) = started else {
            debug!(
                stage = "search",
                event = "search.debounce.stale",
                term = %term,
                "query changed before debounce expired"
            );
            return;
        };

        let orchestrator = self.clone();
        tokio::spawn(async move {
            orchestrator.execute(ticket, &term).await;
        });
    }

    /// Resets query, results and error. Results of searches still in flight
    /// are discarded when they arrive.
    pub fn clear(&self) {
        self.cancel_pending();
        self.inner.state.send_modify(SearchState::clear);
        debug!(stage = "search", event = "search.cleared", "search state cleared");
    }

    /// Runs one search immediately, bypassing the debounce timer.
    pub async fn run_search(&self, term: &str) {
        let term = term.trim();
        if term.is_empty() {
            self.inner.state.send_modify(SearchState::reset_results);
            return;
        }

        let mut ticket = Ticket::default();
        self.inner.state.send_modify(|state| ticket = state.begin());
        self.execute(ticket, term).await;
    }

    async fn execute(&self, ticket: Ticket, term: &str) {
        let start = Instant::now();
        info!(
            stage = "search",
            event = "search.run.begin",
            source = self.inner.source.kind(),
            term = %term,
            "running search"
        );

        let outcome = self.inner.source.search(term).await;
        let result = if outcome.is_ok() { "ok" } else { "fail" };
        let outcome = outcome.map_err(|err: DataSourceError| {
            warn!(
                stage = "search",
                event = "search.run.error",
                source = self.inner.source.kind(),
                term = %term,
                error = %err,
                "search failed"
            );
            err.user_message()
        });
        let match_count = outcome.as_ref().map(Vec::len).unwrap_or(0);

        let applied = self
            .inner
            .state
            .send_if_modified(|state| state.apply(ticket, outcome));

        info!(
            stage = "search",
            event = "search.run.end",
            source = self.inner.source.kind(),
            result,
            applied,
            match_count,
            duration_ms = start.elapsed().as_millis(),
            "search finished"
        );
    }

    fn cancel_pending(&self) {
        if let Some(handle) = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}
