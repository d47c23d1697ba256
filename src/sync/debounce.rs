use crate::errors::AppResult;
use crate::models::SearchResultSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;

pub type SearchFuture = Pin<Box<dyn Future<Output = AppResult<SearchResultSet>> + Send>>;
pub type SearchFn = Arc<dyn Fn(String) -> SearchFuture + Send + Sync>;

struct QueryState {
    raw_input: String,
    pending: Option<JoinHandle<()>>,
    generation: u64,
}

struct Shared {
    state: Mutex<QueryState>,
    results: watch::Sender<Arc<SearchResultSet>>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, QueryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, results: SearchResultSet) {
        self.results.send_replace(Arc::new(results));
    }
}

/// Turns keystrokes into at most one search per quiet period.
///
/// Every input change cancels the pending search and schedules a new one after
/// `delay`. Inputs shorter than `min_chars` clear the results without searching.
/// A failed search clears the results rather than keeping those of an older query.
pub struct DebouncedQuery {
    search: SearchFn,
    delay: Duration,
    min_chars: usize,
    shared: Arc<Shared>,
}

impl DebouncedQuery {
    pub fn new(search: SearchFn, delay: Duration, min_chars: usize) -> Self {
        let (results, _) = watch::channel(Arc::new(SearchResultSet::default()));
        Self {
            search,
            delay,
            min_chars,
            shared: Arc::new(Shared {
                state: Mutex::new(QueryState {
                    raw_input: String::new(),
                    pending: None,
                    generation: 0,
                }),
                results,
            }),
        }
    }

    /// Must be called within a tokio runtime.
    pub fn set_query(&self, input: &str) {
        let mut state = self.shared.state();
        if state.raw_input == input {
            return;
        }
        state.raw_input = input.to_string();
        state.generation += 1;
        if let Some(pending) = state.pending.take() {
            pending.abort();
        }

        if input.chars().count() < self.min_chars {
            self.shared.publish(SearchResultSet::default());
            return;
        }

        let generation = state.generation;
        let query = input.to_string();
        let delay = self.delay;
        let search = Arc::clone(&self.search);
        let shared = Arc::clone(&self.shared);
        state.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let outcome = search(query.clone()).await;

            let mut state = shared.state();
            if state.generation != generation {
                tracing::debug!(query = %query, "dropping results for superseded query");
                return;
            }
            state.pending = None;
            match outcome {
                Ok(results) => shared.publish(results),
                Err(error) => {
                    tracing::warn!(query = %query, error = %error, "search failed, clearing results");
                    shared.publish(SearchResultSet::default());
                }
            }
        }));
    }

    pub fn clear(&self) {
        self.set_query("");
    }

    pub fn query(&self) -> String {
        self.shared.state().raw_input.clone()
    }

    pub fn pending(&self) -> bool {
        self.shared
            .state()
            .pending
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn results(&self) -> Arc<SearchResultSet> {
        self.shared.results.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<SearchResultSet>> {
        self.shared.results.subscribe()
    }
}

impl Drop for DebouncedQuery {
    fn drop(&mut self) {
        let mut state = self.shared.state();
        state.generation += 1;
        if let Some(pending) = state.pending.take() {
            pending.abort();
        }
    }
}
