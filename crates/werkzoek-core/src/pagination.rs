//! Infinite-scroll accumulator over page-based vacancy search.
//!
//! Pages are fetched one at a time, in order, starting at page 1. The
//! flattened item list is the concatenation of all fetched pages in page
//! order, exactly as the server returned them.
//!
//! The set ends once the last fetched page number reaches
//! `ceil(total / limit)` as reported by that page. Changing any search
//! parameter other than the page throws all pages away and starts over.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{ApiError, ErrorBody};
use crate::models::{VacancySearchParams, VacancySearchResponse, VacancySearchResult};
use crate::traits::VacancySearch;

/// One fetched page.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub number: u32,
    pub response: VacancySearchResponse,
    pub fetched_at: DateTime<Utc>,
}

/// What a [`InfiniteVacancies::fetch_next_page`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Page `page` was fetched and appended.
    Fetched { page: u32, new_items: usize },
    /// Another fetch is in flight; nothing was requested.
    AlreadyFetching,
    /// The last page has been fetched; nothing was requested.
    Exhausted,
    /// The query changed while this page was in flight; the page was dropped.
    Superseded,
}

/// Read model for presentation code.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InfiniteSnapshot {
    pub items: Vec<VacancySearchResult>,
    pub total: Option<u64>,
    pub pages_loaded: usize,
    pub has_next_page: bool,
    pub is_fetching_next_page: bool,
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug)]
struct PagerState {
    params: VacancySearchParams,
    pages: Vec<Page>,
    next_page: u32,
    fetching: bool,
    error: Option<ApiError>,
    /// Bumped on every reset so late results for an old query are dropped.
    generation: u64,
}

impl PagerState {
    fn new(params: VacancySearchParams) -> Self {
        Self {
            params: params.with_page(1),
            pages: Vec::new(),
            next_page: 1,
            fetching: false,
            error: None,
            generation: 0,
        }
    }

    fn reset(&mut self) {
        self.pages.clear();
        self.next_page = 1;
        self.fetching = false;
        self.error = None;
        self.generation += 1;
    }

    fn has_next_page(&self) -> bool {
        match self.pages.last() {
            None => true,
            Some(last) => u64::from(last.number) < last.response.page_count(),
        }
    }

    fn items(&self) -> Vec<VacancySearchResult> {
        self.pages
            .iter()
            .flat_map(|p| p.response.items.iter().cloned())
            .collect()
    }
}

/// Clears the in-flight flag if a fetch future is dropped before it settles.
struct FetchGuard<'a> {
    state: &'a Mutex<PagerState>,
    generation: u64,
    armed: bool,
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = lock(self.state);
        if state.generation == self.generation {
            state.fetching = false;
        }
    }
}

/// Infinite-scroll controller for one vacancy query.
///
/// Clones share state, so a UI can hand one clone to its scroll handler and
/// another to its renderer.
pub struct InfiniteVacancies<S> {
    source: S,
    state: Arc<Mutex<PagerState>>,
}

impl<S: Clone> Clone for InfiniteVacancies<S> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

fn lock(state: &Mutex<PagerState>) -> MutexGuard<'_, PagerState> {
    state.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("Recovered from poisoned pagination lock");
        poisoned.into_inner()
    })
}

impl<S: VacancySearch> InfiniteVacancies<S> {
    /// Start an empty result set for `params`. The page field is ignored.
    pub fn new(source: S, params: VacancySearchParams) -> Self {
        Self {
            source,
            state: Arc::new(Mutex::new(PagerState::new(params))),
        }
    }

    /// Fetch the next page, unless one is already in flight or the set is
    /// complete.
    ///
    /// On failure the accumulated pages are kept and the cursor stays put,
    /// so calling again retries the same page.
    pub async fn fetch_next_page(&self) -> Result<FetchOutcome, ApiError> {
        let (params, generation) = {
            let mut state = lock(&self.state);
            if state.fetching {
                return Ok(FetchOutcome::AlreadyFetching);
            }
            if !state.has_next_page() {
                return Ok(FetchOutcome::Exhausted);
            }
            state.fetching = true;
            let page = state.next_page;
            (state.params.clone().with_page(page), state.generation)
        };
        let mut guard = FetchGuard {
            state: &self.state,
            generation,
            armed: true,
        };
        let page = params.page;

        tracing::debug!(page, "Fetching next page");
        let result = self.source.search(&params).await;
        guard.armed = false;

        if lock(&self.state).generation != generation {
            tracing::debug!(page, "Dropping page for a superseded query");
            // The source may have cached this response after the reset.
            self.source.evict(&params).await;
            return Ok(FetchOutcome::Superseded);
        }

        let mut state = lock(&self.state);
        if state.generation != generation {
            return Ok(FetchOutcome::Superseded);
        }
        state.fetching = false;

        match result {
            Ok(response) => {
                let new_items = response.items.len();
                tracing::info!(
                    page,
                    new_items,
                    total = response.total,
                    "Page loaded"
                );
                state.pages.push(Page {
                    number: page,
                    response,
                    fetched_at: Utc::now(),
                });
                state.next_page = page + 1;
                state.error = None;
                Ok(FetchOutcome::Fetched { page, new_items })
            }
            Err(e) => {
                tracing::warn!(page, code = e.code(), error = %e, "Page fetch failed");
                state.error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Replace the query. Returns true if it differed (ignoring `page`) and
    /// the result set was discarded.
    pub fn set_params(&self, params: VacancySearchParams) -> bool {
        let mut state = lock(&self.state);
        if state.params.same_query(&params) {
            return false;
        }
        tracing::debug!("Search parameters changed, restarting from page 1");
        state.params = params.with_page(1);
        state.reset();
        true
    }

    /// Drop every page (and their cached responses) and fetch page 1 again.
    ///
    /// A page still in flight is superseded and its cached response evicted
    /// when it lands.
    pub async fn refetch(&self) -> Result<FetchOutcome, ApiError> {
        let (params, loaded) = {
            let mut state = lock(&self.state);
            let loaded = state.pages.len();
            state.reset();
            (state.params.clone(), loaded)
        };
        for page in 1..=loaded.max(1) {
            let page = u32::try_from(page).unwrap_or(u32::MAX);
            self.source.evict(&params.clone().with_page(page)).await;
        }
        self.fetch_next_page().await
    }

    pub fn params(&self) -> VacancySearchParams {
        lock(&self.state).params.clone()
    }

    /// All fetched items, in page order.
    pub fn items(&self) -> Vec<VacancySearchResult> {
        lock(&self.state).items()
    }

    /// Total reported by the most recent page, if any page has loaded.
    pub fn total(&self) -> Option<u64> {
        lock(&self.state).pages.last().map(|p| p.response.total)
    }

    pub fn pages(&self) -> Vec<Page> {
        lock(&self.state).pages.clone()
    }

    pub fn pages_loaded(&self) -> usize {
        lock(&self.state).pages.len()
    }

    pub fn has_next_page(&self) -> bool {
        lock(&self.state).has_next_page()
    }

    pub fn is_fetching_next_page(&self) -> bool {
        lock(&self.state).fetching
    }

    pub fn is_error(&self) -> bool {
        lock(&self.state).error.is_some()
    }

    pub fn error(&self) -> Option<ApiError> {
        lock(&self.state).error.clone()
    }

    pub fn snapshot(&self) -> InfiniteSnapshot {
        let state = lock(&self.state);
        InfiniteSnapshot {
            items: state.items(),
            total: state.pages.last().map(|p| p.response.total),
            pages_loaded: state.pages.len(),
            has_next_page: state.has_next_page(),
            is_fetching_next_page: state.fetching,
            is_error: state.error.is_some(),
            error: state.error.as_ref().map(ApiError::body),
        }
    }
}
