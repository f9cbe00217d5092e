//! Cursor bookkeeping for incremental loading.

use gigscout_core::Cursor;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "cursor", rename_all = "snake_case")]
pub enum PageState {
    /// No page fetched for the current base query.
    Idle,
    HasMore(Cursor),
    Exhausted,
}

/// Tracks the continuation cursor and guards against overlapping loads.
#[derive(Debug, Clone)]
pub struct Paginator {
    page_size: usize,
    state: PageState,
    in_flight: bool,
}

impl Paginator {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            state: PageState::Idle,
            in_flight: false,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn state(&self) -> &PageState {
        &self.state
    }

    pub fn has_more(&self) -> bool {
        matches!(self.state, PageState::HasMore(_))
    }

    pub fn is_loading_more(&self) -> bool {
        self.in_flight
    }

    /// Base query changed: forget the cursor.
    pub fn reset(&mut self) {
        self.state = PageState::Idle;
        self.in_flight = false;
    }

    /// Record the first page of a base query (fetched or served from cache).
    pub fn complete_first_page(&mut self, page_len: usize, cursor: Option<Cursor>) {
        self.settle(page_len, cursor);
    }

    /// Claim the next load; `None` when not in `HasMore` or a load is running.
    pub fn begin_load_more(&mut self) -> Option<Cursor> {
        if self.in_flight {
            return None;
        }
        match &self.state {
            PageState::HasMore(cursor) => {
                self.in_flight = true;
                Some(cursor.clone())
            }
            PageState::Idle | PageState::Exhausted => None,
        }
    }

    pub fn complete_load_more(&mut self, page_len: usize, cursor: Option<Cursor>) {
        self.in_flight = false;
        self.settle(page_len, cursor);
    }

    /// Failed continuation; the cursor stays so a later attempt can retry.
    pub fn fail_load_more(&mut self) {
        self.in_flight = false;
    }

    fn settle(&mut self, page_len: usize, cursor: Option<Cursor>) {
        self.state = match cursor {
            Some(cursor) if page_len >= self.page_size => PageState::HasMore(cursor),
            _ => PageState::Exhausted,
        };
    }
}
