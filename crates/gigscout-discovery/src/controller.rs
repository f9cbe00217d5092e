//! Query state controller: owns query intent, schedules fetches and
//! publishes the derived view model.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use chrono::Utc;
use gigscout_adapters::{
    FallbackProvider, ListingSource, LocationPermission, LocationService, SourceError,
};
use gigscout_core::{
    BaseQuery, Coordinate, Cursor, FilterCriteria, Listing, QueryState, SortCriterion, Urgency,
    WorkTypeFilter, PAGE_SIZE,
};
use gigscout_storage::{CacheKey, TtlCache};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::auxiliary::{load_auxiliary, AuxiliaryData};
use crate::debounce::{Concern, Debouncer, RequestSequencer};
use crate::filter::{self, FilterContext};
use crate::pagination::Paginator;
use crate::sort;
use crate::DiscoveryConfig;

/// Upper bound on results requested from a free-text search.
pub const SEARCH_LIMIT: usize = 50;

/// Collaborators the controller talks to.
#[derive(Clone)]
pub struct ControllerDeps {
    pub source: Arc<dyn ListingSource>,
    pub location: Arc<dyn LocationService>,
    pub fallback: Arc<dyn FallbackProvider>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ViewState {
    #[default]
    Loading,
    Ready,
    /// Valid response, nothing matched; presentation offers "clear filters".
    NoMatches,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListingView {
    #[serde(flatten)]
    pub listing: Listing,
    pub application_count: u32,
    pub has_applied: bool,
    pub distance_km: Option<f64>,
    pub is_full: bool,
}

impl ListingView {
    fn new(listing: Listing, aux: &AuxiliaryData, reference: Option<Coordinate>) -> Self {
        let application_count = aux.application_count(&listing.id);
        let is_full = listing
            .max_applications
            .is_some_and(|cap| application_count >= cap);
        Self {
            has_applied: aux.has_applied(&listing.id),
            distance_km: reference
                .zip(listing.coordinate)
                .map(|(from, to)| gigscout_core::distance_km(from, to)),
            application_count,
            is_full,
            listing,
        }
    }
}

/// Everything presentation needs, recomputed on every change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewModel {
    pub listings: Vec<ListingView>,
    pub result_count: usize,
    pub has_more: bool,
    pub is_loading: bool,
    pub is_loading_more: bool,
    pub state: ViewState,
    pub used_fallback: bool,
    pub active_filter_count: usize,
    pub sort: Option<SortCriterion>,
    pub location_permission: LocationPermission,
}

impl ViewModel {
    fn initial() -> Self {
        Self {
            listings: Vec::new(),
            result_count: 0,
            has_more: false,
            is_loading: false,
            is_loading_more: false,
            state: ViewState::Loading,
            used_fallback: false,
            active_filter_count: 0,
            sort: None,
            location_permission: LocationPermission::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "appended", rename_all = "snake_case")]
pub enum LoadMoreOutcome {
    /// Not in `HasMore`, or a load was already running; nothing fetched.
    Skipped,
    Appended(usize),
    /// The base query changed while the page was in flight.
    Discarded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchReason {
    Initial,
    Search,
    Category,
    Location,
    Query,
}

impl FetchReason {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Search => "search",
            Self::Category => "category",
            Self::Location => "location",
            Self::Query => "query",
        }
    }
}

struct FirstPage {
    listings: Vec<Listing>,
    cursor: Option<Cursor>,
}

struct Session {
    query: QueryState,
    listings: Vec<Listing>,
    auxiliary: AuxiliaryData,
    pager: Paginator,
    reference: Option<Coordinate>,
    permission: LocationPermission,
    is_loading: bool,
    used_fallback: bool,
}

struct Shared {
    config: DiscoveryConfig,
    deps: ControllerDeps,
    cache: TtlCache<Vec<Listing>>,
    debouncer: Debouncer,
    sequencer: RequestSequencer,
    session: Mutex<Session>,
    view_tx: watch::Sender<ViewModel>,
    session_id: Uuid,
}

/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct DiscoveryController {
    shared: Arc<Shared>,
}

impl DiscoveryController {
    pub fn new(config: DiscoveryConfig, deps: ControllerDeps) -> Self {
        let mut query = QueryState::default();
        query.criteria.radius_km = config.default_radius_km;
        let (view_tx, _) = watch::channel(ViewModel::initial());
        let shared = Shared {
            cache: TtlCache::new(config.cache_ttl),
            config,
            deps,
            debouncer: Debouncer::new(),
            sequencer: RequestSequencer::new(),
            session: Mutex::new(Session {
                query,
                listings: Vec::new(),
                auxiliary: AuxiliaryData::default(),
                pager: Paginator::new(PAGE_SIZE),
                reference: None,
                permission: LocationPermission::Pending,
                is_loading: false,
                used_fallback: false,
            }),
            view_tx,
            session_id: Uuid::new_v4(),
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewModel> {
        self.shared.view_tx.subscribe()
    }

    /// Latest published view.
    pub fn view(&self) -> ViewModel {
        self.shared.view_tx.borrow().clone()
    }

    pub async fn query(&self) -> QueryState {
        self.shared.session.lock().await.query.clone()
    }

    pub fn is_pending(&self, concern: Concern) -> bool {
        self.shared.debouncer.is_pending(concern)
    }

    /// First load of the default open feed.
    pub async fn start(&self) {
        info!(session = %self.shared.session_id, "discovery session started");
        self.shared.clone().fetch_first_page(FetchReason::Initial).await;
    }

    /// Replace the whole query and fetch immediately, dropping pending timers.
    pub async fn apply_query(&self, query: QueryState) {
        self.shared.debouncer.cancel_all();
        self.shared.session.lock().await.query = query;
        self.shared.clone().fetch_first_page(FetchReason::Query).await;
    }

    /// Debounced free-text search. A blank term leaves the debounced path and
    /// returns to the unsearched feed right away.
    pub async fn set_search_term(&self, term: impl Into<String>) {
        let term = term.into();
        let (changed, active) = {
            let mut session = self.shared.session.lock().await;
            let before = session.query.base();
            session.query.criteria.search_term = term;
            let active = session.query.criteria.active_search_term().is_some();
            let changed = session.query.base() != before;
            if changed {
                // The old cursor belongs to the previous base query; pages
                // still in flight for it must not land.
                self.shared.sequencer.issue();
                session.pager.reset();
                self.shared.publish(&session);
            }
            (changed, active)
        };
        if !changed {
            return;
        }
        if !active {
            self.shared.debouncer.cancel(Concern::Search);
            self.shared.clone().fetch_first_page(FetchReason::Search).await;
            return;
        }
        let shared = self.shared.clone();
        self.shared.debouncer.schedule(
            Concern::Search,
            self.shared.config.search_debounce,
            shared.fetch_first_page(FetchReason::Search),
        );
    }

    /// Category is a discrete choice: fetch immediately.
    pub async fn set_category(&self, category: Option<String>) {
        {
            let mut session = self.shared.session.lock().await;
            if session.query.criteria.category == category {
                return;
            }
            session.query.criteria.category = category;
        }
        // The immediate fetch already carries any pending search term.
        self.shared.debouncer.cancel(Concern::Search);
        self.shared.clone().fetch_first_page(FetchReason::Category).await;
    }

    pub async fn set_nearby_only(&self, nearby_only: bool) {
        {
            let mut session = self.shared.session.lock().await;
            if session.query.criteria.nearby_only == nearby_only {
                return;
            }
            session.query.criteria.nearby_only = nearby_only;
        }
        self.schedule_location_fetch();
    }

    /// Radius changes only refetch while nearby-only is on.
    pub async fn set_radius_km(&self, radius_km: f64) {
        let nearby_only = {
            let mut session = self.shared.session.lock().await;
            if session.query.criteria.radius_km == radius_km {
                return;
            }
            session.query.criteria.radius_km = radius_km.max(0.0);
            session.query.criteria.nearby_only
        };
        if nearby_only {
            self.schedule_location_fetch();
        } else {
            self.schedule_recompute();
        }
    }

    pub async fn set_budget_range(&self, min: Option<f64>, max: Option<f64>) {
        self.update_local(|criteria| {
            criteria.budget_min = min;
            criteria.budget_max = max;
        })
        .await;
    }

    pub async fn set_durations(&self, durations: BTreeSet<String>) {
        self.update_local(|criteria| criteria.durations = durations).await;
    }

    pub async fn set_work_type(&self, work_type: WorkTypeFilter) {
        self.update_local(|criteria| criteria.work_type = work_type).await;
    }

    pub async fn set_urgency(&self, urgency: Urgency) {
        self.update_local(|criteria| criteria.urgency = urgency).await;
    }

    pub async fn set_skills(&self, skills: Vec<String>) {
        self.update_local(|criteria| {
            criteria.skills = skills
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        })
        .await;
    }

    pub async fn set_sort(&self, sort: Option<SortCriterion>) {
        self.shared.session.lock().await.query.sort = sort;
        self.schedule_recompute();
    }

    /// Reset the client-side axes; leaving nearby-only also refetches.
    pub async fn clear_filters(&self) {
        let was_nearby = {
            let mut session = self.shared.session.lock().await;
            let was_nearby = session.query.criteria.nearby_only;
            session.query.criteria.clear_local();
            was_nearby
        };
        if was_nearby {
            self.schedule_location_fetch();
        } else {
            self.schedule_recompute();
        }
    }

    /// Fetch and append the next page. Safe to call from scroll signals.
    pub async fn load_more(&self) -> LoadMoreOutcome {
        self.shared.clone().load_more().await
    }

    async fn update_local(&self, update: impl FnOnce(&mut FilterCriteria)) {
        update(&mut self.shared.session.lock().await.query.criteria);
        self.schedule_recompute();
    }

    fn schedule_recompute(&self) {
        let shared = self.shared.clone();
        self.shared.debouncer.schedule(
            Concern::Filters,
            self.shared.config.filter_debounce,
            async move { shared.recompute().await },
        );
    }

    fn schedule_location_fetch(&self) {
        let shared = self.shared.clone();
        self.shared.debouncer.schedule(
            Concern::Location,
            self.shared.config.location_debounce,
            shared.fetch_first_page(FetchReason::Location),
        );
    }
}

impl Shared {
    fn publish(&self, session: &Session) {
        self.view_tx.send_replace(self.build_view(session));
    }

    async fn recompute(&self) {
        let session = self.session.lock().await;
        self.publish(&session);
    }

    fn build_view(&self, session: &Session) -> ViewModel {
        let ctx = FilterContext::new(Utc::now(), session.reference);
        let criteria = &session.query.criteria;
        let geo_reference = ctx.geo_reference(criteria);

        let mut visible = filter::apply(criteria, &session.listings, &ctx);
        if let Some(reference) = geo_reference {
            sort::order_by_distance(&mut visible, reference);
        }
        if let Some(criterion) = session.query.sort {
            visible = sort::sort(criterion, visible, &session.auxiliary);
        }

        let listings: Vec<ListingView> = visible
            .into_iter()
            .map(|listing| ListingView::new(listing, &session.auxiliary, geo_reference))
            .collect();

        let state = if session.is_loading && session.listings.is_empty() {
            ViewState::Loading
        } else if listings.is_empty() {
            ViewState::NoMatches
        } else {
            ViewState::Ready
        };

        ViewModel {
            result_count: listings.len(),
            listings,
            has_more: session.pager.has_more(),
            is_loading: session.is_loading,
            is_loading_more: session.pager.is_loading_more(),
            state,
            used_fallback: session.used_fallback,
            active_filter_count: criteria.active_filter_count(),
            sort: session.query.sort,
            location_permission: session.permission,
        }
    }

    async fn resolve_location(&self) -> (LocationPermission, Option<Coordinate>) {
        let permission = self.deps.location.permission().await;
        let coordinate = match permission {
            LocationPermission::Granted => self.deps.location.current_coordinate().await,
            _ => None,
        };
        if coordinate.is_none() {
            debug!(?permission, "no reference coordinate; radius filter skipped");
        }
        (permission, coordinate)
    }

    async fn fetch_base(&self, base: &BaseQuery) -> Result<FirstPage, SourceError> {
        if let Some(term) = &base.search_term {
            let listings = self
                .deps
                .source
                .search(term, base.category.as_deref(), SEARCH_LIMIT)
                .await?;
            return Ok(FirstPage {
                listings,
                cursor: None,
            });
        }

        let cache_key = base
            .is_default_feed()
            .then(|| CacheKey::first_page(base.status.as_str()));
        if let Some(listings) = cache_key.as_ref().and_then(|key| self.cache.get(key)) {
            let cursor = if listings.len() >= PAGE_SIZE {
                listings.last().and_then(|l| self.deps.source.cursor_after(l))
            } else {
                None
            };
            return Ok(FirstPage { listings, cursor });
        }

        let page = self
            .deps
            .source
            .fetch_by_status(base.status, PAGE_SIZE, None)
            .await?;
        if let Some(key) = cache_key {
            self.cache.set(key, page.listings.clone());
        }
        Ok(FirstPage {
            listings: page.listings,
            cursor: page.cursor,
        })
    }

    async fn fetch_first_page(self: Arc<Self>, reason: FetchReason) {
        let (seq, query) = {
            let mut session = self.session.lock().await;
            // Issued under the lock so a concurrent load-more never captures it.
            let seq = self.sequencer.issue();
            session.pager.reset();
            session.is_loading = true;
            self.publish(&session);
            (seq, session.query.clone())
        };
        let span = info_span!(
            "fetch_first_page",
            session = %self.session_id,
            seq,
            reason = reason.as_str(),
            source = self.deps.source.source_id()
        );

        async move {
            let location = if query.criteria.nearby_only {
                Some(self.resolve_location().await)
            } else {
                None
            };

            let (listings, cursor, used_fallback, auxiliary) =
                match self.fetch_base(&query.base()).await {
                    Ok(page) => {
                        let auxiliary = load_auxiliary(
                            self.deps.source.as_ref(),
                            &page.listings,
                            self.config.actor_id.as_deref(),
                        )
                        .await;
                        (page.listings, page.cursor, false, auxiliary)
                    }
                    Err(err) => {
                        warn!(error = %err, "listing source unavailable; serving fallback listings");
                        let listings = self.deps.fallback.fallback_listings(Utc::now());
                        (listings, None, true, AuxiliaryData::default())
                    }
                };

            let mut session = self.session.lock().await;
            if !self.sequencer.is_current(seq) {
                debug!(latest = self.sequencer.current(), "discarding superseded result");
                return;
            }
            if let Some((permission, reference)) = location {
                session.permission = permission;
                session.reference = reference;
            }
            session.pager.complete_first_page(listings.len(), cursor);
            debug!(fetched = listings.len(), has_more = session.pager.has_more(), "first page applied");
            session.listings = listings;
            session.auxiliary = auxiliary;
            session.used_fallback = used_fallback;
            session.is_loading = false;
            self.publish(&session);
        }
        .instrument(span)
        .await
    }

    async fn load_more(self: Arc<Self>) -> LoadMoreOutcome {
        let (cursor, seq, status) = {
            let mut session = self.session.lock().await;
            let Some(cursor) = session.pager.begin_load_more() else {
                debug!("load more skipped");
                return LoadMoreOutcome::Skipped;
            };
            self.publish(&session);
            (cursor, self.sequencer.current(), session.query.status)
        };
        let span = info_span!("load_more", session = %self.session_id, seq, cursor = cursor.as_str());

        async move {
            let result = self
                .deps
                .source
                .fetch_by_status(status, PAGE_SIZE, Some(&cursor))
                .await;

            let page = match result {
                Ok(page) => page,
                Err(err) => {
                    warn!(error = %err, "load more failed");
                    let mut session = self.session.lock().await;
                    if !self.sequencer.is_current(seq) {
                        return LoadMoreOutcome::Discarded;
                    }
                    session.pager.fail_load_more();
                    self.publish(&session);
                    return LoadMoreOutcome::Failed;
                }
            };

            let auxiliary = load_auxiliary(
                self.deps.source.as_ref(),
                &page.listings,
                self.config.actor_id.as_deref(),
            )
            .await;

            let mut session = self.session.lock().await;
            if !self.sequencer.is_current(seq) {
                debug!("discarding page for a superseded query");
                return LoadMoreOutcome::Discarded;
            }
            let page_len = page.listings.len();
            let known: HashSet<String> = session.listings.iter().map(|l| l.id.clone()).collect();
            let fresh: Vec<Listing> = page
                .listings
                .into_iter()
                .filter(|l| !known.contains(&l.id))
                .collect();
            let appended = fresh.len();

            session.listings.extend(fresh);
            session.auxiliary.merge(auxiliary);
            session.pager.complete_load_more(page_len, page.cursor);
            debug!(appended, has_more = session.pager.has_more(), "page appended");
            self.publish(&session);
            LoadMoreOutcome::Appended(appended)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::listing;
    use async_trait::async_trait;
    use gigscout_adapters::{DemoFallback, DisabledFallback, FixtureListingSource, ListingPage, StaticLocation};
    use gigscout_core::ListingStatus;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    const JHB: Coordinate = Coordinate {
        latitude: -26.2041,
        longitude: 28.0473,
    };
    const CPT: Coordinate = Coordinate {
        latitude: -33.9249,
        longitude: 18.4241,
    };

    #[derive(Default)]
    struct ScriptedSource {
        inner: FixtureListingSource,
        status_calls: AtomicUsize,
        search_calls: AtomicUsize,
        failing: AtomicBool,
        page_delay: Duration,
        search_delays: HashMap<String, Duration>,
    }

    impl ScriptedSource {
        fn new(listings: Vec<Listing>) -> Self {
            Self::with_applications(listings, HashMap::new())
        }

        fn with_applications(listings: Vec<Listing>, apps: HashMap<String, Vec<String>>) -> Self {
            Self {
                inner: FixtureListingSource::new(listings, apps),
                ..Default::default()
            }
        }

        fn status_calls(&self) -> usize {
            self.status_calls.load(Ordering::SeqCst)
        }

        fn search_calls(&self) -> usize {
            self.search_calls.load(Ordering::SeqCst)
        }

        fn check(&self) -> Result<(), SourceError> {
            if self.failing.load(Ordering::SeqCst) {
                Err(SourceError::Unavailable("scripted outage".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl ListingSource for ScriptedSource {
        fn source_id(&self) -> &'static str {
            "scripted"
        }

        async fn fetch_by_status(
            &self,
            status: ListingStatus,
            page_size: usize,
            cursor: Option<&Cursor>,
        ) -> Result<ListingPage, SourceError> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            if cursor.is_some() && !self.page_delay.is_zero() {
                tokio::time::sleep(self.page_delay).await;
            }
            self.check()?;
            self.inner.fetch_by_status(status, page_size, cursor).await
        }

        async fn search(
            &self,
            term: &str,
            category: Option<&str>,
            limit: usize,
        ) -> Result<Vec<Listing>, SourceError> {
            self.search_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.search_delays.get(term) {
                tokio::time::sleep(*delay).await;
            }
            self.check()?;
            self.inner.search(term, category, limit).await
        }

        async fn count_applications(&self, listing_id: &str) -> Result<u32, SourceError> {
            self.inner.count_applications(listing_id).await
        }

        async fn has_applied(&self, listing_id: &str, actor_id: &str) -> Result<bool, SourceError> {
            self.inner.has_applied(listing_id, actor_id).await
        }
    }

    fn feed(count: usize) -> Vec<Listing> {
        (0..count)
            .map(|i| listing(&format!("g{i:02}"), 1000.0 + i as f64))
            .collect()
    }

    fn controller_with(
        source: Arc<ScriptedSource>,
        location: StaticLocation,
        fallback: Arc<dyn FallbackProvider>,
        config: DiscoveryConfig,
    ) -> DiscoveryController {
        DiscoveryController::new(
            config,
            ControllerDeps {
                source,
                location: Arc::new(location),
                fallback,
            },
        )
    }

    fn controller(source: Arc<ScriptedSource>) -> DiscoveryController {
        controller_with(
            source,
            StaticLocation::denied(),
            Arc::new(DemoFallback),
            DiscoveryConfig::default(),
        )
    }

    fn ids(view: &ViewModel) -> Vec<String> {
        view.listings.iter().map(|row| row.listing.id.clone()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn start_loads_first_page_and_pages_until_exhausted() {
        let source = Arc::new(ScriptedSource::new(feed(45)));
        let ctl = controller(source.clone());

        ctl.start().await;
        let view = ctl.view();
        assert_eq!(view.result_count, PAGE_SIZE);
        assert!(view.has_more);
        assert_eq!(view.state, ViewState::Ready);
        assert!(!view.is_loading);

        let mut lengths = vec![view.result_count];
        while ctl.view().has_more {
            assert!(matches!(ctl.load_more().await, LoadMoreOutcome::Appended(_)));
            lengths.push(ctl.view().result_count);
        }
        assert!(lengths.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(lengths.last(), Some(&45));

        let calls = source.status_calls();
        assert_eq!(ctl.load_more().await, LoadMoreOutcome::Skipped);
        assert_eq!(source.status_calls(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_load_more_fetches_once() {
        let source = Arc::new(ScriptedSource {
            page_delay: Duration::from_millis(200),
            ..ScriptedSource::new(feed(60))
        });
        let ctl = controller(source.clone());
        ctl.start().await;

        let (first, second) = tokio::join!(ctl.load_more(), ctl.load_more());
        let outcomes = [first, second];
        assert!(outcomes.contains(&LoadMoreOutcome::Appended(PAGE_SIZE)));
        assert!(outcomes.contains(&LoadMoreOutcome::Skipped));
        assert_eq!(source.status_calls(), 2);
        assert_eq!(ctl.view().result_count, 2 * PAGE_SIZE);
    }

    #[tokio::test(start_paused = true)]
    async fn default_feed_is_served_from_cache_with_inferred_cursor() {
        let source = Arc::new(ScriptedSource::new(feed(25)));
        let ctl = controller(source.clone());

        ctl.start().await;
        ctl.set_category(Some("general".into())).await;
        assert_eq!(source.status_calls(), 2);

        ctl.set_category(None).await;
        assert_eq!(source.status_calls(), 2, "first open page comes from cache");
        let view = ctl.view();
        assert_eq!(view.result_count, PAGE_SIZE);
        assert!(view.has_more);

        assert_eq!(ctl.load_more().await, LoadMoreOutcome::Appended(5));
        assert!(!ctl.view().has_more);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_cache_fetches_again() {
        let source = Arc::new(ScriptedSource::new(feed(5)));
        let config = DiscoveryConfig {
            cache_ttl: Duration::from_secs(60),
            ..Default::default()
        };
        let ctl = controller_with(
            source.clone(),
            StaticLocation::denied(),
            Arc::new(DemoFallback),
            config,
        );

        ctl.start().await;
        tokio::time::sleep(Duration::from_secs(61)).await;
        ctl.apply_query(QueryState::default()).await;
        assert_eq!(source.status_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn search_is_debounced_to_the_last_keystroke() {
        let mut listings = feed(3);
        listings[1].title = "Logo design".into();
        let source = Arc::new(ScriptedSource::new(listings));
        let ctl = controller(source.clone());
        ctl.start().await;

        for term in ["d", "de", "des", "design"] {
            ctl.set_search_term(term).await;
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(source.search_calls(), 0);
        assert!(ctl.is_pending(Concern::Search));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(source.search_calls(), 1);
        assert_eq!(ids(&ctl.view()), ["g01"]);
        assert!(!ctl.view().has_more);
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_search_result_is_discarded() {
        let mut listings = feed(2);
        listings[0].title = "slow courier".into();
        listings[1].title = "fast courier".into();
        let source = Arc::new(ScriptedSource {
            search_delays: HashMap::from([
                ("slow".to_string(), Duration::from_millis(1000)),
                ("fast".to_string(), Duration::from_millis(10)),
            ]),
            ..ScriptedSource::new(listings)
        });
        let ctl = controller(source.clone());
        ctl.start().await;

        ctl.set_search_term("slow").await;
        // Debounce fires at 500ms; the slow request is in flight until 1500ms.
        tokio::time::sleep(Duration::from_millis(600)).await;
        ctl.set_search_term("fast").await;
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(source.search_calls(), 2);
        assert_eq!(ids(&ctl.view()), ["g01"]);
        assert!(!ctl.view().is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn clearing_search_returns_to_the_feed_immediately() {
        let source = Arc::new(ScriptedSource::new(feed(3)));
        let ctl = controller(source.clone());
        ctl.start().await;

        ctl.set_search_term("nothing-matches").await;
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(ctl.view().state, ViewState::NoMatches);

        ctl.set_search_term("   ").await;
        assert!(!ctl.is_pending(Concern::Search));
        assert_eq!(ctl.view().result_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn local_filters_never_refetch_and_are_debounced() {
        let budgets = [3500.0, 15000.0, 8000.0, 600.0];
        let listings = budgets
            .iter()
            .enumerate()
            .map(|(i, b)| listing(&format!("b{i}"), *b))
            .collect();
        let source = Arc::new(ScriptedSource::new(listings));
        let ctl = controller(source.clone());
        ctl.start().await;
        let calls = source.status_calls();

        ctl.set_budget_range(Some(5000.0), Some(15000.0)).await;
        assert_eq!(ctl.view().result_count, 4, "not applied before the debounce window");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(ids(&ctl.view()), ["b1", "b2"]);
        assert_eq!(ctl.view().active_filter_count, 1);

        ctl.set_sort(Some(SortCriterion::BudgetLow)).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(ids(&ctl.view()), ["b2", "b1"]);
        assert_eq!(source.status_calls(), calls);
        assert_eq!(source.search_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_filters_restores_every_listing() {
        let source = Arc::new(ScriptedSource::new(feed(4)));
        let ctl = controller(source.clone());
        ctl.start().await;

        ctl.set_skills(vec!["welding".into()]).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(ctl.view().state, ViewState::NoMatches);

        ctl.clear_filters().await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(ctl.view().result_count, 4);
        assert_eq!(ctl.view().active_filter_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn category_change_fetches_without_waiting() {
        let mut listings = feed(3);
        listings[2].category = "creative".into();
        let source = Arc::new(ScriptedSource::new(listings));
        let ctl = controller(source.clone());
        ctl.start().await;

        ctl.set_category(Some("creative".into())).await;
        assert_eq!(source.status_calls(), 2);
        assert_eq!(ids(&ctl.view()), ["g02"]);
    }

    fn located_feed() -> Vec<Listing> {
        let mut jhb = listing("jhb", 1000.0);
        jhb.coordinate = Some(JHB);
        let mut cpt = listing("cpt", 2000.0);
        cpt.coordinate = Some(CPT);
        let remote = listing("remote", 500.0);
        vec![cpt, remote, jhb]
    }

    #[tokio::test(start_paused = true)]
    async fn nearby_only_keeps_listings_inside_the_radius() {
        let source = Arc::new(ScriptedSource::new(located_feed()));
        let ctl = controller_with(
            source.clone(),
            StaticLocation::granted(JHB),
            Arc::new(DemoFallback),
            DiscoveryConfig::default(),
        );
        ctl.start().await;

        ctl.set_radius_km(10.0).await;
        ctl.set_nearby_only(true).await;
        assert!(ctl.is_pending(Concern::Location));
        tokio::time::sleep(Duration::from_millis(350)).await;

        let view = ctl.view();
        assert_eq!(ids(&view), ["jhb"]);
        assert_eq!(view.listings[0].distance_km, Some(0.0));
        assert_eq!(view.location_permission, LocationPermission::Granted);

        ctl.set_radius_km(2000.0).await;
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(ids(&ctl.view()), ["jhb", "cpt"]);
    }

    #[tokio::test(start_paused = true)]
    async fn nearby_only_without_permission_is_a_no_op() {
        let source = Arc::new(ScriptedSource::new(located_feed()));
        let ctl = controller(source.clone());
        ctl.start().await;

        ctl.set_nearby_only(true).await;
        tokio::time::sleep(Duration::from_millis(350)).await;
        let view = ctl.view();
        assert_eq!(view.result_count, 3);
        assert_eq!(view.location_permission, LocationPermission::Denied);
        assert!(view.listings.iter().all(|row| row.distance_km.is_none()));
    }

    #[tokio::test(start_paused = true)]
    async fn source_outage_serves_the_fallback_set() {
        let source = Arc::new(ScriptedSource::new(feed(3)));
        source.failing.store(true, Ordering::SeqCst);
        let ctl = controller(source.clone());
        ctl.start().await;

        let view = ctl.view();
        assert!(view.used_fallback);
        assert!(view.result_count > 0);
        assert!(!view.has_more);
        assert_eq!(view.state, ViewState::Ready);

        source.failing.store(false, Ordering::SeqCst);
        ctl.apply_query(QueryState::default()).await;
        assert!(!ctl.view().used_fallback);
        assert_eq!(ctl.view().result_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_fallback_reports_no_matches() {
        let source = Arc::new(ScriptedSource::new(feed(3)));
        source.failing.store(true, Ordering::SeqCst);
        let ctl = controller_with(
            source,
            StaticLocation::denied(),
            Arc::new(DisabledFallback),
            DiscoveryConfig::default(),
        );
        ctl.start().await;
        assert_eq!(ctl.view().state, ViewState::NoMatches);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_load_more_keeps_listings_and_cursor() {
        let source = Arc::new(ScriptedSource::new(feed(30)));
        let ctl = controller(source.clone());
        ctl.start().await;

        source.failing.store(true, Ordering::SeqCst);
        assert_eq!(ctl.load_more().await, LoadMoreOutcome::Failed);
        let view = ctl.view();
        assert_eq!(view.result_count, PAGE_SIZE);
        assert!(view.has_more);
        assert!(!view.is_loading_more);
    }

    #[tokio::test(start_paused = true)]
    async fn page_arriving_after_a_query_change_is_discarded() {
        let source = Arc::new(ScriptedSource {
            page_delay: Duration::from_millis(500),
            ..ScriptedSource::new(feed(30))
        });
        let ctl = controller(source.clone());
        ctl.start().await;

        let pending = tokio::spawn({
            let ctl = ctl.clone();
            async move { ctl.load_more().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        ctl.set_category(Some("general".into())).await;

        assert_eq!(pending.await.unwrap(), LoadMoreOutcome::Discarded);
        assert_eq!(ctl.view().result_count, PAGE_SIZE);
    }

    #[tokio::test(start_paused = true)]
    async fn load_more_during_search_debounce_is_skipped() {
        let source = Arc::new(ScriptedSource::new(feed(45)));
        let ctl = controller(source.clone());
        ctl.start().await;
        assert!(ctl.view().has_more);
        let calls = source.status_calls();

        ctl.set_search_term("zzz").await;
        assert!(ctl.is_pending(Concern::Search));
        assert!(!ctl.view().has_more);
        assert_eq!(ctl.load_more().await, LoadMoreOutcome::Skipped);
        assert_eq!(source.status_calls(), calls);
        assert_eq!(ctl.view().result_count, PAGE_SIZE);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(ctl.view().state, ViewState::NoMatches);
        assert!(!ctl.view().has_more);
    }

    #[tokio::test(start_paused = true)]
    async fn typing_a_search_term_discards_an_in_flight_page() {
        let source = Arc::new(ScriptedSource {
            page_delay: Duration::from_millis(500),
            ..ScriptedSource::new(feed(45))
        });
        let ctl = controller(source.clone());
        ctl.start().await;

        let pending = tokio::spawn({
            let ctl = ctl.clone();
            async move { ctl.load_more().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        ctl.set_search_term("g0").await;

        assert_eq!(pending.await.unwrap(), LoadMoreOutcome::Discarded);
        assert_eq!(ctl.view().result_count, PAGE_SIZE);
        assert!(!ctl.view().has_more);
    }

    #[tokio::test(start_paused = true)]
    async fn first_page_sequence_is_issued_under_the_session_lock() {
        let source = Arc::new(ScriptedSource::new(feed(3)));
        let ctl = controller(source);
        let before = ctl.shared.sequencer.current();

        let guard = ctl.shared.session.lock().await;
        let pending = tokio::spawn({
            let ctl = ctl.clone();
            async move { ctl.start().await }
        });
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert_eq!(ctl.shared.sequencer.current(), before);

        drop(guard);
        pending.await.unwrap();
        assert_eq!(ctl.shared.sequencer.current(), before + 1);
        assert_eq!(ctl.view().result_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn auxiliary_data_drives_annotations_and_sorting() {
        let mut listings = feed(3);
        listings[0].max_applications = Some(2);
        let apps = HashMap::from([
            ("g00".to_string(), vec!["me".to_string(), "them".to_string()]),
            ("g02".to_string(), vec!["them".to_string()]),
        ]);
        let source = Arc::new(ScriptedSource::with_applications(listings, apps));
        let config = DiscoveryConfig {
            actor_id: Some("me".into()),
            ..Default::default()
        };
        let ctl = controller_with(source, StaticLocation::denied(), Arc::new(DemoFallback), config);
        ctl.start().await;

        ctl.set_sort(Some(SortCriterion::MostApplications)).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        let view = ctl.view();
        assert_eq!(ids(&view), ["g00", "g02", "g01"]);
        assert!(view.listings[0].has_applied);
        assert!(view.listings[0].is_full);
        assert_eq!(view.listings[1].application_count, 1);
        assert!(!view.listings[1].has_applied);
    }

    #[tokio::test(start_paused = true)]
    async fn view_model_serializes_flat_listing_rows() {
        let source = Arc::new(ScriptedSource::new(feed(1)));
        let ctl = controller(source);
        ctl.start().await;

        let json = serde_json::to_value(ctl.view()).unwrap();
        assert_eq!(json["result_count"], 1);
        assert_eq!(json["state"], "ready");
        assert_eq!(json["listings"][0]["id"], "g00");
        assert_eq!(json["listings"][0]["application_count"], 0);
    }
}
