// Search orchestration: one active search per orchestrator, results cached per destination

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::{
    api::{ApiError, ClientConfig, SearchApi},
    controller::{CancellationController, SearchTicket},
    error::SearchError,
    normalize::normalize,
    poll::{poll_prices, PollOutcome},
    stats::{SearchStats, StatsSnapshot},
    types::{CountriesMap, GeoResponseMap, HotelsMap, NormalizedResult, SearchToken, Tour},
};

#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Committed(NormalizedResult),
    // served from this session's results cache, no remote call made
    Cached(NormalizedResult),
    // superseded or abandoned before it could commit
    Discarded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchEvent {
    Started { selection: String },
    Result { selection: String, result: NormalizedResult },
    Error { selection: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchStatus {
    Idle,
    Loading,
    Failed(String),
    Empty,
    Ready,
}

#[derive(Debug, Default)]
struct ViewState {
    active_selection: Option<String>,
    has_searched: bool,
    error: Option<String>,
}

pub struct SearchOrchestrator {
    api: Arc<dyn SearchApi>,
    config: ClientConfig,
    controller: CancellationController,
    results: DashMap<String, NormalizedResult>,
    hotels: DashMap<String, HotelsMap>,
    countries: RwLock<Option<CountriesMap>>,
    view: Mutex<ViewState>,
    events: Option<mpsc::UnboundedSender<SearchEvent>>,
    stats: SearchStats,
}

impl SearchOrchestrator {
    pub fn new(api: Arc<dyn SearchApi>, config: ClientConfig) -> Self {
        Self {
            controller: CancellationController::new(api.clone()),
            api,
            config,
            results: DashMap::new(),
            hotels: DashMap::new(),
            countries: RwLock::new(None),
            view: Mutex::new(ViewState::default()),
            events: None,
            stats: SearchStats::default(),
        }
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<SearchEvent>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: SearchEvent) {
        if let Some(events) = &self.events {
            // a dropped receiver only means nobody is listening any more
            let _ = events.send(event);
        }
    }

    /// Runs a search for `selection_id` to completion.
    ///
    /// Any search already in flight is superseded. A destination that already
    /// has a result this session is answered from the cache.
    pub async fn start_search(&self, selection_id: &str) -> Result<SearchOutcome, SearchError> {
        let selection = selection_id.trim();
        if selection.is_empty() {
            return Err(SearchError::NoSelection);
        }

        {
            let mut view = self.view.lock();
            view.active_selection = Some(selection.to_string());
            view.has_searched = true;
            view.error = None;
        }

        let cached = self.result_for(selection);
        if let Some(cached) = cached {
            // retire a search still in flight for another destination
            self.on_selection_changed(selection).await;
            SearchStats::incr(&self.stats.served_from_cache);
            tracing::debug!(selection, "serving cached search result");
            return Ok(SearchOutcome::Cached(cached));
        }

        let lock_id = self.controller.acquire_submit_lock(selection);
        SearchStats::incr(&self.stats.searches_started);
        self.emit(SearchEvent::Started {
            selection: selection.to_string(),
        });

        let outcome = self.run_search(selection, lock_id).await;

        if let Ok(SearchOutcome::Discarded) = &outcome {
            SearchStats::incr(&self.stats.searches_discarded);
        }
        self.controller.release_submit_lock(lock_id);
        outcome
    }

    async fn run_search(
        &self,
        selection: &str,
        lock_id: u64,
    ) -> Result<SearchOutcome, SearchError> {
        let ticket = self.controller.supersede(selection).await;

        let started = match self.api.start(selection).await {
            Ok(started) => started,
            Err(ApiError::Cancelled) => {
                self.controller.abandon_pending(&ticket);
                return Ok(SearchOutcome::Discarded);
            }
            Err(err) => {
                if !self.controller.abandon_pending(&ticket) {
                    return Ok(SearchOutcome::Discarded);
                }
                let err = SearchError::start_failed(&err, &self.config.messages);
                tracing::warn!(selection, error = %err, "search start failed");
                self.fail(selection, &err);
                return Err(err);
            }
        };

        let token = started.token;
        if !self.controller.install(&ticket, token.clone()) {
            tracing::debug!(selection, %token, "search superseded before its token arrived");
            self.controller.stop_quietly(&token).await;
            return Ok(SearchOutcome::Discarded);
        }
        tracing::info!(selection, %token, "search started");

        let polled = poll_prices(
            self.api.as_ref(),
            &token,
            started.wait_until,
            ticket.cancel_token(),
            &self.config,
            &self.stats,
        )
        .await;

        match polled {
            Ok(PollOutcome::Prices(prices)) => {
                let result = normalize(&token, &prices);
                if !self.commit(selection, &ticket, &token, &result) {
                    tracing::debug!(selection, %token, "discarding result of superseded search");
                    return Ok(SearchOutcome::Discarded);
                }
                // committed results are no longer abandonable
                self.controller.release_submit_lock(lock_id);

                if let Err(err) = self.hotels_for(selection).await {
                    tracing::warn!(selection, error = %err, "could not load hotels for destination");
                }
                Ok(SearchOutcome::Committed(result))
            }
            Ok(PollOutcome::Cancelled) => Ok(SearchOutcome::Discarded),
            Err(err) => {
                if !self
                    .controller
                    .complete_if_current(&ticket, &token, || self.fail(selection, &err))
                {
                    return Ok(SearchOutcome::Discarded);
                }
                Err(err)
            }
        }
    }

    fn commit(
        &self,
        selection: &str,
        ticket: &SearchTicket,
        token: &SearchToken,
        result: &NormalizedResult,
    ) -> bool {
        let committed = self.controller.complete_if_current(ticket, token, || {
            self.results.insert(selection.to_string(), result.clone());
        });

        if committed {
            SearchStats::incr(&self.stats.searches_succeeded);
            tracing::info!(selection, %token, prices = result.price_ids.len(), "search committed");
            self.emit(SearchEvent::Result {
                selection: selection.to_string(),
                result: result.clone(),
            });
        }
        committed
    }

    fn fail(&self, selection: &str, err: &SearchError) {
        SearchStats::incr(&self.stats.searches_failed);
        let message = err.user_message();
        {
            let mut view = self.view.lock();
            if view.active_selection.as_deref() == Some(selection) {
                view.error = Some(message.clone());
            }
        }
        self.emit(SearchEvent::Error {
            selection: selection.to_string(),
            message,
        });
    }

    /// Reacts to the user picking another destination.
    ///
    /// If a search is locked in flight for a different destination it is
    /// retired, its cached result dropped and the lock released. Returns the
    /// abandoned destination.
    pub async fn on_selection_changed(&self, selection_id: &str) -> Option<String> {
        let (lock_id, abandoned) = self
            .controller
            .held_lock()
            .filter(|(_, locked)| locked != selection_id)?;

        tracing::info!(abandoned = %abandoned, selection = selection_id, "abandoning search");
        self.controller.retire_active().await;
        self.results.remove(&abandoned);
        {
            let mut view = self.view.lock();
            if view.active_selection.as_deref() == Some(abandoned.as_str()) {
                view.error = None;
            }
        }
        self.controller.release_submit_lock(lock_id);
        Some(abandoned)
    }

    pub fn status(&self) -> SearchStatus {
        if self.controller.is_locked() {
            return SearchStatus::Loading;
        }

        let view = self.view.lock();
        if let Some(message) = &view.error {
            return SearchStatus::Failed(message.clone());
        }

        let result = view
            .active_selection
            .as_deref()
            .and_then(|selection| self.results.get(selection));
        match result {
            Some(result) if result.is_empty() && view.has_searched => SearchStatus::Empty,
            Some(_) => SearchStatus::Ready,
            None => SearchStatus::Idle,
        }
    }

    pub fn is_searching(&self) -> bool {
        self.controller.is_locked()
    }

    pub fn active_selection(&self) -> Option<String> {
        self.view.lock().active_selection.clone()
    }

    pub fn active_token(&self) -> Option<SearchToken> {
        self.controller.active_token()
    }

    pub fn result_for(&self, selection: &str) -> Option<NormalizedResult> {
        self.results.get(selection).map(|r| r.value().clone())
    }

    pub fn current_result(&self) -> Option<NormalizedResult> {
        self.active_selection()
            .and_then(|selection| self.result_for(&selection))
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.controller.lock_releases())
    }

    /// Country directory, fetched once per orchestrator.
    pub async fn load_countries(&self) -> Result<CountriesMap, ApiError> {
        let loaded = self.countries.read().clone();
        if let Some(countries) = loaded {
            return Ok(countries);
        }

        let countries = self.api.countries().await?;
        *self.countries.write() = Some(countries.clone());
        Ok(countries)
    }

    /// Hotels of one destination, fetched at most once.
    pub async fn hotels_for(&self, country_id: &str) -> Result<HotelsMap, ApiError> {
        let memoized = self.hotels.get(country_id).map(|h| h.value().clone());
        if let Some(hotels) = memoized {
            return Ok(hotels);
        }

        let hotels = self.api.hotels(country_id).await?;
        self.hotels.insert(country_id.to_string(), hotels.clone());
        Ok(hotels)
    }

    pub async fn geo_search(&self, query: &str) -> Result<GeoResponseMap, ApiError> {
        self.api.geo_search(query).await
    }

    /// Offers of the active destination joined with their hotel and country.
    /// Prices whose hotel is unknown are skipped.
    pub fn tours(&self) -> Vec<Tour> {
        let Some(selection) = self.active_selection() else {
            return Vec::new();
        };
        let Some(result) = self.result_for(&selection) else {
            return Vec::new();
        };
        let Some(hotels) = self.hotels.get(&selection).map(|h| h.value().clone()) else {
            return Vec::new();
        };
        let countries = self.countries.read();

        result
            .prices()
            .filter_map(|price| {
                let hotel = hotels.get(&price.hotel_id)?;
                Some(Tour {
                    price: price.clone(),
                    hotel: hotel.clone(),
                    country: countries
                        .as_ref()
                        .and_then(|c| c.get(&hotel.country_id))
                        .cloned(),
                })
            })
            .collect()
    }
}
