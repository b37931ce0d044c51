// Scriptable in-process stand-in for the search API, used by the tests.
// Responses are queued per selection (start) and per token (poll); gates hold
// a call in flight until the test releases it.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::{
    api::{ApiError, SearchApi, TOO_EARLY},
    types::{
        ApiErrorPayload, CountriesMap, GeoResponseMap, HotelsMap, PriceMap, RawPrice, SearchToken,
        StartSearchResponse,
    },
    wait::format_instant,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Start { selection: String },
    Poll { token: String },
    Stop { token: String },
    Countries,
    Hotels { country_id: String },
    GeoSearch { query: String },
}

#[derive(Default)]
pub struct MockSearchApi {
    starts: Mutex<HashMap<String, VecDeque<Result<StartSearchResponse, ApiError>>>>,
    polls: Mutex<HashMap<String, VecDeque<Result<PriceMap, ApiError>>>>,
    start_gates: Mutex<HashMap<String, Arc<Notify>>>,
    poll_gates: Mutex<HashMap<String, Arc<Notify>>>,
    hotel_gates: Mutex<HashMap<String, Arc<Notify>>>,
    calls: Mutex<Vec<MockCall>>,
    countries: Mutex<CountriesMap>,
    hotels: Mutex<HashMap<String, HotelsMap>>,
    geo: Mutex<GeoResponseMap>,
    stop_fails: AtomicBool,
    delay_ms: AtomicUsize,
    issued: AtomicUsize,
}

impl MockSearchApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_start(&self, selection: &str, response: Result<StartSearchResponse, ApiError>) {
        self.starts
            .lock()
            .entry(selection.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn start_with(&self, selection: &str, token: &str, wait_until: Option<String>) {
        self.script_start(
            selection,
            Ok(StartSearchResponse {
                token: SearchToken::from(token),
                wait_until,
            }),
        );
    }

    pub fn script_poll(&self, token: &str, response: Result<PriceMap, ApiError>) {
        self.polls
            .lock()
            .entry(token.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn poll_too_early(&self, token: &str, wait_until: Option<String>) {
        self.script_poll(
            token,
            Err(ApiError::http(
                TOO_EARLY,
                ApiErrorPayload {
                    code: Some(TOO_EARLY),
                    error: Some(true),
                    message: Some("Search results are not ready yet".to_string()),
                    wait_until,
                },
            )),
        );
    }

    pub fn poll_prices(&self, token: &str, prices: PriceMap) {
        self.script_poll(token, Ok(prices));
    }

    // Start calls for `selection` block until the returned gate is notified
    pub fn hold_start(&self, selection: &str) -> Arc<Notify> {
        self.start_gates
            .lock()
            .entry(selection.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    // Poll calls for `token` block until the returned gate is notified
    pub fn hold_poll(&self, token: &str) -> Arc<Notify> {
        self.poll_gates
            .lock()
            .entry(token.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    // Hotel lookups for `country_id` block until the returned gate is notified
    pub fn hold_hotels(&self, country_id: &str) -> Arc<Notify> {
        self.hotel_gates
            .lock()
            .entry(country_id.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    pub fn set_delay(&self, delay_ms: usize) {
        self.delay_ms.store(delay_ms, Ordering::SeqCst);
    }

    pub fn fail_stops(&self, fail: bool) {
        self.stop_fails.store(fail, Ordering::SeqCst);
    }

    pub fn add_country(&self, id: &str, name: &str) {
        self.countries.lock().insert(
            id.to_string(),
            crate::types::Country {
                id: id.to_string(),
                name: name.to_string(),
                flag: format!("https://flagcdn.com/{}.svg", id),
            },
        );
    }

    pub fn add_hotels(&self, country_id: &str, hotels: HotelsMap) {
        self.hotels.lock().insert(country_id.to_string(), hotels);
    }

    pub fn set_geo(&self, geo: GeoResponseMap) {
        *self.geo.lock() = geo;
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&MockCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(*c)).count()
    }

    pub fn poll_count(&self, token: &str) -> usize {
        self.count(|c| matches!(c, MockCall::Poll { token: t } if t == token))
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().push(call);
    }

    async fn simulate_latency(&self) {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
    }

    fn gate(gates: &Mutex<HashMap<String, Arc<Notify>>>, key: &str) -> Option<Arc<Notify>> {
        gates.lock().get(key).cloned()
    }
}

#[async_trait]
impl SearchApi for MockSearchApi {
    async fn start(&self, selection_id: &str) -> Result<StartSearchResponse, ApiError> {
        self.record(MockCall::Start {
            selection: selection_id.to_string(),
        });

        if let Some(gate) = Self::gate(&self.start_gates, selection_id) {
            gate.notified().await;
        }
        self.simulate_latency().await;

        let scripted = self
            .starts
            .lock()
            .get_mut(selection_id)
            .and_then(|queue| queue.pop_front());

        scripted.unwrap_or_else(|| {
            let n = self.issued.fetch_add(1, Ordering::SeqCst);
            Ok(StartSearchResponse {
                token: SearchToken::new(format!(
                    "search-{}-{}-{:08x}",
                    selection_id,
                    n,
                    rand::random::<u32>()
                )),
                wait_until: Some(format_instant(Utc::now())),
            })
        })
    }

    async fn poll(&self, token: &SearchToken) -> Result<PriceMap, ApiError> {
        self.record(MockCall::Poll {
            token: token.to_string(),
        });

        if let Some(gate) = Self::gate(&self.poll_gates, token.as_str()) {
            gate.notified().await;
        }
        self.simulate_latency().await;

        let scripted = self
            .polls
            .lock()
            .get_mut(token.as_str())
            .and_then(|queue| queue.pop_front());

        scripted.unwrap_or_else(|| Ok(PriceMap::new()))
    }

    async fn stop(&self, token: &SearchToken) -> Result<(), ApiError> {
        self.record(MockCall::Stop {
            token: token.to_string(),
        });

        if self.stop_fails.load(Ordering::SeqCst) {
            return Err(ApiError::Network("Service unavailable".to_string()));
        }
        Ok(())
    }

    async fn countries(&self) -> Result<CountriesMap, ApiError> {
        self.record(MockCall::Countries);
        Ok(self.countries.lock().clone())
    }

    async fn hotels(&self, country_id: &str) -> Result<HotelsMap, ApiError> {
        self.record(MockCall::Hotels {
            country_id: country_id.to_string(),
        });

        if let Some(gate) = Self::gate(&self.hotel_gates, country_id) {
            gate.notified().await;
        }

        self.hotels.lock().get(country_id).cloned().ok_or_else(|| {
            ApiError::http(
                404,
                ApiErrorPayload {
                    code: Some(404),
                    error: Some(true),
                    message: Some(format!("No hotels for country {}", country_id)),
                    wait_until: None,
                },
            )
        })
    }

    async fn geo_search(&self, query: &str) -> Result<GeoResponseMap, ApiError> {
        self.record(MockCall::GeoSearch {
            query: query.to_string(),
        });

        let needle = query.to_lowercase();
        Ok(self
            .geo
            .lock()
            .iter()
            .filter(|(_, entity)| entity.name().to_lowercase().contains(&needle))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

// Fixture helpers

pub fn price(amount: f64, currency: &str, hotel_id: &str) -> RawPrice {
    RawPrice {
        id: None,
        amount,
        currency: currency.to_string(),
        start_date: "2024-01-01".to_string(),
        end_date: "2024-01-08".to_string(),
        hotel_id: hotel_id.to_string(),
    }
}

pub fn prices<'a>(entries: impl IntoIterator<Item = (&'a str, RawPrice)>) -> PriceMap {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

pub fn hotel(id: u64, name: &str, country_id: &str) -> crate::types::Hotel {
    crate::types::Hotel {
        id,
        name: name.to_string(),
        img: format!("https://img.example/{}.jpg", id),
        city_id: id * 10,
        city_name: "Hurghada".to_string(),
        country_id: country_id.to_string(),
        country_name: "Egypt".to_string(),
        description: None,
        services: None,
    }
}

/// An instant `ms` milliseconds from now in wire format.
pub fn in_ms(ms: i64) -> String {
    format_instant(Utc::now() + chrono::Duration::milliseconds(ms))
}
