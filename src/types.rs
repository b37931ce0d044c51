// Wire and domain types shared by the search client, the poll loop and the orchestrator

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    marker::PhantomData,
};

use chrono::{DateTime, Utc};
use serde::{
    de::{MapAccess, Visitor},
    ser::SerializeMap,
    Deserialize, Deserializer, Serialize, Serializer,
};

/// Server-issued handle for one search.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchToken(pub String);

impl SearchToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SearchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SearchToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSearchResponse {
    pub token: SearchToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_until: Option<String>,
}

// Body of any non-2xx response. Every field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_until: Option<String>,
}

/// One offer as sent by the server. `id` may be missing, in which case the
/// key it is stored under in the containing map is its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPrice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub start_date: String,
    pub end_date: String,
    #[serde(rename = "hotelID")]
    pub hotel_id: String,
}

/// An offer after normalization: the id is always present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TourPrice {
    pub id: String,
    pub amount: f64,
    pub currency: String,
    pub start_date: String,
    pub end_date: String,
    #[serde(rename = "hotelID")]
    pub hotel_id: String,
}

/// Price mapping that keeps the member order of the JSON object it was read from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceMap {
    entries: Vec<(String, RawPrice)>,
    // key -> position in `entries`
    index: HashMap<String, usize>,
}

impl PriceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, price: RawPrice) {
        let key = key.into();
        match self.index.get(&key) {
            Some(&at) => self.entries[at].1 = price,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, price));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RawPrice)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, RawPrice)> for PriceMap {
    fn from_iter<I: IntoIterator<Item = (String, RawPrice)>>(iter: I) -> Self {
        let mut map = PriceMap::new();
        for (key, price) in iter {
            map.insert(key, price);
        }
        map
    }
}

impl Serialize for PriceMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, price) in &self.entries {
            map.serialize_entry(key, price)?;
        }
        map.end()
    }
}

struct PriceMapVisitor(PhantomData<PriceMap>);

impl<'de> Visitor<'de> for PriceMapVisitor {
    type Value = PriceMap;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of price id to price")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let capacity = access.size_hint().unwrap_or(0);
        let mut prices = PriceMap {
            entries: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        };
        while let Some((key, price)) = access.next_entry::<String, RawPrice>()? {
            prices.insert(key, price);
        }
        Ok(prices)
    }
}

impl<'de> Deserialize<'de> for PriceMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(PriceMapVisitor(PhantomData))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchPricesResponse {
    #[serde(default)]
    pub prices: Option<PriceMap>,
}

/// Committed outcome of one successful search.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedResult {
    pub token: SearchToken,
    pub received_at: DateTime<Utc>,
    pub price_ids: Vec<String>,
    pub prices_by_id: HashMap<String, TourPrice>,
}

impl NormalizedResult {
    pub fn is_empty(&self) -> bool {
        self.price_ids.is_empty()
    }

    /// Prices in the order the server sent them.
    pub fn prices(&self) -> impl Iterator<Item = &TourPrice> {
        self.price_ids
            .iter()
            .filter_map(|id| self.prices_by_id.get(id))
    }
}

// Geo lookups

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Country {
    pub id: String,
    pub name: String,
    pub flag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct City {
    pub id: u64,
    pub name: String,
    pub country_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hotel {
    pub id: u64,
    pub name: String,
    pub img: String,
    pub city_id: u64,
    pub city_name: String,
    pub country_id: String,
    pub country_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GeoEntity {
    Country(Country),
    City(City),
    Hotel(Hotel),
}

impl GeoEntity {
    pub fn name(&self) -> &str {
        match self {
            GeoEntity::Country(c) => &c.name,
            GeoEntity::City(c) => &c.name,
            GeoEntity::Hotel(h) => &h.name,
        }
    }
}

pub type CountriesMap = HashMap<String, Country>;
pub type HotelsMap = HashMap<String, Hotel>;
pub type GeoResponseMap = HashMap<String, GeoEntity>;

/// A price joined with the hotel and country it belongs to, ready for display.
#[derive(Debug, Clone, PartialEq)]
pub struct Tour {
    pub price: TourPrice,
    pub hotel: Hotel,
    pub country: Option<Country>,
}
