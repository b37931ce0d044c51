use std::collections::HashMap;

use chrono::Utc;

use crate::types::{NormalizedResult, PriceMap, SearchToken, TourPrice};

/// Turns the server's price mapping into a [`NormalizedResult`].
///
/// Ids follow server order. A price without its own `id` takes the key it was
/// stored under; a price that carries one keeps it but stays indexed by key.
pub fn normalize(token: &SearchToken, prices: &PriceMap) -> NormalizedResult {
    let mut price_ids = Vec::with_capacity(prices.len());
    let mut prices_by_id = HashMap::with_capacity(prices.len());

    for (key, raw) in prices.iter() {
        let price = TourPrice {
            id: raw.id.clone().unwrap_or_else(|| key.to_string()),
            amount: raw.amount,
            currency: raw.currency.clone(),
            start_date: raw.start_date.clone(),
            end_date: raw.end_date.clone(),
            hotel_id: raw.hotel_id.clone(),
        };

        if prices_by_id.insert(key.to_string(), price).is_none() {
            price_ids.push(key.to_string());
        }
    }

    NormalizedResult {
        token: token.clone(),
        received_at: Utc::now(),
        price_ids,
        prices_by_id,
    }
}
