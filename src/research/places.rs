//! Restaurant lookup for the research sub-flow
//!
//! Backed by the Google Places text search. Results are trimmed to a short
//! list plus a one-line summary the user can drop straight into research.

use super::SearchError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const PLACES_ENDPOINT: &str = "https://maps.googleapis.com/maps/api/place/textsearch/json";
const MAX_RESTAURANTS: usize = 5;
/// Shown when the provider does not report a price level
const DEFAULT_PRICE_LEVEL: usize = 2;

/// What the user is in the mood for; needs at least a cuisine or a location
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RestaurantQuery {
    #[serde(default)]
    pub cuisine: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    /// `$` to `$$$$`
    #[serde(default)]
    pub price_range: Option<String>,
}

impl RestaurantQuery {
    /// Free-text query, e.g. "sushi restaurant Mission District"
    pub fn search_text(&self) -> Option<String> {
        let field = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };
        let cuisine = field(&self.cuisine);
        let location = field(&self.location);
        if cuisine.is_none() && location.is_none() {
            return None;
        }
        let parts: Vec<String> = cuisine
            .into_iter()
            .chain(std::iter::once("restaurant".to_string()))
            .chain(location)
            .collect();
        Some(parts.join(" "))
    }

    /// Upper price bound on the provider's 0-4 scale
    pub fn max_price(&self) -> Option<usize> {
        let range = self.price_range.as_deref()?.trim();
        if range.is_empty() || !range.chars().all(|c| c == '$') {
            return None;
        }
        Some(range.len().min(4))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Restaurant {
    pub name: String,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    pub price_level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_now: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestaurantResults {
    pub restaurants: Vec<Restaurant>,
    pub summary: String,
}

impl RestaurantResults {
    pub fn new(restaurants: Vec<Restaurant>) -> Self {
        let summary = summarize(&restaurants);
        Self {
            restaurants,
            summary,
        }
    }
}

fn summarize(restaurants: &[Restaurant]) -> String {
    if restaurants.is_empty() {
        return "No restaurants found matching your criteria".to_string();
    }
    let listed: Vec<String> = restaurants
        .iter()
        .map(|r| match r.rating {
            Some(rating) => format!("{} ({rating}★)", r.name),
            None => format!("{} (unrated)", r.name),
        })
        .collect();
    format!(
        "Found {} restaurants: {}",
        restaurants.len(),
        listed.join(", ")
    )
}

#[async_trait]
pub trait RestaurantFinder: Send + Sync {
    async fn find(&self, query: &RestaurantQuery) -> Result<RestaurantResults, SearchError>;
}

#[async_trait]
impl<T: RestaurantFinder + ?Sized> RestaurantFinder for Arc<T> {
    async fn find(&self, query: &RestaurantQuery) -> Result<RestaurantResults, SearchError> {
        (**self).find(query).await
    }
}

/// Google Places text search client
pub struct GooglePlaces {
    client: Client,
    api_key: String,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct PlacesResponse {
    #[serde(default)]
    results: Vec<Place>,
}

#[derive(Debug, Deserialize)]
struct Place {
    #[serde(default)]
    name: String,
    #[serde(default)]
    formatted_address: String,
    #[serde(default)]
    rating: Option<f64>,
    #[serde(default)]
    price_level: Option<usize>,
    #[serde(default)]
    opening_hours: Option<OpeningHours>,
}

#[derive(Debug, Deserialize)]
struct OpeningHours {
    #[serde(default)]
    open_now: Option<bool>,
}

impl From<Place> for Restaurant {
    fn from(place: Place) -> Self {
        let level = place
            .price_level
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_PRICE_LEVEL);
        Self {
            name: place.name,
            address: place.formatted_address,
            rating: place.rating,
            price_level: "$".repeat(level),
            open_now: place.opening_hours.and_then(|h| h.open_now),
        }
    }
}

impl From<PlacesResponse> for RestaurantResults {
    fn from(resp: PlacesResponse) -> Self {
        Self::new(
            resp.results
                .into_iter()
                .take(MAX_RESTAURANTS)
                .map(Restaurant::from)
                .collect(),
        )
    }
}

impl GooglePlaces {
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            endpoint: PLACES_ENDPOINT.to_string(),
        }
    }
}

#[async_trait]
impl RestaurantFinder for GooglePlaces {
    async fn find(&self, query: &RestaurantQuery) -> Result<RestaurantResults, SearchError> {
        let text = query.search_text().ok_or(SearchError::EmptyQuery)?;

        let mut params = vec![("query", text), ("key", self.api_key.clone())];
        if let Some(max) = query.max_price() {
            params.push(("maxprice", max.to_string()));
        }

        let response = self
            .client
            .get(&self.endpoint)
            .query(&params)
            .send()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = %status, "Places provider error");
            return Err(SearchError::Status {
                status: status.as_u16(),
            });
        }

        let parsed: PlacesResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Request(format!("Invalid places response: {e}")))?;
        let results = RestaurantResults::from(parsed);
        tracing::debug!(results = results.restaurants.len(), "Restaurant lookup completed");
        Ok(results)
    }
}
