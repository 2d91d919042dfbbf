use std::time::Instant;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::Client;
use serde::Deserialize;

use crate::config::SearchOptions;
use crate::error::{AppError, AppResult};
use crate::geo::Position;

/// A geocoded place. Only the first result of a lookup is ever used.
#[derive(Debug, Clone, PartialEq)]
pub struct Place {
    pub latitude: f64,
    pub longitude: f64,
    pub display_name: String,
}

impl Place {
    pub fn position(&self) -> Position {
        Position::new(self.latitude, self.longitude)
    }
}

#[async_trait]
pub trait PlaceSearch: Send + Sync {
    async fn search(&self, query: &str) -> AppResult<Vec<Place>>;
}

/// Nominatim returns coordinates as strings.
#[derive(Debug, Deserialize)]
struct RawPlace {
    lat: String,
    lon: String,
    #[serde(default)]
    display_name: String,
}

impl TryFrom<RawPlace> for Place {
    type Error = AppError;

    fn try_from(raw: RawPlace) -> AppResult<Self> {
        let latitude: f64 = raw
            .lat
            .trim()
            .parse()
            .map_err(|_| AppError::Search(format!("invalid latitude {:?}", raw.lat)))?;
        let longitude: f64 = raw
            .lon
            .trim()
            .parse()
            .map_err(|_| AppError::Search(format!("invalid longitude {:?}", raw.lon)))?;
        let place = Place {
            latitude,
            longitude,
            display_name: raw.display_name,
        };
        if !place.position().is_valid() {
            return Err(AppError::Search(format!(
                "coordinates out of range: {latitude}, {longitude}"
            )));
        }
        Ok(place)
    }
}

pub fn parse_places(body: &[u8]) -> AppResult<Vec<Place>> {
    let raw: Vec<RawPlace> = serde_json::from_slice(body)
        .map_err(|e| AppError::Search(format!("Failed to parse response: {}", e)))?;
    raw.into_iter().take(1).map(Place::try_from).collect()
}

pub struct NominatimClient {
    client: Client,
    endpoint: String,
}

impl NominatimClient {
    pub fn new(options: &SearchOptions) -> AppResult<Self> {
        let defaults = SearchOptions::default();
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            header_or_default("user_agent", &options.user_agent, &defaults.user_agent),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            header_or_default(
                "accept_language",
                &options.accept_language,
                &defaults.accept_language,
            ),
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(options.timeout())
            .build()
            .map_err(|e| AppError::Search(format!("building HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: options.endpoint.clone(),
        })
    }
}

/// Invalid configured values fall back to the defaults.
fn header_or_default(field: &str, value: &str, default: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|err| {
        tracing::warn!(field, %err, "invalid header value in [search] config, using default");
        HeaderValue::from_str(default).unwrap_or_else(|_| HeaderValue::from_static("geonotes"))
    })
}

#[async_trait]
impl PlaceSearch for NominatimClient {
    async fn search(&self, query: &str) -> AppResult<Vec<Place>> {
        let start = Instant::now();
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("format", "json"), ("limit", "1"), ("q", query)])
            .send()
            .await
            .map_err(|e| AppError::Search(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Search(format!(
                "place search returned {}: {}",
                status, body
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AppError::Search(format!("Failed to read response: {}", e)))?;
        let places = parse_places(&body)?;
        tracing::debug!(
            query,
            result_count = places.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "place search complete"
        );
        Ok(places)
    }
}
