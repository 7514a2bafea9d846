//! Google Places (New) and Geocoding implementation of [`PlacesProvider`]
//!
//! A search first resolves the postal code to coordinates through the
//! Geocoding API, then pages through Places Text Search results biased to a
//! circle around that point until the per-location cap is reached. The
//! geocode lookup and every result page each pass the caller's gate.

use crate::harvest::config::HarvestConfig;
use crate::postal::{PostalCode, Region};
use crate::provider::{build_http_client, PlacesProvider, ProviderError, ProviderResult, RequestGate};
use crate::{Coordinates, RawPlaceRecord};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const PLACES_BASE_URL: &str = "https://places.googleapis.com/v1";
const GEOCODE_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";

/// Text Search returns at most this many places per page
const PAGE_SIZE: usize = 20;

const SEARCH_FIELD_MASK: &str = "places.id,places.displayName,places.formattedAddress,places.location,places.rating,places.userRatingCount,places.businessStatus,places.types,places.nationalPhoneNumber,places.internationalPhoneNumber,places.websiteUri,places.regularOpeningHours,nextPageToken";
const DETAILS_FIELD_MASK: &str = "id,displayName,formattedAddress,location,rating,userRatingCount,businessStatus,types,nationalPhoneNumber,internationalPhoneNumber,websiteUri,regularOpeningHours";

/// HTTP client for the Google Places and Geocoding APIs.
pub struct GooglePlacesProvider {
    client: Client,
    api_key: SecretString,
    max_results: usize,
}

impl GooglePlacesProvider {
    /// Create a provider using the harvest's timeout and result cap
    ///
    /// # Errors
    /// [`ProviderError::ClientSetup`] if the HTTP client cannot be built.
    pub fn new(api_key: String, config: &HarvestConfig) -> ProviderResult<Self> {
        Ok(Self {
            client: build_http_client(config.request_timeout)?,
            api_key: SecretString::from(api_key),
            max_results: config.max_results_per_location,
        })
    }

    /// Resolve a postal code to coordinates.
    ///
    /// # Errors
    /// [`ProviderError::GeocodeFailure`] when the code has no result.
    pub async fn geocode(
        &self,
        location: &PostalCode,
        gate: &dyn RequestGate,
    ) -> ProviderResult<Coordinates> {
        gate.admit().await;
        let components = format!("country:{}", country_code(location.region()));
        let response = self
            .client
            .get(GEOCODE_URL)
            .query(&[
                ("address", location.as_str()),
                ("components", components.as_str()),
                ("key", self.api_key.expose_secret()),
            ])
            .send()
            .await?;
        let body: GeocodeResponse = check_status(response, location.as_str()).await?.json().await?;
        geocode_result(body, location)
    }

    async fn search_page(
        &self,
        body: &SearchRequest<'_>,
        context: &str,
        gate: &dyn RequestGate,
    ) -> ProviderResult<SearchResponse> {
        gate.admit().await;
        let response = self
            .client
            .post(format!("{PLACES_BASE_URL}/places:searchText"))
            .header("X-Goog-Api-Key", self.api_key.expose_secret())
            .header("X-Goog-FieldMask", SEARCH_FIELD_MASK)
            .json(body)
            .send()
            .await?;
        Ok(check_status(response, context).await?.json().await?)
    }
}

#[async_trait]
impl PlacesProvider for GooglePlacesProvider {
    async fn search(
        &self,
        query: &str,
        location: &PostalCode,
        radius_m: u32,
        gate: &dyn RequestGate,
    ) -> ProviderResult<Vec<RawPlaceRecord>> {
        let center = self.geocode(location, gate).await?;
        debug!(
            postal_code = %location,
            latitude = center.latitude,
            longitude = center.longitude,
            "Geocoded postal code"
        );

        let max_pages = self.max_results.div_ceil(PAGE_SIZE).max(1);
        let mut places = Vec::new();
        let mut page_token: Option<String> = None;

        for page in 0..max_pages {
            let remaining = self.max_results.saturating_sub(places.len());
            if remaining == 0 {
                break;
            }
            let body = SearchRequest {
                text_query: query,
                page_size: remaining.min(PAGE_SIZE),
                language_code: "en",
                location_bias: LocationBias {
                    circle: Circle {
                        center: LatLng {
                            latitude: center.latitude,
                            longitude: center.longitude,
                        },
                        radius: f64::from(radius_m),
                    },
                },
                page_token: page_token.as_deref(),
            };

            let response = self.search_page(&body, query, gate).await?;
            let found = response.places.len();
            places.extend(response.places.into_iter().map(RawPlaceRecord::from));
            debug!(query = %query, page = page + 1, found = found, "Text search page");

            match response.next_page_token {
                Some(token) if !token.is_empty() && found > 0 => page_token = Some(token),
                _ => break,
            }
        }

        places.truncate(self.max_results);
        Ok(places)
    }

    async fn details(&self, place_id: &str, gate: &dyn RequestGate) -> ProviderResult<RawPlaceRecord> {
        gate.admit().await;
        let response = self
            .client
            .get(format!("{PLACES_BASE_URL}/places/{place_id}"))
            .header("X-Goog-Api-Key", self.api_key.expose_secret())
            .header("X-Goog-FieldMask", DETAILS_FIELD_MASK)
            .send()
            .await?;
        let place: PlaceResponse = check_status(response, place_id).await?.json().await?;
        Ok(place.into())
    }

    fn name(&self) -> &'static str {
        "google_places"
    }
}

fn country_code(region: Region) -> &'static str {
    match region {
        Region::Ca => "CA",
        Region::Us => "US",
        Region::Uk => "GB",
    }
}

/// Map a non-success HTTP status onto the provider error taxonomy
async fn check_status(response: Response, context: &str) -> ProviderResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = parse_retry_after(&response);
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    warn!(status = %status, context = %context, "Provider request failed");
    Err(classify_status(status, retry_after, context, body))
}

fn parse_retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    context: &str,
    body: String,
) -> ProviderError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Auth(body),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::QuotaExceeded { retry_after },
        StatusCode::NOT_FOUND => ProviderError::NotFound(context.to_string()),
        StatusCode::REQUEST_TIMEOUT => ProviderError::Network(format!("{status}: {body}")),
        s if s.is_server_error() => ProviderError::Network(format!("{status}: {body}")),
        _ => ProviderError::InvalidResponse(format!("{status}: {body}")),
    }
}

fn geocode_result(body: GeocodeResponse, location: &PostalCode) -> ProviderResult<Coordinates> {
    let detail = || body.error_message.clone().unwrap_or_else(|| body.status.clone());
    match body.status.as_str() {
        "OK" => body
            .results
            .first()
            .map(|r| Coordinates::new(r.geometry.location.lat, r.geometry.location.lng))
            .ok_or_else(|| ProviderError::GeocodeFailure(location.to_string())),
        "ZERO_RESULTS" | "INVALID_REQUEST" => {
            Err(ProviderError::GeocodeFailure(location.to_string()))
        }
        "OVER_QUERY_LIMIT" | "OVER_DAILY_LIMIT" => {
            Err(ProviderError::QuotaExceeded { retry_after: None })
        }
        "REQUEST_DENIED" => Err(ProviderError::Auth(detail())),
        _ => Err(ProviderError::Network(detail())),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    text_query: &'a str,
    page_size: usize,
    language_code: &'a str,
    location_bias: LocationBias,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct LocationBias {
    circle: Circle,
}

#[derive(Debug, Serialize)]
struct Circle {
    center: LatLng,
    radius: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct LatLng {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    places: Vec<PlaceResponse>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaceResponse {
    id: Option<String>,
    display_name: Option<LocalizedText>,
    formatted_address: Option<String>,
    location: Option<LatLng>,
    rating: Option<f64>,
    user_rating_count: Option<u32>,
    business_status: Option<String>,
    #[serde(default)]
    types: Vec<String>,
    national_phone_number: Option<String>,
    international_phone_number: Option<String>,
    website_uri: Option<String>,
    regular_opening_hours: Option<OpeningHours>,
}

#[derive(Debug, Deserialize)]
struct LocalizedText {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpeningHours {
    #[serde(default)]
    weekday_descriptions: Vec<String>,
}

impl From<PlaceResponse> for RawPlaceRecord {
    fn from(place: PlaceResponse) -> Self {
        let phone = place
            .national_phone_number
            .filter(|p| !p.trim().is_empty())
            .or(place.international_phone_number);
        RawPlaceRecord {
            place_id: place.id,
            name: place
                .display_name
                .and_then(|t| t.text)
                .unwrap_or_default(),
            address: place.formatted_address,
            phone,
            website: place.website_uri,
            rating: place.rating,
            review_count: place.user_rating_count,
            status: place.business_status,
            categories: place.types,
            hours: place
                .regular_opening_hours
                .map(|h| h.weekday_descriptions)
                .unwrap_or_default(),
            coordinates: place
                .location
                .map(|l| Coordinates::new(l.latitude, l.longitude)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    geometry: GeocodeGeometry,
}

#[derive(Debug, Deserialize)]
struct GeocodeGeometry {
    location: GeocodeLocation,
}

#[derive(Debug, Deserialize)]
struct GeocodeLocation {
    lat: f64,
    lng: f64,
}
