//! # Lead Harvester Library
//!
//! Incremental ingestion of business listings from a places-search API.
//! A run walks an expanding sequence of postal codes, searches each one,
//! validates and deduplicates what comes back, and appends every surviving
//! record to durable CSV storage with an XLSX mirror.
//!
//! ## Features
//!
//! - **Postal-code sequencing**: Canadian, US and UK codes stepped outward from a start code
//! - **Quota-aware scheduling**: sliding-window rate limiter with jittered delays and backoff
//! - **Two-tier deduplication**: exact `place_id` matching plus a fuzzy name/address/phone signature
//! - **Crash-safe persistence**: every accepted record is flushed to the CSV before the next one
//! - **Resume**: reopening an existing output directory reseeds deduplication from the CSV
//! - **Sequential or worker-pool execution** with graceful cancellation
//!
//! ## Quick Start
//!
//! ```no_run
//! use lead_harvester::harvest::{HarvestConfig, HarvestRequest, IngestionPipeline};
//! use lead_harvester::provider::google::GooglePlacesProvider;
//! use lead_harvester::shutdown::ShutdownCoordinator;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HarvestConfig::default();
//! let provider = GooglePlacesProvider::new("my-api-key".to_string(), &config)?;
//!
//! let pipeline = IngestionPipeline::open(Arc::new(provider), config, ShutdownCoordinator::shared()).await?;
//! let report = pipeline
//!     .run(HarvestRequest::new("Dental offices in {}", "N2J 4Z2", 25))
//!     .await?;
//! println!("kept {} leads", report.state.records_kept);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`postal`] - Postal code parsing, region detection and sequencing
//! - [`provider`] - The places-search capability and its HTTP implementation
//! - [`validator`] - Completeness rules that turn raw records into leads
//! - [`dedup`] - Exact and fuzzy duplicate detection
//! - [`output`] - CSV/XLSX persistence behind a single-writer store
//! - [`harvest`] - Rate limiting, run state and the ingestion pipeline
//! - [`shutdown`] - Process-wide cancellation flag
//! - [`metrics`] - Prometheus counters and histograms
//! - [`cli`] - Command-line subcommands

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// CLI command implementations
pub mod cli;

/// Exact and fuzzy deduplication
pub mod dedup;

/// Ingestion orchestration
pub mod harvest;

/// Observability metrics
pub mod metrics;

/// Persistent output (CSV, XLSX)
pub mod output;

/// Postal code parsing and sequencing
pub mod postal;

/// Places-search provider capability
pub mod provider;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

/// Raw record validation
pub mod validator;

pub use postal::{PostalCode, Region};

/// Latitude/longitude pair in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude
    pub latitude: f64,
    /// Longitude
    pub longitude: f64,
}

impl Coordinates {
    /// Create a new coordinate pair
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// A business listing as returned by the provider, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPlaceRecord {
    /// Provider's stable identifier for the place
    pub place_id: Option<String>,
    /// Display name
    pub name: String,
    /// Formatted street address
    pub address: Option<String>,
    /// Phone number as returned (national or international)
    pub phone: Option<String>,
    /// Website URL
    pub website: Option<String>,
    /// Average rating
    pub rating: Option<f64>,
    /// Number of ratings
    pub review_count: Option<u32>,
    /// Operational status (e.g. "OPERATIONAL")
    pub status: Option<String>,
    /// Category/type tags, most specific first
    pub categories: Vec<String>,
    /// Opening hours, one line per weekday
    pub hours: Vec<String>,
    /// Location of the place
    pub coordinates: Option<Coordinates>,
}

impl RawPlaceRecord {
    /// Overlay a details lookup onto a search result.
    ///
    /// Every non-empty field from `details` replaces the search value; empty
    /// detail fields leave the search value untouched.
    pub fn merge_details(mut self, details: RawPlaceRecord) -> Self {
        fn overlay(target: &mut Option<String>, value: Option<String>) {
            if let Some(v) = value.filter(|v| !v.trim().is_empty()) {
                *target = Some(v);
            }
        }

        if !details.name.trim().is_empty() {
            self.name = details.name;
        }
        overlay(&mut self.place_id, details.place_id);
        overlay(&mut self.address, details.address);
        overlay(&mut self.phone, details.phone);
        overlay(&mut self.website, details.website);
        overlay(&mut self.status, details.status);
        if details.rating.is_some() {
            self.rating = details.rating;
        }
        if details.review_count.is_some() {
            self.review_count = details.review_count;
        }
        if !details.categories.is_empty() {
            self.categories = details.categories;
        }
        if !details.hours.is_empty() {
            self.hours = details.hours;
        }
        if details.coordinates.is_some() {
            self.coordinates = details.coordinates;
        }
        self
    }
}

/// A validated, normalized listing with provenance.
///
/// Built only by [`validator::RecordValidator`] (or reloaded from the CSV
/// store) and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadRecord {
    /// Display name (trimmed)
    pub name: String,
    /// Street address with collapsed whitespace
    pub address: Option<String>,
    /// Phone in canonical display format
    pub phone: Option<String>,
    /// Website URL
    pub website: Option<String>,
    /// Average rating
    pub rating: Option<f64>,
    /// Number of ratings
    pub review_count: Option<u32>,
    /// Operational status
    pub business_status: Option<String>,
    /// First category tag, or "establishment"
    pub primary_type: String,
    /// All category tags
    pub all_types: Vec<String>,
    /// Opening hours lines
    pub opening_hours: Vec<String>,
    /// Latitude
    pub latitude: Option<f64>,
    /// Longitude
    pub longitude: Option<f64>,
    /// Provider identifier
    pub place_id: Option<String>,
    /// Query that produced this record
    pub search_query: String,
    /// Postal code the query was anchored on
    pub search_location: String,
    /// When the record was accepted
    pub scraped_at: DateTime<Utc>,
}
