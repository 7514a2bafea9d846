//! Scripted in-process provider for pipeline tests

use async_trait::async_trait;
use lead_harvester::harvest::HarvestConfig;
use lead_harvester::postal::PostalCode;
use lead_harvester::provider::{PlacesProvider, ProviderError, ProviderResult, RequestGate};
use lead_harvester::RawPlaceRecord;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// A provider call, as seen by hooks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Search { query: String, postal_code: String },
    Details { place_id: String },
}

type Hook = Box<dyn Fn(&Call) + Send + Sync>;

/// Replays queued responses per postal code / place id.
///
/// An empty search queue answers with no results; an empty details queue
/// answers `NotFound`. Every search passes the gate `requests_per_search`
/// times (geocode plus result pages), every details lookup once.
#[derive(Default)]
pub struct ScriptedProvider {
    searches: Mutex<HashMap<String, VecDeque<ProviderResult<Vec<RawPlaceRecord>>>>>,
    details: Mutex<HashMap<String, VecDeque<ProviderResult<RawPlaceRecord>>>>,
    calls: Mutex<Vec<Call>>,
    hook: Option<Hook>,
    latency: Option<Duration>,
    requests_per_search: usize,
    admitted: Mutex<Vec<Instant>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            requests_per_search: 1,
            ..Self::default()
        }
    }

    pub fn search(self, postal_code: &str, result: ProviderResult<Vec<RawPlaceRecord>>) -> Self {
        self.searches
            .lock()
            .entry(postal_code.to_string())
            .or_default()
            .push_back(result);
        self
    }

    pub fn details(self, place_id: &str, result: ProviderResult<RawPlaceRecord>) -> Self {
        self.details
            .lock()
            .entry(place_id.to_string())
            .or_default()
            .push_back(result);
        self
    }

    /// Run `hook` at the start of every call
    pub fn with_hook(mut self, hook: impl Fn(&Call) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    /// Sleep this long inside every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// HTTP requests each search makes, e.g. 1 geocode + 3 pages = 4
    pub fn with_requests_per_search(mut self, requests: usize) -> Self {
        self.requests_per_search = requests;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn search_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Search { postal_code, .. } => Some(postal_code),
                Call::Details { .. } => None,
            })
            .collect()
    }

    pub fn detail_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Details { .. }))
            .count()
    }

    /// When each request passed the gate
    pub fn admitted(&self) -> Vec<Instant> {
        self.admitted.lock().clone()
    }

    async fn admit(&self, gate: &dyn RequestGate, requests: usize) {
        for _ in 0..requests {
            gate.admit().await;
            self.admitted.lock().push(Instant::now());
        }
    }

    async fn enter(&self, call: Call) {
        if let Some(hook) = &self.hook {
            hook(&call);
        }
        self.calls.lock().push(call);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl PlacesProvider for ScriptedProvider {
    async fn search(
        &self,
        query: &str,
        location: &PostalCode,
        _radius_m: u32,
        gate: &dyn RequestGate,
    ) -> ProviderResult<Vec<RawPlaceRecord>> {
        self.admit(gate, self.requests_per_search).await;
        self.enter(Call::Search {
            query: query.to_string(),
            postal_code: location.to_string(),
        })
        .await;
        let next = self
            .searches
            .lock()
            .get_mut(location.as_str())
            .and_then(VecDeque::pop_front);
        next.unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn details(&self, place_id: &str, gate: &dyn RequestGate) -> ProviderResult<RawPlaceRecord> {
        self.admit(gate, 1).await;
        self.enter(Call::Details {
            place_id: place_id.to_string(),
        })
        .await;
        let next = self
            .details
            .lock()
            .get_mut(place_id)
            .and_then(VecDeque::pop_front);
        next.unwrap_or_else(|| Err(ProviderError::NotFound(place_id.to_string())))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Listing with a place id and a phone number
pub fn place(place_id: &str, name: &str, phone: &str) -> RawPlaceRecord {
    RawPlaceRecord {
        place_id: Some(place_id.to_string()),
        name: name.to_string(),
        address: Some(format!("{place_id} King St N, Waterloo, ON")),
        phone: Some(phone.to_string()),
        categories: vec!["dentist".to_string(), "health".to_string()],
        ..Default::default()
    }
}

/// Listing with only a name and phone number
pub fn bare(place_id: Option<&str>, name: &str, phone: &str) -> RawPlaceRecord {
    RawPlaceRecord {
        place_id: place_id.map(String::from),
        name: name.to_string(),
        phone: Some(phone.to_string()),
        ..Default::default()
    }
}

/// Configuration without jitter, with a generous budget, writing into `dir`
pub fn fast_config(dir: &Path) -> HarvestConfig {
    HarvestConfig {
        min_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        max_requests_per_minute: 10_000,
        output_dir: dir.to_path_buf(),
        detailed: false,
        xlsx_refresh_every: 0,
        ..HarvestConfig::default()
    }
}
