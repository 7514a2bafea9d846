//! Two-tier duplicate detection
//!
//! A record is a duplicate when its `place_id` has been seen before, or when
//! its fuzzy signature (normalized name, address and phone) has. Both sets
//! live behind one lock so that check-then-register is atomic for parallel
//! workers.

use crate::{LeadRecord, RawPlaceRecord};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::debug;

/// Corporate suffixes dropped from the end of a name
const NAME_SUFFIXES: &[&str] = &["inc", "ltd", "llc", "corp", "co"];

static UNIT_TOKENS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:unit|suite|ste|apt|apartment)\b\.?\s*#?\s*[a-z0-9-]+|#\s*[a-z0-9-]+")
        .expect("valid unit pattern")
});

/// Fields that identify a business for deduplication
pub trait BusinessIdentity {
    /// Provider identifier, if any
    fn place_id(&self) -> Option<&str>;
    /// Display name
    fn name(&self) -> &str;
    /// Street address
    fn address(&self) -> Option<&str>;
    /// Phone number in any format
    fn phone(&self) -> Option<&str>;
}

impl BusinessIdentity for LeadRecord {
    fn place_id(&self) -> Option<&str> {
        self.place_id.as_deref()
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }
    fn phone(&self) -> Option<&str> {
        self.phone.as_deref()
    }
}

impl BusinessIdentity for RawPlaceRecord {
    fn place_id(&self) -> Option<&str> {
        self.place_id.as_deref()
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }
    fn phone(&self) -> Option<&str> {
        self.phone.as_deref()
    }
}

/// Key under which a record is remembered
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    /// Exact provider identifier
    PlaceId(String),
    /// Hex SHA-256 of the normalized `name|address|phone` tuple
    Signature(String),
}

impl DedupKey {
    /// Exact key, when the record carries a non-blank place_id
    pub fn exact<R: BusinessIdentity + ?Sized>(record: &R) -> Option<Self> {
        record
            .place_id()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| DedupKey::PlaceId(id.to_string()))
    }

    /// Fuzzy key, always available
    pub fn fuzzy<R: BusinessIdentity + ?Sized>(record: &R) -> Self {
        DedupKey::Signature(fuzzy_signature(
            record.name(),
            record.address().unwrap_or_default(),
            record.phone().unwrap_or_default(),
        ))
    }
}

/// Result of an atomic check-and-register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    /// First sighting; both keys are now registered
    New,
    /// place_id already registered
    DuplicatePlaceId,
    /// Fuzzy signature already registered
    DuplicateSignature,
}

impl DedupOutcome {
    /// Whether the record was rejected
    pub fn is_duplicate(&self) -> bool {
        !matches!(self, DedupOutcome::New)
    }
}

#[derive(Debug, Default)]
struct SeenSets {
    place_ids: HashSet<String>,
    signatures: HashSet<String>,
}

impl SeenSets {
    fn lookup(&self, exact: Option<&DedupKey>, fuzzy: &DedupKey) -> DedupOutcome {
        if let Some(DedupKey::PlaceId(id)) = exact {
            if self.place_ids.contains(id) {
                return DedupOutcome::DuplicatePlaceId;
            }
        }
        if let DedupKey::Signature(sig) = fuzzy {
            if self.signatures.contains(sig) {
                return DedupOutcome::DuplicateSignature;
            }
        }
        DedupOutcome::New
    }

    fn insert(&mut self, exact: Option<DedupKey>, fuzzy: DedupKey) {
        for key in exact.into_iter().chain(std::iter::once(fuzzy)) {
            match key {
                DedupKey::PlaceId(id) => self.place_ids.insert(id),
                DedupKey::Signature(sig) => self.signatures.insert(sig),
            };
        }
    }
}

/// Thread-safe set of already-seen businesses.
///
/// # Example
///
/// ```
/// use lead_harvester::dedup::{DedupOutcome, Deduplicator};
/// use lead_harvester::RawPlaceRecord;
///
/// let dedup = Deduplicator::new();
/// let first = RawPlaceRecord {
///     name: "Joe's Pizza".into(),
///     phone: Some("(519) 555-0100".into()),
///     ..Default::default()
/// };
/// let second = RawPlaceRecord {
///     name: "joes pizza".into(),
///     phone: Some("519-555-0100".into()),
///     ..Default::default()
/// };
///
/// assert_eq!(dedup.check_and_register(&first), DedupOutcome::New);
/// assert_eq!(dedup.check_and_register(&second), DedupOutcome::DuplicateSignature);
/// ```
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: Mutex<SeenSets>,
}

impl Deduplicator {
    /// Create an empty deduplicator
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a deduplicator pre-seeded with existing records
    pub fn seeded<'a, R, I>(records: I) -> Self
    where
        R: BusinessIdentity + 'a,
        I: IntoIterator<Item = &'a R>,
    {
        let dedup = Self::new();
        let mut count = 0usize;
        for record in records {
            dedup.register(record);
            count += 1;
        }
        debug!(records = count, "Seeded deduplicator");
        dedup
    }

    /// Whether either key of `record` has been registered
    pub fn is_duplicate<R: BusinessIdentity + ?Sized>(&self, record: &R) -> bool {
        let exact = DedupKey::exact(record);
        let fuzzy = DedupKey::fuzzy(record);
        self.seen.lock().lookup(exact.as_ref(), &fuzzy).is_duplicate()
    }

    /// Register both keys of `record`
    pub fn register<R: BusinessIdentity + ?Sized>(&self, record: &R) {
        let exact = DedupKey::exact(record);
        let fuzzy = DedupKey::fuzzy(record);
        self.seen.lock().insert(exact, fuzzy);
    }

    /// Check and, if new, register `record` under a single lock acquisition
    pub fn check_and_register<R: BusinessIdentity + ?Sized>(&self, record: &R) -> DedupOutcome {
        let exact = DedupKey::exact(record);
        let fuzzy = DedupKey::fuzzy(record);

        let mut seen = self.seen.lock();
        let outcome = seen.lookup(exact.as_ref(), &fuzzy);
        if outcome == DedupOutcome::New {
            seen.insert(exact, fuzzy);
        }
        outcome
    }

    /// Number of distinct place_ids registered
    pub fn place_id_count(&self) -> usize {
        self.seen.lock().place_ids.len()
    }

    /// Number of distinct fuzzy signatures registered
    pub fn signature_count(&self) -> usize {
        self.seen.lock().signatures.len()
    }
}

/// Fuzzy signature of a business identity
pub fn fuzzy_signature(name: &str, address: &str, phone: &str) -> String {
    let joined = format!(
        "{}|{}|{}",
        normalize_name(name),
        normalize_address(address),
        normalize_phone(phone)
    );
    format!("{:x}", Sha256::digest(joined.as_bytes()))
}

/// Lowercase, drop trailing corporate suffixes, keep only alphanumerics
pub fn normalize_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let mut tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|t| !t.is_empty())
        .collect();
    while tokens.len() > 1 {
        let last = tokens[tokens.len() - 1].trim_matches('\'');
        if NAME_SUFFIXES.contains(&last) {
            tokens.pop();
        } else {
            break;
        }
    }
    tokens
        .concat()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Lowercase, drop unit/suite designators, keep only alphanumerics
pub fn normalize_address(address: &str) -> String {
    UNIT_TOKENS
        .replace_all(address, " ")
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Digits only, with any country-code prefix beyond ten digits dropped
pub fn normalize_phone(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().filter(char::is_ascii_digit).collect();
    let skip = digits.len().saturating_sub(10);
    digits[skip..].iter().collect()
}
