//! Record validation and normalization
//!
//! Turns a [`RawPlaceRecord`] into a [`LeadRecord`] or rejects it. A record
//! is rejected when it has no name, when it offers no way to contact the
//! business (address, phone and website all empty), or when its name looks
//! like a placeholder/test listing.

use crate::harvest::task::SearchTask;
use crate::{LeadRecord, RawPlaceRecord};
use chrono::{SubsecRound, Utc};
use regex::RegexSet;
use std::fmt;

/// Name patterns that mark placeholder or test listings
pub const DEFAULT_PLACEHOLDER_PATTERNS: &[&str] = &[
    r"(?i)\btest\b",
    r"(?i)\bexample\b",
    r"(?i)\bplaceholder\b",
    r"(?i)\bdummy\b",
    r"(?i)\blorem ipsum\b",
];

const FALLBACK_PRIMARY_TYPE: &str = "establishment";

/// Why a raw record was not accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Name empty or whitespace
    MissingName,
    /// Address and website empty, and no dialable phone number
    NoContactPath,
    /// Name matched a placeholder pattern
    PlaceholderName,
}

impl Rejection {
    /// Short label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::MissingName => "missing_name",
            Rejection::NoContactPath => "no_contact_path",
            Rejection::PlaceholderName => "placeholder_name",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validates raw provider records against completeness rules.
#[derive(Debug, Clone)]
pub struct RecordValidator {
    placeholders: RegexSet,
}

impl RecordValidator {
    /// Create a validator with [`DEFAULT_PLACEHOLDER_PATTERNS`]
    pub fn new() -> Self {
        Self {
            placeholders: RegexSet::new(DEFAULT_PLACEHOLDER_PATTERNS)
                .expect("default placeholder patterns are valid"),
        }
    }

    /// Create a validator with a custom placeholder pattern list
    ///
    /// # Errors
    /// Returns an error if any pattern is not a valid regular expression.
    pub fn with_placeholder_patterns<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            placeholders: RegexSet::new(patterns)?,
        })
    }

    /// Check a raw record without building a lead
    pub fn check(&self, raw: &RawPlaceRecord) -> Result<(), Rejection> {
        let name = raw.name.trim();
        if name.is_empty() {
            return Err(Rejection::MissingName);
        }

        let has_contact = non_blank(&raw.address).is_some()
            || non_blank(&raw.website).is_some()
            || non_blank(&raw.phone).and_then(canonical_phone).is_some();
        if !has_contact {
            return Err(Rejection::NoContactPath);
        }

        if self.placeholders.is_match(name) {
            return Err(Rejection::PlaceholderName);
        }

        Ok(())
    }

    /// Validate and normalize a raw record into a lead.
    ///
    /// Returns `None` when the record is rejected.
    pub fn validate(&self, raw: RawPlaceRecord, task: &SearchTask) -> Option<LeadRecord> {
        self.validate_with_reason(raw, task).ok()
    }

    /// Like [`Self::validate`], but reports why a record was rejected
    pub fn validate_with_reason(
        &self,
        raw: RawPlaceRecord,
        task: &SearchTask,
    ) -> Result<LeadRecord, Rejection> {
        self.check(&raw)?;
        Ok(self.normalize(raw, task))
    }

    fn normalize(&self, raw: RawPlaceRecord, task: &SearchTask) -> LeadRecord {
        let address = non_blank(&raw.address)
            .map(|a| a.split_whitespace().collect::<Vec<_>>().join(" "));
        let phone = non_blank(&raw.phone).and_then(canonical_phone);
        let website = non_blank(&raw.website).map(str::to_string);
        let business_status = non_blank(&raw.status).map(str::to_uppercase);
        let primary_type = raw
            .categories
            .first()
            .cloned()
            .unwrap_or_else(|| FALLBACK_PRIMARY_TYPE.to_string());

        LeadRecord {
            name: raw.name.trim().to_string(),
            address,
            phone,
            website,
            rating: raw.rating,
            review_count: raw.review_count,
            business_status,
            primary_type,
            all_types: raw.categories,
            opening_hours: raw.hours,
            latitude: raw.coordinates.map(|c| c.latitude),
            longitude: raw.coordinates.map(|c| c.longitude),
            place_id: non_blank(&raw.place_id).map(str::to_string),
            search_query: task.query().to_string(),
            search_location: task.postal_code().to_string(),
            scraped_at: Utc::now().trunc_subsecs(0),
        }
    }
}

impl Default for RecordValidator {
    fn default() -> Self {
        Self::new()
    }
}

fn non_blank(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Canonical display form of a phone number.
///
/// North American numbers (10 digits, or 11 with a leading country code 1)
/// become `+1 NPA-NXX-XXXX`. Other numbers keep their digits, with a leading
/// `+` if the input had one. Returns `None` when the input has no digits.
///
/// ```
/// use lead_harvester::validator::canonical_phone;
///
/// assert_eq!(canonical_phone("(519) 555-0100").as_deref(), Some("+1 519-555-0100"));
/// assert_eq!(canonical_phone("+44 20 7946 0958").as_deref(), Some("+442079460958"));
/// ```
pub fn canonical_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let international = trimmed.starts_with('+');
    let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }

    let national = match digits.len() {
        10 if !international => Some(digits.as_str()),
        11 if digits.starts_with('1') => Some(&digits[1..]),
        _ => None,
    };

    Some(match national {
        Some(n) => format!("+1 {}-{}-{}", &n[..3], &n[3..6], &n[6..]),
        None if international => format!("+{digits}"),
        None => digits,
    })
}
