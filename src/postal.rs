//! Postal code parsing, region detection and sequencing
//!
//! A run is anchored on a start code and expands outward by stepping the
//! trailing component of the code in the region's canonical order:
//!
//! - **US**: numeric ZIP (5 digits, ZIP+4 accepted and truncated, 6-digit numeric codes kept at width)
//! - **CA**: `A1A 1A1`, odometer over the district digit, FSA letter and LDU, province letter fixed
//! - **UK**: `OUTWARD INWARD`, odometer over the inward code, outward code fixed

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, trace};

static US_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{5})(?:-\d{4})?$|^(\d{6})$").expect("valid US pattern"));
static CA_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Z]\d[A-Z]) ?(\d[A-Z]\d)$").expect("valid CA pattern")
});
static UK_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Z]{1,2}\d[A-Z\d]?) ?(\d[A-Z]{2})$").expect("valid UK pattern")
});

const DIGITS: &[u8] = b"0123456789";
/// Letters used in Canadian FSA/LDU positions (D, F, I, O, Q, U never appear)
const CA_LETTERS: &[u8] = b"ABCEGHJKLMNPRSTVWXYZ";
/// Letters used in the UK inward unit (C, I, K, M, O, V never appear)
const UK_UNIT_LETTERS: &[u8] = b"ABDEFGHJLNPQRSTUWXYZ";

/// Postal system a code belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Region {
    /// Canada
    Ca,
    /// United States (and other purely numeric codes)
    Us,
    /// United Kingdom
    Uk,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Region::Ca => "CA",
            Region::Us => "US",
            Region::Uk => "UK",
        };
        f.write_str(label)
    }
}

/// Region-tagged postal code in canonical form.
///
/// Ordering follows `(region, canonical)`, which for codes of one sequence
/// is exactly the stepping order.
///
/// # Examples
///
/// ```
/// use lead_harvester::postal::{PostalCode, Region};
///
/// let code = PostalCode::parse("n2j4z2").unwrap();
/// assert_eq!(code.region(), Region::Ca);
/// assert_eq!(code.as_str(), "N2J 4Z2");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PostalCode {
    region: Region,
    canonical: String,
}

impl PostalCode {
    /// Parse a postal code, detecting its region from the format.
    ///
    /// Input is trimmed and uppercased. Numeric codes are tried first, then
    /// Canadian, then UK patterns.
    ///
    /// # Errors
    ///
    /// Returns [`PostalCodeError::UnsupportedRegion`] when no pattern matches.
    pub fn parse(input: &str) -> Result<Self, PostalCodeError> {
        let normalized = input.trim().to_uppercase();

        if let Some(caps) = US_PATTERN.captures(&normalized) {
            let digits = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str().to_string())
                .ok_or_else(|| PostalCodeError::UnsupportedRegion(input.to_string()))?;
            return Ok(Self {
                region: Region::Us,
                canonical: digits,
            });
        }

        if let Some(caps) = CA_PATTERN.captures(&normalized) {
            return Ok(Self {
                region: Region::Ca,
                canonical: format!("{} {}", &caps[1], &caps[2]),
            });
        }

        if let Some(caps) = UK_PATTERN.captures(&normalized) {
            return Ok(Self {
                region: Region::Uk,
                canonical: format!("{} {}", &caps[1], &caps[2]),
            });
        }

        Err(PostalCodeError::UnsupportedRegion(input.to_string()))
    }

    /// Region detected from the code's format
    pub fn region(&self) -> Region {
        self.region
    }

    /// Canonical string form
    pub fn as_str(&self) -> &str {
        &self.canonical
    }
}

impl fmt::Display for PostalCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl FromStr for PostalCode {
    type Err = PostalCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Errors that can occur during postal code handling
#[derive(Debug, thiserror::Error)]
pub enum PostalCodeError {
    /// The code matches none of the supported regional formats
    #[error("unsupported postal code region: '{0}' matches no CA, US or UK format")]
    UnsupportedRegion(String),
}

/// Generate `count` postal codes starting at (and including) `start`.
///
/// The stepping strategy is chosen once from the start code's region.
/// Candidates that do not re-parse as a code of the same region are
/// skipped. The sequence ends early if the region's stepping space is
/// exhausted, so the result holds at most `count` codes, strictly
/// increasing and without duplicates.
pub fn generate(start: &PostalCode, count: usize) -> Vec<PostalCode> {
    let step: fn(&str) -> Option<String> = match start.region {
        Region::Us => next_numeric,
        Region::Ca => next_canadian,
        Region::Uk => next_uk,
    };

    let mut codes = Vec::with_capacity(count);
    if count == 0 {
        return codes;
    }
    codes.push(start.clone());

    let mut cursor = start.canonical.clone();
    let mut skipped = 0usize;
    while codes.len() < count {
        let Some(candidate) = step(&cursor) else {
            debug!(
                start = %start,
                generated = codes.len(),
                requested = count,
                "Postal code space exhausted"
            );
            break;
        };
        match PostalCode::parse(&candidate) {
            Ok(code) if code.region == start.region => codes.push(code),
            _ => {
                skipped += 1;
                trace!(candidate = %candidate, "Skipping malformed postal code");
            }
        }
        cursor = candidate;
    }

    debug!(
        start = %start,
        region = %start.region,
        generated = codes.len(),
        skipped = skipped,
        "Generated postal code sequence"
    );
    codes
}

/// Parse `start` and generate the sequence in one step.
///
/// # Errors
///
/// Returns [`PostalCodeError::UnsupportedRegion`] if `start` is not a recognised code.
pub fn generate_from(start: &str, count: usize) -> Result<Vec<PostalCode>, PostalCodeError> {
    let start = PostalCode::parse(start)?;
    Ok(generate(&start, count))
}

fn next_numeric(code: &str) -> Option<String> {
    let width = code.len();
    let value: u64 = code.parse().ok()?;
    let next = value + 1;
    if next >= 10u64.pow(width as u32) {
        return None;
    }
    Some(format!("{next:0width$}"))
}

fn next_canadian(code: &str) -> Option<String> {
    // "A1A 1A1": index 0 is the province letter, 3 is the space
    let wheels: [(usize, &[u8]); 5] = [
        (1, DIGITS),
        (2, CA_LETTERS),
        (4, DIGITS),
        (5, CA_LETTERS),
        (6, DIGITS),
    ];
    advance(code, &wheels)
}

fn next_uk(code: &str) -> Option<String> {
    let inward_start = code.len().checked_sub(3)?;
    let wheels: [(usize, &[u8]); 3] = [
        (inward_start, DIGITS),
        (inward_start + 1, UK_UNIT_LETTERS),
        (inward_start + 2, UK_UNIT_LETTERS),
    ];
    advance(code, &wheels)
}

/// Odometer step over the given byte positions, rightmost wheel fastest.
fn advance(code: &str, wheels: &[(usize, &[u8])]) -> Option<String> {
    let mut bytes = code.as_bytes().to_vec();
    for &(idx, alphabet) in wheels.iter().rev() {
        let current = *bytes.get(idx)?;
        if let Some(&next) = alphabet.iter().find(|&&c| c > current) {
            bytes[idx] = next;
            return String::from_utf8(bytes).ok();
        }
        bytes[idx] = alphabet[0];
    }
    None
}
