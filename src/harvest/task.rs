//! Search tasks and the per-code / per-run state machines

use crate::postal::{PostalCode, Region};
use serde::Serialize;
use std::fmt;

/// Placeholder substituted with the postal code in a query template
pub const TEMPLATE_PLACEHOLDER: &str = "{}";

/// One search issued for one postal code. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTask {
    query_template: String,
    postal_code: PostalCode,
    query: String,
}

impl SearchTask {
    /// Build a task by substituting `postal_code` into the template's first `{}`
    pub fn new(query_template: impl Into<String>, postal_code: PostalCode) -> Self {
        let query_template = query_template.into();
        let query = query_template.replacen(TEMPLATE_PLACEHOLDER, postal_code.as_str(), 1);
        Self {
            query_template,
            postal_code,
            query,
        }
    }

    /// Template the query was built from
    pub fn query_template(&self) -> &str {
        &self.query_template
    }

    /// Postal code the search is anchored on
    pub fn postal_code(&self) -> &PostalCode {
        &self.postal_code
    }

    /// Region of the postal code
    pub fn region(&self) -> Region {
        self.postal_code.region()
    }

    /// Final query text sent to the provider
    pub fn query(&self) -> &str {
        &self.query
    }
}

/// Processing stage of a single postal code.
///
/// `Pending -> Searching -> (Extracting -> Validating -> Deduping)* -> Stored -> Done`,
/// with `Failed` reachable from any non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeStatus {
    /// Not started
    Pending,
    /// Search call in flight
    Searching,
    /// Fetching details for one result
    Extracting,
    /// Applying completeness rules
    Validating,
    /// Checking against seen businesses
    Deduping,
    /// All accepted records handed to the store
    Stored,
    /// Finished
    Done,
    /// Unrecoverable provider error for this code
    Failed,
}

impl CodeStatus {
    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, CodeStatus::Done | CodeStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: CodeStatus) -> bool {
        use CodeStatus::*;
        match (self, next) {
            (s, Failed) => !s.is_terminal(),
            (Pending, Searching) => true,
            (Searching, Extracting | Validating | Stored) => true,
            (Extracting, Validating) => true,
            (Validating, Deduping | Extracting | Validating | Stored) => true,
            (Deduping, Extracting | Validating | Stored) => true,
            (Stored, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for CodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CodeStatus::Pending => "PENDING",
            CodeStatus::Searching => "SEARCHING",
            CodeStatus::Extracting => "EXTRACTING",
            CodeStatus::Validating => "VALIDATING",
            CodeStatus::Deduping => "DEDUPING",
            CodeStatus::Stored => "STORED",
            CodeStatus::Done => "DONE",
            CodeStatus::Failed => "FAILED",
        };
        f.write_str(label)
    }
}

/// Top-level state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Processing postal codes
    Running,
    /// Every postal code was attempted
    Completed,
    /// Cancelled by the operator; data flushed
    Stopped,
    /// Aborted by a run-fatal error
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Stopped => "STOPPED",
            RunStatus::Failed => "FAILED",
        };
        f.write_str(label)
    }
}
