//! Periodic progress lines for long-running harvests.
//!
//! Decides when a `[PROGRESS]` log line is due (every update interval or
//! every percentage step, whichever comes first) and formats it from an
//! [`IngestionState`] snapshot.

use crate::harvest::state::IngestionState;
use std::time::{Duration, Instant};

const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_PERCENTAGE_STEP: f64 = 10.0;

/// Emission cadence for progress lines.
#[derive(Debug, Clone)]
pub struct ProgressState {
    /// Last time progress was reported.
    pub last_update: Instant,
    /// Minimum interval between time-based updates.
    pub update_interval: Duration,
    /// Last reported completion percentage.
    pub last_reported_percentage: f64,
    /// Minimum percentage delta required to emit a new update.
    pub min_percentage_step: f64,
}

impl ProgressState {
    /// Create a tracker with custom interval and percentage step.
    pub fn new(update_interval: Duration, min_percentage_step: f64) -> Self {
        Self {
            last_update: Instant::now(),
            update_interval,
            last_reported_percentage: 0.0,
            min_percentage_step,
        }
    }

    /// Whether a progress update should be emitted for `state`.
    pub fn should_emit_update(&self, state: &IngestionState) -> bool {
        if state.postal_codes_processed == 0 {
            return false;
        }
        if state.percent_complete() - self.last_reported_percentage >= self.min_percentage_step {
            return true;
        }
        self.last_update.elapsed() >= self.update_interval
    }

    /// Call after emitting a progress log to reset timers and cached percentage.
    pub fn mark_emitted(&mut self, state: &IngestionState) {
        self.last_update = Instant::now();
        self.last_reported_percentage = state.percent_complete();
    }
}

impl Default for ProgressState {
    fn default() -> Self {
        Self::new(DEFAULT_UPDATE_INTERVAL, DEFAULT_PERCENTAGE_STEP)
    }
}

/// Human-readable progress string for logging.
pub fn format_progress(state: &IngestionState) -> String {
    let mut parts = vec![format!(
        "[PROGRESS] Processed {}/{} postal codes - {:.1}% complete",
        state.postal_codes_processed,
        state.postal_codes_total,
        state.percent_complete()
    )];

    if let Some(code) = &state.current_postal_code {
        parts.push(format!("({code})"));
    }

    parts.push(format!(
        "- {} kept, {} duplicate, {} rejected",
        state.records_kept, state.records_duplicate, state.records_rejected
    ));

    if let Some(remaining) = estimate_remaining(state) {
        parts.push(format!("- ~{} remaining", format_duration(remaining)));
    }

    parts.join(" ")
}

fn estimate_remaining(state: &IngestionState) -> Option<Duration> {
    let done = state.postal_codes_processed;
    if done == 0 || done >= state.postal_codes_total {
        return None;
    }
    let per_code = state.elapsed.as_secs_f64() / done as f64;
    let remaining = (state.postal_codes_total - done) as f64 * per_code;
    Some(Duration::from_secs_f64(remaining))
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}
