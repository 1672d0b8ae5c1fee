//! When plans are due, and the per-plan window bookkeeping that keeps a
//! plan from being enqueued twice for the same window.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};

use vigil_plan::Frequency;

/// `last_run + every * unit`, or `now` for a plan that has never run.
pub fn next_due(
    frequency: &Frequency,
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    match last_run {
        Some(last) => last + frequency.period(),
        None => now,
    }
}

/// Start of the window containing `now`. Windows are aligned to the Unix
/// epoch, so every scheduler instance agrees on them.
pub fn window_start(frequency: &Frequency, now: DateTime<Utc>) -> DateTime<Utc> {
    let period = frequency.period().num_seconds().max(1);
    let secs = now.timestamp();
    let start = secs - secs.rem_euclid(period);
    Utc.timestamp_opt(start, 0).single().unwrap_or(now)
}

/// Per-plan record of the last window a job was enqueued for.
#[derive(Debug, Default)]
pub struct ScheduleBook {
    windows: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl ScheduleBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the window containing `now` for `plan_id`.
    ///
    /// Returns the window start when the plan is due and the window was not
    /// yet claimed. Check and record happen under one lock.
    pub fn claim(
        &self,
        plan_id: &str,
        frequency: &Frequency,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let window = window_start(frequency, now);
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let last = windows.get(plan_id).copied();
        if now < next_due(frequency, last, now) {
            return None;
        }
        if last == Some(window) {
            return None;
        }
        windows.insert(plan_id.to_string(), window);
        Some(window)
    }

    /// Seed the record, e.g. from the last run a repository knows about.
    pub fn remember(&self, plan_id: &str, window: DateTime<Utc>) {
        self.windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(plan_id.to_string(), window);
    }

    /// Give back `window` after its job could not be enqueued, so a later
    /// tick claims it again.
    pub fn release(&self, plan_id: &str, window: DateTime<Utc>) {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if windows.get(plan_id) == Some(&window) {
            windows.remove(plan_id);
        }
    }

    /// Drop the record for a removed plan.
    pub fn forget(&self, plan_id: &str) {
        self.windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(plan_id);
    }

    pub fn last_window(&self, plan_id: &str) -> Option<DateTime<Utc>> {
        self.windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(plan_id)
            .copied()
    }
}
