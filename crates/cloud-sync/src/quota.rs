//! Upload Quota

use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Mutex;

/// Daily message budget that resets when the UTC date changes
#[derive(Debug)]
pub struct UploadQuota {
    limit: u32,
    state: Mutex<QuotaState>,
}

#[derive(Debug)]
struct QuotaState {
    day: NaiveDate,
    used: u32,
}

impl UploadQuota {
    pub fn new(limit: u32, now: DateTime<Utc>) -> Self {
        Self {
            limit,
            state: Mutex::new(QuotaState {
                day: now.date_naive(),
                used: 0,
            }),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Take one message from today's budget. Returns false when exhausted.
    pub fn try_take(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        roll_over(&mut state, now);
        if state.used >= self.limit {
            return false;
        }
        state.used += 1;
        true
    }

    /// Count a message that bypassed the budget
    pub fn charge(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        roll_over(&mut state, now);
        state.used = state.used.saturating_add(1);
    }

    pub fn used(&self, now: DateTime<Utc>) -> u32 {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        roll_over(&mut state, now);
        state.used
    }

    pub fn reset(&self) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).used = 0;
    }
}

fn roll_over(state: &mut QuotaState, now: DateTime<Utc>) {
    let today = now.date_naive();
    if today != state.day {
        state.day = today;
        state.used = 0;
    }
}
