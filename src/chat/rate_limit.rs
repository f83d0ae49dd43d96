use duckdb::Connection;
use tracing::{debug, warn};

use crate::config::ChatConfig;
use crate::db::preferences::{self, PreferenceStore};
use crate::db::StoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitState {
    pub last_attempt_epoch_secs: i64,
    pub consecutive_tries: u32,
}

/// Sliding-window limit on send attempts, persisted in the preference store.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiter {
    window_secs: i64,
    max_tries: u32,
}

impl RateLimiter {
    pub fn new(window_secs: i64, max_tries: u32) -> Self {
        Self { window_secs, max_tries }
    }

    pub fn from_config(config: &ChatConfig) -> Self {
        Self::new(config.rate_limit_window_secs, config.rate_limit_tries)
    }

    /// Decides one attempt at `now`. Returns whether it is allowed and, when
    /// the counters change, the state to persist. Denials leave the state as is.
    pub fn evaluate(&self, state: Option<RateLimitState>, now: i64) -> (bool, Option<RateLimitState>) {
        let first = RateLimitState { last_attempt_epoch_secs: now, consecutive_tries: 1 };

        let Some(state) = state.filter(|s| s.consecutive_tries > 0) else {
            return (true, Some(first));
        };

        if now.saturating_sub(state.last_attempt_epoch_secs) >= self.window_secs {
            return (true, Some(first));
        }

        if state.consecutive_tries <= self.max_tries {
            let next = RateLimitState {
                last_attempt_epoch_secs: now,
                consecutive_tries: state.consecutive_tries + 1,
            };
            (true, Some(next))
        } else {
            (false, None)
        }
    }

    pub fn load(conn: &Connection) -> StoreResult<Option<RateLimitState>> {
        let last = PreferenceStore::get_i64(conn, preferences::LAST_TRY)?;
        let tries = PreferenceStore::get_i64(conn, preferences::TRIES)?;
        Ok(last.map(|last_attempt_epoch_secs| RateLimitState {
            last_attempt_epoch_secs,
            consecutive_tries: tries.unwrap_or(0).clamp(0, u32::MAX as i64) as u32,
        }))
    }

    pub fn store(conn: &Connection, state: RateLimitState) -> StoreResult<()> {
        PreferenceStore::set_i64(conn, preferences::LAST_TRY, state.last_attempt_epoch_secs)?;
        PreferenceStore::set_i64(conn, preferences::TRIES, state.consecutive_tries as i64)
    }

    /// Reads the persisted counters, decides the attempt and records the result.
    pub fn check_and_record(&self, conn: &Connection, now: i64) -> StoreResult<bool> {
        let state = Self::load(conn)?;
        let (allowed, next) = self.evaluate(state, now);
        if let Some(next) = next {
            Self::store(conn, next)?;
        }

        if allowed {
            debug!(tries = next.map(|s| s.consecutive_tries), "send attempt allowed");
        } else {
            warn!(window_secs = self.window_secs, "send attempt locally rate limited");
        }
        Ok(allowed)
    }
}
