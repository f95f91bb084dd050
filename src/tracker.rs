use crate::session::SessionStore;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

/// Downloads allowed per window unless configured otherwise
pub const DEFAULT_LIMIT: usize = 50;

/// Length of the tracked window in seconds
pub const DEFAULT_WINDOW_SECS: i64 = 60;

/// Suffix of the session key holding the account flag
const FLAG_SUFFIX: &str = "_flagged";

/// Where a session stands with respect to one tracked resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    UnderLimit,
    OverLimit,
    /// Terminal: only a manual reset of the session data clears it.
    Flagged,
}

/// Stored data for one (session, resource) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitState {
    pub resource: String,
    /// Unix seconds, oldest first.
    pub timestamps: Vec<i64>,
    pub limit: usize,
    pub window_secs: i64,
    pub flagged: bool,
}

/// Sliding-window download counter for one session
///
/// Each recorded download is a unix timestamp kept in the session store
/// under the resource name; the account flag lives next to it under
/// `<resource>_flagged`. Old timestamps are only dropped when
/// [`evict_expired`](Self::evict_expired) runs, so callers evict first and
/// then ask [`under_limit`](Self::under_limit).
pub struct DownloadTracker<'a, S: SessionStore + ?Sized> {
    store: &'a S,
    session_id: String,
    resource: String,
    limit: usize,
    window_secs: i64,
}

impl<'a, S: SessionStore + ?Sized> DownloadTracker<'a, S> {
    /// Attach a tracker to `session_id`, initialising its session entries
    /// when they are missing or malformed.
    pub fn new(store: &'a S, session_id: impl Into<String>, resource: impl Into<String>) -> Self {
        let tracker = Self {
            store,
            session_id: session_id.into(),
            resource: resource.into(),
            limit: DEFAULT_LIMIT,
            window_secs: DEFAULT_WINDOW_SECS,
        };

        let valid_list = matches!(
            tracker.store.get(&tracker.session_id, &tracker.resource),
            Some(JsonValue::Array(_))
        );
        if !valid_list {
            tracker.save_timestamps(&[]);
        }
        if tracker.store.get(&tracker.session_id, &tracker.flag_key()).is_none() {
            tracker
                .store
                .set(&tracker.session_id, &tracker.flag_key(), JsonValue::Bool(false));
        }

        tracker
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_window(mut self, window_secs: i64) -> Self {
        self.window_secs = window_secs;
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn window_secs(&self) -> i64 {
        self.window_secs
    }

    /// Drop every timestamp more than `window_secs` older than `now`.
    pub fn evict_expired(&self, now: DateTime<Utc>) {
        let now = now.timestamp();
        let mut timestamps = self.timestamps();
        let before = timestamps.len();

        timestamps.retain(|t| now - t <= self.window_secs);

        if timestamps.len() != before {
            log::debug!(
                "evicted {} expired {} entries for session {}",
                before - timestamps.len(),
                self.resource,
                self.session_id
            );
            self.save_timestamps(&timestamps);
        }
    }

    /// [`evict_expired`](Self::evict_expired) at the current time.
    pub fn clear_old(&self) {
        self.evict_expired(Utc::now());
    }

    /// True while fewer than `limit` events are recorded. Does not evict.
    pub fn under_limit(&self) -> bool {
        self.recorded_count() < self.limit
    }

    /// Append `now` to the recorded events. The limit is not checked here.
    pub fn record_event(&self, now: DateTime<Utc>) {
        let mut timestamps = self.timestamps();
        timestamps.push(now.timestamp());
        self.save_timestamps(&timestamps);
    }

    /// [`record_event`](Self::record_event) at the current time.
    pub fn record_new(&self) {
        self.record_event(Utc::now());
    }

    pub fn flag_account(&self) {
        self.store
            .set(&self.session_id, &self.flag_key(), JsonValue::Bool(true));
    }

    pub fn is_flagged(&self) -> bool {
        match self.store.get(&self.session_id, &self.flag_key()) {
            Some(JsonValue::Bool(flag)) => flag,
            Some(JsonValue::Number(n)) => n.as_i64() != Some(0),
            _ => false,
        }
    }

    pub fn recorded_count(&self) -> usize {
        self.timestamps().len()
    }

    pub fn state(&self) -> TrackerState {
        if self.is_flagged() {
            TrackerState::Flagged
        } else if self.under_limit() {
            TrackerState::UnderLimit
        } else {
            TrackerState::OverLimit
        }
    }

    pub fn snapshot(&self) -> RateLimitState {
        RateLimitState {
            resource: self.resource.clone(),
            timestamps: self.timestamps(),
            limit: self.limit,
            window_secs: self.window_secs,
            flagged: self.is_flagged(),
        }
    }

    /// Decide whether one more download may go ahead at `now`.
    ///
    /// Evicts stale entries, refuses flagged accounts, flags and refuses a
    /// session that has used up its window, and otherwise records the
    /// download and allows it.
    pub fn may_download(&self, now: DateTime<Utc>) -> bool {
        self.evict_expired(now);

        if self.is_flagged() {
            log::warn!("download refused for flagged session {}", self.session_id);
            return false;
        }

        if !self.under_limit() {
            log::warn!(
                "session {} exceeded {} {} per {}s, flagging account",
                self.session_id,
                self.limit,
                self.resource,
                self.window_secs
            );
            self.flag_account();
            return false;
        }

        self.record_event(now);
        true
    }

    fn flag_key(&self) -> String {
        format!("{}{}", self.resource, FLAG_SUFFIX)
    }

    fn timestamps(&self) -> Vec<i64> {
        self.store
            .get(&self.session_id, &self.resource)
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default()
    }

    fn save_timestamps(&self, timestamps: &[i64]) {
        let value = JsonValue::from(timestamps.to_vec());
        self.store.set(&self.session_id, &self.resource, value);
    }
}
