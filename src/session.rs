use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// Default session lifetime: 24 hours in seconds
pub const SESSION_DURATION: u64 = 24 * 60 * 60;

/// Per-session key/value storage
///
/// Values are small JSON documents (a list of timestamps, a flag) that
/// survive across requests until the session expires. Expiry is the
/// store's business; callers only see a missing value.
pub trait SessionStore {
    /// Read the value stored under `key` for `session_id`.
    fn get(&self, session_id: &str, key: &str) -> Option<JsonValue>;

    /// Store `value` under `key` for `session_id`, creating the session entry
    /// if it does not exist yet.
    fn set(&self, session_id: &str, key: &str, value: JsonValue);

    /// Drop the value stored under `key`.
    fn remove(&self, session_id: &str, key: &str);
}

/// One visitor's session data
#[derive(Debug, Clone)]
struct Session {
    values: HashMap<String, JsonValue>,
    expires_at: SystemTime,
}

/// In-process session store keyed by uuid session ids
///
/// Sessions live in a `RwLock`ed map. Every access checks the expiry time,
/// so an expired session behaves exactly like an unknown one.
#[derive(Debug)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(SESSION_DURATION))
    }
}

impl MemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Create a new, empty session
    ///
    /// # Returns
    /// * `String` - A unique session ID
    pub fn create_session(&self) -> String {
        let session_id = Uuid::new_v4().to_string();
        let session = Session {
            values: HashMap::new(),
            expires_at: SystemTime::now() + self.ttl,
        };

        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.insert(session_id.clone(), session);

        session_id
    }

    /// Checks if a session exists and is not expired.
    pub fn validate_session(&self, session_id: &str) -> bool {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);

        sessions
            .get(session_id)
            .is_some_and(|session| session.expires_at > SystemTime::now())
    }

    /// Remove every expired session. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = SystemTime::now();
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|_, session| session.expires_at > now);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, session_id: &str, key: &str) -> Option<JsonValue> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        let session = sessions.get(session_id)?;

        if session.expires_at <= SystemTime::now() {
            return None;
        }
        session.values.get(key).cloned()
    }

    fn set(&self, session_id: &str, key: &str, value: JsonValue) {
        let now = SystemTime::now();
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session {
                values: HashMap::new(),
                expires_at: now + self.ttl,
            });

        // An expired entry starts over rather than resurrecting old values
        if session.expires_at <= now {
            session.values.clear();
            session.expires_at = now + self.ttl;
        }
        session.values.insert(key.to_string(), value);
    }

    fn remove(&self, session_id: &str, key: &str) {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(session) = sessions.get_mut(session_id) {
            session.values.remove(key);
        }
    }
}
