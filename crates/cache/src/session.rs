use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: u64,
    pub user_request: String,
    pub agent: String,
    pub response: String,
    #[serde(default)]
    pub escalations: Vec<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub state: BTreeMap<String, Value>,
    pub created_at: u64,
    pub last_activity: u64,
}

/// Conversation sessions keyed by a monotonically unique ID. Sessions live
/// from `create` until explicit deletion or inactivity cleanup.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Session>>,
    counter: AtomicU64,
}

impl SessionManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            counter: AtomicU64::new(0),
        }
    }

    pub fn create(&self, user_id: &str) -> Session {
        let seq = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let now = unix_ms();
        let session = Session {
            id: format!("session-{seq}"),
            user_id: user_id.to_string(),
            history: Vec::new(),
            metadata: BTreeMap::new(),
            state: BTreeMap::new(),
            created_at: now,
            last_activity: now,
        };
        self.write().insert(session.id.clone(), session.clone());
        log::debug!("created session {} for user {user_id}", session.id);
        session
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Session> {
        self.read().get(id).cloned()
    }

    pub fn delete(&self, id: &str) -> bool {
        self.write().remove(id).is_some()
    }

    pub fn add_history_entry(&self, id: &str, entry: HistoryEntry) -> Result<()> {
        let mut sessions = self.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| CacheError::SessionNotFound(id.to_string()))?;
        session.history.push(entry);
        session.last_activity = unix_ms();
        Ok(())
    }

    /// Last `limit` history entries; the whole history when `limit <= 0`.
    pub fn history(&self, id: &str, limit: i64) -> Result<Vec<HistoryEntry>> {
        let sessions = self.read();
        let session = sessions
            .get(id)
            .ok_or_else(|| CacheError::SessionNotFound(id.to_string()))?;
        if limit <= 0 {
            return Ok(session.history.clone());
        }
        let keep = limit as usize;
        let start = session.history.len().saturating_sub(keep);
        Ok(session.history[start..].to_vec())
    }

    pub fn set_state(&self, id: &str, key: &str, value: Value) -> Result<()> {
        let mut sessions = self.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| CacheError::SessionNotFound(id.to_string()))?;
        session.state.insert(key.to_string(), value);
        session.last_activity = unix_ms();
        Ok(())
    }

    pub fn state(&self, id: &str, key: &str) -> Result<Option<Value>> {
        let sessions = self.read();
        let session = sessions
            .get(id)
            .ok_or_else(|| CacheError::SessionNotFound(id.to_string()))?;
        Ok(session.state.get(key).cloned())
    }

    /// Delete sessions idle longer than `max_inactivity`; returns how many
    /// were removed.
    pub fn cleanup_inactive(&self, max_inactivity: Duration) -> usize {
        let cutoff = unix_ms().saturating_sub(max_inactivity.as_millis() as u64);
        let mut sessions = self.write();
        let before = sessions.len();
        sessions.retain(|_, session| session.last_activity >= cutoff);
        let removed = before - sessions.len();
        if removed > 0 {
            log::info!("cleaned up {removed} inactive sessions");
        }
        removed
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<Session> {
        self.read().values().cloned().collect()
    }

    /// Reinstall persisted sessions, keeping the ID counter ahead of any
    /// restored numeric suffix so new IDs stay unique.
    pub fn restore(&self, sessions: Vec<Session>) {
        let mut map = self.write();
        for session in sessions {
            if let Some(seq) = session
                .id
                .strip_prefix("session-")
                .and_then(|raw| raw.parse::<u64>().ok())
            {
                self.counter.fetch_max(seq, Ordering::SeqCst);
            }
            map.insert(session.id.clone(), session);
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Session>> {
        self.sessions
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Session>> {
        self.sessions
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(request: &str) -> HistoryEntry {
        HistoryEntry {
            timestamp: 1,
            user_request: request.to_string(),
            agent: "general".to_string(),
            response: "ok".to_string(),
            escalations: Vec::new(),
            duration_ms: 5,
        }
    }

    #[test]
    fn ids_are_monotonically_unique() {
        let manager = SessionManager::new();
        let a = manager.create("u1");
        let b = manager.create("u1");
        assert_ne!(a.id, b.id);
        assert_eq!(a.id, "session-1");
        assert_eq!(b.id, "session-2");
    }

    #[test]
    fn history_limit_returns_tail() {
        let manager = SessionManager::new();
        let session = manager.create("u1");
        for i in 0..5 {
            manager
                .add_history_entry(&session.id, entry(&format!("req-{i}")))
                .unwrap();
        }

        let tail = manager.history(&session.id, 2).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].user_request, "req-3");
        assert_eq!(tail[1].user_request, "req-4");

        let all = manager.history(&session.id, 0).unwrap();
        assert_eq!(all.len(), 5);
        let all = manager.history(&session.id, -1).unwrap();
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn history_bumps_last_activity() {
        let manager = SessionManager::new();
        let session = manager.create("u1");
        std::thread::sleep(Duration::from_millis(5));
        manager.add_history_entry(&session.id, entry("r")).unwrap();
        let updated = manager.get(&session.id).unwrap();
        assert!(updated.last_activity > session.last_activity);
    }

    #[test]
    fn inactive_sessions_are_cleaned_up() {
        let manager = SessionManager::new();
        let stale = manager.create("u1");
        std::thread::sleep(Duration::from_millis(20));
        let fresh = manager.create("u2");

        let removed = manager.cleanup_inactive(Duration::from_millis(10));
        assert_eq!(removed, 1);
        assert!(manager.get(&stale.id).is_none());
        assert!(manager.get(&fresh.id).is_some());
    }

    #[test]
    fn state_round_trips_per_session() {
        let manager = SessionManager::new();
        let session = manager.create("u1");
        manager
            .set_state(&session.id, "cursor", json!({"file": "lib.rs"}))
            .unwrap();
        assert_eq!(
            manager.state(&session.id, "cursor").unwrap(),
            Some(json!({"file": "lib.rs"}))
        );
        assert_eq!(manager.state(&session.id, "missing").unwrap(), None);
    }

    #[test]
    fn missing_sessions_error() {
        let manager = SessionManager::new();
        assert!(matches!(
            manager.history("session-404", 1).unwrap_err(),
            CacheError::SessionNotFound(_)
        ));
        assert!(manager.add_history_entry("session-404", entry("r")).is_err());
    }

    #[test]
    fn restore_advances_the_id_counter() {
        let manager = SessionManager::new();
        let mut session = manager.create("u1");
        session.id = "session-41".to_string();
        manager.restore(vec![session]);

        let next = manager.create("u2");
        assert_eq!(next.id, "session-42");
    }
}
