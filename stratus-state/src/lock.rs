//! Advisory lock held while an apply writes the state file

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Locks older than this are considered abandoned (15 minutes)
pub const DEFAULT_LOCK_TIMEOUT_SECS: i64 = 900;

/// Lock record persisted next to the state file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub id: String,
    /// Command holding the lock (e.g., "apply")
    pub operation: String,
    /// user@hostname of the holder
    pub who: String,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
}

impl LockInfo {
    pub fn new(operation: impl Into<String>) -> Self {
        Self::with_timeout(operation, DEFAULT_LOCK_TIMEOUT_SECS)
    }

    pub fn with_timeout(operation: impl Into<String>, timeout_secs: i64) -> Self {
        let created = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation: operation.into(),
            who: lock_owner(),
            created,
            expires: created + Duration::seconds(timeout_secs),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires
    }

    pub fn time_remaining(&self) -> Duration {
        self.expires - Utc::now()
    }
}

impl fmt::Display for LockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} by {} since {})",
            self.id,
            self.operation,
            self.who,
            self.created.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }
}

fn lock_owner() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    format!("{}@{}", user, host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_lock_expires_after_default_timeout() {
        let lock = LockInfo::new("apply");
        assert_eq!(lock.operation, "apply");
        assert!(lock.who.contains('@'));
        assert_eq!(
            (lock.expires - lock.created).num_seconds(),
            DEFAULT_LOCK_TIMEOUT_SECS
        );
        assert!(!lock.is_expired());
    }

    #[test]
    fn negative_timeout_is_already_expired() {
        let lock = LockInfo::with_timeout("apply", -1);
        assert!(lock.is_expired());
        assert!(lock.time_remaining().num_seconds() <= 0);
    }

    #[test]
    fn display_names_holder_and_operation() {
        let lock = LockInfo::new("apply");
        let shown = lock.to_string();
        assert!(shown.starts_with(&lock.id));
        assert!(shown.contains("apply by"));
    }

    #[test]
    fn lock_survives_json() {
        let lock = LockInfo::with_timeout("apply", 60);
        let json = serde_json::to_string(&lock).unwrap();
        let back: LockInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, lock);
    }
}
