//! Health probe for the backing store
//!
//! Unlike every other operation, a store failure here is reported as an
//! `unhealthy` payload instead of an error.

use crate::store::DocumentStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseState {
    Connected,
    Disconnected,
}

/// Health payload returned by `GET /api/health`
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthState,
    pub database: DatabaseState,
    /// Store backend in use
    pub backend: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}

/// Ping the store and describe the outcome. Never fails.
pub fn check(store: &dyn DocumentStore) -> HealthReport {
    match store.ping() {
        Ok(()) => HealthReport {
            status: HealthState::Healthy,
            database: DatabaseState::Connected,
            backend: store.backend_name(),
            error: None,
            timestamp: Utc::now(),
        },
        Err(e) => {
            warn!(backend = store.backend_name(), error = %e, "Health check failed");
            HealthReport {
                status: HealthState::Unhealthy,
                database: DatabaseState::Disconnected,
                backend: store.backend_name(),
                error: Some(e.to_string()),
                timestamp: Utc::now(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_healthy_store() {
        let store = MemoryStore::new();
        let report = check(&store);

        assert!(report.is_healthy());
        assert_eq!(report.database, DatabaseState::Connected);
        assert!(report.error.is_none());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["database"], "connected");
        assert_eq!(json["backend"], "memory");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_closed_store_degrades_to_unhealthy() {
        let store = MemoryStore::new();
        store.close().unwrap();

        let report = check(&store);
        assert!(!report.is_healthy());
        assert_eq!(report.database, DatabaseState::Disconnected);
        assert_eq!(report.error.as_deref(), Some("Store is closed"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "unhealthy");
        assert!(json["timestamp"].is_string());
    }
}
