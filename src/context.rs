//! Process-wide application context
//!
//! Holds the single document store handle and the components built on it.
//! Created once at startup with [`AppContext::open`] and released with
//! [`AppContext::close`] at shutdown.

use crate::config::{DatabaseBackend, DatabaseConfig};
use crate::db::SqliteStore;
use crate::health::{self, HealthReport};
use crate::registry::ActiveProxyRegistry;
use crate::status::StatusLog;
use crate::store::{DocumentStore, MemoryStore, StoreError};
use std::sync::Arc;
use tracing::info;

pub struct AppContext {
    store: Arc<dyn DocumentStore>,
    status_log: StatusLog,
    registry: ActiveProxyRegistry,
}

impl AppContext {
    /// Acquire the configured document store
    pub fn open(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let store: Arc<dyn DocumentStore> = match config.backend {
            DatabaseBackend::Sqlite => Arc::new(SqliteStore::open(&config.path)?),
            DatabaseBackend::Memory => Arc::new(MemoryStore::new()),
        };

        info!(
            backend = store.backend_name(),
            database = %config.name,
            "Connected to document store"
        );
        Ok(Self::with_store(store))
    }

    /// Build a context around an existing store
    pub fn with_store(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            status_log: StatusLog::new(Arc::clone(&store)),
            registry: ActiveProxyRegistry::new(Arc::clone(&store)),
            store,
        }
    }

    pub fn status_log(&self) -> &StatusLog {
        &self.status_log
    }

    pub fn registry(&self) -> &ActiveProxyRegistry {
        &self.registry
    }

    pub fn health(&self) -> HealthReport {
        health::check(self.store.as_ref())
    }

    /// Release the document store. Operations issued afterwards fail with
    /// `StoreUnavailable`.
    pub fn close(&self) -> Result<(), StoreError> {
        self.store.close()?;
        info!("Closed document store connection");
        Ok(())
    }
}
