//! Append-only log of client liveness pings

use crate::error::{string_field, ServiceError};
use crate::store::{DocumentStore, Filter};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

/// Collection holding status checks
pub const STATUS_COLLECTION: &str = "status_checks";

/// Default cap on listed status checks
pub const DEFAULT_LIST_LIMIT: usize = 1000;

/// A stored liveness ping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusCheck {
    pub id: String,
    pub client_name: String,
    pub timestamp: DateTime<Utc>,
}

/// Request to record a status check. The name is kept untyped until
/// [`StatusLog::record`] checks it, so a wrong type is reported on the field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewStatusCheck {
    #[serde(default)]
    pub client_name: Option<Value>,
}

impl NewStatusCheck {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: Some(Value::String(client_name.into())),
        }
    }
}

pub struct StatusLog {
    store: Arc<dyn DocumentStore>,
}

impl StatusLog {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Validate and append a status check, returning the stored value
    pub fn record(&self, request: &NewStatusCheck) -> Result<StatusCheck, ServiceError> {
        let client_name = match string_field("client_name", request.client_name.as_ref())? {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            Some(_) => return Err(ServiceError::validation("client_name", "must not be empty")),
            None => return Err(ServiceError::validation("client_name", "is required")),
        };

        let check = StatusCheck {
            id: Uuid::new_v4().to_string(),
            client_name,
            timestamp: Utc::now(),
        };

        let document = serde_json::to_value(&check)
            .map_err(|e| ServiceError::store("record status")(e.into()))?;
        self.store
            .insert(STATUS_COLLECTION, &check.id, &document)
            .map_err(ServiceError::store("record status"))
            .inspect_err(|e| error!(error = %e, "Failed to record status check"))?;

        debug!(id = %check.id, client = %check.client_name, "Status check recorded");
        Ok(check)
    }

    /// List at most `limit` of the most recent status checks, oldest first
    pub fn list(&self, limit: usize) -> Result<Vec<StatusCheck>, ServiceError> {
        let documents = self
            .store
            .find(STATUS_COLLECTION, Filter::All, limit)
            .map_err(ServiceError::store("list statuses"))
            .inspect_err(|e| error!(error = %e, "Failed to list status checks"))?;

        documents
            .into_iter()
            .map(|doc| {
                serde_json::from_value(doc)
                    .map_err(|e| ServiceError::store("list statuses")(e.into()))
            })
            .collect()
    }
}
