//! Single-slot registry of the active proxy target
//!
//! The registry owns exactly one keyed document, [`ACTIVE_KEY`] in the
//! [`ACTIVE_PROXY_COLLECTION`] collection. It is only ever addressed by that
//! key, and the store guarantees keys are unique, so there can never be more
//! than one active record. Connect is a single atomic upsert and disconnect a
//! single delete-by-key; nothing is cached in process, so every read sees the
//! latest write.
//!
//! ```text
//! absent  --connect-->    present
//! present --connect-->    present   (replaced, connected_at refreshed)
//! present --disconnect--> absent
//! absent  --disconnect--> absent    (no-op)
//! ```

use crate::error::{string_field, ServiceError};
use crate::store::DocumentStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

/// Collection holding the active proxy slot
pub const ACTIVE_PROXY_COLLECTION: &str = "active_proxies";

/// Fixed key of the singleton record
pub const ACTIVE_KEY: &str = "active";

/// Protocol used when the caller does not name one
pub const DEFAULT_PROTOCOL: &str = "https";

/// Proxy target as submitted by the caller, before validation.
///
/// Fields stay untyped JSON until [`ConnectRequest::validate`], so a value of
/// the wrong type is reported against its field. Ports given as `"443"` or
/// `443.0` are accepted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectRequest {
    #[serde(default)]
    pub host: Option<Value>,
    #[serde(default)]
    pub port: Option<Value>,
    #[serde(default)]
    pub protocol: Option<Value>,
}

impl ConnectRequest {
    pub fn new(host: impl Into<String>, port: i64) -> Self {
        Self {
            host: Some(Value::String(host.into())),
            port: Some(Value::from(port)),
            protocol: None,
        }
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(Value::String(protocol.into()));
        self
    }

    /// Check the request and turn it into a proxy target
    pub fn validate(&self) -> Result<ProxyTarget, ServiceError> {
        let host = match string_field("host", self.host.as_ref())?.map(str::trim) {
            Some(host) if !host.is_empty() => host.to_string(),
            Some(_) => return Err(ServiceError::validation("host", "must not be empty")),
            None => return Err(ServiceError::validation("host", "is required")),
        };

        let port = match self.port.as_ref().filter(|v| !v.is_null()) {
            Some(value) => {
                let port = integer_port(value)?;
                u16::try_from(port)
                    .ok()
                    .filter(|p| *p != 0)
                    .ok_or_else(|| {
                        ServiceError::validation(
                            "port",
                            format!("must be between 1 and 65535, got {}", port),
                        )
                    })?
            }
            None => return Err(ServiceError::validation("port", "is required")),
        };

        let protocol = match string_field("protocol", self.protocol.as_ref())?.map(str::trim) {
            Some(protocol) if !protocol.is_empty() => protocol.to_ascii_lowercase(),
            _ => DEFAULT_PROTOCOL.to_string(),
        };

        Ok(ProxyTarget {
            host,
            port,
            protocol,
        })
    }
}

/// Integer value of a port field. Whole floats and numeric strings are
/// accepted; floats beyond the `i64` range saturate and fail the range check.
fn integer_port(value: &Value) -> Result<i64, ServiceError> {
    let port = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };

    port.ok_or_else(|| ServiceError::validation("port", format!("must be an integer, got {}", value)))
}

/// Validated proxy target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyTarget {
    pub host: String,
    pub port: u16,
    pub protocol: String,
}

/// The singleton active proxy document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveProxyRecord {
    /// Always [`ACTIVE_KEY`]
    #[serde(rename = "type")]
    pub slot: String,
    pub proxy: ProxyTarget,
    pub connected_at: DateTime<Utc>,
}

/// Result of a disconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DisconnectOutcome {
    pub removed: bool,
}

/// Current proxy status as reported to callers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProxyStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyTarget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
}

impl ProxyStatus {
    pub fn disconnected() -> Self {
        Self {
            connected: false,
            proxy: None,
            connected_at: None,
        }
    }
}

impl From<ActiveProxyRecord> for ProxyStatus {
    fn from(record: ActiveProxyRecord) -> Self {
        Self {
            connected: true,
            proxy: Some(record.proxy),
            connected_at: Some(record.connected_at),
        }
    }
}

pub struct ActiveProxyRegistry {
    store: Arc<dyn DocumentStore>,
}

impl ActiveProxyRegistry {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Create or wholly replace the active proxy record
    pub fn connect(&self, request: &ConnectRequest) -> Result<ActiveProxyRecord, ServiceError> {
        let proxy = request.validate()?;

        info!(
            host = %proxy.host,
            port = proxy.port,
            protocol = %proxy.protocol,
            "Connecting to proxy"
        );

        let record = ActiveProxyRecord {
            slot: ACTIVE_KEY.to_string(),
            proxy,
            connected_at: Utc::now(),
        };

        let document = serde_json::to_value(&record)
            .map_err(|e| ServiceError::store("connect")(e.into()))?;
        self.store
            .upsert(ACTIVE_PROXY_COLLECTION, ACTIVE_KEY, &document)
            .map_err(ServiceError::store("connect"))
            .inspect_err(|e| error!(error = %e, "Error connecting to proxy"))?;

        Ok(record)
    }

    /// Remove the active proxy record if there is one
    pub fn disconnect(&self) -> Result<DisconnectOutcome, ServiceError> {
        info!("Disconnecting from proxy");

        let removed = self
            .store
            .delete_one(ACTIVE_PROXY_COLLECTION, ACTIVE_KEY)
            .map_err(ServiceError::store("disconnect"))
            .inspect_err(|e| error!(error = %e, "Error disconnecting from proxy"))?;

        Ok(DisconnectOutcome { removed: removed > 0 })
    }

    /// Read the active proxy record
    pub fn active(&self) -> Result<Option<ActiveProxyRecord>, ServiceError> {
        let document = self
            .store
            .find_one(ACTIVE_PROXY_COLLECTION, ACTIVE_KEY)
            .map_err(ServiceError::store("proxy status"))
            .inspect_err(|e| error!(error = %e, "Error getting proxy status"))?;

        document
            .map(|doc| {
                serde_json::from_value(doc)
                    .map_err(|e| ServiceError::store("proxy status")(e.into()))
                    .inspect_err(|e| error!(error = %e, "Stored proxy record is unreadable"))
            })
            .transpose()
    }

    pub fn status(&self) -> Result<ProxyStatus, ServiceError> {
        Ok(self
            .active()?
            .map(ProxyStatus::from)
            .unwrap_or_else(ProxyStatus::disconnected))
    }
}
