//! Service errors and their single mapping to JSON error responses

use crate::store::StoreError;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by the status log and the proxy registry
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Malformed caller input
    #[error("Invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    /// The document store could not complete the operation
    #[error("Document store unavailable during {operation}: {source}")]
    StoreUnavailable {
        operation: &'static str,
        #[source]
        source: StoreError,
    },
}

impl ServiceError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Returns a closure suitable for `map_err` on store calls
    pub fn store(operation: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| Self::StoreUnavailable { operation, source }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ServiceError::Validation { .. } => ErrorCode::ValidationError,
            ServiceError::StoreUnavailable { .. } => ErrorCode::StoreUnavailable,
        }
    }

    /// Field name for validation errors
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ServiceError::Validation { field, .. } => Some(*field),
            ServiceError::StoreUnavailable { .. } => None,
        }
    }

    pub fn to_response(&self) -> Response<Full<Bytes>> {
        let mut error = ErrorResponse::new(self.code(), self.to_string());
        error.field = self.field();
        error.into_response()
    }
}

/// Read an optional string from a loosely typed request field.
///
/// Absent and `null` both give `None`; any other non-string value is a
/// validation error on `field`.
pub fn string_field<'a>(
    field: &'static str,
    value: Option<&'a Value>,
) -> Result<Option<&'a str>, ServiceError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(ServiceError::validation(field, "must be a string")),
    }
}

/// Error codes returned in JSON bodies and the X-Error-Code header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Caller input failed validation
    ValidationError,
    /// Backing store unreachable or the operation failed
    StoreUnavailable,
    /// Request body is not valid JSON for the endpoint
    BadRequest,
    /// Request body exceeds the size limit
    PayloadTooLarge,
    /// Unknown route
    NotFound,
    /// Known route, wrong method
    MethodNotAllowed,
    /// Unexpected failure inside the service
    InternalError,
}

impl ErrorCode {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_header_value(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::StoreUnavailable => "STORE_UNAVAILABLE",
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// JSON error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
    /// HTTP status code (for reference)
    pub status: u16,
    /// Offending input field, for validation errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<&'static str>,
}

impl ErrorResponse {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status_code().as_u16(),
            code,
            message: message.into(),
            field: None,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"code":"{}","message":"{}","status":{}}}"#,
                self.code.as_header_value(),
                self.message.replace('\"', "\\\""),
                self.status
            )
        })
    }

    pub fn into_response(self) -> Response<Full<Bytes>> {
        Response::builder()
            .status(self.code.status_code())
            .header("Content-Type", "application/json")
            .header("X-Error-Code", self.code.as_header_value())
            .body(Full::new(Bytes::from(self.to_json())))
            .expect("valid response with StatusCode enum and static headers")
    }
}

/// Create a JSON error response with X-Error-Code header
pub fn json_error_response(code: ErrorCode, message: impl Into<String>) -> Response<Full<Bytes>> {
    ErrorResponse::new(code, message).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: Response<Full<Bytes>>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_error_code_status_codes() {
        assert_eq!(
            ErrorCode::ValidationError.status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ErrorCode::StoreUnavailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(ErrorCode::BadRequest.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorCode::MethodNotAllowed.status_code(),
            StatusCode::METHOD_NOT_ALLOWED
        );
    }

    #[test]
    fn test_service_error_codes() {
        let err = ServiceError::validation("port", "must be between 1 and 65535");
        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert_eq!(err.field(), Some("port"));

        let err = ServiceError::store("connect")(StoreError::Closed);
        assert_eq!(err.code(), ErrorCode::StoreUnavailable);
        assert_eq!(err.field(), None);
    }

    #[test]
    fn test_string_field_rejects_other_types() {
        use serde_json::json;

        assert_eq!(string_field("host", None).unwrap(), None);
        assert_eq!(string_field("host", Some(&Value::Null)).unwrap(), None);
        assert_eq!(string_field("host", Some(&json!("a"))).unwrap(), Some("a"));

        for value in [json!(123), json!(true), json!(["a"]), json!({"a": 1})] {
            let err = string_field("host", Some(&value)).unwrap_err();
            assert_eq!(err.field(), Some("host"));
        }
    }

    #[test]
    fn test_store_unavailable_preserves_source() {
        use std::error::Error;

        let err = ServiceError::store("disconnect")(StoreError::Closed);
        let source = err.source().expect("source preserved");
        assert_eq!(source.to_string(), "Store is closed");
        assert!(err.to_string().contains("disconnect"));
    }

    #[tokio::test]
    async fn test_validation_response_names_field() {
        let response = ServiceError::validation("host", "must not be empty").to_response();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            response.headers().get("X-Error-Code").unwrap(),
            "VALIDATION_ERROR"
        );

        let body = body_json(response).await;
        assert_eq!(body["code"], "VALIDATION_ERROR");
        assert_eq!(body["field"], "host");
        assert_eq!(body["status"], 422);
    }

    #[tokio::test]
    async fn test_json_error_response_omits_field() {
        let response = json_error_response(ErrorCode::NotFound, "Not found");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get("Content-Type").unwrap(),
            "application/json"
        );

        let body = body_json(response).await;
        assert_eq!(body["message"], "Not found");
        assert!(body.get("field").is_none());
    }
}
