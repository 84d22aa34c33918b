//! HTTP API used by the browser extension
//!
//! All routes live under `/api`. Handlers call into the [`AppContext`]
//! components and every [`ServiceError`] is turned into a response in one
//! place, [`route`].

use crate::config::{Config, StatusConfig};
use crate::context::AppContext;
use crate::cors::CorsPolicy;
use crate::error::{json_error_response, ErrorCode, ServiceError};
use crate::registry::{ConnectRequest, ProxyTarget};
use crate::status::NewStatusCheck;
use chrono::{DateTime, Utc};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::header::{CONTENT_TYPE, ORIGIN};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Version information for the service
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");

/// Largest accepted request body
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Routes that exist for at least one method, for 405 vs 404
const KNOWN_ROUTES: &[&str] = &[
    "/api",
    "/api/",
    "/api/health",
    "/api/version",
    "/api/status",
    "/api/connect",
    "/api/disconnect",
    "/api/proxy/status",
];

struct ApiState {
    ctx: Arc<AppContext>,
    cors: CorsPolicy,
    limits: StatusConfig,
}

/// HTTP API server
pub struct ApiServer {
    bind_addr: SocketAddr,
    state: Arc<ApiState>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ApiServer {
    pub fn new(
        bind_addr: SocketAddr,
        ctx: Arc<AppContext>,
        config: &Config,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bind_addr,
            state: Arc::new(ApiState {
                ctx,
                cors: CorsPolicy::new(&config.cors),
                limits: config.status.clone(),
            }),
            shutdown_rx,
        }
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "API server listening (HTTP/1.1 and HTTP/2)");

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let state = Arc::clone(&self.state);
                            tokio::spawn(async move {
                                if let Err(e) = serve_connection(stream, addr, state).await {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("API server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn serve_connection<S>(stream: S, _addr: SocketAddr, state: Arc<ApiState>) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let state = Arc::clone(&state);
        async move { handle_request(req, state).await }
    });

    AutoBuilder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

async fn handle_request(
    req: Request<Incoming>,
    state: Arc<ApiState>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let origin = req
        .headers()
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    debug!(%method, %path, "API request");

    let mut response = route(req, &state, &method, &path).await;
    state.cors.apply(origin.as_deref(), response.headers_mut());
    Ok(response)
}

async fn route(
    req: Request<Incoming>,
    state: &ApiState,
    method: &Method,
    path: &str,
) -> Response<Full<Bytes>> {
    let result = match (method, path) {
        (&Method::OPTIONS, path) if path == "/api" || path.starts_with("/api/") => {
            Ok(empty_response(StatusCode::NO_CONTENT))
        }

        (&Method::GET, "/api" | "/api/") => Ok(json_response(
            StatusCode::OK,
            &serde_json::json!({ "message": "VPN Extension Backend Service" }),
        )),

        // Never fails; store problems are reported inside the payload
        (&Method::GET, "/api/health") => Ok(json_response(StatusCode::OK, &state.ctx.health())),

        (&Method::GET, "/api/version") => Ok(json_response(
            StatusCode::OK,
            &serde_json::json!({ "name": PKG_NAME, "version": VERSION }),
        )),

        (&Method::POST, "/api/status") => create_status(req, state).await,
        (&Method::GET, "/api/status") => list_statuses(req.uri().query(), state),
        (&Method::POST, "/api/connect") => connect(req, state).await,
        (&Method::POST, "/api/disconnect") => disconnect(state),
        (&Method::GET, "/api/proxy/status") => proxy_status(state),

        (_, path) if KNOWN_ROUTES.contains(&path) => Ok(json_error_response(
            ErrorCode::MethodNotAllowed,
            format!("Method {} not allowed for {}", method, path),
        )),
        _ => Ok(json_error_response(ErrorCode::NotFound, "Not found")),
    };

    result.unwrap_or_else(|e| {
        debug!(%method, %path, error = %e, "Request failed");
        e.to_response()
    })
}

// ==================== Status log ====================

async fn create_status(
    req: Request<Incoming>,
    state: &ApiState,
) -> Result<Response<Full<Bytes>>, ServiceError> {
    let request: NewStatusCheck = match read_json(req).await {
        Ok(r) => r,
        Err(response) => return Ok(response),
    };

    let check = state.ctx.status_log().record(&request)?;
    Ok(json_response(StatusCode::OK, &check))
}

fn list_statuses(
    query: Option<&str>,
    state: &ApiState,
) -> Result<Response<Full<Bytes>>, ServiceError> {
    let limit = parse_limit(query, &state.limits)?;
    let checks = state.ctx.status_log().list(limit)?;
    Ok(json_response(StatusCode::OK, &checks))
}

fn parse_limit(query: Option<&str>, limits: &StatusConfig) -> Result<usize, ServiceError> {
    let Some(raw) = query.and_then(|q| q.split('&').find_map(|pair| pair.strip_prefix("limit=")))
    else {
        return Ok(limits.default_list_limit);
    };

    let limit: usize = raw.parse().map_err(|_| {
        ServiceError::validation("limit", format!("must be a positive integer, got '{}'", raw))
    })?;

    if limit == 0 || limit > limits.max_list_limit {
        return Err(ServiceError::validation(
            "limit",
            format!("must be between 1 and {}", limits.max_list_limit),
        ));
    }

    Ok(limit)
}

// ==================== Active proxy ====================

#[derive(Serialize)]
struct ConnectResponse<'a> {
    status: &'static str,
    proxy: &'a ProxyTarget,
    connected_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct DisconnectResponse {
    status: &'static str,
    removed: bool,
    deleted_count: u64,
}

async fn connect(
    req: Request<Incoming>,
    state: &ApiState,
) -> Result<Response<Full<Bytes>>, ServiceError> {
    let request: ConnectRequest = match read_json(req).await {
        Ok(r) => r,
        Err(response) => return Ok(response),
    };

    let record = state.ctx.registry().connect(&request)?;
    Ok(json_response(
        StatusCode::OK,
        &ConnectResponse {
            status: "connected",
            proxy: &record.proxy,
            connected_at: record.connected_at,
        },
    ))
}

fn disconnect(state: &ApiState) -> Result<Response<Full<Bytes>>, ServiceError> {
    let outcome = state.ctx.registry().disconnect()?;
    Ok(json_response(
        StatusCode::OK,
        &DisconnectResponse {
            status: "disconnected",
            removed: outcome.removed,
            deleted_count: u64::from(outcome.removed),
        },
    ))
}

fn proxy_status(state: &ApiState) -> Result<Response<Full<Bytes>>, ServiceError> {
    let status = state.ctx.registry().status()?;
    Ok(json_response(StatusCode::OK, &status))
}

// ==================== Helpers ====================

/// Read a JSON body. An empty body decodes as `T::default()` so that missing
/// fields are reported by validation rather than as malformed JSON.
async fn read_json<T>(req: Request<Incoming>) -> Result<T, Response<Full<Bytes>>>
where
    T: DeserializeOwned + Default,
{
    let body = match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.is::<LengthLimitError>() => {
            return Err(json_error_response(
                ErrorCode::PayloadTooLarge,
                format!("Request body exceeds {} bytes", MAX_BODY_BYTES),
            ));
        }
        Err(e) => {
            return Err(json_error_response(
                ErrorCode::BadRequest,
                format!("Failed to read request body: {}", e),
            ));
        }
    };

    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }

    serde_json::from_slice(&body)
        .map_err(|e| json_error_response(ErrorCode::BadRequest, format!("Invalid JSON: {}", e)))
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(body) {
        Ok(bytes) => Response::builder()
            .status(status)
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(bytes)))
            .expect("valid response with StatusCode enum and static header"),
        Err(e) => {
            error!(error = %e, "Failed to serialize response");
            json_error_response(ErrorCode::InternalError, "Failed to serialize response")
        }
    }
}

fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::new()))
        .expect("valid response with StatusCode enum")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_limit_defaults() {
        let limits = StatusConfig::default();
        assert_eq!(parse_limit(None, &limits).unwrap(), 1000);
        assert_eq!(parse_limit(Some("other=1"), &limits).unwrap(), 1000);
    }

    #[test]
    fn test_parse_limit_value() {
        let limits = StatusConfig::default();
        assert_eq!(parse_limit(Some("limit=25"), &limits).unwrap(), 25);
        assert_eq!(parse_limit(Some("x=1&limit=7"), &limits).unwrap(), 7);
    }

    #[test]
    fn test_parse_limit_rejects_bad_values() {
        let limits = StatusConfig {
            default_list_limit: 10,
            max_list_limit: 100,
        };

        for query in ["limit=0", "limit=101", "limit=-3", "limit=abc", "limit="] {
            let err = parse_limit(Some(query), &limits).unwrap_err();
            assert_eq!(err.field(), Some("limit"), "query {}", query);
        }
    }

    #[test]
    fn test_known_routes_cover_handlers() {
        for path in ["/api/status", "/api/connect", "/api/disconnect", "/api/proxy/status"] {
            assert!(KNOWN_ROUTES.contains(&path));
        }
    }
}
