//! The HTTP surface of the realm.
//!
//! `/req` speaks CBOR and drives the request engine; `/tenant_log` and
//! `/tenant_log/ack` speak JSON and drive the audit queue; `/` reports
//! the realm's identity and `/metrics` exposes the counters. CORS is
//! permissive on purpose: realms are called directly from arbitrary
//! client origins.

use std::io::Read;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use realm_core::engine;
use realm_core::records::UserRecordId;
use realm_core::requests::SecretsRequest;
use realm_core::types::{RealmId, TENANT_SECRET_PREFIX};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::debug;

use crate::auth::{self, AuthError, ScopePolicy, SCOPE_USER};
use crate::error::AppError;
use crate::metrics::MetricsRegistry;
use crate::providers::Provider;
use crate::tenant_log;

/// Body cap for `/req`: protocol messages are small and fixed-shape.
const REQ_BODY_LIMIT: usize = 2 * 1024;

/// Body cap for the tenant-log endpoints, which carry ack batches.
const TENANT_LOG_BODY_LIMIT: usize = 32 * 1024;

/// Header carrying the caller's SDK version.
const SDK_VERSION_HEADER: &str = "x-juicebox-version";

/// Header carrying wall-clock handling time in nanoseconds.
const EXEC_TIME_HEADER: &str = "x-exec-time";

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    /// This realm's identity.
    pub realm_id: RealmId,
    /// The backend bundle.
    pub provider: Arc<Provider>,
    /// The counters.
    pub metrics: MetricsRegistry,
}

/// Builds the realm's router.
#[must_use]
pub fn router(realm_id: RealmId, provider: Arc<Provider>, metrics: MetricsRegistry) -> Router {
    let state = AppState {
        realm_id,
        provider,
        metrics,
    };
    Router::new()
        .route("/", get(realm_info))
        .route("/metrics", get(metrics_text))
        .route(
            "/req",
            post(handle_req).layer(DefaultBodyLimit::max(REQ_BODY_LIMIT)),
        )
        .route(
            "/tenant_log",
            post(tenant_log::poll).layer(DefaultBodyLimit::max(TENANT_LOG_BODY_LIMIT)),
        )
        .route(
            "/tenant_log/ack",
            post(tenant_log::ack).layer(DefaultBodyLimit::max(TENANT_LOG_BODY_LIMIT)),
        )
        .layer(middleware::from_fn(exec_time))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Stamps every response with its handling time.
async fn exec_time(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let mut response = next.run(request).await;
    let nanos = start.elapsed().as_nanos().to_string();
    if let Ok(value) = HeaderValue::from_str(&nanos) {
        response.headers_mut().insert(EXEC_TIME_HEADER, value);
    }
    response
}

async fn realm_info(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "realmID": state.realm_id.to_string() }))
}

async fn metrics_text(State(state): State<AppState>) -> Response {
    match state.metrics.encode_text() {
        Ok(body) => body.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// One round of the secrets protocol.
async fn handle_req(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    check_sdk_version(&headers)?;

    let token = bearer_token(&headers)?;
    let claims = auth::verify_token(
        state.provider.secrets_manager.as_ref(),
        TENANT_SECRET_PREFIX,
        &state.realm_id,
        token,
        ScopePolicy::Optional,
        SCOPE_USER,
    )
    .await?;

    let request: SecretsRequest = ciborium::de::from_reader(body.as_ref())
        .map_err(|e| AppError::Decode(format!("request body: {e}")))?;

    let record_id = UserRecordId::derive(&claims.issuer, &claims.subject)
        .map_err(|e| AppError::Decode(e.to_string()))?;

    let (record, read_token) = state.provider.record_store.get_record(&record_id).await?;

    let result = engine::handle_request(&claims, record, request, &mut SystemRng)?;

    if let Some(updated) = &result.updated_record {
        state
            .provider
            .record_store
            .write_record(&record_id, updated, read_token)
            .await?;
    }

    if let Some(event) = result.event {
        state
            .provider
            .pub_sub
            .publish(&state.realm_id, &claims.issuer, event.into())
            .await?;
    }

    let request_type = result.response.payload.name();
    state
        .metrics
        .realm()
        .request_completed(&claims.issuer, request_type);
    debug!(tenant = %claims.issuer, request = request_type, "request completed");

    let mut encoded = Vec::new();
    ciborium::ser::into_writer(&result.response, &mut encoded)
        .map_err(|e| AppError::Encode(e.to_string()))?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        encoded,
    )
        .into_response())
}

/// Pulls the bearer token off the Authorization header.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(AuthError::MissingToken)
}

/// The minimum SDK version this realm still speaks to.
fn server_version() -> semver::Version {
    semver::Version::parse(env!("CARGO_PKG_VERSION")).expect("crate version is valid semver")
}

/// Enforces the SDK version gate: the header must parse as semver and be
/// at least the server's own version.
fn check_sdk_version(headers: &HeaderMap) -> Result<(), AppError> {
    let value = headers
        .get(SDK_VERSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::SdkVersion(format!("missing {SDK_VERSION_HEADER} header")))?;
    let client = semver::Version::parse(value)
        .map_err(|e| AppError::SdkVersion(format!("invalid {SDK_VERSION_HEADER}: {e}")))?;
    let server = server_version();
    if client < server {
        return Err(AppError::SdkVersion(format!(
            "SDK version {client} is older than this realm ({server})"
        )));
    }
    Ok(())
}

/// The system CSPRNG as a byte reader, for the OPRF's proof nonce.
struct SystemRng;

impl Read for SystemRng {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        getrandom::getrandom(buf).map_err(std::io::Error::other)?;
        Ok(buf.len())
    }
}
