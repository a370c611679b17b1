//! The tenant audit-log API.
//!
//! Tenants drain their realm's audit queue over JSON: `/tenant_log`
//! acknowledges any receipts it was handed and then pulls the next page;
//! `/tenant_log/ack` acknowledges only. Both require the `audit` scope
//! and look signing keys up under the tenant-log prefix, so user-API
//! tokens cannot read audit data.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Json;
use realm_core::types::TENANT_LOG_SECRET_PREFIX;
use serde::{Deserialize, Serialize};

use crate::auth::{self, ScopePolicy, SCOPE_AUDIT};
use crate::error::AppError;
use crate::pubsub::TenantLogEntry;
use crate::router::{bearer_token, AppState};

/// Largest page a single pull may request.
const MAX_PAGE_SIZE: i16 = 200;

/// Body of `POST /tenant_log`.
#[derive(Debug, Default, Deserialize)]
pub struct TenantLogRequest {
    /// Receipts to acknowledge before pulling.
    #[serde(default)]
    pub acks: Vec<String>,
    /// How many events to pull; clamped to `[1, 200]`.
    #[serde(default)]
    pub page_size: i16,
}

/// Body of `POST /tenant_log/ack`.
#[derive(Debug, Default, Deserialize)]
pub struct TenantLogAckRequest {
    /// Receipts to acknowledge.
    #[serde(default)]
    pub acks: Vec<String>,
}

/// Response of `POST /tenant_log`.
#[derive(Debug, Serialize)]
pub struct TenantLogResponse {
    /// The pulled events; an empty page is an empty array, never null.
    pub events: Vec<TenantLogEntry>,
}

/// Response of `POST /tenant_log/ack`.
#[derive(Debug, Serialize)]
pub struct TenantLogAckResponse {}

/// `POST /tenant_log`: ack (if asked), then pull.
pub(crate) async fn poll(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<TenantLogResponse>, AppError> {
    let claims = authorize(&state, &headers).await?;

    let request: TenantLogRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::Decode(format!("request body: {e}")))?;
    let page_size = u16::try_from(request.page_size.clamp(1, MAX_PAGE_SIZE)).unwrap_or(1);

    if !request.acks.is_empty() {
        state
            .provider
            .pub_sub
            .ack(&state.realm_id, &claims.issuer, &request.acks)
            .await?;
    }

    let events = state
        .provider
        .pub_sub
        .pull(&state.realm_id, &claims.issuer, page_size)
        .await?;

    state
        .metrics
        .realm()
        .tenant_log_completed(&claims.issuer, "/tenant_log");

    Ok(Json(TenantLogResponse { events }))
}

/// `POST /tenant_log/ack`: ack only.
pub(crate) async fn ack(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<TenantLogAckResponse>, AppError> {
    let claims = authorize(&state, &headers).await?;

    let request: TenantLogAckRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::Decode(format!("request body: {e}")))?;

    if !request.acks.is_empty() {
        state
            .provider
            .pub_sub
            .ack(&state.realm_id, &claims.issuer, &request.acks)
            .await?;
    }

    state
        .metrics
        .realm()
        .tenant_log_completed(&claims.issuer, "/tenant_log/ack");

    Ok(Json(TenantLogAckResponse {}))
}

async fn authorize(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<realm_core::engine::Claims, AppError> {
    let token = bearer_token(headers)?;
    Ok(auth::verify_token(
        state.provider.secrets_manager.as_ref(),
        TENANT_LOG_SECRET_PREFIX,
        &state.realm_id,
        token,
        ScopePolicy::Required,
        SCOPE_AUDIT,
    )
    .await?)
}
