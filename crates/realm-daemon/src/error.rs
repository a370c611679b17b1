//! The daemon's error taxonomy and its mapping onto HTTP statuses.
//!
//! Protocol outcomes (`NoGuesses`, `VersionMismatch`, ...) are not errors;
//! they ride inside a 200 response. Errors are the cases where no
//! protocol response exists: malformed input, failed authentication, a
//! lost CAS race, or a backend that could not be reached.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use realm_core::engine::EngineError;
use realm_core::oprf::OprfError;
use thiserror::Error;
use tracing::warn;

use crate::auth::AuthError;
use crate::pubsub::PubSubError;
use crate::store::RecordStoreError;

/// Anything a request handler can fail with.
#[derive(Debug, Error)]
pub enum AppError {
    /// The request body or a derived value failed to decode.
    #[error("decode: {0}")]
    Decode(String),
    /// A response failed to encode.
    #[error("encode: {0}")]
    Encode(String),
    /// Authentication failed.
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// The caller's SDK is too old for this realm.
    #[error("sdk version: {0}")]
    SdkVersion(String),
    /// A record-store operation failed.
    #[error(transparent)]
    Store(#[from] RecordStoreError),
    /// A queue operation failed.
    #[error(transparent)]
    PubSub(#[from] PubSubError),
    /// The request engine failed.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl AppError {
    /// The HTTP status this error surfaces as.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Decode(_) => StatusCode::BAD_REQUEST,
            Self::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::SdkVersion(_) => StatusCode::UPGRADE_REQUIRED,
            Self::Store(RecordStoreError::Cancelled) | Self::PubSub(PubSubError::Cancelled) => {
                client_closed_request()
            }
            // The loser of a CAS race gets a 5xx and retries its round.
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::PubSub(PubSubError::InvalidAck { .. }) => StatusCode::BAD_REQUEST,
            Self::PubSub(_) => StatusCode::INTERNAL_SERVER_ERROR,
            // A bad blinded input is the client's fault; a stored key that
            // no longer decodes, or a starved RNG, is ours.
            Self::Engine(EngineError::Oprf(OprfError::InvalidBlindedInput)) => {
                StatusCode::BAD_REQUEST
            }
            Self::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// 499, the de-facto "client closed request" status. Not in the IANA
/// registry, so it has no `StatusCode` constant.
fn client_closed_request() -> StatusCode {
    StatusCode::from_u16(499).expect("499 is in the valid status range")
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!(error = %self, "request failed");
        }
        let body = if status == client_closed_request() {
            "Client closed request".to_string()
        } else {
            self.to_string()
        };
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::Decode("bad cbor".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Auth(AuthError::UnknownKey).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::SdkVersion("too old".to_string()).status_code(),
            StatusCode::UPGRADE_REQUIRED
        );
        assert_eq!(
            AppError::Store(RecordStoreError::ConcurrentModification).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::Store(RecordStoreError::Cancelled).status_code().as_u16(),
            499
        );
        assert_eq!(
            AppError::PubSub(PubSubError::InvalidAck { count: 1 }).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Engine(EngineError::Oprf(OprfError::InvalidBlindedInput)).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Engine(EngineError::Oprf(OprfError::InvalidPrivateKey)).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
