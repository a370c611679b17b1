//! Tenant authentication: JWT verification against versioned signing keys.
//!
//! Tokens name their signing key through the `kid` header as
//! `"<tenant>:<version>"`. The key itself lives in the secrets manager
//! under a prefixed name; the user API and the tenant-log API use
//! different prefixes so a key issued for one scope cannot be replayed
//! against the other.

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use realm_core::engine::Claims;
use realm_core::types::RealmId;
use serde::Deserialize;
use thiserror::Error;

use crate::secrets::{Secret, SecretsManager};

/// The scope required on `/req` tokens (when one is present).
pub const SCOPE_USER: &str = "user";

/// The scope required on tenant-log tokens.
pub const SCOPE_AUDIT: &str = "audit";

/// Whether an endpoint accepts tokens without a `scope` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopePolicy {
    /// The scope claim must be present and match.
    Required,
    /// A missing scope is accepted; a different one is still rejected.
    Optional,
}

/// Authentication failures. All of them surface as HTTP 401.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The request carried no bearer token.
    #[error("missing bearer token")]
    MissingToken,
    /// The token or its header did not parse, or its signature failed.
    #[error("jwt: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    /// The token uses an algorithm this realm does not accept.
    #[error("unexpected jwt signing method={0:?}")]
    UnsupportedAlgorithm(Algorithm),
    /// The `kid` header was missing or malformed.
    #[error("jwt kid {0}")]
    Kid(&'static str),
    /// No signing key could be produced for the token.
    #[error("no signing key for jwt")]
    UnknownKey,
    /// The stored key material was unusable.
    #[error("signing key: {0}")]
    BadKey(String),
    /// A claim failed validation.
    #[error("jwt claims {0}")]
    Claims(String),
}

/// A parsed `kid` header: `"<tenant>:<version>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKid {
    /// The signing tenant.
    pub tenant: String,
    /// The key version within that tenant.
    pub version: u64,
}

/// Parses and validates a `kid` header value.
///
/// # Errors
///
/// Fails unless the value is `"<tenant>:<version>"` with an alphanumeric
/// tenant (optionally `test-`-prefixed) and a decimal `u64` version.
pub fn parse_kid(kid: &str) -> Result<ParsedKid, AuthError> {
    let Some((tenant, version)) = kid.split_once(':') else {
        return Err(AuthError::Kid("incorrectly formatted"));
    };

    let bare = tenant.strip_prefix("test-").unwrap_or(tenant);
    if bare.is_empty() || !bare.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(AuthError::Kid("contains non-alphanumeric tenant name"));
    }

    let version: u64 = version
        .parse()
        .map_err(|_| AuthError::Kid("contained invalid version"))?;

    Ok(ParsedKid {
        tenant: tenant.to_string(),
        version,
    })
}

/// The algorithms a stored key envelope may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
enum AuthKeyAlgorithm {
    /// RSASSA-PKCS1-v1_5 using SHA-256.
    RsaPkcs1Sha256,
    /// HMAC using SHA-256.
    HmacSha256,
    /// Edwards-curve 25519 signatures.
    Edwards25519,
}

impl AuthKeyAlgorithm {
    fn matches(self, alg: Algorithm) -> bool {
        matches!(
            (self, alg),
            (Self::HmacSha256, Algorithm::HS256)
                | (Self::RsaPkcs1Sha256, Algorithm::RS256)
                | (Self::Edwards25519, Algorithm::EdDSA)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
enum AuthKeyEncoding {
    Hex,
    UTF8,
}

/// The JSON envelope tenant keys are normally stored in.
#[derive(Debug, Deserialize)]
struct AuthKeyJson {
    data: String,
    encoding: AuthKeyEncoding,
    algorithm: AuthKeyAlgorithm,
}

/// Turns stored key material into a verification key for `alg`.
///
/// The secret is either the JSON envelope (`{data, encoding, algorithm}`)
/// or, for HS256 only, raw key bytes. EdDSA and RS256 keys are
/// hex-encoded PKIX `SubjectPublicKeyInfo` documents.
///
/// # Errors
///
/// Fails when the envelope disagrees with `alg`, the encoding is invalid
/// for the algorithm, or the key bytes do not parse.
pub fn decoding_key(secret: &Secret, alg: Algorithm) -> Result<DecodingKey, AuthError> {
    let Ok(envelope) = serde_json::from_slice::<AuthKeyJson>(secret) else {
        // Not the envelope shape: accept as raw HS256 key material only.
        if alg == Algorithm::HS256 {
            return Ok(DecodingKey::from_secret(secret));
        }
        return Err(AuthError::UnsupportedAlgorithm(alg));
    };

    if !envelope.algorithm.matches(alg) {
        return Err(AuthError::UnsupportedAlgorithm(alg));
    }

    match envelope.encoding {
        AuthKeyEncoding::Hex => {
            let data = hex::decode(&envelope.data)
                .map_err(|_| AuthError::BadKey("invalid signing key hex".to_string()))?;
            match envelope.algorithm {
                AuthKeyAlgorithm::HmacSha256 => Ok(DecodingKey::from_secret(&data)),
                AuthKeyAlgorithm::Edwards25519 | AuthKeyAlgorithm::RsaPkcs1Sha256 => {
                    public_key_from_spki(&data, envelope.algorithm)
                }
            }
        }
        AuthKeyEncoding::UTF8 => match envelope.algorithm {
            AuthKeyAlgorithm::HmacSha256 => Ok(DecodingKey::from_secret(envelope.data.as_bytes())),
            AuthKeyAlgorithm::Edwards25519 | AuthKeyAlgorithm::RsaPkcs1Sha256 => Err(
                AuthError::BadKey("utf8 encoding is not valid for this algorithm".to_string()),
            ),
        },
    }
}

/// Extracts the verification key from a PKIX `SubjectPublicKeyInfo`.
fn public_key_from_spki(
    der: &[u8],
    algorithm: AuthKeyAlgorithm,
) -> Result<DecodingKey, AuthError> {
    let info = spki::SubjectPublicKeyInfoRef::try_from(der)
        .map_err(|_| AuthError::BadKey("invalid public key".to_string()))?;
    let key_bytes = info
        .subject_public_key
        .as_bytes()
        .ok_or_else(|| AuthError::BadKey("invalid public key".to_string()))?;
    match algorithm {
        AuthKeyAlgorithm::Edwards25519 => Ok(DecodingKey::from_ed_der(key_bytes)),
        AuthKeyAlgorithm::RsaPkcs1Sha256 => Ok(DecodingKey::from_rsa_der(key_bytes)),
        AuthKeyAlgorithm::HmacSha256 => {
            Err(AuthError::BadKey("invalid public key".to_string()))
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireClaims {
    #[serde(default)]
    iss: String,
    #[serde(default)]
    sub: String,
    #[serde(default)]
    aud: Vec<String>,
    #[serde(default)]
    scope: Option<String>,
}

/// Verifies a bearer token and returns the authenticated identity.
///
/// Past the signature check, this enforces the realm's claim rules:
/// `aud` must be exactly this realm's hex ID, `sub` and `iss` must be
/// non-empty, the signing tenant from `kid` must equal `iss`, and the
/// `scope` claim must satisfy `policy`.
///
/// # Errors
///
/// Any failure is an [`AuthError`]; callers map them all to 401.
pub async fn verify_token(
    secrets: &dyn SecretsManager,
    secrets_prefix: &str,
    realm_id: &RealmId,
    token: &str,
    policy: ScopePolicy,
    scope: &str,
) -> Result<Claims, AuthError> {
    let header = jsonwebtoken::decode_header(token)?;
    if !matches!(
        header.alg,
        Algorithm::HS256 | Algorithm::RS256 | Algorithm::EdDSA
    ) {
        return Err(AuthError::UnsupportedAlgorithm(header.alg));
    }

    let kid = parse_kid(&header.kid.ok_or(AuthError::Kid("missing"))?)?;

    let secret = secrets
        .get_secret(&format!("{secrets_prefix}{}", kid.tenant), kid.version)
        .await
        .map_err(|_| AuthError::UnknownKey)?;
    let key = decoding_key(&secret, header.alg)?;

    let mut validation = Validation::new(header.alg);
    // The audience rule is stricter than the library's (exactly one
    // entry); checked by hand below.
    validation.validate_aud = false;

    let token = jsonwebtoken::decode::<WireClaims>(token, &key, &validation)?;
    let claims = token.claims;

    if claims.aud.len() != 1 || claims.aud[0] != realm_id.to_string() {
        return Err(AuthError::Claims("contains invalid 'aud' field".to_string()));
    }
    if claims.sub.is_empty() {
        return Err(AuthError::Claims("missing 'sub' field".to_string()));
    }
    if claims.iss.is_empty() {
        return Err(AuthError::Claims("missing 'iss' field".to_string()));
    }
    if kid.tenant != claims.iss {
        return Err(AuthError::Claims(
            "'iss' field does not match signer".to_string(),
        ));
    }

    match claims.scope.as_deref() {
        Some(s) if s == scope => {}
        Some(_) => {
            return Err(AuthError::Claims(format!("'scope' should be '{scope}'")));
        }
        None => {
            if policy == ScopePolicy::Required {
                return Err(AuthError::Claims("missing 'scope' field".to_string()));
            }
        }
    }

    Ok(Claims {
        issuer: claims.iss,
        subject: claims.sub,
    })
}
