//! The request state machine.
//!
//! [`handle_request`] consumes the caller's authenticated identity, the
//! user's current record, and one protocol request, and produces the
//! response plus the record to write back (if any) and the audit event to
//! publish (if any). It performs no I/O; the only nondeterminism is the
//! RNG forwarded to the OPRF during `Recover2`.
//!
//! Concurrency control lives outside: the caller reads the record with a
//! compare-and-swap token and writes the updated record conditionally, so
//! two racing requests against one record cannot both spend the same
//! guess.

use std::io::Read;

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::oprf::{self, OprfError};
use crate::records::{Registered, RegistrationState, UserRecord};
use crate::requests::{Register2Request, SecretsRequest};
use crate::responses::{
    Recover1Response, Recover2Response, Recover3Response, ResponsePayload, ResponseStatus,
    SecretsResponse,
};
use crate::types::{OprfBlindedInput, RegistrationVersion, UnlockKeyTag};

/// The authenticated identity a request arrives with, extracted from the
/// tenant's JWT after verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    /// The tenant (`iss`).
    pub issuer: String,
    /// The tenant-scoped user (`sub`).
    pub subject: String,
}

/// What happened, for the tenant's audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A registration was created or overwritten.
    Registered,
    /// A recovery spent a guess.
    GuessUsed,
    /// A recovery presented the correct tag and took the share.
    ShareRecovered,
    /// A registration was deleted.
    Deleted,
}

impl EventKind {
    /// The wire name of this event.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Registered => "registered",
            Self::GuessUsed => "guess_used",
            Self::ShareRecovered => "share_recovered",
            Self::Deleted => "deleted",
        }
    }
}

/// An audit event for the tenant's log.
///
/// `user` is a hash of the `(issuer, subject)` pair that deliberately
/// differs from the record-ID derivation, so tenants cannot correlate
/// their audit feed with storage keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Hashed user identity.
    pub user: String,
    /// What happened.
    pub kind: EventKind,
    /// The registration's guess budget, on `guess_used`.
    pub num_guesses: Option<u16>,
    /// Guesses consumed so far, on `guess_used`.
    pub guess_count: Option<u16>,
}

impl Event {
    fn new(claims: &Claims, kind: EventKind) -> Self {
        Self {
            user: audit_user(claims),
            kind,
            num_guesses: None,
            guess_count: None,
        }
    }
}

/// Hashes a user's identity for the audit log: `SHA-256(iss ":" sub)`,
/// rendered lowercase hex.
#[must_use]
pub fn audit_user(claims: &Claims) -> String {
    let mut hash = Sha256::new();
    hash.update(claims.issuer.as_bytes());
    hash.update(b":");
    hash.update(claims.subject.as_bytes());
    hex::encode(hash.finalize())
}

/// The engine's verdict on one request.
#[derive(Debug)]
pub struct AppResult {
    /// The response to encode for the client.
    pub response: SecretsResponse,
    /// The record to write back under the caller's read token, when the
    /// request changed state.
    pub updated_record: Option<UserRecord>,
    /// The audit event to publish, when the request warrants one.
    pub event: Option<Event>,
}

impl AppResult {
    fn reply(status: ResponseStatus, payload: ResponsePayload) -> Self {
        Self {
            response: SecretsResponse { status, payload },
            updated_record: None,
            event: None,
        }
    }

    fn with_record(mut self, state: RegistrationState) -> Self {
        self.updated_record = Some(UserRecord {
            registration_state: state,
        });
        self
    }

    fn with_event(mut self, event: Event) -> Self {
        self.event = Some(event);
        self
    }
}

/// Errors the engine can surface. User input that merely fails a protocol
/// check is not an error; it produces a non-`Ok` response status instead.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The OPRF evaluation failed: a stored or submitted group element did
    /// not decode, or the RNG could not supply the proof nonce.
    #[error("oprf evaluation: {0}")]
    Oprf(#[from] OprfError),
}

/// Runs one request against the user's current record.
///
/// # Errors
///
/// Returns [`EngineError::Oprf`] when a `Recover2` evaluation fails; the
/// caller must not write any record state in that case.
pub fn handle_request(
    claims: &Claims,
    record: UserRecord,
    request: SecretsRequest,
    rng: &mut dyn Read,
) -> Result<AppResult, EngineError> {
    match request {
        SecretsRequest::Register1 => Ok(AppResult::reply(
            ResponseStatus::Ok,
            ResponsePayload::Register1,
        )),
        SecretsRequest::Register2(payload) => Ok(register2(claims, *payload)),
        SecretsRequest::Recover1 => Ok(recover1(record)),
        SecretsRequest::Recover2 {
            version,
            oprf_blinded_input,
        } => recover2(claims, record, &version, &oprf_blinded_input, rng),
        SecretsRequest::Recover3 {
            version,
            unlock_key_tag,
        } => Ok(recover3(claims, record, &version, &unlock_key_tag)),
        SecretsRequest::Delete => Ok(delete(claims, &record)),
    }
}

/// A new registration always lands, whatever the prior state. Re-register
/// is how a client clears a lockout, so `NoGuesses` is not sticky here.
fn register2(claims: &Claims, payload: Register2Request) -> AppResult {
    let registered = Registered {
        version: payload.version,
        oprf_private_key: payload.oprf_private_key,
        oprf_signed_public_key: payload.oprf_signed_public_key,
        unlock_key_commitment: payload.unlock_key_commitment,
        unlock_key_tag: payload.unlock_key_tag,
        encryption_key_scalar_share: payload.encryption_key_scalar_share,
        encrypted_secret: payload.encrypted_secret,
        encrypted_secret_commitment: payload.encrypted_secret_commitment,
        guess_count: 0,
        policy: payload.policy,
    };
    AppResult::reply(ResponseStatus::Ok, ResponsePayload::Register2)
        .with_record(RegistrationState::Registered(Box::new(registered)))
        .with_event(Event::new(claims, EventKind::Registered))
}

fn recover1(record: UserRecord) -> AppResult {
    match record.registration_state {
        RegistrationState::Registered(state) => {
            if state.guess_count >= state.policy.num_guesses {
                return AppResult::reply(
                    ResponseStatus::NoGuesses,
                    ResponsePayload::Recover1(Recover1Response::default()),
                )
                .with_record(RegistrationState::NoGuesses);
            }
            AppResult::reply(
                ResponseStatus::Ok,
                ResponsePayload::Recover1(Recover1Response {
                    version: Some(state.version),
                }),
            )
        }
        RegistrationState::NoGuesses => AppResult::reply(
            ResponseStatus::NoGuesses,
            ResponsePayload::Recover1(Recover1Response::default()),
        ),
        RegistrationState::NotRegistered => AppResult::reply(
            ResponseStatus::NotRegistered,
            ResponsePayload::Recover1(Recover1Response::default()),
        ),
    }
}

fn recover2(
    claims: &Claims,
    record: UserRecord,
    version: &RegistrationVersion,
    blinded_input: &OprfBlindedInput,
    rng: &mut dyn Read,
) -> Result<AppResult, EngineError> {
    let empty = || ResponsePayload::Recover2(Box::new(Recover2Response::default()));
    match record.registration_state {
        RegistrationState::Registered(mut state) => {
            if state.version != *version {
                return Ok(AppResult::reply(ResponseStatus::VersionMismatch, empty()));
            }
            if state.guess_count >= state.policy.num_guesses {
                return Ok(AppResult::reply(ResponseStatus::NoGuesses, empty())
                    .with_record(RegistrationState::NoGuesses));
            }

            // Charge the guess before the evaluation. A client that aborts
            // after seeing the OPRF result must not get the guess back.
            state.guess_count += 1;

            let (blinded_result, proof) = oprf::blind_evaluate(
                &state.oprf_private_key,
                &state.oprf_signed_public_key.public_key,
                blinded_input,
                rng,
            )?;

            let response = Recover2Response {
                oprf_signed_public_key: Some(state.oprf_signed_public_key),
                oprf_blinded_result: Some(blinded_result),
                oprf_proof: Some(proof),
                unlock_key_commitment: Some(state.unlock_key_commitment),
                num_guesses: Some(state.policy.num_guesses),
                guess_count: Some(state.guess_count),
            };
            let mut event = Event::new(claims, EventKind::GuessUsed);
            event.num_guesses = Some(state.policy.num_guesses);
            event.guess_count = Some(state.guess_count);

            Ok(AppResult::reply(
                ResponseStatus::Ok,
                ResponsePayload::Recover2(Box::new(response)),
            )
            .with_record(RegistrationState::Registered(state))
            .with_event(event))
        }
        RegistrationState::NoGuesses => {
            Ok(AppResult::reply(ResponseStatus::NoGuesses, empty()))
        }
        RegistrationState::NotRegistered => {
            Ok(AppResult::reply(ResponseStatus::NotRegistered, empty()))
        }
    }
}

fn recover3(
    claims: &Claims,
    record: UserRecord,
    version: &RegistrationVersion,
    unlock_key_tag: &UnlockKeyTag,
) -> AppResult {
    let empty = || ResponsePayload::Recover3(Recover3Response::default());
    match record.registration_state {
        RegistrationState::Registered(mut state) => {
            if state.version != *version {
                return AppResult::reply(ResponseStatus::VersionMismatch, empty());
            }

            let guesses_remaining = state.policy.num_guesses - state.guess_count;

            if !unlock_key_tag.ct_eq_tag(&state.unlock_key_tag) {
                let result = AppResult::reply(
                    ResponseStatus::BadUnlockKeyTag,
                    ResponsePayload::Recover3(Recover3Response {
                        guesses_remaining: Some(guesses_remaining),
                        ..Recover3Response::default()
                    }),
                );
                return if guesses_remaining == 0 {
                    result.with_record(RegistrationState::NoGuesses)
                } else {
                    result.with_record(RegistrationState::Registered(state))
                };
            }

            state.guess_count = 0;
            let response = Recover3Response {
                encryption_key_scalar_share: Some(state.encryption_key_scalar_share),
                encrypted_secret: Some(state.encrypted_secret),
                encrypted_secret_commitment: Some(state.encrypted_secret_commitment),
                guesses_remaining: None,
            };
            AppResult::reply(
                ResponseStatus::Ok,
                ResponsePayload::Recover3(response),
            )
            .with_record(RegistrationState::Registered(state))
            .with_event(Event::new(claims, EventKind::ShareRecovered))
        }
        RegistrationState::NoGuesses => AppResult::reply(ResponseStatus::NoGuesses, empty()),
        RegistrationState::NotRegistered => {
            AppResult::reply(ResponseStatus::NotRegistered, empty())
        }
    }
}

fn delete(claims: &Claims, record: &UserRecord) -> AppResult {
    let result = AppResult::reply(ResponseStatus::Ok, ResponsePayload::Delete);
    match record.registration_state {
        // Deleting nothing changes nothing and is not worth an audit entry.
        RegistrationState::NotRegistered => result,
        RegistrationState::NoGuesses | RegistrationState::Registered(_) => result
            .with_record(RegistrationState::NotRegistered)
            .with_event(Event::new(claims, EventKind::Deleted)),
    }
}
