//! # realm-core
//!
//! Protocol core for a software realm in a distributed secret-recovery
//! deployment. End users register a PIN-protected secret share with several
//! independent realms and later recover it by proving knowledge of the PIN;
//! each realm stores only a share, so fewer than a threshold of compromised
//! realms reveal nothing.
//!
//! This crate is the pure half of the server: the fixed-size wire types and
//! their CBOR codec, the verifiable OPRF over Ristretto255, deterministic
//! user-record-ID derivation, and the request state machine that drives the
//! three-round registration and recovery protocols. It performs no I/O; the
//! only nondeterminism is the RNG handed to the VOPRF.
//!
//! The sibling `realm-daemon` crate supplies storage, authentication, and
//! the HTTP surface.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod engine;
pub mod oprf;
pub mod records;
pub mod requests;
pub mod responses;
pub mod types;

pub use engine::{handle_request, AppResult, Claims, Event, EventKind};
pub use records::{RegistrationState, UserRecord, UserRecordId};
pub use requests::SecretsRequest;
pub use responses::{ResponseStatus, SecretsResponse};
pub use types::RealmId;
