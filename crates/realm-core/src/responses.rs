//! Server responses for the `/req` endpoint.
//!
//! Every response names the payload variant matching the request round and
//! carries a protocol status, so clients decode one shape regardless of
//! outcome. The wire layout is a one-entry map: when the payload has no
//! fields the entry value is the bare status string,
//! `{"Register1": "Ok"}`; otherwise the status wraps the payload,
//! `{"Recover1": {"Ok": {"version": ...}}}`.

use std::fmt;

use serde::de::{self, IgnoredAny, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::types::{
    EncryptedSecret, EncryptedSecretCommitment, EncryptionKeyScalarShare, OprfBlindedResult,
    OprfProof, OprfSignedPublicKey, RegistrationVersion, UnlockKeyCommitment,
};

/// Protocol outcome of a request. These are not errors: the HTTP status is
/// 200 for all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    /// The request succeeded.
    Ok,
    /// No registration exists for this user.
    NotRegistered,
    /// The guess budget is exhausted.
    NoGuesses,
    /// The presented unlock-key tag did not match.
    BadUnlockKeyTag,
    /// The request named a registration version that is no longer current.
    VersionMismatch,
}

impl ResponseStatus {
    /// The wire name of this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "Ok",
            Self::NotRegistered => "NotRegistered",
            Self::NoGuesses => "NoGuesses",
            Self::BadUnlockKeyTag => "BadUnlockKeyTag",
            Self::VersionMismatch => "VersionMismatch",
        }
    }

    fn from_wire(name: &str) -> Option<Self> {
        match name {
            "Ok" => Some(Self::Ok),
            "NotRegistered" => Some(Self::NotRegistered),
            "NoGuesses" => Some(Self::NoGuesses),
            "BadUnlockKeyTag" => Some(Self::BadUnlockKeyTag),
            "VersionMismatch" => Some(Self::VersionMismatch),
            _ => None,
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a `Recover1` response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Recover1Response {
    /// The current registration version, present on `Ok`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub version: Option<RegistrationVersion>,
}

/// Payload of a `Recover2` response. All fields are present on `Ok` and
/// absent otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Recover2Response {
    /// The signed OPRF public key stored at registration.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub oprf_signed_public_key: Option<OprfSignedPublicKey>,
    /// The evaluated point `W = β·U`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub oprf_blinded_result: Option<OprfBlindedResult>,
    /// Proof that the evaluation used the committed key.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub oprf_proof: Option<OprfProof>,
    /// Commitment to the unlock key, stored at registration.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub unlock_key_commitment: Option<UnlockKeyCommitment>,
    /// The registration's guess budget.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub num_guesses: Option<u16>,
    /// Guesses consumed, including the one this request spent.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub guess_count: Option<u16>,
}

/// Payload of a `Recover3` response. The share triple is present on `Ok`;
/// `guesses_remaining` is present on `BadUnlockKeyTag`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Recover3Response {
    /// This realm's share of the secret-encryption key scalar.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub encryption_key_scalar_share: Option<EncryptionKeyScalarShare>,
    /// The encrypted user secret.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub encrypted_secret: Option<EncryptedSecret>,
    /// Commitment to the encrypted secret.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub encrypted_secret_commitment: Option<EncryptedSecretCommitment>,
    /// Guesses left after the failed attempt.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub guesses_remaining: Option<u16>,
}

/// The response payload, one variant per request round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePayload {
    /// Reply to `Register1`; always empty.
    Register1,
    /// Reply to `Register2`; always empty.
    Register2,
    /// Reply to `Recover1`.
    Recover1(Recover1Response),
    /// Reply to `Recover2`.
    Recover2(Box<Recover2Response>),
    /// Reply to `Recover3`.
    Recover3(Recover3Response),
    /// Reply to `Delete`; always empty.
    Delete,
}

impl ResponsePayload {
    /// The wire name of this payload variant.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Register1 => "Register1",
            Self::Register2 => "Register2",
            Self::Recover1(_) => "Recover1",
            Self::Recover2(_) => "Recover2",
            Self::Recover3(_) => "Recover3",
            Self::Delete => "Delete",
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::Register1 | Self::Register2 | Self::Delete => true,
            Self::Recover1(p) => *p == Recover1Response::default(),
            Self::Recover2(p) => **p == Recover2Response::default(),
            Self::Recover3(p) => *p == Recover3Response::default(),
        }
    }
}

/// A complete response: protocol status plus the round's payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretsResponse {
    /// The protocol outcome.
    pub status: ResponseStatus,
    /// The payload for the request's round, possibly empty.
    pub payload: ResponsePayload,
}

struct StatusWrapped<'a, T> {
    status: ResponseStatus,
    payload: &'a T,
}

impl<T: Serialize> Serialize for StatusWrapped<'_, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(self.status.as_str(), self.payload)?;
        map.end()
    }
}

impl Serialize for SecretsResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        let name = self.payload.name();
        if self.payload.is_empty() {
            map.serialize_entry(name, self.status.as_str())?;
        } else {
            match &self.payload {
                ResponsePayload::Recover1(p) => map.serialize_entry(
                    name,
                    &StatusWrapped {
                        status: self.status,
                        payload: p,
                    },
                )?,
                ResponsePayload::Recover2(p) => map.serialize_entry(
                    name,
                    &StatusWrapped {
                        status: self.status,
                        payload: p.as_ref(),
                    },
                )?,
                ResponsePayload::Recover3(p) => map.serialize_entry(
                    name,
                    &StatusWrapped {
                        status: self.status,
                        payload: p,
                    },
                )?,
                ResponsePayload::Register1
                | ResponsePayload::Register2
                | ResponsePayload::Delete => unreachable!("unit payloads are always empty"),
            }
        }
        map.end()
    }
}

/// The value side of a response entry: either a bare status string or a
/// `{status: payload}` map.
enum StatusValue<T> {
    Bare(ResponseStatus),
    Wrapped(ResponseStatus, T),
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for StatusValue<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ValueVisitor<T>(std::marker::PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for ValueVisitor<T> {
            type Value = StatusValue<T>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a status string or a one-entry status map")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                ResponseStatus::from_wire(v)
                    .map(StatusValue::Bare)
                    .ok_or_else(|| de::Error::custom(format!("unknown response status: {v}")))
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let Some(name) = map.next_key::<String>()? else {
                    return Err(de::Error::custom("empty status map"));
                };
                let status = ResponseStatus::from_wire(&name).ok_or_else(|| {
                    de::Error::custom(format!("unknown response status: {name}"))
                })?;
                let payload = map.next_value::<T>()?;
                if map.next_key::<IgnoredAny>()?.is_some() {
                    return Err(de::Error::custom("expected a single status entry"));
                }
                Ok(StatusValue::Wrapped(status, payload))
            }
        }

        deserializer.deserialize_any(ValueVisitor(std::marker::PhantomData))
    }
}

impl<'de> Deserialize<'de> for SecretsResponse {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ResponseVisitor;

        impl<'de> Visitor<'de> for ResponseVisitor {
            type Value = SecretsResponse;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a one-entry map keyed by a response payload name")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let Some(name) = map.next_key::<String>()? else {
                    return Err(de::Error::invalid_length(0, &self));
                };
                let (status, payload) = match name.as_str() {
                    "Register1" => unit_payload(&mut map, ResponsePayload::Register1)?,
                    "Register2" => unit_payload(&mut map, ResponsePayload::Register2)?,
                    "Delete" => unit_payload(&mut map, ResponsePayload::Delete)?,
                    "Recover1" => match map.next_value::<StatusValue<Recover1Response>>()? {
                        StatusValue::Bare(status) => {
                            (status, ResponsePayload::Recover1(Recover1Response::default()))
                        }
                        StatusValue::Wrapped(status, payload) => {
                            (status, ResponsePayload::Recover1(payload))
                        }
                    },
                    "Recover2" => match map.next_value::<StatusValue<Recover2Response>>()? {
                        StatusValue::Bare(status) => (
                            status,
                            ResponsePayload::Recover2(Box::new(Recover2Response::default())),
                        ),
                        StatusValue::Wrapped(status, payload) => {
                            (status, ResponsePayload::Recover2(Box::new(payload)))
                        }
                    },
                    "Recover3" => match map.next_value::<StatusValue<Recover3Response>>()? {
                        StatusValue::Bare(status) => {
                            (status, ResponsePayload::Recover3(Recover3Response::default()))
                        }
                        StatusValue::Wrapped(status, payload) => {
                            (status, ResponsePayload::Recover3(payload))
                        }
                    },
                    other => {
                        return Err(de::Error::unknown_variant(
                            other,
                            &[
                                "Register1",
                                "Register2",
                                "Recover1",
                                "Recover2",
                                "Recover3",
                                "Delete",
                            ],
                        ));
                    }
                };
                if map.next_key::<IgnoredAny>()?.is_some() {
                    return Err(de::Error::custom("expected a single response entry"));
                }
                Ok(SecretsResponse { status, payload })
            }
        }

        fn unit_payload<'de, A: MapAccess<'de>>(
            map: &mut A,
            payload: ResponsePayload,
        ) -> Result<(ResponseStatus, ResponsePayload), A::Error> {
            match map.next_value::<StatusValue<IgnoredAny>>()? {
                StatusValue::Bare(status) | StatusValue::Wrapped(status, _) => {
                    Ok((status, payload))
                }
            }
        }

        deserializer.deserialize_map(ResponseVisitor)
    }
}
